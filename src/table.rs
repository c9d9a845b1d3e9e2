//! Columnar storage for element bodies.
//!
//! Every scalar property is stored as one dense, contiguous buffer of its
//! declared Rust type; every list property as one buffer of per-row cells.
//! [`Value`] is the dynamically typed view of a single cell, used by row
//! views and by the codecs when they cannot stay monomorphic.

use derive_more::From;

use crate::{
    scalar::{for_scalar_type, ListCell, Numeric, Primitive, ScalarType},
    schema::PropertyType,
};

/// One column of an element: a dense buffer of scalars, or a sequence of
/// per-row list cells.
///
/// Plain `Vec`s convert into columns, so
/// `Column::from(vec![1.0f32, 2.0])` (or `.into()`) is enough to build one.
#[derive(Debug, Clone, PartialEq, From)]
pub enum Column {
    Char(Vec<i8>),
    UChar(Vec<u8>),
    Short(Vec<i16>),
    UShort(Vec<u16>),
    Int(Vec<i32>),
    UInt(Vec<u32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    CharList(Vec<ListCell<i8>>),
    UCharList(Vec<ListCell<u8>>),
    ShortList(Vec<ListCell<i16>>),
    UShortList(Vec<ListCell<u16>>),
    IntList(Vec<ListCell<i32>>),
    UIntList(Vec<ListCell<u32>>),
    FloatList(Vec<ListCell<f32>>),
    DoubleList(Vec<ListCell<f64>>),
}

/// Applies `$body` to the payload of whatever variant `$col` is.
macro_rules! column_dispatch {
    ($col:expr, $v:ident => $body:expr) => {
        match $col {
            Column::Char($v) => $body,
            Column::UChar($v) => $body,
            Column::Short($v) => $body,
            Column::UShort($v) => $body,
            Column::Int($v) => $body,
            Column::UInt($v) => $body,
            Column::Float($v) => $body,
            Column::Double($v) => $body,
            Column::CharList($v) => $body,
            Column::UCharList($v) => $body,
            Column::ShortList($v) => $body,
            Column::UShortList($v) => $body,
            Column::IntList($v) => $body,
            Column::UIntList($v) => $body,
            Column::FloatList($v) => $body,
            Column::DoubleList($v) => $body,
        }
    };
}

impl Column {
    /// Creates an empty column of the right variant for a property type.
    /// The capacity is only a hint; it is clamped so that a hostile header
    /// count cannot force a huge allocation before any data arrives.
    pub(crate) fn new_for(ty: PropertyType, capacity: usize) -> Column {
        let capacity = capacity.min(1 << 20);
        match ty {
            PropertyType::Scalar(s) => for_scalar_type!(s, T => {
                T::scalar_column(Vec::<T>::with_capacity(capacity))
            }),
            PropertyType::List { scalar_type, .. } => for_scalar_type!(scalar_type, T => {
                T::list_column(Vec::<ListCell<T>>::with_capacity(capacity))
            }),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        column_dispatch!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The scalar type of the cells (for lists, of the list values).
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Column::Char(_) | Column::CharList(_) => ScalarType::Char,
            Column::UChar(_) | Column::UCharList(_) => ScalarType::UChar,
            Column::Short(_) | Column::ShortList(_) => ScalarType::Short,
            Column::UShort(_) | Column::UShortList(_) => ScalarType::UShort,
            Column::Int(_) | Column::IntList(_) => ScalarType::Int,
            Column::UInt(_) | Column::UIntList(_) => ScalarType::UInt,
            Column::Float(_) | Column::FloatList(_) => ScalarType::Float,
            Column::Double(_) | Column::DoubleList(_) => ScalarType::Double,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            Column::CharList(_)
                | Column::UCharList(_)
                | Column::ShortList(_)
                | Column::UShortList(_)
                | Column::IntList(_)
                | Column::UIntList(_)
                | Column::FloatList(_)
                | Column::DoubleList(_)
        )
    }

    /// Typed view of a scalar column. `None` if `T` is not the column's
    /// exact type or the column holds lists.
    pub fn as_slice<T: ColumnScalar>(&self) -> Option<&[T]> {
        T::scalars(self).map(|v| v.as_slice())
    }

    /// Mutable typed view of a scalar column.
    pub fn as_mut_slice<T: ColumnScalar>(&mut self) -> Option<&mut [T]> {
        T::scalars_mut(self).map(|v| v.as_mut_slice())
    }

    /// Typed view of a list column's per-row cells.
    pub fn as_lists<T: ColumnScalar>(&self) -> Option<&[ListCell<T>]> {
        T::lists(self).map(|v| v.as_slice())
    }

    pub fn as_lists_mut<T: ColumnScalar>(&mut self) -> Option<&mut [ListCell<T>]> {
        T::lists_mut(self).map(|v| v.as_mut_slice())
    }

    /// Converts an equal-length list column into a dense row-major block,
    /// returned as `(row_len, values)`. `None` if this is not a list
    /// column of `T` or the row lengths differ.
    pub fn to_dense<T: ColumnScalar>(&self) -> Option<(usize, Vec<T>)> {
        let rows = T::lists(self)?;
        let k = rows.first().map_or(0, |r| r.len());
        if rows.iter().any(|r| r.len() != k) {
            return None;
        }
        let mut out = Vec::with_capacity(k * rows.len());
        for row in rows {
            out.extend_from_slice(row);
        }
        Some((k, out))
    }

    /// The cell at `row` as a dynamically typed value.
    pub fn value_at(&self, row: usize) -> Value {
        match self {
            Column::Char(v) => Value::Char(v[row]),
            Column::UChar(v) => Value::UChar(v[row]),
            Column::Short(v) => Value::Short(v[row]),
            Column::UShort(v) => Value::UShort(v[row]),
            Column::Int(v) => Value::Int(v[row]),
            Column::UInt(v) => Value::UInt(v[row]),
            Column::Float(v) => Value::Float(v[row]),
            Column::Double(v) => Value::Double(v[row]),
            Column::CharList(v) => Value::CharList(v[row].clone()),
            Column::UCharList(v) => Value::UCharList(v[row].clone()),
            Column::ShortList(v) => Value::ShortList(v[row].clone()),
            Column::UShortList(v) => Value::UShortList(v[row].clone()),
            Column::IntList(v) => Value::IntList(v[row].clone()),
            Column::UIntList(v) => Value::UIntList(v[row].clone()),
            Column::FloatList(v) => Value::FloatList(v[row].clone()),
            Column::DoubleList(v) => Value::DoubleList(v[row].clone()),
        }
    }

    /// Interchange form of the scalar cell at `row`. Panics on list
    /// columns; callers dispatch on the schema first.
    pub(crate) fn scalar_numeric(&self, row: usize) -> Numeric {
        match self {
            Column::Char(v) => v[row].to_numeric(),
            Column::UChar(v) => v[row].to_numeric(),
            Column::Short(v) => v[row].to_numeric(),
            Column::UShort(v) => v[row].to_numeric(),
            Column::Int(v) => v[row].to_numeric(),
            Column::UInt(v) => v[row].to_numeric(),
            Column::Float(v) => v[row].to_numeric(),
            Column::Double(v) => v[row].to_numeric(),
            _ => panic!("scalar access on a list column"),
        }
    }

    /// Length of the list cell at `row`. Panics on scalar columns.
    pub(crate) fn list_len_at(&self, row: usize) -> usize {
        match self {
            Column::CharList(v) => v[row].len(),
            Column::UCharList(v) => v[row].len(),
            Column::ShortList(v) => v[row].len(),
            Column::UShortList(v) => v[row].len(),
            Column::IntList(v) => v[row].len(),
            Column::UIntList(v) => v[row].len(),
            Column::FloatList(v) => v[row].len(),
            Column::DoubleList(v) => v[row].len(),
            _ => panic!("list access on a scalar column"),
        }
    }

    /// Interchange form of list item `j` of the cell at `row`.
    pub(crate) fn list_numeric(&self, row: usize, j: usize) -> Numeric {
        match self {
            Column::CharList(v) => v[row][j].to_numeric(),
            Column::UCharList(v) => v[row][j].to_numeric(),
            Column::ShortList(v) => v[row][j].to_numeric(),
            Column::UShortList(v) => v[row][j].to_numeric(),
            Column::IntList(v) => v[row][j].to_numeric(),
            Column::UIntList(v) => v[row][j].to_numeric(),
            Column::FloatList(v) => v[row][j].to_numeric(),
            Column::DoubleList(v) => v[row][j].to_numeric(),
            _ => panic!("list access on a scalar column"),
        }
    }
}

/// One cell of some PLY type.
#[derive(Debug, Clone, PartialEq, From)]
pub enum Value {
    Char(i8),
    UChar(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Float(f32),
    Double(f64),
    CharList(ListCell<i8>),
    UCharList(ListCell<u8>),
    ShortList(ListCell<i16>),
    UShortList(ListCell<u16>),
    IntList(ListCell<i32>),
    UIntList(ListCell<u32>),
    FloatList(ListCell<f32>),
    DoubleList(ListCell<f64>),
}

impl Value {
    /// Returns the value as an integer, or `None` if it is not scalar
    /// integer typed.
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Value::Char(v) => Some(v.into()),
            Value::UChar(v) => Some(v.into()),
            Value::Short(v) => Some(v.into()),
            Value::UShort(v) => Some(v.into()),
            Value::Int(v) => Some(v.into()),
            Value::UInt(v) => Some(v.into()),
            _ => None,
        }
    }

    /// Returns the value as a float, or `None` if it is not scalar float
    /// typed.
    pub fn as_floating_point(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v.into()),
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Returns an integer-typed list as indices, or `None` otherwise.
    pub fn as_index_list(&self) -> Option<Vec<u64>> {
        macro_rules! collect {
            ($list:expr) => {
                $list.iter().map(|&v| u64::try_from(v).ok()).collect()
            };
        }
        match self {
            Value::CharList(l) => collect!(l),
            Value::UCharList(l) => collect!(l),
            Value::ShortList(l) => collect!(l),
            Value::UShortList(l) => collect!(l),
            Value::IntList(l) => collect!(l),
            Value::UIntList(l) => collect!(l),
            _ => None,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(
            self,
            Value::CharList(_)
                | Value::UCharList(_)
                | Value::ShortList(_)
                | Value::UShortList(_)
                | Value::IntList(_)
                | Value::UIntList(_)
                | Value::FloatList(_)
                | Value::DoubleList(_)
        )
    }

    /// Interchange form of a scalar value; `None` for lists.
    pub(crate) fn scalar_numeric(&self) -> Option<Numeric> {
        match *self {
            Value::Char(v) => Some(v.to_numeric()),
            Value::UChar(v) => Some(v.to_numeric()),
            Value::Short(v) => Some(v.to_numeric()),
            Value::UShort(v) => Some(v.to_numeric()),
            Value::Int(v) => Some(v.to_numeric()),
            Value::UInt(v) => Some(v.to_numeric()),
            Value::Float(v) => Some(v.to_numeric()),
            Value::Double(v) => Some(v.to_numeric()),
            _ => None,
        }
    }
}

/// The glue between a [`Primitive`] Rust type and the [`Column`] and
/// [`Value`] variants that hold it.
pub trait ColumnScalar: Primitive {
    fn scalars(col: &Column) -> Option<&Vec<Self>>;
    fn scalars_mut(col: &mut Column) -> Option<&mut Vec<Self>>;
    fn lists(col: &Column) -> Option<&Vec<ListCell<Self>>>;
    fn lists_mut(col: &mut Column) -> Option<&mut Vec<ListCell<Self>>>;
    fn scalar_column(values: Vec<Self>) -> Column;
    fn list_column(rows: Vec<ListCell<Self>>) -> Column;
    fn scalar_value(self) -> Value;
    fn list_value(row: ListCell<Self>) -> Value;
}

macro_rules! impl_column_scalar {
    ($ty:ty, $scalar:ident, $list:ident) => {
        impl ColumnScalar for $ty {
            fn scalars(col: &Column) -> Option<&Vec<Self>> {
                match col {
                    Column::$scalar(v) => Some(v),
                    _ => None,
                }
            }

            fn scalars_mut(col: &mut Column) -> Option<&mut Vec<Self>> {
                match col {
                    Column::$scalar(v) => Some(v),
                    _ => None,
                }
            }

            fn lists(col: &Column) -> Option<&Vec<ListCell<Self>>> {
                match col {
                    Column::$list(v) => Some(v),
                    _ => None,
                }
            }

            fn lists_mut(col: &mut Column) -> Option<&mut Vec<ListCell<Self>>> {
                match col {
                    Column::$list(v) => Some(v),
                    _ => None,
                }
            }

            fn scalar_column(values: Vec<Self>) -> Column {
                Column::$scalar(values)
            }

            fn list_column(rows: Vec<ListCell<Self>>) -> Column {
                Column::$list(rows)
            }

            fn scalar_value(self) -> Value {
                Value::$scalar(self)
            }

            fn list_value(row: ListCell<Self>) -> Value {
                Value::$list(row)
            }
        }
    };
}

impl_column_scalar!(i8, Char, CharList);
impl_column_scalar!(u8, UChar, UCharList);
impl_column_scalar!(i16, Short, ShortList);
impl_column_scalar!(u16, UShort, UShortList);
impl_column_scalar!(i32, Int, IntList);
impl_column_scalar!(u32, UInt, UIntList);
impl_column_scalar!(f32, Float, FloatList);
impl_column_scalar!(f64, Double, DoubleList);
