//! Elements: a schema plus the table of row data behind it.
//!
//! A freshly parsed or described element owns its columns. When a binary
//! file is opened with memory mapping and an element has a fixed layout
//! (or was promoted to one via a validated known list length), the element
//! is instead backed by a region of the mapping and cells are decoded on
//! access. The mapping is shared via `Rc`, so an element moved out of its
//! container keeps the map alive.

use std::{borrow::Cow, cell::RefCell, rc::Rc};

use byteorder::NativeEndian;
use memmap2::{Mmap, MmapMut};

use crate::{
    error::{Error, Result},
    scalar::{for_scalar_type, ListCell, Primitive, ScalarType},
    schema::{ElementDef, PropertyDef, PropertyType},
    table::{Column, ColumnScalar, Value},
};

/// How an element's row table is backed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// The element owns its columns. This is the usual case, and always
    /// the case for ragged elements.
    Owned,
    /// The rows are a read-only view into a memory-mapped file region.
    MappedReadOnly,
    /// The rows are a writable view into a memory-mapped file region;
    /// writes become visible in the file after [`Element::flush`].
    MappedReadWrite,
}

/// Byte layout of one mapped element region: where it starts in the file,
/// how wide a row is, and where each property sits within a row.
#[derive(Debug, Clone)]
pub(crate) struct Region {
    pub(crate) start: usize,
    pub(crate) row_size: usize,
    pub(crate) fields: Vec<FieldSlot>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldSlot {
    /// Offset of the value data within a row (for lists, past the length
    /// prefix).
    pub(crate) offset: usize,
    pub(crate) ty: ScalarType,
    pub(crate) list: Option<KnownList>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct KnownList {
    pub(crate) len_type: ScalarType,
    pub(crate) len: usize,
}

#[derive(Debug, Clone)]
pub(crate) enum TableData {
    /// Name/column pairs. The first `properties().len()` entries parallel
    /// the schema; further entries are extra columns that are ignored on
    /// write.
    Columns(Vec<(String, Column)>),
    MappedRo { map: Rc<Mmap>, region: Region },
    MappedRw { map: Rc<RefCell<MmapMut>>, region: Region },
}

/// A named table of identically-schemaed rows.
#[derive(Debug, Clone)]
pub struct Element {
    pub(crate) def: ElementDef,
    pub(crate) data: TableData,
}

impl Element {
    /// Constructs an element from named columns. The schema is inferred
    /// from the column types; list properties get a `uint8` length type,
    /// which [`Element::set_list_len_type`] can change.
    pub fn describe<N, C>(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = (N, C)>,
    ) -> Result<Element>
    where
        N: Into<String>,
        C: Into<Column>,
    {
        let columns: Vec<(String, Column)> = columns
            .into_iter()
            .map(|(n, c)| (n.into(), c.into()))
            .collect();

        let name = name.into();
        let mut count: Option<usize> = None;
        for (col_name, col) in &columns {
            match count {
                None => count = Some(col.len()),
                Some(n) if n != col.len() => {
                    return Err(Error::parse(format!(
                        "column '{}' has {} rows but '{}' declared {}",
                        col_name,
                        col.len(),
                        columns[0].0,
                        n,
                    ))
                    .with_element(&name));
                }
                Some(_) => {}
            }
        }

        let mut def = ElementDef::new(name, count.unwrap_or(0) as u64)?;
        for (col_name, col) in &columns {
            let ty = if col.is_list() {
                PropertyType::List {
                    len_type: ScalarType::UChar,
                    scalar_type: col.scalar_type(),
                }
            } else {
                PropertyType::Scalar(col.scalar_type())
            };
            def.push_property(PropertyDef::new(col_name.clone(), ty)?)
                .map_err(|e| e.with_element(def.name()))?;
        }

        Ok(Element {
            def,
            data: TableData::Columns(columns),
        })
    }

    pub(crate) fn from_columns(def: ElementDef, columns: Vec<(String, Column)>) -> Element {
        Element {
            def,
            data: TableData::Columns(columns),
        }
    }

    pub fn name(&self) -> &str {
        self.def.name()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.def.count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of rows as declared in the header (`u64`, since counts in a
    /// header are not bounded by the platform's `usize`).
    pub fn count(&self) -> u64 {
        self.def.count()
    }

    /// The schema of this element.
    pub fn def(&self) -> &ElementDef {
        &self.def
    }

    pub fn properties(&self) -> &[PropertyDef] {
        self.def.properties()
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.def.property(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.def.property(name).is_some()
    }

    pub fn comments(&self) -> &[String] {
        self.def.comments()
    }

    pub fn set_comments(&mut self, comments: Vec<String>) -> Result<()> {
        self.def.set_comments(comments)
    }

    pub fn backing(&self) -> Backing {
        match &self.data {
            TableData::Columns(_) => Backing::Owned,
            TableData::MappedRo { .. } => Backing::MappedReadOnly,
            TableData::MappedRw { .. } => Backing::MappedReadWrite,
        }
    }

    /// Replaces the schema, e.g. to reorder properties, drop some, or
    /// change a declared type so the next write casts. Every property must
    /// still be backed by a column of the matching kind. Materializes a
    /// mapped element first.
    pub fn set_properties(&mut self, defs: Vec<PropertyDef>) -> Result<()> {
        self.make_owned();
        {
            let columns = self.columns();
            for def in &defs {
                let col = columns
                    .iter()
                    .find(|(n, _)| n == def.name())
                    .map(|(_, c)| c)
                    .ok_or_else(|| {
                        Error::parse(format!("dangling property '{}'", def.name()))
                            .with_element(self.def.name())
                    })?;
                if col.is_list() != def.ty().is_list() {
                    return Err(Error::parse(format!(
                        "property '{}' kind does not match its column",
                        def.name(),
                    ))
                    .with_element(self.def.name()));
                }
            }
        }
        self.def.replace_properties(defs)?;

        // Keep the column order parallel to the new schema; columns no
        // longer referenced by it become extras at the back.
        let cols = match &mut self.data {
            TableData::Columns(cols) => cols,
            _ => unreachable!("make_owned left a mapped backing"),
        };
        let mut reordered = Vec::with_capacity(cols.len());
        for def in self.def.properties() {
            let pos = cols
                .iter()
                .position(|(n, _)| n == def.name())
                .expect("column presence checked above");
            reordered.push(cols.remove(pos));
        }
        reordered.append(cols);
        *cols = reordered;
        Ok(())
    }

    /// Changes the length type used to serialize a list property.
    pub fn set_list_len_type(&mut self, prop: &str, len_type: ScalarType) -> Result<()> {
        let pos = self
            .def
            .prop_pos(prop)
            .ok_or_else(|| self.no_property(prop))?;
        let old = &self.def.properties()[pos];
        let scalar_type = match old.ty() {
            PropertyType::List { scalar_type, .. } => scalar_type,
            PropertyType::Scalar(_) => {
                return Err(Error::parse(format!("property '{}' is not a list", prop))
                    .with_element(self.def.name()));
            }
        };
        let mut defs = self.def.properties().to_vec();
        defs[pos] = PropertyDef::new(prop, PropertyType::list(len_type, scalar_type)?)?;
        self.def.replace_properties(defs)
    }

    /// The column for `name`. Owned columns are borrowed; mapped columns
    /// are decoded into a fresh `Column` (the mapping itself stays
    /// untouched).
    pub fn column(&self, name: &str) -> Result<Cow<'_, Column>> {
        match &self.data {
            TableData::Columns(cols) => cols
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, c)| Cow::Borrowed(c))
                .ok_or_else(|| self.no_property(name)),
            TableData::MappedRo { map, region } => {
                let idx = self.def.prop_pos(name).ok_or_else(|| self.no_property(name))?;
                Ok(Cow::Owned(self.materialize_column(&map[..], region, idx)))
            }
            TableData::MappedRw { map, region } => {
                let idx = self.def.prop_pos(name).ok_or_else(|| self.no_property(name))?;
                let guard = map.borrow();
                Ok(Cow::Owned(self.materialize_column(&guard, region, idx)))
            }
        }
    }

    /// Replaces (or adds) a column. The length must equal the element's
    /// row count and, for schema properties, the scalar/list kind must
    /// match the declaration; the value type may differ and is implicitly
    /// cast on write. Materializes a mapped element first.
    pub fn set_column(&mut self, name: &str, column: impl Into<Column>) -> Result<()> {
        let column = column.into();
        if column.len() != self.len() {
            return Err(Error::parse(format!(
                "column '{}' has {} rows but the element has {}",
                name,
                column.len(),
                self.len(),
            ))
            .with_element(self.def.name()));
        }
        if let Some(def) = self.def.property(name) {
            if def.ty().is_list() != column.is_list() {
                return Err(Error::parse(format!(
                    "property '{}' kind does not match the assigned column",
                    name,
                ))
                .with_element(self.def.name()));
            }
        }

        self.make_owned();
        let cols = match &mut self.data {
            TableData::Columns(cols) => cols,
            _ => unreachable!("make_owned left a mapped backing"),
        };
        match cols.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = column,
            None => cols.push((name.to_string(), column)),
        }
        Ok(())
    }

    /// Mutable access to an owned column. Errors for mapped elements; call
    /// [`Element::make_owned`] first, or use [`Element::set`] to write
    /// through a read-write mapping.
    pub fn column_mut(&mut self, name: &str) -> Result<&mut Column> {
        let missing = self.no_property(name);
        match &mut self.data {
            TableData::Columns(cols) => cols
                .iter_mut()
                .find(|(n, _)| n == name)
                .map(|(_, c)| c)
                .ok_or(missing),
            _ => Err(Error::parse(
                "cannot mutably borrow a memory-mapped column; use make_owned() or set()",
            )
            .with_element(self.def.name())),
        }
    }

    /// One cell as a dynamically typed value.
    pub fn value(&self, row: usize, name: &str) -> Result<Value> {
        let idx = self.def.prop_pos(name).ok_or_else(|| self.no_property(name))?;
        self.check_row(row)?;
        Ok(self.value_at(row, idx))
    }

    /// One scalar cell, converted to `T`. The conversion is checked the
    /// same way write casts are.
    pub fn get<T: ColumnScalar>(&self, row: usize, name: &str) -> Result<T> {
        let value = self.value(row, name)?;
        let numeric = value.scalar_numeric().ok_or_else(|| {
            Error::parse(format!("property '{}' is a list", name)).with_element(self.def.name())
        })?;
        T::from_numeric(numeric).ok_or_else(|| {
            Error::parse(format!("cannot represent value {} as {}", numeric, T::TYPE))
                .with_element(self.def.name())
                .with_row(row as u64)
                .with_property(name)
        })
    }

    /// Sets one scalar cell, casting `v` to the column's type. For
    /// read-write mapped elements this writes into the mapping (visible in
    /// the file after [`Element::flush`]); read-only mapped elements
    /// reject writes.
    pub fn set<T: ColumnScalar>(&mut self, row: usize, name: &str, v: T) -> Result<()> {
        let idx = self.def.prop_pos(name).ok_or_else(|| self.no_property(name))?;
        self.check_row(row)?;
        let numeric = v.to_numeric();

        let cast_err = |ty: ScalarType| {
            Error::parse(format!("cannot represent value {} as {}", numeric, ty))
                .with_row(row as u64)
                .with_property(name)
        };

        match &mut self.data {
            TableData::Columns(cols) => {
                let col = &mut cols[idx].1;
                if col.is_list() {
                    return Err(Error::parse(format!(
                        "property '{}' is a list; assign a whole column instead",
                        name,
                    ))
                    .with_element(self.def.name()));
                }
                let ty = col.scalar_type();
                for_scalar_type!(ty, C => {
                    let cast = C::from_numeric(numeric)
                        .ok_or_else(|| cast_err(ty).with_element(self.def.name()))?;
                    C::scalars_mut(col).expect("column variant matches its scalar type")[row] =
                        cast;
                });
                Ok(())
            }
            TableData::MappedRw { map, region } => {
                let slot = region.fields[idx];
                if slot.list.is_some() {
                    return Err(Error::parse(format!(
                        "property '{}' is a list; assign a whole column instead",
                        name,
                    ))
                    .with_element(self.def.name()));
                }
                let pos = region.start + row * region.row_size + slot.offset;
                let mut guard = map.borrow_mut();
                for_scalar_type!(slot.ty, C => {
                    let cast = C::from_numeric(numeric)
                        .ok_or_else(|| cast_err(slot.ty).with_element(self.def.name()))?;
                    cast.write_into::<NativeEndian>(&mut guard[pos..pos + C::SIZE]);
                });
                Ok(())
            }
            TableData::MappedRo { .. } => Err(Error::parse(
                "element is memory-mapped read-only",
            )
            .with_element(self.def.name())),
        }
    }

    /// A read-only, tuple-like view of one row, in property order.
    pub fn row(&self, row: usize) -> Result<Row<'_>> {
        self.check_row(row)?;
        let values = (0..self.def.properties().len())
            .map(|idx| self.value_at(row, idx))
            .collect();
        Ok(Row { def: &self.def, values })
    }

    /// Copies a mapped element's rows into owned columns. A no-op for
    /// elements that already own their data.
    pub fn make_owned(&mut self) {
        let columns = match &self.data {
            TableData::Columns(_) => return,
            TableData::MappedRo { map, region } => self.materialize_all(&map[..], region),
            TableData::MappedRw { map, region } => {
                let guard = map.borrow();
                self.materialize_all(&guard, region)
            }
        };
        self.data = TableData::Columns(columns);
    }

    /// Flushes a read-write mapping to disk. A no-op for other backings.
    pub fn flush(&self) -> Result<()> {
        if let TableData::MappedRw { map, .. } = &self.data {
            map.borrow()
                .flush()
                .map_err(|e| Error::from(e).with_element(self.def.name()))?;
        }
        Ok(())
    }

    fn no_property(&self, name: &str) -> Error {
        Error::parse(format!("no property '{}'", name)).with_element(self.def.name())
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row >= self.len() {
            return Err(Error::parse(format!(
                "row index {} out of range ({} rows)",
                row,
                self.len(),
            ))
            .with_element(self.def.name()));
        }
        Ok(())
    }

    /// The cell at (`row`, property `idx`), whatever the backing.
    pub(crate) fn value_at(&self, row: usize, idx: usize) -> Value {
        match &self.data {
            TableData::Columns(cols) => cols[idx].1.value_at(row),
            TableData::MappedRo { map, region } => mapped_value(&map[..], region, row, idx),
            TableData::MappedRw { map, region } => {
                let guard = map.borrow();
                mapped_value(&guard, region, row, idx)
            }
        }
    }

    /// Owned columns in schema order (no extras). Panics on mapped
    /// backings; used by the writer after `column()` materialization.
    pub(crate) fn columns(&self) -> &[(String, Column)] {
        match &self.data {
            TableData::Columns(cols) => cols,
            _ => panic!("columns() called on a mapped element"),
        }
    }

    fn materialize_all(&self, bytes: &[u8], region: &Region) -> Vec<(String, Column)> {
        (0..self.def.properties().len())
            .map(|idx| {
                let name = self.def.properties()[idx].name().to_string();
                (name, self.materialize_column(bytes, region, idx))
            })
            .collect()
    }

    fn materialize_column(&self, bytes: &[u8], region: &Region, idx: usize) -> Column {
        let count = self.len();
        let slot = region.fields[idx];
        match slot.list {
            None => for_scalar_type!(slot.ty, T => {
                let mut values = Vec::<T>::with_capacity(count);
                let mut pos = region.start + slot.offset;
                for _ in 0..count {
                    values.push(T::decode::<NativeEndian>(&bytes[pos..]));
                    pos += region.row_size;
                }
                T::scalar_column(values)
            }),
            Some(known) => for_scalar_type!(slot.ty, T => {
                let mut rows = Vec::<ListCell<T>>::with_capacity(count);
                let mut pos = region.start + slot.offset;
                for _ in 0..count {
                    let mut cell = ListCell::<T>::with_capacity(known.len);
                    for j in 0..known.len {
                        cell.push(T::decode::<NativeEndian>(&bytes[pos + j * T::SIZE..]));
                    }
                    rows.push(cell);
                    pos += region.row_size;
                }
                T::list_column(rows)
            }),
        }
    }
}

fn mapped_value(bytes: &[u8], region: &Region, row: usize, idx: usize) -> Value {
    let slot = region.fields[idx];
    let pos = region.start + row * region.row_size + slot.offset;
    match slot.list {
        None => for_scalar_type!(slot.ty, T => {
            T::scalar_value(T::decode::<NativeEndian>(&bytes[pos..]))
        }),
        Some(known) => for_scalar_type!(slot.ty, T => {
            let mut cell = ListCell::<T>::with_capacity(known.len);
            for j in 0..known.len {
                cell.push(T::decode::<NativeEndian>(&bytes[pos + j * T::SIZE..]));
            }
            T::list_value(cell)
        }),
    }
}

/// A read-only view of one row: the cell values in property order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row<'a> {
    def: &'a ElementDef,
    values: Vec<Value>,
}

impl Row<'_> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The cell for the named property.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.def.prop_pos(name).map(|i| &self.values[i])
    }
}

impl std::ops::Index<usize> for Row<'_> {
    type Output = Value;

    fn index(&self, idx: usize) -> &Value {
        &self.values[idx]
    }
}
