//! Encoding the header and element bodies.
//!
//! The header is always ASCII with LF line endings and canonical type
//! spellings. Bodies mirror the reader: fixed-layout binary elements are
//! interleaved into one row-major buffer and written in a single call,
//! ragged elements go row by row. Columns whose in-memory type differs
//! from the declared property type are cast element-wise; casts that
//! cannot represent a value are errors, never silent truncation.

use std::{borrow::Cow, io::Write};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::{
    container::Ply,
    element::Element,
    error::{Error, Result},
    scalar::{for_scalar_type, Numeric, Primitive, ScalarType},
    schema::PropertyType,
    table::Column,
    Encoding,
};

pub(crate) fn write_ply<W: Write>(w: &mut W, ply: &Ply) -> Result<()> {
    let header = ply.make_header()?;
    w.write_all(header.encode().as_bytes())?;
    for element in ply.elements() {
        match header.encoding {
            Encoding::Ascii => write_element_ascii(w, element)?,
            Encoding::BinaryLittleEndian => write_element_binary::<LittleEndian, W>(w, element)?,
            Encoding::BinaryBigEndian => write_element_binary::<BigEndian, W>(w, element)?,
        }
    }
    Ok(())
}

fn cast_error(n: Numeric, ty: ScalarType) -> Error {
    Error::parse(format!("cannot represent value {} as {}", n, ty))
}

/// One column per schema property, in schema order. Extra columns are
/// simply never asked for; a schema property without a column is an error.
fn schema_columns(element: &Element) -> Result<Vec<Cow<'_, Column>>> {
    element
        .properties()
        .iter()
        .map(|p| {
            let col = element.column(p.name()).map_err(|_| {
                Error::parse(format!("dangling property '{}'", p.name()))
                    .with_element(element.name())
            })?;
            if col.len() != element.len() {
                return Err(Error::parse(format!(
                    "column '{}' has {} rows but the element declares {}",
                    p.name(),
                    col.len(),
                    element.len(),
                ))
                .with_element(element.name()));
            }
            Ok(col)
        })
        .collect()
}

fn write_element_ascii<W: Write>(w: &mut W, element: &Element) -> Result<()> {
    let columns = schema_columns(element)?;
    let props = element.properties();

    for row in 0..element.len() {
        for (idx, prop) in props.iter().enumerate() {
            let ctx = |e: Error| {
                e.with_element(element.name())
                    .with_row(row as u64)
                    .with_property(prop.name())
            };
            if idx > 0 {
                w.write_all(b" ")?;
            }
            let col = columns[idx].as_ref();
            match prop.ty() {
                PropertyType::Scalar(ty) => {
                    write_ascii_cell(w, col.scalar_numeric(row), ty).map_err(&ctx)?;
                }
                PropertyType::List { len_type, scalar_type } => {
                    let n = col.list_len_at(row);
                    check_list_len(n, len_type).map_err(&ctx)?;
                    write!(w, "{}", n)?;
                    for j in 0..n {
                        w.write_all(b" ")?;
                        write_ascii_cell(w, col.list_numeric(row, j), scalar_type)
                            .map_err(&ctx)?;
                    }
                }
            }
        }
        w.write_all(b"\n")?;
    }
    Ok(())
}

/// Casts one value to the declared type and writes its decimal form.
fn write_ascii_cell<W: Write>(w: &mut W, n: Numeric, ty: ScalarType) -> Result<()> {
    for_scalar_type!(ty, T => {
        let v = T::from_numeric(n).ok_or_else(|| cast_error(n, ty))?;
        write!(w, "{}", v)?;
    });
    Ok(())
}

fn check_list_len(n: usize, len_type: ScalarType) -> Result<()> {
    let numeric = Numeric::UInt(n as u64);
    let fits = for_scalar_type!(len_type, L => { L::from_numeric(numeric).is_some() });
    if fits {
        Ok(())
    } else {
        Err(Error::parse(format!(
            "list length {} cannot be represented as {}",
            n, len_type,
        )))
    }
}

fn write_binary_len<E: ByteOrder, W: Write>(
    w: &mut W,
    n: usize,
    len_type: ScalarType,
) -> Result<()> {
    let numeric = Numeric::UInt(n as u64);
    for_scalar_type!(len_type, L => {
        let v = L::from_numeric(numeric).ok_or_else(|| {
            Error::parse(format!(
                "list length {} cannot be represented as {}",
                n, len_type,
            ))
        })?;
        v.write_to::<E, W>(w)?;
    });
    Ok(())
}

fn write_element_binary<E: ByteOrder, W: Write>(w: &mut W, element: &Element) -> Result<()> {
    let columns = schema_columns(element)?;
    let props = element.properties();

    if element.def().is_fixed_layout() {
        // Bulk mirror of the bulk read: interleave the columns into one
        // row-major buffer and write it in a single call.
        let row_size = element.def().row_size().expect("fixed-layout element") as usize;
        let count = element.len();
        let mut buf = vec![0u8; count * row_size];
        let mut offset = 0;
        for (idx, prop) in props.iter().enumerate() {
            let ty = prop.ty().scalar_type();
            encode_bulk_column::<E>(columns[idx].as_ref(), ty, &mut buf, offset, row_size)
                .map_err(|e| e.with_element(element.name()).with_property(prop.name()))?;
            offset += ty.len().as_usize();
        }
        w.write_all(&buf)?;
        return Ok(());
    }

    for row in 0..element.len() {
        for (idx, prop) in props.iter().enumerate() {
            let ctx = |e: Error| {
                e.with_element(element.name())
                    .with_row(row as u64)
                    .with_property(prop.name())
            };
            let col = columns[idx].as_ref();
            match prop.ty() {
                PropertyType::Scalar(ty) => {
                    let n = col.scalar_numeric(row);
                    for_scalar_type!(ty, T => {
                        let v = T::from_numeric(n)
                            .ok_or_else(|| cast_error(n, ty))
                            .map_err(&ctx)?;
                        v.write_to::<E, W>(w)?;
                    });
                }
                PropertyType::List { len_type, scalar_type } => {
                    let n = col.list_len_at(row);
                    write_binary_len::<E, W>(w, n, len_type).map_err(&ctx)?;
                    for j in 0..n {
                        let item = col.list_numeric(row, j);
                        for_scalar_type!(scalar_type, T => {
                            let v = T::from_numeric(item)
                                .ok_or_else(|| cast_error(item, scalar_type))
                                .map_err(&ctx)?;
                            v.write_to::<E, W>(w)?;
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

fn encode_bulk_column<E: ByteOrder>(
    col: &Column,
    ty: ScalarType,
    buf: &mut [u8],
    offset: usize,
    row_size: usize,
) -> Result<()> {
    for_scalar_type!(ty, T => {
        match col.as_slice::<T>() {
            // Same-typed column: the common, monomorphic fast path.
            Some(values) => {
                let mut pos = offset;
                for &v in values {
                    v.write_into::<E>(&mut buf[pos..pos + T::SIZE]);
                    pos += row_size;
                }
            }
            // The column's type differs from the declared one: cast
            // element-wise, with checks.
            None => {
                let mut pos = offset;
                for row in 0..col.len() {
                    let n = col.scalar_numeric(row);
                    let v = T::from_numeric(n)
                        .ok_or_else(|| cast_error(n, ty).with_row(row as u64))?;
                    v.write_into::<E>(&mut buf[pos..pos + T::SIZE]);
                    pos += row_size;
                }
            }
        }
    });
    Ok(())
}
