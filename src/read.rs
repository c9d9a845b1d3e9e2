//! Decoding element bodies.
//!
//! Three code paths, chosen per element:
//!
//! - **bulk**: fixed-layout binary elements are read with a single
//!   `count * row_size` read and de-interleaved into columns, with byte
//!   order applied per field;
//! - **ragged**: elements with list properties are read row by row,
//!   property by property, honoring each list's length prefix;
//! - **mapped**: when the file is memory-mapped, has native byte order and
//!   the element's layout is fixed (or promoted to fixed by a validated
//!   known list length), no bytes are copied at all; the element is backed
//!   by a region of the mapping.

use std::{
    cell::RefCell,
    collections::HashMap,
    io::{self, BufRead, Cursor, Read},
    rc::Rc,
};

use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian};
use memmap2::{Mmap, MmapMut};

use crate::{
    container::KnownListLen,
    element::{Element, FieldSlot, KnownList, Region, TableData},
    error::{Error, Result},
    header::{read_line_any, Header},
    scalar::{for_scalar_type, ListCell, Numeric, Primitive, ScalarType},
    schema::{ElementDef, PropertyType},
    table::{Column, ColumnScalar},
    Encoding,
};

fn body_error(message: &str, def: &ElementDef, row: usize) -> Error {
    Error::parse(message).with_element(def.name()).with_row(row as u64)
}

fn usize_count(def: &ElementDef) -> Result<usize> {
    usize::try_from(def.count()).map_err(|_| {
        Error::parse(format!(
            "element count {} exceeds this platform's address space",
            def.count(),
        ))
        .with_element(def.name())
    })
}

fn named(def: &ElementDef, columns: Vec<Column>) -> Vec<(String, Column)> {
    def.properties()
        .iter()
        .map(|p| p.name().to_string())
        .zip(columns)
        .collect()
}

/// Converts a decoded length prefix into a row length.
fn numeric_list_len(n: Numeric) -> Result<usize> {
    match n {
        Numeric::Int(v) if v < 0 => Err(Error::parse("negative list length")),
        Numeric::Int(v) => {
            usize::try_from(v).map_err(|_| Error::parse("list length too large"))
        }
        Numeric::UInt(v) => {
            usize::try_from(v).map_err(|_| Error::parse("list length too large"))
        }
        Numeric::Float(_) => unreachable!("list length types are integers"),
    }
}

// ===========================================================================
// ===== Stream decoding (owned columns)
// ===========================================================================

/// Decodes all element bodies from a stream into owned columns.
pub(crate) fn read_elements<R: BufRead>(r: &mut R, header: &Header) -> Result<Vec<Element>> {
    header
        .elements
        .iter()
        .map(|def| {
            let columns = read_element_body(r, header.encoding, def)?;
            Ok(Element::from_columns(def.clone(), named(def, columns)))
        })
        .collect()
}

fn read_element_body<R: BufRead>(
    r: &mut R,
    encoding: Encoding,
    def: &ElementDef,
) -> Result<Vec<Column>> {
    match encoding {
        Encoding::Ascii => read_element_ascii(r, def),
        Encoding::BinaryLittleEndian => read_element_binary::<LittleEndian, R>(r, def),
        Encoding::BinaryBigEndian => read_element_binary::<BigEndian, R>(r, def),
    }
}

fn read_element_ascii<R: BufRead>(r: &mut R, def: &ElementDef) -> Result<Vec<Column>> {
    let count = usize_count(def)?;
    let mut columns: Vec<Column> = def
        .properties()
        .iter()
        .map(|p| Column::new_for(p.ty(), count))
        .collect();

    for row in 0..count {
        let line = read_line_any(r)
            .map_err(|e| e.with_element(def.name()).with_row(row as u64))?
            .ok_or_else(|| body_error("early end-of-file", def, row))?;
        let mut tokens = line.split_whitespace();

        for (idx, prop) in def.properties().iter().enumerate() {
            let ctx = |e: Error| {
                e.with_element(def.name())
                    .with_row(row as u64)
                    .with_property(prop.name())
            };
            match prop.ty() {
                PropertyType::Scalar(ty) => {
                    let tok = tokens
                        .next()
                        .ok_or_else(|| ctx(Error::parse("early end-of-line")))?;
                    push_ascii_scalar(&mut columns[idx], ty, tok).map_err(&ctx)?;
                }
                PropertyType::List { len_type, scalar_type } => {
                    let tok = tokens
                        .next()
                        .ok_or_else(|| ctx(Error::parse("early end-of-line")))?;
                    let n = parse_ascii_len(tok, len_type).map_err(&ctx)?;
                    push_ascii_list(&mut columns[idx], scalar_type, n, &mut tokens)
                        .map_err(&ctx)?;
                }
            }
        }

        if tokens.next().is_some() {
            return Err(body_error("expected end-of-line", def, row));
        }
    }

    Ok(columns)
}

fn push_ascii_scalar(col: &mut Column, ty: ScalarType, tok: &str) -> Result<()> {
    for_scalar_type!(ty, T => {
        let v = T::parse_token(tok).ok_or_else(|| Error::parse("malformed input"))?;
        T::scalars_mut(col)
            .expect("column variant matches its property")
            .push(v);
    });
    Ok(())
}

fn parse_ascii_len(tok: &str, len_type: ScalarType) -> Result<usize> {
    let n = for_scalar_type!(len_type, L => {
        L::parse_token(tok)
            .ok_or_else(|| Error::parse("malformed input"))?
            .to_numeric()
    });
    numeric_list_len(n)
}

fn push_ascii_list<'a>(
    col: &mut Column,
    ty: ScalarType,
    n: usize,
    tokens: &mut impl Iterator<Item = &'a str>,
) -> Result<()> {
    for_scalar_type!(ty, T => {
        let mut cell = ListCell::<T>::new();
        for _ in 0..n {
            let tok = tokens
                .next()
                .ok_or_else(|| Error::parse("early end-of-line"))?;
            cell.push(T::parse_token(tok).ok_or_else(|| Error::parse("malformed input"))?);
        }
        T::lists_mut(col)
            .expect("column variant matches its property")
            .push(cell);
    });
    Ok(())
}

fn read_element_binary<E: ByteOrder, R: BufRead>(
    r: &mut R,
    def: &ElementDef,
) -> Result<Vec<Column>> {
    if def.is_fixed_layout() {
        read_element_bulk::<E, R>(r, def)
    } else {
        read_element_ragged::<E, R>(r, def)
    }
}

/// Reads until `buf` is full or the reader is exhausted, returning the
/// number of bytes obtained.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_element_bulk<E: ByteOrder, R: BufRead>(
    r: &mut R,
    def: &ElementDef,
) -> Result<Vec<Column>> {
    let count = usize_count(def)?;
    let row_size = def.row_size().expect("fixed-layout element") as usize;
    let byte_span = count.checked_mul(row_size).ok_or_else(|| {
        Error::parse("element body exceeds this platform's address space")
            .with_element(def.name())
    })?;

    // One logical contiguous read; chunked so the allocation grows with
    // the data actually present instead of with the declared count.
    const CHUNK: usize = 4 << 20;
    let mut buf: Vec<u8> = Vec::new();
    while buf.len() < byte_span {
        let step = (byte_span - buf.len()).min(CHUNK);
        let old = buf.len();
        buf.resize(old + step, 0);
        let got = read_full(r, &mut buf[old..])
            .map_err(|e| Error::from(e).with_element(def.name()))?;
        if got < step {
            let row = if row_size == 0 { 0 } else { (old + got) / row_size };
            return Err(body_error("early end-of-file", def, row));
        }
    }

    let mut columns = Vec::with_capacity(def.properties().len());
    let mut offset = 0;
    for prop in def.properties() {
        let ty = prop.ty().scalar_type();
        let col = for_scalar_type!(ty, T => {
            let mut values = Vec::<T>::with_capacity(count);
            let mut pos = offset;
            for _ in 0..count {
                values.push(T::decode::<E>(&buf[pos..]));
                pos += row_size;
            }
            T::scalar_column(values)
        });
        columns.push(col);
        offset += ty.len().as_usize();
    }
    Ok(columns)
}

fn read_element_ragged<E: ByteOrder, R: BufRead>(
    r: &mut R,
    def: &ElementDef,
) -> Result<Vec<Column>> {
    let count = usize_count(def)?;
    let mut columns: Vec<Column> = def
        .properties()
        .iter()
        .map(|p| Column::new_for(p.ty(), count))
        .collect();

    let mut scratch = [0u8; 8];
    for row in 0..count {
        for (idx, prop) in def.properties().iter().enumerate() {
            let ctx = |e: Error| {
                e.with_element(def.name())
                    .with_row(row as u64)
                    .with_property(prop.name())
            };
            match prop.ty() {
                PropertyType::Scalar(ty) => {
                    read_scalar_into::<E, R>(r, &mut columns[idx], ty, &mut scratch)
                        .map_err(&ctx)?;
                }
                PropertyType::List { len_type, scalar_type } => {
                    let width = len_type.len().as_usize();
                    r.read_exact(&mut scratch[..width])
                        .map_err(|e| ctx(Error::from(e)))?;
                    let n = for_scalar_type!(len_type, L => {
                        L::decode::<E>(&scratch[..]).to_numeric()
                    });
                    let n = numeric_list_len(n).map_err(&ctx)?;
                    read_list_into::<E, R>(r, &mut columns[idx], scalar_type, n, &mut scratch)
                        .map_err(&ctx)?;
                }
            }
        }
    }
    Ok(columns)
}

fn read_scalar_into<E: ByteOrder, R: Read>(
    r: &mut R,
    col: &mut Column,
    ty: ScalarType,
    scratch: &mut [u8; 8],
) -> Result<()> {
    let width = ty.len().as_usize();
    r.read_exact(&mut scratch[..width])?;
    for_scalar_type!(ty, T => {
        T::scalars_mut(col)
            .expect("column variant matches its property")
            .push(T::decode::<E>(&scratch[..]));
    });
    Ok(())
}

fn read_list_into<E: ByteOrder, R: Read>(
    r: &mut R,
    col: &mut Column,
    ty: ScalarType,
    n: usize,
    scratch: &mut [u8; 8],
) -> Result<()> {
    let width = ty.len().as_usize();
    for_scalar_type!(ty, T => {
        let mut cell = ListCell::<T>::new();
        for _ in 0..n {
            r.read_exact(&mut scratch[..width])?;
            cell.push(T::decode::<E>(&scratch[..]));
        }
        T::lists_mut(col)
            .expect("column variant matches its property")
            .push(cell);
    });
    Ok(())
}

// ===========================================================================
// ===== Mapped decoding
// ===========================================================================

pub(crate) enum MapSource {
    Ro(Rc<Mmap>),
    Rw(Rc<RefCell<MmapMut>>),
}

/// Decodes all element bodies of a memory-mapped binary file. Elements
/// that admit mapping become mapped row tables; everything else is decoded
/// into owned columns straight from the mapped bytes.
pub(crate) fn read_elements_mapped(
    src: MapSource,
    header: &Header,
    body_start: usize,
    known: &KnownListLen,
) -> Result<Vec<Element>> {
    match src {
        MapSource::Ro(map) => {
            let bytes: &[u8] = &map;
            read_mapped_inner(bytes, header, body_start, known, &mut |region| {
                TableData::MappedRo { map: Rc::clone(&map), region }
            })
        }
        MapSource::Rw(map) => {
            let guard = map.borrow();
            let bytes: &[u8] = &guard;
            read_mapped_inner(bytes, header, body_start, known, &mut |region| {
                TableData::MappedRw { map: Rc::clone(&map), region }
            })
        }
    }
}

fn read_mapped_inner(
    bytes: &[u8],
    header: &Header,
    body_start: usize,
    known: &KnownListLen,
    make_backing: &mut dyn FnMut(Region) -> TableData,
) -> Result<Vec<Element>> {
    let native = header.encoding == Encoding::binary_native();
    let mut elements = Vec::with_capacity(header.elements.len());
    let mut cursor = body_start;

    for def in &header.elements {
        let region = if native && def.count() > 0 {
            mappable_region(def, known.get(def.name()), cursor)
        } else {
            None
        };

        match region {
            Some(region) => {
                let count = usize_count(def)?;
                let span = count.checked_mul(region.row_size).ok_or_else(|| {
                    Error::parse("element body exceeds this platform's address space")
                        .with_element(def.name())
                })?;
                let end = cursor.checked_add(span).ok_or_else(|| {
                    Error::parse("element body exceeds this platform's address space")
                        .with_element(def.name())
                })?;
                if bytes.len() < end {
                    let available = bytes.len().saturating_sub(cursor);
                    return Err(body_error(
                        "early end-of-file",
                        def,
                        available / region.row_size,
                    ));
                }
                validate_known_lists(bytes, def, &region, count)?;
                elements.push(Element {
                    def: def.clone(),
                    data: make_backing(region.clone()),
                });
                cursor += span;
            }
            None => {
                let mut sub = Cursor::new(&bytes[cursor.min(bytes.len())..]);
                let columns = read_element_body(&mut sub, header.encoding, def)?;
                cursor += sub.position() as usize;
                elements.push(Element::from_columns(def.clone(), named(def, columns)));
            }
        }
    }

    Ok(elements)
}

/// The byte layout of one element, if it can be treated as fixed: no list
/// properties, or a known length for every list property.
fn mappable_region(
    def: &ElementDef,
    known: Option<&HashMap<String, usize>>,
    start: usize,
) -> Option<Region> {
    let mut fields = Vec::with_capacity(def.properties().len());
    let mut offset = 0usize;
    for prop in def.properties() {
        match prop.ty() {
            PropertyType::Scalar(ty) => {
                fields.push(FieldSlot { offset, ty, list: None });
                offset += ty.len().as_usize();
            }
            PropertyType::List { len_type, scalar_type } => {
                let len = *known?.get(prop.name())?;
                offset += len_type.len().as_usize();
                fields.push(FieldSlot {
                    offset,
                    ty: scalar_type,
                    list: Some(KnownList { len_type, len }),
                });
                offset = offset.checked_add(len.checked_mul(scalar_type.len().as_usize())?)?;
            }
        }
    }
    Some(Region { start, row_size: offset, fields })
}

/// Every length prefix of a known-length list must equal the promised
/// length before the region may be exposed as fixed layout.
fn validate_known_lists(
    bytes: &[u8],
    def: &ElementDef,
    region: &Region,
    count: usize,
) -> Result<()> {
    for (idx, prop) in def.properties().iter().enumerate() {
        let slot = region.fields[idx];
        let known = match slot.list {
            Some(k) => k,
            None => continue,
        };
        let len_width = known.len_type.len().as_usize();
        for row in 0..count {
            let pos = region.start + row * region.row_size + slot.offset - len_width;
            let n = for_scalar_type!(known.len_type, L => {
                L::decode::<NativeEndian>(&bytes[pos..]).to_numeric()
            });
            if numeric_list_len(n).ok() != Some(known.len) {
                return Err(body_error("unexpected list length", def, row)
                    .with_property(prop.name()));
            }
        }
    }
    Ok(())
}
