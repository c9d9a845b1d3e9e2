//! Reading and writing PLY files as typed, columnar tables.
//!
//! PLY is a flat, header-described tabular format with three encodings:
//! ASCII, binary little-endian and binary big-endian. A file declares a
//! sequence of *elements* (named tables), each with an ordered set of
//! *properties* (columns) that are either fixed-width scalars or
//! length-prefixed lists of scalars. This crate treats PLY as exactly
//! that: a generic tabular format. Names like `vertex` and `face` carry
//! no special meaning here.
//!
//! # Reading and writing
//!
//! [`Ply::read`] decodes a whole file from any [`std::io::Read`];
//! [`Ply::open`] does the same from a path and can additionally
//! memory-map eligible element bodies (see below). [`Ply::write`] emits
//! the canonical form of the container: LF line endings, explicit type
//! spellings like `float32`, comments in canonical placement.
//!
//! ```no_run
//! use plytable::{Ply, ReadOptions};
//!
//! let ply = Ply::open("mesh.ply", ReadOptions::new())?;
//! let vertex = ply.element("vertex").unwrap();
//! let xs = vertex.column("x")?;
//! println!("{} vertices, first x = {:?}", vertex.len(), xs.value_at(0));
//! # Ok::<(), plytable::Error>(())
//! ```
//!
//! Containers can also be built in memory and written out:
//!
//! ```
//! use plytable::{Column, Element, Ply};
//!
//! let vertex = Element::describe(
//!     "vertex",
//!     vec![
//!         ("x", vec![0.0f32, 1.0, 0.0]),
//!         ("y", vec![0.0f32, 0.0, 1.0]),
//!     ],
//! )?;
//! let mut ply = Ply::new(vec![vertex])?;
//! ply.set_text(true);
//! let mut out = Vec::new();
//! ply.write(&mut out)?;
//! # Ok::<(), plytable::Error>(())
//! ```
//!
//! # Memory mapping
//!
//! Memory mapping is an optimization, not a contract. A binary element
//! qualifies when its layout is fixed (no list properties), or when the
//! caller promises a constant length for every list property via
//! [`ReadOptions::known_list_len`] (the promise is validated against every
//! length prefix before any data is exposed), and the file's byte order
//! matches the machine's. Everything else falls back to owned columns,
//! silently. Mapped row tables keep the mapping alive even if they are
//! moved out of their container.
//!
//! ### Links:
//! - ["Specification"](http://paulbourke.net/dataformats/ply/)
//! - [Wikipedia](https://en.wikipedia.org/wiki/PLY_(file_format))

mod container;
mod element;
mod error;
mod header;
mod read;
mod scalar;
mod schema;
mod table;
mod write;

pub use self::{
    container::{ByteOrder, KnownListLen, MmapMode, Ply, ReadOptions},
    element::{Backing, Element, Row},
    error::{Error, Result},
    header::Header,
    scalar::{ListCell, Primitive, ScalarLen, ScalarType, ScalarTypeParseError},
    schema::{ElementDef, PropertyDef, PropertyType},
    table::{Column, ColumnScalar, Value},
};

// ----------------------------------------------------------------------------

/// The encoding of a PLY file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// Everything is stored as ASCII text. Space-inefficient, but
    /// greppable.
    Ascii,

    /// Binary encoding with all numeric types in big endian layout. The
    /// header is still ASCII.
    BinaryBigEndian,

    /// Binary encoding with all numeric types in little endian layout.
    /// The header is still ASCII.
    BinaryLittleEndian,
}

impl Encoding {
    /// Returns the binary encoding with native endianness (little endian
    /// on x86).
    pub fn binary_native() -> Self {
        if cfg!(target_endian = "big") {
            Encoding::BinaryBigEndian
        } else {
            Encoding::BinaryLittleEndian
        }
    }
}
