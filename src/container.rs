//! The PLY container: the public read/write facade.

use std::{
    cell::RefCell,
    collections::HashMap,
    fmt,
    fs::{File, OpenOptions},
    io::{BufReader, BufWriter, Cursor, Read, Write},
    path::Path,
    rc::Rc,
};

use memmap2::{Mmap, MmapMut};

use crate::{
    element::Element,
    error::{Error, Result},
    header::Header,
    read::{self, MapSource},
    schema::check_comment,
    write, Encoding,
};

/// Per-element, per-property list lengths promised by the caller, enabling
/// fixed-layout treatment (and hence memory mapping) of elements that
/// would otherwise be ragged.
pub type KnownListLen = HashMap<String, HashMap<String, usize>>;

/// Byte order of binary bodies. `Native` is resolved to the machine's
/// actual order at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
    Native,
}

impl ByteOrder {
    /// Resolves `Native` to the actual order of this machine.
    pub fn resolve(self) -> ByteOrder {
        match self {
            ByteOrder::Native => {
                if cfg!(target_endian = "big") {
                    ByteOrder::Big
                } else {
                    ByteOrder::Little
                }
            }
            other => other,
        }
    }
}

/// Memory-mapping behavior of [`Ply::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MmapMode {
    /// Never map; every element owns its columns.
    #[default]
    Off,
    /// Map eligible elements read-only.
    ReadOnly,
    /// Map eligible elements read-write; cell writes become visible in the
    /// file after a flush. The file is opened with write access.
    ReadWrite,
}

/// Options for [`Ply::open`] (and accepted, but inert, on [`Ply::read`]:
/// a plain stream cannot be mapped, and known list lengths only matter for
/// mapping).
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub memory_map: MmapMode,
    pub known_list_len: KnownListLen,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory_map(mut self, mode: MmapMode) -> Self {
        self.memory_map = mode;
        self
    }

    /// Promises that every row of `element`'s list property `property` has
    /// exactly `len` values. The promise is validated against the length
    /// prefixes before any mapped data is exposed.
    pub fn known_list_len(mut self, element: &str, property: &str, len: usize) -> Self {
        self.known_list_len
            .entry(element.to_string())
            .or_default()
            .insert(property.to_string(), len);
        self
    }
}

/// An in-memory PLY file: format, header metadata and an ordered list of
/// elements with their row tables.
#[derive(Debug, Clone)]
pub struct Ply {
    text: bool,
    byte_order: ByteOrder,
    comments: Vec<String>,
    obj_info: Vec<String>,
    elements: Vec<Element>,
}

fn check_unique(elements: &[Element]) -> Result<()> {
    for (i, el) in elements.iter().enumerate() {
        if elements[..i].iter().any(|other| other.name() == el.name()) {
            return Err(Error::parse("two elements with same name"));
        }
    }
    Ok(())
}

impl Ply {
    /// Creates a container around the given elements. The format defaults
    /// to binary in native byte order; see [`Ply::set_text`] and
    /// [`Ply::set_byte_order`].
    pub fn new(elements: Vec<Element>) -> Result<Self> {
        check_unique(&elements)?;
        Ok(Self {
            text: false,
            byte_order: ByteOrder::Native,
            comments: Vec::new(),
            obj_info: Vec::new(),
            elements,
        })
    }

    /// Reads a PLY file from a plain byte stream. All elements own their
    /// columns; use [`Ply::open`] to allow memory mapping.
    pub fn read<R: Read>(reader: R, _options: ReadOptions) -> Result<Self> {
        let mut r = BufReader::new(reader);
        let header = Header::parse(&mut r)?;
        let elements = read::read_elements(&mut r, &header)?;
        Ok(Self::assemble(header, elements))
    }

    /// Opens a PLY file from a path. With memory mapping enabled, binary
    /// elements whose layout is fixed (or covered by
    /// [`ReadOptions::known_list_len`]) and whose byte order matches the
    /// machine are exposed as views into the mapping instead of copies.
    /// Sources that cannot be mapped silently fall back to a plain read.
    pub fn open<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Self> {
        let path = path.as_ref();
        match options.memory_map {
            MmapMode::Off => Self::read(File::open(path)?, options),
            MmapMode::ReadOnly => {
                let file = File::open(path)?;
                match unsafe { Mmap::map(&file) } {
                    Ok(map) => Self::from_map(MapSource::Ro(Rc::new(map)), &options),
                    Err(_) => Self::read(file, options),
                }
            }
            MmapMode::ReadWrite => {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                match unsafe { MmapMut::map_mut(&file) } {
                    Ok(map) => {
                        Self::from_map(MapSource::Rw(Rc::new(RefCell::new(map))), &options)
                    }
                    Err(_) => Self::read(file, options),
                }
            }
        }
    }

    fn from_map(src: MapSource, options: &ReadOptions) -> Result<Self> {
        fn parse_from(bytes: &[u8]) -> Result<(Header, usize)> {
            let mut cursor = Cursor::new(bytes);
            let header = Header::parse(&mut cursor)?;
            Ok((header, cursor.position() as usize))
        }

        let (header, body_start) = match &src {
            MapSource::Ro(map) => parse_from(map)?,
            MapSource::Rw(map) => parse_from(&map.borrow())?,
        };

        if header.encoding == Encoding::Ascii {
            // An ASCII body gains nothing from staying mapped; decode it
            // from the mapped bytes into owned columns.
            let elements = match &src {
                MapSource::Ro(map) => {
                    read::read_elements(&mut Cursor::new(&map[body_start..]), &header)?
                }
                MapSource::Rw(map) => {
                    let guard = map.borrow();
                    read::read_elements(&mut Cursor::new(&guard[body_start..]), &header)?
                }
            };
            return Ok(Self::assemble(header, elements));
        }

        let elements =
            read::read_elements_mapped(src, &header, body_start, &options.known_list_len)?;
        Ok(Self::assemble(header, elements))
    }

    fn assemble(header: Header, elements: Vec<Element>) -> Self {
        let (text, byte_order) = match header.encoding {
            Encoding::Ascii => (true, ByteOrder::Native),
            Encoding::BinaryLittleEndian => (false, ByteOrder::Little),
            Encoding::BinaryBigEndian => (false, ByteOrder::Big),
        };
        Self {
            text,
            byte_order,
            comments: header.comments,
            obj_info: header.obj_info,
            elements,
        }
    }

    /// Writes the file, header first, then all element bodies in container
    /// order. A failed write may leave the sink with a truncated file.
    pub fn write<W: Write>(&self, mut sink: W) -> Result<()> {
        write::write_ply(&mut sink, self)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        write::write_ply(&mut w, self)?;
        w.flush()?;
        Ok(())
    }

    /// The format this container will be written in.
    pub fn encoding(&self) -> Encoding {
        if self.text {
            Encoding::Ascii
        } else {
            match self.byte_order.resolve() {
                ByteOrder::Little => Encoding::BinaryLittleEndian,
                ByteOrder::Big => Encoding::BinaryBigEndian,
                ByteOrder::Native => unreachable!("resolve() never returns Native"),
            }
        }
    }

    pub fn set_encoding(&mut self, encoding: Encoding) {
        match encoding {
            Encoding::Ascii => self.text = true,
            Encoding::BinaryLittleEndian => {
                self.text = false;
                self.byte_order = ByteOrder::Little;
            }
            Encoding::BinaryBigEndian => {
                self.text = false;
                self.byte_order = ByteOrder::Big;
            }
        }
    }

    pub fn text(&self) -> bool {
        self.text
    }

    pub fn set_text(&mut self, text: bool) {
        self.text = text;
    }

    /// The configured byte order. Only meaningful when the format is
    /// binary; `Native` is resolved at write time.
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn set_byte_order(&mut self, byte_order: ByteOrder) {
        self.byte_order = byte_order;
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    pub fn set_comments(&mut self, comments: Vec<String>) -> Result<()> {
        for c in &comments {
            check_comment(c)?;
        }
        self.comments = comments;
        Ok(())
    }

    pub fn obj_info(&self) -> &[String] {
        &self.obj_info
    }

    pub fn set_obj_info(&mut self, obj_info: Vec<String>) -> Result<()> {
        for c in &obj_info {
            check_comment(c)?;
        }
        self.obj_info = obj_info;
        Ok(())
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Replaces the element list, e.g. to reorder elements or move one
    /// between containers. Element names must stay unique.
    pub fn set_elements(&mut self, elements: Vec<Element>) -> Result<()> {
        check_unique(&elements)?;
        self.elements = elements;
        Ok(())
    }

    pub fn push_element(&mut self, element: Element) -> Result<()> {
        if self.contains(element.name()) {
            return Err(Error::parse("two elements with same name"));
        }
        self.elements.push(element);
        Ok(())
    }

    pub fn element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.name() == name)
    }

    pub fn element_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| e.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.element(name).is_some()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.elements.iter()
    }

    /// Flushes every read-write mapped element to disk.
    pub fn flush(&self) -> Result<()> {
        for element in &self.elements {
            element.flush()?;
        }
        Ok(())
    }

    fn header_view(&self) -> Header {
        Header {
            encoding: self.encoding(),
            comments: self.comments.clone(),
            obj_info: self.obj_info.clone(),
            elements: self.elements.iter().map(|e| e.def().clone()).collect(),
        }
    }

    pub(crate) fn make_header(&self) -> Result<Header> {
        if self.elements.is_empty() {
            return Err(Error::parse("empty element list"));
        }
        Ok(self.header_view())
    }

    /// The canonical header text, without a trailing newline.
    pub fn header(&self) -> String {
        let encoded = self.header_view().encode();
        encoded.trim_end_matches('\n').to_string()
    }
}

impl fmt::Display for Ply {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.header())
    }
}

impl<'a> IntoIterator for &'a Ply {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use crate::table::Column;

    use super::*;

    fn sample() -> Ply {
        let el = Element::describe("vertex", vec![("x", Column::from(vec![0.0f32, 1.0]))])
            .unwrap();
        Ply::new(vec![el]).unwrap()
    }

    #[test]
    fn lookup_and_iteration() {
        let ply = sample();
        assert_eq!(ply.len(), 1);
        assert!(ply.contains("vertex"));
        assert!(!ply.contains("face"));
        assert_eq!(ply.element("vertex").unwrap().len(), 2);
        assert_eq!(ply.iter().count(), 1);
        assert_eq!((&ply).into_iter().count(), 1);
    }

    #[test]
    fn encoding_is_orthogonal_text_and_order() {
        let mut ply = sample();
        assert!(!ply.text());
        ply.set_text(true);
        assert_eq!(ply.encoding(), Encoding::Ascii);
        ply.set_text(false);
        ply.set_byte_order(ByteOrder::Big);
        assert_eq!(ply.encoding(), Encoding::BinaryBigEndian);
        ply.set_encoding(Encoding::BinaryLittleEndian);
        assert_eq!(ply.byte_order(), ByteOrder::Little);
        assert_eq!(ByteOrder::Native.resolve(), if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        });
    }

    #[test]
    fn duplicate_elements_rejected() {
        let a = Element::describe("a", vec![("x", Column::from(vec![0u8]))]).unwrap();
        let b = Element::describe("a", vec![("y", Column::from(vec![0u8]))]).unwrap();
        let err = Ply::new(vec![a.clone(), b]).unwrap_err();
        assert_eq!(err.message(), "two elements with same name");

        let mut ply = Ply::new(vec![a.clone()]).unwrap();
        assert!(ply.push_element(a).is_err());
    }

    #[test]
    fn header_string() {
        let mut ply = sample();
        ply.set_text(true);
        ply.set_comments(vec!["made by hand".to_string()]).unwrap();
        ply.set_obj_info(vec!["key value".to_string()]).unwrap();
        assert_eq!(
            ply.header(),
            "ply\n\
             format ascii 1.0\n\
             comment made by hand\n\
             obj_info key value\n\
             element vertex 2\n\
             property float32 x\n\
             end_header",
        );
        assert_eq!(ply.to_string(), ply.header());
    }

    #[test]
    fn comment_validation() {
        let mut ply = sample();
        assert!(ply.set_comments(vec!["ok".into()]).is_ok());
        assert!(ply.set_comments(vec!["bad\nnewline".into()]).is_err());
        assert!(ply.set_obj_info(vec!["bad\u{e9}".into()]).is_err());
    }
}
