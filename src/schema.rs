//! Property and element schemas: the metadata half of a PLY file.
//!
//! These types describe the layout of element bodies without holding any
//! row data. They are produced by the header parser during a read and can
//! be inspected (or built up) by callers before a write.

use std::fmt;

use crate::{
    error::{Error, Result},
    scalar::{ScalarLen, ScalarType},
};

/// Header keywords; element and property names must not collide with them,
/// or the emitted header would be unparseable.
const KEYWORDS: &[&str] = &[
    "ply",
    "format",
    "comment",
    "obj_info",
    "element",
    "property",
    "end_header",
];

/// Checks that a string is usable as an element or property name.
pub(crate) fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::parse("empty name"));
    }
    for c in name.chars() {
        if !c.is_ascii() {
            return Err(Error::parse(format!("non-ASCII character in name '{}'", name)));
        }
        if c.is_ascii_whitespace() {
            return Err(Error::parse(format!("space character(s) in name '{}'", name)));
        }
        if c.is_ascii_control() {
            return Err(Error::parse(format!("control character in name '{}'", name)));
        }
    }
    if KEYWORDS.contains(&name) {
        return Err(Error::parse(format!("name '{}' is a reserved header keyword", name)));
    }
    Ok(())
}

/// Checks that a string is usable as a comment or obj_info line.
pub(crate) fn check_comment(text: &str) -> Result<()> {
    for c in text.chars() {
        if !c.is_ascii() {
            return Err(Error::parse("non-ASCII character in comment"));
        }
        if c == '\n' || c == '\r' {
            return Err(Error::parse("embedded newline in comment"));
        }
    }
    Ok(())
}

/// The type of one property: a fixed-width scalar, or a length-prefixed
/// list of scalars. Lists cannot nest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Scalar(ScalarType),
    List {
        /// Type of the per-row length prefix. Always an integer type.
        len_type: ScalarType,
        /// Type of the list values.
        scalar_type: ScalarType,
    },
}

impl PropertyType {
    /// Creates a list property type, rejecting float length types.
    pub fn list(len_type: ScalarType, scalar_type: ScalarType) -> Result<Self> {
        if !len_type.is_integer() {
            return Err(Error::parse(format!(
                "list length type must be an integer type, not '{}'",
                len_type,
            )));
        }
        Ok(PropertyType::List { len_type, scalar_type })
    }

    pub fn len_type(&self) -> Option<ScalarType> {
        match self {
            PropertyType::Scalar(_) => None,
            PropertyType::List { len_type, .. } => Some(*len_type),
        }
    }

    /// The value type: the scalar itself, or the type of the list elements.
    pub fn scalar_type(&self) -> ScalarType {
        match *self {
            PropertyType::Scalar(scalar_type) => scalar_type,
            PropertyType::List { scalar_type, .. } => scalar_type,
        }
    }

    pub fn is_list(&self) -> bool {
        self.len_type().is_some()
    }

    /// On-disk size of one cell, if it is the same for every row.
    pub(crate) fn fixed_len(&self) -> Option<ScalarLen> {
        match self {
            PropertyType::Scalar(ty) => Some(ty.len()),
            PropertyType::List { .. } => None,
        }
    }
}

/// The declaration of one property (column) of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDef {
    name: String,
    ty: PropertyType,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, ty: PropertyType) -> Result<Self> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self { name, ty })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> PropertyType {
        self.ty
    }
}

impl fmt::Display for PropertyDef {
    /// The canonical header line, e.g. `property float32 x` or
    /// `property list uint8 int32 vertex_indices`.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.ty {
            PropertyType::Scalar(ty) => write!(f, "property {} {}", ty, self.name),
            PropertyType::List { len_type, scalar_type } => {
                write!(f, "property list {} {} {}", len_type, scalar_type, self.name)
            }
        }
    }
}

/// The declaration of one element: a name, a row count and an ordered list
/// of properties, plus the comments attached to it in the header.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementDef {
    name: String,
    count: u64,
    property_defs: Vec<PropertyDef>,
    comments: Vec<String>,
}

impl ElementDef {
    pub fn new(name: impl Into<String>, count: u64) -> Result<Self> {
        let name = name.into();
        check_name(&name)?;
        Ok(Self {
            name,
            count,
            property_defs: Vec::new(),
            comments: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of rows, as declared in the header.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn properties(&self) -> &[PropertyDef] {
        &self.property_defs
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

    pub(crate) fn push_comment(&mut self, comment: String) {
        self.comments.push(comment);
    }

    /// Appends a property declaration. Property names within an element are
    /// unique.
    pub fn push_property(&mut self, def: PropertyDef) -> Result<()> {
        if self.prop_pos(def.name()).is_some() {
            return Err(Error::parse("two properties with same name"));
        }
        self.property_defs.push(def);
        Ok(())
    }

    pub(crate) fn replace_properties(&mut self, defs: Vec<PropertyDef>) -> Result<()> {
        let mut seen: Vec<&str> = Vec::with_capacity(defs.len());
        for def in &defs {
            if seen.contains(&def.name()) {
                return Err(Error::parse("two properties with same name"));
            }
            seen.push(def.name());
        }
        self.property_defs = defs;
        Ok(())
    }

    /// Position of the named property in declaration order.
    pub fn prop_pos(&self, prop_name: &str) -> Option<usize> {
        self.property_defs.iter().position(|p| p.name() == prop_name)
    }

    pub fn property(&self, prop_name: &str) -> Option<&PropertyDef> {
        self.prop_pos(prop_name).map(|i| &self.property_defs[i])
    }

    /// `true` iff no property is a list property, i.e. every row occupies
    /// the same number of bytes in a binary body.
    pub fn is_fixed_layout(&self) -> bool {
        self.property_defs.iter().all(|p| !p.ty().is_list())
    }

    /// On-disk size of one row in a binary body, or `None` for ragged
    /// elements.
    pub fn row_size(&self) -> Option<u64> {
        self.property_defs
            .iter()
            .map(|p| p.ty().fixed_len().map(|l| l.as_u64()))
            .sum()
    }

    /// Structural equivalence: same name, count and property sequence.
    /// Comments are ignored.
    pub fn same_layout(&self, other: &ElementDef) -> bool {
        self.name == other.name
            && self.count == other.count
            && self.property_defs == other.property_defs
    }
}

impl fmt::Display for ElementDef {
    /// The canonical header block for this element (no trailing newline).
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "element {} {}", self.name, self.count)?;
        for c in &self.comments {
            write!(f, "\ncomment {}", c)?;
        }
        for p in &self.property_defs {
            write!(f, "\n{}", p)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_display() {
        let p = PropertyDef::new("x", PropertyType::Scalar(ScalarType::Float)).unwrap();
        assert_eq!(p.to_string(), "property float32 x");

        let ty = PropertyType::list(ScalarType::UChar, ScalarType::Int).unwrap();
        let p = PropertyDef::new("vertex_indices", ty).unwrap();
        assert_eq!(p.to_string(), "property list uint8 int32 vertex_indices");
    }

    #[test]
    fn float_len_type_rejected() {
        let err = PropertyType::list(ScalarType::Float, ScalarType::Int).unwrap_err();
        assert!(err.message().contains("length type"));
    }

    #[test]
    fn name_validation() {
        assert!(check_name("vertex_indices").is_ok());
        assert!(check_name("a b").is_err());
        assert!(check_name("\u{b0}").is_err());
        assert!(check_name("").is_err());
        assert!(check_name("property").is_err());
    }

    #[test]
    fn element_header_block() {
        let mut el = ElementDef::new("vertex", 4).unwrap();
        el.push_comment("tetrahedron vertices".to_string());
        for name in ["x", "y", "z"] {
            el.push_property(
                PropertyDef::new(name, PropertyType::Scalar(ScalarType::Float)).unwrap(),
            )
            .unwrap();
        }
        assert_eq!(
            el.to_string(),
            "element vertex 4\n\
             comment tetrahedron vertices\n\
             property float32 x\n\
             property float32 y\n\
             property float32 z",
        );
        assert!(el.is_fixed_layout());
        assert_eq!(el.row_size(), Some(12));
    }

    #[test]
    fn duplicate_property() {
        let mut el = ElementDef::new("vertex", 0).unwrap();
        let p = PropertyDef::new("x", PropertyType::Scalar(ScalarType::Float)).unwrap();
        el.push_property(p.clone()).unwrap();
        assert_eq!(
            el.push_property(p).unwrap_err().message(),
            "two properties with same name",
        );
    }

    #[test]
    fn ragged_has_no_row_size() {
        let mut el = ElementDef::new("face", 2).unwrap();
        let ty = PropertyType::list(ScalarType::UChar, ScalarType::Int).unwrap();
        el.push_property(PropertyDef::new("vertex_indices", ty).unwrap()).unwrap();
        assert!(!el.is_fixed_layout());
        assert_eq!(el.row_size(), None);
    }
}
