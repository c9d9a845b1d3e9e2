//! Parsing and emitting the ASCII header preamble.
//!
//! # Random notes on the format
//!
//! The "specification" talks about carriage-return terminated lines, but
//! nearly every file in the wild ends header lines with `'\n'`. Producers
//! that do emit `'\r'` or `"\r\n"` exist though, so the parser accepts all
//! three terminators (and blank lines, which some producers insert). The
//! emitter always writes `'\n'`.

use std::io::BufRead;

use crate::{
    error::{Error, Result},
    schema::{ElementDef, PropertyDef, PropertyType},
    Encoding,
};

/// The parsed header of a PLY file: the encoding, the container-scoped
/// comments and obj_info lines, and the element declarations in file order.
#[derive(Debug, Clone)]
pub struct Header {
    pub encoding: Encoding,
    pub comments: Vec<String>,
    pub obj_info: Vec<String>,
    pub elements: Vec<ElementDef>,
}

/// Reads one text line, accepting LF, CRLF and CR terminators. Returns
/// `None` at EOF if nothing was read; a final line without a terminator is
/// returned as-is.
pub(crate) fn read_line_any<R: BufRead>(r: &mut R) -> Result<Option<String>> {
    let mut out: Vec<u8> = Vec::new();
    loop {
        let (terminator, used) = {
            let buf = r.fill_buf().map_err(Error::from)?;
            if buf.is_empty() {
                if out.is_empty() {
                    return Ok(None);
                }
                break;
            }
            match buf.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(pos) => {
                    out.extend_from_slice(&buf[..pos]);
                    (Some(buf[pos]), pos + 1)
                }
                None => {
                    out.extend_from_slice(buf);
                    (None, buf.len())
                }
            }
        };
        r.consume(used);

        match terminator {
            Some(b'\r') => {
                // The LF of a CRLF pair belongs to the same terminator.
                let buf = r.fill_buf().map_err(Error::from)?;
                if buf.first() == Some(&b'\n') {
                    r.consume(1);
                }
                break;
            }
            Some(_) => break,
            None => {}
        }
    }

    if !out.is_ascii() {
        return Err(Error::parse("non-ASCII data in text line"));
    }
    let line = String::from_utf8(out).map_err(|_| Error::parse("non-ASCII data in text line"))?;
    Ok(Some(line))
}

impl Header {
    /// Parses the header from `r`, consuming exactly through the
    /// `end_header` line terminator. The body starts at the position `r` is
    /// left at.
    pub fn parse<R: BufRead>(r: &mut R) -> Result<Self> {
        let first = read_line_any(r)?.ok_or_else(|| Error::header("early end-of-file", 1))?;
        if first != "ply" {
            let msg = if first.starts_with("ply") {
                "unexpected characters after 'ply'"
            } else {
                "expected 'ply'"
            };
            return Err(Error::header(msg, 1));
        }

        let mut parser = HeaderParser::new();
        loop {
            let raw = read_line_any(r)?
                .ok_or_else(|| Error::header("early end-of-file", parser.line + 1))?;
            parser.line += 1;

            let line = raw.trim();
            if line.is_empty() {
                // Blank header lines are tolerated on input.
                continue;
            }
            if parser.consume(line)? {
                break;
            }
        }

        if parser.elements.is_empty() {
            return Err(Error::header("empty element list", parser.line));
        }

        Ok(Header {
            // `end_header` is only reachable after a valid format line.
            encoding: parser.encoding.expect("end_header accepted before format"),
            comments: parser.comments,
            obj_info: parser.obj_info,
            elements: parser.elements,
        })
    }

    /// Renders the canonical header, LF-terminated, including the final
    /// `end_header` line.
    pub fn encode(&self) -> String {
        let mut out = String::from("ply\n");
        out.push_str(match self.encoding {
            Encoding::Ascii => "format ascii 1.0\n",
            Encoding::BinaryLittleEndian => "format binary_little_endian 1.0\n",
            Encoding::BinaryBigEndian => "format binary_big_endian 1.0\n",
        });
        for c in &self.comments {
            out.push_str("comment ");
            out.push_str(c);
            out.push('\n');
        }
        for o in &self.obj_info {
            out.push_str("obj_info ");
            out.push_str(o);
            out.push('\n');
        }
        for el in &self.elements {
            out.push_str(&el.to_string());
            out.push('\n');
        }
        out.push_str("end_header\n");
        out
    }
}

/// Keyword state machine for the header body. Which keywords are legal next
/// depends only on what has been seen so far; everything else is an
/// "expected one of {...}" error.
struct HeaderParser {
    encoding: Option<Encoding>,
    comments: Vec<String>,
    obj_info: Vec<String>,
    elements: Vec<ElementDef>,
    line: u64,
    allowed: &'static [&'static str],
}

const BEFORE_FORMAT: &[&str] = &["format", "comment", "obj_info"];
const AFTER_FORMAT: &[&str] = &["element", "comment", "obj_info", "end_header"];
const IN_ELEMENT: &[&str] = &["element", "comment", "property", "end_header"];

impl HeaderParser {
    fn new() -> Self {
        Self {
            encoding: None,
            comments: Vec::new(),
            obj_info: Vec::new(),
            elements: Vec::new(),
            line: 1,
            allowed: BEFORE_FORMAT,
        }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::header(message, self.line)
    }

    /// Parses one non-blank, trimmed header line. Returns `true` once
    /// `end_header` was consumed.
    fn consume(&mut self, line: &str) -> Result<bool> {
        let keyword = match line.split_whitespace().next() {
            Some(k) => k,
            None => return Ok(false),
        };
        if !self.allowed.contains(&keyword) {
            return Err(self.error(format!("expected one of {{{}}}", self.allowed.join(", "))));
        }

        // Everything after the keyword and one separator character. A
        // second leading space is part of the content (comments keep their
        // leading whitespace).
        let rest = &line[keyword.len()..];
        let data = if rest.is_empty() { "" } else { &rest[1..] };

        match keyword {
            "format" => self.parse_format(data)?,
            "comment" => self.parse_comment(data),
            "obj_info" => self.obj_info.push(data.to_string()),
            "element" => self.parse_element(data)?,
            "property" => self.parse_property(data)?,
            "end_header" => {
                if !data.is_empty() {
                    return Err(self.error("unexpected data after 'end_header'"));
                }
                return Ok(true);
            }
            _ => unreachable!("keyword outside the allowed sets"),
        }
        Ok(false)
    }

    fn parse_format(&mut self, data: &str) -> Result<()> {
        let fields: Vec<&str> = data.split_whitespace().collect();
        if fields.len() != 2 {
            return Err(self.error("expected \"format {format} 1.0\""));
        }
        let encoding = match fields[0] {
            "ascii" => Encoding::Ascii,
            "binary_little_endian" => Encoding::BinaryLittleEndian,
            "binary_big_endian" => Encoding::BinaryBigEndian,
            other => return Err(self.error(format!("don't understand format '{}'", other))),
        };
        if fields[1] != "1.0" {
            return Err(self.error("expected version '1.0'"));
        }
        self.encoding = Some(encoding);
        self.allowed = AFTER_FORMAT;
        Ok(())
    }

    fn parse_comment(&mut self, data: &str) {
        match self.elements.last_mut() {
            // Inside an element block the comment attaches to that element.
            Some(el) => el.push_comment(data.to_string()),
            None => self.comments.push(data.to_string()),
        }
    }

    fn parse_element(&mut self, data: &str) -> Result<()> {
        let fields: Vec<&str> = data.split_whitespace().collect();
        if fields.len() != 2 {
            return Err(self.error("expected \"element {name} {count}\""));
        }
        let count: u64 = fields[1]
            .parse()
            .map_err(|_| self.error("expected integer count"))?;
        let def = ElementDef::new(fields[0], count).map_err(|e| e.with_line(self.line))?;
        if self.elements.iter().any(|e| e.name() == def.name()) {
            return Err(self.error("two elements with same name"));
        }
        self.elements.push(def);
        self.allowed = IN_ELEMENT;
        Ok(())
    }

    fn parse_property(&mut self, data: &str) -> Result<()> {
        let line = self.line;
        let fields: Vec<&str> = data.split_whitespace().collect();

        let (name, ty) = if fields.first() == Some(&"list") {
            if fields.len() != 4 {
                return Err(self.error("expected \"property list {len_type} {val_type} {name}\""));
            }
            let len_type = fields[1]
                .parse()
                .map_err(|e| self.error(format!("{}", e)))?;
            let scalar_type = fields[2]
                .parse()
                .map_err(|e| self.error(format!("{}", e)))?;
            let ty = PropertyType::list(len_type, scalar_type).map_err(|e| e.with_line(line))?;
            (fields[3], ty)
        } else {
            if fields.len() != 2 {
                return Err(self.error("expected \"property {type} {name}\""));
            }
            let scalar = fields[0]
                .parse()
                .map_err(|e| self.error(format!("{}", e)))?;
            (fields[1], PropertyType::Scalar(scalar))
        };

        let def = PropertyDef::new(name, ty).map_err(|e| e.with_line(line))?;
        // The allowed-keyword sets guarantee a preceding element line.
        let element = self.elements.last_mut().expect("property outside element block");
        element.push_property(def).map_err(|e| e.with_line(line))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::scalar::ScalarType;

    use super::*;

    fn parse(s: &str) -> Result<Header> {
        Header::parse(&mut Cursor::new(s.as_bytes()))
    }

    const TET_HEADER: &str = "\
        ply\n\
        format ascii 1.0\n\
        comment single tetrahedron with colored faces\n\
        element vertex 4\n\
        comment tetrahedron vertices\n\
        property float x\n\
        property float y\n\
        property float z\n\
        element face 4\n\
        property list uchar int vertex_indices\n\
        end_header\n";

    #[test]
    fn parses_tetrahedron_header() {
        let h = parse(TET_HEADER).unwrap();
        assert_eq!(h.encoding, Encoding::Ascii);
        assert_eq!(h.comments, vec!["single tetrahedron with colored faces"]);
        assert!(h.obj_info.is_empty());
        assert_eq!(h.elements.len(), 2);

        let vertex = &h.elements[0];
        assert_eq!(vertex.name(), "vertex");
        assert_eq!(vertex.count(), 4);
        assert_eq!(vertex.comments(), ["tetrahedron vertices"]);
        assert_eq!(vertex.properties().len(), 3);
        assert_eq!(
            vertex.properties()[0].ty(),
            PropertyType::Scalar(ScalarType::Float),
        );

        let face = &h.elements[1];
        assert_eq!(face.count(), 4);
        assert_eq!(
            face.properties()[0].ty(),
            PropertyType::List {
                len_type: ScalarType::UChar,
                scalar_type: ScalarType::Int,
            },
        );
    }

    #[test]
    fn accepts_crlf_and_cr_terminators() {
        for nl in ["\r\n", "\r"] {
            let s = TET_HEADER.replace('\n', nl);
            let h = parse(&s).unwrap();
            assert_eq!(h.elements.len(), 2);
        }
    }

    #[test]
    fn skips_blank_lines() {
        let s = TET_HEADER.replace("element face", "\n\nelement face");
        assert_eq!(parse(&s).unwrap().elements.len(), 2);
    }

    #[test]
    fn comments_before_format() {
        let h = parse(
            "ply\ncomment banner\nformat ascii 1.0\nelement a 0\nproperty float x\nend_header\n",
        )
        .unwrap();
        assert_eq!(h.comments, vec!["banner"]);
    }

    #[test]
    fn comment_leading_whitespace_preserved() {
        let h = parse(
            "ply\nformat ascii 1.0\ncomment   indented\nelement a 0\nproperty float x\nend_header\n",
        )
        .unwrap();
        assert_eq!(h.comments, vec!["  indented"]);
    }

    #[test]
    fn obj_info_inside_element_block_rejected() {
        let err = parse(
            "ply\nformat ascii 1.0\nelement a 0\nobj_info nope\nend_header\n",
        )
        .unwrap_err();
        assert_eq!(err.line(), Some(4));
        assert!(err.message().starts_with("expected one of"));
    }

    #[test]
    fn line_numbers_in_errors() {
        let cases: &[(&str, u64)] = &[
            ("plyy\n", 1),
            ("ply xxx\n", 1),
            ("ply\nformat\n", 2),
            ("ply\nelement vertex 0\n", 2),
            ("ply\nformat asciii 1.0\n", 2),
            ("ply\nformat ascii 2.0\n", 2),
            ("ply\nformat ascii 1.0\nelement vertex\n", 3),
            ("ply\nformat ascii 1.0\nelement vertex x\n", 3),
            ("ply\nformat ascii 1.0\nelement vertex 0\nproperty float\n", 4),
            ("ply\nformat ascii 1.0\nelement vertex 0\nproperty list float\n", 4),
            ("ply\nformat ascii 1.0\nelement vertex 0\nproperty floatt x\n", 4),
            ("ply\nformat ascii 1.0\nelement vertex 0\nproperty float x y\n", 4),
            ("ply\nformat ascii 1.0\nelement vertex 0\nproperty list ucharr int extra\n", 4),
            ("ply\nformat ascii 1.0\nelement vertex 0\nproperty float x\nend_header xxx\n", 5),
        ];
        for (s, line) in cases {
            let err = parse(s).unwrap_err();
            assert_eq!(err.line(), Some(*line), "input: {:?} -> {}", s, err);
        }
    }

    #[test]
    fn duplicate_element_name() {
        let err = parse(
            "ply\nformat ascii 1.0\nelement a 0\nproperty float x\n\
             element a 0\nproperty float x\nend_header\n",
        )
        .unwrap_err();
        assert_eq!(err.message(), "two elements with same name");
    }

    #[test]
    fn duplicate_property_name() {
        let err = parse(
            "ply\nformat ascii 1.0\nelement a 0\nproperty float x\nproperty int x\nend_header\n",
        )
        .unwrap_err();
        assert_eq!(err.message(), "two properties with same name");
        assert_eq!(err.line(), Some(5));
    }

    #[test]
    fn empty_element_list_rejected() {
        let err = parse("ply\nformat ascii 1.0\nend_header\n").unwrap_err();
        assert_eq!(err.message(), "empty element list");
    }

    #[test]
    fn float_list_length_type_rejected() {
        let err = parse(
            "ply\nformat ascii 1.0\nelement a 0\nproperty list float int x\nend_header\n",
        )
        .unwrap_err();
        assert_eq!(err.line(), Some(4));
        assert!(err.message().contains("length type"));
    }

    #[test]
    fn canonical_encode_round_trip() {
        let h = parse(TET_HEADER).unwrap();
        let encoded = h.encode();
        // Short type spellings come out in their explicit form.
        assert!(encoded.contains("property float32 x\n"));
        assert!(encoded.contains("property list uint8 int32 vertex_indices\n"));
        let again = parse(&encoded).unwrap().encode();
        assert_eq!(encoded, again);
    }
}
