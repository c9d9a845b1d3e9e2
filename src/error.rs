//! The error type used by the whole crate.

use std::io;

use thiserror::Error;

/// Convenience alias used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error emitted by every fallible operation in this crate.
///
/// There is only one kind of error; the payload says where things went
/// wrong. Header errors always carry a line number. Body errors carry the
/// element that was being parsed and usually the row index within it and
/// the offending property. I/O failures keep the underlying `io::Error` as
/// their source.
#[derive(Debug, Error)]
#[error("{}", render(.message, .element, .row, .property, .line))]
pub struct Error {
    message: String,
    element: Option<String>,
    row: Option<u64>,
    property: Option<String>,
    line: Option<u64>,
    #[source]
    source: Option<io::Error>,
}

impl Error {
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            element: None,
            row: None,
            property: None,
            line: None,
            source: None,
        }
    }

    pub(crate) fn header(message: impl Into<String>, line: u64) -> Self {
        Self::parse(message).with_line(line)
    }

    /// Attaches the element name, unless one is already present. The
    /// innermost context wins, so deeper layers can set precise context and
    /// outer layers only fill the gaps.
    pub(crate) fn with_element(mut self, element: &str) -> Self {
        if self.element.is_none() {
            self.element = Some(element.to_string());
        }
        self
    }

    pub(crate) fn with_row(mut self, row: u64) -> Self {
        if self.row.is_none() {
            self.row = Some(row);
        }
        self
    }

    pub(crate) fn with_property(mut self, property: &str) -> Self {
        if self.property.is_none() {
            self.property = Some(property.to_string());
        }
        self
    }

    pub(crate) fn with_line(mut self, line: u64) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    /// The bare message, without the context prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Name of the element that was being read or written, if any.
    pub fn element(&self) -> Option<&str> {
        self.element.as_deref()
    }

    /// Row index within the element, if the error is row-scoped.
    pub fn row(&self) -> Option<u64> {
        self.row
    }

    /// Name of the offending property, if the error is property-scoped.
    pub fn property(&self) -> Option<&str> {
        self.property.as_deref()
    }

    /// Header line number (1-based, counting the `ply` line as line 1).
    pub fn line(&self) -> Option<u64> {
        self.line
    }
}

impl From<io::Error> for Error {
    fn from(src: io::Error) -> Self {
        let message = if src.kind() == io::ErrorKind::UnexpectedEof {
            "early end-of-file".to_string()
        } else {
            format!("I/O error: {}", src)
        };

        Self {
            message,
            element: None,
            row: None,
            property: None,
            line: None,
            source: Some(src),
        }
    }
}

fn render(
    message: &str,
    element: &Option<String>,
    row: &Option<u64>,
    property: &Option<String>,
    line: &Option<u64>,
) -> String {
    let mut out = String::new();
    if let Some(line) = line {
        out.push_str(&format!("line {}: ", line));
    }
    if let Some(element) = element {
        out.push_str(&format!("element '{}': ", element));
    }
    if let Some(row) = row {
        out.push_str(&format!("row {}: ", row));
    }
    if let Some(property) = property {
        out.push_str(&format!("property '{}': ", property));
    }
    out.push_str(message);
    out
}
