//! Secret identifier parsing and formatting.
//!
//! Raw references like `myapp/db:password` are split into a path and an
//! optional key on a configurable delimiter. The delimiter is escapable, so
//! delimiter-like bytes can appear literally inside either half. Parsing is
//! total: any input string yields an identifier.

use std::fmt;

/// Splits raw references on an escapable delimiter.
///
/// An escape immediately followed by the delimiter or by another escape
/// yields that character literally; any other escape usage is passed through
/// unchanged. The invariant: `parse(format(id))` reproduces `id` for every
/// identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splitter {
    delimiter: char,
    escape: char,
}

impl Default for Splitter {
    fn default() -> Self {
        Self {
            delimiter: ':',
            escape: '\\',
        }
    }
}

impl Splitter {
    pub fn new(delimiter: char, escape: char) -> Self {
        Self { delimiter, escape }
    }

    /// Split `raw` into segments on unescaped delimiter occurrences.
    pub fn parse(&self, raw: &str) -> SecretIdentifier {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch == self.escape {
                match chars.peek() {
                    Some(&next) if next == self.delimiter || next == self.escape => {
                        current.push(next);
                        chars.next();
                    }
                    // Permissive: a stray escape stays in the segment as-is.
                    _ => current.push(ch),
                }
            } else if ch == self.delimiter {
                segments.push(std::mem::take(&mut current));
            } else {
                current.push(ch);
            }
        }
        segments.push(current);

        SecretIdentifier { segments }
    }

    /// Render an identifier back to raw form, escaping delimiter and escape
    /// characters inside each segment.
    pub fn format(&self, identifier: &SecretIdentifier) -> String {
        let escaped: Vec<String> = identifier
            .segments
            .iter()
            .map(|segment| self.escape_segment(segment))
            .collect();
        escaped.join(&self.delimiter.to_string())
    }

    fn escape_segment(&self, segment: &str) -> String {
        let mut out = String::with_capacity(segment.len());
        for ch in segment.chars() {
            if ch == self.delimiter || ch == self.escape {
                out.push(self.escape);
            }
            out.push(ch);
        }
        out
    }
}

/// A parsed secret reference: a path and an optional key.
///
/// With two or more segments the final segment is the key and the preceding
/// ones, joined by `/`, are the path. A single segment is a bare path with no
/// key — the form used by providers that have no path/key split.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretIdentifier {
    segments: Vec<String>,
}

impl SecretIdentifier {
    /// Wrap a raw reference as a bare path, with no delimiter handling.
    pub fn opaque(raw: impl Into<String>) -> Self {
        Self {
            segments: vec![raw.into()],
        }
    }

    pub fn from_segments(segments: Vec<String>) -> Self {
        if segments.is_empty() {
            return Self::opaque("");
        }
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The path half: every segment but the key, joined by `/`.
    pub fn path(&self) -> String {
        if self.segments.len() == 1 {
            self.segments[0].clone()
        } else {
            self.segments[..self.segments.len() - 1].join("/")
        }
    }

    /// The key half, present only when the raw form contained a delimiter.
    pub fn key(&self) -> Option<&str> {
        if self.segments.len() > 1 {
            self.segments.last().map(String::as_str)
        } else {
            None
        }
    }
}

impl fmt::Display for SecretIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())?;
        if let Some(key) = self.key() {
            write!(f, ":{key}")?;
        }
        Ok(())
    }
}
