//! Placeholder parsing for `{{ binding.path[0].field }}` templates
//!
//! A placeholder is an identifier followed by any number of accessors:
//! - `.identifier` (object key, or array index when all digits)
//! - `[index]` (array index)
//! - `["key"]` / `['key']` (object key containing arbitrary characters)
//!
//! Strings are split into literal text and placeholders by [`Template::parse`];
//! each placeholder body is handled by a small recursive-descent parser.

use std::fmt;

use serde_json::Value;

/// Errors in placeholder syntax
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaceholderError {
    #[error("empty placeholder '{0}'")]
    Empty(String),

    #[error("expected identifier at offset {offset} in '{expression}'")]
    ExpectedIdentifier { expression: String, offset: usize },

    #[error("unexpected character '{found}' at offset {offset} in '{expression}'")]
    UnexpectedChar {
        expression: String,
        found: char,
        offset: usize,
    },

    #[error("unterminated bracket accessor in '{0}'")]
    UnterminatedBracket(String),

    #[error("unterminated quoted key in '{0}'")]
    UnterminatedQuote(String),

    #[error("invalid index '{index}' in '{expression}'")]
    InvalidIndex { expression: String, index: String },
}

/// One accessor in a placeholder path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{}", key),
            Segment::Index(index) => write!(f, "[{}]", index),
        }
    }
}

/// Parsed placeholder body: root binding plus accessors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderPath {
    pub root: String,
    pub segments: Vec<Segment>,
}

impl PlaceholderPath {
    pub fn parse(expression: &str) -> Result<Self, PlaceholderError> {
        PathParser::new(expression).parse()
    }
}

/// A placeholder occurrence inside a string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Exact source text including the braces, e.g. `{{ step1.output }}`
    pub source: String,
    pub path: PlaceholderPath,
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    Literal(String),
    Placeholder(Placeholder),
}

/// A string split into literal text and placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<TemplatePart>,
}

impl Template {
    pub fn parse(input: &str) -> Result<Self, PlaceholderError> {
        let mut parts = Vec::new();
        let mut rest = input;

        while let Some(open) = rest.find("{{") {
            let after_open = &rest[open + 2..];
            // Unterminated `{{` is literal text
            let Some(close) = after_open.find("}}") else {
                break;
            };

            if open > 0 {
                parts.push(TemplatePart::Literal(rest[..open].to_string()));
            }

            let body = &after_open[..close];
            let source = &rest[open..open + 2 + close + 2];
            if body.trim().is_empty() {
                return Err(PlaceholderError::Empty(source.to_string()));
            }

            parts.push(TemplatePart::Placeholder(Placeholder {
                source: source.to_string(),
                path: PlaceholderPath::parse(body)?,
            }));
            rest = &after_open[close + 2..];
        }

        if !rest.is_empty() {
            parts.push(TemplatePart::Literal(rest.to_string()));
        }

        Ok(Self { parts })
    }

    pub fn parts(&self) -> &[TemplatePart] {
        &self.parts
    }

    /// The placeholder when the whole string is exactly one placeholder
    pub fn as_single_placeholder(&self) -> Option<&Placeholder> {
        match self.parts.as_slice() {
            [TemplatePart::Placeholder(p)] => Some(p),
            _ => None,
        }
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.parts.iter().filter_map(|part| match part {
            TemplatePart::Placeholder(p) => Some(p),
            TemplatePart::Literal(_) => None,
        })
    }

    pub fn has_placeholders(&self) -> bool {
        self.placeholders().next().is_some()
    }
}

/// Collect every placeholder in an input tree (object keys are not templated)
pub fn scan(value: &Value) -> Result<Vec<Placeholder>, PlaceholderError> {
    let mut found = Vec::new();
    scan_into(value, &mut found)?;
    Ok(found)
}

fn scan_into(value: &Value, found: &mut Vec<Placeholder>) -> Result<(), PlaceholderError> {
    match value {
        Value::String(s) if s.contains("{{") => {
            found.extend(Template::parse(s)?.placeholders().cloned());
        }
        Value::Array(items) => {
            for item in items {
                scan_into(item, found)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                scan_into(item, found)?;
            }
        }
        _ => {}
    }
    Ok(())
}

// ============================================================================
// Recursive-descent path parser
// ============================================================================

struct PathParser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PathParser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    // path := ws identifier (ws accessor)* ws
    fn parse(mut self) -> Result<PlaceholderPath, PlaceholderError> {
        self.skip_ws();
        let root = self.identifier()?;
        let mut segments = Vec::new();

        loop {
            self.skip_ws();
            match self.peek() {
                None => break,
                Some(b'.') => {
                    self.pos += 1;
                    self.skip_ws();
                    segments.push(self.dot_accessor()?);
                }
                Some(b'[') => {
                    self.pos += 1;
                    segments.push(self.bracket_accessor()?);
                }
                Some(_) => return Err(self.unexpected()),
            }
        }

        Ok(PlaceholderPath { root, segments })
    }

    // dot_accessor := digits | identifier
    fn dot_accessor(&mut self) -> Result<Segment, PlaceholderError> {
        match self.peek() {
            Some(b) if b.is_ascii_digit() => self.index(),
            _ => self.identifier().map(Segment::Key),
        }
    }

    // bracket_accessor := ws (digits | quoted) ws ']'
    fn bracket_accessor(&mut self) -> Result<Segment, PlaceholderError> {
        self.skip_ws();
        let segment = match self.peek() {
            None => return Err(PlaceholderError::UnterminatedBracket(self.src.to_string())),
            Some(quote @ (b'"' | b'\'')) => self.quoted(quote)?,
            Some(b) if b.is_ascii_digit() => self.index()?,
            Some(b'-') => {
                let start = self.pos;
                self.pos += 1;
                while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
                    self.pos += 1;
                }
                return Err(PlaceholderError::InvalidIndex {
                    expression: self.src.to_string(),
                    index: self.src[start..self.pos].to_string(),
                });
            }
            Some(_) => return Err(self.unexpected()),
        };

        self.skip_ws();
        match self.peek() {
            Some(b']') => {
                self.pos += 1;
                Ok(segment)
            }
            None => Err(PlaceholderError::UnterminatedBracket(self.src.to_string())),
            Some(_) => Err(self.unexpected()),
        }
    }

    fn quoted(&mut self, quote: u8) -> Result<Segment, PlaceholderError> {
        self.pos += 1;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == quote {
                let key = self.src[start..self.pos].to_string();
                self.pos += 1;
                return Ok(Segment::Key(key));
            }
            self.pos += 1;
        }
        Err(PlaceholderError::UnterminatedQuote(self.src.to_string()))
    }

    fn index(&mut self) -> Result<Segment, PlaceholderError> {
        let start = self.pos;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits = &self.src[start..self.pos];
        digits
            .parse::<usize>()
            .map(Segment::Index)
            .map_err(|_| PlaceholderError::InvalidIndex {
                expression: self.src.to_string(),
                index: digits.to_string(),
            })
    }

    // identifier := [A-Za-z_$] [A-Za-z0-9_$-]*
    fn identifier(&mut self) -> Result<String, PlaceholderError> {
        let start = self.pos;
        match self.peek() {
            Some(b) if b.is_ascii_alphabetic() || b == b'_' || b == b'$' => self.pos += 1,
            _ => {
                return Err(PlaceholderError::ExpectedIdentifier {
                    expression: self.src.to_string(),
                    offset: self.pos,
                })
            }
        }
        while matches!(self.peek(), Some(b) if b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b == b'-')
        {
            self.pos += 1;
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn unexpected(&self) -> PlaceholderError {
        let found = self.src[self.pos..].chars().next().unwrap_or('?');
        PlaceholderError::UnexpectedChar {
            expression: self.src.to_string(),
            found,
            offset: self.pos,
        }
    }
}
