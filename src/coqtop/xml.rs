//! Minimal XML tree, writer and incremental reader for the coqtop protocol.
//!
//! Coqtop speaks a small XML dialect with no declarations, no namespaces and
//! no CDATA, so a hand-written reader is enough. The reader works on a
//! buffer prefix and reports `Ok(None)` while an element is still incomplete.

use std::{
    fmt::{self, Write as _},
    str,
};

/// An XML element with attributes and mixed content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attrs.push((key.to_string(), value.into()));
        self
    }

    #[must_use]
    pub fn child(mut self, child: Self) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.children.push(Node::Text(text));
        }
        self
    }

    /// Look up an attribute value.
    pub fn get_attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Child elements, skipping text nodes.
    pub fn elements(&self) -> impl Iterator<Item = &Self> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// The `index`-th child element.
    pub fn nth(&self, index: usize) -> Option<&Self> {
        self.elements().nth(index)
    }

    /// All descendant text concatenated, dropping markup.
    pub fn inner_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.name)?;
        for (key, value) in &self.attrs {
            write!(f, " {key}=\"{}\"", Escaped(value))?;
        }
        if self.children.is_empty() {
            return f.write_str("/>");
        }
        f.write_char('>')?;
        for node in &self.children {
            match node {
                Node::Element(e) => write!(f, "{e}")?,
                Node::Text(t) => write!(f, "{}", Escaped(t))?,
            }
        }
        write!(f, "</{}>", self.name)
    }
}

struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            match c {
                '&' => f.write_str("&amp;")?,
                '<' => f.write_str("&lt;")?,
                '>' => f.write_str("&gt;")?,
                '"' => f.write_str("&quot;")?,
                '\'' => f.write_str("&apos;")?,
                c => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

/// Malformed input that no amount of further data can fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlError {
    pub offset: usize,
    pub message: String,
}

impl fmt::Display for XmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed XML at byte {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for XmlError {}

enum Stop {
    Incomplete,
    Malformed(XmlError),
}

type Step<T> = Result<T, Stop>;

/// Parse one element from the start of `input`.
///
/// Leading whitespace is skipped. Returns the element and the number of
/// bytes consumed, or `Ok(None)` when more input is needed.
pub fn parse_prefix(input: &[u8]) -> Result<Option<(Element, usize)>, XmlError> {
    // A frame may be cut in the middle of a multi-byte character.
    let text = match str::from_utf8(input) {
        Ok(text) => text,
        Err(e) if e.error_len().is_none() => {
            // Only the trailing partial character is invalid.
            str::from_utf8(&input[..e.valid_up_to()]).unwrap_or_default()
        }
        Err(e) => {
            return Err(XmlError {
                offset: e.valid_up_to(),
                message: "invalid UTF-8".to_string(),
            })
        }
    };

    let mut reader = Reader { src: text, pos: 0 };
    reader.skip_ws();
    if reader.pos == text.len() {
        return Ok(None);
    }
    match reader.element() {
        Ok(element) => Ok(Some((element, reader.pos))),
        Err(Stop::Incomplete) => Ok(None),
        Err(Stop::Malformed(e)) => Err(e),
    }
}

/// Parse a complete document holding exactly one element.
pub fn parse(input: &str) -> Result<Element, XmlError> {
    match parse_prefix(input.as_bytes())? {
        Some((element, used)) if input[used..].trim().is_empty() => Ok(element),
        Some((_, used)) => Err(XmlError {
            offset: used,
            message: "trailing data after element".to_string(),
        }),
        None => Err(XmlError {
            offset: input.len(),
            message: "unexpected end of input".to_string(),
        }),
    }
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn malformed<T>(&self, message: impl Into<String>) -> Step<T> {
        Err(Stop::Malformed(XmlError {
            offset: self.pos,
            message: message.into(),
        }))
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn peek(&self) -> Step<char> {
        self.rest().chars().next().ok_or(Stop::Incomplete)
    }

    fn expect(&mut self, c: char) -> Step<()> {
        let found = self.peek()?;
        if found != c {
            return self.malformed(format!("expected '{c}', found '{found}'"));
        }
        self.pos += c.len_utf8();
        Ok(())
    }

    fn name(&mut self) -> Step<String> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
            .ok_or(Stop::Incomplete)?;
        if len == 0 {
            return self.malformed("expected a name");
        }
        let name = rest[..len].to_string();
        self.pos += len;
        Ok(name)
    }

    fn element(&mut self) -> Step<Element> {
        self.expect('<')?;
        let mut element = Element::new(self.name()?);

        loop {
            self.skip_ws();
            match self.peek()? {
                '/' => {
                    self.pos += 1;
                    self.expect('>')?;
                    return Ok(element);
                }
                '>' => {
                    self.pos += 1;
                    break;
                }
                _ => {
                    let (key, value) = self.attribute()?;
                    element.attrs.push((key, value));
                }
            }
        }

        loop {
            let rest = self.rest();
            if rest.is_empty() || rest == "<" {
                return Err(Stop::Incomplete);
            }
            if rest.starts_with("</") {
                self.pos += 2;
                let close = self.name()?;
                if close != element.name {
                    return self.malformed(format!(
                        "closing </{close}> does not match <{}>",
                        element.name
                    ));
                }
                self.skip_ws();
                self.expect('>')?;
                return Ok(element);
            }
            if rest.starts_with('<') {
                let child = self.element()?;
                element.children.push(Node::Element(child));
                continue;
            }
            let len = rest.find('<').ok_or(Stop::Incomplete)?;
            let raw = &rest[..len];
            let text = unescape(raw).map_err(|message| {
                Stop::Malformed(XmlError {
                    offset: self.pos,
                    message,
                })
            })?;
            self.pos += len;
            element.children.push(Node::Text(text));
        }
    }

    fn attribute(&mut self) -> Step<(String, String)> {
        let key = self.name()?;
        self.skip_ws();
        self.expect('=')?;
        self.skip_ws();
        let quote = self.peek()?;
        if quote != '"' && quote != '\'' {
            return self.malformed("attribute value must be quoted");
        }
        self.pos += 1;
        let len = self.rest().find(quote).ok_or(Stop::Incomplete)?;
        let raw = &self.rest()[..len];
        let value = unescape(raw).map_err(|message| {
            Stop::Malformed(XmlError {
                offset: self.pos,
                message,
            })
        })?;
        self.pos += len + 1;
        Ok((key, value))
    }
}

/// Decode entity and character references.
fn unescape(raw: &str) -> Result<String, String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after
            .find(';')
            .ok_or_else(|| format!("unterminated entity in {raw:?}"))?;
        let entity = &after[..semi];
        let decoded = match entity {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            // Coqtop declares nbsp as a plain space.
            "nbsp" => ' ',
            _ => decode_char_ref(entity).ok_or_else(|| format!("unknown entity &{entity};"))?,
        };
        out.push(decoded);
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn decode_char_ref(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = match digits.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => digits.parse().ok()?,
    };
    char::from_u32(code)
}
