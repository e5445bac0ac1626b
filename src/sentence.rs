//! Sentence boundary detection for Coq documents.
//!
//! A sentence ends with a dot or an ellipsis followed by whitespace (or the
//! end of the text). Bullets (`-`, `+`, `*` runs) and single braces are
//! sentences of their own when they open a sentence. Terminators inside
//! nested `(* *)` comments and `"…"` strings are ignored.

use std::{fmt, ops::Range};

/// Why the splitter could not find a boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    UnterminatedComment { start: usize },
    UnterminatedString { start: usize },
}

impl SplitError {
    pub const fn offset(&self) -> usize {
        match self {
            Self::UnterminatedComment { start } | Self::UnterminatedString { start } => *start,
        }
    }
}

impl fmt::Display for SplitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnterminatedComment { start } => {
                write!(f, "comment opened at offset {start} is never closed")
            }
            Self::UnterminatedString { start } => {
                write!(f, "string opened at offset {start} is never closed")
            }
        }
    }
}

/// Find the next sentence starting at or after `from`.
///
/// Leading whitespace and comments are not part of the sentence. Returns
/// `Ok(None)` when nothing but whitespace and comments remain, or when the
/// remaining text has no terminator yet.
pub fn next_sentence(text: &str, from: usize) -> Result<Option<Range<usize>>, SplitError> {
    let bytes = text.as_bytes();
    let Some(start) = skip_blank(bytes, from)? else {
        return Ok(None);
    };

    match bytes[start] {
        bullet @ (b'-' | b'+' | b'*') => {
            let end = bytes[start..]
                .iter()
                .position(|&b| b != bullet)
                .map_or(bytes.len(), |n| start + n);
            return Ok(Some(start..end));
        }
        b'{' | b'}' => return Ok(Some(start..start + 1)),
        _ => {}
    }

    let mut pos = start;
    while pos < bytes.len() {
        match bytes[pos] {
            b'(' if bytes.get(pos + 1) == Some(&b'*') => pos = skip_comment(bytes, pos)?,
            b'"' => pos = skip_string(bytes, pos)?,
            b'.' => {
                let dots = bytes[pos..].iter().take_while(|&&b| b == b'.').count();
                let after = pos + dots;
                if (dots == 1 || dots == 3) && is_boundary(bytes, after) {
                    return Ok(Some(start..after));
                }
                pos = after;
            }
            _ => pos += 1,
        }
    }
    Ok(None)
}

/// Split the whole text, stopping at the first position without a complete
/// sentence.
pub fn split_all(text: &str) -> Result<Vec<Range<usize>>, SplitError> {
    let mut spans = Vec::new();
    let mut from = 0;
    while let Some(span) = next_sentence(text, from)? {
        from = span.end;
        spans.push(span);
    }
    Ok(spans)
}

/// Whether the text after `from` holds only whitespace and comments.
pub fn is_blank(text: &str, from: usize) -> Result<bool, SplitError> {
    Ok(skip_blank(text.as_bytes(), from)?.is_none())
}

fn is_boundary(bytes: &[u8], pos: usize) -> bool {
    bytes.get(pos).is_none_or(u8::is_ascii_whitespace)
}

/// Skip whitespace and comments, returning the first significant offset.
fn skip_blank(bytes: &[u8], mut pos: usize) -> Result<Option<usize>, SplitError> {
    loop {
        while bytes.get(pos).is_some_and(u8::is_ascii_whitespace) {
            pos += 1;
        }
        if pos >= bytes.len() {
            return Ok(None);
        }
        if bytes[pos] == b'(' && bytes.get(pos + 1) == Some(&b'*') {
            pos = skip_comment(bytes, pos)?;
        } else {
            return Ok(Some(pos));
        }
    }
}

/// Skip a (possibly nested) comment opening at `start`; returns the offset
/// just past its closing `*)`.
fn skip_comment(bytes: &[u8], start: usize) -> Result<usize, SplitError> {
    let mut depth = 0usize;
    let mut pos = start;
    while pos + 1 < bytes.len() {
        match (bytes[pos], bytes[pos + 1]) {
            (b'(', b'*') => {
                depth += 1;
                pos += 2;
            }
            (b'*', b')') => {
                depth -= 1;
                pos += 2;
                if depth == 0 {
                    return Ok(pos);
                }
            }
            _ => pos += 1,
        }
    }
    Err(SplitError::UnterminatedComment { start })
}

/// Skip a string literal opening at `start`. Coq escapes quotes by doubling
/// them, which this treats as two adjacent strings.
fn skip_string(bytes: &[u8], start: usize) -> Result<usize, SplitError> {
    bytes[start + 1..]
        .iter()
        .position(|&b| b == b'"')
        .map(|n| start + 1 + n + 1)
        .ok_or(SplitError::UnterminatedString { start })
}
