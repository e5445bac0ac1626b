//! Conversions between byte offsets and editor positions.
//!
//! Lines are 0-indexed and columns count UTF-8 bytes within the line, which is
//! what Vim reports for `col('.')` once shifted to 0-based.

use serde::{Deserialize, Serialize};

/// Position in a document (0-indexed line and byte column).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Convert a position to a byte offset, clamping to the line end and to the
/// end of the text.
pub fn position_to_offset(text: &str, pos: Position) -> usize {
    let mut line_start = 0;
    for _ in 0..pos.line {
        match text[line_start..].find('\n') {
            Some(nl) => line_start += nl + 1,
            None => return text.len(),
        }
    }
    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |nl| line_start + nl);
    let mut offset = (line_start + pos.character as usize).min(line_end);
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

/// Convert a byte offset to a position. Offsets past the end map to the end.
pub fn offset_to_position(text: &str, offset: usize) -> Position {
    let offset = offset.min(text.len());
    let before = &text.as_bytes()[..offset];
    let line = before.iter().filter(|&&b| b == b'\n').count();
    let line_start = before
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |nl| nl + 1);
    Position::new(line as u32, (offset - line_start) as u32)
}
