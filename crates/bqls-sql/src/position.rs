//! Line/character positions and byte offsets
//!
//! Lines are split on `\n` only. A `\r` before the separator stays part of
//! the line, so offsets computed here always index the original bytes.
//! `character` is a byte count within the line.

/// A zero-based line/character position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Position mapping errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("line {line} is out of range (document has {lines} lines)")]
    LineOutOfRange { line: u32, lines: usize },
}

/// Convert a position to a byte offset
///
/// Fails when the line does not exist. The character is added as-is, so a
/// character past the end of its line yields an offset inside the next line.
pub fn position_to_byte_offset(text: &str, position: Position) -> Result<usize, PositionError> {
    let mut offset = 0;
    let mut lines = text.split('\n');

    for _ in 0..position.line {
        match lines.next() {
            Some(line) => offset += line.len() + 1,
            None => {
                return Err(PositionError::LineOutOfRange {
                    line: position.line,
                    lines: text.split('\n').count(),
                })
            }
        }
    }

    // The target line itself must exist as well
    if lines.next().is_none() {
        return Err(PositionError::LineOutOfRange {
            line: position.line,
            lines: text.split('\n').count(),
        });
    }

    Ok(offset + position.character as usize)
}

/// Convert a byte offset to a position
///
/// An offset sitting right after a `\n` maps to character 0 of the next
/// line. Returns `None` when the offset lies past the end of the text.
pub fn byte_offset_to_position(text: &str, offset: usize) -> Option<Position> {
    let mut remaining = offset;

    for (line, content) in text.split('\n').enumerate() {
        if remaining < content.len() + 1 {
            return Some(Position::new(line as u32, remaining as u32));
        }
        remaining -= content.len() + 1;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQL: &str = "SELECT id\nFROM users\nWHERE id > 1";

    #[test]
    fn position_to_offset() {
        assert_eq!(position_to_byte_offset(SQL, Position::new(0, 0)), Ok(0));
        assert_eq!(position_to_byte_offset(SQL, Position::new(0, 7)), Ok(7));
        assert_eq!(position_to_byte_offset(SQL, Position::new(1, 5)), Ok(15));
        assert_eq!(position_to_byte_offset(SQL, Position::new(2, 6)), Ok(27));
    }

    #[test]
    fn line_out_of_range_fails() {
        assert_eq!(
            position_to_byte_offset(SQL, Position::new(3, 0)),
            Err(PositionError::LineOutOfRange { line: 3, lines: 3 })
        );
    }

    #[test]
    fn empty_text() {
        assert_eq!(position_to_byte_offset("", Position::new(0, 0)), Ok(0));
        assert!(position_to_byte_offset("", Position::new(1, 0)).is_err());
        assert_eq!(byte_offset_to_position("", 0), Some(Position::new(0, 0)));
        assert_eq!(byte_offset_to_position("", 1), None);
    }

    #[test]
    fn offset_to_position() {
        assert_eq!(byte_offset_to_position(SQL, 7), Some(Position::new(0, 7)));
        // Just past the last character of the first line
        assert_eq!(byte_offset_to_position(SQL, 9), Some(Position::new(0, 9)));
        // Line boundary resolves to the start of the next line
        assert_eq!(byte_offset_to_position(SQL, 10), Some(Position::new(1, 0)));
        assert_eq!(byte_offset_to_position(SQL, SQL.len()), Some(Position::new(2, 12)));
        assert_eq!(byte_offset_to_position(SQL, SQL.len() + 1), None);
    }

    #[test]
    fn crlf_keeps_carriage_return_in_line() {
        let text = "SELECT 1\r\nFROM t";
        assert_eq!(position_to_byte_offset(text, Position::new(1, 0)), Ok(10));
        assert_eq!(byte_offset_to_position(text, 8), Some(Position::new(0, 8)));
        assert_eq!(byte_offset_to_position(text, 10), Some(Position::new(1, 0)));
    }

    #[test]
    fn round_trip() {
        for (line, content) in SQL.split('\n').enumerate() {
            for character in 0..=content.len() {
                let position = Position::new(line as u32, character as u32);
                let offset = position_to_byte_offset(SQL, position).unwrap();
                assert_eq!(byte_offset_to_position(SQL, offset), Some(position));
            }
        }
    }
}
