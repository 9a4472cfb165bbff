//! The two rewrite tokens that may appear inside streamed routine output.
//!
//! Both are two-byte literals: a backslash followed by `a` or `b`. They are not
//! control characters. A task writes them as plain text (`"\\a"` in Rust source),
//! and the receiver scans for them.
//!
//! | Token | Literal | Effect on the logical buffer |
//! |-------|---------|------------------------------|
//! | [`Token::RewindToLineEnd`] | `\b` | Pops a trailing newline, otherwise erases the current partial line |
//! | [`Token::RewindLine`] | `\a` | Two `\b` steps: erases the last line and puts the cursor back on it |

/// Byte that opens every token.
pub const ESCAPE: u8 = b'\\';

/// Erase the last written line so it can be redrawn (spinners, progress bars).
pub const REWIND_LINE: &str = "\\a";

/// Step back to the end of the previous line, erasing the current partial line.
pub const REWIND_TO_LINE_END: &str = "\\b";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    RewindLine,
    RewindToLineEnd,
}

impl Token {
    /// Maps the byte following an [`ESCAPE`] to a token.
    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            b'a' => Some(Self::RewindLine),
            b'b' => Some(Self::RewindToLineEnd),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RewindLine => REWIND_LINE,
            Self::RewindToLineEnd => REWIND_TO_LINE_END,
        }
    }

    /// How many `REWIND_TO_LINE_END` steps this token normalises to.
    pub fn rewind_steps(self) -> usize {
        match self {
            Self::RewindLine => 2,
            Self::RewindToLineEnd => 1,
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run of plain bytes or a single token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Piece<'a> {
    Text(&'a [u8]),
    Token(Token),
}

/// Splits off a trailing [`ESCAPE`] that might be the first half of a token
/// whose second half has not arrived yet.
///
/// A trailing backslash can never be the second half of a token, so holding it
/// back is always safe.
pub fn split_trailing_escape(chunk: &[u8]) -> (&[u8], bool) {
    match chunk.split_last() {
        Some((&ESCAPE, body)) => (body, true),
        _ => (chunk, false),
    }
}

/// Scans `bytes` left to right, yielding text runs and tokens in arrival order.
///
/// A backslash not followed by `a` or `b` is ordinary text.
pub fn tokenize(bytes: &[u8]) -> Pieces<'_> {
    Pieces { bytes, pos: 0 }
}

/// Iterator returned by [`tokenize`].
#[derive(Debug, Clone)]
pub struct Pieces<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Pieces<'a> {
    type Item = Piece<'a>;

    fn next(&mut self) -> Option<Piece<'a>> {
        let rest = &self.bytes[self.pos..];
        if rest.is_empty() {
            return None;
        }

        if let [ESCAPE, marker, ..] = rest
            && let Some(token) = Token::from_marker(*marker)
        {
            self.pos += 2;
            return Some(Piece::Token(token));
        }

        // Text runs up to the next backslash that opens a token. The first byte
        // is always taken so a lone backslash makes progress.
        let mut end = 1;
        while end < rest.len() {
            if rest[end] == ESCAPE
                && rest
                    .get(end + 1)
                    .is_some_and(|&marker| Token::from_marker(marker).is_some())
            {
                break;
            }
            end += 1;
        }
        self.pos += end;
        Some(Piece::Text(&rest[..end]))
    }
}

/// True if `text` contains either token.
pub fn contains_token(text: &str) -> bool {
    tokenize(text.as_bytes()).any(|piece| matches!(piece, Piece::Token(_)))
}
