use crate::escape::{ESCAPE, Piece, Token, split_trailing_escape, tokenize};
use std::borrow::Cow;

/// Rebuilds the text a human should see from an append-only byte stream that
/// carries rewrite tokens.
///
/// Raw bytes go in through [`push`](Self::push) (one network chunk at a time) or
/// [`observe`](Self::observe) (the whole response received so far). The logical
/// buffer comes out through [`text`](Self::text). It is shorter than the raw byte
/// count whenever a token erased something, and it never contains a token
/// literal.
///
/// ```rust
/// use routines_protocol::Reconstructor;
///
/// let mut console = Reconstructor::new();
/// console.push(b"Downloading\n");
/// console.push(b"10%\n");
/// console.push(b"\\a90%\n");
/// assert_eq!(console.text(), "Downloading\n90%\n");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Reconstructor {
    buffer: Vec<u8>,
    held_escape: bool,
    processed: usize,
}

impl Reconstructor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one chunk of raw response bytes, left to right.
    ///
    /// A chunk ending in a lone backslash is not final: that byte is held back
    /// and re-read in front of the next chunk, so a token split across two
    /// chunks still takes effect.
    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.processed += chunk.len();

        let joined;
        let input: &[u8] = if std::mem::take(&mut self.held_escape) {
            joined = [&[ESCAPE], chunk].concat();
            &joined
        } else {
            chunk
        };

        let (body, held) = split_trailing_escape(input);
        for piece in tokenize(body) {
            match piece {
                Piece::Text(text) => self.buffer.extend_from_slice(text),
                Piece::Token(token) => self.apply(token),
            }
        }
        self.held_escape = held;
    }

    /// Feeds the full response body received so far, processing only the bytes
    /// past what has already been consumed. Returns `true` if new bytes arrived.
    pub fn observe(&mut self, response_so_far: &[u8]) -> bool {
        match response_so_far.get(self.processed..) {
            Some(fresh) if !fresh.is_empty() => {
                self.push(fresh);
                true
            }
            _ => false,
        }
    }

    /// Releases a held-back backslash as literal text. Call once the stream has
    /// ended.
    pub fn finish(&mut self) {
        if std::mem::take(&mut self.held_escape) {
            self.buffer.push(ESCAPE);
        }
    }

    /// Appends text verbatim, without token interpretation.
    pub fn append_literal(&mut self, text: &str) {
        self.finish();
        self.buffer.extend_from_slice(text.as_bytes());
    }

    /// The logical buffer as display text.
    ///
    /// A multi-byte character cut off at the end of the latest chunk is left out
    /// until the rest of it arrives. Other invalid bytes are shown as U+FFFD.
    pub fn text(&self) -> Cow<'_, str> {
        match std::str::from_utf8(&self.buffer) {
            Ok(text) => Cow::Borrowed(text),
            Err(err) if err.error_len().is_none() => {
                String::from_utf8_lossy(&self.buffer[..err.valid_up_to()])
            }
            Err(_) => String::from_utf8_lossy(&self.buffer),
        }
    }

    /// Raw bytes consumed so far, tokens included.
    pub fn raw_len(&self) -> usize {
        self.processed
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// True while a trailing backslash waits for the next chunk.
    pub fn has_pending(&self) -> bool {
        self.held_escape
    }

    fn apply(&mut self, token: Token) {
        for _ in 0..token.rewind_steps() {
            self.rewind_to_line_end();
        }
    }

    fn rewind_to_line_end(&mut self) {
        match self.buffer.last() {
            None => {}
            Some(b'\n') => {
                self.buffer.pop();
            }
            Some(_) => {
                let keep = self
                    .buffer
                    .iter()
                    .rposition(|&b| b == b'\n')
                    .map_or(0, |newline| newline + 1);
                self.buffer.truncate(keep);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(chunks: &[&str]) -> String {
        let mut reconstructor = Reconstructor::new();
        for chunk in chunks {
            reconstructor.push(chunk.as_bytes());
        }
        reconstructor.finish();
        reconstructor.text().into_owned()
    }

    #[test]
    fn test_untokenised_chunks_concatenate() {
        assert_eq!(
            replay(&["Memory limit set", ": 512M.\n\n", "row 1\n"]),
            "Memory limit set: 512M.\n\nrow 1\n"
        );
    }

    #[test]
    fn test_rewind_to_line_end_replaces_partial_line() {
        assert_eq!(replay(&["abc\ndef", "\\bXYZ"]), "abc\nXYZ");
        assert_eq!(replay(&["abc\ndef\\bXYZ"]), "abc\nXYZ");
    }

    #[test]
    fn test_rewind_to_line_end_after_newline_steps_onto_previous_line() {
        assert_eq!(replay(&["abc\n", "\\b!"]), "abc!");
    }

    #[test]
    fn test_rewind_on_empty_buffer_is_noop() {
        assert_eq!(replay(&["\\b\\a\\b", "start"]), "start");
    }

    #[test]
    fn test_rewind_without_newline_clears_everything() {
        assert_eq!(replay(&["partial", "\\bnew"]), "new");
    }

    #[test]
    fn test_spinner_redraws_in_place() {
        assert_eq!(replay(&["\\a-", "\\a\\", "\\a|", "\\a/"]), "/");
    }

    #[test]
    fn test_padded_spinner_keeps_one_line() {
        // The first frame consumes the two blank padding lines.
        let mut chunks = vec!["Working\n\n\n".to_string()];
        for _ in 0..5 {
            for frame in ["-", "\\", "|", "/"] {
                chunks.push(format!("\\a{frame}\n"));
            }
        }
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        assert_eq!(replay(&refs), "Working\n/\n");
    }

    #[test]
    fn test_rewind_line_equals_two_rewinds() {
        let doubled = replay(&["one\ntwo\nthree", "\\b\\bX"]);
        let single = replay(&["one\ntwo\nthree", "\\aX"]);
        assert_eq!(doubled, single);
        assert_eq!(single, "one\ntwoX");
    }

    #[test]
    fn test_token_split_across_chunks_still_applies() {
        assert_eq!(replay(&["abc\ndef\\", "bXYZ"]), "abc\nXYZ");
        assert_eq!(replay(&["12%\n\\", "a13%\n"]), "13%\n");
    }

    #[test]
    fn test_held_backslash_followed_by_text_is_literal() {
        assert_eq!(replay(&["C:\\", "temp"]), "C:\\temp");
    }

    #[test]
    fn test_held_backslash_is_released_on_finish() {
        let mut reconstructor = Reconstructor::new();
        reconstructor.push(b"\\a\\");
        assert!(reconstructor.has_pending());
        assert_eq!(reconstructor.text(), "");
        reconstructor.finish();
        assert_eq!(reconstructor.text(), "\\");
    }

    #[test]
    fn test_append_literal_does_not_interpret_tokens() {
        let mut reconstructor = Reconstructor::new();
        reconstructor.push(b"log\n");
        reconstructor.append_literal("\\a\nDone!\n\n");
        assert_eq!(reconstructor.text(), "log\n\\a\nDone!\n\n");
    }

    #[test]
    fn test_observe_only_processes_new_bytes() {
        let mut reconstructor = Reconstructor::new();
        let mut response = b"10%\n".to_vec();
        assert!(reconstructor.observe(&response));
        assert!(!reconstructor.observe(&response));

        response.extend_from_slice(b"\\a20%\n");
        assert!(reconstructor.observe(&response));
        assert_eq!(reconstructor.text(), "20%\n");
        assert_eq!(reconstructor.raw_len(), response.len());
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let bytes = "Überprüfung ✓\n".as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 2);

        let mut reconstructor = Reconstructor::new();
        reconstructor.push(head);
        assert_eq!(reconstructor.text(), "Überprüfung ");
        reconstructor.push(tail);
        assert_eq!(reconstructor.text(), "Überprüfung ✓\n");
    }

    #[test]
    fn test_logical_buffer_shorter_than_raw_bytes() {
        let mut reconstructor = Reconstructor::new();
        reconstructor.push(b"abc\ndef\\bX");
        assert_eq!(reconstructor.raw_len(), 10);
        assert_eq!(reconstructor.text().len(), 5);
    }
}
