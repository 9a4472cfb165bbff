//! Text protocol for streaming routine progress over a plain HTTP response.
//!
//! The server appends UTF-8 text to a single long-lived response body. Two
//! literal escape tokens embedded in that text let a task redraw the last line
//! (spinners, progress bars) without ever rewriting bytes already sent. The
//! receiving side replays the append-only byte stream through a
//! [`Reconstructor`] to get the text a human should see.

pub mod escape;
pub mod reconstructor;

pub use escape::{REWIND_LINE, REWIND_TO_LINE_END, Token, contains_token};
pub use reconstructor::Reconstructor;
