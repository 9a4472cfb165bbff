//! # Routines Console
//!
//! A terminal client for a routines server. It starts a run over HTTP, feeds
//! each received chunk through a [`Reconstructor`](routines_protocol::Reconstructor)
//! and repaints the whole rebuilt buffer, so spinners and progress bars redraw in
//! place.
//!
//! ## Usage
//!
//! ```no_run
//! use routines_console::{ConsoleSession, PlainOutput, RoutinesClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RoutinesClient::parse("http://127.0.0.1:3000")?;
//! let session = ConsoleSession::new(client, PlainOutput::default());
//! session.run("demo_progress_bar", &[]).await;
//! print!("{}", session.output().text());
//! # Ok(())
//! # }
//! ```

/// HTTP access to the routines server.
pub mod client;
/// Error types for console operations.
pub mod error;
/// Output areas a session paints into.
pub mod output;
/// The session controller.
pub mod session;
/// Full-screen terminal UI.
pub mod tui;

pub use client::{GroupListing, RoutinesClient, TaskListing};
pub use error::{ConsoleError, Result};
pub use output::{OutputArea, PlainOutput, RecordingOutput, ScrollView};
pub use session::{ConsoleSession, DONE_TRAILER, RequestHandle, RunOutcome};
