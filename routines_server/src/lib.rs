//! # Routines Server
//!
//! Runs long server-side routines (imports, rebuilds, batch jobs) and streams
//! their progress to the caller over a single plain-text HTTP response.
//!
//! ## Architecture
//!
//! *   **Registry**: tasks are registered explicitly through [`TaskRegistry::builder`].
//!     Each gets a routing key (its *action*) derived from its group and title.
//! *   **Execution Guard**: one [`ExecutionGuard`] per request parses the arguments,
//!     resolves limits, prints the banners and calls the task.
//! *   **Stream**: the task writes through a [`Stream`], which pushes every send to the
//!     client immediately. Output can rewrite earlier lines with the tokens from
//!     [`routines_protocol`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use routines_server::{ServerConfig, TaskGroup, TaskRegistry, start_server};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = TaskRegistry::builder()
//!         .group(TaskGroup::new("Reports").task("Rebuild index", |stream, _args| {
//!             stream.send_line("Rebuilding...");
//!             Ok(())
//!         }))
//!         .build()?;
//!
//!     start_server(ServerConfig::default(), Arc::new(registry)).await?;
//!     Ok(())
//! }
//! ```

pub mod args;
pub mod config;
pub mod demo;
pub mod error;
pub mod guard;
pub mod limits;
pub mod registry;
pub mod server;
pub mod stream;

pub use config::{CONFIG_ENV, ConfigFile, RoutineSettings};
pub use error::{ConfigError, Result, ServerError};
pub use guard::{ExecutionGuard, GuardPhase};
pub use limits::{AmbientLimits, MemoryLimit, MemoryProbe, ProcessMemory};
pub use registry::{Task, TaskGroup, TaskRegistry};
pub use server::{RoutinesServer, RunTracker, ServerConfig, start_server};
pub use stream::{Payload, Sink, Stream};
