//! Plumbing shared by the routines server and console.
//!
//! - [`state_machine`]: a mutex-guarded state cell with closure-based transitions.
//! - [`logging`]: one-shot `tracing` initialisation with a rolling log file.

pub mod logging;
pub mod state_machine;

pub use state_machine::StateMachine;
