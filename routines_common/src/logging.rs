//! # Logging Initialization
//!
//! One entry point, [`init_logging`], sets up the global `tracing` subscriber for
//! either binary. It runs at most once per process; later calls are no-ops.
//!
//! ## Layers
//!
//! 1.  **Environment Filter (`EnvFilter`)**: `RUST_LOG` wins when set. Otherwise the
//!     requested level applies to everything, with `debug` for the calling crate.
//!
//! 2.  **File Logging**: with `log_to_file = true` a daily rolling file is written
//!     to the user cache directory resolved by `directories`. ANSI colors are off.
//!     The console TUI always uses this mode, since stderr output would tear the
//!     alternate screen.
//!
//! 3.  **Stderr Logging**: with `log_to_file = false`, or when the cache directory
//!     is missing or read-only, logs go to stderr with colors.

use anyhow::Result;
use directories::ProjectDirs;
use std::{
    io::stderr,
    path::{Path, PathBuf},
    sync::{Once, OnceLock},
};
use tracing_subscriber::{EnvFilter, fmt::layer, prelude::*};

static INIT: Once = Once::new();
static LOG_FILE: OnceLock<PathBuf> = OnceLock::new();

/// Initialize verbose logging for tests.
pub fn init_test_logging() {
    let _ = init_logging("routines", "trace", false);
}

/// Initializes the logging system for the binary named `app`.
///
/// `app` doubles as the log file stem and as the target that is raised to
/// `debug` when `RUST_LOG` is not set.
pub fn init_logging(app: &str, log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},{app}=debug")));

        if log_to_file && let Some(proj_dirs) = ProjectDirs::from("com", "Routines", "routines") {
            let log_dir = proj_dirs.cache_dir();

            // tracing_appender::rolling::daily panics on permission errors.
            let file_appender_result = if test_write_permission(log_dir) {
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    tracing_appender::rolling::daily(log_dir, format!("{app}.log"))
                }))
            } else {
                Err(Box::new("Cannot write to log directory") as Box<dyn std::any::Any + Send>)
            };

            if let Ok(file_appender) = file_appender_result {
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                // Leaked so buffered lines are flushed on exit.
                Box::leak(Box::new(guard));
                let _ = LOG_FILE.set(log_dir.join(format!("{app}.log")));
                return;
            }
        }

        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(true))
            .init();
    });

    Ok(())
}

/// Base path of the rolling log file (the appender adds a date suffix), if
/// logging went to a file.
pub fn log_file() -> Option<&'static Path> {
    LOG_FILE.get().map(PathBuf::as_path)
}

/// Creates `dir` if needed and checks that a file can be written inside it.
fn test_write_permission(dir: &Path) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }

    let test_file = dir.join(".routines_log_test");
    match std::fs::write(&test_file, "test") {
        Ok(()) => {
            let _ = std::fs::remove_file(&test_file);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_permission_creates_missing_directory() {
        let tmp = tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        assert!(test_write_permission(&nested));
        assert!(nested.is_dir());
        assert!(!nested.join(".routines_log_test").exists());
    }

    #[test]
    fn test_repeated_initialisation_is_harmless() {
        init_test_logging();
        init_test_logging();
        assert!(init_logging("routines", "info", false).is_ok());
    }
}
