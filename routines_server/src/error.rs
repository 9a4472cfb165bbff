//! Error types for the routines server

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Action '{action}' is registered twice ({first} and {second})")]
    DuplicateAction {
        action: String,
        first: String,
        second: String,
    },

    #[error("HTTP server error: {0}")]
    HttpServer(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid memory limit '{0}': expected bytes, a K/M/G shorthand such as 512M, or -1")]
    MemoryLimit(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
