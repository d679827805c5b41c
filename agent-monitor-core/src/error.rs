//! Error types for agent-monitor-core

use thiserror::Error;

/// Main error type for the agent-monitor-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Agent settings file could not be updated
    #[error("settings error in {path}: {message}")]
    Settings { path: String, message: String },

    /// HTTP server failed to bind or serve
    #[error("server error: {0}")]
    Server(String),
}

/// Result type alias for agent-monitor-core
pub type Result<T> = std::result::Result<T, Error>;
