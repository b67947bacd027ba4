//! Error types for heartbeat-core

use thiserror::Error;

/// Main error type for the heartbeat-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Persisted state could not be read or written
    #[error("storage error: {0}")]
    Storage(String),

    /// An outbound message to a tab, popup or runtime listener failed
    #[error("messaging error: {0}")]
    Messaging(String),

    /// Logging/recall backend error
    #[error("collector error: {0}")]
    Collector(String),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A raw turn event was missing required fields
    #[error("invalid turn: {0}")]
    InvalidTurn(String),
}

/// Result type alias for heartbeat-core
pub type Result<T> = std::result::Result<T, Error>;
