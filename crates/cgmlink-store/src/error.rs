//! Error types for cgmlink-store.

use std::path::PathBuf;

use cgmlink_types::ParseError;

/// Result type for cgmlink-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in cgmlink-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A stored timestamp is out of range.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The stored pairing record no longer validates.
    #[error("Invalid pairing record: {0}")]
    InvalidPairing(#[from] ParseError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV export error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
