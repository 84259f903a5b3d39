//! Shared error type for courier services
//!
//! Service crates wrap this in their own HTTP-facing error; library code
//! returns it directly.

use thiserror::Error;

/// Result alias used by courier library code
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared by the courier crates
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite access failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem access failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode of a persisted or wire record failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller supplied a value the operation cannot accept
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A remote collaborator could not be reached
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}
