//! Error types for resona-session
//!
//! Defines module-specific error types using thiserror for clear error
//! propagation. These are internal errors crossing Rust API boundaries;
//! playback failures reported to observers travel as numeric
//! [`resona_common::ErrorCode`] events instead and never surface here.

use thiserror::Error;

/// Main error type for the session daemon
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP server errors
    #[error("HTTP server error: {0}")]
    Http(String),

    /// Native player construction or control errors
    #[error("Player error: {0}")]
    Player(String),

    /// The hub has shut down and rejects the operation
    #[error("Session hub closed")]
    HubClosed,

    /// Invalid request (e.g. out-of-range playlist position)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the session Error
pub type Result<T> = std::result::Result<T, Error>;
