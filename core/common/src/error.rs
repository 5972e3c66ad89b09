//! Common error types for DriveBlobs.

use thiserror::Error;

/// Top-level error type for DriveBlobs operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure (connect, TLS, body read).
    #[error("Network error: {0}")]
    Network(String),

    /// Token refresh failed or the remote rejected our credentials.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The remote refused access to the resource.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The remote answered with an unexpected status.
    #[error("API error {status}: {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
