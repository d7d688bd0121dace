//! Error types for connection operations.

use thiserror::Error;

/// Errors that can occur while talking over a connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// No transport is attached to carry outgoing data.
    #[error("connection '{0}' is not open for sending")]
    NotOpen(String),

    /// Outgoing text could not be encoded.
    #[error("failed to encode outgoing data: {0}")]
    Encode(String),

    /// I/O error from the underlying transport.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for connection operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;
