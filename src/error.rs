//! Error types for the Code Duel client.

use thiserror::Error;

/// Errors that can occur when using the Code Duel client.
#[derive(Debug, Error)]
pub enum DuelError {
    /// Failed to send a message through the channel transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the channel transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active session, but the
    /// session loop has already exited.
    #[error("not connected to server")]
    NotConnected,

    /// Attempted a room operation before a room code was known.
    #[error("not in a room")]
    NotInRoom,

    /// The gateway returned a non-2xx response.
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP-style status code reported by the server.
        status: u16,
        /// Human-readable failure message from the server.
        message: String,
    },

    /// Failed to reach the gateway at all (connection refused, DNS, …).
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Code Duel client operations.
pub type Result<T> = std::result::Result<T, DuelError>;
