//! Transport abstraction for the duel channel.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between the client and the duel server. The protocol is one JSON
//! frame per message (`{"event": …, "data": …}`), so every transport
//! implementation must handle message framing internally (WebSocket
//! frames, length-prefixed TCP, and so on).
//!
//! # Connection Setup
//!
//! Connection setup is intentionally NOT part of this trait — different
//! transports have fundamentally different connection parameters.
//! Construct a connected transport externally, then pass it to
//! [`DuelSession::start`](crate::session::DuelSession::start). Because
//! the session loop installs its dispatch before the first `recv` call,
//! no server event delivered after the connection succeeds can be lost
//! to the connect race.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use code_duel_client::error::DuelError;
//! use code_duel_client::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), DuelError> {
//!         // Send the JSON text frame over your transport
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, DuelError>> {
//!         // Receive the next JSON text frame
//!         // Return None when the connection is closed cleanly
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), DuelError> {
//!         // Gracefully shut down the connection
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::DuelError;

/// A bidirectional text message transport for the duel channel.
///
/// Implementors shuttle serialized JSON frames between the client and
/// server. Each [`send`](Transport::send) transmits one complete frame;
/// each [`recv`](Transport::recv) yields one complete frame. Transport
/// faults are reported through return values and surface to the session
/// as state transitions — they are never thrown into caller code.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the
/// session loop polls it inside `tokio::select!`. If `recv` is
/// cancelled before completion, calling it again must not lose a frame.
/// Channel-based implementations are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::TransportSend`] if the frame could not be
    /// sent (connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), DuelError>;

    /// Receive the next JSON text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete frame was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait docs](Transport)).
    async fn recv(&mut self) -> Option<Result<String, DuelError>>;

    /// Close the transport connection gracefully.
    ///
    /// After calling this method, subsequent calls to `send` and `recv`
    /// may return errors or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations
    /// should still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), DuelError>;
}
