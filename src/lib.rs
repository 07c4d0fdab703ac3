//! # Code Duel Client
//!
//! Transport-agnostic Rust client for the Code Duel real-time
//! coding-battle protocol.
//!
//! Two participants share a room, race to solve algorithmic problems,
//! and deal damage to each other's health pool on correct submissions;
//! additional users may attach as read-only spectators. This crate owns
//! the client side of that session: a duplex event channel to the duel
//! server, an HTTP request gateway, and the state machine that
//! reconciles locally-initiated actions against server-pushed events —
//! correctly under reconnection, duplicate-request, and role-ambiguity
//! conditions.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] trait for any backend
//! - **WebSocket built-in** — default `transport-websocket` feature provides [`WebSocketTransport`]
//! - **Typed wire protocol** — every channel event is a validated, tagged payload type
//! - **Event-driven** — the session emits typed [`SessionEvent`]s via a channel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use code_duel_client::{
//!     DuelSession, HttpGateway, SessionConfig, SessionEvent, WebSocketTransport,
//! };
//!
//! let transport = WebSocketTransport::connect("ws://localhost:5001/duel").await?;
//! let gateway = HttpGateway::new("http://localhost:5001");
//! let (session, mut events) = DuelSession::start(
//!     transport,
//!     gateway,
//!     SessionConfig::creator("u1"),
//! );
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::GameOver(result) => { /* show results */ }
//!         SessionEvent::ReturnHome => break,
//!         _ => {}
//!     }
//! }
//! ```

pub mod challenge;
pub mod code_sync;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use code_sync::DisplaySlot;
pub use error::DuelError;
pub use gateway::{Gateway, HttpGateway};
pub use notify::NotificationKind;
pub use protocol::{ClientEventMsg, Difficulty, GameResult, Problem, Role, ServerEvent};
pub use session::{ConnectionStatus, DuelSession, SessionConfig, SessionEvent, SessionPhase};
pub use transport::Transport;

#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
