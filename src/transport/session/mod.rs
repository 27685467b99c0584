//! Persistent WebSocket session
//!
//! The module separates pure state/policy logic from I/O:
//!
//! - [`connection`] - Connection state, failure classification and reconnect policy
//! - [`scheduler`] - The single-slot, cancellable reconnection timer
//! - [`connector`] - Channel establishment seam and its WebSocket implementation
//! - [`client`] - The session state machine tying them together
//!
//! # Usage
//!
//! ```rust,no_run
//! use signalk_relay::credentials::NoCredentials;
//! use signalk_relay::status::StatusBoard;
//! use signalk_relay::transport::session::{PersistentSession, ReconnectPolicy, WsConnector};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let board = StatusBoard::new();
//! let session = PersistentSession::new(
//!     "ws://nav.local/signalk/v1/stream?subscribe=none",
//!     Arc::new(WsConnector),
//!     Arc::new(NoCredentials),
//!     ReconnectPolicy::default(),
//!     board.reporter(),
//! );
//! session.initialize();
//! session.shutdown().await;
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod connector;
pub mod scheduler;

pub use client::PersistentSession;
pub use connection::{
    classify_close, classify_connect_error, ChannelEvent, ConnectError, ConnectionState,
    FailureClass, ReconnectPolicy, NORMAL_CLOSURE,
};
pub use connector::{Channel, Connector, Outbound, WsConnector};
pub use scheduler::ReconnectScheduler;
