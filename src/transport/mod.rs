//! Transport layer for telemetry delivery
//!
//! Two mutually exclusive strategies sit behind the [`Transport`] trait: a
//! fire-and-forget datagram sender and a persistent WebSocket session with
//! reconnection. The engine picks one per configuration.

use crate::resolver::AddressChange;
use bytes::Bytes;

pub mod session;
pub mod udp;

pub use crate::config::TransportKind;
pub use session::{ConnectionState, PersistentSession};
pub use udp::DatagramSender;

/// Transport-level failures reported to the caller of `send`/`start`
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Payload is not valid UTF-8 text")]
    InvalidPayload,
    #[error("Failed to open local socket")]
    SocketBind(#[source] std::io::Error),
}

/// Delivery strategy abstraction
///
/// Implementations never block the caller for an unbounded time: `send`
/// completes, fails fast, or hands the payload to a background task.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Which strategy this is
    fn kind(&self) -> TransportKind;

    /// Prepare the channel: bind a socket or begin connecting
    async fn start(&self) -> Result<(), TransportError>;

    /// Deliver one encoded message
    async fn send(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Release the channel and cancel background work
    async fn shutdown(&self);

    /// Check if the transport currently believes it can deliver
    fn is_connected(&self) -> bool;

    /// React to a name-resolution change. Returns true when it triggered a reconnection.
    fn on_address_changed(&self, _change: &AddressChange) -> bool {
        false
    }
}
