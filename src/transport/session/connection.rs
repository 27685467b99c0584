//! Pure connection state management for the persistent session
//!
//! State, failure classification and the reconnect delay policy live here so
//! they can be tested without sockets or timers.

use crate::config::ReconnectSection;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Close code sent and expected for a client-requested close
pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported when the peer closed without a status code
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Reported when the stream ended without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Connection state, owned by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel; a reconnection may be pending
    Disconnected,
    /// A handshake is in flight
    Connecting,
    /// The channel is open and frames can be sent
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Failure to establish a channel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Server rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },
    #[error("Server rejected the connection (HTTP {status})")]
    Rejected { status: u16 },
    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid connection request: {0}")]
    InvalidRequest(String),
}

/// Events delivered by an open channel, in order
///
/// Zero or more `Message`s are followed by exactly one terminal event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(String),
    Closed { code: u16, reason: String },
    Failed(String),
}

/// What kind of failure ended (or prevented) a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Credentials were rejected at connect time
    AuthRejected,
    /// The server closed the channel with a non-normal code
    UnexpectedClose,
    /// Lower-level failure or non-auth HTTP rejection
    NetworkFailure,
    /// Normal closure; nothing to recover
    ClientClosed,
}

pub fn classify_connect_error(error: &ConnectError) -> FailureClass {
    match error {
        ConnectError::Unauthorized { .. } => FailureClass::AuthRejected,
        ConnectError::Rejected { .. }
        | ConnectError::Timeout(_)
        | ConnectError::Network(_)
        | ConnectError::InvalidRequest(_) => FailureClass::NetworkFailure,
    }
}

pub fn classify_close(code: u16) -> FailureClass {
    if code == NORMAL_CLOSURE {
        FailureClass::ClientClosed
    } else {
        FailureClass::UnexpectedClose
    }
}

/// Classify a channel event; `None` for non-terminal events
pub fn classify_event(event: &ChannelEvent) -> Option<FailureClass> {
    match event {
        ChannelEvent::Message(_) => None,
        ChannelEvent::Closed { code, .. } => Some(classify_close(*code)),
        ChannelEvent::Failed(_) => Some(FailureClass::NetworkFailure),
    }
}

/// Fixed reconnection delays. There is no backoff growth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub after_renewal: Duration,
    pub after_close: Duration,
    pub after_failure: Duration,
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectSection::default())
    }
}

impl From<&ReconnectSection> for ReconnectPolicy {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            after_renewal: Duration::from_millis(section.after_renewal_ms),
            after_close: Duration::from_millis(section.after_close_ms),
            after_failure: Duration::from_millis(section.after_failure_ms),
            connect_timeout: Duration::from_secs(section.connect_timeout_secs),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the next attempt, or `None` when no automatic attempt applies
    ///
    /// Auth rejections go through credential renewal first, which then uses
    /// `after_renewal`.
    pub fn delay_for(&self, class: FailureClass) -> Option<Duration> {
        match class {
            FailureClass::UnexpectedClose => Some(self.after_close),
            FailureClass::NetworkFailure => Some(self.after_failure),
            FailureClass::AuthRejected | FailureClass::ClientClosed => None,
        }
    }
}

pub fn log_state_transition(from: ConnectionState, to: ConnectionState) {
    match to {
        ConnectionState::Connected => info!(from = %from, to = %to, "Session connected"),
        ConnectionState::Disconnected if from == ConnectionState::Connected => {
            info!(from = %from, to = %to, "Session disconnected")
        }
        _ => debug!(from = %from, to = %to, "Session state changed"),
    }
}
