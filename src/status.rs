//! Transmission status observable
//!
//! [`StatusBoard`] owns the current [`TransmissionStatus`] and hands out
//! [`StatusReporter`]s to the transport and its background tasks. Resetting
//! the board revokes every reporter issued before the reset, so a late timer
//! or reader task can never resurrect a flag after streaming has stopped.

use crate::config::TransportKind;
use crate::error::sanitize_error_message;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Snapshot of transmission health, as seen by observers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransmissionStatus {
    pub connected: bool,
    pub messages_sent: u64,
    pub last_send_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Set when the server rejected our credentials; cleared by a successful renewal
    pub auth_error: Option<String>,
    pub send_failures: u64,
    pub reconnect_attempts: u64,
    pub resolved_ip: Option<IpAddr>,
    pub transport: Option<TransportKind>,
}

struct BoardInner {
    tx: watch::Sender<TransmissionStatus>,
    generation: AtomicU64,
}

/// Owner of the status observable
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<BoardInner>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TransmissionStatus::default());
        Self {
            inner: Arc::new(BoardInner {
                tx,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Issue a reporter bound to the current generation
    pub fn reporter(&self) -> StatusReporter {
        StatusReporter {
            inner: Arc::clone(&self.inner),
            generation: self.inner.generation.load(Ordering::SeqCst),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TransmissionStatus> {
        self.inner.tx.subscribe()
    }

    pub fn snapshot(&self) -> TransmissionStatus {
        self.inner.tx.borrow().clone()
    }

    /// Zero every counter and revoke all outstanding reporters
    pub fn reset(&self) {
        self.inner.tx.send_modify(|status| {
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            *status = TransmissionStatus::default();
        });
    }
}

/// Write handle for the status observable
///
/// Updates from a revoked reporter are silently dropped. The generation check
/// happens under the observable's lock, so it cannot interleave with a reset.
#[derive(Clone)]
pub struct StatusReporter {
    inner: Arc<BoardInner>,
    generation: u64,
}

impl StatusReporter {
    pub fn is_revoked(&self) -> bool {
        self.inner.generation.load(Ordering::SeqCst) != self.generation
    }

    /// Apply a mutation unless this reporter has been revoked
    pub fn update<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut TransmissionStatus),
    {
        self.inner.tx.send_if_modified(|status| {
            if self.inner.generation.load(Ordering::SeqCst) != self.generation {
                return false;
            }
            mutate(status);
            true
        })
    }

    pub fn set_transport(&self, kind: TransportKind) {
        self.update(|s| s.transport = Some(kind));
    }

    pub fn set_connected(&self, connected: bool) {
        self.update(|s| s.connected = connected);
    }

    pub fn set_resolved_ip(&self, ip: IpAddr) {
        self.update(|s| s.resolved_ip = Some(ip));
    }

    /// A message left through the transport
    pub fn record_sent(&self) {
        self.update(|s| {
            s.messages_sent += 1;
            s.last_send_at = Some(Utc::now());
        });
    }

    /// A send failed without a channel-level consequence
    pub fn record_send_failure(&self, error: &str) {
        let error = sanitize_error_message(error);
        self.update(|s| {
            s.send_failures += 1;
            s.last_error = Some(error);
        });
    }

    /// The link went down
    pub fn record_disconnect(&self, error: Option<&str>) {
        let error = error.map(sanitize_error_message);
        self.update(|s| {
            s.connected = false;
            if error.is_some() {
                s.last_error = error;
            }
        });
    }

    pub fn set_auth_error(&self, error: Option<&str>) {
        let error = error.map(sanitize_error_message);
        self.update(|s| s.auth_error = error);
    }

    pub fn record_reconnect_attempt(&self) {
        self.update(|s| s.reconnect_attempts += 1);
    }
}
