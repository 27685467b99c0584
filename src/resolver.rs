//! Name resolution monitor
//!
//! Resolves the server host once at startup, then re-resolves it in the
//! background. The last good address is kept when a later lookup fails, and
//! address changes are reported on a channel so the owning task can decide
//! whether a reconnection is warranted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

/// A successful resolution. Replaced wholesale on every refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub ip: IpAddr,
    pub resolved_at: DateTime<Utc>,
}

/// Name resolution failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("No addresses found for host {0}")]
    NoAddresses(String),
    #[error("Failed to resolve {host}: {reason}")]
    LookupFailed { host: String, reason: String },
}

/// Host name lookup seam
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> Result<IpAddr, ResolutionError>;
}

/// Resolver backed by the operating system
#[derive(Debug, Default, Clone)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr, ResolutionError> {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Ok(ip);
        }

        let addrs: Vec<IpAddr> = tokio::net::lookup_host((bare, 0))
            .await
            .map_err(|e| ResolutionError::LookupFailed {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .map(|addr| addr.ip())
            .collect();

        preferred_address(&addrs).ok_or_else(|| ResolutionError::NoAddresses(host.to_string()))
    }
}

/// First IPv4 address, else the first address of any family
pub fn preferred_address(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

/// The resolved address moved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressChange {
    pub previous: IpAddr,
    pub current: IpAddr,
}

/// Outcome of a single successful refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// First address ever resolved for this monitor
    Initial(IpAddr),
    Unchanged(IpAddr),
    Changed(AddressChange),
}

struct MonitorShared {
    host: String,
    resolver: Arc<dyn HostResolver>,
    address_tx: watch::Sender<Option<ResolvedAddress>>,
}

impl MonitorShared {
    async fn refresh(&self) -> Result<RefreshOutcome, ResolutionError> {
        match self.resolver.resolve(&self.host).await {
            Ok(ip) => {
                let previous = self.address_tx.send_replace(Some(ResolvedAddress {
                    ip,
                    resolved_at: Utc::now(),
                }));
                let outcome = match previous {
                    None => RefreshOutcome::Initial(ip),
                    Some(prev) if prev.ip == ip => RefreshOutcome::Unchanged(ip),
                    Some(prev) => RefreshOutcome::Changed(AddressChange {
                        previous: prev.ip,
                        current: ip,
                    }),
                };
                debug!(host = %self.host, ip = %ip, "Resolved server host");
                Ok(outcome)
            }
            Err(error) => {
                match self.address_tx.borrow().as_ref() {
                    Some(cached) => warn!(
                        host = %self.host,
                        cached_ip = %cached.ip,
                        error = %error,
                        "Name resolution failed, keeping cached address"
                    ),
                    None => warn!(host = %self.host, error = %error, "Name resolution failed"),
                }
                Err(error)
            }
        }
    }
}

struct RefreshTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodic name resolution for the configured server host
pub struct DnsMonitor {
    shared: Arc<MonitorShared>,
    refresh_task: Mutex<Option<RefreshTask>>,
}

impl DnsMonitor {
    pub fn new(host: impl Into<String>, resolver: Arc<dyn HostResolver>) -> Self {
        let (address_tx, _address_rx) = watch::channel(None);
        Self {
            shared: Arc::new(MonitorShared {
                host: host.into(),
                resolver,
                address_tx,
            }),
            refresh_task: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &str {
        &self.shared.host
    }

    /// Last known good address
    pub fn current(&self) -> Option<ResolvedAddress> {
        self.shared.address_tx.borrow().clone()
    }

    /// Observe address replacements
    pub fn subscribe(&self) -> watch::Receiver<Option<ResolvedAddress>> {
        self.shared.address_tx.subscribe()
    }

    /// Resolve immediately. A failure leaves any cached address untouched.
    pub async fn resolve_now(&self) -> Result<RefreshOutcome, ResolutionError> {
        self.shared.refresh().await
    }

    /// Start re-resolving every `interval`, reporting address changes on `changes`
    ///
    /// Replaces a previously started refresh loop.
    pub async fn start_periodic_refresh(
        &self,
        interval: Duration,
        changes: mpsc::UnboundedSender<AddressChange>,
    ) {
        self.stop().await;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let span = crate::dns_span!(host = %self.shared.host);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // First tick completes immediately, skip it

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Ok(RefreshOutcome::Changed(change)) = shared.refresh().await {
                            info!(
                                host = %shared.host,
                                previous = %change.previous,
                                current = %change.current,
                                "Server address changed"
                            );
                            let _ = changes.send(change);
                        }
                    }
                }
            }
            debug!(host = %shared.host, "Name resolution refresh stopped");
        }
        .instrument(span));

        let mut slot = self
            .refresh_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(RefreshTask {
            shutdown_tx,
            handle,
        });
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Stop the background loop. No change is reported after this returns.
    pub async fn stop(&self) {
        let task = self
            .refresh_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(task) = task {
            let _ = task.shutdown_tx.send(true);
            task.handle.abort();
            let _ = task.handle.await;
        }
    }
}

impl Drop for DnsMonitor {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.refresh_task.lock() {
            if let Some(task) = slot.take() {
                task.handle.abort();
            }
        }
    }
}
