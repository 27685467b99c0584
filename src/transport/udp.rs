//! Datagram transport
//!
//! At-most-once delivery: each message is one UDP datagram to the resolved
//! server address on the datagram service port. Nothing is queued or retried.
//! Local send failures are returned and counted in the transmission status;
//! losses on the wire are invisible.

use super::{Transport, TransportError, TransportKind};
use crate::resolver::ResolvedAddress;
use crate::status::StatusReporter;
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Fire-and-forget sender
pub struct DatagramSender {
    port: u16,
    address_rx: watch::Receiver<Option<ResolvedAddress>>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    healthy: AtomicBool,
    status: StatusReporter,
}

impl DatagramSender {
    /// `address_rx` is the name-resolution monitor's address observable
    pub fn new(
        port: u16,
        address_rx: watch::Receiver<Option<ResolvedAddress>>,
        status: StatusReporter,
    ) -> Self {
        Self {
            port,
            address_rx,
            socket: Mutex::new(None),
            healthy: AtomicBool::new(false),
            status,
        }
    }

    fn lock_socket(&self) -> std::sync::MutexGuard<'_, Option<Arc<UdpSocket>>> {
        self.socket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn unspecified_for(ip: &IpAddr) -> SocketAddr {
        match ip {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        }
    }

    async fn bind_for(&self, ip: &IpAddr) -> Result<Arc<UdpSocket>, TransportError> {
        let socket = UdpSocket::bind(Self::unspecified_for(ip))
            .await
            .map_err(TransportError::SocketBind)?;
        let socket = Arc::new(socket);
        *self.lock_socket() = Some(Arc::clone(&socket));
        Ok(socket)
    }

    /// Current destination, if an address has been resolved
    pub fn destination(&self) -> Option<SocketAddr> {
        self.address_rx
            .borrow()
            .as_ref()
            .map(|resolved| SocketAddr::new(resolved.ip, self.port))
    }
}

#[async_trait::async_trait]
impl Transport for DatagramSender {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    async fn start(&self) -> Result<(), TransportError> {
        let family_hint = self
            .destination()
            .map(|addr| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let socket = self.bind_for(&family_hint).await?;
        info!(
            local = ?socket.local_addr().ok(),
            destination = ?self.destination(),
            "Datagram transport ready"
        );
        Ok(())
    }

    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        let Some(destination) = self.destination() else {
            debug!("No resolved address, dropping datagram");
            return Err(TransportError::SendFailed("no resolved address".to_string()));
        };
        let Some(mut socket) = self.lock_socket().clone() else {
            debug!("Socket not open, dropping datagram");
            return Err(TransportError::SendFailed("socket not open".to_string()));
        };

        let family_mismatch = socket
            .local_addr()
            .map(|local| local.is_ipv4() != destination.is_ipv4())
            .unwrap_or(false);
        if family_mismatch {
            match self.bind_for(&destination.ip()).await {
                Ok(rebound) => socket = rebound,
                Err(e) => {
                    warn!(error = %e, "Failed to rebind datagram socket");
                    self.healthy.store(false, Ordering::SeqCst);
                    self.status.record_disconnect(Some(&e.to_string()));
                    return Err(e);
                }
            }
        }

        match socket.send_to(&payload, destination).await {
            Ok(_) => {
                self.healthy.store(true, Ordering::SeqCst);
                self.status.set_connected(true);
                self.status.record_sent();
                Ok(())
            }
            Err(e) => {
                warn!(destination = %destination, error = %e, "Datagram send failed");
                self.healthy.store(false, Ordering::SeqCst);
                self.status.record_send_failure(&e.to_string());
                self.status.set_connected(false);
                Err(TransportError::SendFailed(e.to_string()))
            }
        }
    }

    async fn shutdown(&self) {
        if self.lock_socket().take().is_some() {
            info!("Datagram transport closed");
        }
        self.healthy.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && self.lock_socket().is_some()
    }
}
