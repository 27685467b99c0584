//! Telemetry engine
//!
//! Owns one streaming session at a time: `configure` fixes the target and
//! transport kind, `start` resolves the host and brings the transport up,
//! `push` encodes and hands readings to the transport, and `stop` tears all
//! background work down. Only these explicit calls return errors; everything
//! that happens in the background is reported through the status board.

use crate::config::{RelayConfig, TransportKind};
use crate::credentials::{CredentialProvider, NoCredentials};
use crate::endpoint::{self, TargetDescriptor, DEFAULT_DATAGRAM_PORT};
use crate::error::{RelayError, RelayResult};
use crate::protocol::{MessageEncoder, Reading, Source};
use crate::resolver::{AddressChange, DnsMonitor, HostResolver, ResolvedAddress, SystemResolver};
use crate::status::{StatusBoard, StatusReporter, TransmissionStatus};
use crate::transport::session::{Connector, PersistentSession, ReconnectPolicy, WsConnector};
use crate::transport::{DatagramSender, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

const DEFAULT_DNS_REFRESH: Duration = Duration::from_secs(300);

/// Everything fixed by one `configure` call
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub target: TargetDescriptor,
    pub has_extra_path: bool,
    pub transport: TransportKind,
    pub udp_port: u16,
    pub context: String,
    pub source: Source,
    pub dns_refresh: Duration,
    pub reconnect: ReconnectPolicy,
}

impl EngineConfig {
    pub fn new(target: TargetDescriptor, transport: TransportKind) -> Self {
        Self {
            target,
            has_extra_path: false,
            transport,
            udp_port: DEFAULT_DATAGRAM_PORT,
            context: "vessels.self".to_string(),
            source: Source::new("signalk-relay"),
            dns_refresh: DEFAULT_DNS_REFRESH,
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Parse a raw user address
    pub fn parse(address: &str, transport: TransportKind) -> RelayResult<Self> {
        let parsed = endpoint::parse(address)?;
        Ok(Self {
            has_extra_path: parsed.has_extra_path,
            ..Self::new(parsed.target, transport)
        })
    }

    pub fn from_config(config: &RelayConfig) -> RelayResult<Self> {
        let parsed = config.endpoint()?;
        let stream = &config.stream;
        let src = stream
            .source_src
            .clone()
            .unwrap_or_else(|| stream.source_label.clone());

        Ok(Self {
            target: parsed.target,
            has_extra_path: parsed.has_extra_path,
            transport: config.server.transport,
            udp_port: config.server.udp_port,
            context: stream.context.clone(),
            source: Source {
                label: stream.source_label.clone(),
                src,
            },
            dns_refresh: config.dns_refresh_interval(),
            reconnect: ReconnectPolicy::from(&config.reconnect),
        })
    }

    pub fn with_udp_port(mut self, port: u16) -> Self {
        self.udp_port = port;
        self
    }

    pub fn with_dns_refresh(mut self, interval: Duration) -> Self {
        self.dns_refresh = interval;
        self
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

/// What happened to a pushed reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Handed to the transport
    Submitted,
    /// The reading had no encodable values; nothing was sent
    Skipped,
    /// The transport refused or failed to deliver it; see the status for details
    Dropped,
}

struct ActiveSession {
    monitor: Arc<DnsMonitor>,
    transport: Arc<dyn Transport>,
    encoder: MessageEncoder,
    listener: JoinHandle<()>,
}

/// Orchestrates resolution, transport and encoding for one target
pub struct TelemetryEngine {
    credentials: Arc<dyn CredentialProvider>,
    resolver: Arc<dyn HostResolver>,
    connector: Arc<dyn Connector>,
    board: StatusBoard,
    config: Option<EngineConfig>,
    active: Option<ActiveSession>,
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::new(Arc::new(NoCredentials))
    }
}

impl TelemetryEngine {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            credentials,
            resolver: Arc::new(SystemResolver),
            connector: Arc::new(WsConnector),
            board: StatusBoard::new(),
            config: None,
            active: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Fix target and transport kind for the next `start`
    pub fn configure(&mut self, config: EngineConfig) -> RelayResult<()> {
        if self.active.is_some() {
            return Err(RelayError::AlreadyRunning);
        }
        if config.has_extra_path {
            warn!(
                server = %config.target,
                "Address contains a path; it is ignored, the stream endpoint is fixed"
            );
        }
        info!(server = %config.target, transport = ?config.transport, "Engine configured");
        self.config = Some(config);
        Ok(())
    }

    pub fn config(&self) -> Option<&EngineConfig> {
        self.config.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn status(&self) -> TransmissionStatus {
        self.board.snapshot()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TransmissionStatus> {
        self.board.subscribe()
    }

    /// Whether the active transport currently believes it can deliver
    pub fn transport_connected(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.transport.is_connected())
    }

    /// Resolve the host and bring the transport up
    ///
    /// A first-contact resolution failure is fatal for the datagram transport
    /// only; the persistent session connects by host name.
    pub async fn start(&mut self) -> RelayResult<()> {
        if self.active.is_some() {
            return Err(RelayError::AlreadyRunning);
        }
        let config = self.config.clone().ok_or(RelayError::NotConfigured)?;

        self.board.reset();
        let status = self.board.reporter();
        status.set_transport(config.transport);

        let monitor = Arc::new(DnsMonitor::new(
            config.target.host.clone(),
            Arc::clone(&self.resolver),
        ));
        match monitor.resolve_now().await {
            Ok(_) => {
                if let Some(resolved) = monitor.current() {
                    status.set_resolved_ip(resolved.ip);
                }
            }
            Err(e) if config.transport == TransportKind::Udp => {
                self.board.reset();
                return Err(RelayError::FirstContact(e));
            }
            Err(e) => warn!(host = %config.target.host, error = %e, "Initial resolution failed"),
        }

        let transport = self.build_transport(&config, &monitor, &status);
        if let Err(e) = transport.start().await {
            transport.shutdown().await;
            self.board.reset();
            return Err(e.into());
        }

        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        monitor
            .start_periodic_refresh(config.dns_refresh, changes_tx)
            .await;
        let span = crate::engine_span!(server = %config.target);
        let listener = tokio::spawn(
            forward_address_changes(
                changes_rx,
                monitor.subscribe(),
                Arc::clone(&transport),
                status.clone(),
            )
            .instrument(span),
        );

        info!(server = %config.target, transport = ?config.transport, "Streaming started");
        self.active = Some(ActiveSession {
            monitor,
            transport,
            encoder: MessageEncoder::new(config.context.clone(), config.source.clone()),
            listener,
        });
        Ok(())
    }

    fn build_transport(
        &self,
        config: &EngineConfig,
        monitor: &DnsMonitor,
        status: &StatusReporter,
    ) -> Arc<dyn Transport> {
        match config.transport {
            TransportKind::Udp => Arc::new(DatagramSender::new(
                config.udp_port,
                monitor.subscribe(),
                status.clone(),
            )),
            TransportKind::Websocket => Arc::new(PersistentSession::new(
                config.target.stream_url(),
                Arc::clone(&self.connector),
                Arc::clone(&self.credentials),
                config.reconnect.clone(),
                status.clone(),
            )),
        }
    }

    /// Encode a reading and hand it to the transport
    ///
    /// Transport failures are not errors here: they are already counted in
    /// the status and the reading is reported as dropped.
    pub async fn push(&self, reading: &Reading) -> RelayResult<PushOutcome> {
        let active = self.active.as_ref().ok_or(RelayError::NotRunning)?;

        let message = active.encoder.build(reading);
        if message.is_empty() {
            debug!("Reading has no encodable values, skipping");
            return Ok(PushOutcome::Skipped);
        }

        let payload = active.encoder.encode_message(&message)?;
        match active.transport.send(payload).await {
            Ok(()) => Ok(PushOutcome::Submitted),
            Err(e) => {
                debug!(error = %e, "Message not delivered");
                Ok(PushOutcome::Dropped)
            }
        }
    }

    /// Halt resolution, release the transport and reset the status
    ///
    /// No background task updates the status after this returns.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            debug!("Stop requested while not running");
            return;
        };

        active.monitor.stop().await;
        active.listener.abort();
        let _ = active.listener.await;
        active.transport.shutdown().await;
        self.board.reset();
        info!("Streaming stopped");
    }
}

/// Mirror every address replacement into the status; only a change of
/// address is passed on to the transport.
async fn forward_address_changes(
    mut changes: mpsc::UnboundedReceiver<AddressChange>,
    mut addresses: watch::Receiver<Option<ResolvedAddress>>,
    transport: Arc<dyn Transport>,
    status: StatusReporter,
) {
    let mut watching = true;
    loop {
        tokio::select! {
            change = changes.recv() => {
                let Some(change) = change else { break };
                status.set_resolved_ip(change.current);
                if transport.on_address_changed(&change) {
                    info!(current = %change.current, "Reconnection triggered by address change");
                }
            }
            replaced = addresses.changed(), if watching => {
                if replaced.is_err() {
                    watching = false;
                    continue;
                }
                let ip = addresses.borrow_and_update().as_ref().map(|resolved| resolved.ip);
                if let Some(ip) = ip {
                    status.set_resolved_ip(ip);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{LocationReading, SensorReading};
    use crate::resolver::ResolutionError;
    use crate::testing::{MockConnector, MockResolver};
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr};

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn udp_engine(resolver: MockResolver) -> TelemetryEngine {
        let mut engine = TelemetryEngine::default().with_resolver(Arc::new(resolver));
        engine
            .configure(EngineConfig::parse("nav.local", TransportKind::Udp).unwrap())
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_start_requires_configuration() {
        let mut engine = TelemetryEngine::default();
        assert!(matches!(engine.start().await, Err(RelayError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_push_requires_running_engine() {
        let engine = udp_engine(MockResolver::fixed(localhost()));
        let reading = Reading::Location(LocationReading::new(Utc::now(), 1.0, 2.0));
        assert!(matches!(engine.push(&reading).await, Err(RelayError::NotRunning)));
    }

    #[tokio::test]
    async fn test_first_contact_failure_is_fatal_for_datagrams() {
        let mut engine = udp_engine(MockResolver::failing());
        let result = engine.start().await;
        assert!(matches!(
            result,
            Err(RelayError::FirstContact(ResolutionError::NoAddresses(_)))
        ));
        assert!(!engine.is_running());
        assert_eq!(engine.status(), TransmissionStatus::default());
    }

    #[tokio::test]
    async fn test_first_contact_failure_is_tolerated_for_sessions() {
        let connector = Arc::new(MockConnector::new());
        let mut engine = TelemetryEngine::default()
            .with_resolver(Arc::new(MockResolver::failing()))
            .with_connector(connector.clone());
        engine
            .configure(EngineConfig::parse("nav.local", TransportKind::Websocket).unwrap())
            .unwrap();

        engine.start().await.unwrap();
        assert!(engine.is_running());
        assert_eq!(engine.status().resolved_ip, None);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_empty_reading_is_skipped() {
        let mut engine = udp_engine(MockResolver::fixed(localhost()));
        engine.start().await.unwrap();

        let outcome = engine
            .push(&Reading::Sensors(SensorReading::empty(Utc::now())))
            .await
            .unwrap();
        assert_eq!(outcome, PushOutcome::Skipped);
        assert_eq!(engine.status().messages_sent, 0);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_failed_datagram_is_reported_dropped() {
        // Broadcast without SO_BROADCAST is refused by the kernel
        let mut engine = udp_engine(MockResolver::fixed(IpAddr::V4(Ipv4Addr::BROADCAST)));
        engine.start().await.unwrap();

        let reading = Reading::Location(LocationReading::new(Utc::now(), 1.0, 2.0));
        assert_eq!(engine.push(&reading).await.unwrap(), PushOutcome::Dropped);

        let status = engine.status();
        assert_eq!(status.messages_sent, 0);
        assert_eq!(status.send_failures, 1);
        assert!(!status.connected);

        engine.stop().await;
    }

    #[tokio::test]
    async fn test_configure_while_running_is_rejected() {
        let mut engine = udp_engine(MockResolver::fixed(localhost()));
        engine.start().await.unwrap();

        let again = EngineConfig::parse("other.local", TransportKind::Udp).unwrap();
        assert!(matches!(engine.configure(again), Err(RelayError::AlreadyRunning)));
        assert!(matches!(engine.start().await, Err(RelayError::AlreadyRunning)));

        engine.stop().await;
        assert!(!engine.is_running());
        assert_eq!(engine.status(), TransmissionStatus::default());
    }

    #[test]
    fn test_invalid_address_is_a_configuration_error() {
        let error = EngineConfig::parse("ftp://nav.local", TransportKind::Udp).unwrap_err();
        assert!(error.is_configuration_error());
    }
}
