//! Persistent session state machine
//!
//! `Disconnected -> Connecting -> Connected`, back to `Disconnected` on close
//! or failure. The `Disconnected -> Connecting` edge is a compare-and-set on
//! the state cell, so concurrent `initialize` calls open at most one channel.
//! Background tasks (connect attempt, event reader, reconnect timer) report
//! outcomes only through the status reporter and never to the caller.

use super::connection::{
    classify_connect_error, classify_event, log_state_transition, ChannelEvent, ConnectError,
    ConnectionState, FailureClass, ReconnectPolicy,
};
use super::connector::{Channel, Connector, Outbound};
use super::scheduler::ReconnectScheduler;
use crate::credentials::CredentialProvider;
use crate::resolver::AddressChange;
use crate::status::StatusReporter;
use crate::transport::{Transport, TransportError, TransportKind};
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum AuthState {
    #[default]
    Ok,
    Renewing,
    /// Renewal failed; only an explicit initialize may connect again
    Blocked,
}

#[derive(Default)]
struct Lifecycle {
    closed: bool,
    auth: AuthState,
    outbound: Option<mpsc::Sender<Outbound>>,
    connect_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
}

struct SessionShared {
    stream_url: String,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ConnectionState>,
    status: StatusReporter,
    scheduler: ReconnectScheduler,
    lifecycle: Mutex<Lifecycle>,
}

/// Long-lived, auto-reconnecting WebSocket session
pub struct PersistentSession {
    shared: Arc<SessionShared>,
}

impl PersistentSession {
    pub fn new(
        stream_url: impl Into<String>,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
        policy: ReconnectPolicy,
        status: StatusReporter,
    ) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(SessionShared {
                stream_url: stream_url.into(),
                connector,
                credentials,
                policy,
                state_tx,
                status,
                scheduler: ReconnectScheduler::new(),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    pub fn stream_url(&self) -> &str {
        &self.shared.stream_url
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Begin connecting if, and only if, the session is `Disconnected`
    ///
    /// Returns whether this call started an attempt. An explicit call also
    /// lifts a block left by a failed credential renewal.
    pub fn initialize(&self) -> bool {
        self.shared.lock().auth = AuthState::Ok;
        self.shared.initialize()
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.shared.scheduler.is_pending()
    }

    /// Queue one text frame; fails fast when no channel is open
    pub fn send_text(&self, text: String) -> Result<(), TransportError> {
        let outbound = self.shared.lock().outbound.clone();
        let Some(outbound) = outbound else {
            let state = self.state();
            self.shared
                .status
                .record_send_failure(&format!("Not connected ({state})"));
            return Err(TransportError::NotConnected { state });
        };

        match outbound.try_send(Outbound::Text(text)) {
            Ok(()) => {
                self.shared.status.record_sent();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.shared.status.record_send_failure("Outbound queue full");
                Err(TransportError::SendFailed("outbound queue full".to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                let state = self.state();
                self.shared
                    .status
                    .record_send_failure(&format!("Channel closed ({state})"));
                Err(TransportError::NotConnected { state })
            }
        }
    }

    /// Close the channel with a normal closure and cancel all background work
    ///
    /// Nothing touches the state or the status after this returns.
    pub async fn shutdown(&self) {
        let (outbound, connect_task, reader_task) = {
            let mut lifecycle = self.shared.lock();
            lifecycle.closed = true;
            (
                lifecycle.outbound.take(),
                lifecycle.connect_task.take(),
                lifecycle.reader_task.take(),
            )
        };
        self.shared.scheduler.close();

        if let Some(outbound) = outbound {
            if outbound.try_send(Outbound::normal_close()).is_err() {
                debug!("Channel already gone at shutdown");
            }
        }

        for task in [connect_task, reader_task].into_iter().flatten() {
            task.abort();
            let _ = task.await;
        }

        self.shared.transition(ConnectionState::Disconnected);
        self.shared.status.set_connected(false);
        info!(url = %self.shared.stream_url, "Session shut down");
    }
}

impl Drop for PersistentSession {
    fn drop(&mut self) {
        self.shared.scheduler.close();
        let mut lifecycle = self.shared.lock();
        lifecycle.closed = true;
        for task in [lifecycle.connect_task.take(), lifecycle.reader_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn transition(&self, to: ConnectionState) {
        let from = self.state_tx.send_replace(to);
        if from != to {
            log_state_transition(from, to);
        }
    }

    fn initialize(self: &Arc<Self>) -> bool {
        let mut lifecycle = self.lock();
        if lifecycle.closed {
            return false;
        }

        let began = self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !began {
            trace!(state = %self.state(), "Initialize ignored, session not disconnected");
            return false;
        }
        log_state_transition(ConnectionState::Disconnected, ConnectionState::Connecting);

        let session = Arc::clone(self);
        let span = crate::session_span!(url = %self.stream_url);
        lifecycle.connect_task = Some(tokio::spawn(
            async move {
                session.run_connect().await;
            }
            .instrument(span),
        ));
        true
    }

    async fn run_connect(self: Arc<Self>) {
        let token = self.credentials.current_token().await;
        debug!(
            url = %self.stream_url,
            authenticated = token.is_some(),
            "Opening session"
        );

        let timeout = self.policy.connect_timeout;
        let result = match tokio::time::timeout(
            timeout,
            self.connector.connect(&self.stream_url, token.as_deref()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout(timeout)),
        };

        match result {
            Ok(channel) => self.on_open(channel),
            Err(error) => self.on_connect_failed(error).await,
        }
    }

    fn on_open(self: &Arc<Self>, channel: Channel) {
        let Channel { outbound, events } = channel;
        let mut lifecycle = self.lock();
        if lifecycle.closed {
            let _ = outbound.try_send(Outbound::normal_close());
            return;
        }

        lifecycle.outbound = Some(outbound);
        lifecycle.auth = AuthState::Ok;
        self.transition(ConnectionState::Connected);
        self.status.set_connected(true);
        self.status.set_auth_error(None);

        let session = Arc::clone(self);
        let span = crate::session_span!(url = %self.stream_url);
        lifecycle.reader_task = Some(tokio::spawn(
            async move {
                session.drain_events(events).await;
            }
            .instrument(span),
        ));
    }

    async fn on_connect_failed(self: &Arc<Self>, error: ConnectError) {
        let class = classify_connect_error(&error);
        {
            let mut lifecycle = self.lock();
            if lifecycle.closed {
                return;
            }
            if class == FailureClass::AuthRejected {
                lifecycle.auth = AuthState::Renewing;
            }
            self.transition(ConnectionState::Disconnected);
        }
        warn!(url = %self.stream_url, error = %error, class = ?class, "Connection attempt failed");
        self.status.record_disconnect(Some(&error.to_string()));

        if class == FailureClass::AuthRejected {
            self.renew_credentials(&error).await;
        } else if let Some(delay) = self.policy.delay_for(class) {
            self.schedule_reconnect(delay);
        }
    }

    async fn renew_credentials(self: &Arc<Self>, cause: &ConnectError) {
        self.status.set_auth_error(Some(&cause.to_string()));

        match self.credentials.renew_token().await {
            Ok(_) => {
                {
                    let mut lifecycle = self.lock();
                    if lifecycle.closed {
                        return;
                    }
                    lifecycle.auth = AuthState::Ok;
                }
                info!("Credentials renewed, reconnecting");
                self.status.set_auth_error(None);
                self.schedule_reconnect(self.policy.after_renewal);
            }
            Err(renew_error) => {
                {
                    let mut lifecycle = self.lock();
                    if lifecycle.closed {
                        return;
                    }
                    lifecycle.auth = AuthState::Blocked;
                }
                error!(error = %renew_error, "Credential renewal failed, re-authentication required");
                self.status.set_auth_error(Some(&format!(
                    "Re-authentication required: {renew_error}"
                )));
            }
        }
    }

    async fn drain_events(self: Arc<Self>, mut events: mpsc::Receiver<ChannelEvent>) {
        let terminal = loop {
            match events.recv().await {
                Some(ChannelEvent::Message(text)) => {
                    trace!(bytes = text.len(), "Server message ignored");
                }
                Some(event) => break event,
                None => break ChannelEvent::Failed("event channel closed".to_string()),
            }
        };
        self.on_channel_terminated(terminal);
    }

    fn on_channel_terminated(self: &Arc<Self>, event: ChannelEvent) {
        let Some(class) = classify_event(&event) else {
            return;
        };
        {
            let mut lifecycle = self.lock();
            if lifecycle.closed {
                return;
            }
            lifecycle.outbound = None;
            self.transition(ConnectionState::Disconnected);
        }

        match &event {
            ChannelEvent::Closed { code, reason } if class == FailureClass::ClientClosed => {
                info!(code, reason = %reason, "Server closed session normally");
                self.status.record_disconnect(None);
            }
            ChannelEvent::Closed { code, reason } => {
                warn!(code, reason = %reason, "Session closed unexpectedly");
                self.status
                    .record_disconnect(Some(&format!("Closed with code {code}: {reason}")));
            }
            ChannelEvent::Failed(detail) => {
                warn!(error = %detail, "Session failed");
                self.status.record_disconnect(Some(detail.as_str()));
            }
            ChannelEvent::Message(_) => {}
        }

        if let Some(delay) = self.policy.delay_for(class) {
            self.schedule_reconnect(delay);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, delay: Duration) {
        let session: Weak<SessionShared> = Arc::downgrade(self);
        let scheduled = self.scheduler.schedule(delay, move || {
            if let Some(session) = session.upgrade() {
                session.attempt_reconnect();
            }
        });
        if scheduled {
            debug!(delay_ms = delay.as_millis() as u64, "Reconnection scheduled");
        }
    }

    /// Timer-driven attempt; a no-op unless still disconnected and not blocked
    fn attempt_reconnect(self: &Arc<Self>) {
        {
            let lifecycle = self.lock();
            if lifecycle.closed || lifecycle.auth != AuthState::Ok {
                return;
            }
        }
        if self.state() != ConnectionState::Disconnected {
            debug!(state = %self.state(), "Skipping reconnection, session not disconnected");
            return;
        }
        self.status.record_reconnect_attempt();
        self.initialize();
    }

    fn on_address_changed(self: &Arc<Self>, change: &AddressChange) -> bool {
        {
            let lifecycle = self.lock();
            if lifecycle.closed
                || lifecycle.auth != AuthState::Ok
                || lifecycle.outbound.is_some()
            {
                return false;
            }
        }
        if self.state() != ConnectionState::Disconnected {
            return false;
        }

        info!(
            previous = %change.previous,
            current = %change.current,
            "Server address changed while disconnected, reconnecting"
        );
        self.scheduler.cancel_pending();
        self.status.record_reconnect_attempt();
        self.initialize()
    }
}

#[async_trait::async_trait]
impl Transport for PersistentSession {
    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }

    async fn start(&self) -> Result<(), TransportError> {
        self.initialize();
        Ok(())
    }

    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        let text = String::from_utf8(payload.to_vec()).map_err(|_| TransportError::InvalidPayload)?;
        self.send_text(text)
    }

    async fn shutdown(&self) {
        PersistentSession::shutdown(self).await;
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn on_address_changed(&self, change: &AddressChange) -> bool {
        self.shared.on_address_changed(change)
    }
}
