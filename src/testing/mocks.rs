//! Mock implementations for testing
//!
//! Provides mock HostResolver, Connector and CredentialProvider
//! implementations that record how they were called.

use crate::credentials::{CredentialError, CredentialProvider};
use crate::resolver::{HostResolver, ResolutionError};
use crate::transport::session::{Channel, ChannelEvent, ConnectError, Connector, Outbound};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Resolver that replays a fixed sequence; the last entry repeats
#[derive(Debug)]
pub struct MockResolver {
    results: Mutex<VecDeque<Result<IpAddr, ResolutionError>>>,
    last: Mutex<Option<Result<IpAddr, ResolutionError>>>,
    calls: AtomicUsize,
}

impl MockResolver {
    pub fn sequence(results: Vec<Result<IpAddr, ResolutionError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fixed(ip: IpAddr) -> Self {
        Self::sequence(vec![Ok(ip)])
    }

    pub fn failing() -> Self {
        Self::sequence(vec![Err(ResolutionError::NoAddresses("mock".to_string()))])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostResolver for MockResolver {
    async fn resolve(&self, host: &str) -> Result<IpAddr, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = lock(&self.results).pop_front();
        let mut last = lock(&self.last);
        if let Some(result) = next {
            *last = Some(result);
        }
        (*last)
            .clone()
            .unwrap_or_else(|| Err(ResolutionError::NoAddresses(host.to_string())))
    }
}

/// Test-side end of a channel handed out by [`MockConnector`]
#[derive(Debug)]
pub struct MockChannel {
    events: mpsc::Sender<ChannelEvent>,
    outbound: tokio::sync::Mutex<mpsc::Receiver<Outbound>>,
}

impl MockChannel {
    /// Deliver an inbound server message
    pub async fn message(&self, text: &str) {
        let _ = self.events.send(ChannelEvent::Message(text.to_string())).await;
    }

    /// Close from the server side
    pub async fn close(&self, code: u16, reason: &str) {
        let _ = self
            .events
            .send(ChannelEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .await;
    }

    pub async fn fail(&self, detail: &str) {
        let _ = self.events.send(ChannelEvent::Failed(detail.to_string())).await;
    }

    /// Next frame the session queued, or `None` once the session dropped the channel
    pub async fn next_outbound(&self) -> Option<Outbound> {
        self.outbound.lock().await.recv().await
    }
}

/// Connector that follows a script of outcomes; succeeds once the script runs out
#[derive(Debug, Default)]
pub struct MockConnector {
    script: Mutex<VecDeque<Result<(), ConnectError>>>,
    delay: Option<Duration>,
    attempts: AtomicUsize,
    tokens: Mutex<Vec<Option<String>>>,
    channels: Mutex<Vec<Arc<MockChannel>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scripted(outcomes: Vec<Result<(), ConnectError>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    /// Every attempt takes `delay` before resolving
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_outcome(&self, outcome: Result<(), ConnectError>) {
        lock(&self.script).push_back(outcome);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Tokens presented on each attempt, in order
    pub fn tokens(&self) -> Vec<Option<String>> {
        lock(&self.tokens).clone()
    }

    pub fn channels_opened(&self) -> usize {
        lock(&self.channels).len()
    }

    pub fn channel(&self, index: usize) -> Option<Arc<MockChannel>> {
        lock(&self.channels).get(index).cloned()
    }

    pub fn latest_channel(&self) -> Option<Arc<MockChannel>> {
        lock(&self.channels).last().cloned()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _url: &str, token: Option<&str>) -> Result<Channel, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        lock(&self.tokens).push(token.map(str::to_string));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = lock(&self.script).pop_front().unwrap_or(Ok(()));
        outcome?;

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(64);
        lock(&self.channels).push(Arc::new(MockChannel {
            events: events_tx,
            outbound: tokio::sync::Mutex::new(outbound_rx),
        }));

        Ok(Channel {
            outbound: outbound_tx,
            events: events_rx,
        })
    }
}

/// Credential provider with a scripted renewal outcome
#[derive(Debug)]
pub struct MockCredentials {
    token: Mutex<Option<String>>,
    renewal: Mutex<Result<String, CredentialError>>,
    renewals: AtomicUsize,
}

impl MockCredentials {
    pub fn new(token: Option<&str>, renewal: Result<&str, CredentialError>) -> Self {
        Self {
            token: Mutex::new(token.map(str::to_string)),
            renewal: Mutex::new(renewal.map(str::to_string)),
            renewals: AtomicUsize::new(0),
        }
    }

    pub fn renewals(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for MockCredentials {
    async fn current_token(&self) -> Option<String> {
        lock(&self.token).clone()
    }

    async fn renew_token(&self) -> Result<String, CredentialError> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        let outcome = lock(&self.renewal).clone();
        if let Ok(token) = &outcome {
            *lock(&self.token) = Some(token.clone());
        }
        outcome
    }
}
