//! Persistent session state machine tests
//!
//! Drives the session through scripted connectors and credential providers,
//! using paused tokio time for the reconnection delays.

use signalk_relay::credentials::{CredentialError, NoCredentials};
use signalk_relay::status::StatusBoard;
use signalk_relay::testing::{MockConnector, MockCredentials};
use signalk_relay::transport::session::{
    ConnectError, ConnectionState, PersistentSession, ReconnectPolicy,
};
use std::sync::Arc;
use std::time::Duration;

const URL: &str = "ws://nav.local/signalk/v1/stream?subscribe=none";

async fn wait_for_state(session: &PersistentSession, wanted: ConnectionState) {
    let mut state = session.subscribe_state();
    state.wait_for(|s| *s == wanted).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_initialize_opens_one_channel() {
    for _ in 0..20 {
        let board = StatusBoard::new();
        let connector = Arc::new(MockConnector::new());
        let session = Arc::new(PersistentSession::new(
            URL,
            connector.clone(),
            Arc::new(NoCredentials),
            ReconnectPolicy::default(),
            board.reporter(),
        ));

        let first = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.initialize() }
        });
        let second = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.initialize() }
        });
        let (first, second) = (first.await.unwrap(), second.await.unwrap());

        assert!(first ^ second, "exactly one initialize must win");
        wait_for_state(&session, ConnectionState::Connected).await;
        assert_eq!(connector.channels_opened(), 1);
        assert_eq!(connector.attempts(), 1);

        session.shutdown().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_renewal_stops_automatic_retries() {
    let board = StatusBoard::new();
    let connector = Arc::new(MockConnector::scripted(vec![Err(
        ConnectError::Unauthorized { status: 401 },
    )]));
    let credentials = Arc::new(MockCredentials::new(
        Some("stale"),
        Err(CredentialError::Rejected(401)),
    ));
    let session = PersistentSession::new(
        URL,
        connector.clone(),
        credentials.clone(),
        ReconnectPolicy::default(),
        board.reporter(),
    );

    session.initialize();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(connector.attempts(), 1);
    assert_eq!(credentials.renewals(), 1);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(!session.is_reconnect_pending());

    let status = board.snapshot();
    assert!(!status.connected);
    assert!(status
        .auth_error
        .as_deref()
        .is_some_and(|e| e.contains("Re-authentication required")));
    assert_eq!(status.reconnect_attempts, 0);

    // An explicit initialize is allowed to try again
    assert!(session.initialize());
    wait_for_state(&session, ConnectionState::Connected).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(board.snapshot().auth_error, None);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_successful_renewal_reconnects_quickly_with_fresh_token() {
    let board = StatusBoard::new();
    let connector = Arc::new(MockConnector::scripted(vec![Err(
        ConnectError::Unauthorized { status: 403 },
    )]));
    let credentials = Arc::new(MockCredentials::new(Some("stale"), Ok("fresh")));
    let session = PersistentSession::new(
        URL,
        connector.clone(),
        credentials.clone(),
        ReconnectPolicy::default(),
        board.reporter(),
    );

    session.initialize();
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(board.snapshot().auth_error, None);

    tokio::time::sleep(Duration::from_millis(200)).await;
    wait_for_state(&session, ConnectionState::Connected).await;

    assert_eq!(connector.attempts(), 2);
    assert_eq!(
        connector.tokens(),
        vec![Some("stale".to_string()), Some("fresh".to_string())]
    );
    assert_eq!(board.snapshot().reconnect_attempts, 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_close_reconnects_after_medium_delay() {
    let board = StatusBoard::new();
    let connector = Arc::new(MockConnector::new());
    let session = PersistentSession::new(
        URL,
        connector.clone(),
        Arc::new(NoCredentials),
        ReconnectPolicy::default(),
        board.reporter(),
    );

    session.initialize();
    wait_for_state(&session, ConnectionState::Connected).await;

    let channel = connector.channel(0).unwrap();
    channel.message("{\"updates\":[]}").await;
    channel.close(1001, "going away").await;
    wait_for_state(&session, ConnectionState::Disconnected).await;

    let status = board.snapshot();
    assert!(!status.connected);
    assert!(status.last_error.as_deref().is_some_and(|e| e.contains("1001")));
    assert!(session.is_reconnect_pending());

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(connector.attempts(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    wait_for_state(&session, ConnectionState::Connected).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(board.snapshot().reconnect_attempts, 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_retries_after_long_delay() {
    let board = StatusBoard::new();
    let connector = Arc::new(MockConnector::scripted(vec![Err(ConnectError::Network(
        "connection refused".to_string(),
    ))]));
    let session = PersistentSession::new(
        URL,
        connector.clone(),
        Arc::new(NoCredentials),
        ReconnectPolicy::default(),
        board.reporter(),
    );

    session.initialize();
    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(session.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(2)).await;
    wait_for_state(&session, ConnectionState::Connected).await;
    assert_eq!(connector.attempts(), 2);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_counts_as_network_failure() {
    let board = StatusBoard::new();
    let connector = Arc::new(MockConnector::new().with_delay(Duration::from_secs(60)));
    let session = PersistentSession::new(
        URL,
        connector.clone(),
        Arc::new(NoCredentials),
        ReconnectPolicy::default(),
        board.reporter(),
    );

    session.initialize();
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(board
        .snapshot()
        .last_error
        .as_deref()
        .is_some_and(|e| e.contains("timed out")));
    assert!(session.is_reconnect_pending());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_normal_server_close_does_not_reconnect() {
    let board = StatusBoard::new();
    let connector = Arc::new(MockConnector::new());
    let session = PersistentSession::new(
        URL,
        connector.clone(),
        Arc::new(NoCredentials),
        ReconnectPolicy::default(),
        board.reporter(),
    );

    session.initialize();
    wait_for_state(&session, ConnectionState::Connected).await;
    connector.channel(0).unwrap().close(1000, "bye").await;
    wait_for_state(&session, ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(!session.is_reconnect_pending());
    assert_eq!(board.snapshot().last_error, None);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_reconnection() {
    let board = StatusBoard::new();
    let connector = Arc::new(MockConnector::new());
    let session = PersistentSession::new(
        URL,
        connector.clone(),
        Arc::new(NoCredentials),
        ReconnectPolicy::default(),
        board.reporter(),
    );

    session.initialize();
    wait_for_state(&session, ConnectionState::Connected).await;
    connector.channel(0).unwrap().fail("connection reset").await;
    wait_for_state(&session, ConnectionState::Disconnected).await;
    assert!(session.is_reconnect_pending());

    session.shutdown().await;
    let after_shutdown = board.snapshot();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(board.snapshot(), after_shutdown);
    assert!(!session.initialize());
}
