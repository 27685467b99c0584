//! End-to-end engine tests
//!
//! Datagram delivery uses real loopback sockets; session behaviour uses the
//! scripted connector so the reconnection timers can run on paused time.

use chrono::{TimeZone, Utc};
use serde_json::Value;
use signalk_relay::config::TransportKind;
use signalk_relay::engine::{EngineConfig, PushOutcome, TelemetryEngine};
use signalk_relay::protocol::{LocationReading, Reading, SensorReading};
use signalk_relay::resolver::ResolutionError;
use signalk_relay::status::TransmissionStatus;
use signalk_relay::testing::{MockConnector, MockResolver};
use signalk_relay::transport::session::{ConnectError, Outbound, ReconnectPolicy};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

fn ip(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
}

fn position_fix() -> Reading {
    let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let mut fix = LocationReading::new(ts, 60.15, 24.95);
    fix.speed_mps = Some(3.2);
    Reading::Location(fix)
}

#[tokio::test]
async fn test_datagram_reaches_loopback_listener() {
    let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut engine = TelemetryEngine::default()
        .with_resolver(Arc::new(MockResolver::fixed(IpAddr::V4(Ipv4Addr::LOCALHOST))));
    engine
        .configure(
            EngineConfig::parse("udp-test.local", TransportKind::Udp)
                .unwrap()
                .with_udp_port(port),
        )
        .unwrap();
    engine.start().await.unwrap();

    assert_eq!(engine.push(&position_fix()).await.unwrap(), PushOutcome::Submitted);

    let mut buf = [0u8; 2048];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), listener.recv_from(&mut buf))
        .await
        .expect("datagram should arrive")
        .unwrap();
    let message: Value = serde_json::from_slice(&buf[..len]).unwrap();

    assert_eq!(message["context"], "vessels.self");
    let update = &message["updates"][0];
    assert_eq!(update["timestamp"], "2024-05-01T12:00:00.000Z");
    assert_eq!(update["values"][0]["path"], "navigation.position");
    assert_eq!(update["values"][0]["value"]["latitude"], 60.15);
    assert_eq!(update["values"][1]["path"], "navigation.speedOverGround");

    let status = engine.status();
    assert_eq!(status.messages_sent, 1);
    assert!(status.connected);
    assert_eq!(status.transport, Some(TransportKind::Udp));
    assert_eq!(status.resolved_ip, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));

    engine.stop().await;
    assert_eq!(engine.status(), TransmissionStatus::default());
}

#[tokio::test(start_paused = true)]
async fn test_session_push_is_delivered_as_text() {
    let connector = Arc::new(MockConnector::new());
    let mut engine = TelemetryEngine::default()
        .with_resolver(Arc::new(MockResolver::fixed(ip(10))))
        .with_connector(connector.clone());
    engine
        .configure(EngineConfig::parse("wss://nav.local", TransportKind::Websocket).unwrap())
        .unwrap();
    engine.start().await.unwrap();

    let mut status = engine.subscribe_status();
    status.wait_for(|s| s.connected).await.unwrap();
    assert!(engine.transport_connected());

    let sensors = SensorReading {
        temperature_c: Some(20.0),
        ..SensorReading::empty(Utc::now())
    };
    assert_eq!(
        engine.push(&Reading::Sensors(sensors)).await.unwrap(),
        PushOutcome::Submitted
    );

    let Some(Outbound::Text(text)) = connector.channel(0).unwrap().next_outbound().await else {
        panic!("expected a text frame");
    };
    let message: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        message["updates"][0]["values"][0]["path"],
        "environment.outside.temperature"
    );
    assert_eq!(engine.status().messages_sent, 1);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_push_while_disconnected_is_dropped_not_failed() {
    let connector = Arc::new(MockConnector::scripted(vec![Err(ConnectError::Network(
        "connection refused".to_string(),
    ))]));
    let mut engine = TelemetryEngine::default()
        .with_resolver(Arc::new(MockResolver::fixed(ip(10))))
        .with_connector(connector.clone());
    engine
        .configure(EngineConfig::parse("nav.local", TransportKind::Websocket).unwrap())
        .unwrap();
    engine.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(engine.push(&position_fix()).await.unwrap(), PushOutcome::Dropped);

    let status = engine.status();
    assert_eq!(status.messages_sent, 0);
    assert_eq!(status.send_failures, 1);
    assert!(!status.connected);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_address_change_while_disconnected_reconnects_once() {
    let connector = Arc::new(MockConnector::scripted(vec![Err(ConnectError::Network(
        "no route to host".to_string(),
    ))]));
    let resolver = Arc::new(MockResolver::sequence(vec![Ok(ip(10)), Ok(ip(20))]));
    let policy = ReconnectPolicy {
        after_failure: Duration::from_secs(600),
        ..ReconnectPolicy::default()
    };

    let mut engine = TelemetryEngine::default()
        .with_resolver(resolver.clone())
        .with_connector(connector.clone());
    engine
        .configure(
            EngineConfig::parse("nav.local", TransportKind::Websocket)
                .unwrap()
                .with_dns_refresh(Duration::from_secs(60))
                .with_reconnect_policy(policy),
        )
        .unwrap();
    engine.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(engine.status().resolved_ip, Some(ip(10)));

    tokio::time::sleep(Duration::from_secs(31)).await;
    let mut status = engine.subscribe_status();
    status.wait_for(|s| s.connected).await.unwrap();

    assert_eq!(connector.attempts(), 2);
    let snapshot = engine.status();
    assert_eq!(snapshot.resolved_ip, Some(ip(20)));
    assert_eq!(snapshot.reconnect_attempts, 1);

    // The long failure delay was superseded, and later refreshes see no change
    tokio::time::sleep(Duration::from_secs(700)).await;
    assert_eq!(connector.attempts(), 2);
    assert!(resolver.calls() > 2);

    engine.stop().await;
}

fn lookup_failure() -> ResolutionError {
    ResolutionError::NoAddresses("nav.local".to_string())
}

#[tokio::test(start_paused = true)]
async fn test_late_first_resolution_reaches_status() {
    let connector = Arc::new(MockConnector::new());
    let resolver = Arc::new(MockResolver::sequence(vec![Err(lookup_failure()), Ok(ip(7))]));
    let mut engine = TelemetryEngine::default()
        .with_resolver(resolver.clone())
        .with_connector(connector.clone());
    engine
        .configure(
            EngineConfig::parse("nav.local", TransportKind::Websocket)
                .unwrap()
                .with_dns_refresh(Duration::from_secs(60)),
        )
        .unwrap();
    engine.start().await.unwrap();
    assert_eq!(engine.status().resolved_ip, None);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(engine.status().resolved_ip, Some(ip(7)));

    // A first address is not a change: no reconnection is triggered
    tokio::time::sleep(Duration::from_secs(140)).await;
    let status = engine.status();
    assert_eq!(status.resolved_ip, Some(ip(7)));
    assert_eq!(status.reconnect_attempts, 0);
    assert!(status.connected);
    assert_eq!(connector.attempts(), 1);
    assert!(resolver.calls() >= 4);

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_resolution_failure_after_success_keeps_session_up() {
    let connector = Arc::new(MockConnector::new());
    let resolver = Arc::new(MockResolver::sequence(vec![Ok(ip(10)), Err(lookup_failure())]));
    let mut engine = TelemetryEngine::default()
        .with_resolver(resolver.clone())
        .with_connector(connector.clone());
    engine
        .configure(
            EngineConfig::parse("nav.local", TransportKind::Websocket)
                .unwrap()
                .with_dns_refresh(Duration::from_secs(60)),
        )
        .unwrap();
    engine.start().await.unwrap();

    let mut status = engine.subscribe_status();
    status.wait_for(|s| s.connected).await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(resolver.calls() >= 2);

    let snapshot = engine.status();
    assert!(snapshot.connected);
    assert_eq!(snapshot.resolved_ip, Some(ip(10)));
    assert_eq!(snapshot.last_error, None);
    assert_eq!(connector.attempts(), 1);
    assert!(engine.transport_connected());

    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_silences_background_work() {
    let connector = Arc::new(MockConnector::new());
    let mut engine = TelemetryEngine::default()
        .with_resolver(Arc::new(MockResolver::fixed(ip(10))))
        .with_connector(connector.clone());
    engine
        .configure(
            EngineConfig::parse("nav.local", TransportKind::Websocket)
                .unwrap()
                .with_dns_refresh(Duration::from_secs(5)),
        )
        .unwrap();
    engine.start().await.unwrap();

    let mut status = engine.subscribe_status();
    status.wait_for(|s| s.connected).await.unwrap();
    connector.channel(0).unwrap().close(1006, "").await;
    status.wait_for(|s| !s.connected).await.unwrap();

    engine.stop().await;
    assert!(!engine.is_running());
    assert_eq!(engine.status(), TransmissionStatus::default());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(engine.status(), TransmissionStatus::default());

    // Stopping twice is harmless
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_engine_can_restart_after_stop() {
    let connector = Arc::new(MockConnector::new());
    let mut engine = TelemetryEngine::default()
        .with_resolver(Arc::new(MockResolver::fixed(ip(10))))
        .with_connector(connector.clone());
    engine
        .configure(EngineConfig::parse("nav.local", TransportKind::Websocket).unwrap())
        .unwrap();

    engine.start().await.unwrap();
    engine.stop().await;

    engine
        .configure(EngineConfig::parse("backup.local:3000", TransportKind::Websocket).unwrap())
        .unwrap();
    engine.start().await.unwrap();

    let mut status = engine.subscribe_status();
    status.wait_for(|s| s.connected).await.unwrap();
    assert_eq!(engine.config().unwrap().target.port, 3000);

    engine.stop().await;
}
