//! Signal K telemetry relay
//!
//! Relays position and sensor readings to a Signal K server over either a
//! persistent, authenticated WebSocket session or fire-and-forget UDP
//! datagrams, and recovers from disconnections on its own.
//!
//! # Overview
//!
//! - [`endpoint`] parses user-typed server addresses
//! - [`resolver`] keeps the server host resolved in the background
//! - [`protocol`] turns readings into Signal K delta messages
//! - [`transport`] delivers them, reconnecting the session when needed
//! - [`engine`] ties it together behind `configure`/`start`/`push`/`stop`
//! - [`status`] exposes the transmission status to observers
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use signalk_relay::config::TransportKind;
//! use signalk_relay::engine::{EngineConfig, TelemetryEngine};
//! use signalk_relay::protocol::{LocationReading, Reading};
//!
//! # tokio_test::block_on(async {
//! let mut engine = TelemetryEngine::default();
//! engine.configure(EngineConfig::parse("https://nav.local:3443", TransportKind::Websocket)?)?;
//! engine.start().await?;
//!
//! let fix = LocationReading::new(chrono::Utc::now(), 60.15, 24.95);
//! engine.push(&Reading::Location(fix)).await?;
//!
//! engine.stop().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod credentials;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod resolver;
pub mod status;
pub mod testing;
pub mod transport;

pub use config::{RelayConfig, TransportKind};
pub use endpoint::{ParsedEndpoint, TargetDescriptor};
pub use engine::{EngineConfig, PushOutcome, TelemetryEngine};
pub use error::{RelayError, RelayResult};
pub use protocol::{MessageEncoder, Reading, TelemetryMessage};
pub use status::{StatusBoard, TransmissionStatus};
pub use transport::{Transport, TransportError};
