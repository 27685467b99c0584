//! Wire message types for the Signal K delta format
//!
//! One [`TelemetryMessage`] is sent per reading. Field order is fixed by the
//! struct layout, so serialization is deterministic.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A delta message as sent to the server
///
/// # Examples
/// ```
/// use signalk_relay::protocol::{PathValue, Source, TelemetryMessage, Update, Value};
///
/// let message = TelemetryMessage {
///     context: "vessels.self".to_string(),
///     updates: vec![Update {
///         source: Source::new("phone"),
///         timestamp: "2024-05-01T12:00:00.000Z".to_string(),
///         values: vec![PathValue::new("navigation.speedOverGround", Value::Number(3.2))],
///     }],
/// };
/// assert_eq!(message.value_count(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryMessage {
    /// Context identifier, e.g. `vessels.self`
    pub context: String,
    /// Always exactly one update per message
    pub updates: Vec<Update>,
}

impl TelemetryMessage {
    pub fn value_count(&self) -> usize {
        self.updates.iter().map(|u| u.values.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.value_count() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Update {
    pub source: Source,
    /// ISO-8601, millisecond precision, `Z` suffix
    pub timestamp: String,
    pub values: Vec<PathValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub label: String,
    pub src: String,
}

impl Source {
    /// Source whose `src` repeats the label
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            src: label.clone(),
            label,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathValue {
    pub path: String,
    pub value: Value,
}

impl PathValue {
    pub fn new(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

/// Value carried by a path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Position(Position),
    Number(f64),
    Text(String),
}

/// Two-component position in decimal degrees
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// Format a timestamp the way the server expects: `2024-05-01T12:00:00.000Z`
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
