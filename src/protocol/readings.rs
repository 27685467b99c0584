//! Telemetry readings pushed into the engine
//!
//! Readings carry device-native units (degrees, hectopascals, degrees
//! Celsius, percent). The encoder converts them to SI units on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One sample produced outside the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reading {
    Location(LocationReading),
    Sensors(SensorReading),
}

impl Reading {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Reading::Location(location) => location.timestamp,
            Reading::Sensors(sensors) => sensors.timestamp,
        }
    }
}

/// A position fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationReading {
    pub timestamp: DateTime<Utc>,
    /// Decimal degrees
    pub latitude: f64,
    /// Decimal degrees
    pub longitude: f64,
    /// Meters per second
    #[serde(default)]
    pub speed_mps: Option<f64>,
    /// True course, degrees
    #[serde(default)]
    pub course_deg: Option<f64>,
    /// Meters above the ellipsoid
    #[serde(default)]
    pub altitude_m: Option<f64>,
    /// Free-form fix description, e.g. "GNSS Fix"
    #[serde(default)]
    pub fix_quality: Option<String>,
}

impl LocationReading {
    pub fn new(timestamp: DateTime<Utc>, latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            speed_mps: None,
            course_deg: None,
            altitude_m: None,
            fix_quality: None,
        }
    }
}

/// A batch of device and environmental sensor values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    /// Magnetic heading, degrees
    #[serde(default)]
    pub heading_magnetic_deg: Option<f64>,
    /// Degrees per second
    #[serde(default)]
    pub rate_of_turn_dps: Option<f64>,
    /// Hectopascals
    #[serde(default)]
    pub pressure_hpa: Option<f64>,
    /// Degrees Celsius
    #[serde(default)]
    pub temperature_c: Option<f64>,
    /// Percent, 0-100
    #[serde(default)]
    pub humidity_percent: Option<f64>,
    #[serde(default)]
    pub illuminance_lux: Option<f64>,
    /// Percent, 0-100
    #[serde(default)]
    pub battery_percent: Option<f64>,
}

impl SensorReading {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }
}
