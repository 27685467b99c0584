//! Reading to wire-message encoding
//!
//! Every reading becomes exactly one [`TelemetryMessage`]. Absent or
//! non-finite values are left out of the value list instead of being sent as
//! null.

use super::messages::{format_timestamp, PathValue, Position, Source, TelemetryMessage, Update, Value};
use super::readings::{LocationReading, Reading, SensorReading};
use bytes::Bytes;
use thiserror::Error;

pub const PATH_POSITION: &str = "navigation.position";
pub const PATH_SPEED_OVER_GROUND: &str = "navigation.speedOverGround";
pub const PATH_COURSE_OVER_GROUND: &str = "navigation.courseOverGroundTrue";
pub const PATH_ALTITUDE: &str = "navigation.gnss.antennaAltitude";
pub const PATH_FIX_QUALITY: &str = "navigation.gnss.methodQuality";
pub const PATH_HEADING_MAGNETIC: &str = "navigation.headingMagnetic";
pub const PATH_RATE_OF_TURN: &str = "navigation.rateOfTurn";
pub const PATH_PRESSURE: &str = "environment.outside.pressure";
pub const PATH_TEMPERATURE: &str = "environment.outside.temperature";
pub const PATH_HUMIDITY: &str = "environment.outside.relativeHumidity";
pub const PATH_ILLUMINANCE: &str = "environment.outside.illuminance";
pub const PATH_BATTERY: &str = "electrical.batteries.device.capacity.stateOfCharge";

const CELSIUS_TO_KELVIN: f64 = 273.15;
const HECTOPASCAL_TO_PASCAL: f64 = 100.0;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Failed to serialize telemetry message")]
    Serialization(#[from] serde_json::Error),
}

/// Builds and serializes telemetry messages for one context and source
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEncoder {
    context: String,
    source: Source,
}

impl MessageEncoder {
    pub fn new(context: impl Into<String>, source: Source) -> Self {
        Self {
            context: context.into(),
            source,
        }
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    /// Build the message for a reading without serializing it
    pub fn build(&self, reading: &Reading) -> TelemetryMessage {
        let values = match reading {
            Reading::Location(location) => location_values(location),
            Reading::Sensors(sensors) => sensor_values(sensors),
        };

        TelemetryMessage {
            context: self.context.clone(),
            updates: vec![Update {
                source: self.source.clone(),
                timestamp: format_timestamp(&reading.timestamp()),
                values,
            }],
        }
    }

    /// Serialize an already built message
    pub fn encode_message(&self, message: &TelemetryMessage) -> Result<Bytes, EncodeError> {
        Ok(Bytes::from(serde_json::to_vec(message)?))
    }

    /// Build and serialize in one step. An empty value list is still encoded.
    pub fn encode(&self, reading: &Reading) -> Result<Bytes, EncodeError> {
        self.encode_message(&self.build(reading))
    }
}

fn push_number(values: &mut Vec<PathValue>, path: &str, value: Option<f64>) {
    if let Some(number) = value.filter(|v| v.is_finite()) {
        values.push(PathValue::new(path, Value::Number(number)));
    }
}

fn location_values(location: &LocationReading) -> Vec<PathValue> {
    let mut values = Vec::with_capacity(5);

    if location.latitude.is_finite() && location.longitude.is_finite() {
        values.push(PathValue::new(
            PATH_POSITION,
            Value::Position(Position {
                latitude: location.latitude,
                longitude: location.longitude,
            }),
        ));
    }
    push_number(&mut values, PATH_SPEED_OVER_GROUND, location.speed_mps);
    push_number(
        &mut values,
        PATH_COURSE_OVER_GROUND,
        location.course_deg.map(f64::to_radians),
    );
    push_number(&mut values, PATH_ALTITUDE, location.altitude_m);
    if let Some(quality) = location.fix_quality.as_ref().filter(|q| !q.is_empty()) {
        values.push(PathValue::new(PATH_FIX_QUALITY, Value::Text(quality.clone())));
    }

    values
}

fn sensor_values(sensors: &SensorReading) -> Vec<PathValue> {
    let mut values = Vec::with_capacity(7);

    push_number(
        &mut values,
        PATH_HEADING_MAGNETIC,
        sensors.heading_magnetic_deg.map(f64::to_radians),
    );
    push_number(
        &mut values,
        PATH_RATE_OF_TURN,
        sensors.rate_of_turn_dps.map(f64::to_radians),
    );
    push_number(
        &mut values,
        PATH_PRESSURE,
        sensors.pressure_hpa.map(|hpa| hpa * HECTOPASCAL_TO_PASCAL),
    );
    push_number(
        &mut values,
        PATH_TEMPERATURE,
        sensors.temperature_c.map(|c| c + CELSIUS_TO_KELVIN),
    );
    push_number(
        &mut values,
        PATH_HUMIDITY,
        sensors.humidity_percent.map(|p| p / 100.0),
    );
    push_number(&mut values, PATH_ILLUMINANCE, sensors.illuminance_lux);
    push_number(
        &mut values,
        PATH_BATTERY,
        sensors.battery_percent.map(|p| p / 100.0),
    );

    values
}
