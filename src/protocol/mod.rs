//! Telemetry readings, wire messages and the encoder between them
//!
//! The wire format is the Signal K delta: a context, one update with a
//! source and timestamp, and an ordered list of path/value pairs.

pub mod encoder;
pub mod messages;
pub mod readings;

pub use encoder::{EncodeError, MessageEncoder};
pub use messages::*;
pub use readings::*;
