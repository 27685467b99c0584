//! Error taxonomy for the telemetry relay
//!
//! Only the explicit, synchronous entry points (`configure`, `start`, `push`)
//! return [`RelayError`]. Background work never surfaces errors to the
//! caller; it records them in the transmission status instead.

use crate::config::ConfigError;
use crate::endpoint::EndpointError;
use crate::protocol::EncodeError;
use crate::resolver::ResolutionError;
use crate::transport::TransportError;
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid server address: {0}")]
    Endpoint(#[from] EndpointError),

    #[error("Engine has not been configured")]
    NotConfigured,

    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Engine is not running")]
    NotRunning,

    #[error("Initial name resolution failed: {0}")]
    FirstContact(#[source] ResolutionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),
}

impl RelayError {
    /// Configuration-class errors are fatal and never worth retrying
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            RelayError::Config(_) | RelayError::Endpoint(_) | RelayError::NotConfigured
        )
    }
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

fn secret_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
    })
}

fn bearer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)bearer\s+\S+").expect("bearer pattern is valid"))
}

/// Sanitize error text before it is exposed through the status observable
///
/// Redacts credentials and caps the length at 500 characters.
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = secret_pattern()
        .replace_all(message, "${1}=***")
        .to_string();
    sanitized = bearer_pattern()
        .replace_all(&sanitized, "Bearer ***")
        .to_string();

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}
