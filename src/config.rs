//! Relay configuration loaded from TOML
//!
//! Secrets never live in the file: credentials are referenced by the name of
//! the environment variable that holds them and resolved at runtime.

use crate::endpoint::{self, ParsedEndpoint, DEFAULT_DATAGRAM_PORT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main relay configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub server: ServerSection,
    #[serde(default)]
    pub stream: StreamSection,
    #[serde(default)]
    pub dns: DnsSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub status: StatusSection,
}

/// Delivery mechanism, chosen once per configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Persistent WebSocket session with reconnection and authentication
    #[default]
    Websocket,
    /// Fire-and-forget datagrams to the server's UDP port
    Udp,
}

/// Server section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Address as typed by the user, with or without scheme, port and path
    pub address: String,
    #[serde(default)]
    pub transport: TransportKind,
    /// Datagram service port (default: 55555)
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,
    /// Environment variable holding a pre-issued bearer token
    pub token_env: Option<String>,
    /// Environment variable holding the login username
    pub username_env: Option<String>,
    /// Environment variable holding the login password
    pub password_env: Option<String>,
}

fn default_udp_port() -> u16 {
    DEFAULT_DATAGRAM_PORT
}

/// Stream section: how messages identify themselves
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamSection {
    #[serde(default = "default_context")]
    pub context: String,
    #[serde(default = "default_source_label")]
    pub source_label: String,
    /// Source `src` field; falls back to the label
    pub source_src: Option<String>,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            context: default_context(),
            source_label: default_source_label(),
            source_src: None,
        }
    }
}

fn default_context() -> String {
    "vessels.self".to_string()
}

fn default_source_label() -> String {
    "signalk-relay".to_string()
}

/// Name resolution section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DnsSection {
    /// Background re-resolution interval in seconds (default: 300 = 5 minutes)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl Default for DnsSection {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    300
}

/// Reconnection delays for the persistent session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_after_renewal_ms")]
    pub after_renewal_ms: u64,
    #[serde(default = "default_after_close_ms")]
    pub after_close_ms: u64,
    #[serde(default = "default_after_failure_ms")]
    pub after_failure_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            after_renewal_ms: default_after_renewal_ms(),
            after_close_ms: default_after_close_ms(),
            after_failure_ms: default_after_failure_ms(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_after_renewal_ms() -> u64 {
    1000
}

fn default_after_close_ms() -> u64 {
    5000
}

fn default_after_failure_ms() -> u64 {
    10000
}

fn default_connect_timeout() -> u64 {
    10
}

/// Status endpoint section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StatusSection {
    /// Port for the HTTP status endpoint; disabled when absent
    pub port: Option<u16>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid server address: {0}")]
    InvalidAddress(#[from] endpoint::EndpointError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RelayConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoint()?;

        if self.stream.context.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "stream.context must not be empty".to_string(),
            ));
        }
        if self.server.udp_port == 0 {
            return Err(ConfigError::InvalidConfig(
                "server.udp_port must be greater than 0".to_string(),
            ));
        }
        if self.dns.refresh_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "dns.refresh_interval_secs must be greater than 0".to_string(),
            ));
        }

        let reconnect = &self.reconnect;
        if reconnect.after_renewal_ms == 0
            || reconnect.after_close_ms == 0
            || reconnect.after_failure_ms == 0
            || reconnect.connect_timeout_secs == 0
        {
            return Err(ConfigError::InvalidConfig(
                "reconnect delays and connect timeout must be greater than 0".to_string(),
            ));
        }

        if self.server.username_env.is_some() != self.server.password_env.is_some() {
            return Err(ConfigError::InvalidConfig(
                "server.username_env and server.password_env must be set together".to_string(),
            ));
        }

        Ok(())
    }

    /// Parse the configured server address
    pub fn endpoint(&self) -> Result<ParsedEndpoint, ConfigError> {
        Ok(endpoint::parse(&self.server.address)?)
    }

    pub fn dns_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.dns.refresh_interval_secs)
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name
            .and_then(|name| std::env::var(name).ok())
            .filter(|value| !value.is_empty())
    }

    /// Get the pre-issued bearer token from its environment variable
    pub fn get_token(&self) -> Option<String> {
        Self::get_env_var_optional(self.server.token_env.as_ref())
    }

    /// Get login username and password from their environment variables
    pub fn get_login(&self) -> Option<(String, String)> {
        let username = Self::get_env_var_optional(self.server.username_env.as_ref())?;
        let password = Self::get_env_var_optional(self.server.password_env.as_ref())?;
        Some((username, password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[server]
address = "https://nav.local:3443"
transport = "websocket"
token_env = "SK_TOKEN"
username_env = "SK_USER"
password_env = "SK_PASS"

[stream]
context = "vessels.urn:mrn:imo:mmsi:230099999"
source_label = "phone"
source_src = "android"

[dns]
refresh_interval_secs = 60

[reconnect]
after_renewal_ms = 500
after_close_ms = 2000
after_failure_ms = 4000
connect_timeout_secs = 3

[status]
port = 9100
"#;

        let config = RelayConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.server.transport, TransportKind::Websocket);
        assert_eq!(config.stream.source_src.as_deref(), Some("android"));
        assert_eq!(config.dns.refresh_interval_secs, 60);
        assert_eq!(config.reconnect.after_close_ms, 2000);
        assert_eq!(config.status.port, Some(9100));
        assert_eq!(config.endpoint().unwrap().target.port, 3443);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = RelayConfig::from_toml_str(
            r#"
[server]
address = "192.168.1.1"
"#,
        )
        .unwrap();

        assert_eq!(config.server.transport, TransportKind::Websocket);
        assert_eq!(config.server.udp_port, 55555);
        assert_eq!(config.stream.context, "vessels.self");
        assert_eq!(config.stream.source_label, "signalk-relay");
        assert_eq!(config.dns_refresh_interval(), Duration::from_secs(300));
        assert_eq!(config.reconnect, ReconnectSection::default());
        assert_eq!(config.reconnect.after_renewal_ms, 1000);
        assert_eq!(config.reconnect.after_close_ms, 5000);
        assert_eq!(config.reconnect.after_failure_ms, 10000);
        assert_eq!(config.status.port, None);
    }

    #[test]
    fn test_udp_transport() {
        let config = RelayConfig::from_toml_str(
            r#"
[server]
address = "nav.local"
transport = "udp"
udp_port = 4123
"#,
        )
        .unwrap();
        assert_eq!(config.server.transport, TransportKind::Udp);
        assert_eq!(config.server.udp_port, 4123);
    }

    #[test]
    fn test_rejected_address() {
        let result = RelayConfig::from_toml_str(
            r#"
[server]
address = "ftp://nav.local"
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = RelayConfig::from_toml_str(
            r#"
[server]
address = "nav.local"

[dns]
refresh_interval_secs = 0
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_login_env_vars_must_pair() {
        let result = RelayConfig::from_toml_str(
            r#"
[server]
address = "nav.local"
username_env = "SK_USER"
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let result = RelayConfig::from_toml_str(
            r#"
[server]
address = "nav.local"
transport = "carrier-pigeon"
"#,
        );
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }
}
