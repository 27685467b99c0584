//! Endpoint resolution for user-supplied server addresses
//!
//! Turns whatever the user typed into the settings field (`192.168.1.1`,
//! `nav.local:3000/signalk`, `wss://boat.example.com`) into a normalized
//! [`TargetDescriptor`]. Only the four schemes the relay can actually talk to
//! are accepted; everything else is a configuration error.

use std::fmt;
use thiserror::Error;
use url::Url;

/// Fixed path of the Signal K streaming endpoint, appended by the persistent session
pub const STREAM_PATH: &str = "/signalk/v1/stream";

/// Fixed path of the Signal K login endpoint used for credential renewal
pub const LOGIN_PATH: &str = "/signalk/v1/auth/login";

/// Service port the datagram transport always targets
pub const DEFAULT_DATAGRAM_PORT: u16 = 55555;

/// Address schemes understood by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plain HTTP, also the default when no scheme is typed
    Http,
    /// HTTP over TLS
    Https,
    /// Plain WebSocket
    Ws,
    /// WebSocket over TLS
    Wss,
}

impl Scheme {
    /// Parse a scheme token, case-insensitively
    pub fn parse(token: &str) -> Result<Self, EndpointError> {
        match token.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            "ws" => Ok(Scheme::Ws),
            "wss" => Ok(Scheme::Wss),
            _ => Err(EndpointError::UnsupportedScheme(token.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Scheme::Https | Scheme::Wss)
    }

    pub fn default_port(&self) -> u16 {
        if self.is_secure() {
            443
        } else {
            80
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized connection target derived from a raw address
///
/// Immutable once built. `port` is always concrete: either what the user gave
/// or the scheme default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetDescriptor {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

/// Result of parsing a raw address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEndpoint {
    pub target: TargetDescriptor,
    /// The user typed a path, query or fragment. Advisory only: the
    /// connection always uses the fixed stream path.
    pub has_extra_path: bool,
}

/// Address parsing failures (configuration class, never retried)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Server address is empty")]
    Empty,
    #[error("Unsupported address scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Address looks like a file path, not a server: {0}")]
    NotAnAddress(String),
    #[error("Malformed server address '{input}': {reason}")]
    Malformed { input: String, reason: String },
    #[error("Server address has no host: {0}")]
    MissingHost(String),
    #[error("Invalid port in server address: {0}")]
    InvalidPort(String),
    #[error("Credentials are not allowed in the server address")]
    EmbeddedCredentials,
}

/// Parse a raw user address into a [`ParsedEndpoint`]
///
/// A missing scheme means `http`. Any scheme other than http, https, ws and
/// wss is rejected.
pub fn parse(raw: &str) -> Result<ParsedEndpoint, EndpointError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EndpointError::Empty);
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(EndpointError::Malformed {
            input: trimmed.to_string(),
            reason: "contains whitespace".to_string(),
        });
    }

    let (scheme, candidate) = match split_scheme(trimmed) {
        Some(token) => (Scheme::parse(token)?, trimmed.to_string()),
        None => {
            if looks_like_path(trimmed) {
                return Err(EndpointError::NotAnAddress(trimmed.to_string()));
            }
            (Scheme::Http, format!("http://{trimmed}"))
        }
    };

    if has_empty_port(&candidate) {
        return Err(EndpointError::InvalidPort(trimmed.to_string()));
    }
    let url = Url::parse(&candidate).map_err(|e| match e {
        url::ParseError::InvalidPort => EndpointError::InvalidPort(trimmed.to_string()),
        other => EndpointError::Malformed {
            input: trimmed.to_string(),
            reason: other.to_string(),
        },
    })?;

    if !url.username().is_empty() || url.password().is_some() {
        return Err(EndpointError::EmbeddedCredentials);
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| EndpointError::MissingHost(trimmed.to_string()))?
        .to_string();

    let port = match url.port() {
        Some(0) => return Err(EndpointError::InvalidPort(trimmed.to_string())),
        Some(port) => port,
        None => scheme.default_port(),
    };

    let has_extra_path = url.path() != "/" || url.query().is_some() || url.fragment().is_some();

    Ok(ParsedEndpoint {
        target: TargetDescriptor {
            scheme,
            host,
            port,
            secure: scheme.is_secure(),
        },
        has_extra_path,
    })
}

/// Extract an explicit scheme token, if the address carries one.
///
/// `host:port` is not a scheme: a colon followed by a digit is a port.
fn split_scheme(input: &str) -> Option<&str> {
    if let Some(idx) = input.find("://") {
        return Some(&input[..idx]);
    }
    let idx = input.find(':')?;
    let (token, rest) = (&input[..idx], &input[idx + 1..]);
    // A dotted name before a bare colon is a host with a bad port
    if token.contains('.') {
        return None;
    }
    let is_token = token
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-'));
    let port_follows = rest.chars().next().is_some_and(|c| c.is_ascii_digit());
    (is_token && !port_follows).then_some(token)
}

/// `http://nav.local:` parses with the scheme default; a colon with no
/// digits after it is a typo, not an omitted port.
fn has_empty_port(candidate: &str) -> bool {
    let rest = candidate.split_once("://").map_or(candidate, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    authority.ends_with(':')
}

fn looks_like_path(input: &str) -> bool {
    input.starts_with('/') || input.starts_with('.') || input.starts_with('~') || input.starts_with('\\')
}

impl TargetDescriptor {
    fn authority(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// WebSocket URL of the telemetry stream endpoint
    pub fn stream_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!(
            "{scheme}://{}{STREAM_PATH}?subscribe=none",
            self.authority()
        )
    }

    /// HTTP URL of the login endpoint
    pub fn login_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}{LOGIN_PATH}", self.authority())
    }
}

impl fmt::Display for TargetDescriptor {
    /// Serialized form; the default port is omitted
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}
