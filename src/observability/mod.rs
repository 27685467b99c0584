//! Observability: structured logging and the status HTTP endpoint

pub mod logging;
pub mod status_server;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use status_server::StatusServer;

// Span macros for structured logging
pub use logging::{dns_span, engine_span, session_span};
