//! Testing utilities and mock implementations
//!
//! Scripted resolvers, connectors and credential providers for exercising the
//! engine without a network or a server.

pub mod mocks;

pub use mocks::*;
