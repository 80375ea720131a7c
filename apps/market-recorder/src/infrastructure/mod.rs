//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Configuration from environment variables.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Event store adapters (SQLite, in-memory).
pub mod persistence;

/// Console logging and OpenTelemetry tracing integration.
pub mod telemetry;

/// WAMP subscriber over WebSocket.
pub mod wamp;
