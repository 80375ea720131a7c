#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Recorder - Pub/Sub Market Data Recorder
//!
//! Subscribes to a WAMP v2 market data feed (the `ticker` topic plus one
//! order-book/trade topic per tracked market) over a WebSocket and appends
//! every received event to a local SQLite database.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Event types and payload decoding
//!   - `market`: Ticker snapshots, order-book items, market batches
//!   - `subscription`: Topic naming and subscription order
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: The `EventStore` capability
//!   - `services`: Per-topic event dispatch and log formatting
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `wamp`: WebSocket transport and WAMP subscriber session
//!   - `persistence`: SQLite and in-memory stores
//!   - `config`: Configuration from the environment
//!   - `metrics` / `telemetry`: Prometheus metrics, logging and tracing
//!
//! # Data Flow
//!
//! ```text
//!                                 ┌──► ticker consumer ──┐
//! Router ──► TransportSession ──► PubSubClient            ├──► EventStore
//!                                 └──► BTC_ETH consumer ─┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Event types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

/// Session wiring from configuration to store.
pub mod recorder;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{
    EventKind, MarketBatch, MarketItem, OrderBookEvent, RawEvent, TickerSnapshot, TradeDetails,
};
pub use domain::subscription::Topic;

// Ports and services
pub use application::ports::{EventStore, PersistenceError};
pub use application::services::{DispatchError, EventDispatcher};

// Infrastructure config
pub use infrastructure::config::{ConfigError, RecorderConfig, TransportSettings};

// Stores
pub use infrastructure::persistence::{InMemoryStore, SqliteStore};

// WAMP session
pub use infrastructure::wamp::{
    ConnectError, PubSubClient, SessionEnd, SessionError, SessionState, SubscriptionError,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};

// Recorder
pub use recorder::RecorderError;
