//! Prometheus Metrics Module
//!
//! Exposes recorder metrics in Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Events**: Pub/sub events received, by topic kind
//! - **Rows**: Rows committed to the store, by table
//! - **Drops**: Items discarded during classification, by reason
//! - **Session**: Transport session state and subscription failures
//! - **Latency**: Per-row commit duration
//!
//! # Integration
//!
//! When a port is configured, an HTTP listener serves the text exposition
//! format on that port. Without an installed recorder every helper below is a
//! no-op.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::domain::subscription::Topic;

/// Errors installing the exporter.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The exporter could not be installed.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Install the Prometheus exporter with an HTTP listener on `port`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the listener or the global recorder cannot be installed.
pub fn init_metrics(port: u16) -> Result<SocketAddr, MetricsError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    register_metrics();
    tracing::info!(%addr, "Prometheus metrics exporter started");

    Ok(addr)
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "recorder_events_received_total",
        "Total pub/sub events received"
    );
    describe_counter!(
        "recorder_rows_written_total",
        "Total rows committed to the store"
    );
    describe_counter!(
        "recorder_items_dropped_total",
        "Total items dropped without persistence"
    );
    describe_counter!(
        "recorder_subscription_failures_total",
        "Total topics that failed to subscribe"
    );
    describe_gauge!(
        "recorder_session_state",
        "Transport session state (0 connecting, 1 open, 2 closing, 3 closed)"
    );
    describe_histogram!(
        "recorder_commit_seconds",
        "Time to insert and commit one row"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons an item is dropped instead of persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Tag outside the known set.
    UnrecognizedTag,
    /// Known tag with missing or malformed fields.
    InvalidItem,
    /// Batch without a usable sequence number.
    MissingSeq,
    /// Ticker payload that could not be decoded.
    InvalidTicker,
    /// Event for a subscription id this session does not hold.
    UnknownSubscription,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::UnrecognizedTag => "unrecognized_tag",
            Self::InvalidItem => "invalid_item",
            Self::MissingSeq => "missing_seq",
            Self::InvalidTicker => "invalid_ticker",
            Self::UnknownSubscription => "unknown_subscription",
        }
    }
}

/// Record one event delivered for `topic`.
pub fn record_event_received(topic: &Topic) {
    counter!(
        "recorder_events_received_total",
        "topic_kind" => topic.kind()
    )
    .increment(1);
}

/// Record one committed row and its commit latency.
pub fn record_row_written(table: &'static str, duration: Duration) {
    counter!("recorder_rows_written_total", "table" => table).increment(1);
    histogram!("recorder_commit_seconds", "table" => table).record(duration.as_secs_f64());
}

/// Record `count` dropped items.
pub fn record_items_dropped(reason: DropReason, count: u64) {
    counter!(
        "recorder_items_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(count);
}

/// Record a topic that failed to subscribe.
pub fn record_subscription_failure() {
    counter!("recorder_subscription_failures_total").increment(1);
}

/// Publish the current session state as a numeric gauge.
pub fn set_session_state(ordinal: u8) {
    gauge!("recorder_session_state").set(f64::from(ordinal));
}

// =============================================================================
// Tests
// =============================================================================
