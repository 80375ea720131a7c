//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `EventStore`: append-only sink for ticker snapshots and order-book events

use crate::domain::market::{EventKind, TickerSnapshot, TradeDetails};

/// Errors raised by an [`EventStore`].
///
/// None of these are retried: the dispatcher treats every variant as fatal.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The store could not be opened.
    #[error("failed to open store at {path}: {message}")]
    Open {
        /// Store location.
        path: String,
        /// Underlying cause.
        message: String,
    },

    /// Creating the tables failed.
    #[error("failed to create schema: {0}")]
    Schema(String),

    /// A row insert failed.
    #[error("insert into {table} failed: {message}")]
    Insert {
        /// Target table.
        table: &'static str,
        /// Underlying cause.
        message: String,
    },

    /// Committing an insert failed.
    #[error("commit on {table} failed: {message}")]
    Commit {
        /// Target table.
        table: &'static str,
        /// Underlying cause.
        message: String,
    },

    /// The store refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only store for recorded market events.
///
/// Every call writes exactly one row and makes it durable before returning.
/// Rows are never updated, deleted or deduplicated.
pub trait EventStore: Send + Sync {
    /// Append one ticker snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or its commit fails.
    fn record_ticker_change(&self, ticker: &TickerSnapshot) -> Result<(), PersistenceError>;

    /// Append an order-book level change with flags `(0, 0)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or its commit fails.
    fn record_order_modified(
        &self,
        seq: i64,
        exchange: &str,
        kind: EventKind,
        rate: f64,
        amount: f64,
    ) -> Result<(), PersistenceError>;

    /// Append an order-book level removal with amount 0 and flags `(0, 1)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or its commit fails.
    fn record_order_removed(
        &self,
        seq: i64,
        exchange: &str,
        kind: EventKind,
        rate: f64,
    ) -> Result<(), PersistenceError>;

    /// Append an executed trade with flags `(1, 0)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert or its commit fails.
    fn record_new_trade(
        &self,
        seq: i64,
        exchange: &str,
        kind: EventKind,
        rate: f64,
        amount: f64,
        trade: &TradeDetails,
    ) -> Result<(), PersistenceError>;
}
