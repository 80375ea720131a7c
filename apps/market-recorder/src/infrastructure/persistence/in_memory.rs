//! In-memory event store for testing.

use parking_lot::Mutex;

use crate::application::ports::{EventStore, PersistenceError};
use crate::domain::market::{EventKind, OrderBookEvent, TickerSnapshot, TradeDetails};

#[derive(Debug, Default)]
struct Rows {
    tickers: Vec<TickerSnapshot>,
    order_book: Vec<OrderBookEvent>,
    writes: usize,
}

/// In-memory implementation of [`EventStore`].
///
/// Suitable for testing. Optionally fails every write after a fixed number of
/// successful ones, to exercise fatal persistence paths.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: Mutex<Rows>,
    fail_after: Option<usize>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that accepts `writes` rows and rejects every later one.
    #[must_use]
    pub fn failing_after(writes: usize) -> Self {
        Self {
            rows: Mutex::new(Rows::default()),
            fail_after: Some(writes),
        }
    }

    /// Recorded ticker snapshots, in write order.
    #[must_use]
    pub fn tickers(&self) -> Vec<TickerSnapshot> {
        self.rows.lock().tickers.clone()
    }

    /// Recorded order-book rows, in write order.
    #[must_use]
    pub fn order_book(&self) -> Vec<OrderBookEvent> {
        self.rows.lock().order_book.clone()
    }

    /// Total rows across both tables.
    #[must_use]
    pub fn len(&self) -> usize {
        let rows = self.rows.lock();
        rows.tickers.len() + rows.order_book.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self, apply: impl FnOnce(&mut Rows)) -> Result<(), PersistenceError> {
        let mut rows = self.rows.lock();
        if self.fail_after.is_some_and(|limit| rows.writes >= limit) {
            return Err(PersistenceError::Unavailable(
                "write limit reached".to_string(),
            ));
        }
        rows.writes += 1;
        apply(&mut rows);
        drop(rows);
        Ok(())
    }
}

impl EventStore for InMemoryStore {
    fn record_ticker_change(&self, ticker: &TickerSnapshot) -> Result<(), PersistenceError> {
        self.write(|rows| rows.tickers.push(ticker.clone()))
    }

    fn record_order_modified(
        &self,
        seq: i64,
        exchange: &str,
        kind: EventKind,
        rate: f64,
        amount: f64,
    ) -> Result<(), PersistenceError> {
        debug_assert_eq!(kind, EventKind::Modify, "record_order_modified called with {kind:?}");
        self.write(|rows| {
            rows.order_book.push(OrderBookEvent {
                kind,
                ..OrderBookEvent::modified(seq, exchange, rate, amount)
            });
        })
    }

    fn record_order_removed(
        &self,
        seq: i64,
        exchange: &str,
        kind: EventKind,
        rate: f64,
    ) -> Result<(), PersistenceError> {
        debug_assert_eq!(kind, EventKind::Remove, "record_order_removed called with {kind:?}");
        self.write(|rows| {
            rows.order_book.push(OrderBookEvent {
                kind,
                ..OrderBookEvent::removed(seq, exchange, rate)
            });
        })
    }

    fn record_new_trade(
        &self,
        seq: i64,
        exchange: &str,
        kind: EventKind,
        rate: f64,
        amount: f64,
        trade: &TradeDetails,
    ) -> Result<(), PersistenceError> {
        debug_assert_eq!(kind, EventKind::Trade, "record_new_trade called with {kind:?}");
        self.write(|rows| {
            rows.order_book.push(OrderBookEvent {
                kind,
                ..OrderBookEvent::trade(seq, exchange, rate, amount, trade.clone())
            });
        })
    }
}
