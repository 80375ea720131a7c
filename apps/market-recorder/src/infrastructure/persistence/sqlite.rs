//! SQLite Event Store
//!
//! The default [`EventStore`]: one embedded database file holding the
//! `ticker` history and the unified `orderBook` log. Each call inserts a
//! single row inside its own transaction and commits before returning.

use std::path::Path;
use std::time::Instant;

use parking_lot::Mutex;
use rusqlite::{Connection, params};

use crate::application::ports::{EventStore, PersistenceError};
use crate::domain::market::{EventKind, TickerSnapshot, TradeDetails};
use crate::infrastructure::metrics;

/// Ticker history table name.
pub const TICKER_TABLE: &str = "ticker";

/// Order-book and trade log table name.
pub const ORDER_BOOK_TABLE: &str = "orderBook";

const TICKER_TABLE_DEF: &str = "
CREATE TABLE IF NOT EXISTS ticker (
  currencyPair text,
  last real,
  lowestAsk real,
  highestBid real,
  percentChange real,
  baseVolume real,
  quoteVolume real,
  isFrozen integer,
  lastDayHigh real,
  lastDayLow real
)";

const ORDER_BOOK_TABLE_DEF: &str = "
CREATE TABLE IF NOT EXISTS orderBook (
  seq integer,
  exchange text,
  type text,
  rate real,
  amount real,
  date text,
  total real,
  tradeID text,
  isTrade integer,
  isCancelled integer
)";

const INSERT_TICKER: &str = "
INSERT INTO ticker
  (currencyPair, last, lowestAsk, highestBid, percentChange, baseVolume, quoteVolume,
   isFrozen, lastDayHigh, lastDayLow)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

const INSERT_ORDER_BOOK: &str = "
INSERT INTO orderBook
  (seq, exchange, type, rate, amount, date, total, tradeID, isTrade, isCancelled)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

/// One `orderBook` row, in column order.
struct OrderBookRow<'a> {
    seq: i64,
    exchange: &'a str,
    kind: EventKind,
    rate: f64,
    amount: f64,
    date: &'a str,
    total: f64,
    trade_id: &'a str,
    flags: (i64, i64),
}

/// SQLite-backed append-only store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database file and ensure both tables exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema cannot be
    /// created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| PersistenceError::Open {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        tracing::info!(path = %path.display(), "Opened event store");
        Self::with_connection(conn)
    }

    /// Open a private in-memory database with the same schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory().map_err(|e| PersistenceError::Open {
            path: ":memory:".to_string(),
            message: e.to_string(),
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self, PersistenceError> {
        let tx = conn
            .transaction()
            .map_err(|e| PersistenceError::Schema(e.to_string()))?;
        for ddl in [ORDER_BOOK_TABLE_DEF, TICKER_TABLE_DEF] {
            tx.execute(ddl, [])
                .map_err(|e| PersistenceError::Schema(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| PersistenceError::Schema(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert one row and commit it.
    fn append(
        &self,
        table: &'static str,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<(), PersistenceError> {
        let started = Instant::now();
        let mut conn = self.conn.lock();

        let tx = conn.transaction().map_err(|e| PersistenceError::Insert {
            table,
            message: e.to_string(),
        })?;
        tx.execute(sql, params)
            .map_err(|e| PersistenceError::Insert {
                table,
                message: e.to_string(),
            })?;
        tx.commit().map_err(|e| PersistenceError::Commit {
            table,
            message: e.to_string(),
        })?;
        drop(conn);

        metrics::record_row_written(table, started.elapsed());
        Ok(())
    }

    fn append_order_book(&self, row: &OrderBookRow<'_>) -> Result<(), PersistenceError> {
        self.append(
            ORDER_BOOK_TABLE,
            INSERT_ORDER_BOOK,
            params![
                row.seq,
                row.exchange,
                row.kind.tag(),
                row.rate,
                row.amount,
                row.date,
                row.total,
                row.trade_id,
                row.flags.0,
                row.flags.1,
            ],
        )
    }

    /// Run a read-only query against the locked connection.
    #[cfg(test)]
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        f(&self.conn.lock())
    }
}

impl EventStore for SqliteStore {
    fn record_ticker_change(&self, ticker: &TickerSnapshot) -> Result<(), PersistenceError> {
        self.append(
            TICKER_TABLE,
            INSERT_TICKER,
            params![
                ticker.currency_pair,
                ticker.last,
                ticker.lowest_ask,
                ticker.highest_bid,
                ticker.percent_change,
                ticker.base_volume,
                ticker.quote_volume,
                ticker.is_frozen,
                ticker.last_day_high,
                ticker.last_day_low,
            ],
        )
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
        self.append_order_book(&OrderBookRow {
            seq,
            exchange,
            kind,
            rate,
            amount,
            date: "",
            total: 0.0,
            trade_id: "",
            flags: kind.flags(),
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
        self.append_order_book(&OrderBookRow {
            seq,
            exchange,
            kind,
            rate,
            amount: 0.0,
            date: "",
            total: 0.0,
            trade_id: "",
            flags: kind.flags(),
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
        self.append_order_book(&OrderBookRow {
            seq,
            exchange,
            kind,
            rate,
            amount,
            date: &trade.date,
            total: trade.total,
            trade_id: &trade.trade_id,
            flags: kind.flags(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type OrderBookTuple = (i64, String, String, f64, f64, String, f64, String, i64, i64);

    fn order_book_rows(store: &SqliteStore) -> Vec<OrderBookTuple> {
        store.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT seq, exchange, type, rate, amount, date, total, tradeID, isTrade, isCancelled \
                     FROM orderBook ORDER BY rowid",
                )
                .unwrap();
            stmt.query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                ))
            })
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
        })
    }

    fn count(store: &SqliteStore, table: &str) -> i64 {
        store.with_conn(|conn| {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .unwrap()
        })
    }

    fn scenario_ticker() -> TickerSnapshot {
        TickerSnapshot {
            currency_pair: "BTC_ETH".to_string(),
            last: 0.05,
            lowest_ask: 0.051,
            highest_bid: 0.049,
            percent_change: 0.01,
            base_volume: 100.0,
            quote_volume: 2000.0,
            is_frozen: 0,
            last_day_high: 0.06,
            last_day_low: 0.04,
        }
    }

    #[test]
    fn ticker_row_holds_all_ten_fields() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.record_ticker_change(&scenario_ticker()).unwrap();

        let row: (String, f64, f64, f64, f64, f64, f64, i64, f64, f64) = store.with_conn(|conn| {
            conn.query_row("SELECT * FROM ticker", [], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                ))
            })
            .unwrap()
        });

        assert_eq!(
            row,
            (
                "BTC_ETH".to_string(),
                0.05,
                0.051,
                0.049,
                0.01,
                100.0,
                2000.0,
                0,
                0.06,
                0.04
            )
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "record_new_trade called with Modify")]
    fn mismatched_kind_is_caught_before_writing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let trade = TradeDetails {
            date: "2024-01-01".to_string(),
            total: 0.1,
            trade_id: "t1".to_string(),
        };
        let _ = store.record_new_trade(8, "BTC_ETH", EventKind::Modify, 0.05, 2.0, &trade);
    }

    #[test]
    fn order_book_rows_carry_kind_flags() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .record_order_modified(7, "BTC_ETH", EventKind::Modify, 0.05, 10.0)
            .unwrap();
        store
            .record_order_removed(7, "BTC_ETH", EventKind::Remove, 0.04)
            .unwrap();
        store
            .record_new_trade(
                8,
                "BTC_ETH",
                EventKind::Trade,
                0.05,
                2.0,
                &TradeDetails {
                    date: "2024-01-01".to_string(),
                    total: 0.1,
                    trade_id: "t1".to_string(),
                },
            )
            .unwrap();

        let rows = order_book_rows(&store);
        assert_eq!(
            rows,
            vec![
                (
                    7,
                    "BTC_ETH".to_string(),
                    "orderBookModify".to_string(),
                    0.05,
                    10.0,
                    String::new(),
                    0.0,
                    String::new(),
                    0,
                    0
                ),
                (
                    7,
                    "BTC_ETH".to_string(),
                    "orderBookRemove".to_string(),
                    0.04,
                    0.0,
                    String::new(),
                    0.0,
                    String::new(),
                    0,
                    1
                ),
                (
                    8,
                    "BTC_ETH".to_string(),
                    "newTrade".to_string(),
                    0.05,
                    2.0,
                    "2024-01-01".to_string(),
                    0.1,
                    "t1".to_string(),
                    1,
                    0
                ),
            ]
        );
    }

    #[test]
    fn identical_writes_are_not_deduplicated() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.record_ticker_change(&scenario_ticker()).unwrap();
        store.record_ticker_change(&scenario_ticker()).unwrap();
        assert_eq!(count(&store, "ticker"), 2);
    }

    #[test]
    fn reopening_keeps_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recorder.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .record_order_removed(1, "BTC_ETH", EventKind::Remove, 0.5)
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(count(&store, "orderBook"), 1);
        assert_eq!(count(&store, "ticker"), 0);
    }

    #[test]
    fn open_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("recorder.db");
        assert!(matches!(
            SqliteStore::open(&path),
            Err(PersistenceError::Open { .. })
        ));
    }
}
