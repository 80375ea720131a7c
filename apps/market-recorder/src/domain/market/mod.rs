//! Market Event Types
//!
//! Point-in-time ticker snapshots and order-book/trade events as delivered by
//! the feed. Both are created when an event arrives, persisted immediately
//! and never mutated afterwards.
//!
//! # Event Kinds
//!
//! | Tag               | Kind     | isTrade | isCancelled |
//! |-------------------|----------|---------|-------------|
//! | `orderBookModify` | `Modify` | 0       | 0           |
//! | `orderBookRemove` | `Remove` | 0       | 1           |
//! | `newTrade`        | `Trade`  | 1       | 0           |

mod decode;

pub use decode::{DecodeError, MarketBatch, MarketItem, RawEvent};

// =============================================================================
// Ticker
// =============================================================================

/// Number of positional fields in a ticker event.
pub const TICKER_FIELD_COUNT: usize = 10;

/// One ticker snapshot for a currency pair.
///
/// Field order matches the positional order on the wire and the column order
/// of the `ticker` table.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerSnapshot {
    /// Currency pair code (e.g. `BTC_ETH`).
    pub currency_pair: String,
    /// Last traded price.
    pub last: f64,
    /// Lowest ask.
    pub lowest_ask: f64,
    /// Highest bid.
    pub highest_bid: f64,
    /// Percent change over the last 24 hours.
    pub percent_change: f64,
    /// Base currency volume.
    pub base_volume: f64,
    /// Quote currency volume.
    pub quote_volume: f64,
    /// Whether the market is frozen (0 or 1).
    pub is_frozen: i64,
    /// 24 hour high.
    pub last_day_high: f64,
    /// 24 hour low.
    pub last_day_low: f64,
}

// =============================================================================
// Order Book
// =============================================================================

/// Closed set of order-book event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The amount at a price level changed.
    Modify,
    /// A price level was withdrawn.
    Remove,
    /// A trade executed.
    Trade,
}

impl EventKind {
    /// All kinds, in tag order.
    pub const ALL: [Self; 3] = [Self::Modify, Self::Remove, Self::Trade];

    /// Wire tag, also stored in the `type` column.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Modify => "orderBookModify",
            Self::Remove => "orderBookRemove",
            Self::Trade => "newTrade",
        }
    }

    /// Resolve a wire tag. Returns `None` for unrecognized tags.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Persisted `(isTrade, isCancelled)` flag pair.
    #[must_use]
    pub const fn flags(self) -> (i64, i64) {
        match self {
            Self::Modify => (0, 0),
            Self::Remove => (0, 1),
            Self::Trade => (1, 0),
        }
    }
}

/// Trade-only fields of a `newTrade` event.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeDetails {
    /// Trade date, stored verbatim.
    pub date: String,
    /// Trade total.
    pub total: f64,
    /// Exchange trade identifier.
    pub trade_id: String,
}

/// One order-book or trade event, shaped like an `orderBook` row.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookEvent {
    /// Batch sequence number shared by all events delivered together.
    pub seq: i64,
    /// Market code.
    pub exchange: String,
    /// Event kind.
    pub kind: EventKind,
    /// Price level.
    pub rate: f64,
    /// Amount; always 0 for `Remove`.
    pub amount: f64,
    /// Present only for `Trade`.
    pub trade: Option<TradeDetails>,
}

impl OrderBookEvent {
    /// An order-book level change.
    #[must_use]
    pub fn modified(seq: i64, exchange: impl Into<String>, rate: f64, amount: f64) -> Self {
        Self {
            seq,
            exchange: exchange.into(),
            kind: EventKind::Modify,
            rate,
            amount,
            trade: None,
        }
    }

    /// An order-book level removal. The amount is always 0.
    #[must_use]
    pub fn removed(seq: i64, exchange: impl Into<String>, rate: f64) -> Self {
        Self {
            seq,
            exchange: exchange.into(),
            kind: EventKind::Remove,
            rate,
            amount: 0.0,
            trade: None,
        }
    }

    /// An executed trade.
    #[must_use]
    pub fn trade(
        seq: i64,
        exchange: impl Into<String>,
        rate: f64,
        amount: f64,
        trade: TradeDetails,
    ) -> Self {
        Self {
            seq,
            exchange: exchange.into(),
            kind: EventKind::Trade,
            rate,
            amount,
            trade: Some(trade),
        }
    }

    /// `(isTrade, isCancelled)` for this event.
    #[must_use]
    pub const fn flags(&self) -> (i64, i64) {
        self.kind.flags()
    }

    /// Trade date, or an empty string for non-trade events.
    #[must_use]
    pub fn date(&self) -> &str {
        self.trade.as_ref().map_or("", |t| t.date.as_str())
    }

    /// Trade total, or 0 for non-trade events.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.trade.as_ref().map_or(0.0, |t| t.total)
    }

    /// Trade id, or an empty string for non-trade events.
    #[must_use]
    pub fn trade_id(&self) -> &str {
        self.trade.as_ref().map_or("", |t| t.trade_id.as_str())
    }
}
