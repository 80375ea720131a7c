//! Event Dispatcher
//!
//! Classifies decoded pub/sub events and routes them to the [`EventStore`].
//!
//! Each subscribed topic gets its own dispatcher consuming a dedicated
//! channel, so events of one topic are handled strictly in arrival order.
//! Ticker and market topics are independent of one another.
//!
//! # Containment
//!
//! Payloads that cannot be classified (unrecognized tags, missing fields,
//! batches without `seq`, malformed tickers) are logged and dropped. Only a
//! failed write is fatal: it cancels the shared fatal token, and every
//! consumer watching that token stops without taking further events.

use std::fmt::Write as _;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{EventStore, PersistenceError};
use crate::domain::market::{EventKind, MarketBatch, MarketItem, RawEvent, TickerSnapshot};
use crate::domain::subscription::Topic;
use crate::infrastructure::metrics::{self, DropReason};

/// Errors that end a dispatcher loop.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A write to the store failed.
    #[error("persisting event for topic {topic} failed: {source}")]
    Persistence {
        /// Topic whose event could not be written.
        topic: String,
        /// Underlying store error.
        #[source]
        source: PersistenceError,
    },
}

// =============================================================================
// Ticker Handler
// =============================================================================

/// Handles `ticker` events: one complete snapshot per event.
pub struct TickerHandler {
    store: Arc<dyn EventStore>,
}

impl TickerHandler {
    /// Create a handler writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Log and persist one ticker event.
    ///
    /// Returns the recorded snapshot, or `None` if the payload was dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    pub fn handle(&self, event: &RawEvent) -> Result<Option<TickerSnapshot>, PersistenceError> {
        let ticker = match TickerSnapshot::try_from(event) {
            Ok(ticker) => ticker,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed ticker event");
                metrics::record_items_dropped(DropReason::InvalidTicker, 1);
                return Ok(None);
            }
        };

        tracing::info!(
            currency_pair = %ticker.currency_pair,
            "{}",
            ticker_status_block(&ticker)
        );
        self.store.record_ticker_change(&ticker)?;

        Ok(Some(ticker))
    }
}

/// Human-readable multi-line summary of a snapshot.
#[must_use]
pub fn ticker_status_block(ticker: &TickerSnapshot) -> String {
    format!(
        "Ticker event received for currency pair {}:\n\
         - Last:           {}\n\
         - Lowest ask:     {}\n\
         - Highest bid:    {}\n\
         - Percent change: {}\n\
         - Base volume:    {}\n\
         - Quote volume:   {}\n\
         - Is frozen?      {}\n\
         - 24 hour high:   {}\n\
         - 24 hour low:    {}",
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
    )
}

// =============================================================================
// Market Handler
// =============================================================================

/// Outcome of one market batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Batch sequence number.
    pub seq: i64,
    /// Items written to the store.
    pub persisted: usize,
    /// Items logged and dropped.
    pub dropped: usize,
    /// One log line per item, in batch order.
    pub lines: Vec<String>,
}

/// Handles order-book and trade batches for one market.
pub struct MarketHandler {
    exchange: String,
    store: Arc<dyn EventStore>,
}

impl MarketHandler {
    /// Create a handler for the market `exchange`.
    #[must_use]
    pub fn new(exchange: impl Into<String>, store: Arc<dyn EventStore>) -> Self {
        Self {
            exchange: exchange.into(),
            store,
        }
    }

    /// Persist every item of a batch in order, then emit all log lines at once.
    ///
    /// Returns `None` when the batch carries no usable `seq`.
    ///
    /// # Errors
    ///
    /// Returns the first store error. Items after the failing one are not
    /// written.
    pub fn handle(&self, event: &RawEvent) -> Result<Option<BatchReport>, PersistenceError> {
        let batch = match MarketBatch::try_from(event) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(
                    exchange = %self.exchange,
                    items = event.args.len(),
                    error = %e,
                    "Dropping market batch without sequence number"
                );
                metrics::record_items_dropped(DropReason::MissingSeq, event.args.len() as u64);
                return Ok(None);
            }
        };

        let mut report = BatchReport {
            seq: batch.seq,
            persisted: 0,
            dropped: 0,
            lines: Vec::with_capacity(batch.items.len()),
        };

        for item in &batch.items {
            let line = self.apply(batch.seq, item)?;
            if item_is_persisted(item) {
                report.persisted += 1;
            } else {
                report.dropped += 1;
            }
            report.lines.push(line);
        }

        if !report.lines.is_empty() {
            tracing::info!(
                exchange = %self.exchange,
                seq = batch.seq,
                persisted = report.persisted,
                dropped = report.dropped,
                "{}",
                report.lines.join("\n")
            );
        }

        Ok(Some(report))
    }

    /// Write one item and return its log line.
    fn apply(&self, seq: i64, item: &MarketItem) -> Result<String, PersistenceError> {
        let mut line = format!("[Exchange: {}, seq: {seq}] ", self.exchange);

        match item {
            MarketItem::Modify { rate, amount, side } => {
                self.store
                    .record_order_modified(seq, &self.exchange, EventKind::Modify, *rate, *amount)?;
                let _ = write!(
                    line,
                    "{} at rate {rate} now at amount {amount}",
                    side_label(side.as_deref())
                );
            }
            MarketItem::Remove { rate, side } => {
                self.store
                    .record_order_removed(seq, &self.exchange, EventKind::Remove, *rate)?;
                let _ = write!(
                    line,
                    "{} at rate {rate} has been withdrawn",
                    side_label(side.as_deref())
                );
            }
            MarketItem::Trade {
                rate,
                amount,
                details,
                side,
            } => {
                self.store.record_new_trade(
                    seq,
                    &self.exchange,
                    EventKind::Trade,
                    *rate,
                    *amount,
                    details,
                )?;
                let _ = write!(
                    line,
                    "{} trade completed at rate {rate} for amount {amount} \
                     (date: {}, total: {}, trade ID: {})",
                    side_label(side.as_deref()),
                    details.date,
                    details.total,
                    details.trade_id
                );
            }
            MarketItem::Unrecognized { tag } => {
                tracing::debug!(exchange = %self.exchange, seq, tag = %tag, "Unrecognized event tag");
                metrics::record_items_dropped(DropReason::UnrecognizedTag, 1);
                let _ = write!(line, "Unexpected type {tag}");
            }
            MarketItem::Invalid { kind, error } => {
                tracing::warn!(
                    exchange = %self.exchange,
                    seq,
                    tag = kind.tag(),
                    error = %error,
                    "Dropping malformed market item"
                );
                metrics::record_items_dropped(DropReason::InvalidItem, 1);
                let _ = write!(line, "Malformed {} item: {error}", kind.tag());
            }
        }

        Ok(line)
    }
}

const fn item_is_persisted(item: &MarketItem) -> bool {
    matches!(
        item,
        MarketItem::Modify { .. } | MarketItem::Remove { .. } | MarketItem::Trade { .. }
    )
}

fn side_label(side: Option<&str>) -> &str {
    side.unwrap_or("order")
}

// =============================================================================
// Dispatcher
// =============================================================================

enum TopicHandler {
    Ticker(TickerHandler),
    Market(MarketHandler),
}

/// Consumer for one topic's event channel.
pub struct EventDispatcher {
    topic: Topic,
    handler: TopicHandler,
}

impl EventDispatcher {
    /// Select the handler class for `topic`.
    #[must_use]
    pub fn for_topic(topic: Topic, store: Arc<dyn EventStore>) -> Self {
        let handler = match &topic {
            Topic::Ticker => TopicHandler::Ticker(TickerHandler::new(store)),
            Topic::Market(code) => TopicHandler::Market(MarketHandler::new(code.clone(), store)),
        };
        Self { topic, handler }
    }

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects a write.
    pub fn dispatch(&self, event: &RawEvent) -> Result<(), DispatchError> {
        metrics::record_event_received(&self.topic);

        let result = match &self.handler {
            TopicHandler::Ticker(handler) => handler.handle(event).map(|_| ()),
            TopicHandler::Market(handler) => handler.handle(event).map(|_| ()),
        };

        result.map_err(|source| DispatchError::Persistence {
            topic: self.topic.to_string(),
            source,
        })
    }

    /// Consume events until the channel closes or `fatal` is cancelled.
    ///
    /// A failed write cancels `fatal`, so consumers sharing the token stop
    /// too; events still buffered in their channels are never written.
    /// Returns the number of events handled.
    ///
    /// # Errors
    ///
    /// Stops at the first failed write and returns it.
    pub async fn run(
        self,
        mut events: mpsc::Receiver<RawEvent>,
        fatal: &CancellationToken,
    ) -> Result<u64, DispatchError> {
        let mut handled = 0_u64;

        loop {
            let event = tokio::select! {
                biased;
                () = fatal.cancelled() => {
                    tracing::debug!(topic = %self.topic, handled, "Consumer stopped by fatal error");
                    return Ok(handled);
                }
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };

            if let Err(e) = self.dispatch(&event) {
                fatal.cancel();
                return Err(e);
            }
            handled += 1;
        }

        tracing::debug!(topic = %self.topic, handled, "Event channel closed");
        Ok(handled)
    }
}
