//! Payload Decoding
//!
//! Turns raw pub/sub event arguments into typed market events. Decoding
//! happens once, at the boundary; downstream code matches on the closed
//! [`MarketItem`] variants instead of re-testing tag strings.
//!
//! The feed transmits decimals as strings (`"0.05"`), so numeric fields accept
//! either JSON numbers or numeric strings.

use serde_json::{Map, Value};

use super::{EventKind, TICKER_FIELD_COUNT, TickerSnapshot, TradeDetails};

/// Keyword argument carrying the batch sequence number.
const SEQ_KEY: &str = "seq";

/// Raw event payload: positional and keyword arguments as delivered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEvent {
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: Map<String, Value>,
}

impl RawEvent {
    /// Create an event from its arguments.
    #[must_use]
    pub const fn new(args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self { args, kwargs }
    }
}

/// Errors decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Wrong number of positional fields.
    #[error("expected {expected} positional fields, got {actual}")]
    WrongArity {
        /// Expected field count.
        expected: usize,
        /// Received field count.
        actual: usize,
    },

    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    /// A field is present but has the wrong type or an unparseable value.
    #[error("invalid value for field `{0}`")]
    InvalidField(&'static str),

    /// An item's `data` is not an object.
    #[error("item data is not an object")]
    DataNotObject,
}

// =============================================================================
// Ticker
// =============================================================================

impl TryFrom<&RawEvent> for TickerSnapshot {
    type Error = DecodeError;

    fn try_from(event: &RawEvent) -> Result<Self, Self::Error> {
        let args = &event.args;
        if args.len() != TICKER_FIELD_COUNT {
            return Err(DecodeError::WrongArity {
                expected: TICKER_FIELD_COUNT,
                actual: args.len(),
            });
        }

        Ok(Self {
            currency_pair: text(&args[0]).ok_or(DecodeError::InvalidField("currencyPair"))?,
            last: number_at(args, 1, "last")?,
            lowest_ask: number_at(args, 2, "lowestAsk")?,
            highest_bid: number_at(args, 3, "highestBid")?,
            percent_change: number_at(args, 4, "percentChange")?,
            base_volume: number_at(args, 5, "baseVolume")?,
            quote_volume: number_at(args, 6, "quoteVolume")?,
            is_frozen: flag(&args[7]).ok_or(DecodeError::InvalidField("isFrozen"))?,
            last_day_high: number_at(args, 8, "lastDayHigh")?,
            last_day_low: number_at(args, 9, "lastDayLow")?,
        })
    }
}

fn number_at(args: &[Value], index: usize, field: &'static str) -> Result<f64, DecodeError> {
    number(&args[index]).ok_or(DecodeError::InvalidField(field))
}

// =============================================================================
// Market Batches
// =============================================================================

/// One decoded item of a market batch.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketItem {
    /// Amount at a price level changed.
    Modify {
        /// Price level.
        rate: f64,
        /// New amount.
        amount: f64,
        /// Book side (`bid`/`ask`), when supplied.
        side: Option<String>,
    },
    /// A price level was withdrawn. Any supplied amount is discarded.
    Remove {
        /// Price level.
        rate: f64,
        /// Book side, when supplied.
        side: Option<String>,
    },
    /// A trade executed.
    Trade {
        /// Trade price.
        rate: f64,
        /// Trade amount.
        amount: f64,
        /// Date, total and trade id.
        details: TradeDetails,
        /// Trade side (`buy`/`sell`), when supplied.
        side: Option<String>,
    },
    /// The tag is not one this recorder knows.
    Unrecognized {
        /// The tag as received.
        tag: String,
    },
    /// The tag is known but a required field is missing or malformed.
    Invalid {
        /// The recognized kind.
        kind: EventKind,
        /// What was wrong.
        error: DecodeError,
    },
}

impl MarketItem {
    /// Decode one `{type, data}` item.
    #[must_use]
    pub fn decode(value: &Value) -> Self {
        let tag = value.get("type").and_then(Value::as_str).unwrap_or_default();

        let Some(kind) = EventKind::from_tag(tag) else {
            return Self::Unrecognized {
                tag: tag.to_string(),
            };
        };

        match decode_item(kind, value.get("data")) {
            Ok(item) => item,
            Err(error) => Self::Invalid { kind, error },
        }
    }

    /// The recognized kind, if any.
    #[must_use]
    pub const fn kind(&self) -> Option<EventKind> {
        match self {
            Self::Modify { .. } => Some(EventKind::Modify),
            Self::Remove { .. } => Some(EventKind::Remove),
            Self::Trade { .. } => Some(EventKind::Trade),
            Self::Invalid { kind, .. } => Some(*kind),
            Self::Unrecognized { .. } => None,
        }
    }
}

fn decode_item(kind: EventKind, data: Option<&Value>) -> Result<MarketItem, DecodeError> {
    let data = data
        .ok_or(DecodeError::MissingField("data"))?
        .as_object()
        .ok_or(DecodeError::DataNotObject)?;

    let side = data.get("type").and_then(text);
    let rate = required_number(data, "rate")?;

    Ok(match kind {
        EventKind::Modify => MarketItem::Modify {
            rate,
            amount: required_number(data, "amount")?,
            side,
        },
        EventKind::Remove => MarketItem::Remove { rate, side },
        EventKind::Trade => MarketItem::Trade {
            rate,
            amount: required_number(data, "amount")?,
            details: TradeDetails {
                date: required_text(data, "date")?,
                total: required_number(data, "total")?,
                trade_id: required_text(data, "tradeID")?,
            },
            side,
        },
    })
}

/// A batch of market items sharing one sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketBatch {
    /// Sequence number shared by every item.
    pub seq: i64,
    /// Items in delivery order.
    pub items: Vec<MarketItem>,
}

impl TryFrom<&RawEvent> for MarketBatch {
    type Error = DecodeError;

    fn try_from(event: &RawEvent) -> Result<Self, Self::Error> {
        let seq = event
            .kwargs
            .get(SEQ_KEY)
            .ok_or(DecodeError::MissingField(SEQ_KEY))?;
        let seq = integer(seq).ok_or(DecodeError::InvalidField(SEQ_KEY))?;

        Ok(Self {
            seq,
            items: event.args.iter().map(MarketItem::decode).collect(),
        })
    }
}

// =============================================================================
// Field Helpers
// =============================================================================

fn required_number(data: &Map<String, Value>, field: &'static str) -> Result<f64, DecodeError> {
    let value = data.get(field).ok_or(DecodeError::MissingField(field))?;
    number(value).ok_or(DecodeError::InvalidField(field))
}

fn required_text(data: &Map<String, Value>, field: &'static str) -> Result<String, DecodeError> {
    let value = data.get(field).ok_or(DecodeError::MissingField(field))?;
    text(value).ok_or(DecodeError::InvalidField(field))
}

/// Finite number, given as JSON number or numeric string.
fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

#[allow(clippy::cast_possible_truncation)]
fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn flag(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(i64::from(*b)),
        other => integer(other),
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
