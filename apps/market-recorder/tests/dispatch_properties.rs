//! Property tests for market batch dispatch.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;

use market_recorder::application::services::{MarketHandler, TickerHandler};
use market_recorder::{EventKind, InMemoryStore, RawEvent, TickerSnapshot};
use proptest::prelude::*;
use serde_json::{Map, Value, json};

#[derive(Debug, Clone)]
enum Item {
    Known(EventKind, f64, f64),
    Unknown(String),
}

impl Item {
    fn to_json(&self, index: usize) -> Value {
        match self {
            Self::Known(EventKind::Trade, rate, amount) => json!({
                "type": "newTrade",
                "data": {
                    "rate": rate,
                    "amount": amount,
                    "date": "2024-01-01 00:00:00",
                    "total": rate * amount,
                    "tradeID": index,
                    "type": "sell"
                }
            }),
            Self::Known(kind, rate, amount) => json!({
                "type": kind.tag(),
                "data": {"rate": rate.to_string(), "amount": amount.to_string(), "type": "bid"}
            }),
            Self::Unknown(tag) => json!({"type": tag, "data": {"rate": "1"}}),
        }
    }
}

fn item() -> impl Strategy<Value = Item> {
    prop_oneof![
        4 => (
            prop::sample::select(EventKind::ALL.to_vec()),
            0.000_001_f64..100_000.0,
            0.000_001_f64..100_000.0,
        )
            .prop_map(|(kind, rate, amount)| Item::Known(kind, rate, amount)),
        1 => "[a-z]{1,12}".prop_map(Item::Unknown),
    ]
}

fn tag() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::sample::select(EventKind::ALL.to_vec()).prop_map(|kind| kind.tag().to_string()),
        "[A-Za-z]{0,16}",
    ]
}

/// A finite value, sent either as a JSON number or as a numeric string.
fn field() -> impl Strategy<Value = (f64, bool)> {
    (-1_000_000.0_f64..1_000_000.0, any::<bool>())
}

fn encode((value, as_text): (f64, bool)) -> Value {
    if as_text { json!(value.to_string()) } else { json!(value) }
}

fn batch(seq: i64, items: &[Item]) -> RawEvent {
    let args = items
        .iter()
        .enumerate()
        .map(|(index, item)| item.to_json(index))
        .collect();
    let mut kwargs = Map::new();
    kwargs.insert("seq".to_string(), json!(seq));
    RawEvent::new(args, kwargs)
}

proptest! {
    #[test]
    fn persisted_rows_follow_batch_order(
        seq in 0_i64..10_000_000,
        items in prop::collection::vec(item(), 0..24),
    ) {
        let store = Arc::new(InMemoryStore::new());
        let handler = MarketHandler::new("BTC_ETH", store.clone());

        let report = handler.handle(&batch(seq, &items)).unwrap().unwrap();

        let expected: Vec<(EventKind, f64, f64)> = items
            .iter()
            .filter_map(|item| match item {
                Item::Known(kind, rate, amount) => Some((*kind, *rate, *amount)),
                Item::Unknown(_) => None,
            })
            .collect();
        let rows = store.order_book();

        prop_assert_eq!(rows.len(), expected.len());
        prop_assert_eq!(report.persisted, expected.len());
        prop_assert_eq!(report.dropped, items.len() - expected.len());
        prop_assert_eq!(report.lines.len(), items.len());

        for (row, (kind, rate, amount)) in rows.iter().zip(expected) {
            prop_assert_eq!(row.seq, seq);
            prop_assert_eq!(row.exchange.as_str(), "BTC_ETH");
            prop_assert_eq!(row.kind, kind);
            prop_assert_eq!(row.rate, rate);
            prop_assert_eq!(row.flags(), kind.flags());
            if kind == EventKind::Remove {
                prop_assert_eq!(row.amount, 0.0);
            } else {
                prop_assert_eq!(row.amount, amount);
            }
            prop_assert_eq!(row.trade.is_some(), kind == EventKind::Trade);
        }
    }

    #[test]
    fn flags_are_one_of_three_pairs(tag in tag()) {
        let known = EventKind::ALL.iter().any(|kind| kind.tag() == tag);
        match EventKind::from_tag(&tag) {
            Some(kind) => {
                prop_assert!([(0, 0), (0, 1), (1, 0)].contains(&kind.flags()));
                prop_assert_eq!(kind.tag(), tag.as_str());
            }
            None => prop_assert!(!known),
        }
    }

    #[test]
    fn ticker_fields_are_stored_in_order(
        pair in "[A-Z]{3,4}_[A-Z]{3,5}",
        prices in prop::collection::vec(field(), 6),
        frozen in 0_i64..=1,
        range in prop::collection::vec(field(), 2),
    ) {
        let mut args = vec![json!(pair)];
        args.extend(prices.iter().copied().map(encode));
        args.push(json!(frozen));
        args.extend(range.iter().copied().map(encode));

        let store = Arc::new(InMemoryStore::new());
        let handler = TickerHandler::new(store.clone());
        let snapshot = handler.handle(&RawEvent::new(args, Map::new())).unwrap();

        let expected = TickerSnapshot {
            currency_pair: pair,
            last: prices[0].0,
            lowest_ask: prices[1].0,
            highest_bid: prices[2].0,
            percent_change: prices[3].0,
            base_volume: prices[4].0,
            quote_volume: prices[5].0,
            is_frozen: frozen,
            last_day_high: range[0].0,
            last_day_low: range[1].0,
        };
        prop_assert_eq!(snapshot, Some(expected.clone()));
        prop_assert_eq!(store.tickers(), vec![expected]);
    }
}

#[test]
fn known_tags_resolve() {
    for kind in EventKind::ALL {
        assert_eq!(EventKind::from_tag(kind.tag()), Some(kind));
    }
}
