//! Domain Layer - Core market event types and payload decoding.
//!
//! This layer contains the event shapes delivered by the feed and the rules
//! for classifying them. Nothing here touches the network or the store.

/// Ticker snapshots, order-book events and their decoding.
pub mod market;

/// Topic naming for the pub/sub feed.
pub mod subscription;
