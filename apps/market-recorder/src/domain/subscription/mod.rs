//! Feed Topics
//!
//! The feed publishes one `ticker` topic carrying snapshots for every
//! currency pair, plus one topic per market (named by its market code, e.g.
//! `BTC_ETH`) carrying order-book and trade batches.

use std::fmt;

/// Name of the ticker topic.
pub const TICKER_TOPIC: &str = "ticker";

/// A subscribable feed topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// The shared ticker topic.
    Ticker,
    /// A per-market order-book/trade topic.
    Market(String),
}

impl Topic {
    /// Create a market topic from its market code.
    #[must_use]
    pub fn market(code: impl Into<String>) -> Self {
        Self::Market(code.into())
    }

    /// Wire name used in the subscribe request.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Ticker => TICKER_TOPIC,
            Self::Market(code) => code,
        }
    }

    /// Topic class, used as a metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Market(_) => "market",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build the topic list in subscription order: the ticker first, then each
/// market in the order given. Duplicate market codes are subscribed once.
#[must_use]
pub fn topic_plan<S: AsRef<str>>(markets: &[S]) -> Vec<Topic> {
    let mut topics = Vec::with_capacity(markets.len() + 1);
    topics.push(Topic::Ticker);

    for code in markets {
        let topic = Topic::market(code.as_ref());
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }

    topics
}
