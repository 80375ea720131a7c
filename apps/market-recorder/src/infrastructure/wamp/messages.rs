//! WAMP Message Types
//!
//! The subset of WAMP v2 messages a subscriber exchanges with a router.
//! On the wire every message is a JSON array whose first element is the
//! message code.
//!
//! # Message Types
//!
//! | Message      | Code | Direction        |
//! |--------------|------|------------------|
//! | `HELLO`      | 1    | client to router |
//! | `WELCOME`    | 2    | router to client |
//! | `ABORT`      | 3    | both             |
//! | `GOODBYE`    | 6    | both             |
//! | `ERROR`      | 8    | router to client |
//! | `SUBSCRIBE`  | 32   | client to router |
//! | `SUBSCRIBED` | 33   | router to client |
//! | `EVENT`      | 36   | router to client |

use serde_json::{Map, Value, json};

/// WebSocket subprotocol for WAMP v2 with JSON serialization.
pub const SUBPROTOCOL: &str = "wamp.2.json";

/// Numeric message codes.
pub mod code {
    /// `HELLO`
    pub const HELLO: u64 = 1;
    /// `WELCOME`
    pub const WELCOME: u64 = 2;
    /// `ABORT`
    pub const ABORT: u64 = 3;
    /// `GOODBYE`
    pub const GOODBYE: u64 = 6;
    /// `ERROR`
    pub const ERROR: u64 = 8;
    /// `SUBSCRIBE`
    pub const SUBSCRIBE: u64 = 32;
    /// `SUBSCRIBED`
    pub const SUBSCRIBED: u64 = 33;
    /// `EVENT`
    pub const EVENT: u64 = 36;
}

/// Close reasons carried by `GOODBYE`.
pub mod reason {
    /// Sent by a client leaving on shutdown.
    pub const SYSTEM_SHUTDOWN: &str = "wamp.close.system_shutdown";
    /// Sent in reply to the peer's `GOODBYE`.
    pub const GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";
}

/// A decoded WAMP message.
#[derive(Debug, Clone, PartialEq)]
pub enum WampMessage {
    /// Open a session in a realm.
    Hello {
        /// Realm URI.
        realm: String,
        /// Roles and other details.
        details: Map<String, Value>,
    },
    /// Session established.
    Welcome {
        /// Router-assigned session id.
        session: u64,
        /// Router details.
        details: Map<String, Value>,
    },
    /// Session refused.
    Abort {
        /// Error details.
        details: Map<String, Value>,
        /// Reason URI.
        reason: String,
    },
    /// Session closing.
    Goodbye {
        /// Close details.
        details: Map<String, Value>,
        /// Reason URI.
        reason: String,
    },
    /// A request failed.
    Error {
        /// Code of the failed request's message type.
        request_type: u64,
        /// Id of the failed request.
        request: u64,
        /// Error details.
        details: Map<String, Value>,
        /// Error URI.
        error: String,
        /// Positional error arguments.
        args: Vec<Value>,
        /// Keyword error arguments.
        kwargs: Map<String, Value>,
    },
    /// Subscribe to a topic.
    Subscribe {
        /// Request id.
        request: u64,
        /// Subscription options.
        options: Map<String, Value>,
        /// Topic URI.
        topic: String,
    },
    /// Subscription acknowledged.
    Subscribed {
        /// Id of the `SUBSCRIBE` request.
        request: u64,
        /// Router-assigned subscription id.
        subscription: u64,
    },
    /// A publication delivered to a subscription.
    Event {
        /// Subscription id.
        subscription: u64,
        /// Publication id.
        publication: u64,
        /// Event details.
        details: Map<String, Value>,
        /// Positional payload.
        args: Vec<Value>,
        /// Keyword payload.
        kwargs: Map<String, Value>,
    },
}

impl WampMessage {
    /// `HELLO` announcing the subscriber role.
    #[must_use]
    pub fn hello(realm: impl Into<String>) -> Self {
        let details = json!({ "roles": { "subscriber": {} } });
        Self::Hello {
            realm: realm.into(),
            details: details.as_object().cloned().unwrap_or_default(),
        }
    }

    /// `SUBSCRIBE` with default options.
    #[must_use]
    pub fn subscribe(request: u64, topic: impl Into<String>) -> Self {
        Self::Subscribe {
            request,
            options: Map::new(),
            topic: topic.into(),
        }
    }

    /// `GOODBYE` with the given reason.
    #[must_use]
    pub fn goodbye(reason: &str) -> Self {
        Self::Goodbye {
            details: Map::new(),
            reason: reason.to_string(),
        }
    }

    /// Numeric message code.
    #[must_use]
    pub const fn code(&self) -> u64 {
        match self {
            Self::Hello { .. } => code::HELLO,
            Self::Welcome { .. } => code::WELCOME,
            Self::Abort { .. } => code::ABORT,
            Self::Goodbye { .. } => code::GOODBYE,
            Self::Error { .. } => code::ERROR,
            Self::Subscribe { .. } => code::SUBSCRIBE,
            Self::Subscribed { .. } => code::SUBSCRIBED,
            Self::Event { .. } => code::EVENT,
        }
    }

    /// Message name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "HELLO",
            Self::Welcome { .. } => "WELCOME",
            Self::Abort { .. } => "ABORT",
            Self::Goodbye { .. } => "GOODBYE",
            Self::Error { .. } => "ERROR",
            Self::Subscribe { .. } => "SUBSCRIBE",
            Self::Subscribed { .. } => "SUBSCRIBED",
            Self::Event { .. } => "EVENT",
        }
    }
}
