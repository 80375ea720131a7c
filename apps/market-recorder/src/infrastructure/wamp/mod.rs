//! WAMP Subscriber Adapter
//!
//! Everything needed to consume a WAMP v2 router as a subscriber:
//!
//! - `transport`: WebSocket session (subprotocol, compression, keepalive,
//!   fragmentation, close handshake)
//! - `inflate`: decompression of `permessage-deflate` frames beneath the codec
//! - `client`: realm join, subscriptions and event routing
//! - `codec` / `messages`: the `wamp.2.json` serialization

pub mod client;
pub mod codec;
pub mod compression;
pub mod heartbeat;
mod inflate;
pub mod messages;
pub mod transport;

pub use client::{PubSubClient, SessionEnd, Subscription, SubscriptionError};
pub use codec::{CodecError, JsonCodec};
pub use compression::{Compression, DeflateOffer, DeflateParams, NegotiationError};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use messages::{SUBPROTOCOL, WampMessage};
pub use transport::{ConnectError, SessionError, SessionState, TransportSession};
