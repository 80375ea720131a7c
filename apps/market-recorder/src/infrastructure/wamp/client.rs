//! WAMP Subscriber Client
//!
//! Joins a realm over a [`TransportSession`], subscribes topics and routes
//! each `EVENT` to the bounded channel of its subscription.
//!
//! Subscriptions are requested one at a time in the order given. A topic
//! that fails to subscribe is logged and skipped; it never prevents the
//! remaining topics from being attempted and never ends the session. Events
//! that arrive while a later `SUBSCRIBE` is pending are routed as usual.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::codec::JsonCodec;
use super::messages::{WampMessage, code, reason};
use super::transport::{ConnectError, SessionError, SessionState, TransportSession};
use crate::domain::market::RawEvent;
use crate::domain::subscription::Topic;
use crate::infrastructure::config::TransportSettings;
use crate::infrastructure::metrics::{self, DropReason};

// =============================================================================
// Error Type
// =============================================================================

/// Failure subscribing one topic. Always recoverable.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// The router answered with `ERROR`.
    #[error("router rejected subscription to {topic}: {error}")]
    Rejected {
        /// Topic requested.
        topic: String,
        /// Error URI.
        error: String,
    },

    /// No answer within the reply timeout.
    #[error("no reply to subscription for {topic} within {timeout:?}")]
    Timeout {
        /// Topic requested.
        topic: String,
        /// Reply timeout.
        timeout: Duration,
    },

    /// The session ended while the request was pending.
    #[error("session ended before {topic} was subscribed")]
    SessionEnded {
        /// Topic requested.
        topic: String,
    },

    /// Transport failure while subscribing.
    #[error("transport failure subscribing to {topic}: {source}")]
    Transport {
        /// Topic requested.
        topic: String,
        /// Underlying failure.
        #[source]
        source: SessionError,
    },
}

// =============================================================================
// Subscription
// =============================================================================

/// An active subscription and the receiving end of its event channel.
#[derive(Debug)]
pub struct Subscription {
    /// Subscribed topic.
    pub topic: Topic,
    /// Router-assigned subscription id.
    pub id: u64,
    /// Events for this topic, in arrival order.
    pub events: mpsc::Receiver<RawEvent>,
}

/// How a session ended without a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Local shutdown was requested.
    Shutdown,
    /// The router closed the session with `GOODBYE`.
    RouterGoodbye {
        /// Reason URI.
        reason: String,
    },
    /// The router closed the WebSocket with a close handshake.
    TransportClosed,
}

struct Route {
    topic: Topic,
    events: mpsc::Sender<RawEvent>,
}

enum Control {
    Continue,
    Reply(WampMessage),
    End(SessionEnd),
}

// =============================================================================
// Client
// =============================================================================

/// Subscriber session bound to one realm.
pub struct PubSubClient {
    transport: TransportSession,
    codec: JsonCodec,
    session_id: u64,
    joined: bool,
    next_request: u64,
    routes: HashMap<u64, Route>,
    routing: bool,
    channel_capacity: usize,
    reply_timeout: Duration,
    leave_timeout: Duration,
    pending_end: Option<SessionEnd>,
}

impl PubSubClient {
    /// Connect to `endpoint` and join `realm`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport handshake fails, the router aborts
    /// the join, or no `WELCOME` arrives within the open-handshake timeout.
    pub async fn join(
        endpoint: &str,
        realm: &str,
        settings: TransportSettings,
        channel_capacity: usize,
    ) -> Result<Self, ConnectError> {
        let reply_timeout = settings.open_handshake_timeout;
        let leave_timeout = settings.close_handshake_timeout;
        let codec = JsonCodec::new();

        let mut transport = TransportSession::connect(endpoint, settings).await?;

        match Self::handshake(&mut transport, &codec, realm, reply_timeout).await {
            Ok(session_id) => {
                tracing::info!(realm, session_id, "Joined realm");
                Ok(Self {
                    transport,
                    codec,
                    session_id,
                    joined: true,
                    next_request: 1,
                    routes: HashMap::new(),
                    routing: true,
                    channel_capacity: channel_capacity.max(1),
                    reply_timeout,
                    leave_timeout,
                    pending_end: None,
                })
            }
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(
        transport: &mut TransportSession,
        codec: &JsonCodec,
        realm: &str,
        timeout: Duration,
    ) -> Result<u64, ConnectError> {
        transport
            .send_text(&codec.encode(&WampMessage::hello(realm))?)
            .await?;

        let welcome = async {
            loop {
                let Some(text) = transport.recv().await? else {
                    return Err(ConnectError::ClosedDuringJoin);
                };
                match codec.decode(&text) {
                    Ok(WampMessage::Welcome { session, .. }) => return Ok(session),
                    Ok(WampMessage::Abort { reason, .. }) => {
                        return Err(ConnectError::Aborted { reason });
                    }
                    Ok(other) => {
                        tracing::debug!(message = other.name(), "Ignoring message during join");
                    }
                    Err(e) => tracing::warn!(error = %e, "Ignoring malformed message during join"),
                }
            }
        };

        tokio::time::timeout(timeout, welcome)
            .await
            .map_err(|_| ConnectError::Timeout(timeout))?
    }

    /// Router-assigned session id.
    #[must_use]
    pub const fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &TransportSession {
        &self.transport
    }

    /// Subscribe one topic and wait for the router's answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the router rejects the request, does not answer in
    /// time, ends the session, or the transport fails.
    pub async fn subscribe(&mut self, topic: Topic) -> Result<Subscription, SubscriptionError> {
        if !self.joined || self.pending_end.is_some() {
            return Err(SubscriptionError::SessionEnded {
                topic: topic.to_string(),
            });
        }

        let request = self.next_request;
        self.next_request += 1;

        let transport_error = |source| SubscriptionError::Transport {
            topic: topic.to_string(),
            source,
        };

        let text = self
            .codec
            .encode(&WampMessage::subscribe(request, topic.name()))
            .map_err(|e| transport_error(e.into()))?;
        self.transport
            .send_text(&text)
            .await
            .map_err(transport_error)?;

        let timeout = self.reply_timeout;
        let reply = tokio::time::timeout(timeout, self.await_reply(request)).await;

        match reply {
            Err(_) => Err(SubscriptionError::Timeout {
                topic: topic.to_string(),
                timeout,
            }),
            Ok(Err(source)) => Err(SubscriptionError::Transport {
                topic: topic.to_string(),
                source,
            }),
            Ok(Ok(None)) => Err(SubscriptionError::SessionEnded {
                topic: topic.to_string(),
            }),
            Ok(Ok(Some(WampMessage::Subscribed { subscription, .. }))) => {
                let (tx, rx) = mpsc::channel(self.channel_capacity);
                self.routes.insert(
                    subscription,
                    Route {
                        topic: topic.clone(),
                        events: tx,
                    },
                );
                tracing::info!(topic = %topic, subscription, "Subscribed");
                Ok(Subscription {
                    topic,
                    id: subscription,
                    events: rx,
                })
            }
            Ok(Ok(Some(WampMessage::Error { error, .. }))) => Err(SubscriptionError::Rejected {
                topic: topic.to_string(),
                error,
            }),
            Ok(Ok(Some(other))) => Err(SubscriptionError::Rejected {
                topic: topic.to_string(),
                error: format!("unexpected {} reply", other.name()),
            }),
        }
    }

    /// Read until the reply to `request` arrives, routing events meanwhile.
    ///
    /// Returns `None` if the session ended first.
    async fn await_reply(&mut self, request: u64) -> Result<Option<WampMessage>, SessionError> {
        loop {
            let Some(text) = self.transport.recv().await? else {
                self.pending_end = Some(SessionEnd::TransportClosed);
                return Ok(None);
            };

            match self.handle_text(&text).await? {
                Control::Continue => {}
                Control::Reply(reply) if reply_request(&reply) == Some(request) => {
                    return Ok(Some(reply));
                }
                Control::Reply(reply) => {
                    tracing::debug!(message = reply.name(), "Ignoring reply to another request");
                }
                Control::End(end) => {
                    self.pending_end = Some(end);
                    return Ok(None);
                }
            }
        }
    }

    /// Subscribe every topic in order. Failures are logged and skipped.
    ///
    /// Each subscription is handed to `on_subscribed` before the next topic
    /// is requested, so its consumer can start draining while later requests
    /// are pending. Returns the number of topics subscribed.
    pub async fn subscribe_all(
        &mut self,
        topics: &[Topic],
        mut on_subscribed: impl FnMut(Subscription),
    ) -> usize {
        let mut subscribed = 0;

        for topic in topics {
            match self.subscribe(topic.clone()).await {
                Ok(subscription) => {
                    on_subscribed(subscription);
                    subscribed += 1;
                }
                Err(e) => {
                    tracing::warn!(topic = %topic, error = %e, "Could not subscribe to topic");
                    metrics::record_subscription_failure();
                }
            }
        }

        subscribed
    }

    /// Route events until shutdown is requested or the session ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails or the router aborts.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> Result<SessionEnd, SessionError> {
        if let Some(end) = self.pending_end.take() {
            return Ok(end);
        }
        if self.transport.state() == SessionState::Closed {
            return Err(SessionError::ConnectionLost);
        }

        loop {
            tokio::select! {
                () = shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
                text = self.transport.recv() => {
                    let Some(text) = text? else {
                        return Ok(SessionEnd::TransportClosed);
                    };
                    match self.handle_text(&text).await? {
                        Control::Continue => {}
                        Control::Reply(reply) => {
                            tracing::debug!(message = reply.name(), "Ignoring unsolicited reply");
                        }
                        Control::End(end) => return Ok(end),
                    }
                }
            }
        }
    }

    /// Stop handing events to consumers. Events that arrive afterwards,
    /// including while leaving, are discarded.
    pub fn stop_routing(&mut self) {
        self.routing = false;
        self.routes.clear();
    }

    /// Leave the realm if still joined, then close the transport.
    ///
    /// Dropping the routes closes every subscription channel, letting
    /// consumers drain and stop.
    pub async fn leave(&mut self) {
        if self.joined && self.transport.state() == SessionState::Open {
            match self.say_goodbye().await {
                Ok(()) => tracing::info!("Left realm"),
                Err(e) => tracing::warn!(error = %e, "Session leave incomplete"),
            }
        }
        self.joined = false;

        self.transport.close().await;
        self.routes.clear();
    }

    async fn say_goodbye(&mut self) -> Result<(), SessionError> {
        let text = self
            .codec
            .encode(&WampMessage::goodbye(reason::SYSTEM_SHUTDOWN))?;
        self.transport.send_text(&text).await?;

        let timeout = self.leave_timeout;
        let reply = async {
            loop {
                let Some(text) = self.transport.recv().await? else {
                    return Ok(());
                };
                match self.codec.decode(&text) {
                    Ok(WampMessage::Goodbye { .. }) => return Ok(()),
                    Ok(WampMessage::Event { .. }) => {
                        self.handle_text(&text).await?;
                    }
                    _ => {}
                }
            }
        };

        match tokio::time::timeout(timeout, reply).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis(),
                    "Router did not acknowledge GOODBYE"
                );
                Ok(())
            }
        }
    }

    /// Decode and act on one inbound message.
    async fn handle_text(&mut self, text: &str) -> Result<Control, SessionError> {
        let message = match self.codec.decode(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed message");
                return Ok(Control::Continue);
            }
        };

        match message {
            WampMessage::Event {
                subscription,
                args,
                kwargs,
                ..
            } => {
                self.route(subscription, RawEvent::new(args, kwargs)).await;
                Ok(Control::Continue)
            }
            WampMessage::Goodbye { reason, .. } => {
                tracing::info!(reason = %reason, "Router closed session");
                let text = self
                    .codec
                    .encode(&WampMessage::goodbye(reason::GOODBYE_AND_OUT))?;
                self.transport.send_text(&text).await?;
                self.joined = false;
                Ok(Control::End(SessionEnd::RouterGoodbye { reason }))
            }
            WampMessage::Abort { reason, .. } => {
                self.joined = false;
                Err(SessionError::Aborted { reason })
            }
            reply @ (WampMessage::Subscribed { .. } | WampMessage::Error { .. }) => {
                Ok(Control::Reply(reply))
            }
            other => {
                tracing::debug!(message = other.name(), "Ignoring unexpected message");
                Ok(Control::Continue)
            }
        }
    }

    async fn route(&mut self, subscription: u64, event: RawEvent) {
        if !self.routing {
            tracing::trace!(subscription, "Routing stopped, discarding event");
            return;
        }
        let Some(route) = self.routes.get(&subscription) else {
            tracing::debug!(subscription, "Dropping event for unknown subscription");
            metrics::record_items_dropped(DropReason::UnknownSubscription, 1);
            return;
        };

        if route.events.send(event).await.is_err() {
            tracing::debug!(topic = %route.topic, "Consumer gone, dropping route");
            self.routes.remove(&subscription);
        }
    }
}

const fn reply_request(message: &WampMessage) -> Option<u64> {
    match message {
        WampMessage::Subscribed { request, .. } => Some(*request),
        WampMessage::Error {
            request_type: code::SUBSCRIBE,
            request,
            ..
        } => Some(*request),
        _ => None,
    }
}
