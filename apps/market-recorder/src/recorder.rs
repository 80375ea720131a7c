//! Recorder Session
//!
//! Wires one pub/sub session to the event store: join the realm, subscribe
//! every configured topic, run one consumer task per topic and tear the
//! session down when shutdown is requested or a consumer fails.
//!
//! A failed write is fatal for the whole recorder. The consumers share one
//! fatal token, so once any of them fails the others stop taking events,
//! and the client discards whatever arrives while it leaves the realm.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::application::ports::EventStore;
use crate::application::services::{DispatchError, EventDispatcher};
use crate::infrastructure::config::RecorderConfig;
use crate::infrastructure::wamp::{ConnectError, PubSubClient, SessionEnd, SessionError};

/// Fatal recorder failure.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    /// The session could not be established.
    #[error("failed to connect: {0}")]
    Connect(#[from] ConnectError),

    /// The session ended abruptly.
    #[error("session failed: {0}")]
    Session(#[from] SessionError),

    /// An event could not be persisted.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Record events until `shutdown` is cancelled or the session ends.
///
/// A consumer whose store write fails stops the session and every other
/// consumer; its error takes precedence over however the session itself
/// ended.
///
/// # Errors
///
/// Returns an error if the join fails, the transport is lost, or a store
/// write fails.
pub async fn run(
    config: &RecorderConfig,
    store: Arc<dyn EventStore>,
    shutdown: CancellationToken,
) -> Result<SessionEnd, RecorderError> {
    let mut client = PubSubClient::join(
        &config.endpoint,
        &config.realm,
        config.transport.clone(),
        config.channel_capacity,
    )
    .await?;

    tracing::info!(
        session_id = client.session_id(),
        compression = %client.transport().compression(),
        "Session open"
    );

    let stop = shutdown.child_token();
    let fatal = CancellationToken::new();
    let mut consumers = JoinSet::new();

    let topics = config.topics();
    let subscribed = client
        .subscribe_all(&topics, |subscription| {
            let dispatcher = EventDispatcher::for_topic(subscription.topic, Arc::clone(&store));
            let stop = stop.clone();
            let fatal = fatal.clone();
            consumers.spawn(async move {
                let result = dispatcher.run(subscription.events, &fatal).await;
                if result.is_err() {
                    stop.cancel();
                }
                result
            });
        })
        .await;

    tracing::info!(subscribed, requested = topics.len(), "Subscriptions complete");

    let outcome = client.run(&stop).await;

    if fatal.is_cancelled() {
        client.stop_routing();
    }
    client.leave().await;
    drop(client);

    let mut dispatch_error = None;
    while let Some(joined) = consumers.join_next().await {
        match joined {
            Ok(Ok(handled)) => tracing::debug!(handled, "Consumer finished"),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Consumer failed");
                dispatch_error.get_or_insert(e);
            }
            Err(e) => tracing::error!(error = %e, "Consumer task aborted"),
        }
    }

    if let Some(e) = dispatch_error {
        return Err(e.into());
    }

    let end = outcome?;
    tracing::info!(end = ?end, "Session ended");
    Ok(end)
}
