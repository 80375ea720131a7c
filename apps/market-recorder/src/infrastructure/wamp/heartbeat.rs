//! Keepalive Manager
//!
//! Monitors WebSocket connection health through periodic ping/pong messages.
//! Each ping carries a fresh random payload; only a pong echoing the
//! outstanding payload counts as an answer. A ping left unanswered for the
//! pong timeout ends the session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::TransportSettings;

/// Configuration for keepalive behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
    /// Timeout for the matching pong before the connection is considered dead.
    pub pong_timeout: Duration,
    /// Random payload bytes per ping.
    pub payload_size: usize,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::from_transport_settings(&TransportSettings::default())
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration, payload_size: usize) -> Self {
        Self {
            ping_interval,
            pong_timeout,
            payload_size,
        }
    }

    /// Create configuration from `TransportSettings`.
    #[must_use]
    pub const fn from_transport_settings(settings: &TransportSettings) -> Self {
        Self {
            ping_interval: settings.ping_interval,
            pong_timeout: settings.ping_timeout,
            payload_size: settings.ping_payload_size,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Send a ping with this payload.
    SendPing(Vec<u8>),
    /// The last ping went unanswered; the connection should be dropped.
    Timeout,
}

#[derive(Debug)]
struct Outstanding {
    payload: Vec<u8>,
    sent_at: Instant,
}

/// State shared between the heartbeat manager and the socket reader.
#[derive(Debug, Default)]
pub struct HeartbeatState {
    outstanding: RwLock<Option<Outstanding>>,
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received pong. Returns `true` if it answered the outstanding ping.
    pub fn record_pong(&self, payload: &[u8]) -> bool {
        let mut outstanding = self.outstanding.write();
        let matched = outstanding
            .as_ref()
            .is_some_and(|ping| ping.payload == payload);
        if matched {
            *outstanding = None;
        }
        matched
    }

    /// Mark that a ping with `payload` is awaiting its pong.
    pub fn mark_ping_sent(&self, payload: Vec<u8>) {
        *self.outstanding.write() = Some(Outstanding {
            payload,
            sent_at: Instant::now(),
        });
    }

    /// Time since the outstanding ping was sent, if any.
    #[must_use]
    pub fn time_since_ping(&self) -> Option<Duration> {
        self.outstanding.read().as_ref().map(|ping| ping.sent_at.elapsed())
    }
}

/// Heartbeat manager that monitors connection health.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run the heartbeat monitoring loop.
    ///
    /// The first ping goes out one interval after start. This method runs
    /// until cancelled, the event channel closes or a timeout is detected.
    pub async fn run(self) {
        let start = tokio::time::Instant::now() + self.config.ping_interval;
        let mut interval = tokio::time::interval_at(start, self.config.ping_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {}
            }

            if self.ping().await.is_err() {
                break;
            }

            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                () = tokio::time::sleep(self.config.pong_timeout) => {}
            }

            if let Some(elapsed) = self.state.time_since_ping() {
                if elapsed >= self.config.pong_timeout {
                    tracing::warn!(
                        elapsed_ms = elapsed.as_millis(),
                        timeout_ms = self.config.pong_timeout.as_millis(),
                        "Heartbeat timeout detected"
                    );
                    let _ = self.event_tx.send(HeartbeatEvent::Timeout).await;
                    break;
                }
            }
        }
    }

    /// Register a fresh payload and request a ping.
    ///
    /// Returns `Err(())` if the event channel closed and the loop should exit.
    async fn ping(&self) -> Result<(), ()> {
        let mut payload = vec![0_u8; self.config.payload_size];
        rand::rng().fill(payload.as_mut_slice());
        self.state.mark_ping_sent(payload.clone());

        if self
            .event_tx
            .send(HeartbeatEvent::SendPing(payload))
            .await
            .is_err()
        {
            tracing::debug!("Event channel closed, stopping heartbeat");
            return Err(());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        assert_eq!(config.pong_timeout, Duration::from_secs(5));
        assert_eq!(config.payload_size, 4);
    }

    #[test]
    fn state_initial_values() {
        let state = HeartbeatState::new();
        assert_eq!(state.time_since_ping(), None);
    }

    #[test]
    fn only_matching_pong_clears_wait() {
        let state = HeartbeatState::new();
        state.mark_ping_sent(vec![1, 2, 3, 4]);

        assert!(!state.record_pong(&[9, 9, 9, 9]));
        assert!(state.time_since_ping().is_some());

        assert!(state.record_pong(&[1, 2, 3, 4]));
        assert_eq!(state.time_since_ping(), None);
    }

    #[test]
    fn unsolicited_pong_is_ignored() {
        let state = HeartbeatState::new();
        assert!(!state.record_pong(&[]));
    }

    #[tokio::test]
    async fn manager_sends_sized_ping_payloads() {
        let config = HeartbeatConfig::new(Duration::from_millis(20), Duration::from_secs(1), 4);
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let manager = HeartbeatManager::new(config, state.clone(), event_tx, cancel.clone());
        let handle = tokio::spawn(manager.run());

        let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
            .await
            .expect("should receive event")
            .expect("channel should not close");

        let HeartbeatEvent::SendPing(payload) = event else {
            panic!("expected ping, got {event:?}");
        };
        assert_eq!(payload.len(), 4);
        assert!(state.time_since_ping().is_some());

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn manager_detects_unanswered_ping() {
        let config = HeartbeatConfig::new(Duration::from_millis(20), Duration::from_millis(50), 4);
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let manager = HeartbeatManager::new(config, state, event_tx, cancel.clone());
        let handle = tokio::spawn(manager.run());

        let mut received_timeout = false;
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(500), event_rx.recv()).await
        {
            if event == HeartbeatEvent::Timeout {
                received_timeout = true;
                break;
            }
        }

        assert!(received_timeout, "should receive timeout event");
        let _ = tokio::time::timeout(Duration::from_millis(100), handle).await;
    }

    #[tokio::test]
    async fn answered_pings_keep_the_manager_running() {
        let config = HeartbeatConfig::new(Duration::from_millis(20), Duration::from_millis(30), 4);
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, mut event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let manager = HeartbeatManager::new(config, state.clone(), event_tx, cancel.clone());
        let handle = tokio::spawn(manager.run());

        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_millis(500), event_rx.recv())
                .await
                .expect("should receive event")
                .expect("channel should not close");
            let HeartbeatEvent::SendPing(payload) = event else {
                panic!("unexpected timeout");
            };
            assert!(state.record_pong(&payload));
        }

        cancel.cancel();
        handle.await.expect("task should complete");
    }

    #[tokio::test]
    async fn manager_cancellation() {
        let config = HeartbeatConfig::new(Duration::from_secs(10), Duration::from_secs(10), 4);
        let state = Arc::new(HeartbeatState::new());
        let (event_tx, _event_rx) = mpsc::channel(10);
        let cancel = CancellationToken::new();

        let manager = HeartbeatManager::new(config, state, event_tx, cancel.clone());
        let handle = tokio::spawn(manager.run());

        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok(), "manager should shut down on cancellation");
    }
}
