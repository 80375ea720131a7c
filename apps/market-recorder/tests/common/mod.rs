//! Scripted WAMP router used by the integration tests.
//!
//! Accepts a single WebSocket connection, answers the realm join and
//! subscriptions according to a [`RouterScript`], publishes scripted events
//! once every expected subscription has been requested, and records what the
//! client sent. With [`RouterScript::compress`] set, every message the router
//! sends is a `permessage-deflate` frame sharing one compression context.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use flate2::{Compress, FlushCompress};
use futures_util::{SinkExt, StreamExt};
use market_recorder::{RecorderConfig, TransportSettings};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;

/// Session id handed out in `WELCOME`.
pub const SESSION_ID: u64 = 4242;

/// One event to publish on a topic.
#[derive(Debug, Clone)]
pub struct ScriptedEvent {
    pub topic: String,
    pub args: Value,
    pub kwargs: Value,
}

impl ScriptedEvent {
    pub fn ticker(args: Value) -> Self {
        Self {
            topic: "ticker".to_string(),
            args,
            kwargs: json!({}),
        }
    }

    pub fn market(topic: &str, seq: i64, items: Value) -> Self {
        Self {
            topic: topic.to_string(),
            args: items,
            kwargs: json!({ "seq": seq }),
        }
    }
}

/// What the router does after the handshake.
#[derive(Debug, Clone, Default)]
pub struct RouterScript {
    /// Answer `HELLO` with `ABORT`.
    pub abort_join: bool,
    /// Value returned in `Sec-WebSocket-Extensions`, if any.
    pub extensions: Option<String>,
    /// Topics answered with `ERROR`.
    pub reject: Vec<String>,
    /// Number of `SUBSCRIBE` requests to wait for before publishing.
    pub expected_subscribes: usize,
    /// Events published once the expected subscriptions arrived.
    pub events: Vec<ScriptedEvent>,
    /// Send `GOODBYE` after publishing.
    pub goodbye_after_events: bool,
    /// Stop reading (and answering pings) after publishing.
    pub stall_after_events: bool,
    /// Send every message as a compressed frame.
    pub compress: bool,
}

/// What the client sent.
#[derive(Debug, Default)]
pub struct RouterLog {
    pub offered_extensions: Option<String>,
    pub offered_protocol: Option<String>,
    pub hello: Option<Value>,
    pub subscribe_topics: Vec<String>,
    pub request_ids: Vec<u64>,
    pub client_goodbye: Option<String>,
    pub largest_message: usize,
    pub saw_close: bool,
}

/// A running router double.
pub struct MockRouter {
    pub url: String,
    pub log: Arc<Mutex<RouterLog>>,
    handle: JoinHandle<()>,
}

impl MockRouter {
    /// Wait for the router task to finish.
    pub async fn finished(self) -> Arc<Mutex<RouterLog>> {
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("router should finish")
            .expect("router task should not panic");
        self.log
    }
}

/// Start a router double on an ephemeral port.
pub async fn spawn_router(script: RouterScript) -> MockRouter {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(Mutex::new(RouterLog::default()));

    let task_log = Arc::clone(&log);
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        serve(stream, script, task_log).await;
    });

    MockRouter {
        url: format!("ws://{addr}"),
        log,
        handle,
    }
}

/// Recorder configuration pointing at `url` with short test timeouts.
pub fn test_config(url: &str, markets: &[&str], db_path: std::path::PathBuf) -> RecorderConfig {
    RecorderConfig {
        endpoint: url.to_string(),
        markets: markets.iter().map(ToString::to_string).collect(),
        db_path,
        transport: test_transport(),
        ..RecorderConfig::default()
    }
}

/// Transport settings with timeouts suited to a local router.
pub fn test_transport() -> TransportSettings {
    TransportSettings {
        open_handshake_timeout: Duration::from_secs(2),
        close_handshake_timeout: Duration::from_millis(500),
        ..TransportSettings::default()
    }
}

async fn serve(stream: TcpStream, script: RouterScript, log: Arc<Mutex<RouterLog>>) {
    let handshake_log = Arc::clone(&log);
    let extensions = script.extensions.clone();
    let callback = move |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        {
            let mut log = handshake_log.lock();
            log.offered_extensions = header("sec-websocket-extensions");
            log.offered_protocol = header("sec-websocket-protocol");
        }

        let headers = response.headers_mut();
        headers.insert("sec-websocket-protocol", HeaderValue::from_static("wamp.2.json"));
        if let Some(value) = extensions {
            headers.insert("sec-websocket-extensions", HeaderValue::from_str(&value).unwrap());
        }
        Ok(response)
    };

    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
        return;
    };
    let mut ws = Peer {
        ws,
        compressor: script
            .compress
            .then(|| Compress::new(flate2::Compression::default(), false)),
    };

    let Some(hello) = next_json(&mut ws, &log).await else {
        return;
    };
    log.lock().hello = Some(hello);

    if script.abort_join {
        ws.send(json!([3, {}, "wamp.error.no_such_realm"])).await;
        let _ = ws.ws.close(None).await;
        drain(&mut ws, &log).await;
        return;
    }
    ws.send(json!([2, SESSION_ID, {"roles": {"broker": {}}}])).await;

    let mut subscriptions: Vec<(String, u64)> = Vec::new();
    let mut subscribes = 0;
    let mut published = script.expected_subscribes == 0;

    if published {
        publish(&mut ws, &script, &subscriptions).await;
    }

    while let Some(message) = next_json(&mut ws, &log).await {
        match message[0].as_u64() {
            Some(32) => {
                let request = message[1].as_u64().unwrap();
                let topic = message[3].as_str().unwrap().to_string();
                {
                    let mut log = log.lock();
                    log.subscribe_topics.push(topic.clone());
                    log.request_ids.push(request);
                }
                subscribes += 1;

                if script.reject.contains(&topic) {
                    ws.send(json!([8, 32, request, {}, "wamp.error.not_authorized"])).await;
                } else {
                    let id = 100 + subscribes;
                    subscriptions.push((topic, id));
                    ws.send(json!([33, request, id])).await;
                }

                if !published && subscribes as usize >= script.expected_subscribes {
                    published = true;
                    if publish(&mut ws, &script, &subscriptions).await {
                        return;
                    }
                }
            }
            Some(6) => {
                let reason = message[2].as_str().unwrap_or_default().to_string();
                log.lock().client_goodbye = Some(reason.clone());
                if reason == "wamp.close.system_shutdown" {
                    ws.send(json!([6, {}, "wamp.close.goodbye_and_out"])).await;
                }
            }
            _ => {}
        }
    }
}

/// Publish the scripted events. Returns `true` if the router stalled.
async fn publish(
    ws: &mut Peer,
    script: &RouterScript,
    subscriptions: &[(String, u64)],
) -> bool {
    for (publication, event) in (1_u64..).zip(&script.events) {
        let Some((_, id)) = subscriptions.iter().find(|(t, _)| *t == event.topic) else {
            continue;
        };
        ws.send(json!([36, id, publication, {}, event.args, event.kwargs]))
            .await;
    }

    if script.goodbye_after_events {
        ws.send(json!([6, {"message": "maintenance"}, "wamp.close.system_shutdown"]))
            .await;
    }

    if script.stall_after_events {
        tokio::time::sleep(Duration::from_secs(3)).await;
        return true;
    }
    false
}

/// Server side of the connection.
struct Peer {
    ws: WebSocketStream<TcpStream>,
    compressor: Option<Compress>,
}

impl Peer {
    async fn send(&mut self, value: Value) {
        let text = value.to_string();
        let message = match &mut self.compressor {
            None => Message::Text(text.into()),
            Some(compressor) => {
                let mut payload = Vec::with_capacity(text.len() + 64);
                compressor
                    .compress_vec(text.as_bytes(), &mut payload, FlushCompress::Sync)
                    .unwrap();
                assert!(payload.ends_with(&[0x00, 0x00, 0xff, 0xff]));
                payload.truncate(payload.len() - 4);

                let mut frame = Frame::message(payload, OpCode::Data(Data::Text), true);
                frame.header_mut().rsv1 = true;
                Message::Frame(frame)
            }
        };
        let _ = self.ws.send(message).await;
    }
}

async fn next_json(ws: &mut Peer, log: &Arc<Mutex<RouterLog>>) -> Option<Value> {
    loop {
        match ws.ws.next().await? {
            Ok(Message::Text(text)) => {
                let mut guard = log.lock();
                guard.largest_message = guard.largest_message.max(text.len());
                drop(guard);
                return serde_json::from_str(text.as_str()).ok();
            }
            Ok(Message::Close(_)) => log.lock().saw_close = true,
            Ok(_) => {}
            Err(_) => return None,
        }
    }
}

async fn drain(ws: &mut Peer, log: &Arc<Mutex<RouterLog>>) {
    let _ = tokio::time::timeout(Duration::from_secs(1), next_json(ws, log)).await;
}
