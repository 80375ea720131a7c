//! WebSocket Transport Session
//!
//! Owns one WebSocket connection to the router and applies the fixed
//! protocol options from [`TransportSettings`]:
//!
//! - frame and message size limits on the codec
//! - auto-fragmentation of large outgoing text messages
//! - bounded open and close handshakes
//! - TCP no-delay
//! - keepalive pings with random payloads
//! - `permessage-deflate` offer, response validation and inflation
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──handshake ok──► Open ──shutdown / peer close──► Closing ──► Closed
//!      │                                                                  ▲
//!      └──────────────────────────handshake failure───────────────────────┘
//! ```
//!
//! There is no reconnection: losing the connection ends the session.
//!
//! # Compression
//!
//! The negotiated extension is validated and recorded. When the router
//! accepts `permessage-deflate`, its compressed frames are inflated by an
//! [`InflatingStream`] between the TLS layer and the WebSocket codec, so the
//! TCP and TLS setup happens here rather than inside the codec crate.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::{TlsError, UrlError};
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::protocol::frame::Frame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::CodecError;
use super::compression::{Compression, NegotiationError};
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::inflate::InflatingStream;
use super::messages::SUBPROTOCOL;
use crate::infrastructure::config::TransportSettings;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<InflatingStream<MaybeTlsStream<TcpStream>>>;

// =============================================================================
// Error Types
// =============================================================================

/// Failures establishing a session. All are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The endpoint or a header could not be turned into a request.
    #[error("invalid connection request: {0}")]
    InvalidRequest(String),

    /// The WebSocket handshake failed.
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),

    /// The handshake did not complete in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The server did not select the WAMP subprotocol.
    #[error("server selected subprotocol {0:?}, expected {SUBPROTOCOL}")]
    Subprotocol(Option<String>),

    /// The server's extension response is not acceptable.
    #[error("compression negotiation failed: {0}")]
    Compression(#[from] NegotiationError),

    /// The router refused the realm join.
    #[error("router aborted join: {reason}")]
    Aborted {
        /// Reason URI from `ABORT`.
        reason: String,
    },

    /// The connection ended before the join completed.
    #[error("connection closed during join")]
    ClosedDuringJoin,

    /// Transport failure during the join.
    #[error("transport failure during join: {0}")]
    Session(#[from] SessionError),

    /// A join message could not be encoded.
    #[error("codec error during join: {0}")]
    Codec(#[from] CodecError),
}

/// Failures on an open session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// WebSocket read or write failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// A keepalive ping went unanswered.
    #[error("keepalive ping unanswered within {0:?}")]
    KeepaliveTimeout(Duration),

    /// The stream ended without a close handshake.
    #[error("connection lost without close handshake")]
    ConnectionLost,

    /// The router aborted the session.
    #[error("router aborted session: {reason}")]
    Aborted {
        /// Reason URI from `ABORT`.
        reason: String,
    },

    /// An outgoing message could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

// =============================================================================
// Session State
// =============================================================================

/// Transport lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake in progress.
    Connecting,
    /// Handshake complete; messages flow.
    Open,
    /// Close handshake in progress.
    Closing,
    /// Connection released.
    Closed,
}

impl SessionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Numeric value published as a gauge.
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }
}

// =============================================================================
// Transport Session
// =============================================================================

/// One WebSocket connection carrying `wamp.2.json` text messages.
pub struct TransportSession {
    ws: WsStream,
    settings: TransportSettings,
    state: SessionState,
    compression: Compression,
    heartbeat_state: Arc<HeartbeatState>,
    heartbeat_rx: mpsc::Receiver<HeartbeatEvent>,
    heartbeat_active: bool,
    heartbeat_cancel: CancellationToken,
}

impl TransportSession {
    /// Open a connection to `url` and complete the WebSocket handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid, the handshake fails or
    /// times out, the server does not select `wamp.2.json`, or the extension
    /// response is not acceptable.
    pub async fn connect(url: &str, settings: TransportSettings) -> Result<Self, ConnectError> {
        metrics::set_session_state(SessionState::Connecting.ordinal());
        tracing::info!(url, "Establishing connection to WAMP router");

        let mut request = url.into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(SUBPROTOCOL),
        );
        if let Some(offer) = &settings.deflate {
            let value = HeaderValue::from_str(&offer.header_value())
                .map_err(|e| ConnectError::InvalidRequest(e.to_string()))?;
            headers.insert(header::SEC_WEBSOCKET_EXTENSIONS, value);
        }

        let config = WebSocketConfig::default()
            .max_message_size(Some(settings.max_message_size))
            .max_frame_size(Some(settings.max_frame_size));

        let limit = settings.max_message_size;
        let handshake = async {
            let stream = open_stream(&request, settings.tcp_nodelay).await?;
            tokio_tungstenite::client_async_with_config(
                request,
                InflatingStream::new(stream, limit),
                Some(config),
            )
            .await
        };
        let (mut ws, response) = tokio::time::timeout(settings.open_handshake_timeout, handshake)
            .await
            .map_err(|_| ConnectError::Timeout(settings.open_handshake_timeout))??;

        let protocol = header_str(response.headers().get(header::SEC_WEBSOCKET_PROTOCOL));
        if protocol != Some(SUBPROTOCOL) {
            return Err(ConnectError::Subprotocol(protocol.map(str::to_string)));
        }

        let extensions = header_str(response.headers().get(header::SEC_WEBSOCKET_EXTENSIONS));
        let compression = match (&settings.deflate, extensions) {
            (Some(offer), response) => offer.negotiate(response)?,
            (None, None) => Compression::None,
            (None, Some(unsolicited)) => {
                return Err(NegotiationError::UnsupportedExtension(unsolicited.to_string()).into());
            }
        };
        if matches!(compression, Compression::Deflate(_)) {
            ws.get_mut().enable();
        }

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(4);
        let heartbeat_cancel = CancellationToken::new();
        let heartbeat_manager = HeartbeatManager::new(
            HeartbeatConfig::from_transport_settings(&settings),
            heartbeat_state.clone(),
            heartbeat_tx,
            heartbeat_cancel.clone(),
        );
        tokio::spawn(heartbeat_manager.run());

        tracing::info!(%compression, "WebSocket connection open");
        metrics::set_session_state(SessionState::Open.ordinal());

        Ok(Self {
            ws,
            settings,
            state: SessionState::Open,
            compression,
            heartbeat_state,
            heartbeat_rx,
            heartbeat_active: true,
            heartbeat_cancel,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Negotiated compression.
    #[must_use]
    pub const fn compression(&self) -> &Compression {
        &self.compression
    }

    /// Send one text message, fragmenting it when it exceeds the
    /// auto-fragment size.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn send_text(&mut self, text: &str) -> Result<(), SessionError> {
        let fragment = self.settings.auto_fragment_size.max(1);

        if text.len() <= fragment {
            self.ws.send(Message::Text(text.into())).await?;
            return Ok(());
        }

        let chunks: Vec<&[u8]> = text.as_bytes().chunks(fragment).collect();
        let last = chunks.len() - 1;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let opcode = if index == 0 {
                OpCode::Data(Data::Text)
            } else {
                OpCode::Data(Data::Continue)
            };
            let frame = Frame::message(chunk.to_vec(), opcode, index == last);
            self.ws.feed(Message::Frame(frame)).await?;
        }
        self.ws.flush().await?;

        tracing::trace!(bytes = text.len(), frames = last + 1, "Sent fragmented message");
        Ok(())
    }

    /// Receive the next text message.
    ///
    /// Keepalive pings are sent and their pongs checked while waiting.
    /// Returns `Ok(None)` once the peer has completed a close handshake.
    ///
    /// # Errors
    ///
    /// Returns an error on a read or write failure, a keepalive timeout, or a
    /// stream that ends without a close handshake.
    pub async fn recv(&mut self) -> Result<Option<String>, SessionError> {
        loop {
            tokio::select! {
                event = self.heartbeat_rx.recv(), if self.heartbeat_active => {
                    match event {
                        Some(HeartbeatEvent::SendPing(payload)) => {
                            self.ws.send(Message::Ping(payload.into())).await?;
                        }
                        Some(HeartbeatEvent::Timeout) => {
                            self.set_state(SessionState::Closed);
                            return Err(SessionError::KeepaliveTimeout(self.settings.ping_timeout));
                        }
                        None => {
                            tracing::debug!("Heartbeat channel closed");
                            self.heartbeat_active = false;
                        }
                    }
                }
                msg = self.ws.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                        Some(Ok(Message::Pong(payload))) => {
                            if !self.heartbeat_state.record_pong(&payload) {
                                tracing::debug!(len = payload.len(), "Ignoring unsolicited pong");
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            tracing::warn!(len = data.len(), "Ignoring binary message");
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Router sent close frame");
                            self.set_state(SessionState::Closing);
                        }
                        Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
                        Some(Err(
                            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                        )) if self.state == SessionState::Closing => {
                            self.set_state(SessionState::Closed);
                            return Ok(None);
                        }
                        Some(Err(e)) => {
                            self.set_state(SessionState::Closed);
                            return Err(e.into());
                        }
                        None if self.state == SessionState::Closing => {
                            self.set_state(SessionState::Closed);
                            return Ok(None);
                        }
                        None => {
                            self.set_state(SessionState::Closed);
                            return Err(SessionError::ConnectionLost);
                        }
                    }
                }
            }
        }
    }

    /// Close the connection, waiting at most the close-handshake timeout for
    /// the peer's close frame. The socket is released either way.
    pub async fn close(&mut self) {
        self.heartbeat_cancel.cancel();
        if self.state == SessionState::Closed {
            return;
        }

        self.set_state(SessionState::Closing);
        let timeout = self.settings.close_handshake_timeout;
        let ws = &mut self.ws;

        let handshake = async {
            if let Err(e) = ws.close(None).await {
                tracing::debug!(error = %e, "Close frame not sent");
                return;
            }
            while let Some(Ok(_)) = ws.next().await {}
        };

        if tokio::time::timeout(timeout, handshake).await.is_err() {
            tracing::warn!(
                timeout_ms = timeout.as_millis(),
                "Close handshake timed out"
            );
        }

        self.set_state(SessionState::Closed);
        tracing::info!("WebSocket connection closed");
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = self.state.as_str(), to = state.as_str(), "Session state");
            self.state = state;
            metrics::set_session_state(state.ordinal());
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.heartbeat_cancel.cancel();
    }
}

fn header_str(value: Option<&HeaderValue>) -> Option<&str> {
    value.and_then(|v| v.to_str().ok())
}

/// Open the TCP connection for `request`, wrapped in TLS for `wss`.
async fn open_stream(
    request: &Request,
    nodelay: bool,
) -> Result<MaybeTlsStream<TcpStream>, tungstenite::Error> {
    let uri = request.uri();
    let tls = match uri.scheme_str() {
        Some("wss") => true,
        Some("ws") => false,
        _ => return Err(tungstenite::Error::Url(UrlError::UnsupportedUrlScheme)),
    };
    let host = uri
        .host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
        .filter(|h| !h.is_empty())
        .ok_or(tungstenite::Error::Url(UrlError::NoHostName))?;
    let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

    let socket = TcpStream::connect((host, port)).await?;
    if nodelay {
        socket.set_nodelay(true)?;
    }
    if !tls {
        return Ok(MaybeTlsStream::Plain(socket));
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let domain = ServerName::try_from(host.to_string())
        .map_err(|_| tungstenite::Error::Tls(TlsError::InvalidDnsName))?;

    let stream = TlsConnector::from(Arc::new(config))
        .connect(domain, socket)
        .await?;
    Ok(MaybeTlsStream::Rustls(stream))
}
