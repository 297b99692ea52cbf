//! # Chat transport (C12)
//!
//! Socket-Mode style transport: a persistent WebSocket carries inbound
//! events, while outbound replies go over a separate REST call. The raw
//! duplex socket sits behind [`SocketConnection`]/[`WebSocketDialer`] so the
//! reconnect state machine and envelope handling can be exercised with a
//! scripted fake, the same seam pattern [`crate::llm`] uses for its HTTP
//! transport and [`crate::privacy`] uses for the external embedder.
//!
//! State machine: `disconnected -> fetching_url -> connecting -> open ->
//! closing -> disconnected`. Only the `run` loop ever touches the live
//! socket, so ping emission and envelope ACKs never race an outbound write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(String),
    #[error("websocket error: {0}")]
    Socket(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    FetchingUrl,
    Connecting,
    Open,
    Closing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Hello,
    Disconnect {
        reason: Option<String>,
    },
    Message {
        channel: String,
        user_id: String,
        text: String,
        timestamp: f64,
        thread_id: Option<String>,
    },
    AppMention {
        channel: String,
        user_id: String,
        text: String,
        timestamp: f64,
        thread_id: Option<String>,
    },
    Other,
}

/// Decode one inbound frame into an optional envelope id (to ACK) and the
/// event it carries. Returns `None` only when the frame isn't JSON at all.
fn parse_envelope(raw: &str) -> Option<(Option<String>, InboundEvent)> {
    let v: Value = serde_json::from_str(raw).ok()?;
    let envelope_id = v
        .get("envelope_id")
        .and_then(|x| x.as_str())
        .map(|s| s.to_string());
    let msg_type = v.get("type").and_then(|x| x.as_str()).unwrap_or("");

    match msg_type {
        "hello" => Some((envelope_id, InboundEvent::Hello)),
        "disconnect" => {
            let reason = v
                .get("reason")
                .and_then(|x| x.as_str())
                .map(|s| s.to_string());
            Some((envelope_id, InboundEvent::Disconnect { reason }))
        }
        "events_api" => {
            let Some(event) = v.get("payload").and_then(|p| p.get("event")) else {
                return Some((envelope_id, InboundEvent::Other));
            };
            let event_type = event.get("type").and_then(|x| x.as_str()).unwrap_or("");
            let channel = event
                .get("channel")
                .and_then(|x| x.as_str())
                .unwrap_or("")
                .to_string();
            let user_id = event
                .get("user")
                .and_then(|x| x.as_str())
                .unwrap_or("")
                .to_string();
            let text = event
                .get("text")
                .and_then(|x| x.as_str())
                .unwrap_or("")
                .to_string();
            let timestamp = event
                .get("ts")
                .and_then(|x| x.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0);
            let thread_id = event
                .get("thread_ts")
                .and_then(|x| x.as_str())
                .map(|s| s.to_string());
            match event_type {
                "message" => Some((
                    envelope_id,
                    InboundEvent::Message {
                        channel,
                        user_id,
                        text,
                        timestamp,
                        thread_id,
                    },
                )),
                "app_mention" => Some((
                    envelope_id,
                    InboundEvent::AppMention {
                        channel,
                        user_id,
                        text,
                        timestamp,
                        thread_id,
                    },
                )),
                _ => Some((envelope_id, InboundEvent::Other)),
            }
        }
        _ => Some((envelope_id, InboundEvent::Other)),
    }
}

/// A duplex connection the run loop drives: send frames, receive frames,
/// close. Implemented for real by [`TungsteniteConnection`]; tests inject a
/// scripted fake.
#[async_trait]
pub trait SocketConnection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
    async fn close(&mut self);
}

/// Opens a [`SocketConnection`] against a Socket-Mode URL. Implemented for
/// real by [`TungsteniteDialer`].
#[async_trait]
pub trait WebSocketDialer: Send + Sync {
    async fn dial(&self, url: &str) -> Result<Box<dyn SocketConnection>, TransportError>;
}

pub struct TungsteniteConnection {
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

#[async_trait]
impl SocketConnection for TungsteniteConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        use futures::SinkExt;
        self.stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        use futures::StreamExt;
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(t))) => return Some(Ok(t)),
                Some(Ok(WsMessage::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(TransportError::Socket(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        use futures::SinkExt;
        let _ = self.stream.close(None).await;
    }
}

pub struct TungsteniteDialer;

#[async_trait]
impl WebSocketDialer for TungsteniteDialer {
    async fn dial(&self, url: &str) -> Result<Box<dyn SocketConnection>, TransportError> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))?;
        Ok(Box::new(TungsteniteConnection { stream }))
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub exponential: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
            exponential: true,
        }
    }
}

pub struct SocketModeTransport {
    http: reqwest::Client,
    chat_api_base: String,
    app_token: String,
    bot_token: String,
    dialer: Box<dyn WebSocketDialer>,
    reconnect: ReconnectPolicy,
    ping_interval: Duration,
    state: RwLock<ConnectionState>,
    reconnect_count: AtomicU64,
}

impl SocketModeTransport {
    pub fn new(
        chat_api_base: impl Into<String>,
        app_token: impl Into<String>,
        bot_token: impl Into<String>,
        dialer: Box<dyn WebSocketDialer>,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            chat_api_base: chat_api_base.into(),
            app_token: app_token.into(),
            bot_token: bot_token.into(),
            dialer,
            reconnect,
            ping_interval: Duration::from_secs(30),
            state: RwLock::new(ConnectionState::Disconnected),
            reconnect_count: AtomicU64::new(0),
        }
    }

    /// Override the keepalive ping cadence (defaults to 30s).
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    fn set_state(&self, s: ConnectionState) {
        *self.state.write().unwrap() = s;
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        if !self.reconnect.exponential {
            return self.reconnect.base_delay.min(self.reconnect.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        (self.reconnect.base_delay.saturating_mul(factor)).min(self.reconnect.max_delay)
    }

    async fn acquire_url(&self) -> Result<String, TransportError> {
        #[derive(Deserialize)]
        struct OpenResponse {
            ok: bool,
            url: Option<String>,
            error: Option<String>,
        }

        let resp = self
            .http
            .post(format!("{}/apps.connections.open", self.chat_api_base))
            .bearer_auth(&self.app_token)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let body: OpenResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        if body.ok {
            let url = body
                .url
                .ok_or_else(|| TransportError::Http("apps.connections.open: missing url".into()))?;
            url::Url::parse(&url)
                .map_err(|e| TransportError::Http(format!("malformed socket url: {e}")))?;
            Ok(url)
        } else {
            Err(TransportError::Http(
                body.error.unwrap_or_else(|| "unknown error".into()),
            ))
        }
    }

    /// Send a reply over the outbound REST path (never the socket).
    pub async fn post_message(&self, channel: &str, text: &str) -> Result<(), TransportError> {
        #[derive(Serialize)]
        struct Body<'a> {
            channel: &'a str,
            text: &'a str,
            as_user: bool,
        }
        #[derive(Deserialize)]
        struct Resp {
            ok: bool,
            error: Option<String>,
        }

        let resp = self
            .http
            .post(format!("{}/chat.postMessage", self.chat_api_base))
            .bearer_auth(&self.bot_token)
            .json(&Body { channel, text, as_user: true })
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        if body.ok {
            Ok(())
        } else {
            Err(TransportError::Http(body.error.unwrap_or_default()))
        }
    }

    /// Drive the connect/receive/reconnect loop until `shutdown` is set to
    /// `true`, or the reconnect budget is exhausted.
    pub async fn run(
        &self,
        events: mpsc::Sender<InboundEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let mut attempt: u32 = 0;

        'reconnect: loop {
            if *shutdown.borrow() {
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            self.set_state(ConnectionState::FetchingUrl);
            let url = match self.acquire_url().await {
                Ok(u) => u,
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.reconnect.max_attempts {
                        return Err(e);
                    }
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                    continue 'reconnect;
                }
            };

            self.set_state(ConnectionState::Connecting);
            let mut conn = match self.dialer.dial(&url).await {
                Ok(c) => c,
                Err(e) => {
                    self.reconnect_count.fetch_add(1, Ordering::Relaxed);
                    attempt += 1;
                    if attempt >= self.reconnect.max_attempts {
                        return Err(e);
                    }
                    tokio::time::sleep(self.backoff_delay(attempt)).await;
                    continue 'reconnect;
                }
            };

            self.set_state(ConnectionState::Open);
            attempt = 0;

            let mut ping_id: u64 = 0;
            let mut ticker = tokio::time::interval(self.ping_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately; consume it

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        ping_id += 1;
                        let frame = format!("{{\"id\":{ping_id},\"type\":\"ping\"}}");
                        let _ = conn.send_text(frame).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            self.set_state(ConnectionState::Closing);
                            conn.close().await;
                            self.set_state(ConnectionState::Disconnected);
                            return Ok(());
                        }
                    }
                    frame = conn.recv() => {
                        match frame {
                            Some(Ok(text)) => {
                                if let Some((envelope_id, event)) = parse_envelope(&text) {
                                    if let Some(id) = envelope_id {
                                        let ack = format!("{{\"envelope_id\":\"{id}\"}}");
                                        let _ = conn.send_text(ack).await;
                                    }
                                    match event {
                                        InboundEvent::Disconnect { reason } => {
                                            debug!(reason = ?reason, "server requested disconnect; closing and reconnecting");
                                            break;
                                        }
                                        InboundEvent::Other | InboundEvent::Hello => {}
                                        other => {
                                            let _ = events.send(other).await;
                                        }
                                    }
                                }
                            }
                            Some(Err(_)) | None => break,
                        }
                    }
                }
            }

            self.set_state(ConnectionState::Closing);
            conn.close().await;
            self.set_state(ConnectionState::Disconnected);
            self.reconnect_count.fetch_add(1, Ordering::Relaxed);
            attempt += 1;
            if attempt >= self.reconnect.max_attempts {
                return Err(TransportError::ReconnectExhausted);
            }
            tokio::time::sleep(self.backoff_delay(attempt)).await;
        }
    }
}
