//! WebSocket transport for the voice-session protocol
//!
//! Connection lifecycle: socket connect → client hello → server hello
//! (bounded wait) → channel open. A reader task routes inbound frames, a
//! heartbeat task probes liveness, and a monitor task catches silently
//! closed sockets. All loss paths funnel into one handler that runs at most
//! once per connection and optionally schedules serialized reconnects with
//! capped exponential backoff.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::message::ClientHello;
use super::{ProtocolEvent, Transport};
use crate::audio::AudioParams;
use crate::config::ServerConfig;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Bound on the socket connect itself.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the wait for the server hello.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Heartbeat ping interval.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long a ping may go unanswered.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the monitor re-checks the socket.
const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Capacity of the event channel to the session layer.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Reconnect behavior after a connection loss.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all
    pub enabled: bool,
    /// Attempt budget before surfacing a terminal error
    pub max_attempts: u32,
    /// Delay before the first attempt (doubles each attempt)
    pub base_delay: Duration,
    /// Delay cap
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 0,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    ///
    /// Doubles per attempt from `base_delay`, capped at `max_delay`, so
    /// successive delays are non-decreasing.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let doubled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        doubled.min(self.max_delay)
    }
}

/// Observable connection state, persisted across reconnects.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    /// Whether the hello handshake has completed on a live socket
    pub connected: bool,
    /// Reconnect attempts since the last successful connect
    pub reconnect_attempts: u32,
    /// When the last heartbeat ping went out
    pub last_ping_at: Option<Instant>,
    /// When the last pong came back
    pub last_pong_at: Option<Instant>,
}

struct Inner {
    writer: Mutex<Option<WsSink>>,
    /// Hello completed and the socket has not dropped since
    connected: AtomicBool,
    /// Raw socket liveness, cleared the moment the reader observes a close
    socket_open: AtomicBool,
    is_closing: AtomicBool,
    /// Loss handling runs once per connection; reset on successful connect
    loss_handled: AtomicBool,
    reconnect_in_flight: AtomicBool,
    reconnect_attempts: AtomicU32,
    hello_notify: Mutex<Option<Arc<Notify>>>,
    session_id: std::sync::Mutex<String>,
    last_ping_at: std::sync::Mutex<Option<Instant>>,
    last_pong_at: std::sync::Mutex<Option<Instant>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// WebSocket implementation of [`Transport`].
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct WebSocketTransport {
    config: Arc<ServerConfig>,
    audio_params: AudioParams,
    reconnect: ReconnectPolicy,
    hello_timeout: Duration,
    events: mpsc::Sender<ProtocolEvent>,
    inner: Arc<Inner>,
}

impl WebSocketTransport {
    /// Create a transport and the event receiver for the session layer.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        audio_params: AudioParams,
        reconnect: ReconnectPolicy,
    ) -> (Self, mpsc::Receiver<ProtocolEvent>) {
        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let transport = Self {
            config: Arc::new(config),
            audio_params,
            reconnect,
            hello_timeout: HELLO_TIMEOUT,
            events,
            inner: Arc::new(Inner {
                writer: Mutex::new(None),
                connected: AtomicBool::new(false),
                socket_open: AtomicBool::new(false),
                is_closing: AtomicBool::new(false),
                loss_handled: AtomicBool::new(false),
                reconnect_in_flight: AtomicBool::new(false),
                reconnect_attempts: AtomicU32::new(0),
                hello_notify: Mutex::new(None),
                session_id: std::sync::Mutex::new(String::new()),
                last_ping_at: std::sync::Mutex::new(None),
                last_pong_at: std::sync::Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        (transport, rx)
    }

    /// Override the server-hello wait bound (primarily for tests).
    #[must_use]
    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    /// Snapshot of the observable connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        ConnectionState {
            connected: self.inner.connected.load(Ordering::Acquire),
            reconnect_attempts: self.inner.reconnect_attempts.load(Ordering::Acquire),
            last_ping_at: self.inner.last_ping_at.lock().ok().and_then(|g| *g),
            last_pong_at: self.inner.last_pong_at.lock().ok().and_then(|g| *g),
        }
    }

    async fn emit(&self, event: ProtocolEvent) {
        if self.events.send(event).await.is_err() {
            tracing::debug!("protocol event receiver dropped");
        }
    }

    /// Open the socket and run the hello handshake.
    ///
    /// On any failure the partially opened connection is torn down so no
    /// half-open state survives; the reason is returned for the caller to
    /// surface (or suppress, on intermediate reconnect attempts).
    async fn establish(&self) -> Result<(), String> {
        if self.inner.is_closing.load(Ordering::Acquire) {
            return Err("transport is closing".to_string());
        }

        let parsed = url::Url::parse(&self.config.websocket_url)
            .map_err(|e| format!("invalid websocket url: {e}"))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(format!("unsupported url scheme: {}", parsed.scheme()));
        }

        let mut request = self
            .config
            .websocket_url
            .as_str()
            .into_client_request()
            .map_err(|e| format!("invalid websocket url: {e}"))?;

        let headers = request.headers_mut();
        if !self.config.access_token.is_empty() {
            if let Ok(value) = format!("Bearer {}", self.config.access_token).parse() {
                headers.insert("Authorization", value);
            }
        }
        if let Ok(value) = "1".parse() {
            headers.insert("Protocol-Version", value);
        }
        if let Ok(value) = self.config.device_id.parse() {
            headers.insert("Device-Id", value);
        }
        if let Ok(value) = self.config.client_id.parse() {
            headers.insert("Client-Id", value);
        }

        let connect = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request)).await;
        let ws = match connect {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => return Err(format!("unable to connect: {e}")),
            Err(_) => return Err("connect timed out".to_string()),
        };

        let (sink, stream) = ws.split();
        *self.inner.writer.lock().await = Some(sink);
        self.inner.socket_open.store(true, Ordering::Release);
        self.inner.loss_handled.store(false, Ordering::Release);

        let hello_notify = Arc::new(Notify::new());
        *self.inner.hello_notify.lock().await = Some(Arc::clone(&hello_notify));

        let reader = tokio::spawn(Self::read_loop(self.clone(), stream));
        self.inner.tasks.lock().await.push(reader);

        let hello = ClientHello::new(&self.audio_params);
        let hello_text =
            serde_json::to_string(&hello).map_err(|e| format!("hello serialization: {e}"))?;
        if let Err(e) = self.send_raw(Message::Text(hello_text)).await {
            self.cleanup_connection().await;
            return Err(format!("hello send failed: {e}"));
        }

        match tokio::time::timeout(self.hello_timeout, hello_notify.notified()).await {
            Ok(()) => {
                self.inner.reconnect_attempts.store(0, Ordering::Release);

                let heartbeat = tokio::spawn(Self::heartbeat_loop(self.clone()));
                let monitor = tokio::spawn(Self::monitor_loop(self.clone()));
                let mut tasks = self.inner.tasks.lock().await;
                tasks.push(heartbeat);
                tasks.push(monitor);

                tracing::info!(url = %self.config.websocket_url, "connected to server");
                Ok(())
            }
            Err(_) => {
                self.cleanup_connection().await;
                Err("timed out waiting for server hello".to_string())
            }
        }
    }

    async fn send_raw(
        &self,
        message: Message,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let mut writer = self.inner.writer.lock().await;
        match writer.as_mut() {
            Some(sink) => sink.send(message).await,
            None => Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed),
        }
    }

    /// Inbound frame loop. Ends when the socket closes or errors.
    async fn read_loop(self, mut stream: WsStream) {
        loop {
            let frame = stream.next().await;
            if self.inner.is_closing.load(Ordering::Acquire) {
                break;
            }

            match frame {
                Some(Ok(Message::Text(text))) => self.handle_text(&text).await,
                Some(Ok(Message::Binary(data))) => {
                    self.emit(ProtocolEvent::IncomingAudio(data)).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    if let Ok(mut pong) = self.inner.last_pong_at.lock() {
                        *pong = Some(Instant::now());
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    self.trigger_loss("connection closed by peer".to_string());
                    break;
                }
                Some(Err(e)) => {
                    self.trigger_loss(format!("read error: {e}"));
                    break;
                }
            }
        }

        self.inner.socket_open.store(false, Ordering::Release);
    }

    async fn handle_text(&self, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "discarding invalid json frame");
                return;
            }
        };

        if value.get("type").and_then(|t| t.as_str()) == Some("hello") {
            self.handle_server_hello(&value).await;
            return;
        }

        self.emit(ProtocolEvent::IncomingJson(value)).await;
    }

    async fn handle_server_hello(&self, value: &serde_json::Value) {
        let transport = value.get("transport").and_then(|t| t.as_str());
        if transport != Some("websocket") {
            tracing::error!(?transport, "unsupported transport in server hello");
            return;
        }

        if let Some(session_id) = value.get("session_id").and_then(|s| s.as_str()) {
            if let Ok(mut id) = self.inner.session_id.lock() {
                *id = session_id.to_string();
            }
        }

        self.inner.connected.store(true, Ordering::Release);

        if let Some(notify) = self.inner.hello_notify.lock().await.as_ref() {
            notify.notify_one();
        }

        self.emit(ProtocolEvent::ChannelOpened).await;
        tracing::debug!("server hello processed, channel open");
    }

    /// Periodic liveness probe: ping, then verify a pong arrived in time.
    async fn heartbeat_loop(self) {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        interval.tick().await;

        loop {
            interval.tick().await;
            if self.inner.is_closing.load(Ordering::Acquire)
                || !self.inner.socket_open.load(Ordering::Acquire)
            {
                break;
            }

            let ping_at = Instant::now();
            if let Ok(mut ping) = self.inner.last_ping_at.lock() {
                *ping = Some(ping_at);
            }

            if let Err(e) = self.send_raw(Message::Ping(Vec::new())).await {
                self.trigger_loss(format!("heartbeat send failed: {e}"));
                break;
            }
            tracing::trace!("sent heartbeat ping");

            tokio::time::sleep(PONG_TIMEOUT).await;

            let answered = self
                .inner
                .last_pong_at
                .lock()
                .ok()
                .and_then(|pong| *pong)
                .is_some_and(|pong| pong >= ping_at);
            if !answered {
                self.trigger_loss("heartbeat pong timeout".to_string());
                break;
            }
        }
    }

    /// Catches sockets that died without the reader noticing.
    async fn monitor_loop(self) {
        let mut interval = tokio::time::interval(MONITOR_INTERVAL);
        interval.tick().await;

        loop {
            interval.tick().await;
            if self.inner.is_closing.load(Ordering::Acquire) {
                break;
            }

            if self.inner.connected.load(Ordering::Acquire)
                && !self.inner.socket_open.load(Ordering::Acquire)
            {
                self.trigger_loss("socket closed".to_string());
                break;
            }
        }
    }

    /// Route a detected loss into the (once-per-loss) handler.
    ///
    /// Runs detached so a reader or heartbeat task never has to abort
    /// itself mid-cleanup.
    fn trigger_loss(&self, reason: String) {
        if self.inner.is_closing.load(Ordering::Acquire) {
            return;
        }
        if self.inner.loss_handled.swap(true, Ordering::AcqRel) {
            return;
        }

        let transport = self.clone();
        tokio::spawn(async move {
            transport.handle_connection_loss(reason).await;
        });
    }

    async fn handle_connection_loss(&self, reason: String) {
        tracing::warn!(reason = %reason, "connection lost");

        self.inner.connected.store(false, Ordering::Release);
        self.cleanup_connection().await;
        self.emit(ProtocolEvent::ChannelClosed).await;

        let attempts = self.inner.reconnect_attempts.load(Ordering::Acquire);
        if self.reconnect.enabled && attempts < self.reconnect.max_attempts {
            self.schedule_reconnect(reason);
        } else if self.reconnect.enabled {
            self.emit(ProtocolEvent::NetworkError(format!(
                "connection lost and reconnect budget exhausted: {reason}"
            )))
            .await;
        } else {
            self.emit(ProtocolEvent::NetworkError(format!(
                "connection lost: {reason}"
            )))
            .await;
        }
    }

    /// Run reconnect attempts strictly one at a time.
    fn schedule_reconnect(&self, original_reason: String) {
        if self.inner.reconnect_in_flight.swap(true, Ordering::AcqRel) {
            return;
        }

        let transport = self.clone();
        tokio::spawn(async move {
            loop {
                let attempt = transport
                    .inner
                    .reconnect_attempts
                    .fetch_add(1, Ordering::AcqRel)
                    + 1;
                let max_attempts = transport.reconnect.max_attempts;

                transport
                    .emit(ProtocolEvent::Reconnecting {
                        attempt,
                        max_attempts,
                    })
                    .await;
                tracing::info!(attempt, max_attempts, "scheduling reconnect");

                tokio::time::sleep(transport.reconnect.delay_for_attempt(attempt)).await;
                if transport.inner.is_closing.load(Ordering::Acquire) {
                    break;
                }

                match transport.establish().await {
                    Ok(()) => {
                        tracing::info!(attempt, "reconnect successful");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(attempt, max_attempts, error = %e, "reconnect failed");
                        if attempt >= max_attempts {
                            transport
                                .emit(ProtocolEvent::NetworkError(format!(
                                    "reconnect failed after {max_attempts} attempts: \
                                     {original_reason}"
                                )))
                                .await;
                            break;
                        }
                    }
                }
            }

            transport
                .inner
                .reconnect_in_flight
                .store(false, Ordering::Release);
        });
    }

    /// Tear down socket and background tasks. Safe to call repeatedly.
    async fn cleanup_connection(&self) {
        self.inner.connected.store(false, Ordering::Release);
        self.inner.socket_open.store(false, Ordering::Release);

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().await.drain(..).collect();
        for task in tasks {
            task.abort();
        }

        let mut writer = self.inner.writer.lock().await;
        if let Some(mut sink) = writer.take() {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "error closing websocket sink");
            }
        }

        if let Ok(mut ping) = self.inner.last_ping_at.lock() {
            *ping = None;
        }
        if let Ok(mut pong) = self.inner.last_pong_at.lock() {
            *pong = None;
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> bool {
        match self.establish().await {
            Ok(()) => true,
            Err(reason) => {
                tracing::error!(reason = %reason, "websocket connect failed");
                self.emit(ProtocolEvent::NetworkError(reason)).await;
                false
            }
        }
    }

    async fn send_text(&self, text: String) {
        if !self.is_audio_channel_opened() {
            tracing::warn!("channel not open, dropping text message");
            return;
        }

        if let Err(e) = self.send_raw(Message::Text(text)).await {
            tracing::warn!(error = %e, "text send failed");
            self.trigger_loss(format!("text send failed: {e}"));
        }
    }

    async fn send_audio(&self, data: Vec<u8>) {
        if !self.is_audio_channel_opened() {
            tracing::trace!("channel not open, dropping audio frame");
            return;
        }

        if let Err(e) = self.send_raw(Message::Binary(data)).await {
            tracing::warn!(error = %e, "audio send failed");
            self.trigger_loss(format!("audio send failed: {e}"));
        }
    }

    fn is_audio_channel_opened(&self) -> bool {
        !self.inner.is_closing.load(Ordering::Acquire)
            && self.inner.connected.load(Ordering::Acquire)
            && self.inner.socket_open.load(Ordering::Acquire)
    }

    async fn close_audio_channel(&self) {
        self.inner.is_closing.store(true, Ordering::Release);

        self.cleanup_connection().await;
        self.emit(ProtocolEvent::ChannelClosed).await;

        self.inner.is_closing.store(false, Ordering::Release);
        tracing::info!("audio channel closed");
    }

    fn session_id(&self) -> String {
        self.inner
            .session_id
            .lock()
            .map(|id| id.clone())
            .unwrap_or_default()
    }
}
