//! Transport protocol: connection lifecycle, framing, and control messages
//!
//! The [`Transport`] trait covers the connection lifecycle plus the typed
//! control messages of the voice-session protocol. Everything the transport
//! observes flows to the session layer as [`ProtocolEvent`]s over a channel,
//! keeping the dependency direction explicit.

pub mod message;
mod websocket;

use async_trait::async_trait;
use serde_json::{json, Value};

pub use message::{ClientHello, ControlMessage, TtsState};
pub use websocket::{ReconnectPolicy, WebSocketTransport};

use crate::session::{AbortReason, ListeningMode};

/// Events surfaced by a transport to the session layer.
#[derive(Debug)]
pub enum ProtocolEvent {
    /// A routed JSON control message (everything except `hello`)
    IncomingJson(Value),
    /// One opaque opus packet
    IncomingAudio(Vec<u8>),
    /// Hello handshake completed; the channel is usable
    ChannelOpened,
    /// The channel went away (close, loss, or explicit shutdown)
    ChannelClosed,
    /// Terminal failure: connect/handshake failed or retries exhausted
    NetworkError(String),
    /// A reconnect attempt is being scheduled
    Reconnecting { attempt: u32, max_attempts: u32 },
}

/// Message transport with an explicit audio-channel lifecycle.
///
/// Typed senders have default implementations that build the wire JSON and
/// go through [`Transport::send_text`], so implementations only provide the
/// raw connection plumbing.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection and complete the hello handshake.
    ///
    /// Returns `false` (after emitting a network-error event and tearing
    /// down any half-open socket) on failure.
    async fn connect(&self) -> bool;

    /// Send a text frame. No-op with a warning if the channel is not open.
    async fn send_text(&self, text: String);

    /// Send one encoded audio frame. No-op if the channel is not open.
    async fn send_audio(&self, data: Vec<u8>);

    /// Whether the audio channel is confirmed open, reflecting the actual
    /// socket state rather than a stale cached flag.
    fn is_audio_channel_opened(&self) -> bool;

    /// Open the audio channel, connecting first if necessary.
    async fn open_audio_channel(&self) -> bool {
        if self.is_audio_channel_opened() {
            return true;
        }
        self.connect().await
    }

    /// Close the audio channel and release connection resources.
    async fn close_audio_channel(&self);

    /// Session identifier assigned by the server, if any.
    fn session_id(&self) -> String;

    /// Send `listen start` with the given mode.
    async fn send_start_listening(&self, mode: ListeningMode) {
        let message = json!({
            "session_id": self.session_id(),
            "type": "listen",
            "state": "start",
            "mode": mode.wire_value(),
        });
        self.send_text(message.to_string()).await;
    }

    /// Send `listen stop`.
    async fn send_stop_listening(&self) {
        let message = json!({
            "session_id": self.session_id(),
            "type": "listen",
            "state": "stop",
        });
        self.send_text(message.to_string()).await;
    }

    /// Send `listen detect` with the transcript that triggered the wake.
    async fn send_wake_word_detected(&self, text: &str) {
        let message = json!({
            "session_id": self.session_id(),
            "type": "listen",
            "state": "detect",
            "text": text,
        });
        self.send_text(message.to_string()).await;
    }

    /// Send an `abort` for the current speech output.
    async fn send_abort_speaking(&self, reason: AbortReason) {
        let mut message = json!({
            "session_id": self.session_id(),
            "type": "abort",
        });
        if reason == AbortReason::WakeWordDetected {
            message["reason"] = json!("wake_word_detected");
        }
        self.send_text(message.to_string()).await;
    }

    /// Send one IoT descriptor per message.
    async fn send_iot_descriptors(&self, descriptors: &Value) {
        let Some(list) = descriptors.as_array() else {
            tracing::warn!("iot descriptors must be an array");
            return;
        };

        for descriptor in list {
            let message = json!({
                "session_id": self.session_id(),
                "type": "iot",
                "update": true,
                "descriptors": [descriptor],
            });
            self.send_text(message.to_string()).await;
        }
    }

    /// Send an IoT state snapshot or delta.
    async fn send_iot_states(&self, states: &Value) {
        let message = json!({
            "session_id": self.session_id(),
            "type": "iot",
            "update": true,
            "states": states,
        });
        self.send_text(message.to_string()).await;
    }

    /// Send an MCP JSON-RPC payload wrapped in the `mcp` envelope.
    async fn send_mcp_message(&self, payload: Value) {
        let message = json!({
            "session_id": self.session_id(),
            "type": "mcp",
            "payload": payload,
        });
        self.send_text(message.to_string()).await;
    }
}
