//! Wire messages for the voice-session protocol
//!
//! Text frames carry JSON control messages selected by a `type`
//! discriminator; binary frames carry one opus packet each.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::AudioParams;

/// Client hello, the first message after the socket opens.
#[derive(Debug, Serialize)]
pub struct ClientHello {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub version: u32,
    pub features: HelloFeatures,
    pub transport: &'static str,
    pub audio_params: HelloAudioParams,
}

/// Feature flags advertised in the hello.
#[derive(Debug, Serialize)]
pub struct HelloFeatures {
    pub mcp: bool,
}

/// Audio parameters negotiated in the hello.
#[derive(Debug, Serialize)]
pub struct HelloAudioParams {
    pub format: &'static str,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_duration: u32,
}

impl ClientHello {
    /// Build the hello for the given audio parameters.
    #[must_use]
    pub fn new(params: &AudioParams) -> Self {
        Self {
            kind: "hello",
            version: 1,
            features: HelloFeatures { mcp: true },
            transport: "websocket",
            audio_params: HelloAudioParams {
                format: "opus",
                sample_rate: params.input_sample_rate,
                channels: params.channels,
                frame_duration: params.frame_duration_ms,
            },
        }
    }
}

/// Inbound control message, routed by `type`.
///
/// `hello` is consumed inside the transport and never reaches this enum.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Synthesized-speech lifecycle
    Tts {
        state: TtsState,
        #[serde(default)]
        text: Option<String>,
    },
    /// Recognized user speech
    Stt { text: String },
    /// Model-driven emotion hint
    Llm {
        #[serde(default)]
        emotion: Option<String>,
    },
    /// IoT command batch or state push
    Iot {
        #[serde(default)]
        commands: Vec<Value>,
    },
    /// Nested JSON-RPC envelope for the tool-call protocol
    Mcp { payload: Value },
}

/// `tts` message phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsState {
    Start,
    Stop,
    SentenceStart,
}

impl ControlMessage {
    /// Parse a routed JSON value into a typed control message.
    ///
    /// # Errors
    ///
    /// Returns the serde error for unknown `type` values or malformed
    /// payloads; callers log and drop such messages.
    pub fn parse(value: &Value) -> serde_json::Result<Self> {
        Self::deserialize(value)
    }
}
