//! TOML configuration file loading
//!
//! Supports `~/.config/chime/config.toml` as a persistent config source.
//! All fields are optional — the file is a partial overlay on top of
//! defaults.

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ChimeConfigFile {
    /// Server connection settings
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Audio pipeline settings
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Wake word settings
    #[serde(default)]
    pub wake: WakeFileConfig,

    /// Reconnect settings
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
}

/// Server connection configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// WebSocket endpoint (ws:// or wss://)
    pub websocket_url: Option<String>,

    /// Bearer token sent in the Authorization header
    pub access_token: Option<String>,

    /// Device identifier header; generated when absent
    pub device_id: Option<String>,

    /// Client identifier header; generated when absent
    pub client_id: Option<String>,
}

/// Audio pipeline configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Frame duration in milliseconds (20 or 60)
    pub frame_duration_ms: Option<u32>,
}

/// Wake word configuration
#[derive(Debug, Default, Deserialize)]
pub struct WakeFileConfig {
    /// Enable the wake word detector
    pub enabled: Option<bool>,

    /// Wake phrases to listen for
    pub wake_words: Option<Vec<String>>,

    /// Path to the speech model directory
    pub model_path: Option<String>,

    /// Minimum similarity for a match (0.1 to 1.0)
    pub similarity_threshold: Option<f64>,

    /// Maximum edit distance for near-miss matches (0 to 5)
    pub max_edit_distance: Option<usize>,
}

/// Reconnect configuration
#[derive(Debug, Default, Deserialize)]
pub struct ReconnectFileConfig {
    /// Enable automatic reconnection
    pub enabled: Option<bool>,

    /// Attempt budget before giving up
    pub max_attempts: Option<u32>,
}
