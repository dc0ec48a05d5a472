//! Configuration management for the Chime client

pub mod file;

use std::path::{Path, PathBuf};

use file::ChimeConfigFile;

use crate::Result;

/// Default WebSocket endpoint.
const DEFAULT_WEBSOCKET_URL: &str = "wss://voice.chime.dev/v1";

/// Default wake phrase.
const DEFAULT_WAKE_WORD: &str = "hello chime";

/// Client configuration, assembled once at startup and passed by reference
/// into each component's constructor.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server connection settings
    pub server: ServerConfig,

    /// Audio pipeline settings
    pub audio: AudioSettings,

    /// Wake word settings
    pub wake: WakeSettings,

    /// Reconnect settings
    pub reconnect: ReconnectSettings,
}

/// Server connection settings
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// WebSocket endpoint (ws:// or wss://)
    pub websocket_url: String,

    /// Bearer token for the Authorization header (may be empty)
    pub access_token: String,

    /// Device identifier header
    pub device_id: String,

    /// Client identifier header
    pub client_id: String,
}

/// Audio pipeline settings
#[derive(Debug, Clone)]
pub struct AudioSettings {
    /// Frame duration in milliseconds
    pub frame_duration_ms: u32,
}

/// Wake word settings
#[derive(Debug, Clone)]
pub struct WakeSettings {
    /// Whether the wake word detector runs
    pub enabled: bool,

    /// Wake phrases to listen for
    pub wake_words: Vec<String>,

    /// Path to the speech model directory
    pub model_path: PathBuf,

    /// Minimum similarity for a match
    pub similarity_threshold: f64,

    /// Maximum edit distance for near-miss matches
    pub max_edit_distance: usize,
}

/// Reconnect settings
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Enable automatic reconnection
    pub enabled: bool,

    /// Attempt budget before surfacing a terminal error
    pub max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                websocket_url: DEFAULT_WEBSOCKET_URL.to_string(),
                access_token: String::new(),
                device_id: String::new(),
                client_id: String::new(),
            },
            audio: AudioSettings {
                frame_duration_ms: 20,
            },
            wake: WakeSettings {
                enabled: false,
                wake_words: vec![DEFAULT_WAKE_WORD.to_string()],
                model_path: PathBuf::from("models/vosk-model-small"),
                similarity_threshold: 0.85,
                max_edit_distance: 1,
            },
            reconnect: ReconnectSettings {
                enabled: true,
                max_attempts: 5,
            },
        }
    }
}

impl Config {
    /// Load configuration: defaults, overlaid with the user's config file
    /// if one exists, with generated identifiers filled in.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing config file cannot be read or
    /// parsed. A missing file is not an error.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = match path {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };

        config.ensure_identifiers();
        Ok(config)
    }

    /// Load configuration from a specific TOML file over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let overlay: ChimeConfigFile = toml::from_str(&raw)?;

        tracing::debug!(path = %path.display(), "loaded config file");

        let mut config = Self::default();
        config.apply_overlay(overlay);
        config.ensure_identifiers();
        Ok(config)
    }

    /// Default config file location (`~/.config/chime/config.toml`).
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "chime", "chime")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn apply_overlay(&mut self, overlay: ChimeConfigFile) {
        if let Some(url) = overlay.server.websocket_url {
            self.server.websocket_url = url;
        }
        if let Some(token) = overlay.server.access_token {
            self.server.access_token = token;
        }
        if let Some(device_id) = overlay.server.device_id {
            self.server.device_id = device_id;
        }
        if let Some(client_id) = overlay.server.client_id {
            self.server.client_id = client_id;
        }

        if let Some(duration) = overlay.audio.frame_duration_ms {
            self.audio.frame_duration_ms = duration;
        }

        if let Some(enabled) = overlay.wake.enabled {
            self.wake.enabled = enabled;
        }
        if let Some(words) = overlay.wake.wake_words {
            self.wake.wake_words = words;
        }
        if let Some(model_path) = overlay.wake.model_path {
            self.wake.model_path = PathBuf::from(model_path);
        }
        if let Some(threshold) = overlay.wake.similarity_threshold {
            self.wake.similarity_threshold = threshold;
        }
        if let Some(distance) = overlay.wake.max_edit_distance {
            self.wake.max_edit_distance = distance;
        }

        if let Some(enabled) = overlay.reconnect.enabled {
            self.reconnect.enabled = enabled;
        }
        if let Some(max_attempts) = overlay.reconnect.max_attempts {
            self.reconnect.max_attempts = max_attempts;
        }
    }

    /// Generate device/client identifiers when the file did not set them.
    fn ensure_identifiers(&mut self) {
        if self.server.client_id.is_empty() {
            self.server.client_id = uuid::Uuid::new_v4().to_string();
            tracing::debug!(client_id = %self.server.client_id, "generated client id");
        }

        if self.server.device_id.is_empty() {
            // MAC-address shaped identifier derived from a fresh UUID
            let bytes = uuid::Uuid::new_v4();
            let b = bytes.as_bytes();
            self.server.device_id = format!(
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                b[0], b[1], b[2], b[3], b[4], b[5]
            );
            tracing::debug!(device_id = %self.server.device_id, "generated device id");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let mut config = Config::default();
        config.ensure_identifiers();

        assert_eq!(config.audio.frame_duration_ms, 20);
        assert!(!config.wake.enabled);
        assert!(config.reconnect.enabled);
        assert!(!config.server.client_id.is_empty());
        assert_eq!(config.server.device_id.len(), 17);
    }

    #[test]
    fn overlay_wins_over_defaults() {
        let mut config = Config::default();
        config.apply_overlay(
            toml::from_str(
                r#"
                [server]
                websocket_url = "ws://localhost:9000/v1"
                device_id = "aa:bb:cc:dd:ee:ff"

                [audio]
                frame_duration_ms = 60

                [reconnect]
                enabled = false
                "#,
            )
            .unwrap(),
        );
        config.ensure_identifiers();

        assert_eq!(config.server.websocket_url, "ws://localhost:9000/v1");
        assert_eq!(config.server.device_id, "aa:bb:cc:dd:ee:ff");
        assert_eq!(config.audio.frame_duration_ms, 60);
        assert!(!config.reconnect.enabled);
        // Untouched fields keep defaults
        assert_eq!(config.wake.wake_words, vec![DEFAULT_WAKE_WORD.to_string()]);
    }
}
