//! Error types for the Chime client

use thiserror::Error;

/// Result type alias for Chime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Chime client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport error (connect, send, mid-session disconnect)
    #[error("transport error: {0}")]
    Transport(String),

    /// Hello handshake failed or timed out
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Audio device error (stream open/start failure)
    #[error("audio error: {0}")]
    Audio(String),

    /// Codec error (per-frame encode/decode failure)
    #[error("codec error: {0}")]
    Codec(String),

    /// Wake word detection error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// Speech recognition error (model load, per-frame recognition)
    #[error("recognition error: {0}")]
    Recognition(String),

    /// MCP protocol error
    #[error("mcp error: {0}")]
    Mcp(String),

    /// IoT device registry error
    #[error("iot error: {0}")]
    Iot(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
