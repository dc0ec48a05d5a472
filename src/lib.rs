//! Chime - a voice-assistant client runtime
//!
//! Chime captures microphone audio, streams it opus-encoded to a remote
//! assistant service over a persistent WebSocket, plays back synthesized
//! speech, and locally detects wake phrases and user barge-in.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                Driver callback threads               │
//! │   mic capture → resample → frame → opus encode       │
//! │   playback ← bounded queue ← opus decode             │
//! └──────────────────┬───────────────────────────────────┘
//!                    │ bounded drop-oldest queues
//! ┌──────────────────▼───────────────────────────────────┐
//! │             Cooperative control plane                │
//! │  SessionController │ WebSocketTransport │ detectors  │
//! └──────────────────┬───────────────────────────────────┘
//!                    │
//! ┌──────────────────▼───────────────────────────────────┐
//! │        Assistant service (hello / listen / tts)      │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The session controller owns the device state machine; every mutating
//! operation goes through its single command queue, so the state can never
//! be written from two places at once.

pub mod audio;
pub mod config;
pub mod daemon;
pub mod display;
pub mod error;
pub mod iot;
pub mod mcp;
pub mod protocol;
pub mod session;
pub mod vad;
pub mod wake;

pub use audio::{AudioHandle, AudioParams, AudioPipeline};
pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use protocol::{ProtocolEvent, Transport, WebSocketTransport};
pub use session::{AbortReason, DeviceState, ListeningMode, SessionController, SessionHandle};
pub use vad::VoiceActivityDetector;
pub use wake::WakeWordDetector;
