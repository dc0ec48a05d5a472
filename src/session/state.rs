//! Session state types
//!
//! `DeviceState` is owned exclusively by the session controller and mutated
//! only through its command queue.

use std::fmt;

/// Top-level device state exposed to the transport and display layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    /// Standing by, nothing in flight
    #[default]
    Idle,
    /// Opening the audio channel
    Connecting,
    /// Streaming microphone audio to the server
    Listening,
    /// Playing back synthesized speech
    Speaking,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Listening => write!(f, "listening"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Policy for how a listening session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListeningMode {
    /// Released explicitly by the user
    Manual,
    /// Server stops on detected silence
    AutoStop,
    /// Continuous full-duplex listening
    Realtime,
}

impl ListeningMode {
    /// Wire value used in `listen` control messages.
    #[must_use]
    pub const fn wire_value(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AutoStop => "auto",
            Self::Realtime => "realtime",
        }
    }
}

/// Why speech output was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// No specific reason (user toggled)
    None,
    /// The wake word fired mid-playback
    WakeWordDetected,
    /// Voice activity detected the user talking over playback
    UserInterruption,
}
