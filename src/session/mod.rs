//! Session state machine and command processing
//!
//! The controller owns the device state; everything else talks to it
//! through [`SessionHandle`], which enqueues typed commands executed
//! strictly in order.

mod commands;
mod controller;
mod state;

pub use commands::{CommandQueue, SessionCommand};
pub use controller::{run_audio_sender, SessionController, SessionHandle};
pub use state::{AbortReason, DeviceState, ListeningMode};
