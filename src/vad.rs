//! Voice-activity detection for user barge-in
//!
//! A deliberately simple energy + consecutive-frame detector, active only
//! while the session is speaking. Once enough consecutive frames look like
//! speech, it fires one abort and pauses itself until the session settles.

use std::time::Duration;

use tokio::sync::watch;

use crate::audio::AudioHandle;
use crate::session::{AbortReason, DeviceState, SessionHandle};

/// Mean-absolute-amplitude floor below which a frame is not speech.
const ENERGY_THRESHOLD: f64 = 300.0;

/// Consecutive speech frames required to call it a barge-in.
const SPEECH_WINDOW: u32 = 5;

/// Sleep when the frame queue is empty.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Energy-based speech-run detector.
pub struct VoiceActivityDetector {
    energy_threshold: f64,
    speech_window: u32,
    speech_count: u32,
    paused: bool,
}

impl VoiceActivityDetector {
    /// Detector with the default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            energy_threshold: ENERGY_THRESHOLD,
            speech_window: SPEECH_WINDOW,
            speech_count: 0,
            paused: false,
        }
    }

    /// Feed one frame; returns `true` when a barge-in should fire.
    ///
    /// On firing, the detector pauses itself; call [`Self::resume`] once
    /// the session has settled.
    pub fn process_frame(&mut self, pcm: &[i16]) -> bool {
        if self.paused || pcm.is_empty() {
            return false;
        }

        if frame_energy(pcm) > self.energy_threshold {
            self.speech_count += 1;
            tracing::trace!(speech_count = self.speech_count, "speech frame");

            if self.speech_count >= self.speech_window {
                self.paused = true;
                self.speech_count = 0;
                return true;
            }
        } else {
            self.speech_count = 0;
        }

        false
    }

    /// Clear counters without touching the paused flag.
    pub fn reset(&mut self) {
        self.speech_count = 0;
    }

    /// Re-arm after a self-pause.
    pub fn resume(&mut self) {
        self.paused = false;
        self.speech_count = 0;
    }

    /// Whether the detector paused itself after a trigger.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }
}

impl Default for VoiceActivityDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Mean absolute amplitude of a PCM frame.
#[allow(clippy::cast_precision_loss)]
fn frame_energy(pcm: &[i16]) -> f64 {
    let sum: f64 = pcm.iter().map(|&s| f64::from(s).abs()).sum();
    sum / pcm.len() as f64
}

/// Barge-in loop: watch frames only while the session is speaking.
pub async fn run_vad_loop(
    mut detector: VoiceActivityDetector,
    audio: AudioHandle,
    session: SessionHandle,
    mut state: watch::Receiver<DeviceState>,
) {
    tracing::debug!("voice activity detector started");

    loop {
        let speaking = *state.borrow() == DeviceState::Speaking;
        if !speaking {
            detector.reset();
            if state.changed().await.is_err() {
                break;
            }
            detector.resume();
            continue;
        }

        match audio.pop_vad_frame() {
            Some(frame) => {
                if detector.process_frame(&frame) {
                    tracing::info!("voice activity during playback, interrupting");
                    session.abort_speaking(AbortReason::UserInterruption);
                }
            }
            None => tokio::time::sleep(IDLE_POLL).await,
        }
    }
}
