//! Streaming speech recognizer seam for the wake-word detector
//!
//! The detector only needs transcripts; where they come from is behind
//! this trait. The Vosk implementation is feature-gated — it links a
//! native model library — and its absence just disables the wake path.

use crate::Result;

/// A transcript emitted while streaming audio into a recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    /// Interim hypothesis, may still change
    Partial(String),
    /// Finalized utterance text
    Final(String),
}

/// Incremental speech recognizer fed fixed PCM frames.
pub trait SpeechRecognizer: Send {
    /// Feed one frame; returns a transcript when one is available.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Recognition`] on a decoder failure.
    fn accept_frame(&mut self, pcm: &[i16]) -> Result<Option<Transcript>>;

    /// Reset decoding state after a trigger.
    fn reset(&mut self);
}

#[cfg(feature = "vosk-recognizer")]
pub use vosk_impl::VoskRecognizer;

#[cfg(feature = "vosk-recognizer")]
mod vosk_impl {
    use std::path::Path;

    use vosk::{DecodingState, Model, Recognizer};

    use super::{SpeechRecognizer, Transcript};
    use crate::{Error, Result};

    /// Vosk-backed streaming recognizer.
    pub struct VoskRecognizer {
        recognizer: Recognizer,
    }

    impl VoskRecognizer {
        /// Load the model and build a recognizer for the given rate.
        ///
        /// # Errors
        ///
        /// Returns [`Error::Recognition`] if the model cannot be loaded;
        /// callers disable the wake-word path rather than failing the
        /// session.
        pub fn new(model_path: &Path, sample_rate: u32) -> Result<Self> {
            let path = model_path.to_string_lossy();
            let model = Model::new(path.as_ref()).ok_or_else(|| {
                Error::Recognition(format!("failed to load model: {path}"))
            })?;

            #[allow(clippy::cast_precision_loss)]
            let mut recognizer = Recognizer::new(&model, sample_rate as f32)
                .ok_or_else(|| Error::Recognition("failed to create recognizer".to_string()))?;
            recognizer.set_words(true);

            tracing::info!(model = %path, sample_rate, "speech model loaded");
            Ok(Self { recognizer })
        }
    }

    impl SpeechRecognizer for VoskRecognizer {
        fn accept_frame(&mut self, pcm: &[i16]) -> Result<Option<Transcript>> {
            let state = self
                .recognizer
                .accept_waveform(pcm)
                .map_err(|e| Error::Recognition(format!("accept_waveform: {e}")))?;

            match state {
                DecodingState::Finalized => {
                    let text = self
                        .recognizer
                        .result()
                        .single()
                        .map(|r| r.text.to_string())
                        .unwrap_or_default();
                    if text.is_empty() {
                        Ok(None)
                    } else {
                        Ok(Some(Transcript::Final(text)))
                    }
                }
                DecodingState::Running => {
                    let partial = self.recognizer.partial_result().partial.to_string();
                    if partial.is_empty() {
                        Ok(None)
                    } else {
                        Ok(Some(Transcript::Partial(partial)))
                    }
                }
                DecodingState::Failed => {
                    Err(Error::Recognition("decoding failed".to_string()))
                }
            }
        }

        fn reset(&mut self) {
            self.recognizer.reset();
        }
    }
}
