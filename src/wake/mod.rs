//! Wake-word detection
//!
//! Pulls raw frames from the pipeline's wake queue, streams them through a
//! speech recognizer, and scores every transcript against the configured
//! wake phrases phonetically. Triggers are debounced by a cooldown window
//! and a recent-transcript cache so one utterance fires once.

mod phonetic;
mod recognizer;

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub use phonetic::{encode, similarity, PhoneticVariants, VariantKind, WakePattern};
#[cfg(feature = "vosk-recognizer")]
pub use recognizer::VoskRecognizer;
pub use recognizer::{SpeechRecognizer, Transcript};

use crate::audio::AudioHandle;
use crate::session::SessionHandle;
use crate::Result;

/// Suppression window after a trigger.
const DETECTION_COOLDOWN: Duration = Duration::from_secs(3);

/// How many recent transcripts to remember for duplicate suppression.
const RECENT_CACHE_SIZE: usize = 10;

/// Transcripts shorter than this are noise.
const MIN_TRANSCRIPT_CHARS: usize = 3;

/// Partial results are only scored every Nth poll.
const PARTIAL_CHECK_EVERY: u64 = 3;

/// Consecutive loop errors before the detector gives up.
const MAX_LOOP_ERRORS: u32 = 5;

/// Sleep when the wake queue is empty.
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Delay after a recognition error before retrying.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// A confirmed wake-phrase match.
#[derive(Debug, Clone)]
pub struct WakeWordMatch {
    /// The configured phrase that matched
    pub wake_word: String,
    /// The transcript it matched in
    pub transcript: String,
    /// Best similarity score
    pub similarity: f64,
}

/// Scores recognizer transcripts against configured wake phrases.
pub struct WakeWordDetector {
    patterns: Vec<WakePattern>,
    threshold: f64,
    max_edit_distance: usize,
    recognizer: Box<dyn SpeechRecognizer>,
    last_detection: Option<Instant>,
    recent: VecDeque<String>,
    partial_counter: u64,
}

impl WakeWordDetector {
    /// Build a detector for the given phrases.
    ///
    /// Out-of-range tuning values are clamped back to safe defaults rather
    /// than rejected.
    #[must_use]
    pub fn new(
        wake_words: &[String],
        threshold: f64,
        max_edit_distance: usize,
        recognizer: Box<dyn SpeechRecognizer>,
    ) -> Self {
        let threshold = if (0.1..=1.0).contains(&threshold) {
            threshold
        } else {
            tracing::warn!(threshold, "similarity threshold out of range, using 0.85");
            0.85
        };

        let max_edit_distance = if max_edit_distance <= 5 {
            max_edit_distance
        } else {
            tracing::warn!(max_edit_distance, "max edit distance out of range, using 1");
            1
        };

        for word in wake_words {
            let len = word.chars().count();
            if len < 2 {
                tracing::warn!(word, "very short wake word, expect false positives");
            } else if len > 10 {
                tracing::warn!(word, "very long wake word, may hurt recognition");
            }
        }

        let patterns = wake_words.iter().map(|w| WakePattern::new(w)).collect();

        Self {
            patterns,
            threshold,
            max_edit_distance,
            recognizer,
            last_detection: None,
            recent: VecDeque::with_capacity(RECENT_CACHE_SIZE),
            partial_counter: 0,
        }
    }

    /// Feed one raw frame through the recognizer.
    ///
    /// # Errors
    ///
    /// Propagates recognizer failures; the loop counts and bounds them.
    pub fn process_frame(&mut self, pcm: &[i16]) -> Result<Option<WakeWordMatch>> {
        match self.recognizer.accept_frame(pcm)? {
            Some(Transcript::Final(text)) => {
                if text.chars().count() >= MIN_TRANSCRIPT_CHARS {
                    return Ok(self.check_transcript(&text));
                }
            }
            Some(Transcript::Partial(text)) => {
                self.partial_counter += 1;
                if self.partial_counter % PARTIAL_CHECK_EVERY == 0
                    && text.chars().count() >= MIN_TRANSCRIPT_CHARS
                {
                    return Ok(self.check_transcript(&text));
                }
            }
            None => {}
        }
        Ok(None)
    }

    /// Score a transcript against every wake phrase.
    ///
    /// Returns the best match above the threshold, or `None`. Suppressed
    /// during the cooldown window and for recently seen transcripts.
    pub fn check_transcript(&mut self, text: &str) -> Option<WakeWordMatch> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if let Some(last) = self.last_detection {
            if last.elapsed() < DETECTION_COOLDOWN {
                return None;
            }
        }

        if self.recent.iter().any(|t| t == text) {
            return None;
        }
        if self.recent.len() >= RECENT_CACHE_SIZE {
            self.recent.pop_front();
        }
        self.recent.push_back(text.to_string());

        let text_variants = encode(text);
        if text_variants.is_empty() {
            return None;
        }

        let mut best: Option<WakeWordMatch> = None;
        for pattern in &self.patterns {
            let (score, kind) =
                similarity(&text_variants, &pattern.variants, self.max_edit_distance);

            if score >= self.threshold
                && best.as_ref().map_or(true, |b| score > b.similarity)
            {
                tracing::trace!(
                    wake_word = %pattern.original,
                    score,
                    ?kind,
                    "wake phrase candidate"
                );
                best = Some(WakeWordMatch {
                    wake_word: pattern.original.clone(),
                    transcript: text.to_string(),
                    similarity: score,
                });
            }
        }

        if let Some(matched) = &best {
            tracing::info!(
                wake_word = %matched.wake_word,
                similarity = matched.similarity,
                "wake word detected"
            );
            self.last_detection = Some(Instant::now());
            self.recent.clear();
            self.recognizer.reset();
        }

        best
    }

    #[cfg(test)]
    fn expire_cooldown(&mut self) {
        self.last_detection = Some(Instant::now() - DETECTION_COOLDOWN * 2);
    }
}

/// Detector loop: drain the wake queue, trigger the session on matches.
///
/// Gives up after [`MAX_LOOP_ERRORS`] consecutive recognition errors; a
/// degraded wake path never takes the session down with it.
pub async fn run_wake_word_loop(
    mut detector: WakeWordDetector,
    audio: AudioHandle,
    session: SessionHandle,
) {
    tracing::info!("wake word detector started");
    let mut error_count = 0u32;

    loop {
        let Some(frame) = audio.pop_wake_frame() else {
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        };

        match detector.process_frame(&frame) {
            Ok(Some(matched)) => {
                session.wake_word_detected(&matched.wake_word);
                error_count = 0;
            }
            Ok(None) => {
                error_count = 0;
            }
            Err(e) => {
                error_count += 1;
                tracing::error!(
                    error = %e,
                    error_count,
                    max = MAX_LOOP_ERRORS,
                    "wake word recognition error"
                );
                if error_count >= MAX_LOOP_ERRORS {
                    tracing::error!("too many recognition errors, stopping wake word detector");
                    break;
                }
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Recognizer that replays a scripted transcript sequence.
    struct ScriptedRecognizer {
        script: VecDeque<Option<Transcript>>,
        resets: usize,
    }

    impl ScriptedRecognizer {
        fn new(script: Vec<Option<Transcript>>) -> Self {
            Self {
                script: script.into(),
                resets: 0,
            }
        }
    }

    impl SpeechRecognizer for ScriptedRecognizer {
        fn accept_frame(&mut self, _pcm: &[i16]) -> Result<Option<Transcript>> {
            Ok(self.script.pop_front().flatten())
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    fn detector(words: &[&str]) -> WakeWordDetector {
        let words: Vec<String> = words.iter().map(ToString::to_string).collect();
        WakeWordDetector::new(&words, 0.85, 1, Box::new(ScriptedRecognizer::new(vec![])))
    }

    #[test]
    fn exact_transcript_matches() {
        let mut det = detector(&["hello chime"]);
        let matched = det.check_transcript("well hello chime please").unwrap();
        assert_eq!(matched.wake_word, "hello chime");
        assert!((matched.similarity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn near_miss_fires_once_per_cooldown() {
        let mut det = detector(&["hallochime"]);

        // Edit distance 1 from the wake phrase
        assert!(det.check_transcript("hellochime").is_some());

        // Same near-miss again, inside the cooldown window: suppressed
        assert!(det.check_transcript("hellochime").is_none());
        assert!(det.check_transcript("hellochime").is_none());

        // After the window the same transcript may fire again
        det.expire_cooldown();
        assert!(det.check_transcript("hellochime").is_some());
    }

    #[test]
    fn duplicate_transcripts_are_suppressed_without_a_match() {
        let mut det = detector(&["hello chime"]);

        assert!(det.check_transcript("unrelated words").is_none());
        // The same non-matching transcript is cached and skipped entirely
        assert!(det.check_transcript("unrelated words").is_none());
        // A matching transcript still gets through
        assert!(det.check_transcript("hello chime").is_some());
    }

    #[test]
    fn below_threshold_does_not_fire() {
        let mut det = detector(&["hello chime"]);
        assert!(det.check_transcript("goodbye world").is_none());
    }

    #[test]
    fn empty_and_short_transcripts_ignored() {
        let mut det = detector(&["hello chime"]);
        assert!(det.check_transcript("").is_none());
        assert!(det.check_transcript("   ").is_none());
    }

    #[test]
    fn out_of_range_tuning_is_clamped() {
        let words = vec!["hello chime".to_string()];
        let mut det = WakeWordDetector::new(
            &words,
            7.5, // invalid, clamps to 0.85
            99,  // invalid, clamps to 1
            Box::new(ScriptedRecognizer::new(vec![])),
        );
        assert!(det.check_transcript("hello chime").is_some());
    }

    #[test]
    fn final_transcripts_always_checked_partials_sampled() {
        let script = vec![
            Some(Transcript::Partial("hello chime".to_string())), // 1st: skipped
            Some(Transcript::Partial("hello chime".to_string())), // 2nd: skipped
            Some(Transcript::Partial("hello chime".to_string())), // 3rd: checked
        ];
        let words = vec!["hello chime".to_string()];
        let mut det =
            WakeWordDetector::new(&words, 0.85, 1, Box::new(ScriptedRecognizer::new(script)));

        assert!(det.process_frame(&[0; 320]).unwrap().is_none());
        assert!(det.process_frame(&[0; 320]).unwrap().is_none());
        assert!(det.process_frame(&[0; 320]).unwrap().is_some());
    }

    #[test]
    fn trigger_resets_recognizer() {
        let script = vec![Some(Transcript::Final("hello chime".to_string()))];
        let words = vec!["hello chime".to_string()];
        let mut det =
            WakeWordDetector::new(&words, 0.85, 1, Box::new(ScriptedRecognizer::new(script)));

        assert!(det.process_frame(&[0; 320]).unwrap().is_some());
    }
}
