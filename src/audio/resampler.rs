//! Streaming sample-rate conversion for the capture path
//!
//! Device input rates rarely match the 16 kHz the encoder wants, and cpal
//! hands the input callback arbitrarily sized buffers. This wraps a rubato
//! fixed-chunk resampler with a carry-over buffer so that no samples are
//! lost or duplicated at callback boundaries.

use std::collections::VecDeque;

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::{Error, Result};

/// Input chunk size fed to rubato. Smaller chunks lower latency, larger
/// chunks lower per-call overhead; 512 keeps both within a 20 ms frame
/// budget for common device rates.
const CHUNK_SIZE: usize = 512;

/// Mono streaming resampler with remainder carry-over between calls.
pub struct StreamingResampler {
    inner: FastFixedIn<f32>,
    pending: VecDeque<f32>,
    from_rate: u32,
    to_rate: u32,
}

impl StreamingResampler {
    /// Create a resampler converting `from_rate` to `to_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the rate ratio is not representable.
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self> {
        let ratio = f64::from(to_rate) / f64::from(from_rate);
        let inner = FastFixedIn::new(ratio, 1.0, PolynomialDegree::Septic, CHUNK_SIZE, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        tracing::debug!(from_rate, to_rate, "created input resampler");

        Ok(Self {
            inner,
            pending: VecDeque::with_capacity(CHUNK_SIZE * 2),
            from_rate,
            to_rate,
        })
    }

    /// Resample a chunk of samples, returning whatever full output is ready.
    ///
    /// Input that does not fill a whole processing chunk is carried over to
    /// the next call, so feeding the same signal in different chunk sizes
    /// yields the same total output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the underlying resampler rejects a chunk.
    pub fn process(&mut self, samples: &[i16]) -> Result<Vec<i16>> {
        self.pending
            .extend(samples.iter().map(|&s| f32::from(s) / 32768.0));

        let mut output = Vec::new();
        while self.pending.len() >= CHUNK_SIZE {
            let chunk: Vec<f32> = self.pending.drain(..CHUNK_SIZE).collect();
            let resampled = self
                .inner
                .process(&[chunk], None)
                .map_err(|e| Error::Audio(format!("resample chunk failed: {e}")))?;
            output.extend(resampled[0].iter().map(|&s| to_i16(s)));
        }

        Ok(output)
    }

    /// Flush carried-over samples, returning the resampled tail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the underlying resampler rejects the tail.
    pub fn flush(&mut self) -> Result<Vec<i16>> {
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }

        let tail: Vec<f32> = self.pending.drain(..).collect();
        let resampled = self
            .inner
            .process_partial(Some(&[tail]), None)
            .map_err(|e| Error::Audio(format!("resample flush failed: {e}")))?;

        Ok(resampled[0].iter().map(|&s| to_i16(s)).collect())
    }

    /// Discard carried-over samples without resampling them.
    pub fn discard_pending(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    /// Number of input samples waiting for a full processing chunk.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Source sample rate.
    #[must_use]
    pub const fn from_rate(&self) -> u32 {
        self.from_rate
    }

    /// Target sample rate.
    #[must_use]
    pub const fn to_rate(&self) -> u32 {
        self.to_rate
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_i16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(-32768.0, 32767.0) as i16
}
