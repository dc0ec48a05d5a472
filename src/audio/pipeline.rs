//! The audio pipeline: device streams, codec, and frame queues
//!
//! Capture path: device callback → resample to 16 kHz → assemble fixed
//! frames → opus-encode in the callback → bounded packet queue. A raw copy
//! of every frame also lands in a bounded wake-word queue. Playback path:
//! `write_audio` decodes inbound packets into a bounded queue drained by the
//! output callback, which emits silence when the queue runs dry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use tokio::sync::Notify;

use super::queue::FrameQueue;
use super::resampler::StreamingResampler;
use super::AudioParams;
use crate::{Error, Result};

/// Capacity of the playback queue (decoded frames waiting for the speaker).
const PLAYBACK_QUEUE_CAPACITY: usize = 500;

/// Capacity of the wake-word raw-frame queue.
const WAKE_QUEUE_CAPACITY: usize = 100;

/// Capacity of the voice-activity raw-frame queue.
const VAD_QUEUE_CAPACITY: usize = 100;

/// Capacity of the outbound encoded-packet queue.
const ENCODED_QUEUE_CAPACITY: usize = 100;

/// Poll interval while waiting for playback to drain.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Settle delay after the playback queue empties, so the driver can finish
/// the last buffered frame without clipping the tail.
const DRAIN_SETTLE: Duration = Duration::from_millis(300);

/// Scratch size for a single encoded opus frame.
const MAX_PACKET_SIZE: usize = 4000;

/// An opus-encoded audio frame.
pub type EncodedAudioPacket = Vec<u8>;

/// Capture-side state touched only from the input callback (plus brief
/// clear/flush calls from the control plane).
struct CaptureState {
    resampler: Option<StreamingResampler>,
    frame_buf: Vec<i16>,
    encoder: opus::Encoder,
}

/// State shared between driver callbacks and the control plane.
struct PipelineShared {
    params: AudioParams,
    capture: Mutex<CaptureState>,
    decoder: Mutex<opus::Decoder>,
    playback_queue: FrameQueue<Vec<i16>>,
    wake_queue: FrameQueue<Vec<i16>>,
    vad_queue: FrameQueue<Vec<i16>>,
    encoded_queue: FrameQueue<EncodedAudioPacket>,
    packet_notify: Notify,
    /// Leftover playback samples when the device buffer size does not line
    /// up with the frame size. Touched only by the output callback and
    /// `clear_audio_queue`.
    playback_carry: Mutex<VecDeque<i16>>,
    closing: AtomicBool,
}

/// Cloneable, `Send` handle onto the pipeline's queues and codecs.
///
/// Streams stay with [`AudioPipeline`] on the thread that created them;
/// detector loops and the send task work through this handle.
#[derive(Clone)]
pub struct AudioHandle {
    shared: Arc<PipelineShared>,
}

impl AudioHandle {
    /// Decode an inbound opus packet into the playback queue.
    ///
    /// Decode failures and frame-size mismatches drop the frame with a
    /// warning; they are never fatal to the session.
    pub fn write_audio(&self, packet: &[u8]) {
        let expected = self.shared.params.output_frame_size();
        let mut pcm = vec![0i16; expected];

        let decoded = {
            let Ok(mut decoder) = self.shared.decoder.lock() else {
                return;
            };
            match decoder.decode(packet, &mut pcm, false) {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(error = %e, "opus decode failed, dropping frame");
                    return;
                }
            }
        };

        if decoded != expected {
            tracing::warn!(decoded, expected, "decoded frame size mismatch, dropping");
            return;
        }

        if self.shared.playback_queue.push(pcm) {
            tracing::trace!("playback queue full, dropped oldest frame");
        }
    }

    /// Wait until the playback queue drains or `timeout` elapses, then a
    /// short settle period. Logs (but does not fail) on timeout.
    pub async fn wait_for_audio_complete(&self, timeout: Duration) {
        let start = std::time::Instant::now();

        while !self.shared.playback_queue.is_empty() && start.elapsed() < timeout {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        tokio::time::sleep(DRAIN_SETTLE).await;

        let remaining = self.shared.playback_queue.len();
        if remaining > 0 {
            tracing::warn!(remaining, "playback did not drain before timeout");
        }
    }

    /// Drain every queue and the resampler's carried-over samples.
    ///
    /// Used on abort/stop to discard stale audio.
    pub fn clear_audio_queue(&self) {
        let mut discarded = self.shared.playback_queue.clear();
        discarded += self.shared.wake_queue.clear();
        discarded += self.shared.vad_queue.clear();
        discarded += self.shared.encoded_queue.clear();

        if let Ok(mut carry) = self.shared.playback_carry.lock() {
            discarded += carry.len();
            carry.clear();
        }

        if let Ok(mut capture) = self.shared.capture.lock() {
            discarded += capture.frame_buf.len();
            capture.frame_buf.clear();
            if let Some(resampler) = capture.resampler.as_mut() {
                discarded += resampler.discard_pending();
            }
        }

        if discarded > 0 {
            tracing::debug!(discarded, "cleared audio queues");
        }
    }

    /// Pop one raw frame from the wake-word queue, if any.
    #[must_use]
    pub fn pop_wake_frame(&self) -> Option<Vec<i16>> {
        self.shared.wake_queue.pop()
    }

    /// Pop one raw frame from the voice-activity queue, if any.
    #[must_use]
    pub fn pop_vad_frame(&self) -> Option<Vec<i16>> {
        self.shared.vad_queue.pop()
    }

    /// Await the next encoded capture packet.
    ///
    /// Returns `None` once the pipeline is closing and the queue is empty.
    pub async fn next_encoded_packet(&self) -> Option<EncodedAudioPacket> {
        loop {
            if let Some(packet) = self.shared.encoded_queue.pop() {
                return Some(packet);
            }
            if self.shared.closing.load(Ordering::Acquire) {
                return None;
            }
            self.shared.packet_notify.notified().await;
        }
    }

    /// Queue a raw PCM frame for playback, bypassing the decoder.
    ///
    /// Used by the speaker test and by tests; session audio always arrives
    /// through [`AudioHandle::write_audio`].
    pub fn enqueue_playback(&self, frame: Vec<i16>) {
        self.shared.playback_queue.push(frame);
    }

    /// Number of frames waiting for playback.
    #[must_use]
    pub fn playback_queue_len(&self) -> usize {
        self.shared.playback_queue.len()
    }

    /// Negotiated audio parameters.
    #[must_use]
    pub fn params(&self) -> AudioParams {
        self.shared.params
    }
}

/// Owns the cpal streams and the shared pipeline state.
///
/// Not `Send` (cpal streams are thread-bound); lives on the control thread.
/// Everything the async tasks need goes through [`AudioPipeline::handle`].
pub struct AudioPipeline {
    shared: Arc<PipelineShared>,
    input_stream: Option<Stream>,
    output_stream: Option<Stream>,
    device_input_rate: u32,
}

impl AudioPipeline {
    /// Create a pipeline with codecs ready but no streams yet.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the opus encoder or decoder cannot be
    /// created.
    pub fn new(params: AudioParams) -> Result<Self> {
        let encoder = opus::Encoder::new(
            params.input_sample_rate,
            opus::Channels::Mono,
            opus::Application::Audio,
        )
        .map_err(|e| Error::Codec(format!("encoder init failed: {e}")))?;

        let decoder = opus::Decoder::new(params.output_sample_rate, opus::Channels::Mono)
            .map_err(|e| Error::Codec(format!("decoder init failed: {e}")))?;

        let shared = Arc::new(PipelineShared {
            params,
            capture: Mutex::new(CaptureState {
                resampler: None,
                frame_buf: Vec::with_capacity(params.input_frame_size() * 2),
                encoder,
            }),
            decoder: Mutex::new(decoder),
            playback_queue: FrameQueue::new(PLAYBACK_QUEUE_CAPACITY),
            wake_queue: FrameQueue::new(WAKE_QUEUE_CAPACITY),
            vad_queue: FrameQueue::new(VAD_QUEUE_CAPACITY),
            encoded_queue: FrameQueue::new(ENCODED_QUEUE_CAPACITY),
            packet_notify: Notify::new(),
            playback_carry: Mutex::new(VecDeque::new()),
            closing: AtomicBool::new(false),
        });

        Ok(Self {
            shared,
            input_stream: None,
            output_stream: None,
            device_input_rate: params.input_sample_rate,
        })
    }

    /// Open input/output streams and start them.
    ///
    /// The input stream runs at the device's native rate with a streaming
    /// resampler down to 16 kHz when the rates differ; the output stream is
    /// fixed at 24 kHz.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if no device is available or a stream
    /// cannot be built.
    pub fn initialize(&mut self) -> Result<()> {
        let host = cpal::default_host();

        let input_device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;
        let input_config = input_device
            .default_input_config()
            .map_err(|e| Error::Audio(e.to_string()))?;
        self.device_input_rate = input_config.sample_rate().0;

        if let Ok(mut capture) = self.shared.capture.lock() {
            capture.resampler = if self.device_input_rate == self.shared.params.input_sample_rate {
                None
            } else {
                Some(StreamingResampler::new(
                    self.device_input_rate,
                    self.shared.params.input_sample_rate,
                )?)
            };
        }

        tracing::info!(
            device = input_device.name().unwrap_or_default(),
            device_rate = self.device_input_rate,
            target_rate = self.shared.params.input_sample_rate,
            "audio input initialized"
        );

        self.input_stream = Some(build_input_stream(
            &input_device,
            self.device_input_rate,
            input_config.channels(),
            Arc::clone(&self.shared),
        )?);

        self.output_stream = Some(build_output_stream(&host, Arc::clone(&self.shared))?);

        self.start_streams()?;
        Ok(())
    }

    /// Start both streams, rebuilding one that refuses to start.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if a stream cannot be started or rebuilt.
    pub fn start_streams(&mut self) -> Result<()> {
        if let Some(stream) = &self.input_stream {
            if let Err(e) = stream.play() {
                tracing::warn!(error = %e, "input stream start failed, rebuilding");
                self.reinitialize_stream(true)?;
            }
        }

        if let Some(stream) = &self.output_stream {
            if let Err(e) = stream.play() {
                tracing::warn!(error = %e, "output stream start failed, rebuilding");
                self.reinitialize_stream(false)?;
            }
        }

        tracing::debug!("audio streams started");
        Ok(())
    }

    /// Pause both streams without releasing them.
    pub fn stop_streams(&self) {
        if let Some(stream) = &self.input_stream {
            if let Err(e) = stream.pause() {
                tracing::warn!(error = %e, "failed to pause input stream");
            }
        }
        if let Some(stream) = &self.output_stream {
            if let Err(e) = stream.pause() {
                tracing::warn!(error = %e, "failed to pause output stream");
            }
        }
    }

    /// Rebuild one stream after a transient driver fault.
    ///
    /// Encoder, decoder, and queue state are untouched, so the session
    /// continues where it left off.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the replacement stream cannot be built.
    pub fn reinitialize_stream(&mut self, is_input: bool) -> Result<()> {
        if self.shared.closing.load(Ordering::Acquire) {
            return Ok(());
        }

        let host = cpal::default_host();

        if is_input {
            self.input_stream = None;

            let device = host
                .default_input_device()
                .ok_or_else(|| Error::Audio("no input device available".to_string()))?;
            let config = device
                .default_input_config()
                .map_err(|e| Error::Audio(e.to_string()))?;

            // The replacement device may run at a different native rate
            let rate = config.sample_rate().0;
            if rate != self.device_input_rate {
                self.device_input_rate = rate;
                if let Ok(mut capture) = self.shared.capture.lock() {
                    capture.resampler = if rate == self.shared.params.input_sample_rate {
                        None
                    } else {
                        Some(StreamingResampler::new(
                            rate,
                            self.shared.params.input_sample_rate,
                        )?)
                    };
                }
            }

            let stream = build_input_stream(
                &device,
                rate,
                config.channels(),
                Arc::clone(&self.shared),
            )?;
            stream.play().map_err(|e| Error::Audio(e.to_string()))?;
            self.input_stream = Some(stream);
            tracing::info!("input stream reinitialized");
        } else {
            self.output_stream = None;

            let stream = build_output_stream(&host, Arc::clone(&self.shared))?;
            stream.play().map_err(|e| Error::Audio(e.to_string()))?;
            self.output_stream = Some(stream);
            tracing::info!("output stream reinitialized");
        }

        Ok(())
    }

    /// A `Send` handle for detector loops and the audio send task.
    #[must_use]
    pub fn handle(&self) -> AudioHandle {
        AudioHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop and release streams, flush the resampler tail, drop codec work.
    ///
    /// Idempotent; later calls are no-ops.
    pub fn close(&mut self) {
        if self.shared.closing.swap(true, Ordering::AcqRel) {
            return;
        }

        self.stop_streams();
        self.input_stream = None;
        self.output_stream = None;

        self.handle().clear_audio_queue();

        if let Ok(mut capture) = self.shared.capture.lock() {
            if let Some(resampler) = capture.resampler.as_mut() {
                if let Err(e) = resampler.flush() {
                    tracing::warn!(error = %e, "resampler flush failed during close");
                }
            }
            capture.resampler = None;
        }

        // Wake any task parked on the packet queue so it can observe closing
        self.shared.packet_notify.notify_waiters();

        tracing::info!("audio pipeline closed");
    }
}

impl Drop for AudioPipeline {
    fn drop(&mut self) {
        self.close();
    }
}

/// Build the capture stream at the device's native rate.
fn build_input_stream(
    device: &cpal::Device,
    sample_rate: u32,
    channels: u16,
    shared: Arc<PipelineShared>,
) -> Result<Stream> {
    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Default,
    };

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                input_callback(data, channels, &shared);
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    Ok(stream)
}

/// Capture callback: mono-fold, resample, frame, encode, post.
///
/// Runs on the OS audio thread; everything here is non-blocking queue work
/// and CPU-bound codec calls.
fn input_callback(data: &[f32], channels: u16, shared: &Arc<PipelineShared>) {
    if shared.closing.load(Ordering::Acquire) {
        return;
    }

    // Fold interleaved channels down to mono i16
    let step = usize::from(channels.max(1));
    #[allow(clippy::cast_possible_truncation)]
    let mono: Vec<i16> = data
        .iter()
        .step_by(step)
        .map(|&s| (s * 32768.0).clamp(-32768.0, 32767.0) as i16)
        .collect();

    let Ok(mut capture) = shared.capture.lock() else {
        return;
    };
    let capture = &mut *capture;

    let samples = match capture.resampler.as_mut() {
        Some(resampler) => match resampler.process(&mono) {
            Ok(resampled) => resampled,
            Err(e) => {
                tracing::warn!(error = %e, "input resampling failed, dropping chunk");
                return;
            }
        },
        None => mono,
    };

    capture.frame_buf.extend_from_slice(&samples);

    let frame_size = shared.params.input_frame_size();
    while capture.frame_buf.len() >= frame_size {
        let frame: Vec<i16> = capture.frame_buf.drain(..frame_size).collect();

        // Encode immediately to keep capture latency at one frame
        let mut packet = vec![0u8; MAX_PACKET_SIZE];
        match capture.encoder.encode(&frame, &mut packet) {
            Ok(len) => {
                packet.truncate(len);
                shared.encoded_queue.push(packet);
                shared.packet_notify.notify_one();
            }
            Err(e) => {
                tracing::warn!(error = %e, "opus encode failed, dropping frame");
            }
        }

        // Independent copies for the detector paths; each queue evicts on
        // its own, so a stalled detector never backs up the send path
        shared.vad_queue.push(frame.clone());
        shared.wake_queue.push(frame);
    }
}

/// Build the playback stream at the fixed output rate.
fn build_output_stream(host: &cpal::Host, shared: Arc<PipelineShared>) -> Result<Stream> {
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let frame_size = shared.params.output_frame_size();
    let channels = shared.params.channels;
    #[allow(clippy::cast_possible_truncation)]
    let buffer_frames = frame_size as u32;
    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(shared.params.output_sample_rate),
        buffer_size: BufferSize::Fixed(buffer_frames),
    };

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                output_callback(data, &shared);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    Ok(stream)
}

/// Playback callback: pull queued frames or emit silence. Never blocks.
fn output_callback(data: &mut [f32], shared: &Arc<PipelineShared>) {
    let Ok(mut carry) = shared.playback_carry.lock() else {
        data.fill(0.0);
        return;
    };

    for out in data.iter_mut() {
        if carry.is_empty() {
            match shared.playback_queue.pop() {
                Some(frame) => carry.extend(frame),
                None => {
                    *out = 0.0;
                    continue;
                }
            }
        }
        *out = carry
            .pop_front()
            .map_or(0.0, |s| f32::from(s) / 32768.0);
    }
}
