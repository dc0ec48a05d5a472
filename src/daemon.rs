//! Daemon - the voice-session runtime
//!
//! Builds the audio pipeline, transport, detectors, and session controller
//! from one explicit configuration, spawns the cooperative tasks, and runs
//! the controller until shutdown. No component reaches for global state;
//! everything is passed in here.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::audio::{AudioParams, AudioPipeline};
use crate::config::Config;
use crate::display::{CliDisplay, Display};
use crate::iot::{DeviceRegistry, ThingRegistry};
use crate::mcp::{McpServer, McpTool, Property, PropertyList};
use crate::protocol::{ReconnectPolicy, Transport, WebSocketTransport};
use crate::session::{run_audio_sender, SessionController};
use crate::vad::{run_vad_loop, VoiceActivityDetector};
use crate::wake::{run_wake_word_loop, SpeechRecognizer, WakeWordDetector};
use crate::Result;

/// The Chime daemon - owns the session runtime.
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a daemon from loaded configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the voice session until interrupted.
    ///
    /// # Errors
    ///
    /// Returns an error if the audio pipeline cannot be initialized; all
    /// later faults are handled internally (reconnects, degraded wake
    /// path, dropped frames).
    #[allow(clippy::future_not_send)] // cpal streams pin this future to one thread
    pub async fn run(self) -> Result<()> {
        let params = AudioParams::new(self.config.audio.frame_duration_ms);

        let mut pipeline = AudioPipeline::new(params)?;
        pipeline.initialize()?;
        let audio = pipeline.handle();

        let reconnect = ReconnectPolicy {
            enabled: self.config.reconnect.enabled,
            max_attempts: self.config.reconnect.max_attempts,
            ..ReconnectPolicy::default()
        };
        let (transport, events) =
            WebSocketTransport::new(self.config.server.clone(), params, reconnect);
        let transport: Arc<dyn Transport> = Arc::new(transport);

        let display: Arc<dyn Display> = Arc::new(CliDisplay);
        let registry: Arc<dyn DeviceRegistry> = Arc::new(ThingRegistry::new());
        let mcp = Arc::new(build_mcp_server());

        let (mut controller, session, state_rx) = SessionController::new(
            audio.clone(),
            Arc::clone(&transport),
            display,
            registry,
            mcp,
        );

        // Cooperative background tasks: packet forwarding and detectors
        let sender_task = tokio::spawn(run_audio_sender(
            audio.clone(),
            Arc::clone(&transport),
            state_rx.clone(),
        ));

        let vad_task = tokio::spawn(run_vad_loop(
            VoiceActivityDetector::new(),
            audio.clone(),
            session.clone(),
            state_rx.clone(),
        ));

        let wake_task = if self.config.wake.enabled {
            match build_recognizer(&self.config) {
                Ok(recognizer) => {
                    let detector = WakeWordDetector::new(
                        &self.config.wake.wake_words,
                        self.config.wake.similarity_threshold,
                        self.config.wake.max_edit_distance,
                        recognizer,
                    );
                    Some(tokio::spawn(run_wake_word_loop(
                        detector,
                        audio.clone(),
                        session.clone(),
                    )))
                }
                Err(e) => {
                    // Degrade rather than fail: the session works without
                    // a wake word, it just needs manual activation
                    tracing::info!(error = %e, "wake word detection disabled");
                    None
                }
            }
        } else {
            tracing::info!("wake word detection disabled by config");
            None
        };

        let shutdown_session = session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
                shutdown_session.shutdown();
            }
        });

        tracing::info!(
            url = %self.config.server.websocket_url,
            wake_enabled = self.config.wake.enabled,
            "chime daemon running"
        );

        controller.run(events).await;

        // Ordered shutdown: stop feeding the transport, stop the audio
        // streams before closing the channel, detectors last
        sender_task.abort();
        pipeline.stop_streams();

        transport.close_audio_channel().await;

        if let Some(task) = wake_task {
            task.abort();
        }
        vad_task.abort();

        tokio::time::sleep(Duration::from_millis(50)).await;
        pipeline.close();

        tracing::info!("daemon stopped");
        Ok(())
    }
}

/// Build the local MCP tool server with its built-in device tools.
fn build_mcp_server() -> McpServer {
    let mut server = McpServer::new();

    let volume = Arc::new(AtomicI64::new(80));

    let status_volume = Arc::clone(&volume);
    server.add_tool(McpTool::new(
        "self.get_device_status",
        "Report the device's current status (application version, speaker volume).",
        PropertyList::default(),
        Box::new(move |_args| {
            let status = json!({
                "application": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "speaker": { "volume": status_volume.load(Ordering::Relaxed) },
            });
            Ok(status.to_string())
        }),
    ));

    server.add_tool(McpTool::new(
        "self.audio_speaker.set_volume",
        "Set the speaker volume (0-100).",
        PropertyList::new(vec![Property::integer("volume", 0, 100)]),
        Box::new(move |args| {
            let value = args.get("volume").and_then(Value::as_i64).unwrap_or(0);
            volume.store(value, Ordering::Relaxed);
            tracing::info!(volume = value, "speaker volume set");
            Ok("true".to_string())
        }),
    ));

    server
}

/// Build the wake-word speech recognizer, if support is compiled in.
#[cfg(feature = "vosk-recognizer")]
fn build_recognizer(config: &Config) -> Result<Box<dyn SpeechRecognizer>> {
    use crate::audio::INPUT_SAMPLE_RATE;

    let recognizer =
        crate::wake::VoskRecognizer::new(&config.wake.model_path, INPUT_SAMPLE_RATE)?;
    Ok(Box::new(recognizer))
}

#[cfg(not(feature = "vosk-recognizer"))]
fn build_recognizer(_config: &Config) -> Result<Box<dyn SpeechRecognizer>> {
    Err(crate::Error::Recognition(
        "built without the vosk-recognizer feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mcp_server_has_builtin_tools() {
        let server = build_mcp_server();
        assert_eq!(server.tool_count(), 2);
    }

    #[test]
    fn builtin_volume_tool_round_trips() {
        let server = build_mcp_server();

        let reply = server
            .handle_message(&json!({
                "jsonrpc": "2.0", "id": 1, "method": "tools/call",
                "params": {
                    "name": "self.audio_speaker.set_volume",
                    "arguments": { "volume": 40 },
                },
            }))
            .unwrap();
        assert_eq!(reply["result"]["isError"], false);

        let reply = server
            .handle_message(&json!({
                "jsonrpc": "2.0", "id": 2, "method": "tools/call",
                "params": { "name": "self.get_device_status", "arguments": {} },
            }))
            .unwrap();
        let text = reply["result"]["content"][0]["text"].as_str().unwrap();
        let status: Value = serde_json::from_str(text).unwrap();
        assert_eq!(status["speaker"]["volume"], 40);
    }
}
