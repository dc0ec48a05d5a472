//! The session controller: device state machine and command processor
//!
//! Owns `DeviceState` and funnels every mutating operation through one FIFO
//! command queue processed here, on a single task. A failed command is
//! logged at this boundary and never stops the processor.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex};

use super::commands::{CommandQueue, SessionCommand};
use super::state::{AbortReason, DeviceState, ListeningMode};
use crate::audio::AudioHandle;
use crate::display::Display;
use crate::iot::DeviceRegistry;
use crate::mcp::McpServer;
use crate::protocol::message::{ControlMessage, TtsState};
use crate::protocol::{ProtocolEvent, Transport};
use crate::Result;

/// Grace delay before re-entering listening after a wake-word abort.
const ABORT_RELISTEN_DELAY: Duration = Duration::from_millis(100);

/// Extra settle after playback drains, so the tail is not clipped.
const TTS_STOP_SETTLE: Duration = Duration::from_millis(200);

/// Bound on waiting for playback to finish on `tts stop`.
const AUDIO_COMPLETE_TIMEOUT: Duration = Duration::from_secs(10);

/// Cheap handle for enqueueing session operations from anywhere.
///
/// All operations defer to the controller's command queue; nothing mutates
/// state directly.
#[derive(Clone)]
pub struct SessionHandle {
    commands: CommandQueue,
}

impl SessionHandle {
    /// Begin manual listening.
    pub fn start_listening(&self) {
        self.commands.push(SessionCommand::StartListening);
    }

    /// End manual listening.
    pub fn stop_listening(&self) {
        self.commands.push(SessionCommand::StopListening);
    }

    /// Cycle the chat state.
    pub fn toggle_chat_state(&self) {
        self.commands.push(SessionCommand::ToggleChatState);
    }

    /// Abort current speech output.
    pub fn abort_speaking(&self, reason: AbortReason) {
        self.commands.push(SessionCommand::AbortSpeaking(reason));
    }

    /// Report a wake-word detection.
    pub fn wake_word_detected(&self, wake_word: &str) {
        self.commands.push(SessionCommand::WakeWordDetected {
            wake_word: wake_word.to_string(),
        });
    }

    /// Submit typed text as if spoken.
    pub fn submit_text(&self, text: &str) {
        self.commands.push(SessionCommand::SubmitText(text.to_string()));
    }

    /// Stop the command processor.
    pub fn shutdown(&self) {
        self.commands.push(SessionCommand::Shutdown);
    }
}

/// The state machine at the top of the dependency graph.
pub struct SessionController {
    audio: AudioHandle,
    transport: Arc<dyn Transport>,
    display: Arc<dyn Display>,
    registry: Arc<dyn DeviceRegistry>,
    mcp: Arc<McpServer>,
    commands: CommandQueue,
    state: Mutex<DeviceState>,
    state_tx: watch::Sender<DeviceState>,
    keep_listening: bool,
    aborted: Mutex<bool>,
}

impl SessionController {
    /// Wire up a controller with its collaborators.
    ///
    /// Returns the controller, a handle for enqueueing operations, and a
    /// watch on the device state for the detector loops and the send task.
    #[must_use]
    pub fn new(
        audio: AudioHandle,
        transport: Arc<dyn Transport>,
        display: Arc<dyn Display>,
        registry: Arc<dyn DeviceRegistry>,
        mcp: Arc<McpServer>,
    ) -> (Self, SessionHandle, watch::Receiver<DeviceState>) {
        let commands = CommandQueue::new();
        let (state_tx, state_rx) = watch::channel(DeviceState::Idle);

        let controller = Self {
            audio,
            transport,
            display,
            registry,
            mcp,
            commands: commands.clone(),
            state: Mutex::new(DeviceState::Idle),
            state_tx,
            keep_listening: false,
            aborted: Mutex::new(false),
        };

        (controller, SessionHandle { commands }, state_rx)
    }

    /// Current device state.
    pub async fn device_state(&self) -> DeviceState {
        *self.state.lock().await
    }

    /// Run the command processor until shutdown.
    ///
    /// Protocol events are folded into the same queue so state mutations
    /// stay strictly ordered; inbound audio bypasses the queue (it mutates
    /// no state) and goes straight to the decoder while speaking.
    pub async fn run(&mut self, mut events: mpsc::Receiver<ProtocolEvent>) {
        tracing::debug!("session controller started");

        enum Step {
            Command(SessionCommand),
            Event(Option<ProtocolEvent>),
        }

        loop {
            let step = tokio::select! {
                command = self.commands.next() => Step::Command(command),
                event = events.recv() => Step::Event(event),
            };

            match step {
                Step::Command(SessionCommand::Shutdown) => {
                    tracing::info!("session controller shutting down");
                    break;
                }
                Step::Command(command) => {
                    if let Err(e) = self.execute(command).await {
                        tracing::error!(error = %e, "command execution failed");
                    }
                }
                Step::Event(Some(event)) => self.on_protocol_event(event).await,
                Step::Event(None) => tracing::debug!("protocol event channel closed"),
            }
        }
    }

    async fn on_protocol_event(&self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::IncomingJson(value) => {
                self.commands.push(SessionCommand::HandleControlMessage(value));
            }
            ProtocolEvent::IncomingAudio(data) => {
                if *self.state.lock().await == DeviceState::Speaking {
                    self.audio.write_audio(&data);
                }
            }
            ProtocolEvent::ChannelOpened => self.commands.push(SessionCommand::ChannelOpened),
            ProtocolEvent::ChannelClosed => self.commands.push(SessionCommand::ChannelClosed),
            ProtocolEvent::NetworkError(message) => {
                self.commands.push(SessionCommand::NetworkError(message));
            }
            ProtocolEvent::Reconnecting {
                attempt,
                max_attempts,
            } => {
                self.display
                    .update_status(&format!("Reconnecting ({attempt}/{max_attempts})..."))
                    .await;
            }
        }
    }

    async fn execute(&mut self, command: SessionCommand) -> Result<()> {
        match command {
            SessionCommand::StartListening => self.handle_start_listening().await,
            SessionCommand::StopListening => self.handle_stop_listening().await,
            SessionCommand::ToggleChatState => self.handle_toggle_chat_state().await,
            SessionCommand::AbortSpeaking(reason) => self.abort_speaking(reason).await,
            SessionCommand::WakeWordDetected { wake_word } => {
                self.handle_wake_word(&wake_word).await
            }
            SessionCommand::HandleControlMessage(value) => {
                self.handle_control_message(&value).await
            }
            SessionCommand::SubmitText(text) => self.handle_submit_text(&text).await,
            SessionCommand::ChannelOpened => self.handle_channel_opened().await,
            SessionCommand::ChannelClosed => self.handle_channel_closed().await,
            SessionCommand::NetworkError(message) => self.handle_network_error(&message).await,
            SessionCommand::Shutdown => Ok(()),
        }
    }

    /// Shared start-listening path. Returns whether listening began.
    async fn start_listening_common(
        &mut self,
        mode: ListeningMode,
        keep_listening: bool,
    ) -> Result<bool> {
        if *self.state.lock().await != DeviceState::Idle {
            return Ok(false);
        }

        if !self.transport.is_audio_channel_opened()
            && !self.transport.open_audio_channel().await
        {
            return Ok(false);
        }

        self.audio.clear_audio_queue();
        self.set_device_state(DeviceState::Connecting).await?;

        self.keep_listening = keep_listening;
        self.transport.send_start_listening(mode).await;
        self.set_device_state(DeviceState::Listening).await?;

        Ok(true)
    }

    async fn handle_start_listening(&mut self) -> Result<()> {
        let started = self
            .start_listening_common(ListeningMode::Manual, false)
            .await?;

        if !started && *self.state.lock().await == DeviceState::Speaking {
            let aborted = *self.aborted.lock().await;
            if !aborted {
                self.abort_speaking(AbortReason::WakeWordDetected).await?;
            }
        }

        Ok(())
    }

    async fn handle_stop_listening(&mut self) -> Result<()> {
        if *self.state.lock().await == DeviceState::Listening {
            self.transport.send_stop_listening().await;
            self.set_device_state(DeviceState::Idle).await?;
        }
        Ok(())
    }

    async fn handle_toggle_chat_state(&mut self) -> Result<()> {
        let current = *self.state.lock().await;
        match current {
            DeviceState::Idle => {
                self.start_listening_common(ListeningMode::AutoStop, true)
                    .await?;
            }
            DeviceState::Speaking => self.abort_speaking(AbortReason::None).await?,
            DeviceState::Listening => {
                self.transport.close_audio_channel().await;
                self.set_device_state(DeviceState::Idle).await?;
            }
            DeviceState::Connecting => {}
        }
        Ok(())
    }

    /// Abort speech output. Duplicate aborts collapse into one effect:
    /// the flag catches a second abort arriving while one is in flight,
    /// the state check catches one queued up behind a completed abort.
    async fn abort_speaking(&mut self, reason: AbortReason) -> Result<()> {
        {
            let mut aborted = self.aborted.lock().await;
            if *aborted {
                tracing::debug!(?reason, "already aborting, ignoring duplicate");
                return Ok(());
            }
            if *self.state.lock().await != DeviceState::Speaking {
                tracing::debug!(?reason, "not speaking, nothing to abort");
                return Ok(());
            }
            *aborted = true;
        }

        tracing::info!(?reason, "aborting speech output");
        self.audio.clear_audio_queue();

        self.transport.send_abort_speaking(reason).await;
        self.set_device_state(DeviceState::Idle).await?;
        *self.aborted.lock().await = false;

        if reason == AbortReason::WakeWordDetected
            && self.keep_listening
            && self.transport.is_audio_channel_opened()
        {
            tokio::time::sleep(ABORT_RELISTEN_DELAY).await;
            self.start_listening_common(ListeningMode::AutoStop, true)
                .await?;
        }

        Ok(())
    }

    async fn handle_wake_word(&mut self, wake_word: &str) -> Result<()> {
        tracing::info!(wake_word, "wake word detected");

        let current = *self.state.lock().await;
        match current {
            DeviceState::Idle => {
                self.set_device_state(DeviceState::Connecting).await?;

                if !self.transport.open_audio_channel().await {
                    tracing::error!("failed to open audio channel after wake word");
                    self.set_device_state(DeviceState::Idle).await?;
                    return Ok(());
                }

                self.transport.send_wake_word_detected(wake_word).await;
                self.keep_listening = true;
                self.transport
                    .send_start_listening(ListeningMode::AutoStop)
                    .await;
                self.set_device_state(DeviceState::Listening).await?;
            }
            DeviceState::Speaking => {
                self.abort_speaking(AbortReason::WakeWordDetected).await?;
            }
            DeviceState::Connecting | DeviceState::Listening => {}
        }

        Ok(())
    }

    async fn handle_submit_text(&mut self, text: &str) -> Result<()> {
        if !self.transport.is_audio_channel_opened()
            && !self.transport.open_audio_channel().await
        {
            return Ok(());
        }
        self.transport.send_wake_word_detected(text).await;
        Ok(())
    }

    async fn handle_control_message(&mut self, value: &Value) -> Result<()> {
        let message = match ControlMessage::parse(value) {
            Ok(message) => message,
            Err(e) => {
                let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
                tracing::warn!(kind, error = %e, "unhandled control message");
                return Ok(());
            }
        };

        match message {
            ControlMessage::Tts { state, text } => self.handle_tts(state, text).await?,
            ControlMessage::Stt { text } => {
                tracing::info!(">> {text}");
                self.display.update_text("user", &text).await;
            }
            ControlMessage::Llm { emotion } => {
                if let Some(emotion) = emotion {
                    self.display.update_emotion(&emotion).await;
                }
            }
            ControlMessage::Iot { commands } => {
                for command in &commands {
                    match self.registry.invoke(command).await {
                        Ok(result) => tracing::info!(%result, "iot command executed"),
                        Err(e) => tracing::error!(error = %e, "iot command failed"),
                    }
                }
            }
            ControlMessage::Mcp { payload } => {
                if let Some(reply) = self.mcp.handle_message(&payload) {
                    self.transport.send_mcp_message(reply).await;
                }
            }
        }

        Ok(())
    }

    async fn handle_tts(&mut self, state: TtsState, text: Option<String>) -> Result<()> {
        match state {
            TtsState::Start => {
                *self.aborted.lock().await = false;

                let current = *self.state.lock().await;
                if matches!(current, DeviceState::Idle | DeviceState::Listening) {
                    self.set_device_state(DeviceState::Speaking).await?;
                }
            }
            TtsState::Stop => {
                if *self.state.lock().await != DeviceState::Speaking {
                    return Ok(());
                }

                self.audio
                    .wait_for_audio_complete(AUDIO_COMPLETE_TIMEOUT)
                    .await;

                if !*self.aborted.lock().await {
                    tokio::time::sleep(TTS_STOP_SETTLE).await;
                }

                if self.keep_listening {
                    self.transport
                        .send_start_listening(ListeningMode::AutoStop)
                        .await;
                    self.set_device_state(DeviceState::Listening).await?;
                } else {
                    self.set_device_state(DeviceState::Idle).await?;
                }
            }
            TtsState::SentenceStart => {
                if let Some(text) = text.filter(|t| !t.is_empty()) {
                    tracing::info!("<< {text}");
                    self.display.update_text("assistant", &text).await;
                }
            }
        }
        Ok(())
    }

    async fn handle_channel_opened(&mut self) -> Result<()> {
        tracing::info!("audio channel opened");

        let descriptors = self.registry.descriptors_json();
        self.transport.send_iot_descriptors(&descriptors).await;
        self.push_iot_states(false).await;

        Ok(())
    }

    async fn handle_channel_closed(&mut self) -> Result<()> {
        tracing::info!("audio channel closed");
        self.set_device_state(DeviceState::Idle).await?;
        self.keep_listening = false;
        Ok(())
    }

    async fn handle_network_error(&mut self, message: &str) -> Result<()> {
        tracing::error!(message, "network error");

        self.keep_listening = false;
        self.set_device_state(DeviceState::Idle).await?;
        self.transport.close_audio_channel().await;

        Ok(())
    }

    /// Apply a state change and its side effects. No-op when unchanged.
    async fn set_device_state(&self, state: DeviceState) -> Result<()> {
        {
            let mut current = self.state.lock().await;
            if *current == state {
                return Ok(());
            }
            tracing::debug!(from = %current, to = %state, "device state changed");
            *current = state;
        }

        // Detector loops and the audio sender observe the state here
        let _ = self.state_tx.send(state);

        match state {
            DeviceState::Idle => {
                self.display.update_status("Standby").await;
                self.display.update_emotion("neutral").await;
            }
            DeviceState::Connecting => {
                self.display.update_status("Connecting...").await;
            }
            DeviceState::Listening => {
                self.display.update_status("Listening...").await;
                self.display.update_emotion("neutral").await;
                self.push_iot_states(true).await;
            }
            DeviceState::Speaking => {
                self.display.update_status("Speaking...").await;
            }
        }

        Ok(())
    }

    async fn push_iot_states(&self, delta: bool) {
        let (changed, states) = self.registry.states_json(delta).await;
        if !delta || changed {
            self.transport.send_iot_states(&states).await;
        }
    }
}

/// Forward encoded capture packets to the transport.
///
/// The state and channel are re-checked at the instant of each send, not
/// when the packet was produced; the state may have changed in between.
pub async fn run_audio_sender(
    audio: AudioHandle,
    transport: Arc<dyn Transport>,
    state: watch::Receiver<DeviceState>,
) {
    while let Some(packet) = audio.next_encoded_packet().await {
        let listening = *state.borrow() == DeviceState::Listening;
        if listening && transport.is_audio_channel_opened() {
            transport.send_audio(packet).await;
        }
    }

    tracing::debug!("audio sender stopped");
}
