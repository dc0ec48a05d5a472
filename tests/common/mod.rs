//! Shared test utilities

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use chime::display::Display;
use chime::Transport;

/// Transport double: scriptable connect result, records every send.
#[derive(Default)]
pub struct MockTransport {
    open: AtomicBool,
    connect_ok: AtomicBool,
    sent_text: Mutex<Vec<Value>>,
    sent_audio: Mutex<Vec<Vec<u8>>>,
}

impl MockTransport {
    /// Transport whose `connect` succeeds.
    #[must_use]
    pub fn connectable() -> Self {
        let transport = Self::default();
        transport.connect_ok.store(true, Ordering::Release);
        transport
    }

    /// Transport whose `connect` always fails.
    #[must_use]
    pub fn unconnectable() -> Self {
        Self::default()
    }

    /// Every text frame sent, parsed as JSON.
    pub fn sent(&self) -> Vec<Value> {
        self.sent_text.lock().unwrap().clone()
    }

    /// `type`/`state` pairs of every sent control message.
    pub fn sent_kinds(&self) -> Vec<(String, String)> {
        self.sent()
            .iter()
            .map(|v| {
                (
                    v["type"].as_str().unwrap_or_default().to_string(),
                    v["state"].as_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    /// Count of sent messages with the given `type`.
    pub fn count_of_type(&self, kind: &str) -> usize {
        self.sent().iter().filter(|v| v["type"] == kind).count()
    }

    /// Binary frames sent.
    pub fn audio_frames(&self) -> Vec<Vec<u8>> {
        self.sent_audio.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> bool {
        let ok = self.connect_ok.load(Ordering::Acquire);
        if ok {
            self.open.store(true, Ordering::Release);
        }
        ok
    }

    async fn send_text(&self, text: String) {
        if !self.is_audio_channel_opened() {
            return;
        }
        if let Ok(value) = serde_json::from_str(&text) {
            self.sent_text.lock().unwrap().push(value);
        }
    }

    async fn send_audio(&self, data: Vec<u8>) {
        if !self.is_audio_channel_opened() {
            return;
        }
        self.sent_audio.lock().unwrap().push(data);
    }

    fn is_audio_channel_opened(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn close_audio_channel(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn session_id(&self) -> String {
        String::new()
    }
}

/// Display double that records everything it is told to show.
#[derive(Default)]
pub struct RecordingDisplay {
    statuses: Mutex<Vec<String>>,
    texts: Mutex<Vec<(String, String)>>,
    emotions: Mutex<Vec<String>>,
}

impl RecordingDisplay {
    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<(String, String)> {
        self.texts.lock().unwrap().clone()
    }

    pub fn emotions(&self) -> Vec<String> {
        self.emotions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Display for RecordingDisplay {
    async fn update_status(&self, status: &str) {
        self.statuses.lock().unwrap().push(status.to_string());
    }

    async fn update_text(&self, role: &str, text: &str) {
        self.texts
            .lock()
            .unwrap()
            .push((role.to_string(), text.to_string()));
    }

    async fn update_emotion(&self, emotion: &str) {
        self.emotions.lock().unwrap().push(emotion.to_string());
    }
}
