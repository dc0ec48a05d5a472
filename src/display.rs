//! Display collaborator contract
//!
//! The session runtime reports status, transcripts, and emotion hints
//! through this trait; rendering lives elsewhere. The CLI implementation
//! just logs.

use async_trait::async_trait;

/// Receives user-visible session updates.
#[async_trait]
pub trait Display: Send + Sync {
    /// Show the session status line ("Listening...", "Standby", ...).
    async fn update_status(&self, status: &str);

    /// Show a transcript line (user or assistant).
    async fn update_text(&self, role: &str, text: &str);

    /// Show an emotion hint from the model.
    async fn update_emotion(&self, emotion: &str);
}

/// Log-only display for headless runs.
pub struct CliDisplay;

#[async_trait]
impl Display for CliDisplay {
    async fn update_status(&self, status: &str) {
        tracing::info!(status, "session status");
    }

    async fn update_text(&self, role: &str, text: &str) {
        tracing::info!(role, text, "transcript");
    }

    async fn update_emotion(&self, emotion: &str) {
        tracing::debug!(emotion, "emotion");
    }
}

/// Discards everything; used in tests.
pub struct NullDisplay;

#[async_trait]
impl Display for NullDisplay {
    async fn update_status(&self, _status: &str) {}
    async fn update_text(&self, _role: &str, _text: &str) {}
    async fn update_emotion(&self, _emotion: &str) {}
}
