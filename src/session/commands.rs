//! The session command queue
//!
//! Every mutating session operation is expressed as a [`SessionCommand`]
//! and executed strictly in FIFO order by the controller's single
//! processor, so no second writer to the device state can exist. The queue
//! is bounded; overflow evicts the oldest entry rather than blocking the
//! producer or growing without bound.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;

use super::state::AbortReason;
use crate::audio::FrameQueue;

/// Command queue capacity. Stale commands are dropped past this point.
const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Re-check interval while waiting for a command.
const WAIT_RECHECK: Duration = Duration::from_millis(100);

/// A deferred unit of session work.
#[derive(Debug)]
pub enum SessionCommand {
    /// Begin manual listening (push-to-talk press)
    StartListening,
    /// End manual listening (push-to-talk release)
    StopListening,
    /// Cycle the chat state: idle→listen, speaking→abort, listening→idle
    ToggleChatState,
    /// Abort current speech output
    AbortSpeaking(AbortReason),
    /// The wake word fired on a transcript
    WakeWordDetected {
        /// Matched wake phrase
        wake_word: String,
    },
    /// A routed inbound control message
    HandleControlMessage(Value),
    /// Submit typed text as if it had been spoken
    SubmitText(String),
    /// Transport reported the channel open (hello completed)
    ChannelOpened,
    /// Transport reported the channel closed
    ChannelClosed,
    /// Transport surfaced a terminal network error
    NetworkError(String),
    /// Stop the command processor
    Shutdown,
}

/// Bounded FIFO of session commands with eviction on overflow.
#[derive(Clone)]
pub struct CommandQueue {
    queue: FrameQueue<SessionCommand>,
    notify: Arc<Notify>,
}

impl CommandQueue {
    /// Queue with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: FrameQueue::new(COMMAND_QUEUE_CAPACITY),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Enqueue a command; the oldest queued command is dropped if full.
    pub fn push(&self, command: SessionCommand) {
        if self.queue.push(command) {
            tracing::warn!("command queue full, dropped oldest command");
        }
        self.notify.notify_one();
    }

    /// Await the next command.
    ///
    /// The wait is bounded by a periodic re-check so a missed wakeup can
    /// never stall the processor.
    pub async fn next(&self) -> SessionCommand {
        loop {
            if let Some(command) = self.queue.pop() {
                return command;
            }
            let _ = tokio::time::timeout(WAIT_RECHECK, self.notify.notified()).await;
        }
    }

    /// Number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commands_come_back_in_order() {
        let queue = CommandQueue::new();
        queue.push(SessionCommand::StartListening);
        queue.push(SessionCommand::StopListening);

        assert!(matches!(
            queue.next().await,
            SessionCommand::StartListening
        ));
        assert!(matches!(queue.next().await, SessionCommand::StopListening));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_command() {
        let queue = CommandQueue::new();

        for _ in 0..COMMAND_QUEUE_CAPACITY {
            queue.push(SessionCommand::StartListening);
        }
        queue.push(SessionCommand::Shutdown);

        assert_eq!(queue.len(), COMMAND_QUEUE_CAPACITY);

        // Drain: the newest command must have survived
        let mut last = None;
        while !queue.is_empty() {
            last = Some(queue.next().await);
        }
        assert!(matches!(last, Some(SessionCommand::Shutdown)));
    }

    #[tokio::test]
    async fn next_wakes_on_push() {
        let queue = CommandQueue::new();
        let waiter = queue.clone();

        let handle = tokio::spawn(async move { waiter.next().await });
        tokio::task::yield_now().await;
        queue.push(SessionCommand::ToggleChatState);

        let command = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("next() should wake")
            .unwrap();
        assert!(matches!(command, SessionCommand::ToggleChatState));
    }
}
