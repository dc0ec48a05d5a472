//! Bounded frame queues shared between driver callbacks and the control loop
//!
//! The audio driver threads and the tokio control plane only ever meet at
//! these queues. Every operation is non-blocking: a push into a full queue
//! evicts the oldest entry in O(1) so a driver callback can never stall on
//! backpressure.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A bounded FIFO that drops the oldest entry on overflow.
///
/// Clones share the same underlying queue, so one handle can live inside a
/// cpal callback while another is polled from an async task.
pub struct FrameQueue<T> {
    inner: Arc<Mutex<VecDeque<T>>>,
    capacity: usize,
}

// Manual `Clone` avoids the `T: Clone` bound that `#[derive(Clone)]` would
// impose: a clone only duplicates the shared `Arc` handle, never `T`.
impl<T> Clone for FrameQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            capacity: self.capacity,
        }
    }
}

impl<T> FrameQueue<T> {
    /// Create a queue holding at most `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame queue capacity must be non-zero");
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Push an entry, evicting the oldest one if the queue is full.
    ///
    /// Returns `true` if an older entry was evicted to make room.
    pub fn push(&self, value: T) -> bool {
        let Ok(mut queue) = self.inner.lock() else {
            return false;
        };

        let evicted = if queue.len() >= self.capacity {
            queue.pop_front();
            true
        } else {
            false
        };

        queue.push_back(value);
        evicted
    }

    /// Pop the oldest entry, or `None` if the queue is empty.
    pub fn pop(&self) -> Option<T> {
        self.inner.lock().ok()?.pop_front()
    }

    /// Number of entries currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all entries, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let Ok(mut queue) = self.inner.lock() else {
            return 0;
        };
        let discarded = queue.len();
        queue.clear();
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_in_order() {
        let queue = FrameQueue::new(4);
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let queue = FrameQueue::new(100);

        for i in 0..500 {
            queue.push(i);
        }

        assert_eq!(queue.len(), 100);
        // The most recent 100 survive; everything older was silently dropped
        assert_eq!(queue.pop(), Some(400));
        let mut last = 400;
        while let Some(v) = queue.pop() {
            last = v;
        }
        assert_eq!(last, 499);
    }

    #[test]
    fn push_reports_eviction() {
        let queue = FrameQueue::new(2);
        assert!(!queue.push(1));
        assert!(!queue.push(2));
        assert!(queue.push(3));
    }

    #[test]
    fn clear_reports_discarded_count() {
        let queue = FrameQueue::new(8);
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.clear(), 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn shared_across_clones() {
        let queue = FrameQueue::new(4);
        let producer = queue.clone();

        producer.push(42);
        assert_eq!(queue.pop(), Some(42));
    }

    #[test]
    fn flooded_push_stays_bounded() {
        let queue = FrameQueue::new(10);
        let start = std::time::Instant::now();

        for i in 0..10_000 {
            queue.push(i);
        }

        // 10k evicting pushes should complete almost instantly; a blocking
        // or reallocating implementation would blow well past this budget
        assert!(start.elapsed() < std::time::Duration::from_millis(500));
        assert_eq!(queue.len(), 10);
    }
}
