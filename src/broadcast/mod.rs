//! Single-producer, many-consumer frame fan-out.
//!
//! A [`FrameBroadcaster`] receives every encoded frame from the capture
//! source and appends it to each subscriber's [`ConsumerQueue`]. Queues are
//! bounded and drop their oldest sample on overflow, so a slow viewer loses
//! frames instead of stalling the camera or the other viewers.

mod queue;

pub use queue::ConsumerQueue;

use crate::types::FrameSample;
use queue::QueueShared;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Default per-consumer buffer depth, in frames.
pub const DEFAULT_QUEUE_CAPACITY: usize = 60;

/// Receiver of encoded frames from a capture collaborator.
pub trait FrameSink: Send + Sync {
    /// Called exactly once per encoded frame. Must not block.
    fn on_frame(&self, sample: FrameSample);

    /// No further frames will be delivered (capture stopped or failed).
    fn close(&self) {}
}

pub struct FrameBroadcaster {
    capacity: usize,
    subscribers: Mutex<Vec<Weak<QueueShared>>>,
    published: AtomicU64,
    closed: AtomicBool,
}

impl FrameBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            published: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Weak<QueueShared>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new consumer with the default capacity.
    pub fn subscribe(&self) -> ConsumerQueue {
        self.subscribe_with_capacity(self.capacity)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> ConsumerQueue {
        let queue = ConsumerQueue::new(capacity);
        let mut subscribers = self.subscribers();
        // Checked under the list lock so a concurrent close() cannot miss it.
        if self.closed.load(Ordering::Acquire) {
            queue.shared.close();
        } else {
            subscribers.push(Arc::downgrade(&queue.shared));
        }
        queue
    }

    /// Remove a consumer eagerly. Dropping the queue has the same effect
    /// at the next publish.
    pub fn unsubscribe(&self, queue: ConsumerQueue) {
        let target = Arc::as_ptr(&queue.shared);
        self.subscribers()
            .retain(|weak| weak.strong_count() > 0 && weak.as_ptr() != target);
    }

    /// Deliver `sample` to every live subscriber and prune dead ones.
    pub fn publish(&self, sample: FrameSample) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.subscribers().retain(|weak| match weak.upgrade() {
            Some(queue) => {
                queue.push_drop_oldest(sample.clone());
                true
            }
            None => false,
        });
    }

    /// Close every current and future subscriber queue.
    pub fn close(&self) {
        let mut subscribers = self.subscribers();
        self.closed.store(true, Ordering::Release);
        for queue in subscribers.drain(..).filter_map(|weak| weak.upgrade()) {
            queue.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn default_capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for FrameBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl FrameSink for FrameBroadcaster {
    fn on_frame(&self, sample: FrameSample) {
        self.publish(sample);
    }

    fn close(&self) {
        FrameBroadcaster::close(self);
    }
}

impl std::fmt::Debug for FrameBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBroadcaster")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}
