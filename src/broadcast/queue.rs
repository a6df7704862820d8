use crate::assert_invariant;
use crate::errors::CameraError;
use crate::types::FrameSample;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

pub(crate) struct QueueShared {
    inner: Mutex<QueueInner>,
    cv: Condvar,
    notify: Notify,
}

struct QueueInner {
    items: VecDeque<FrameSample>,
    capacity: usize,
    dropped: u64,
    closed: bool,
}

impl QueueShared {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                dropped: 0,
                closed: false,
            }),
            cv: Condvar::new(),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append, evicting the oldest sample when full. Never waits on consumers.
    pub(crate) fn push_drop_oldest(&self, sample: FrameSample) {
        let mut g = self.lock();
        if g.closed {
            return;
        }

        if g.items.len() >= g.capacity {
            g.items.pop_front();
            g.dropped = g.dropped.saturating_add(1);
        }
        g.items.push_back(sample);
        assert_invariant!(
            g.items.len() <= g.capacity,
            "Consumer queue never exceeds its capacity",
            "broadcast::queue"
        );
        self.cv.notify_one();
        self.notify.notify_one();
    }

    pub(crate) fn close(&self) {
        let mut g = self.lock();
        g.closed = true;
        self.cv.notify_all();
        self.notify.notify_waiters();
        // Stores a permit for a task that checked the flag but is not yet parked.
        self.notify.notify_one();
    }
}

/// One subscriber's bounded view of a [`FrameBroadcaster`](super::FrameBroadcaster).
///
/// Samples come out in publish order. When the consumer falls behind, the
/// oldest buffered samples are discarded. Dropping the queue unsubscribes it.
pub struct ConsumerQueue {
    pub(crate) shared: Arc<QueueShared>,
}

impl ConsumerQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(QueueShared::new(capacity)),
        }
    }

    /// Block until a sample is available and return the oldest one.
    ///
    /// Fails once the queue is closed and drained.
    pub fn take(&self) -> Result<FrameSample, CameraError> {
        let mut g = self.shared.lock();
        loop {
            if let Some(sample) = g.items.pop_front() {
                return Ok(sample);
            }
            if g.closed {
                return Err(CameraError::feed_closed());
            }
            g = self
                .shared
                .cv
                .wait(g)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`take`](Self::take) but gives up after `timeout` with `Ok(None)`.
    pub fn take_timeout(&self, timeout: Duration) -> Result<Option<FrameSample>, CameraError> {
        let mut g = self.shared.lock();

        if timeout == Duration::ZERO {
            return match g.items.pop_front() {
                Some(sample) => Ok(Some(sample)),
                None if g.closed => Err(CameraError::feed_closed()),
                None => Ok(None),
            };
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(sample) = g.items.pop_front() {
                return Ok(Some(sample));
            }
            if g.closed {
                return Err(CameraError::feed_closed());
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let (ng, _) = self
                .shared
                .cv
                .wait_timeout(g, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            g = ng;
        }
    }

    pub fn try_take(&self) -> Option<FrameSample> {
        self.shared.lock().items.pop_front()
    }

    /// Asynchronous take: suspends the calling task instead of the thread.
    pub async fn recv(&self) -> Result<FrameSample, CameraError> {
        loop {
            {
                let mut g = self.shared.lock();
                if let Some(sample) = g.items.pop_front() {
                    return Ok(sample);
                }
                if g.closed {
                    return Err(CameraError::feed_closed());
                }
            }
            self.shared.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity
    }

    /// Number of samples evicted because this consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.shared.lock().dropped
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Sequence numbers currently buffered, oldest first.
    pub fn buffered_sequences(&self) -> Vec<u64> {
        self.shared
            .lock()
            .items
            .iter()
            .map(|sample| sample.sequence)
            .collect()
    }
}

impl std::fmt::Debug for ConsumerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let g = self.shared.lock();
        f.debug_struct("ConsumerQueue")
            .field("len", &g.items.len())
            .field("capacity", &g.capacity)
            .field("dropped", &g.dropped)
            .field("closed", &g.closed)
            .finish()
    }
}
