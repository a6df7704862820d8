//! Monotonic timestamps and sequence numbers for produced frames.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clock shared by every encoder of one capture source.
///
/// All encoders stamp their samples from the same start instant, so the JPEG
/// and H.264 feeds carry comparable timestamps.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Instant,
    sequence: Arc<AtomicU64>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::from_instant(Instant::now())
    }

    /// Share an existing timebase with other components.
    pub fn from_instant(start: Instant) -> Self {
        Self {
            start,
            sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Microseconds elapsed since the clock started.
    #[inline]
    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    #[inline]
    pub fn us_at(&self, instant: Instant) -> u64 {
        instant.saturating_duration_since(self.start).as_micros() as u64
    }

    /// Next frame sequence number, starting at 1.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn start_instant(&self) -> Instant {
        self.start
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Nominal interval between frames at `fps`; zero fps yields one second.
pub fn frame_interval(fps: u32) -> Duration {
    if fps == 0 {
        return Duration::from_secs(1);
    }
    Duration::from_micros(1_000_000 / fps as u64)
}
