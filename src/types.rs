//! Core value types shared by the capture, broadcast and signaling layers.

use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One encoded frame as produced by an encoder callback.
///
/// The payload is reference counted, so handing the same sample to every
/// subscribed queue never copies the image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSample {
    pub data: Bytes,
    /// Microseconds since the capture source started.
    pub timestamp_us: u64,
    pub keyframe: bool,
    pub sequence: u64,
}

impl FrameSample {
    pub fn new(data: impl Into<Bytes>, timestamp_us: u64, keyframe: bool, sequence: u64) -> Self {
        Self {
            data: data.into(),
            timestamp_us,
            keyframe,
            sequence,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Opaque identifier of one WHEP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}
