//! Spyglass: live camera streaming over MJPEG and WebRTC
//!
//! One capture source feeds any number of viewers through two transports:
//! pull-based HTTP (an MJPEG multipart stream plus single-frame snapshots)
//! and WebRTC, negotiated with WHEP-style signaling over plain HTTP verbs.
//!
//! # Architecture
//! - [`broadcast`]: one producer fanning frames out to bounded,
//!   drop-oldest consumer queues
//! - [`signaling`]: the WHEP offer/answer and trickle-ICE state machine and
//!   its session registry
//! - [`bridge`]: lets blocking HTTP workers run jobs on the single-threaded
//!   scheduler that owns every WebRTC session
//! - [`server`]: the thread-per-connection HTTP front end
//! - [`camera`]: capture sources (test pattern, USB with the `usb` feature)
//!   and their encoders
//! - [`webrtc`]: the transport implementation over webrtc-rs
//!
//! # Usage
//! ```rust,no_run
//! use spyglass::{broadcast::FrameBroadcaster, config::ServerConfig, server::StreamingServer};
//! use std::sync::Arc;
//!
//! let config = ServerConfig::default();
//! let jpeg = Arc::new(FrameBroadcaster::new(config.queue_capacity));
//! let server = StreamingServer::builder(config, jpeg).bind().unwrap();
//! server.serve_forever();
//! ```

pub mod bridge;
pub mod broadcast;
pub mod camera;
pub mod config;
pub mod errors;
pub mod exif;
pub mod invariant_ppt;
pub mod server;
pub mod signaling;
pub mod timing;
pub mod types;
pub mod webrtc;

// Testing utilities - synthetic frames and a scripted transport
pub mod testing;

// Re-exports for convenience
pub use bridge::{AsyncBridge, BridgeHandle};
pub use broadcast::{ConsumerQueue, FrameBroadcaster, FrameSink};
pub use camera::{Camera, CameraSettings, FrameOutputs, SharedCamera, TestPatternCamera};
pub use config::{CameraSource, ServerConfig};
pub use errors::{BridgeError, CameraError, ConfigError, HttpError, SignalingError, TransportError};
pub use server::{RunningServer, ShutdownHandle, StreamingServer};
pub use signaling::{Signaling, SignalingService, SignalingSettings};
pub use types::{FrameSample, SessionId};

/// Initialize logging; defaults to `spyglass=info` when `RUST_LOG` is unset.
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("spyglass=info");
    let _ = env_logger::Builder::from_env(env).try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_metadata() {
        assert_eq!(NAME, "spyglass");
        assert!(!VERSION.is_empty());
        assert!(DESCRIPTION.contains("MJPEG"));
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging();
    }
}
