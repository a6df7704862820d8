//! webrtc-rs implementation of the signaling transport.

pub mod peer;

pub use peer::{IceServer, WebRtcFactory, WebRtcTransport, H264_PAYLOAD_TYPE};
