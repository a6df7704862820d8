//! Testing utilities for spyglass
//!
//! Synthetic frames and SDP plus a scripted in-memory transport, so the
//! streaming and signaling paths can be tested without a camera or network.

pub mod scripted;
pub mod synthetic_data;

pub use scripted::{
    spawn_scripted_signaling, ScriptedFactory, ScriptedTransport, TransportProbe, SCRIPTED_ANSWER,
};
pub use synthetic_data::{
    sample_offer_sdp, sample_trickle_fragment, synthetic_h264_sample, synthetic_jpeg_frame,
    synthetic_jpeg_sample,
};
