//! WHEP-style WebRTC signaling: offer/answer, trickle ICE and session
//! lifecycle.
//!
//! Everything in here runs on the signaling scheduler thread (see
//! [`crate::bridge`]). HTTP workers reach it through [`SignalingService`].

mod candidate;
mod registry;
mod state;
mod transport;
mod whep;

pub use candidate::{parse_ice_candidates, IceCandidate};
pub use registry::{Session, SessionRegistry};
pub use state::{NegotiationState, TransportState};
pub use transport::{Transport, TransportEvent, TransportEvents, TransportFactory};
pub use whep::{
    Signaling, SignalingService, SignalingSettings, WhepAnswer, SDP_CONTENT_TYPE,
    TRICKLE_CONTENT_TYPE,
};
