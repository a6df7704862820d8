//! The narrow interface the signaling state machine needs from a WebRTC stack.
//!
//! Implementations live on the signaling scheduler thread, so neither the
//! trait nor its futures need to be `Send`.

#![allow(async_fn_in_trait)]

use super::candidate::IceCandidate;
use super::state::TransportState;
use crate::errors::TransportError;
use crate::types::{FrameSample, SessionId};
use std::time::Duration;
use tokio::sync::mpsc;

/// One peer connection carrying a single outbound video track.
pub trait Transport: 'static {
    /// Apply the remote offer. Failure means the offer itself was unusable.
    async fn apply_offer(&self, sdp: String) -> Result<(), TransportError>;

    /// Create the answer and start local ICE gathering.
    async fn create_answer(&self) -> Result<(), TransportError>;

    fn ice_gathering_complete(&self) -> bool;

    /// Current local description, including the candidates gathered so far.
    async fn local_description(&self) -> Option<String>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    async fn write_frame(&self, sample: &FrameSample, duration: Duration)
        -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates one transport per session.
pub trait TransportFactory: 'static {
    type Transport: Transport;

    /// `events` must receive every connectivity change of the new transport.
    async fn create(
        &self,
        id: SessionId,
        events: TransportEvents,
    ) -> Result<Self::Transport, TransportError>;
}

/// A transport's connectivity change, tagged with the owning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportEvent {
    pub session: SessionId,
    pub state: TransportState,
}

/// Sending half of the state-change channel, bound to one session.
///
/// Cheap to clone and `Send`, so it can be moved into callbacks that the
/// WebRTC stack invokes from its own tasks.
#[derive(Debug, Clone)]
pub struct TransportEvents {
    session: SessionId,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEvents {
    pub(crate) fn new(session: SessionId, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Report a state change. Dropped silently once signaling is gone.
    pub fn emit(&self, state: TransportState) {
        let _ = self.tx.send(TransportEvent {
            session: self.session,
            state,
        });
    }
}
