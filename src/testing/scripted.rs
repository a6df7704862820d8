//! In-memory [`Transport`] with scripted behaviour.
//!
//! Every call is recorded in a [`TransportProbe`] that other threads can
//! inspect, and the probe can inject connectivity changes as if the network
//! stack had reported them.

use crate::bridge::AsyncBridge;
use crate::broadcast::FrameBroadcaster;
use crate::errors::TransportError;
use crate::signaling::{
    IceCandidate, Signaling, SignalingSettings, Transport, TransportEvents, TransportFactory,
    TransportState,
};
use crate::types::{FrameSample, SessionId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Answer returned by every scripted transport.
pub const SCRIPTED_ANSWER: &str = "v=0\r\n\
o=- 1 1 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 102\r\n\
c=IN IP4 127.0.0.1\r\n\
a=mid:0\r\n\
a=sendonly\r\n\
a=rtpmap:102 H264/90000\r\n\
a=candidate:1 1 udp 2130706431 127.0.0.1 40000 typ host\r\n\
a=end-of-candidates\r\n";

#[derive(Debug, Default)]
struct ProbeState {
    created: Vec<SessionId>,
    offers: Vec<(SessionId, String)>,
    candidates: HashMap<SessionId, Vec<IceCandidate>>,
    frames: HashMap<SessionId, Vec<(u64, Duration)>>,
    closed: Vec<SessionId>,
    events: HashMap<SessionId, TransportEvents>,
}

/// Thread-safe record of what scripted transports were asked to do.
#[derive(Debug, Clone, Default)]
pub struct TransportProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl TransportProbe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sessions a transport was created for, in creation order.
    pub fn created(&self) -> Vec<SessionId> {
        self.lock().created.clone()
    }

    pub fn offers(&self) -> Vec<(SessionId, String)> {
        self.lock().offers.clone()
    }

    /// Candidates applied to `id`, in the order they were added.
    pub fn candidates(&self, id: &SessionId) -> Vec<IceCandidate> {
        self.lock().candidates.get(id).cloned().unwrap_or_default()
    }

    /// `(sequence, duration)` of every frame written to `id`.
    pub fn frames(&self, id: &SessionId) -> Vec<(u64, Duration)> {
        self.lock().frames.get(id).cloned().unwrap_or_default()
    }

    pub fn closed(&self) -> Vec<SessionId> {
        self.lock().closed.clone()
    }

    pub fn is_closed(&self, id: &SessionId) -> bool {
        self.lock().closed.contains(id)
    }

    /// Report `state` for `id` as the network stack would. Returns false if
    /// no transport was created for `id`.
    pub fn emit(&self, id: &SessionId, state: TransportState) -> bool {
        match self.lock().events.get(id) {
            Some(events) => {
                events.emit(state);
                true
            }
            None => false,
        }
    }
}

/// Factory for [`ScriptedTransport`]s.
#[derive(Debug, Clone)]
pub struct ScriptedFactory {
    probe: TransportProbe,
    gathering_completes: bool,
    fail_create: bool,
    create_delay: Option<Duration>,
    connect_on_answer: bool,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            probe: TransportProbe::default(),
            gathering_completes: true,
            fail_create: false,
            create_delay: None,
            connect_on_answer: false,
        }
    }

    pub fn probe(&self) -> TransportProbe {
        self.probe.clone()
    }

    /// ICE gathering never reports completion, forcing the timeout path.
    pub fn gathering_never_completes(mut self) -> Self {
        self.gathering_completes = false;
        self
    }

    /// Every `create` fails.
    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// `create` sleeps for `delay` before building the transport.
    pub fn slow_create(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Report `Connecting` then `Connected` as soon as the answer exists.
    pub fn connect_on_answer(mut self) -> Self {
        self.connect_on_answer = true;
        self
    }
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for ScriptedFactory {
    type Transport = ScriptedTransport;

    async fn create(
        &self,
        id: SessionId,
        events: TransportEvents,
    ) -> Result<ScriptedTransport, TransportError> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create {
            return Err(TransportError::new("scripted transport creation failure"));
        }
        {
            let mut state = self.probe.lock();
            state.created.push(id);
            state.events.insert(id, events.clone());
        }
        Ok(ScriptedTransport {
            id,
            probe: self.probe.clone(),
            events,
            gathering_completes: self.gathering_completes,
            connect_on_answer: self.connect_on_answer,
            remote: RefCell::new(None),
            answered: Cell::new(false),
            closed: Cell::new(false),
        })
    }
}

/// A transport that never touches the network.
#[derive(Debug)]
pub struct ScriptedTransport {
    id: SessionId,
    probe: TransportProbe,
    events: TransportEvents,
    gathering_completes: bool,
    connect_on_answer: bool,
    remote: RefCell<Option<String>>,
    answered: Cell<bool>,
    closed: Cell<bool>,
}

impl ScriptedTransport {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.get() {
            return Err(TransportError::new("transport is closed"));
        }
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    async fn apply_offer(&self, sdp: String) -> Result<(), TransportError> {
        self.ensure_open()?;
        if !sdp.starts_with("v=0") {
            return Err(TransportError::new("offer is not an SDP session description"));
        }
        self.probe.lock().offers.push((self.id, sdp.clone()));
        *self.remote.borrow_mut() = Some(sdp);
        Ok(())
    }

    async fn create_answer(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        if self.remote.borrow().is_none() {
            return Err(TransportError::new("no remote description"));
        }
        self.answered.set(true);
        if self.connect_on_answer {
            self.events.emit(TransportState::Connecting);
            self.events.emit(TransportState::Connected);
        }
        Ok(())
    }

    fn ice_gathering_complete(&self) -> bool {
        self.answered.get() && self.gathering_completes
    }

    async fn local_description(&self) -> Option<String> {
        self.answered.get().then(|| SCRIPTED_ANSWER.to_string())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.probe
            .lock()
            .candidates
            .entry(self.id)
            .or_default()
            .push(candidate);
        Ok(())
    }

    async fn write_frame(&self, sample: &FrameSample, duration: Duration) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.probe
            .lock()
            .frames
            .entry(self.id)
            .or_default()
            .push((sample.sequence, duration));
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.replace(true) {
            return Ok(());
        }
        self.probe.lock().closed.push(self.id);
        self.events.emit(TransportState::Closed);
        Ok(())
    }
}

/// Start a signaling scheduler backed by scripted transports.
pub fn spawn_scripted_signaling(
    factory: ScriptedFactory,
    video: Arc<FrameBroadcaster>,
    settings: SignalingSettings,
) -> io::Result<AsyncBridge<Signaling<ScriptedFactory>>> {
    AsyncBridge::spawn("spyglass-test-signaling", move || {
        Signaling::new(factory, video, settings)
    })
}
