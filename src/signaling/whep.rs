use super::candidate::parse_ice_candidates;
use super::registry::SessionRegistry;
use super::state::{NegotiationState, TransportState};
use super::transport::{Transport, TransportEvent, TransportEvents, TransportFactory};
use crate::bridge::BridgeHandle;
use crate::broadcast::{ConsumerQueue, FrameBroadcaster};
use crate::errors::SignalingError;
use crate::types::SessionId;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub const SDP_CONTENT_TYPE: &str = "application/sdp";
pub const TRICKLE_CONTENT_TYPE: &str = "application/trickle-ice-sdpfrag";

/// Tunables of the signaling state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalingSettings {
    pub max_sessions: usize,
    pub gather_poll_interval: Duration,
    /// Upper bound on the wait for local ICE gathering before answering.
    pub gather_timeout: Duration,
    /// Sample duration used when consecutive timestamps give none.
    pub frame_interval: Duration,
}

impl Default for SignalingSettings {
    fn default() -> Self {
        Self {
            max_sessions: 20,
            gather_poll_interval: Duration::from_millis(100),
            gather_timeout: Duration::from_secs(10),
            frame_interval: crate::timing::frame_interval(15),
        }
    }
}

/// Result of a successful offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhepAnswer {
    pub id: SessionId,
    pub sdp: String,
    /// Where the client sends its trickled candidates.
    pub location: String,
}

/// WHEP offer/answer and trickle-ICE state machine.
///
/// Owns every session and transport. Must be created and used on a single
/// thread inside a tokio `LocalSet`; other threads go through
/// [`SignalingService`].
pub struct Signaling<F: TransportFactory> {
    factory: F,
    registry: RefCell<SessionRegistry<F::Transport>>,
    video: Arc<FrameBroadcaster>,
    settings: SignalingSettings,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl<F: TransportFactory> Signaling<F> {
    /// Build the state machine and start its transport-event loop.
    pub fn new(factory: F, video: Arc<FrameBroadcaster>, settings: SignalingSettings) -> Rc<Self> {
        let (events, mut rx) = mpsc::unbounded_channel::<TransportEvent>();
        let signaling = Rc::new(Self {
            factory,
            registry: RefCell::new(SessionRegistry::new(settings.max_sessions)),
            video,
            settings,
            events,
        });

        let weak: Weak<Self> = Rc::downgrade(&signaling);
        tokio::task::spawn_local(async move {
            while let Some(event) = rx.recv().await {
                let Some(signaling) = weak.upgrade() else {
                    break;
                };
                signaling.on_transport_event(event.session, event.state).await;
            }
        });

        signaling
    }

    pub fn settings(&self) -> &SignalingSettings {
        &self.settings
    }

    /// `NEW -> NEGOTIATING`: admit a session, apply the offer and return the
    /// answer once local ICE gathering has finished.
    pub async fn offer(
        self: &Rc<Self>,
        content_type: &str,
        sdp: String,
    ) -> Result<WhepAnswer, SignalingError> {
        if content_type != SDP_CONTENT_TYPE {
            return Err(SignalingError::UnsupportedMediaType {
                expected: SDP_CONTENT_TYPE.to_string(),
                actual: content_type.to_string(),
            });
        }

        let id = SessionId::new();
        {
            // Reserved before the first await so concurrent offers cannot
            // overshoot the cap.
            let mut registry = self.registry.borrow_mut();
            registry.admit(id)?;
            log::info!(
                "session {} created ({} of {} in use)",
                id,
                registry.len(),
                registry.max_sessions()
            );
        }

        match self.negotiate(id, sdp).await {
            Ok(sdp) => Ok(WhepAnswer {
                id,
                sdp,
                location: format!("/whep/{}", id),
            }),
            Err(e) => {
                log::warn!("negotiation for session {} failed: {}", id, e);
                let removed = self.registry.borrow_mut().remove(&id);
                if let Some(transport) = removed.and_then(|session| session.transport.clone()) {
                    if let Err(close_error) = transport.close().await {
                        log::debug!("closing transport of {}: {}", id, close_error);
                    }
                }
                Err(e)
            }
        }
    }

    async fn negotiate(self: &Rc<Self>, id: SessionId, sdp: String) -> Result<String, SignalingError> {
        let events = TransportEvents::new(id, self.events.clone());
        let transport = Rc::new(self.factory.create(id, events).await?);

        let attached = match self.registry.borrow_mut().get_mut(&id) {
            Some(session) => {
                session.transport = Some(Rc::clone(&transport));
                true
            }
            None => false,
        };
        if !attached {
            if let Err(e) = transport.close().await {
                log::debug!("closing transport of {} removed mid-negotiation: {}", id, e);
            }
            return Err(closed_during_negotiation());
        }

        transport
            .apply_offer(sdp)
            .await
            .map_err(|e| SignalingError::BadRequest(format!("invalid SDP offer: {}", e)))?;
        transport.create_answer().await?;

        self.wait_for_gathering(id, transport.as_ref()).await;
        self.ensure_open(&id)?;

        transport
            .local_description()
            .await
            .ok_or_else(|| SignalingError::Transport("no local description".to_string()))
    }

    async fn wait_for_gathering(&self, id: SessionId, transport: &F::Transport) {
        let started = Instant::now();
        while !transport.ice_gathering_complete() {
            if started.elapsed() >= self.settings.gather_timeout {
                log::warn!(
                    "ICE gathering for session {} not complete after {:?}, answering with partial candidates",
                    id,
                    self.settings.gather_timeout
                );
                return;
            }
            if !self.registry.borrow().contains(&id) {
                return;
            }
            tokio::time::sleep(self.settings.gather_poll_interval).await;
        }
        log::debug!("ICE gathering for session {} took {:?}", id, started.elapsed());
    }

    fn ensure_open(&self, id: &SessionId) -> Result<(), SignalingError> {
        match self.registry.borrow().get(id) {
            Some(session) if !session.state.is_terminal() => Ok(()),
            _ => Err(closed_during_negotiation()),
        }
    }

    /// `NEGOTIATING -> NEGOTIATING`: apply trickled remote candidates in
    /// order. Returns how many were applied.
    pub async fn trickle(
        self: &Rc<Self>,
        session: &str,
        content_type: &str,
        fragment: &str,
    ) -> Result<usize, SignalingError> {
        if content_type != TRICKLE_CONTENT_TYPE {
            return Err(SignalingError::UnsupportedMediaType {
                expected: TRICKLE_CONTENT_TYPE.to_string(),
                actual: content_type.to_string(),
            });
        }

        let id: SessionId = session
            .parse()
            .map_err(|_| SignalingError::SessionNotFound(session.to_string()))?;

        let transport = {
            let registry = self.registry.borrow();
            let session = registry
                .get(&id)
                .filter(|session| !session.state.is_terminal())
                .ok_or_else(|| SignalingError::SessionNotFound(id.to_string()))?;
            session.transport.clone().ok_or_else(|| {
                SignalingError::BadRequest(format!("session {} has no transport yet", id))
            })?
        };

        let candidates = parse_ice_candidates(fragment)?;
        let count = candidates.len();
        for candidate in candidates {
            transport
                .add_ice_candidate(candidate)
                .await
                .map_err(|e| SignalingError::BadRequest(format!("candidate rejected: {}", e)))?;
        }

        log::debug!("applied {} remote candidates to session {}", count, id);
        Ok(count)
    }

    /// Apply a transport connectivity change to its session.
    pub async fn on_transport_event(self: &Rc<Self>, id: SessionId, state: TransportState) {
        let (previous, next, transport) = {
            let mut registry = self.registry.borrow_mut();
            let Some(session) = registry.get_mut(&id) else {
                log::debug!("transport of unknown session {} is {}", id, state);
                return;
            };
            let previous = session.state;
            session.state = previous.on_transport_state(state);
            (previous, session.state, session.transport.clone())
        };

        if previous != next {
            log::info!("session {}: {} -> {} (transport {})", id, previous, next, state);
        }

        match next {
            NegotiationState::Connected if previous != NegotiationState::Connected => {
                self.start_feed(id);
            }
            NegotiationState::Failed => {
                if let Some(transport) = transport {
                    if let Err(e) = transport.close().await {
                        log::debug!("closing failed transport of {}: {}", id, e);
                    }
                }
                self.finish(id);
            }
            NegotiationState::Closed => self.finish(id),
            _ => {}
        }
    }

    fn finish(&self, id: SessionId) {
        let mut registry = self.registry.borrow_mut();
        if let Some(session) = registry.remove(&id) {
            log::info!(
                "session {} closed after {:?}, {} still open",
                id,
                session.created_at.elapsed(),
                registry.len()
            );
        }
    }

    fn start_feed(self: &Rc<Self>, id: SessionId) {
        let mut registry = self.registry.borrow_mut();
        let Some(session) = registry.get_mut(&id) else {
            return;
        };
        let Some(transport) = session.transport.clone() else {
            return;
        };

        let queue = self.video.subscribe();
        let fallback = self.settings.frame_interval;
        session.set_feed(tokio::task::spawn_local(feed_track(
            id, transport, queue, fallback,
        )));
        log::debug!("video feed started for session {}", id);
    }

    /// Close every transport and forget every session.
    pub async fn close_all(&self) -> usize {
        let sessions = self.registry.borrow_mut().drain();
        let count = sessions.len();
        for session in sessions {
            if let Some(transport) = session.transport.clone() {
                if let Err(e) = transport.close().await {
                    log::debug!("closing transport of {}: {}", session.id, e);
                }
            }
        }
        if count > 0 {
            log::info!("closed {} WebRTC sessions", count);
        }
        count
    }

    pub fn session_count(&self) -> usize {
        self.registry.borrow().len()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.registry.borrow().contains(id)
    }

    pub fn state(&self, id: &SessionId) -> Option<NegotiationState> {
        self.registry.borrow().get(id).map(|session| session.state)
    }

    pub fn has_feed(&self, id: &SessionId) -> bool {
        self.registry
            .borrow()
            .get(id)
            .map(|session| session.has_feed())
            .unwrap_or(false)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.registry.borrow().ids()
    }
}

fn closed_during_negotiation() -> SignalingError {
    SignalingError::Transport("session closed during negotiation".to_string())
}

/// Forward H.264 samples to one transport, starting at the first keyframe.
async fn feed_track<T: Transport>(
    id: SessionId,
    transport: Rc<T>,
    queue: ConsumerQueue,
    fallback: Duration,
) {
    let mut started = false;
    let mut last_timestamp: Option<u64> = None;

    while let Ok(sample) = queue.recv().await {
        if !started {
            if !sample.keyframe {
                continue;
            }
            started = true;
        }

        let duration = match last_timestamp {
            Some(last) if sample.timestamp_us > last => {
                Duration::from_micros(sample.timestamp_us - last)
            }
            _ => fallback,
        };
        last_timestamp = Some(sample.timestamp_us);

        if let Err(e) = transport.write_frame(&sample, duration).await {
            log::debug!("video feed for session {} stopped: {}", id, e);
            return;
        }
    }
    log::debug!("video source closed for session {}", id);
}

/// Thread-safe entry point used by HTTP workers.
pub trait SignalingService: Send + Sync {
    fn offer(&self, content_type: &str, sdp: String) -> Result<WhepAnswer, SignalingError>;

    fn trickle(
        &self,
        session: &str,
        content_type: &str,
        fragment: String,
    ) -> Result<usize, SignalingError>;
}

impl<F: TransportFactory> SignalingService for BridgeHandle<Signaling<F>> {
    fn offer(&self, content_type: &str, sdp: String) -> Result<WhepAnswer, SignalingError> {
        let content_type = content_type.to_string();
        self.invoke(move |signaling| async move { signaling.offer(&content_type, sdp).await })?
    }

    fn trickle(
        &self,
        session: &str,
        content_type: &str,
        fragment: String,
    ) -> Result<usize, SignalingError> {
        let session = session.to_string();
        let content_type = content_type.to_string();
        self.invoke(move |signaling| async move {
            signaling
                .trickle(&session, &content_type, &fragment)
                .await
        })?
    }
}
