use super::state::NegotiationState;
use crate::errors::SignalingError;
use crate::types::SessionId;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;
use tokio::task::JoinHandle;

/// One WHEP viewer.
pub struct Session<T> {
    pub id: SessionId,
    pub state: NegotiationState,
    /// Absent while the transport is still being created.
    pub transport: Option<Rc<T>>,
    pub created_at: Instant,
    feed: Option<JoinHandle<()>>,
}

impl<T> Session<T> {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            state: NegotiationState::New,
            transport: None,
            created_at: Instant::now(),
            feed: None,
        }
    }

    /// Install the task forwarding video to this session, replacing any
    /// previous one.
    pub fn set_feed(&mut self, feed: JoinHandle<()>) {
        if let Some(previous) = self.feed.replace(feed) {
            previous.abort();
        }
    }

    pub fn has_feed(&self) -> bool {
        self.feed.is_some()
    }
}

impl<T> Drop for Session<T> {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.abort();
        }
    }
}

/// Active sessions under a concurrent-session cap.
///
/// Lives on the signaling scheduler and is its only point of membership
/// mutation.
pub struct SessionRegistry<T> {
    sessions: HashMap<SessionId, Session<T>>,
    max_sessions: usize,
}

impl<T> SessionRegistry<T> {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_sessions,
        }
    }

    /// Admit a new session in state `Negotiating`, or refuse when full.
    pub fn admit(&mut self, id: SessionId) -> Result<&mut Session<T>, SignalingError> {
        if self.sessions.len() >= self.max_sessions {
            return Err(SignalingError::TooManySessions(self.max_sessions));
        }

        let mut session = Session::new(id);
        session.state = session.state.begin_negotiation();
        Ok(self.sessions.entry(id).or_insert(session))
    }

    pub fn get(&self, id: &SessionId) -> Option<&Session<T>> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session<T>> {
        self.sessions.get_mut(id)
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<Session<T>> {
        self.sessions.remove(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn drain(&mut self) -> Vec<Session<T>> {
        self.sessions.drain().map(|(_, session)| session).collect()
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}
