use serde::Serialize;
use std::fmt;

/// Connectivity state reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Per-session negotiation state.
///
/// ```text
/// New -> Negotiating -> Connected -> Closed
///            |              |
///            +--> Failed <--+--> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationState {
    New,
    Negotiating,
    Connected,
    Failed,
    Closed,
}

impl NegotiationState {
    /// An offer has been accepted for this session.
    pub fn begin_negotiation(self) -> Self {
        match self {
            NegotiationState::New => NegotiationState::Negotiating,
            other => other,
        }
    }

    /// Next state after the transport reports `transport`.
    ///
    /// `Closed` is absorbing. Transient transport states (`New`,
    /// `Connecting`, `Disconnected`) leave the negotiation state unchanged.
    pub fn on_transport_state(self, transport: TransportState) -> Self {
        use NegotiationState as N;

        match (self, transport) {
            (N::Closed, _) => N::Closed,
            (_, TransportState::Closed) => N::Closed,
            (N::Negotiating, TransportState::Connected) => N::Connected,
            (N::Negotiating | N::Connected, TransportState::Failed) => N::Failed,
            (state, _) => state,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Failed | NegotiationState::Closed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::New => "new",
            NegotiationState::Negotiating => "negotiating",
            NegotiationState::Connected => "connected",
            NegotiationState::Failed => "failed",
            NegotiationState::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = NegotiationState::New.begin_negotiation();
        assert_eq!(state, NegotiationState::Negotiating);
        let state = state.on_transport_state(TransportState::Connecting);
        assert_eq!(state, NegotiationState::Negotiating);
        let state = state.on_transport_state(TransportState::Connected);
        assert_eq!(state, NegotiationState::Connected);
        let state = state.on_transport_state(TransportState::Closed);
        assert_eq!(state, NegotiationState::Closed);
    }

    #[test]
    fn test_failure_paths() {
        assert_eq!(
            NegotiationState::Negotiating.on_transport_state(TransportState::Failed),
            NegotiationState::Failed
        );
        assert_eq!(
            NegotiationState::Connected.on_transport_state(TransportState::Failed),
            NegotiationState::Failed
        );
        assert_eq!(
            NegotiationState::Failed.on_transport_state(TransportState::Closed),
            NegotiationState::Closed
        );
    }

    #[test]
    fn test_closed_is_absorbing() {
        for transport in [
            TransportState::New,
            TransportState::Connecting,
            TransportState::Connected,
            TransportState::Disconnected,
            TransportState::Failed,
        ] {
            assert_eq!(
                NegotiationState::Closed.on_transport_state(transport),
                NegotiationState::Closed
            );
        }
        assert!(NegotiationState::Closed.is_terminal());
        assert!(!NegotiationState::Connected.is_terminal());
    }

    #[test]
    fn test_disconnect_is_transient() {
        assert_eq!(
            NegotiationState::Connected.on_transport_state(TransportState::Disconnected),
            NegotiationState::Connected
        );
    }
}
