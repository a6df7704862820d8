use thiserror::Error;

/// Failures reported by a capture collaborator or a frame feed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("Camera initialization error: {0}")]
    InitializationError(String),
    #[error("Capture error: {0}")]
    CaptureError(String),
    #[error("Encoding error: {0}")]
    EncodingError(String),
    #[error("Camera control error: {0}")]
    ControlError(String),
    #[error("Stream error: {0}")]
    StreamError(String),
}

impl CameraError {
    /// The frame feed was closed because the capture source stopped or failed.
    pub fn feed_closed() -> Self {
        CameraError::StreamError("frame feed closed".to_string())
    }
}

/// Errors raised while negotiating or maintaining a WHEP session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error("unsupported content type: expected {expected}, got {actual}")]
    UnsupportedMediaType { expected: String, actual: String },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("Too many clients connected (limit {0})")]
    TooManySessions(usize),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("signaling scheduler error: {0}")]
    Scheduler(String),
}

impl SignalingError {
    /// Client protocol errors leave server state untouched and map to 4xx.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            SignalingError::Transport(_) | SignalingError::Scheduler(_)
        )
    }
}

impl From<TransportError> for SignalingError {
    fn from(error: TransportError) -> Self {
        SignalingError::Transport(error.0)
    }
}

impl From<BridgeError> for SignalingError {
    fn from(error: BridgeError) -> Self {
        SignalingError::Scheduler(error.to_string())
    }
}

/// Opaque failure from the WebRTC transport stack.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<webrtc::Error> for TransportError {
    fn from(error: webrtc::Error) -> Self {
        Self(error.to_string())
    }
}

/// Failures of a cross-thread call into the signaling scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("scheduler is shut down")]
    Closed,
    #[error("job was cancelled before completing")]
    Cancelled,
    #[error("job panicked: {0}")]
    Panicked(String),
    #[error("invoke called from the scheduler thread")]
    Reentrant,
}

/// Failures while reading an HTTP request off a connection.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connection closed before a complete request arrived")]
    ConnectionClosed,
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("request too large: {0}")]
    TooLarge(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_error_display() {
        let error = CameraError::CaptureError("sensor timeout".to_string());
        assert_eq!(error.to_string(), "Capture error: sensor timeout");
        assert!(CameraError::feed_closed().to_string().contains("closed"));
    }

    #[test]
    fn test_signaling_error_classification() {
        assert!(SignalingError::TooManySessions(20).is_client_error());
        assert!(SignalingError::SessionNotFound("x".into()).is_client_error());
        assert!(!SignalingError::Transport("dtls".into()).is_client_error());
        assert!(!SignalingError::from(BridgeError::Closed).is_client_error());
    }

    #[test]
    fn test_http_error_from_io() {
        let error = HttpError::from(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow"));
        assert!(matches!(error, HttpError::Io(_)));
        assert!(HttpError::TooLarge("body".into()).to_string().contains("too large"));
    }

    #[test]
    fn test_too_many_sessions_message() {
        let error = SignalingError::TooManySessions(20);
        assert!(error.to_string().starts_with("Too many clients connected"));
    }
}
