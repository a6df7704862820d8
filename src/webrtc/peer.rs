use crate::errors::TransportError;
use crate::signaling::{IceCandidate, Transport, TransportEvents, TransportFactory, TransportState};
use crate::types::{FrameSample, SessionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Payload type offered for the H.264 track.
pub const H264_PAYLOAD_TYPE: u8 = 102;

const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// ICE server advertised to clients and used by the server's own agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, credential: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.credential = Some(credential.into());
        self
    }
}

impl From<IceServer> for webrtc::ice_transport::ice_server::RTCIceServer {
    fn from(server: IceServer) -> Self {
        webrtc::ice_transport::ice_server::RTCIceServer {
            urls: server.urls,
            username: server.username.unwrap_or_default(),
            credential: server.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

impl From<RTCPeerConnectionState> for TransportState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New => TransportState::New,
            RTCPeerConnectionState::Connecting => TransportState::Connecting,
            RTCPeerConnectionState::Connected => TransportState::Connected,
            RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
            RTCPeerConnectionState::Failed => TransportState::Failed,
            RTCPeerConnectionState::Closed => TransportState::Closed,
            RTCPeerConnectionState::Unspecified => TransportState::New,
        }
    }
}

fn h264_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_H264.to_string(),
        clock_rate: 90000,
        channels: 0,
        sdp_fmtp_line: H264_FMTP.to_string(),
        rtcp_feedback: vec![],
    }
}

/// Builds webrtc-rs peer connections that send one H.264 track.
pub struct WebRtcFactory {
    api: API,
    ice_servers: Vec<IceServer>,
}

impl WebRtcFactory {
    pub fn new(ice_servers: Vec<IceServer>) -> Result<Self, TransportError> {
        let mut media = MediaEngine::default();
        media.register_codec(
            RTCRtpCodecParameters {
                capability: h264_capability(),
                payload_type: H264_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;

        let registry = register_default_interceptors(Registry::new(), &mut media)?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }

    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }
}

impl TransportFactory for WebRtcFactory {
    type Transport = WebRtcTransport;

    async fn create(
        &self,
        id: SessionId,
        events: TransportEvents,
    ) -> Result<WebRtcTransport, TransportError> {
        let config = webrtc::peer_connection::configuration::RTCConfiguration {
            ice_servers: self.ice_servers.iter().cloned().map(Into::into).collect(),
            ..Default::default()
        };

        let peer = Arc::new(self.api.new_peer_connection(config).await?);

        let track = Arc::new(TrackLocalStaticSample::new(
            h264_capability(),
            "video".to_string(),
            "spyglass".to_string(),
        ));
        let sender = peer
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP must be drained for the interceptors (NACK, reports) to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        peer.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            log::debug!("peer connection {} is {}", events.session(), state);
            events.emit(state.into());
            Box::pin(async {})
        }));

        log::debug!("peer connection created for session {}", id);
        Ok(WebRtcTransport { id, peer, track })
    }
}

/// One webrtc-rs peer connection with its outbound video track.
pub struct WebRtcTransport {
    id: SessionId,
    peer: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
}

impl WebRtcTransport {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn connection_state(&self) -> TransportState {
        self.peer.connection_state().into()
    }
}

impl Transport for WebRtcTransport {
    async fn apply_offer(&self, sdp: String) -> Result<(), TransportError> {
        let offer = RTCSessionDescription::offer(sdp)?;
        self.peer.set_remote_description(offer).await?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<(), TransportError> {
        let answer = self.peer.create_answer(None).await?;
        self.peer.set_local_description(answer).await?;
        Ok(())
    }

    fn ice_gathering_complete(&self) -> bool {
        self.peer.ice_gathering_state() == RTCIceGatheringState::Complete
    }

    async fn local_description(&self) -> Option<String> {
        self.peer.local_description().await.map(|desc| desc.sdp)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        log::debug!("session {}: remote candidate {}", self.id, candidate.candidate);
        self.peer
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: None,
                username_fragment: None,
            })
            .await?;
        Ok(())
    }

    async fn write_frame(&self, sample: &FrameSample, duration: Duration) -> Result<(), TransportError> {
        self.track
            .write_sample(&Sample {
                data: sample.data.clone(),
                duration,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        log::info!("closing peer connection for session {}", self.id);
        self.peer.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
    use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

    async fn client_offer() -> (Arc<RTCPeerConnection>, String) {
        let mut media = MediaEngine::default();
        media.register_default_codecs().unwrap();
        let api = APIBuilder::new().with_media_engine(media).build();
        let client = Arc::new(
            api.new_peer_connection(Default::default())
                .await
                .unwrap(),
        );
        client
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .unwrap();

        let offer = client.create_offer(None).await.unwrap();
        let mut gathered = client.gathering_complete_promise().await;
        client.set_local_description(offer).await.unwrap();
        let _ = gathered.recv().await;
        let sdp = client.local_description().await.unwrap().sdp;
        (client, sdp)
    }

    fn events() -> (TransportEvents, mpsc::UnboundedReceiver<crate::signaling::TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TransportEvents::new(SessionId::new(), tx), rx)
    }

    #[test]
    fn test_ice_server_conversion() {
        let server = IceServer::new("turn:turn.example.org:3478").with_credentials("user", "secret");
        let rtc: webrtc::ice_transport::ice_server::RTCIceServer = server.into();
        assert_eq!(rtc.urls, vec!["turn:turn.example.org:3478".to_string()]);
        assert_eq!(rtc.username, "user");
        assert_eq!(rtc.credential, "secret");
    }

    #[test]
    fn test_connection_state_conversion() {
        assert_eq!(
            TransportState::from(RTCPeerConnectionState::Connected),
            TransportState::Connected
        );
        assert_eq!(
            TransportState::from(RTCPeerConnectionState::Unspecified),
            TransportState::New
        );
    }

    #[tokio::test]
    async fn test_answer_offers_h264_only() {
        let factory = WebRtcFactory::new(Vec::new()).unwrap();
        let (events, _rx) = events();
        let id = events.session();
        let transport = factory.create(id, events).await.unwrap();
        assert_eq!(transport.id(), id);
        assert_eq!(transport.connection_state(), TransportState::New);

        let (client, offer) = client_offer().await;
        transport.apply_offer(offer).await.unwrap();
        transport.create_answer().await.unwrap();

        for _ in 0..100 {
            if transport.ice_gathering_complete() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let answer = transport.local_description().await.unwrap();
        assert!(answer.starts_with("v=0"));
        assert!(answer.contains("H264"));
        assert!(!answer.contains("VP8"));

        transport.close().await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_offer_is_rejected() {
        let factory = WebRtcFactory::new(Vec::new()).unwrap();
        let (events, _rx) = events();
        let transport = factory.create(events.session(), events).await.unwrap();
        assert!(transport.apply_offer("not an offer".to_string()).await.is_err());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_moves_to_closed() {
        let factory = WebRtcFactory::new(Vec::new()).unwrap();
        let (events, _rx) = events();
        let transport = factory.create(events.session(), events).await.unwrap();
        transport.close().await.unwrap();
        assert_eq!(transport.connection_state(), TransportState::Closed);
    }
}
