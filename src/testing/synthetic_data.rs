//! Synthetic frames and SDP for offline testing.
//!
//! Nothing here touches hardware or the network, so the broadcast,
//! signaling and HTTP layers can be exercised in plain unit tests.

use crate::camera::{encode_jpeg, gradient_frame};
use crate::errors::CameraError;
use crate::types::FrameSample;

/// Frame spacing of the synthetic feeds (30 fps).
pub const SYNTHETIC_FRAME_US: u64 = 33_333;

/// A tiny JPEG-shaped sample (SOI, sequence bytes, EOI).
///
/// Not decodable, but it carries the markers the HTTP layer cares about and
/// its payload identifies the frame.
pub fn synthetic_jpeg_sample(sequence: u64) -> FrameSample {
    let mut data = vec![0xFF, 0xD8];
    data.extend_from_slice(&sequence.to_be_bytes());
    data.extend_from_slice(&[0xFF, 0xD9]);
    FrameSample::new(data, sequence * SYNTHETIC_FRAME_US, true, sequence)
}

/// A real, decodable JPEG of the moving test gradient.
pub fn synthetic_jpeg_frame(sequence: u64, width: u32, height: u32) -> Result<FrameSample, CameraError> {
    let rgb = gradient_frame(sequence, width, height);
    let jpeg = encode_jpeg(&rgb, width, height, 75)?;
    Ok(FrameSample::new(jpeg, sequence * SYNTHETIC_FRAME_US, true, sequence))
}

/// An Annex B access unit with a single IDR (keyframe) or non-IDR slice.
pub fn synthetic_h264_sample(sequence: u64, keyframe: bool) -> FrameSample {
    let nal_header = if keyframe { 0x65 } else { 0x41 };
    let mut data = vec![0x00, 0x00, 0x00, 0x01, nal_header];
    data.extend_from_slice(&sequence.to_be_bytes());
    FrameSample::new(data, sequence * SYNTHETIC_FRAME_US, keyframe, sequence)
}

/// Minimal receive-only video offer as a browser WHEP client would send it.
pub fn sample_offer_sdp() -> String {
    [
        "v=0",
        "o=- 4215775240449105457 2 IN IP4 127.0.0.1",
        "s=-",
        "t=0 0",
        "a=group:BUNDLE 0",
        "a=msid-semantic: WMS",
        "m=video 9 UDP/TLS/RTP/SAVPF 102",
        "c=IN IP4 0.0.0.0",
        "a=rtcp:9 IN IP4 0.0.0.0",
        "a=ice-ufrag:EsAw",
        "a=ice-pwd:bP+XJMM09aR8AiX1jdukzR6Y",
        "a=ice-options:trickle",
        "a=fingerprint:sha-256 DA:7B:57:DC:28:CE:04:4F:31:79:85:C4:31:67:EB:27:58:29:ED:77:2A:0D:24:AE:ED:AB:81:C0:0E:1A:2E:8C",
        "a=setup:actpass",
        "a=mid:0",
        "a=recvonly",
        "a=rtcp-mux",
        "a=rtpmap:102 H264/90000",
        "a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
        "",
    ]
    .join("\r\n")
}

/// Trickle fragment carrying `candidates` host candidates for mid `0`.
pub fn sample_trickle_fragment(candidates: usize) -> String {
    let mut fragment = String::from("a=ice-ufrag:EsAw\r\na=ice-pwd:bP+XJMM09aR8AiX1jdukzR6Y\r\na=mid:0\r\n");
    for i in 0..candidates {
        fragment.push_str(&format!(
            "a=candidate:{} 1 udp 2122260223 192.168.1.{} {} typ host generation 0\r\n",
            i + 1,
            10 + i,
            50000 + i
        ));
    }
    fragment
}
