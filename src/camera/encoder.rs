//! openh264 wrapper feeding the WebRTC track.

use crate::errors::CameraError;
use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;

/// Encodes RGB24 frames into Annex B access units.
pub struct H264Encoder {
    encoder: Encoder,
    width: usize,
    height: usize,
    encoded: u64,
}

impl H264Encoder {
    /// openh264 reads the geometry off each YUV frame, so `_fps` and
    /// `_bitrate` only document the caller's intent.
    pub fn new(width: u32, height: u32, _fps: f64, _bitrate: u32) -> Result<Self, CameraError> {
        if width == 0 || height == 0 || width % 2 == 1 || height % 2 == 1 {
            return Err(CameraError::InitializationError(format!(
                "H.264 needs non-zero even dimensions, got {}x{}",
                width, height
            )));
        }

        let encoder = Encoder::new().map_err(|e| {
            CameraError::InitializationError(format!("openh264 encoder unavailable: {}", e))
        })?;

        Ok(Self {
            encoder,
            width: width as usize,
            height: height as usize,
            encoded: 0,
        })
    }

    pub fn encode_rgb(&mut self, rgb: &[u8]) -> Result<EncodedFrame, CameraError> {
        if rgb.len() != self.width * self.height * 3 {
            return Err(CameraError::EncodingError(format!(
                "RGB frame of {} bytes does not match {}x{}",
                rgb.len(),
                self.width,
                self.height
            )));
        }

        let planes = Yuv420::from_rgb(rgb, self.width, self.height);
        let source = YUVBuffer::from_vec(planes.into_vec(), self.width, self.height);
        let bitstream = self
            .encoder
            .encode(&source)
            .map_err(|e| CameraError::EncodingError(format!("H.264 encode: {}", e)))?;

        self.encoded += 1;
        Ok(EncodedFrame {
            is_keyframe: matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I),
            data: bitstream.to_vec(),
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.encoded
    }

    /// The next frame comes out as an IDR.
    pub fn force_keyframe(&mut self) {
        self.encoder.force_intra_frame();
    }
}

#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// NAL units with start codes.
    pub data: Vec<u8>,
    pub is_keyframe: bool,
}

/// Planar 4:2:0 frame, chroma sampled at the top-left pixel of each 2x2 block.
struct Yuv420 {
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

impl Yuv420 {
    fn from_rgb(rgb: &[u8], width: usize, height: usize) -> Self {
        let mut y = Vec::with_capacity(width * height);
        let mut u = Vec::with_capacity(width * height / 4);
        let mut v = Vec::with_capacity(width * height / 4);

        for (row, line) in rgb.chunks_exact(width * 3).enumerate() {
            for (col, px) in line.chunks_exact(3).enumerate() {
                let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);
                y.push(bt601(66 * r + 129 * g + 25 * b, 16));
                if row % 2 == 0 && col % 2 == 0 {
                    u.push(bt601(-38 * r - 74 * g + 112 * b, 128));
                    v.push(bt601(112 * r - 94 * g - 18 * b, 128));
                }
            }
        }
        Self { y, u, v }
    }

    fn into_vec(self) -> Vec<u8> {
        let mut out = self.y;
        out.extend_from_slice(&self.u);
        out.extend_from_slice(&self.v);
        out
    }
}

fn bt601(weighted: i32, offset: i32) -> u8 {
    (((weighted + 128) >> 8) + offset).clamp(0, 255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuv_plane_sizes() {
        let planes = Yuv420::from_rgb(&vec![128u8; 64 * 48 * 3], 64, 48);
        assert_eq!(planes.y.len(), 64 * 48);
        assert_eq!(planes.u.len(), 32 * 24);
        assert_eq!(planes.into_vec().len(), 64 * 48 * 3 / 2);
    }

    #[test]
    fn test_black_and_white_luma() {
        let planes = Yuv420::from_rgb(&[0, 0, 0, 255, 255, 255], 2, 1);
        assert_eq!(planes.y, vec![16, 235]);
        assert_eq!(planes.u, vec![128]);
    }

    #[test]
    fn test_odd_dimensions_are_rejected() {
        assert!(H264Encoder::new(641, 480, 15.0, 1_000_000).is_err());
        assert!(H264Encoder::new(0, 480, 15.0, 1_000_000).is_err());
    }

    #[test]
    fn test_first_frame_is_annex_b_keyframe() {
        let mut encoder = H264Encoder::new(320, 240, 15.0, 500_000).unwrap();
        let encoded = encoder.encode_rgb(&vec![128u8; 320 * 240 * 3]).unwrap();
        assert!(
            encoded.data.starts_with(&[0x00, 0x00, 0x00, 0x01])
                || encoded.data.starts_with(&[0x00, 0x00, 0x01])
        );
        assert!(encoded.is_keyframe);
        assert_eq!(encoder.frame_count(), 1);
    }
}
