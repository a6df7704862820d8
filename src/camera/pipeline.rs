use super::{CameraSettings, FrameOutputs};
use crate::errors::CameraError;
use crate::timing::FrameClock;
use crate::types::FrameSample;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ExtendedColorType, RgbImage};
use std::time::Instant;

#[cfg(feature = "h264")]
use super::encoder::H264Encoder;

/// Encode an RGB24 buffer as a baseline JPEG.
pub fn encode_jpeg(rgb: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>, CameraError> {
    let mut jpeg = Vec::with_capacity(rgb.len() / 8);
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode(rgb, width, height, ExtendedColorType::Rgb8)
        .map_err(|e| CameraError::EncodingError(format!("JPEG encoding failed: {}", e)))?;
    Ok(jpeg)
}

/// Turns raw captured frames into timestamped samples on every output.
///
/// One pipeline belongs to one capture thread. Both encoders stamp their
/// samples from the same clock and sequence counter.
pub struct FramePipeline {
    clock: FrameClock,
    quality: u8,
    hflip: bool,
    vflip: bool,
    #[cfg(feature = "h264")]
    h264: Option<H264Encoder>,
    #[cfg(feature = "h264")]
    keyframe_every: u64,
    frames: u64,
}

impl FramePipeline {
    pub fn new(settings: &CameraSettings, clock: FrameClock, with_h264: bool) -> Result<Self, CameraError> {
        #[cfg(feature = "h264")]
        let h264 = if with_h264 {
            Some(H264Encoder::new(
                settings.width,
                settings.height,
                settings.fps as f64,
                settings.h264_bitrate,
            )?)
        } else {
            None
        };
        #[cfg(not(feature = "h264"))]
        if with_h264 {
            log::warn!("H.264 output requested but the h264 feature is disabled");
        }

        Ok(Self {
            clock,
            quality: settings.jpeg_quality,
            hflip: settings.hflip(),
            vflip: settings.vflip(),
            #[cfg(feature = "h264")]
            h264,
            #[cfg(feature = "h264")]
            keyframe_every: (settings.fps.max(1) * settings.keyframe_interval_secs.max(1)) as u64,
            frames: 0,
        })
    }

    /// Whether camera-side JPEG frames can be forwarded without re-encoding.
    pub fn can_pass_through_jpeg(&self) -> bool {
        !self.hflip && !self.vflip && !self.encodes_h264()
    }

    pub fn encodes_h264(&self) -> bool {
        #[cfg(feature = "h264")]
        {
            self.h264.is_some()
        }
        #[cfg(not(feature = "h264"))]
        {
            false
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    /// Flip, encode and publish one RGB24 frame captured at `captured`.
    pub fn process_rgb(
        &mut self,
        rgb: Vec<u8>,
        width: u32,
        height: u32,
        captured: Instant,
        outputs: &FrameOutputs,
    ) -> Result<(), CameraError> {
        let expected = (width as usize) * (height as usize) * 3;
        if rgb.len() != expected {
            return Err(CameraError::CaptureError(format!(
                "frame is {} bytes, expected {} for {}x{}",
                rgb.len(),
                expected,
                width,
                height
            )));
        }

        let rgb = self.apply_flips(rgb, width, height)?;
        let timestamp_us = self.clock.us_at(captured);
        let sequence = self.clock.next_sequence();

        let jpeg = encode_jpeg(&rgb, width, height, self.quality)?;
        outputs
            .jpeg
            .on_frame(FrameSample::new(jpeg, timestamp_us, true, sequence));

        #[cfg(feature = "h264")]
        if let (Some(encoder), Some(sink)) = (self.h264.as_mut(), outputs.h264.as_ref()) {
            if self.frames > 0 && self.frames % self.keyframe_every == 0 {
                encoder.force_keyframe();
            }
            let encoded = encoder.encode_rgb(&rgb)?;
            if !encoded.data.is_empty() {
                sink.on_frame(FrameSample::new(
                    encoded.data,
                    timestamp_us,
                    encoded.is_keyframe,
                    sequence,
                ));
            }
        }

        self.frames += 1;
        Ok(())
    }

    /// Publish a JPEG produced by the camera itself.
    pub fn process_jpeg(&mut self, jpeg: Vec<u8>, captured: Instant, outputs: &FrameOutputs) {
        let timestamp_us = self.clock.us_at(captured);
        let sequence = self.clock.next_sequence();
        outputs
            .jpeg
            .on_frame(FrameSample::new(jpeg, timestamp_us, true, sequence));
        self.frames += 1;
    }

    fn apply_flips(&self, rgb: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>, CameraError> {
        if !self.hflip && !self.vflip {
            return Ok(rgb);
        }
        let mut image = RgbImage::from_raw(width, height, rgb)
            .ok_or_else(|| CameraError::CaptureError("frame buffer too small".to_string()))?;
        if self.hflip {
            imageops::flip_horizontal_in_place(&mut image);
        }
        if self.vflip {
            imageops::flip_vertical_in_place(&mut image);
        }
        Ok(image.into_raw())
    }
}
