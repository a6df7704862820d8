//! Capture collaborators: the narrow `Camera` trait and its adapters.
//!
//! A camera runs its own capture thread and hands every encoded frame to the
//! [`FrameSink`]s in its [`FrameOutputs`]. The streaming core never talks to
//! hardware directly.

mod pipeline;
mod test_pattern;

#[cfg(feature = "h264")]
pub mod encoder;
#[cfg(feature = "usb")]
pub mod usb;

pub use pipeline::{encode_jpeg, FramePipeline};
pub use test_pattern::{gradient_frame, TestPatternCamera};
#[cfg(feature = "usb")]
pub use usb::UsbCamera;

use crate::broadcast::FrameSink;
use crate::errors::CameraError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A single camera control value as reported by `GET /controls`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for ControlValue {
    fn from(value: bool) -> Self {
        ControlValue::Bool(value)
    }
}

impl From<i64> for ControlValue {
    fn from(value: i64) -> Self {
        ControlValue::Integer(value)
    }
}

impl From<u32> for ControlValue {
    fn from(value: u32) -> Self {
        ControlValue::Integer(value as i64)
    }
}

impl From<f64> for ControlValue {
    fn from(value: f64) -> Self {
        ControlValue::Float(value)
    }
}

impl From<&str> for ControlValue {
    fn from(value: &str) -> Self {
        ControlValue::Text(value.to_string())
    }
}

/// Capture and encoding parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Rotate by 180 degrees; same as flipping both axes.
    pub upside_down: bool,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    /// JPEG quality, 1..=100.
    pub jpeg_quality: u8,
    /// Target H.264 bitrate in bits per second.
    pub h264_bitrate: u32,
    /// Seconds between forced H.264 keyframes.
    pub keyframe_interval_secs: u32,
    /// Capture device index (USB cameras only).
    pub device_index: u32,
    /// Extra device controls, passed through to the camera and reported back.
    pub controls: BTreeMap<String, ControlValue>,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 15,
            upside_down: false,
            flip_horizontal: false,
            flip_vertical: false,
            jpeg_quality: 85,
            h264_bitrate: 1_000_000,
            keyframe_interval_secs: 2,
            device_index: 0,
            controls: BTreeMap::new(),
        }
    }
}

impl CameraSettings {
    pub fn hflip(&self) -> bool {
        self.flip_horizontal || self.upside_down
    }

    pub fn vflip(&self) -> bool {
        self.flip_vertical || self.upside_down
    }

    /// Values reported by `GET /controls`: the explicit controls plus the
    /// capture geometry.
    pub fn control_values(&self) -> BTreeMap<String, ControlValue> {
        let mut values = self.controls.clone();
        values.insert("Width".to_string(), self.width.into());
        values.insert("Height".to_string(), self.height.into());
        values.insert("FrameRate".to_string(), self.fps.into());
        values.insert("HorizontalFlip".to_string(), self.hflip().into());
        values.insert("VerticalFlip".to_string(), self.vflip().into());
        values
    }
}

/// Where a camera delivers its encoded frames.
#[derive(Clone)]
pub struct FrameOutputs {
    pub jpeg: Arc<dyn FrameSink>,
    /// Present only when an H.264 consumer exists.
    pub h264: Option<Arc<dyn FrameSink>>,
}

impl FrameOutputs {
    pub fn new(jpeg: Arc<dyn FrameSink>) -> Self {
        Self { jpeg, h264: None }
    }

    pub fn with_h264(mut self, h264: Arc<dyn FrameSink>) -> Self {
        self.h264 = Some(h264);
        self
    }

    /// Tell every consumer that no more frames will arrive.
    pub fn close(&self) {
        self.jpeg.close();
        if let Some(h264) = &self.h264 {
            h264.close();
        }
    }
}

/// A capture source with a start/stop lifecycle.
pub trait Camera: Send {
    fn name(&self) -> &str;

    /// Apply settings. Only allowed while stopped.
    fn configure(&mut self, settings: CameraSettings) -> Result<(), CameraError>;

    /// Start capturing into `outputs`.
    fn start(&mut self, outputs: FrameOutputs) -> Result<(), CameraError>;

    /// Stop capturing and close the outputs.
    fn stop(&mut self) -> Result<(), CameraError>;

    fn is_running(&self) -> bool;

    fn controls(&self) -> BTreeMap<String, ControlValue>;
}

pub type SharedCamera = Arc<Mutex<dyn Camera>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upside_down_flips_both_axes() {
        let settings = CameraSettings {
            upside_down: true,
            ..Default::default()
        };
        assert!(settings.hflip());
        assert!(settings.vflip());
        assert!(!CameraSettings::default().hflip());
    }

    #[test]
    fn test_control_values_include_geometry() {
        let mut settings = CameraSettings::default();
        settings
            .controls
            .insert("AfMode".to_string(), ControlValue::from("continuous"));
        let values = settings.control_values();
        assert_eq!(values.get("Width"), Some(&ControlValue::Integer(640)));
        assert_eq!(values.get("FrameRate"), Some(&ControlValue::Integer(15)));
        assert_eq!(
            values.get("AfMode"),
            Some(&ControlValue::Text("continuous".to_string()))
        );
    }

    #[test]
    fn test_control_values_serialize_untagged() {
        let mut values = BTreeMap::new();
        values.insert("Brightness".to_string(), ControlValue::Float(0.5));
        values.insert("AeEnable".to_string(), ControlValue::Bool(true));
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"{"AeEnable":true,"Brightness":0.5}"#);
    }
}
