//! USB/V4L2 capture through nokhwa.
//!
//! nokhwa delivers frames on its own callback thread. The callback only
//! hands the raw buffer to a bounded channel; decoding and encoding run on a
//! separate thread so a slow encoder drops frames instead of stalling
//! capture.

use super::{Camera, CameraSettings, ControlValue, FrameOutputs, FramePipeline};
use crate::errors::CameraError;
use crate::timing::FrameClock;
use crossbeam_channel::{bounded, RecvTimeoutError, TrySendError};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::{Buffer, CallbackCamera};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const PENDING_FRAMES: usize = 2;

pub struct UsbCamera {
    settings: CameraSettings,
    name: String,
    camera: Option<CallbackCamera>,
    stop_flag: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    encode_thread: Option<JoinHandle<()>>,
}

impl UsbCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            name: format!("usb:{}", settings.device_index),
            settings,
            camera: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            encode_thread: None,
        }
    }

    /// Frames discarded because the encoder could not keep up.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn requested_format(&self) -> RequestedFormat<'static> {
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
            Resolution::new(self.settings.width, self.settings.height),
            FrameFormat::MJPEG,
            self.settings.fps,
        )))
    }
}

impl Camera for UsbCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, settings: CameraSettings) -> Result<(), CameraError> {
        if self.is_running() {
            return Err(CameraError::ControlError(
                "cannot reconfigure a running camera".to_string(),
            ));
        }
        self.name = format!("usb:{}", settings.device_index);
        self.settings = settings;
        Ok(())
    }

    fn start(&mut self, outputs: FrameOutputs) -> Result<(), CameraError> {
        if self.is_running() {
            return Err(CameraError::InitializationError(
                "camera already started".to_string(),
            ));
        }

        let (tx, rx) = bounded::<(Buffer, Instant)>(PENDING_FRAMES);
        let dropped = Arc::clone(&self.dropped);

        let mut camera = CallbackCamera::new(
            CameraIndex::Index(self.settings.device_index),
            self.requested_format(),
            move |buffer: Buffer| match tx.try_send((buffer, Instant::now())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => {}
            },
        )
        .map_err(|e| CameraError::InitializationError(format!("Failed to initialize camera: {}", e)))?;

        camera
            .open_stream()
            .map_err(|e| CameraError::InitializationError(format!("Failed to start stream: {}", e)))?;

        self.stop_flag.store(false, Ordering::Relaxed);
        let stop_flag = Arc::clone(&self.stop_flag);
        let settings = self.settings.clone();

        let handle = std::thread::Builder::new()
            .name("spyglass-usb-encode".to_string())
            .spawn(move || encode_loop(settings, rx, outputs, stop_flag))
            .map_err(|e| CameraError::InitializationError(format!("spawn failed: {e}")))?;

        self.camera = Some(camera);
        self.encode_thread = Some(handle);
        log::info!(
            "{} started at {}x{} {} fps",
            self.name,
            self.settings.width,
            self.settings.height,
            self.settings.fps
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        self.stop_flag.store(true, Ordering::Relaxed);

        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop_stream() {
                log::warn!("{}: failed to stop stream: {}", self.name, e);
            }
        }

        if let Some(handle) = self.encode_thread.take() {
            handle
                .join()
                .map_err(|_| CameraError::CaptureError("encode thread panicked".to_string()))?;
            log::info!("{} stopped", self.name);
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.encode_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn controls(&self) -> BTreeMap<String, ControlValue> {
        let mut values = self.settings.control_values();
        values.insert("Device".to_string(), ControlValue::from(self.name.as_str()));
        values
    }
}

impl Drop for UsbCamera {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Error stopping camera in drop: {}", e);
        }
    }
}

fn encode_loop(
    mut settings: CameraSettings,
    rx: crossbeam_channel::Receiver<(Buffer, Instant)>,
    outputs: FrameOutputs,
    stop_flag: Arc<AtomicBool>,
) {
    let clock = FrameClock::new();
    let with_h264 = outputs.h264.is_some();
    let mut pipeline = match FramePipeline::new(&settings, clock.clone(), with_h264) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            log::error!("failed to create encoders: {}", e);
            outputs.close();
            return;
        }
    };

    while !stop_flag.load(Ordering::Relaxed) {
        let (buffer, captured) = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if buffer.source_frame_format() == FrameFormat::MJPEG && pipeline.can_pass_through_jpeg() {
            pipeline.process_jpeg(buffer.buffer().to_vec(), captured, &outputs);
            continue;
        }

        let image = match buffer.decode_image::<RgbFormat>() {
            Ok(image) => image,
            Err(e) => {
                log::warn!("dropping undecodable frame: {}", e);
                continue;
            }
        };
        let (width, height) = image.dimensions();
        if (width, height) != (settings.width, settings.height) {
            log::info!(
                "camera delivers {}x{} instead of {}x{}, recreating encoders",
                width,
                height,
                settings.width,
                settings.height
            );
            settings.width = width;
            settings.height = height;
            pipeline = match FramePipeline::new(&settings, clock.clone(), with_h264) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    log::error!("failed to recreate encoders: {}", e);
                    break;
                }
            };
        }
        if let Err(e) = pipeline.process_rgb(image.into_raw(), width, height, captured, &outputs) {
            log::error!("USB capture failed: {}", e);
            break;
        }
    }

    outputs.close();
}
