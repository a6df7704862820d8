use super::{Camera, CameraSettings, ControlValue, FrameOutputs, FramePipeline};
use crate::errors::CameraError;
use crate::timing::{frame_interval, FrameClock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// RGB24 gradient that shifts with every frame, so consecutive frames differ.
pub fn gradient_frame(frame_number: u64, width: u32, height: u32) -> Vec<u8> {
    let mut data = vec![0u8; (width as usize) * (height as usize) * 3];
    let base = (frame_number % 256) as u8;

    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = base.wrapping_add((x % 256) as u8);
            data[idx + 1] = base.wrapping_add((y % 256) as u8);
            data[idx + 2] = base.wrapping_add(((x + y) % 256) as u8);
        }
    }
    data
}

/// Synthetic camera producing a moving gradient at the configured rate.
///
/// Needs no hardware, so it is the default source of the server binary and
/// of the integration tests.
pub struct TestPatternCamera {
    settings: CameraSettings,
    stop_flag: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    capture_thread: Option<JoinHandle<()>>,
}

impl TestPatternCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            stop_flag: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
            capture_thread: None,
        }
    }

    /// Frames produced since the camera was created.
    pub fn frames_produced(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }
}

impl Camera for TestPatternCamera {
    fn name(&self) -> &str {
        "test-pattern"
    }

    fn configure(&mut self, settings: CameraSettings) -> Result<(), CameraError> {
        if self.is_running() {
            return Err(CameraError::ControlError(
                "cannot reconfigure a running camera".to_string(),
            ));
        }
        if settings.width == 0 || settings.height == 0 || settings.fps == 0 {
            return Err(CameraError::InitializationError(format!(
                "invalid capture mode {}x{}@{}",
                settings.width, settings.height, settings.fps
            )));
        }
        self.settings = settings;
        Ok(())
    }

    fn start(&mut self, outputs: FrameOutputs) -> Result<(), CameraError> {
        if self.is_running() {
            return Err(CameraError::InitializationError(
                "camera already started".to_string(),
            ));
        }

        self.stop_flag.store(false, Ordering::Relaxed);
        let stop_flag = Arc::clone(&self.stop_flag);
        let frames = Arc::clone(&self.frames);
        let settings = self.settings.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), CameraError>>(1);

        let handle = std::thread::Builder::new()
            .name("spyglass-test-pattern".to_string())
            .spawn(move || {
                // Encoders are created on the capture thread that uses them.
                let mut pipeline =
                    match FramePipeline::new(&settings, FrameClock::new(), outputs.h264.is_some()) {
                        Ok(pipeline) => {
                            let _ = ready_tx.send(Ok(()));
                            pipeline
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };

                let interval = frame_interval(settings.fps);
                let mut next_deadline = Instant::now();
                let mut frame_number = 0u64;

                while !stop_flag.load(Ordering::Relaxed) {
                    let captured = Instant::now();
                    let rgb = gradient_frame(frame_number, settings.width, settings.height);
                    if let Err(e) = pipeline.process_rgb(
                        rgb,
                        settings.width,
                        settings.height,
                        captured,
                        &outputs,
                    ) {
                        log::error!("test pattern capture failed: {}", e);
                        break;
                    }
                    frame_number += 1;
                    frames.fetch_add(1, Ordering::Relaxed);

                    next_deadline += interval;
                    let now = Instant::now();
                    if next_deadline > now {
                        std::thread::sleep(next_deadline - now);
                    } else {
                        next_deadline = now;
                    }
                }

                outputs.close();
                log::debug!("test pattern capture thread exiting after {} frames", frame_number);
            })
            .map_err(|e| CameraError::InitializationError(format!("spawn failed: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(CameraError::InitializationError(
                    "capture thread exited during startup".to_string(),
                ));
            }
        }

        self.capture_thread = Some(handle);
        log::info!(
            "test pattern camera started at {}x{} {} fps",
            self.settings.width,
            self.settings.height,
            self.settings.fps
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        let Some(handle) = self.capture_thread.take() else {
            return Ok(());
        };
        self.stop_flag.store(true, Ordering::Relaxed);
        handle
            .join()
            .map_err(|_| CameraError::CaptureError("capture thread panicked".to_string()))?;
        log::info!("test pattern camera stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.capture_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn controls(&self) -> BTreeMap<String, ControlValue> {
        self.settings.control_values()
    }
}

impl Drop for TestPatternCamera {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("Error stopping camera in drop: {}", e);
        }
    }
}
