//! Server configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `SPYGLASS_*` environment variables (nested keys separated by `__`, e.g.
//! `SPYGLASS_CAMERA__WIDTH=1280`). Command-line flags are applied on top by
//! the binary.

use crate::camera::CameraSettings;
use crate::errors::ConfigError;
use crate::signaling::SignalingSettings;
use crate::timing::frame_interval;
use crate::webrtc::IceServer;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which capture collaborator feeds the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CameraSource {
    TestPattern,
    Usb,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub stream_url: String,
    pub snapshot_url: String,
    pub controls_url: String,
    pub webrtc_url: String,
    pub webrtc_enabled: bool,
    /// Concurrent WebRTC session cap.
    pub max_sessions: usize,
    /// Per-consumer frame buffer depth.
    pub queue_capacity: usize,
    pub gather_poll_interval_ms: u64,
    pub gather_timeout_ms: u64,
    /// How long a snapshot request waits for a fresh frame.
    pub snapshot_timeout_ms: u64,
    /// A blocked socket write fails after this long, ending stalled streams.
    pub write_timeout_ms: u64,
    /// EXIF orientation (1..=8) added to JPEG output; 0 disables it.
    pub orientation_exif: u8,
    pub source: CameraSource,
    pub camera: CameraSettings,
    /// Advertised to clients in `Link` headers and used for the server's
    /// own ICE agent.
    pub ice_servers: Vec<IceServer>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            stream_url: "/stream".to_string(),
            snapshot_url: "/snapshot".to_string(),
            controls_url: "/controls".to_string(),
            webrtc_url: "/webrtc".to_string(),
            webrtc_enabled: true,
            max_sessions: 20,
            queue_capacity: crate::broadcast::DEFAULT_QUEUE_CAPACITY,
            gather_poll_interval_ms: 100,
            gather_timeout_ms: 10_000,
            snapshot_timeout_ms: 5_000,
            write_timeout_ms: 10_000,
            orientation_exif: 0,
            source: CameraSource::TestPattern,
            camera: CameraSettings::default(),
            ice_servers: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("spyglass.toml")
    }

    /// Build the layered configuration. `file`, when given, must exist.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = config::Config::try_from(&ServerConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = file {
            if !path.exists() {
                return Err(ConfigError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} does not exist", path.display()),
                )));
            }
            builder = builder.add_source(
                config::File::from(path.to_path_buf()).format(config::FileFormat::Toml),
            );
            log::info!("Loading configuration from {:?}", path);
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SPYGLASS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: ServerConfig = builder.build()?.try_deserialize()?;
        Ok(loaded)
    }

    /// Parse a TOML document on top of the defaults, ignoring the environment.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let defaults = config::Config::try_from(&ServerConfig::default())?;
        let loaded = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::from_str(contents, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        Ok(loaded)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(path, self.to_toml_string()?)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.max_sessions == 0 {
            return invalid("max_sessions must be at least 1".to_string());
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity must be at least 1".to_string());
        }
        if self.write_timeout_ms == 0 {
            return invalid("write_timeout_ms must be at least 1".to_string());
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return invalid(format!(
                "invalid resolution {}x{}",
                self.camera.width, self.camera.height
            ));
        }
        if self.camera.fps == 0 || self.camera.fps > 240 {
            return invalid("fps must be between 1 and 240".to_string());
        }
        if self.camera.jpeg_quality == 0 || self.camera.jpeg_quality > 100 {
            return invalid("JPEG quality must be between 1 and 100".to_string());
        }
        if self.orientation_exif > 8 {
            return invalid(format!(
                "orientation_exif must be 0..=8, got {}",
                self.orientation_exif
            ));
        }
        for (name, path) in [
            ("stream_url", &self.stream_url),
            ("snapshot_url", &self.snapshot_url),
            ("controls_url", &self.controls_url),
            ("webrtc_url", &self.webrtc_url),
        ] {
            if !path.starts_with('/') {
                return invalid(format!("{} must start with '/', got {:?}", name, path));
            }
        }
        if self.ice_servers.iter().any(|server| server.urls.is_empty()) {
            return invalid("every ICE server needs at least one URL".to_string());
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn signaling_settings(&self) -> SignalingSettings {
        SignalingSettings {
            max_sessions: self.max_sessions,
            gather_poll_interval: Duration::from_millis(self.gather_poll_interval_ms.max(1)),
            gather_timeout: Duration::from_millis(self.gather_timeout_ms),
            frame_interval: frame_interval(self.camera.fps),
        }
    }
}
