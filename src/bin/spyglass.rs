use anyhow::{anyhow, bail, Context};
use spyglass::bridge::AsyncBridge;
use spyglass::broadcast::FrameBroadcaster;
use spyglass::camera::{FrameOutputs, SharedCamera, TestPatternCamera};
use spyglass::config::{CameraSource, ServerConfig};
use spyglass::server::StreamingServer;
use spyglass::signaling::Signaling;
use spyglass::webrtc::WebRtcFactory;
use std::env;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

const USAGE: &str = "\
Usage: spyglass [options]

  --config PATH            TOML configuration file
  --bindaddress ADDR       address to listen on
  --port N                 port to listen on
  --resolution WxH         capture resolution, e.g. 1280x720
  --fps N                  capture frame rate
  --stream-url P           MJPEG stream path
  --snapshot-url P         snapshot path
  --webrtc-url P           WebRTC signaling path
  --orientation-exif N     EXIF orientation 1-8 added to JPEG output (0 = none)
  --max-sessions N         concurrent WebRTC session limit
  --source NAME            capture source: test-pattern or usb
  --upside-down            rotate the image by 180 degrees
  --flip-horizontal        mirror the image horizontally
  --flip-vertical          mirror the image vertically
  --disable-webrtc         serve MJPEG only
  --print-config           print the effective configuration and exit
  -h, --help               show this help";

/// Command-line flags; every value overrides the configuration.
#[derive(Debug, Default)]
struct Cli {
    config: Option<PathBuf>,
    bind_address: Option<String>,
    port: Option<u16>,
    resolution: Option<(u32, u32)>,
    fps: Option<u32>,
    stream_url: Option<String>,
    snapshot_url: Option<String>,
    webrtc_url: Option<String>,
    orientation_exif: Option<u8>,
    max_sessions: Option<usize>,
    source: Option<CameraSource>,
    upside_down: bool,
    flip_horizontal: bool,
    flip_vertical: bool,
    disable_webrtc: bool,
    print_config: bool,
    help: bool,
}

impl Cli {
    fn parse(args: &[String]) -> anyhow::Result<Self> {
        let mut cli = Cli::default();
        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || next_value(args, &mut i, flag);
            match flag {
                "--config" => cli.config = Some(PathBuf::from(value()?)),
                "--bindaddress" => cli.bind_address = Some(value()?.to_string()),
                "--port" => cli.port = Some(value()?.parse().context("--port")?),
                "--resolution" => cli.resolution = Some(parse_resolution(value()?)?),
                "--fps" => cli.fps = Some(value()?.parse().context("--fps")?),
                "--stream-url" => cli.stream_url = Some(value()?.to_string()),
                "--snapshot-url" => cli.snapshot_url = Some(value()?.to_string()),
                "--webrtc-url" => cli.webrtc_url = Some(value()?.to_string()),
                "--orientation-exif" => {
                    cli.orientation_exif = Some(value()?.parse().context("--orientation-exif")?)
                }
                "--max-sessions" => {
                    cli.max_sessions = Some(value()?.parse().context("--max-sessions")?)
                }
                "--source" => {
                    cli.source = Some(match value()? {
                        "test-pattern" => CameraSource::TestPattern,
                        "usb" => CameraSource::Usb,
                        other => bail!("unknown source {:?}", other),
                    })
                }
                "--upside-down" => cli.upside_down = true,
                "--flip-horizontal" => cli.flip_horizontal = true,
                "--flip-vertical" => cli.flip_vertical = true,
                "--disable-webrtc" => cli.disable_webrtc = true,
                "--print-config" => cli.print_config = true,
                "-h" | "--help" => cli.help = true,
                other => bail!("unknown argument {:?}\n\n{}", other, USAGE),
            }
            i += 1;
        }
        Ok(cli)
    }

    fn apply(&self, config: &mut ServerConfig) {
        if let Some(address) = &self.bind_address {
            config.bind_address = address.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some((width, height)) = self.resolution {
            config.camera.width = width;
            config.camera.height = height;
        }
        if let Some(fps) = self.fps {
            config.camera.fps = fps;
        }
        if let Some(url) = &self.stream_url {
            config.stream_url = url.clone();
        }
        if let Some(url) = &self.snapshot_url {
            config.snapshot_url = url.clone();
        }
        if let Some(url) = &self.webrtc_url {
            config.webrtc_url = url.clone();
        }
        if let Some(orientation) = self.orientation_exif {
            config.orientation_exif = orientation;
        }
        if let Some(max_sessions) = self.max_sessions {
            config.max_sessions = max_sessions;
        }
        if let Some(source) = self.source {
            config.source = source;
        }
        config.camera.upside_down |= self.upside_down;
        config.camera.flip_horizontal |= self.flip_horizontal;
        config.camera.flip_vertical |= self.flip_vertical;
        if self.disable_webrtc {
            config.webrtc_enabled = false;
        }
    }
}

fn next_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> anyhow::Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{} needs a value", flag))
}

fn parse_resolution(value: &str) -> anyhow::Result<(u32, u32)> {
    let (width, height) = value
        .split_once(|c: char| c == 'x' || c == 'X')
        .ok_or_else(|| anyhow!("resolution must look like 1280x720, got {:?}", value))?;
    Ok((
        width.trim().parse().context("resolution width")?,
        height.trim().parse().context("resolution height")?,
    ))
}

fn open_camera(config: &ServerConfig) -> anyhow::Result<SharedCamera> {
    let camera: SharedCamera = match config.source {
        CameraSource::TestPattern => Arc::new(Mutex::new(TestPatternCamera::new(config.camera.clone()))),
        #[cfg(feature = "usb")]
        CameraSource::Usb => Arc::new(Mutex::new(spyglass::camera::UsbCamera::new(
            config.camera.clone(),
        ))),
        #[cfg(not(feature = "usb"))]
        CameraSource::Usb => bail!("USB capture needs the `usb` feature"),
    };
    Ok(camera)
}

fn run(mut config: ServerConfig) -> anyhow::Result<()> {
    if config.webrtc_enabled && !cfg!(feature = "h264") {
        log::warn!("Built without the `h264` feature, WebRTC is disabled");
        config.webrtc_enabled = false;
    }

    let jpeg = Arc::new(FrameBroadcaster::new(config.queue_capacity));
    let h264 = Arc::new(FrameBroadcaster::new(config.queue_capacity));

    let mut outputs = FrameOutputs::new(jpeg.clone());
    if config.webrtc_enabled {
        outputs = outputs.with_h264(h264.clone());
    }

    let camera = open_camera(&config)?;
    camera
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .start(outputs)
        .context("starting camera")?;

    let mut signaling = if config.webrtc_enabled {
        let factory = WebRtcFactory::new(config.ice_servers.clone()).context("creating WebRTC API")?;
        let settings = config.signaling_settings();
        let video = h264.clone();
        let bridge = AsyncBridge::spawn("spyglass-signaling", move || {
            Signaling::new(factory, video, settings)
        })
        .context("starting signaling scheduler")?;
        Some(bridge)
    } else {
        None
    };

    let mut builder = StreamingServer::builder(config.clone(), jpeg).camera(camera.clone());
    if let Some(bridge) = &signaling {
        builder = builder.signaling(Arc::new(bridge.handle()));
    }
    let server = builder
        .bind()
        .with_context(|| format!("binding {}", config.socket_addr()))?;

    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        log::info!("Shutting down");
        shutdown.shutdown();
    })
    .context("installing signal handler")?;

    server.serve_forever();

    if let Some(bridge) = signaling.as_mut() {
        match bridge.invoke(|signaling| async move { signaling.close_all().await }) {
            Ok(closed) => log::debug!("closed {} sessions on shutdown", closed),
            Err(e) => log::warn!("failed to close sessions: {}", e),
        }
        bridge.shutdown();
    }
    camera
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .stop()
        .context("stopping camera")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cli = Cli::parse(&args)?;
    if cli.help {
        println!("{}", USAGE);
        return Ok(());
    }

    spyglass::init_logging();

    let mut config = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    config.validate().context("invalid configuration")?;

    if cli.print_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    log::info!("{} {} starting", spyglass::NAME, spyglass::VERSION);
    run(config)
}
