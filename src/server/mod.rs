//! Thread-per-connection HTTP front end.
//!
//! Each accepted connection gets its own worker thread that reads exactly one
//! request, routes it by verb and path and writes the response. MJPEG streams
//! keep their worker until the client leaves. Signaling requests are handed
//! to the [`SignalingService`], which forwards them to the scheduler thread.

pub mod http;
pub mod mjpeg;
pub mod paths;
pub mod whep;

use crate::broadcast::FrameBroadcaster;
use crate::camera::SharedCamera;
use crate::config::ServerConfig;
use crate::errors::HttpError;
use crate::signaling::SignalingService;
use self::http::{Request, Response};
use ::http::{Method, StatusCode};
use mjpeg::JpegSource;
use paths::urls_match;
use std::io::{self, BufReader};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use whep::WhepRoutes;

pub use whep::link_values;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Routing table and the collaborators the handlers need.
struct Dispatcher {
    stream_url: String,
    snapshot_url: String,
    controls_url: String,
    jpeg: JpegSource,
    camera: Option<SharedCamera>,
    whep: Option<WhepRoutes>,
    shutdown: Arc<AtomicBool>,
    write_timeout: Duration,
}

impl Dispatcher {
    fn handle(&self, mut stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
            log::debug!("{}: cannot set read timeout: {}", peer, e);
        }
        // A client that stops reading fails the next write and frees its queue.
        if let Err(e) = stream.set_write_timeout(Some(self.write_timeout)) {
            log::debug!("{}: cannot set write timeout: {}", peer, e);
        }

        let request = {
            let mut reader = match stream.try_clone() {
                Ok(reader) => BufReader::new(reader),
                Err(e) => {
                    log::warn!("{}: cannot clone socket: {}", peer, e);
                    return;
                }
            };
            Request::read_from(&mut reader)
        };

        let request = match request {
            Ok(request) => request,
            Err(HttpError::ConnectionClosed) => {
                log::debug!("{}: connection closed before a request", peer);
                return;
            }
            Err(HttpError::Io(e)) => {
                log::debug!("{}: read failed: {}", peer, e);
                return;
            }
            Err(e @ HttpError::TooLarge(_)) => {
                self.reply(&mut stream, peer, Response::text(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()));
                return;
            }
            Err(e @ HttpError::Malformed(_)) => {
                self.reply(&mut stream, peer, Response::text(StatusCode::BAD_REQUEST, e.to_string()));
                return;
            }
        };

        log::debug!("{}: {} {}", peer, request.method, request.target);
        self.route(&request, &mut stream, peer);
    }

    fn route(&self, request: &Request, stream: &mut TcpStream, peer: SocketAddr) {
        let path = request.target.as_str();
        let whep = self
            .whep
            .as_ref()
            .filter(|routes| urls_match(routes.base(), path, false));

        let response = match (&request.method, whep) {
            (&Method::GET, _) if urls_match(&self.stream_url, path, true) => {
                match self.jpeg.stream(stream, &self.shutdown) {
                    Ok(frames) => log::debug!("{}: stream ended after {} frames", peer, frames),
                    Err(e) => log::debug!("{}: stream client disconnected: {}", peer, e),
                }
                return;
            }
            (&Method::GET, _) if urls_match(&self.snapshot_url, path, true) => self.jpeg.snapshot(),
            (&Method::GET, _) if urls_match(&self.controls_url, path, true) => self.controls(),
            (&Method::OPTIONS, Some(routes)) => routes.options(request),
            (&Method::POST, Some(routes)) => routes.post(request),
            (&Method::PATCH, _) => match self.whep.as_ref().filter(|r| r.handles_patch(path)) {
                Some(routes) => routes.patch(request),
                None => Response::text(StatusCode::NOT_FOUND, ""),
            },
            _ => Response::text(StatusCode::NOT_FOUND, ""),
        };
        self.reply(stream, peer, response);
    }

    fn controls(&self) -> Response {
        let values = match &self.camera {
            Some(camera) => camera
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .controls(),
            None => Default::default(),
        };
        match serde_json::to_vec(&values) {
            Ok(body) => Response::new(StatusCode::OK).with_body("application/json", body),
            Err(e) => Response::text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    fn reply(&self, stream: &mut TcpStream, peer: SocketAddr, response: Response) {
        if let Err(e) = response.write_to(stream) {
            log::debug!("{}: client disconnected before the response: {}", peer, e);
        }
    }
}

/// Stops a running server's accept loop and its MJPEG streams.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    wake_addr: SocketAddr,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if self.flag.swap(true, Ordering::SeqCst) {
            return;
        }
        // Unblock accept() with a throwaway connection.
        if let Err(e) = TcpStream::connect_timeout(&self.wake_addr, Duration::from_secs(1)) {
            log::debug!("shutdown wake-up connection failed: {}", e);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct StreamingServerBuilder {
    config: ServerConfig,
    jpeg: Arc<FrameBroadcaster>,
    camera: Option<SharedCamera>,
    signaling: Option<Arc<dyn SignalingService>>,
}

impl StreamingServerBuilder {
    /// Source of `/controls`.
    pub fn camera(mut self, camera: SharedCamera) -> Self {
        self.camera = Some(camera);
        self
    }

    /// Enables the WebRTC routes when `webrtc_enabled` is set.
    pub fn signaling(mut self, service: Arc<dyn SignalingService>) -> Self {
        self.signaling = Some(service);
        self
    }

    pub fn bind(self) -> io::Result<StreamingServer> {
        let listener = TcpListener::bind(self.config.socket_addr())?;
        let local_addr = listener.local_addr()?;

        let whep = match (self.config.webrtc_enabled, self.signaling) {
            (true, Some(service)) => Some(WhepRoutes::new(
                self.config.webrtc_url.clone(),
                self.config.ice_servers.clone(),
                service,
            )),
            (true, None) => {
                log::warn!("WebRTC is enabled but no signaling service was provided");
                None
            }
            (false, _) => None,
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let dispatcher = Dispatcher {
            stream_url: self.config.stream_url.clone(),
            snapshot_url: self.config.snapshot_url.clone(),
            controls_url: self.config.controls_url.clone(),
            jpeg: JpegSource::new(
                self.jpeg,
                self.config.orientation_exif,
                self.config.snapshot_timeout(),
            ),
            camera: self.camera,
            whep,
            shutdown: Arc::clone(&shutdown),
            write_timeout: self.config.write_timeout(),
        };

        let mut wake_addr = local_addr;
        if wake_addr.ip().is_unspecified() {
            wake_addr.set_ip(match wake_addr {
                SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
                SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
            });
        }

        Ok(StreamingServer {
            listener,
            local_addr,
            dispatcher: Arc::new(dispatcher),
            shutdown: ShutdownHandle {
                flag: shutdown,
                wake_addr,
            },
            connections: Arc::new(AtomicU64::new(0)),
        })
    }
}

/// HTTP server for MJPEG, snapshots, controls and WHEP signaling.
pub struct StreamingServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    shutdown: ShutdownHandle,
    connections: Arc<AtomicU64>,
}

impl StreamingServer {
    pub fn builder(config: ServerConfig, jpeg: Arc<FrameBroadcaster>) -> StreamingServerBuilder {
        StreamingServerBuilder {
            config,
            jpeg,
            camera: None,
            signaling: None,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn webrtc_enabled(&self) -> bool {
        self.dispatcher.whep.is_some()
    }

    /// Accept connections until shut down, one worker thread each.
    pub fn serve_forever(self) {
        log::info!("Server listening on {}", self.local_addr);
        log::info!("Streaming endpoint: {}", self.dispatcher.stream_url);
        log::info!("Snapshot endpoint: {}", self.dispatcher.snapshot_url);
        log::info!("Controls endpoint: {}", self.dispatcher.controls_url);
        if let Some(routes) = &self.dispatcher.whep {
            log::info!("WebRTC endpoint: {}", routes.base());
        }

        for incoming in self.listener.incoming() {
            if self.shutdown.is_shutdown() {
                break;
            }
            let stream = match incoming {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("accept failed: {}", e);
                    continue;
                }
            };
            let peer = match stream.peer_addr() {
                Ok(peer) => peer,
                Err(e) => {
                    log::debug!("dropping connection without peer address: {}", e);
                    continue;
                }
            };

            let id = self.connections.fetch_add(1, Ordering::Relaxed);
            let dispatcher = Arc::clone(&self.dispatcher);
            let spawned = std::thread::Builder::new()
                .name(format!("spyglass-http-{}", id))
                .spawn(move || dispatcher.handle(stream, peer));
            if let Err(e) = spawned {
                log::error!("failed to spawn worker for {}: {}", peer, e);
            }
        }
        log::info!("Server on {} stopped accepting connections", self.local_addr);
    }

    /// Run [`serve_forever`](Self::serve_forever) on a background thread.
    pub fn spawn(self) -> io::Result<RunningServer> {
        let local_addr = self.local_addr;
        let shutdown = self.shutdown_handle();
        let thread = std::thread::Builder::new()
            .name("spyglass-accept".to_string())
            .spawn(move || self.serve_forever())?;
        Ok(RunningServer {
            local_addr,
            shutdown,
            thread: Some(thread),
        })
    }
}

/// A server running on its own accept thread. Dropping it shuts it down.
pub struct RunningServer {
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Stop accepting and wait for the accept thread.
    pub fn shutdown(&mut self) {
        self.shutdown.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("accept thread panicked");
            }
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
