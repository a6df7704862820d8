//! End-to-end HTTP tests: a real listener on localhost, raw TCP clients and
//! scripted WebRTC transports behind the signaling bridge.

use spyglass::bridge::AsyncBridge;
use spyglass::broadcast::FrameBroadcaster;
use spyglass::config::ServerConfig;
use spyglass::server::{RunningServer, StreamingServer};
use spyglass::signaling::{Signaling, SignalingSettings, SDP_CONTENT_TYPE, TRICKLE_CONTENT_TYPE};
use spyglass::testing::{
    sample_offer_sdp, sample_trickle_fragment, spawn_scripted_signaling, synthetic_jpeg_sample,
    ScriptedFactory, TransportProbe, SCRIPTED_ANSWER,
};
use spyglass::types::SessionId;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct Harness {
    server: RunningServer,
    probe: TransportProbe,
    jpeg: Arc<FrameBroadcaster>,
    // Dropped after the server so in-flight requests can finish.
    _bridge: AsyncBridge<Signaling<ScriptedFactory>>,
}

impl Harness {
    fn start(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let mut config = ServerConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            max_sessions: 1,
            snapshot_timeout_ms: 2_000,
            ..Default::default()
        };
        configure(&mut config);

        let factory = ScriptedFactory::new();
        let probe = factory.probe();
        let settings = SignalingSettings {
            gather_poll_interval: Duration::from_millis(5),
            ..config.signaling_settings()
        };
        let bridge = spawn_scripted_signaling(
            factory,
            Arc::new(FrameBroadcaster::new(config.queue_capacity)),
            settings,
        )
        .unwrap();

        let jpeg = Arc::new(FrameBroadcaster::new(config.queue_capacity));
        let server = StreamingServer::builder(config, jpeg.clone())
            .signaling(Arc::new(bridge.handle()))
            .bind()
            .unwrap()
            .spawn()
            .unwrap();

        Self {
            server,
            probe,
            jpeg,
            _bridge: bridge,
        }
    }

    fn addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Publish JPEG frames every few milliseconds until the guard drops.
    fn feed_frames(&self) -> FrameFeeder {
        let stop = Arc::new(AtomicBool::new(false));
        let jpeg = self.jpeg.clone();
        let flag = stop.clone();
        let thread = thread::spawn(move || {
            let mut sequence = 0;
            while !flag.load(Ordering::Relaxed) {
                jpeg.publish(synthetic_jpeg_sample(sequence));
                sequence += 1;
                thread::sleep(Duration::from_millis(5));
            }
        });
        FrameFeeder {
            stop,
            thread: Some(thread),
        }
    }
}

struct FrameFeeder {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for FrameFeeder {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn headers_named(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .collect()
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn parse_reply(raw: &[u8]) -> Reply {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response head");
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();
    let status = status_line.split_whitespace().nth(1).unwrap().parse().unwrap();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    Reply {
        status,
        headers,
        body: raw[split + 4..].to_vec(),
    }
}

fn send(addr: SocketAddr, raw: &[u8]) -> Reply {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.write_all(raw).unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    parse_reply(&out)
}

fn request(addr: SocketAddr, method: &str, path: &str, headers: &[(&str, &str)], body: &str) -> Reply {
    let mut raw = format!("{} {} HTTP/1.1\r\nHost: localhost\r\n", method, path);
    for (name, value) in headers {
        raw.push_str(&format!("{}: {}\r\n", name, value));
    }
    if !body.is_empty() {
        raw.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    raw.push_str("\r\n");
    raw.push_str(body);
    send(addr, raw.as_bytes())
}

fn post_offer(addr: SocketAddr) -> Reply {
    request(
        addr,
        "POST",
        "/webrtc/whep",
        &[("Content-Type", SDP_CONTENT_TYPE)],
        &sample_offer_sdp(),
    )
}

#[test]
fn options_always_carries_cors() {
    let harness = Harness::start(|_| {});

    let plain = request(harness.addr(), "OPTIONS", "/webrtc", &[], "");
    assert_eq!(plain.status, 204);
    assert_eq!(plain.header("Access-Control-Allow-Origin"), Some("*"));
    assert_eq!(plain.header("Access-Control-Allow-Credentials"), Some("false"));
    assert!(plain.header("Access-Control-Allow-Methods").unwrap().contains("PATCH"));

    let preflight = request(
        harness.addr(),
        "OPTIONS",
        "/webrtc/whep",
        &[("Access-Control-Request-Method", "POST")],
        "",
    );
    assert_eq!(preflight.status, 204);
    assert_eq!(preflight.header("Access-Control-Allow-Origin"), Some("*"));
    assert!(preflight
        .header("Access-Control-Allow-Headers")
        .unwrap()
        .contains("Content-Type"));
}

#[test]
fn options_on_endpoint_advertises_ice_servers() {
    let harness = Harness::start(|config| {
        config.ice_servers = vec![spyglass::webrtc::IceServer::new("stun:stun.example.org:3478")];
    });
    let reply = request(harness.addr(), "OPTIONS", "/webrtc/whep", &[], "");
    assert_eq!(reply.status, 204);
    assert_eq!(reply.header("Access-Control-Expose-Headers"), Some("Link"));
    assert_eq!(
        reply.headers_named("Link"),
        vec!["<stun:stun.example.org:3478>; rel=\"ice-server\""]
    );
}

#[test]
fn whep_post_patch_and_admission() {
    let harness = Harness::start(|_| {});

    let created = post_offer(harness.addr());
    assert_eq!(created.status, 201);
    assert_eq!(created.header("Content-Type"), Some(SDP_CONTENT_TYPE));
    assert_eq!(created.header("ETag"), Some("*"));
    assert_eq!(created.header("Accept-Patch"), Some(TRICKLE_CONTENT_TYPE));
    assert_eq!(
        created.header("Access-Control-Expose-Headers"),
        Some("ETag, ID, Accept-Patch, Link, Location")
    );
    assert!(created.header("Link").is_none());
    assert_eq!(created.text(), SCRIPTED_ANSWER);

    let id: SessionId = created.header("ID").unwrap().parse().unwrap();
    let location = created.header("Location").unwrap().to_string();
    assert_eq!(location, format!("/whep/{}", id));
    assert_eq!(harness.probe.created(), vec![id]);

    let rejected = post_offer(harness.addr());
    assert_eq!(rejected.status, 429);
    assert_eq!(rejected.text(), "Too many clients connected");
    assert_eq!(rejected.header("Access-Control-Allow-Origin"), Some("*"));

    let patched = request(
        harness.addr(),
        "PATCH",
        &location,
        &[("Content-Type", TRICKLE_CONTENT_TYPE)],
        &sample_trickle_fragment(2),
    );
    assert_eq!(patched.status, 204);
    assert_eq!(patched.header("Access-Control-Allow-Origin"), Some("*"));
    let candidates = harness.probe.candidates(&id);
    assert_eq!(candidates.len(), 2);
    assert!(candidates[0].candidate.contains("192.168.1.10"));

    let under_prefix = request(
        harness.addr(),
        "PATCH",
        &format!("/webrtc/whep/{}", id),
        &[("Content-Type", TRICKLE_CONTENT_TYPE)],
        &sample_trickle_fragment(1),
    );
    assert_eq!(under_prefix.status, 204);
    assert_eq!(harness.probe.candidates(&id).len(), 3);
}

#[test]
fn patch_unknown_session_is_404() {
    let harness = Harness::start(|_| {});
    let reply = request(
        harness.addr(),
        "PATCH",
        &format!("/whep/{}", SessionId::new()),
        &[("Content-Type", TRICKLE_CONTENT_TYPE)],
        &sample_trickle_fragment(1),
    );
    assert_eq!(reply.status, 404);
    assert_eq!(reply.header("Access-Control-Allow-Origin"), Some("*"));
}

#[test]
fn bad_signaling_requests_are_400() {
    let harness = Harness::start(|_| {});

    let wrong_type = request(
        harness.addr(),
        "POST",
        "/webrtc/whep",
        &[("Content-Type", "text/plain")],
        &sample_offer_sdp(),
    );
    assert_eq!(wrong_type.status, 400);

    let created = post_offer(harness.addr());
    let location = created.header("Location").unwrap().to_string();
    let malformed = request(
        harness.addr(),
        "PATCH",
        &location,
        &[("Content-Type", TRICKLE_CONTENT_TYPE)],
        "a=candidate:broken\r\n",
    );
    assert_eq!(malformed.status, 400);

    let no_id = request(
        harness.addr(),
        "PATCH",
        "/webrtc",
        &[("Content-Type", TRICKLE_CONTENT_TYPE)],
        &sample_trickle_fragment(1),
    );
    assert_eq!(no_id.status, 400);

    let endpoint_without_id = request(
        harness.addr(),
        "PATCH",
        "/webrtc/whep",
        &[("Content-Type", TRICKLE_CONTENT_TYPE)],
        &sample_trickle_fragment(1),
    );
    assert_eq!(endpoint_without_id.status, 400);
    assert_eq!(endpoint_without_id.header("Access-Control-Allow-Origin"), Some("*"));
}

#[test]
fn ambiguous_content_length_is_400() {
    let harness = Harness::start(|_| {});

    let signed = send(
        harness.addr(),
        b"POST /webrtc/whep HTTP/1.1\r\nContent-Type: application/sdp\r\nContent-Length: +5\r\n\r\n",
    );
    assert_eq!(signed.status, 400);

    let conflicting = send(
        harness.addr(),
        b"POST /webrtc/whep HTTP/1.1\r\nContent-Type: application/sdp\r\nContent-Length: 5\r\nContent-Length: 3\r\n\r\n",
    );
    assert_eq!(conflicting.status, 400);
    assert!(harness.probe.created().is_empty());
}

#[test]
fn oversized_body_is_413() {
    let harness = Harness::start(|_| {});
    let reply = send(
        harness.addr(),
        b"POST /webrtc/whep HTTP/1.1\r\nContent-Type: application/sdp\r\nContent-Length: 2000000\r\n\r\n",
    );
    assert_eq!(reply.status, 413);
}

#[test]
fn unknown_routes_are_404() {
    let harness = Harness::start(|_| {});
    assert_eq!(request(harness.addr(), "GET", "/nothing", &[], "").status, 404);
    assert_eq!(request(harness.addr(), "DELETE", "/webrtc", &[], "").status, 404);
    assert_eq!(request(harness.addr(), "POST", "/webrtcx", &[], "x").status, 404);
}

#[test]
fn disabled_webrtc_hides_signaling_routes() {
    let harness = Harness::start(|config| config.webrtc_enabled = false);
    assert_eq!(post_offer(harness.addr()).status, 404);
    assert_eq!(request(harness.addr(), "OPTIONS", "/webrtc", &[], "").status, 404);
    assert!(harness.probe.created().is_empty());
}

#[test]
fn snapshot_returns_a_jpeg() {
    let harness = Harness::start(|config| config.orientation_exif = 3);
    let _feeder = harness.feed_frames();

    let reply = request(harness.addr(), "GET", "/snapshot?t=1", &[], "");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("Content-Type"), Some("image/jpeg"));
    assert!(reply.header("Date").is_some());
    assert_eq!(reply.header("Connection"), Some("close"));
    assert_eq!(&reply.body[..4], &[0xFF, 0xD8, 0xFF, 0xE1]);
    assert!(reply.body.ends_with(&[0xFF, 0xD9]));
}

#[test]
fn snapshot_without_frames_is_503() {
    let harness = Harness::start(|config| config.snapshot_timeout_ms = 50);
    let reply = request(harness.addr(), "GET", "/snapshot", &[], "");
    assert_eq!(reply.status, 503);
}

#[test]
fn stream_sends_multipart_frames_and_releases_its_queue() {
    let harness = Harness::start(|_| {});
    let _feeder = harness.feed_frames();

    let mut stream = TcpStream::connect(harness.addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(b"GET /stream HTTP/1.1\r\n\r\n").unwrap();

    let mut received = Vec::new();
    let mut chunk = [0u8; 4096];
    while received.windows(7).filter(|w| *w == b"--FRAME").count() < 3 {
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "stream ended early");
        received.extend_from_slice(&chunk[..n]);
    }
    let text = String::from_utf8_lossy(&received);
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("content-type: multipart/x-mixed-replace; boundary=FRAME"));
    assert!(text.contains("Content-Type: image/jpeg"));

    assert_eq!(harness.jpeg.subscriber_count(), 1);
    drop(stream);

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while harness.jpeg.subscriber_count() > 0 {
        assert!(
            std::time::Instant::now() < deadline,
            "stream handler kept its queue after the client left"
        );
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn stalled_stream_client_is_dropped() {
    let harness = Harness::start(|config| config.write_timeout_ms = 200);

    let mut stream = TcpStream::connect(harness.addr()).unwrap();
    stream.write_all(b"GET /stream HTTP/1.1\r\n\r\n").unwrap();

    // Large parts fill both socket buffers while the client reads nothing.
    let jpeg = harness.jpeg.clone();
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let publisher = thread::spawn(move || {
        let mut sequence = 0;
        while !flag.load(Ordering::Relaxed) {
            let mut data = vec![0xFF, 0xD8];
            data.resize(256 * 1024, 0x55);
            data.extend_from_slice(&[0xFF, 0xD9]);
            jpeg.publish(spyglass::types::FrameSample::new(data, sequence, true, sequence));
            sequence += 1;
            thread::sleep(Duration::from_millis(2));
        }
    });

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while harness.jpeg.subscriber_count() == 0 {
        assert!(std::time::Instant::now() < deadline, "stream never subscribed");
        thread::sleep(Duration::from_millis(5));
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(20);
    while harness.jpeg.subscriber_count() > 0 {
        assert!(
            std::time::Instant::now() < deadline,
            "stalled client kept its queue"
        );
        thread::sleep(Duration::from_millis(20));
    }

    stop.store(true, Ordering::Relaxed);
    publisher.join().unwrap();
    drop(stream);
}

#[test]
fn shutdown_ends_open_streams() {
    let mut harness = Harness::start(|_| {});
    let _feeder = harness.feed_frames();

    let mut stream = TcpStream::connect(harness.addr()).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(b"GET /stream HTTP/1.1\r\n\r\n").unwrap();
    let mut first = [0u8; 64];
    assert!(stream.read(&mut first).unwrap() > 0);

    harness.server.shutdown();

    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).unwrap();
    assert!(harness.server.shutdown_handle().is_shutdown());
}

#[test]
fn controls_listing_is_json() {
    let harness = Harness::start(|_| {});
    let reply = request(harness.addr(), "GET", "/controls", &[], "");
    assert_eq!(reply.status, 200);
    assert_eq!(reply.header("Content-Type"), Some("application/json"));
    let value: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
    assert!(value.is_object());
}
