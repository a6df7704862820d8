//! MJPEG stream and snapshot handlers.

use super::http::Response;
use crate::broadcast::{ConsumerQueue, FrameBroadcaster};
use crate::exif;
use bytes::Bytes;
use http::{header, StatusCode};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const BOUNDARY: &str = "FRAME";
const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=FRAME";

/// How often a waiting stream re-checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// The JPEG broadcaster plus per-frame decoration shared by both handlers.
#[derive(Debug, Clone)]
pub struct JpegSource {
    broadcaster: Arc<FrameBroadcaster>,
    exif_header: Option<Bytes>,
    snapshot_timeout: Duration,
}

impl JpegSource {
    pub fn new(broadcaster: Arc<FrameBroadcaster>, orientation: u8, snapshot_timeout: Duration) -> Self {
        Self {
            broadcaster,
            exif_header: exif::orientation_header(orientation),
            snapshot_timeout,
        }
    }

    pub fn broadcaster(&self) -> &Arc<FrameBroadcaster> {
        &self.broadcaster
    }

    fn decorate(&self, jpeg: &Bytes) -> Bytes {
        match &self.exif_header {
            Some(header) => exif::splice_after_soi(jpeg, header),
            None => jpeg.clone(),
        }
    }

    /// Wait for the next frame and answer with it, or 503 on timeout.
    pub fn snapshot(&self) -> Response {
        let queue = self.broadcaster.subscribe_with_capacity(1);
        let result = queue.take_timeout(self.snapshot_timeout);
        self.broadcaster.unsubscribe(queue);

        match result {
            Ok(Some(frame)) => no_cache(Response::new(StatusCode::OK))
                .with_body("image/jpeg", self.decorate(&frame.data)),
            Ok(None) => Response::text(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("no frame within {:?}", self.snapshot_timeout),
            ),
            Err(e) => Response::text(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        }
    }

    /// Send multipart JPEG parts until the client goes away, the feed
    /// closes or `shutdown` is raised. Returns the number of frames sent.
    pub fn stream<W: Write>(&self, out: &mut W, shutdown: &AtomicBool) -> io::Result<u64> {
        let queue = self.broadcaster.subscribe();
        let result = self.pump(out, &queue, shutdown);
        self.broadcaster.unsubscribe(queue);
        result
    }

    fn pump<W: Write>(&self, out: &mut W, queue: &ConsumerQueue, shutdown: &AtomicBool) -> io::Result<u64> {
        no_cache(Response::new(StatusCode::OK))
            .with_header(header::AGE, "0")
            .with_header(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)
            .write_head_to(out)?;

        let mut sent = 0u64;
        while !shutdown.load(Ordering::Relaxed) {
            let frame = match queue.take_timeout(SHUTDOWN_POLL) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    log::debug!("MJPEG stream ending: {}", e);
                    break;
                }
            };
            let jpeg = self.decorate(&frame.data);
            write!(
                out,
                "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                BOUNDARY,
                jpeg.len()
            )?;
            out.write_all(&jpeg)?;
            out.write_all(b"\r\n")?;
            out.flush()?;
            sent += 1;
        }
        Ok(sent)
    }
}

fn no_cache(response: Response) -> Response {
    response
        .with_header(header::CACHE_CONTROL, "no-cache, private")
        .with_header(header::PRAGMA, "no-cache")
}
