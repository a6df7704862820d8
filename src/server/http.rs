//! HTTP/1.x request reader and response writer over blocking sockets.
//!
//! The request head is parsed by `httparse` into `http` types. One request
//! per connection: every response is sent with `Connection: close`.

use crate::errors::HttpError;
use bytes::Bytes;
use http::header::{self, AsHeaderName, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Version};
use std::io::{BufRead, Read, Write};

pub const MAX_HEADERS: usize = 100;
pub const MAX_LINE_LENGTH: usize = 8 * 1024;
pub const MAX_BODY_LENGTH: usize = 1024 * 1024;

pub const SERVER_NAME: &str = concat!("spyglass/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Request target exactly as sent, query string included.
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Request {
    /// Read one request head and its `Content-Length` body.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Self, HttpError> {
        let head = read_head(reader)?;

        let mut slots = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Request::new(&mut slots);
        match parsed.parse(&head) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => {
                return Err(HttpError::Malformed("incomplete request head".to_string()))
            }
            Err(httparse::Error::TooManyHeaders) => {
                return Err(HttpError::TooLarge(format!("more than {} headers", MAX_HEADERS)))
            }
            Err(e) => return Err(HttpError::Malformed(e.to_string())),
        }

        let (Some(method), Some(target), Some(minor)) = (parsed.method, parsed.path, parsed.version)
        else {
            return Err(HttpError::Malformed("incomplete request line".to_string()));
        };
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| HttpError::Malformed(format!("bad method {:?}", method)))?;
        let version = match minor {
            0 => Version::HTTP_10,
            _ => Version::HTTP_11,
        };

        let mut headers = HeaderMap::with_capacity(parsed.headers.len());
        for field in parsed.headers.iter() {
            let name = HeaderName::from_bytes(field.name.as_bytes())
                .map_err(|_| HttpError::Malformed(format!("bad header name {:?}", field.name)))?;
            let value = HeaderValue::from_bytes(field.value)
                .map_err(|_| HttpError::Malformed(format!("bad value for {}", name)))?;
            headers.append(name, value);
        }

        if headers
            .get(header::TRANSFER_ENCODING)
            .is_some_and(|value| !value.as_bytes().eq_ignore_ascii_case(b"identity"))
        {
            return Err(HttpError::Malformed(
                "chunked request bodies are not supported".to_string(),
            ));
        }

        let length = content_length(&headers)?;
        if length > MAX_BODY_LENGTH {
            return Err(HttpError::TooLarge(format!(
                "body of {} bytes exceeds {}",
                length, MAX_BODY_LENGTH
            )));
        }

        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => HttpError::ConnectionClosed,
            _ => HttpError::Io(e),
        })?;

        Ok(Request {
            method,
            target: target.to_string(),
            version,
            headers,
            body,
        })
    }

    /// First value of `name`, if it is visible ASCII.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn content_type(&self) -> &str {
        self.header(header::CONTENT_TYPE).unwrap_or("")
    }

    pub fn body_text(&self) -> Result<String, HttpError> {
        String::from_utf8(self.body.clone())
            .map_err(|_| HttpError::Malformed("body is not valid UTF-8".to_string()))
    }
}

/// Collect raw lines up to and including the blank line ending the head.
fn read_head<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, HttpError> {
    let mut head = Vec::new();
    // Request line, the header lines httparse has slots for, one spare to
    // let it report the overflow.
    for _ in 0..MAX_HEADERS + 2 {
        let start = head.len();
        let read = reader
            .by_ref()
            .take(MAX_LINE_LENGTH as u64 + 1)
            .read_until(b'\n', &mut head)?;
        if read == 0 {
            return Err(HttpError::ConnectionClosed);
        }
        let line = &head[start..];
        if line.last() != Some(&b'\n') {
            if line.len() > MAX_LINE_LENGTH {
                return Err(HttpError::TooLarge(format!(
                    "line longer than {} bytes",
                    MAX_LINE_LENGTH
                )));
            }
            return Err(HttpError::ConnectionClosed);
        }
        if line == b"\r\n" || line == b"\n" {
            return Ok(head);
        }
    }
    Err(HttpError::TooLarge(format!("more than {} headers", MAX_HEADERS)))
}

/// Declared body length. Only plain digits are accepted and repeated
/// fields must agree.
fn content_length(headers: &HeaderMap) -> Result<usize, HttpError> {
    let mut length = None;
    for value in headers.get_all(header::CONTENT_LENGTH) {
        let bytes = value.as_bytes();
        let parsed = std::str::from_utf8(bytes)
            .ok()
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse::<usize>().ok())
            .ok_or_else(|| {
                HttpError::Malformed(format!(
                    "bad Content-Length {:?}",
                    String::from_utf8_lossy(bytes)
                ))
            })?;
        match length {
            Some(previous) if previous != parsed => {
                return Err(HttpError::Malformed(format!(
                    "conflicting Content-Length {} and {}",
                    previous, parsed
                )))
            }
            _ => length = Some(parsed),
        }
    }
    Ok(length.unwrap_or(0))
}

/// A response with a known body length, or the head of a streamed one.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Plain-text response; the body defaults to the reason phrase.
    pub fn text(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let body = if message.is_empty() {
            status.canonical_reason().unwrap_or_default().to_string()
        } else {
            message
        };
        Self::new(status).with_body("text/plain; charset=utf-8", body)
    }

    /// Append a field. Values that cannot go on the wire are logged and left out.
    pub fn with_header(mut self, name: HeaderName, value: impl AsRef<str>) -> Self {
        match HeaderValue::from_str(value.as_ref()) {
            Ok(value) => {
                self.headers.append(name, value);
            }
            Err(_) => log::warn!("dropping {} header with invalid value {:?}", name, value.as_ref()),
        }
        self
    }

    pub fn with_body(self, content_type: &str, body: impl Into<Bytes>) -> Self {
        let mut response = self.with_header(header::CONTENT_TYPE, content_type);
        response.body = body.into();
        response
    }

    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let mut head = status_head(self.status, &self.headers);
        if self.status != StatusCode::NO_CONTENT {
            push_field(&mut head, &header::CONTENT_LENGTH, self.body.len().to_string().as_bytes());
        }
        head.extend_from_slice(b"\r\n");
        out.write_all(&head)?;
        if self.status != StatusCode::NO_CONTENT {
            out.write_all(&self.body)?;
        }
        out.flush()
    }

    /// Write only the status line and fields, for a body of unknown length
    /// that the caller streams until it closes the connection.
    pub fn write_head_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let mut head = status_head(self.status, &self.headers);
        head.extend_from_slice(b"\r\n");
        out.write_all(&head)?;
        out.flush()
    }
}

fn status_head(status: StatusCode, headers: &HeaderMap) -> Vec<u8> {
    let mut head = format!("HTTP/1.1 {}\r\n", status).into_bytes();
    push_field(&mut head, &header::DATE, http_date().as_bytes());
    push_field(&mut head, &header::SERVER, SERVER_NAME.as_bytes());
    push_field(&mut head, &header::CONNECTION, b"close");
    for (name, value) in headers {
        push_field(&mut head, name, value.as_bytes());
    }
    head
}

fn push_field(head: &mut Vec<u8>, name: &HeaderName, value: &[u8]) {
    head.extend_from_slice(name.as_str().as_bytes());
    head.extend_from_slice(b": ");
    head.extend_from_slice(value);
    head.extend_from_slice(b"\r\n");
}

/// IMF-fixdate, as used by the `Date` header.
pub fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
