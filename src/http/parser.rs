//! HTTP/1.x message parsing
//!
//! Both parsers are incremental and keep any bytes that follow a complete
//! message, so pipelined requests on a keep-alive connection are not lost.

use super::chunked::ChunkedDecoder;
use super::{Error, Headers, HttpRequest, HttpResponse, Method, Result, Status, Version};

/// Largest request/status line plus header section accepted
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Default body limit for parsers built with `new()`
pub const DEFAULT_MAX_BODY: usize = 1024 * 1024;

/// Parse HTTP request line
///
/// Format: METHOD URI VERSION\r\n
/// Example: GET /index.html HTTP/1.1\r\n
pub fn parse_request_line(line: &str) -> Result<(Method, String, Version)> {
    let parts: Vec<&str> = line.split(' ').collect();

    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(Error::Parse(format!("Invalid request line: {:?}", line)));
    }

    let method = parts[0].parse::<Method>()?;
    let uri = parts[1].to_string();
    let version = parts[2].parse::<Version>()?;

    Ok((method, uri, version))
}

/// Parse HTTP response status line
///
/// Format: VERSION STATUS REASON\r\n
/// Example: HTTP/1.1 200 OK\r\n
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let parts: Vec<&str> = line.splitn(3, ' ').collect();

    if parts.len() < 2 {
        return Err(Error::Parse(format!(
            "Invalid status line: expected at least 2 parts, got {}",
            parts.len()
        )));
    }

    let version = parts[0].parse::<Version>()?;
    let status_code = parts[1]
        .parse::<u16>()
        .map_err(|_| Error::Parse(format!("Invalid status code: {}", parts[1])))?;
    let status = Status::new(status_code)?;
    let reason = match parts.get(2) {
        Some(reason) => reason.to_string(),
        None => status.reason_phrase().to_string(),
    };

    Ok((version, status, reason))
}

/// Split the start line and header section off the front of `buf`
///
/// Returns `None` until the terminating empty line has arrived.
fn take_head(buf: &mut Vec<u8>) -> Result<Option<(String, Headers)>> {
    let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        if buf.len() > MAX_HEAD_SIZE {
            return Err(Error::Parse("header section too large".to_string()));
        }
        return Ok(None);
    };

    let head: Vec<u8> = buf.drain(..end + 4).collect();
    let head = std::str::from_utf8(&head[..end + 2])
        .map_err(|_| Error::Parse("non-UTF-8 header section".to_string()))?;

    let mut lines = head.split("\r\n");
    let start = lines.next().unwrap_or_default().to_string();
    let mut headers = Headers::new();
    for line in lines.filter(|l| !l.is_empty()) {
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(Error::InvalidHeader("obsolete line folding".to_string()));
        }
        let (name, value) = Headers::parse_header_line(line)?;
        headers.try_insert(name, value)?;
    }

    Ok(Some((start, headers)))
}

/// How the body of the message being parsed is delimited
#[derive(Debug)]
enum BodyKind {
    Length(usize),
    Chunked(ChunkedDecoder),
}

fn body_kind(headers: &Headers, max_body: usize) -> Result<BodyKind> {
    if let Some(te) = headers.get("Transfer-Encoding") {
        if !te.trim().eq_ignore_ascii_case("chunked") {
            return Err(Error::Protocol(format!("Unsupported Transfer-Encoding: {}", te)));
        }
        if headers.contains("Content-Length") {
            return Err(Error::Protocol(
                "Both Transfer-Encoding and Content-Length present".to_string(),
            ));
        }
        return Ok(BodyKind::Chunked(ChunkedDecoder::new(max_body)));
    }

    let lengths = headers.get_all("Content-Length");
    let Some(first) = lengths.first() else {
        return Ok(BodyKind::Length(0));
    };
    if lengths.iter().any(|l| l != first) {
        return Err(Error::InvalidHeader("Conflicting Content-Length".to_string()));
    }
    let length = first
        .trim()
        .parse::<usize>()
        .map_err(|_| Error::InvalidHeader(format!("Invalid Content-Length: {}", first)))?;
    if length > max_body {
        return Err(Error::BodyTooLarge(max_body));
    }
    Ok(BodyKind::Length(length))
}

/// Move body bytes described by `kind` from `buffer` into `body`
///
/// Returns `true` once the body is complete.
fn take_body(kind: &mut BodyKind, buffer: &mut Vec<u8>, body: &mut Vec<u8>) -> Result<bool> {
    match kind {
        BodyKind::Length(length) => {
            if buffer.len() < *length {
                return Ok(false);
            }
            body.extend(buffer.drain(..*length));
            Ok(true)
        }
        BodyKind::Chunked(decoder) => {
            let (consumed, complete) = decoder.decode(buffer, body)?;
            buffer.drain(..consumed);
            Ok(complete)
        }
    }
}

/// Incremental HTTP/1.x request parser
pub struct RequestParser {
    buffer: Vec<u8>,
    max_body: usize,
    pending: Option<PendingRequest>,
}

struct PendingRequest {
    method: Method,
    uri: String,
    version: Version,
    headers: Headers,
    kind: BodyKind,
    body: Vec<u8>,
}

impl RequestParser {
    /// Create a request parser with the default body limit
    pub fn new() -> Self {
        Self::with_max_body(DEFAULT_MAX_BODY)
    }

    /// Create a request parser that rejects bodies over `max_body` bytes
    pub fn with_max_body(max_body: usize) -> Self {
        RequestParser {
            buffer: Vec::new(),
            max_body,
            pending: None,
        }
    }

    /// Feed data to the parser
    ///
    /// Returns Ok(Some(request)) when a complete request is parsed,
    /// Ok(None) if more data is needed, or Err on parse error. Call with an
    /// empty slice to pull further requests that are already buffered.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<HttpRequest>> {
        self.buffer.extend_from_slice(data);

        if self.pending.is_none() {
            // Tolerate stray CRLFs between pipelined requests (RFC 7230 3.5)
            while self.buffer.starts_with(b"\r\n") {
                self.buffer.drain(..2);
            }
            let Some((line, headers)) = take_head(&mut self.buffer)? else {
                return Ok(None);
            };
            let (method, uri, version) = parse_request_line(&line)?;
            let kind = body_kind(&headers, self.max_body)?;
            self.pending = Some(PendingRequest {
                method,
                uri,
                version,
                headers,
                kind,
                body: Vec::new(),
            });
        }

        let Some(pending) = self.pending.as_mut() else {
            return Ok(None);
        };
        if !take_body(&mut pending.kind, &mut self.buffer, &mut pending.body)? {
            return Ok(None);
        }

        let Some(pending) = self.pending.take() else {
            return Ok(None);
        };
        let mut request = HttpRequest::builder()
            .method(pending.method)
            .uri(pending.uri)
            .version(pending.version)
            .body(pending.body)
            .build();
        *request.headers_mut() = pending.headers;
        Ok(Some(request))
    }

    /// Whether bytes of a partial request are buffered
    pub fn has_partial(&self) -> bool {
        self.pending.is_some() || !self.buffer.is_empty()
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental HTTP/1.x response parser
pub struct ResponseParser {
    buffer: Vec<u8>,
    max_body: usize,
    pending: Option<PendingResponse>,
}

struct PendingResponse {
    version: Version,
    status: Status,
    reason: String,
    headers: Headers,
    kind: BodyKind,
    body: Vec<u8>,
}

impl ResponseParser {
    /// Create a new response parser
    pub fn new() -> Self {
        ResponseParser {
            buffer: Vec::new(),
            max_body: usize::MAX,
            pending: None,
        }
    }

    /// Feed data to the parser
    ///
    /// Returns Ok(Some(response)) when a complete response is parsed,
    /// Ok(None) if more data is needed, or Err on parse error.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<HttpResponse>> {
        self.buffer.extend_from_slice(data);

        if self.pending.is_none() {
            let Some((line, headers)) = take_head(&mut self.buffer)? else {
                return Ok(None);
            };
            let (version, status, reason) = parse_status_line(&line)?;
            let kind = match status.code() {
                // No body regardless of framing headers (RFC 7230 3.3.3)
                100..=199 | 204 | 304 => BodyKind::Length(0),
                _ => body_kind(&headers, self.max_body)?,
            };
            self.pending = Some(PendingResponse {
                version,
                status,
                reason,
                headers,
                kind,
                body: Vec::new(),
            });
        }

        let Some(pending) = self.pending.as_mut() else {
            return Ok(None);
        };
        if !take_body(&mut pending.kind, &mut self.buffer, &mut pending.body)? {
            return Ok(None);
        }

        let Some(pending) = self.pending.take() else {
            return Ok(None);
        };
        let mut response = HttpResponse::builder()
            .version(pending.version)
            .status(pending.status)
            .reason(pending.reason)
            .body(pending.body)
            .build();
        *response.headers_mut() = pending.headers;
        Ok(Some(response))
    }

    /// Reset the parser for reuse
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending = None;
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}
