//! Requests and responses
//!
//! Both protocols share these types. HTTP/1.1 writes them with `to_wire`;
//! the HTTP/2 connection manager maps them to and from header blocks.

use super::{Error, Headers, Result, CRLF};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

const METHODS: [(Method, &str); 9] = [
    (Method::Get, "GET"),
    (Method::Head, "HEAD"),
    (Method::Post, "POST"),
    (Method::Put, "PUT"),
    (Method::Delete, "DELETE"),
    (Method::Connect, "CONNECT"),
    (Method::Options, "OPTIONS"),
    (Method::Trace, "TRACE"),
    (Method::Patch, "PATCH"),
];

impl Method {
    pub fn as_str(&self) -> &'static str {
        METHODS
            .iter()
            .find(|(m, _)| m == self)
            .map_or("GET", |(_, token)| *token)
    }
}

impl FromStr for Method {
    type Err = Error;

    /// Method tokens are case-sensitive
    fn from_str(s: &str) -> Result<Self> {
        METHODS
            .iter()
            .find(|(_, token)| *token == s)
            .map(|(m, _)| *m)
            .ok_or_else(|| Error::InvalidMethod(s.to_string()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol a message arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
    /// Assembled from an HTTP/2 stream; never parsed from text
    H2,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
            Version::H2 => "HTTP/2",
        }
    }

    /// Version written on an HTTP/1.x status or request line
    fn on_wire(self) -> Version {
        match self {
            Version::H2 => Version::Http11,
            v => v,
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response status code, 100 through 599
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    code: u16,
}

impl Status {
    pub const OK: Status = Status { code: 200 };
    pub const BAD_REQUEST: Status = Status { code: 400 };
    pub const NOT_FOUND: Status = Status { code: 404 };
    pub const METHOD_NOT_ALLOWED: Status = Status { code: 405 };
    pub const PAYLOAD_TOO_LARGE: Status = Status { code: 413 };
    pub const INTERNAL_SERVER_ERROR: Status = Status { code: 500 };
    pub const SERVICE_UNAVAILABLE: Status = Status { code: 503 };

    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::InvalidStatus(format!("Invalid status code: {}", code)))
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    /// Reason phrase for the codes this server produces
    ///
    /// Responses read off the wire keep whatever phrase the peer sent.
    pub fn reason_phrase(&self) -> &'static str {
        match self.code {
            200 => "OK",
            204 => "No Content",
            400 => "Bad Request",
            404 => "Not Found",
            405 => "Method Not Allowed",
            413 => "Payload Too Large",
            500 => "Internal Server Error",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}

/// Serialize a start line, the header section and the body
fn write_message(start_line: [&str; 3], headers: &Headers, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + body.len());
    buf.extend_from_slice(start_line.join(" ").as_bytes());
    buf.extend_from_slice(CRLF.as_bytes());
    for (name, value) in headers.iter() {
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());
    }
    buf.extend_from_slice(CRLF.as_bytes());
    buf.extend_from_slice(body);
    buf
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    uri: String,
    version: Version,
    headers: Headers,
    body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        HttpRequest {
            method,
            uri: uri.into(),
            version: Version::default(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn builder() -> HttpRequestBuilder {
        HttpRequestBuilder::default()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Request target as received (HTTP/2 `:path`)
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Request target without its query string
    pub fn path(&self) -> &str {
        match self.uri.split_once('?') {
            Some((path, _)) => path,
            None => &self.uri,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Whether the connection stays open after this exchange
    ///
    /// HTTP/1.0 needs an explicit `Connection: keep-alive`; later versions
    /// stay open unless told `close`.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::Http10 => self.headers.has_token("Connection", "keep-alive"),
            _ => !self.headers.has_token("Connection", "close"),
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// HTTP/1.x request text
    pub fn to_wire(&self) -> Vec<u8> {
        let line: [&str; 3] = [self.method.as_str(), &self.uri, self.version.on_wire().as_str()];
        write_message(line, &self.headers, &self.body)
    }
}

/// Request builder; `GET /` over HTTP/1.1 unless set otherwise
#[derive(Debug)]
pub struct HttpRequestBuilder {
    request: HttpRequest,
}

impl Default for HttpRequestBuilder {
    fn default() -> Self {
        HttpRequestBuilder {
            request: HttpRequest::new(Method::Get, "/"),
        }
    }
}

impl HttpRequestBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.request.method = method;
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.request.uri = uri.into();
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.request.version = version;
        self
    }

    /// Append a header; repeated names are kept in order
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.request.body = body;
        self
    }

    pub fn build(self) -> HttpRequest {
        self.request
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    version: Version,
    status: Status,
    reason: String,
    headers: Headers,
    body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: Status) -> Self {
        HttpResponse {
            version: Version::default(),
            status,
            reason: status.reason_phrase().to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn builder() -> HttpResponseBuilder {
        HttpResponseBuilder::default()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// HTTP/1.x response text; an HTTP/2 response renders as 1.1
    pub fn to_wire(&self) -> Vec<u8> {
        let code = self.status.code().to_string();
        let line: [&str; 3] = [self.version.on_wire().as_str(), &code, &self.reason];
        write_message(line, &self.headers, &self.body)
    }
}

/// Response builder; status defaults to 200 and the reason to its
/// canonical phrase
#[derive(Debug, Default)]
pub struct HttpResponseBuilder {
    version: Version,
    status: Option<Status>,
    reason: Option<String>,
    headers: Headers,
    body: Vec<u8>,
}

impl HttpResponseBuilder {
    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> HttpResponse {
        let status = self.status.unwrap_or(Status::OK);
        HttpResponse {
            version: self.version,
            status,
            reason: self
                .reason
                .unwrap_or_else(|| status.reason_phrase().to_string()),
            headers: self.headers,
            body: self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_tokens() {
        for (method, token) in METHODS {
            assert_eq!(token.parse::<Method>().unwrap(), method);
            assert_eq!(method.to_string(), token);
        }
        assert!("get".parse::<Method>().is_err());
        assert!("BREW".parse::<Method>().is_err());
    }

    #[test]
    fn test_version_from_str() {
        assert_eq!("HTTP/1.0".parse::<Version>().unwrap(), Version::Http10);
        assert_eq!("HTTP/1.1".parse::<Version>().unwrap(), Version::Http11);
        // h2 is only ever negotiated through ALPN
        assert!("HTTP/2.0".parse::<Version>().is_err());
        assert_eq!(Version::H2.as_str(), "HTTP/2");
    }

    #[test]
    fn test_request_path_and_keep_alive() {
        let req = HttpRequest::builder().uri("/api/test?x=1").build();
        assert_eq!(req.path(), "/api/test");
        assert_eq!(req.uri(), "/api/test?x=1");
        assert!(req.keep_alive());

        let req = HttpRequest::builder()
            .header("Connection", "close")
            .build();
        assert!(!req.keep_alive());

        let req = HttpRequest::builder().version(Version::Http10).build();
        assert!(!req.keep_alive());

        let req = HttpRequest::builder()
            .version(Version::Http10)
            .header("Connection", "Keep-Alive")
            .build();
        assert!(req.keep_alive());
    }

    #[test]
    fn test_status_range() {
        assert_eq!(Status::new(413).unwrap(), Status::PAYLOAD_TOO_LARGE);
        assert!(Status::new(99).is_err());
        assert!(Status::new(600).is_err());
        assert_eq!(Status::new(418).unwrap().reason_phrase(), "Unknown");
        assert_eq!(Status::METHOD_NOT_ALLOWED.to_string(), "405 Method Not Allowed");
    }

    #[test]
    fn test_request_defaults() {
        let req = HttpRequest::builder().build();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.uri(), "/");
        assert_eq!(req.version(), Version::Http11);

        let req = HttpRequest::builder()
            .method(Method::Post)
            .uri("/echo")
            .header("Content-Type", "text/plain")
            .body(b"Hello".to_vec())
            .build();
        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.body(), b"Hello");
        assert_eq!(req.headers().get("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_request_to_wire() {
        let req = HttpRequest::builder()
            .uri("/api/test")
            .header("Host", "localhost")
            .build();

        let wire = String::from_utf8(req.to_wire()).unwrap();
        assert_eq!(wire, "GET /api/test HTTP/1.1\r\nHost: localhost\r\n\r\n");
    }

    #[test]
    fn test_response_to_wire() {
        let resp = HttpResponse::builder()
            .header("Content-Length", "2")
            .body(b"ok".to_vec())
            .build();

        let wire = String::from_utf8(resp.to_wire()).unwrap();
        assert_eq!(wire, "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    }

    #[test]
    fn test_response_keeps_peer_reason() {
        let resp = HttpResponse::builder()
            .status(Status::new(404).unwrap())
            .reason("Nope")
            .build();
        assert_eq!(resp.reason(), "Nope");
        assert!(resp.to_wire().starts_with(b"HTTP/1.1 404 Nope\r\n"));
    }

    #[test]
    fn test_h2_response_renders_as_http11() {
        let mut resp = HttpResponse::new(Status::NOT_FOUND);
        resp.set_version(Version::H2);
        let wire = String::from_utf8(resp.to_wire()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }
}
