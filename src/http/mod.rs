//! HTTP/1.1 and HTTP/2 over a shared session abstraction
//!
//! # Architecture
//!
//! The HTTP layer uses a session operations abstraction so that protocol
//! code never cares whether bytes move over plain TCP or TLS:
//!
//! - `SessionOps` trait defines operations (poll, read, write, close)
//! - `HttpSession` wraps a `SessionOps` and applies timeouts
//! - `tls::TlsSessionOps` is the production transport; `FdSessionOps`
//!   is used by plain-TCP tests
//!
//! `HttpRequest` and `HttpResponse` are protocol-agnostic: the HTTP/1.1
//! server and the HTTP/2 connection manager both produce and consume them.
//!
//! # Examples
//!
//! ```no_run
//! use tlsmux::http::{HttpClient, HttpRequest, Method};
//! use tlsmux::http::session::FdSessionOps;
//! use std::net::TcpStream;
//!
//! let stream = TcpStream::connect("127.0.0.1:8080").unwrap();
//! let mut client = HttpClient::new(FdSessionOps::new(stream));
//!
//! let request = HttpRequest::builder()
//!     .method(Method::Get)
//!     .uri("/api/test")
//!     .header("Host", "localhost")
//!     .build();
//! client.send_request(&request).unwrap();
//!
//! let response = client.receive_response().unwrap();
//! assert_eq!(response.status().code(), 200);
//! ```

pub mod chunked;
pub mod client;
pub mod h2;
pub mod headers;
pub mod message;
pub mod parser;
pub mod server;
pub mod session;
pub mod tls;

pub use client::HttpClient;
pub use headers::Headers;
pub use message::{HttpRequest, HttpResponse, Method, Status, Version};
pub use parser::{RequestParser, ResponseParser};
pub use server::HttpServer;
pub use session::{HttpSession, SessionOps};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Too many headers (limit {0})")]
    TooManyHeaders(usize),

    #[error("Body exceeds limit of {0} bytes")]
    BodyTooLarge(usize),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Whether the error came from malformed peer input (answered with 400)
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::Parse(_)
                | Error::InvalidVersion(_)
                | Error::InvalidMethod(_)
                | Error::InvalidHeader(_)
                | Error::InvalidChunkSize(_)
                | Error::TooManyHeaders(_)
                | Error::Protocol(_)
        )
    }
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 100;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
