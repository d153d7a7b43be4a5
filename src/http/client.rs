//! HTTP/1.1 client
//!
//! A keep-alive client: requests go out one at a time over the same
//! session and responses are parsed incrementally, so bytes of a following
//! response are never lost.

use super::{
    Error, HttpRequest, HttpResponse, HttpSession, Method, ResponseParser, Result, SessionOps,
};
use std::time::Duration;

/// HTTP/1.1 client
pub struct HttpClient<S: SessionOps> {
    session: HttpSession<S>,
    parser: ResponseParser,
}

impl<S: SessionOps> HttpClient<S> {
    /// Create a new HTTP client with a session
    pub fn new(session: S) -> Self {
        HttpClient {
            session: HttpSession::new(session),
            parser: ResponseParser::new(),
        }
    }

    /// Set the timeout for operations
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.session.set_timeout(Some(timeout));
    }

    /// Send an HTTP request
    pub fn send_request(&mut self, request: &HttpRequest) -> Result<()> {
        self.session.write_all(&request.to_wire())
    }

    /// Receive the next HTTP response
    ///
    /// The body is framed by the response headers, so this is not suitable
    /// for responses to HEAD.
    pub fn receive_response(&mut self) -> Result<HttpResponse> {
        if let Some(response) = self.parser.parse(&[])? {
            return Ok(response);
        }

        let mut buf = [0u8; 8192];
        loop {
            let n = self.session.read(&mut buf)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            if let Some(response) = self.parser.parse(&buf[..n])? {
                return Ok(response);
            }
        }
    }

    /// Send a request and wait for its response
    pub fn request(&mut self, request: &HttpRequest) -> Result<HttpResponse> {
        self.send_request(request)?;
        self.receive_response()
    }

    /// GET `path` from `host`
    pub fn get(&mut self, host: &str, path: &str) -> Result<HttpResponse> {
        let request = HttpRequest::builder()
            .method(Method::Get)
            .uri(path)
            .header("Host", host)
            .build();
        self.request(&request)
    }

    /// Close the connection
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }
}
