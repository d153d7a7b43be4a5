//! HTTP/1.1 connection handler
//!
//! Serves one keep-alive connection: parse a request, run the handler on the
//! worker pool, write the response, repeat. Pipelined requests are answered
//! in order. Malformed input gets a 400 and an oversized body a 413, both
//! followed by close.

use super::{
    Error, HttpRequest, HttpResponse, HttpSession, Method, RequestParser, Result, SessionOps,
    Status, Version,
};
use crate::server::dispatch::{
    completion_channel, finalize, CancelToken, CompletionReceiver, CompletionSender, Dispatcher,
};
use std::time::Duration;

const READ_BUF_SIZE: usize = 8192;

/// HTTP/1.1 server side of one connection
pub struct HttpServer<S: SessionOps> {
    session: HttpSession<S>,
    parser: RequestParser,
    dispatcher: Dispatcher,
    completion_tx: CompletionSender,
    completions: CompletionReceiver,
}

impl<S: SessionOps> HttpServer<S> {
    /// Wrap a session; the default idle timeout is 30 seconds
    pub fn new(session: S, dispatcher: Dispatcher) -> Result<Self> {
        let (completion_tx, completions) = completion_channel()?;
        let mut session = HttpSession::new(session);
        session.set_timeout(Some(Duration::from_secs(30)));

        Ok(HttpServer {
            session,
            parser: RequestParser::new(),
            dispatcher,
            completion_tx,
            completions,
        })
    }

    /// How long to wait for the next request before closing
    pub fn set_idle_timeout(&mut self, timeout: Duration) {
        self.session.set_timeout(Some(timeout));
    }

    /// Reject request bodies over `max` bytes with 413
    pub fn set_max_body(&mut self, max: usize) {
        self.parser = RequestParser::with_max_body(max);
    }

    /// Serve requests until the peer closes, asks to close, or misbehaves
    pub fn serve(mut self) -> Result<()> {
        let result = self.serve_requests();
        let _ = self.session.close();
        result
    }

    fn serve_requests(&mut self) -> Result<()> {
        loop {
            let request = match self.receive_request() {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(()),
                Err(Error::BodyTooLarge(limit)) => {
                    tracing::warn!(limit, "request body too large");
                    return self.send_error(Status::PAYLOAD_TOO_LARGE);
                }
                Err(e) if e.is_malformed() => {
                    tracing::debug!(error = %e, "malformed request");
                    return self.send_error(Status::BAD_REQUEST);
                }
                Err(e) => return Err(e),
            };

            let keep_alive = request.keep_alive();
            let version = request.version();
            let head = request.method() == Method::Head;
            tracing::debug!(method = %request.method(), path = request.path(), "request");

            let mut response = self.run_handler(request);
            response.set_version(version);
            if !keep_alive {
                response.headers_mut().set("connection", "close");
            } else if version == Version::Http10 {
                response.headers_mut().set("connection", "keep-alive");
            }

            let mut wire = response.to_wire();
            if head {
                wire.truncate(wire.len() - response.body().len());
            }
            self.session.write_all(&wire)?;

            if !keep_alive {
                return Ok(());
            }
        }
    }

    /// Next complete request; `None` when the peer closed or went quiet
    /// between requests
    fn receive_request(&mut self) -> Result<Option<HttpRequest>> {
        if let Some(request) = self.parser.parse(&[])? {
            return Ok(Some(request));
        }

        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            let n = match self.session.read(&mut buf) {
                Ok(n) => n,
                Err(Error::Timeout) if !self.parser.has_partial() => {
                    tracing::debug!("idle timeout");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            };
            if n == 0 {
                if self.parser.has_partial() {
                    return Err(Error::ConnectionClosed);
                }
                return Ok(None);
            }

            if let Some(request) = self.parser.parse(&buf[..n])? {
                return Ok(Some(request));
            }
        }
    }

    /// Run the handler on the worker pool and wait for its response
    fn run_handler(&mut self, request: HttpRequest) -> HttpResponse {
        let cancel = CancelToken::new();
        if self
            .dispatcher
            .dispatch(0, request, cancel, self.completion_tx.clone())
            .is_err()
        {
            return finalize(HttpResponse::new(Status::SERVICE_UNAVAILABLE));
        }

        match self.completions.recv() {
            Some(completion) => completion.response,
            None => finalize(HttpResponse::new(Status::INTERNAL_SERVER_ERROR)),
        }
    }

    fn send_error(&mut self, status: Status) -> Result<()> {
        let response = HttpResponse::builder()
            .status(status)
            .header("content-type", "text/plain")
            .header("connection", "close")
            .body(status.reason_phrase().as_bytes().to_vec())
            .build();
        self.session.write_all(&finalize(response).to_wire())
    }
}
