//! TLS server with ALPN demultiplexing
//!
//! The accept thread hands each socket to a connection thread, which runs
//! the TLS handshake, selects the protocol from the negotiated ALPN token
//! and serves the connection with the HTTP/1.1 handler or the HTTP/2
//! connection manager. Handlers run on a shared worker pool.
//!
//! # Example
//!
//! ```no_run
//! use tlsmux::http::tls::TlsConfig;
//! use tlsmux::http::{HttpRequest, HttpResponse};
//! use tlsmux::server::dispatch::CancelToken;
//! use tlsmux::{Server, ServerConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tls = TlsConfig::server()
//!     .cert_file("server.pem")
//!     .alpn(&["h2", "http/1.1"])
//!     .build()?;
//! let config = ServerConfig::builder().bind("0.0.0.0:8443").tls(tls).build()?;
//!
//! let server = Server::bind(config, |_req: &HttpRequest, _cancel: &CancelToken| {
//!     HttpResponse::builder()
//!         .header("content-type", "application/json")
//!         .body(b"{\"ok\":true}".to_vec())
//!         .build()
//! })?;
//! server.run()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod demux;
pub mod dispatch;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use demux::{Protocol, UnsupportedProtocolError};
pub use dispatch::{CancelToken, Dispatcher, Handler, WorkerPool};

use crate::http::h2::H2ServerBuilder;
use crate::http::tls::{HandshakeError, TlsError, TlsTerminator};
use crate::http::HttpServer;
use crate::net::Listener;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Result type for server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Server errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Listener error: {0}")]
    Net(#[from] crate::net::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    UnsupportedProtocol(#[from] UnsupportedProtocolError),

    #[error("HTTP/1.1 error: {0}")]
    Http(#[from] crate::http::Error),

    #[error("HTTP/2 error: {0}")]
    Http2(#[from] crate::http::h2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A slot under the connection limit, released on drop
#[derive(Debug)]
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(ConnectionSlot {
            active: Arc::clone(active),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Pieces every connection thread shares
#[derive(Clone)]
struct Shared {
    config: Arc<ServerConfig>,
    terminator: Arc<TlsTerminator>,
    dispatcher: Dispatcher,
}

/// A bound server
pub struct Server {
    listener: Listener,
    shared: Shared,
    active: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    /// Bind the listener and start the worker pool
    pub fn bind(config: ServerConfig, handler: impl Handler) -> Result<Self> {
        let listener = Listener::bind(config.addr)?;
        let pool = Arc::new(WorkerPool::new(config.workers)?);
        let dispatcher = Dispatcher::new(Arc::new(handler), pool);
        let terminator = TlsTerminator::new(config.tls.clone(), config.handshake_timeout);

        tracing::info!(
            address = %listener.local_addr(),
            alpn = ?config.tls.alpn(),
            workers = config.workers,
            "server listening"
        );

        Ok(Server {
            listener,
            shared: Shared {
                config: Arc::new(config),
                terminator: Arc::new(terminator),
                dispatcher,
            },
            active: Arc::new(AtomicUsize::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Number of connections currently being served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Accept connections until shut down
    pub fn run(&self) -> Result<()> {
        while !self.shutdown.load(Ordering::Acquire) {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    // e.g. out of descriptors; do not spin
                    thread::sleep(Duration::from_millis(10));
                    continue;
                }
            };
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.spawn_connection(stream, peer);
        }
        tracing::info!("server stopped accepting");
        Ok(())
    }

    /// Run the accept loop on its own thread
    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr();
        let shutdown = Arc::clone(&self.shutdown);
        let thread = thread::Builder::new()
            .name("tlsmux-accept".to_string())
            .spawn(move || self.run())?;

        Ok(ServerHandle {
            local_addr,
            shutdown,
            thread: Some(thread),
        })
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let max = self.shared.config.max_connections;
        let Some(slot) = ConnectionSlot::acquire(&self.active, max) else {
            tracing::warn!(peer = %peer, max, "connection limit reached, closing");
            return;
        };

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("tlsmux-conn".to_string())
            .spawn(move || {
                let _slot = slot;
                let span = tracing::info_span!("connection", peer = %peer);
                let _enter = span.enter();
                match serve_connection(&shared, stream) {
                    Ok(()) => tracing::debug!("connection closed"),
                    Err(Error::Handshake(e)) => tracing::debug!(error = %e, "handshake failed"),
                    Err(e) => tracing::warn!(error = %e, "connection failed"),
                }
            });
        if let Err(e) = spawned {
            tracing::error!(peer = %peer, error = %e, "failed to spawn connection thread");
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("config", &self.shared.config)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

/// Handshake, pick the protocol, serve
fn serve_connection(shared: &Shared, stream: TcpStream) -> Result<()> {
    let config = &shared.config;
    let connection = shared.terminator.accept(stream)?;
    let protocol = Protocol::from_alpn(connection.protocol(), config.fallback_protocol)?;
    tracing::debug!(protocol = %protocol, "serving connection");

    let session = connection.into_session();
    match protocol {
        Protocol::H2 => {
            H2ServerBuilder::new()
                .settings(config.h2_settings.clone())
                .idle_timeout(config.idle_timeout)
                .max_request_body(config.max_request_body)
                .build(session, shared.dispatcher.clone())?
                .serve()?;
        }
        Protocol::Http11 => {
            let mut server = HttpServer::new(session, shared.dispatcher.clone())?;
            server.set_idle_timeout(config.idle_timeout);
            server.set_max_body(config.max_request_body);
            server.serve()?;
        }
    }
    Ok(())
}

/// Handle to a server running on its own thread
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for the accept thread
    ///
    /// Connections already being served run to completion.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        self.shutdown.store(true, Ordering::Release);

        // wake the blocking accept
        let mut wake_addr = self.local_addr;
        if wake_addr.ip().is_unspecified() {
            wake_addr.set_ip(match wake_addr {
                SocketAddr::V4(_) => [127, 0, 0, 1].into(),
                SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
            });
        }
        let _ = TcpStream::connect_timeout(&wake_addr, Duration::from_secs(1));

        match thread.join() {
            Ok(result) => result,
            Err(_) => Err(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "accept thread panicked",
            ))),
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "server shutdown failed");
        }
    }
}
