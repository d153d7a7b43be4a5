//! Server configuration

use super::demux::Protocol;
use super::Error;
use crate::http::h2::{Settings, SettingsBuilder};
use crate::http::tls::{TlsConfig, DEFAULT_HANDSHAKE_TIMEOUT};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Default idle timeout
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of handler threads
pub const DEFAULT_WORKERS: usize = 8;

/// Default connection limit
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Default request body limit (1 MiB)
pub const DEFAULT_MAX_REQUEST_BODY: usize = 1024 * 1024;

/// Everything a [`Server`](super::Server) needs, fixed at startup
#[derive(Clone)]
pub struct ServerConfig {
    pub(crate) addr: SocketAddr,
    pub(crate) tls: TlsConfig,
    pub(crate) handshake_timeout: Duration,
    pub(crate) idle_timeout: Duration,
    pub(crate) workers: usize,
    pub(crate) max_connections: usize,
    pub(crate) max_request_body: usize,
    pub(crate) fallback_protocol: Protocol,
    pub(crate) h2_settings: Settings,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn tls(&self) -> &TlsConfig {
        &self.tls
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn max_request_body(&self) -> usize {
        self.max_request_body
    }

    /// Protocol assumed when the client sent no ALPN extension
    pub fn fallback_protocol(&self) -> Protocol {
        self.fallback_protocol
    }

    /// Settings advertised on every HTTP/2 connection
    pub fn h2_settings(&self) -> &Settings {
        &self.h2_settings
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("addr", &self.addr)
            .field("alpn", &self.tls.alpn())
            .field("handshake_timeout", &self.handshake_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("workers", &self.workers)
            .field("max_connections", &self.max_connections)
            .field("max_request_body", &self.max_request_body)
            .field("fallback_protocol", &self.fallback_protocol)
            .field("h2_settings", &self.h2_settings)
            .finish()
    }
}

/// Builder for [`ServerConfig`]
#[derive(Default)]
pub struct ServerConfigBuilder {
    addr: Option<String>,
    tls: Option<TlsConfig>,
    handshake_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    workers: Option<usize>,
    max_connections: Option<usize>,
    max_request_body: Option<usize>,
    fallback_protocol: Option<Protocol>,
    h2_settings: Option<Settings>,
}

impl ServerConfigBuilder {
    /// Address to listen on, e.g. `127.0.0.1:8443` (port 0 picks one)
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// TLS configuration; must be a server config
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Number of handler threads
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn max_request_body(mut self, max: usize) -> Self {
        self.max_request_body = Some(max);
        self
    }

    pub fn fallback_protocol(mut self, protocol: Protocol) -> Self {
        self.fallback_protocol = Some(protocol);
        self
    }

    /// HTTP/2 settings to advertise
    pub fn h2_settings(mut self, settings: Settings) -> Self {
        self.h2_settings = Some(settings);
        self
    }

    pub fn build(self) -> Result<ServerConfig, Error> {
        let addr = self
            .addr
            .ok_or_else(|| Error::Config("bind address is required".to_string()))?;
        let addr = addr
            .to_socket_addrs()
            .map_err(|e| Error::Config(format!("invalid bind address {:?}: {}", addr, e)))?
            .next()
            .ok_or_else(|| Error::Config(format!("bind address {:?} resolved to nothing", addr)))?;

        let tls = self
            .tls
            .ok_or_else(|| Error::Config("TLS configuration is required".to_string()))?;
        if !tls.is_server() {
            return Err(Error::Config("TLS configuration is not a server config".to_string()));
        }

        let workers = self.workers.unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(Error::Config("at least one worker is required".to_string()));
        }
        let max_connections = self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS);
        if max_connections == 0 {
            return Err(Error::Config("max_connections must be positive".to_string()));
        }

        let h2_settings = match self.h2_settings {
            Some(settings) => {
                settings.validate()?;
                settings
            }
            None => SettingsBuilder::new().build()?,
        };

        Ok(ServerConfig {
            addr,
            tls,
            handshake_timeout: self.handshake_timeout.unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
            idle_timeout: self.idle_timeout.unwrap_or(DEFAULT_IDLE_TIMEOUT),
            workers,
            max_connections,
            max_request_body: self.max_request_body.unwrap_or(DEFAULT_MAX_REQUEST_BODY),
            fallback_protocol: self.fallback_protocol.unwrap_or(Protocol::Http11),
            h2_settings,
        })
    }
}
