//! TLS termination
//!
//! # Architecture
//!
//! The TLS layer plugs into the session operations abstraction:
//!
//! 1. `TlsConfig` holds an explicit, immutable OpenSSL context (versions,
//!    ciphers, certificate, ALPN list). There is no global TLS state.
//! 2. `TlsTerminator` runs the server handshake under a timeout and yields a
//!    `Connection` tagged with the negotiated ALPN token.
//! 3. `TlsSessionOps` implements `SessionOps`, so the HTTP code above is
//!    unchanged whether bytes are encrypted or not.
//!
//! # Examples
//!
//! ```no_run
//! use tlsmux::http::tls::{TlsConfig, TlsTerminator, TlsVersion};
//! use std::net::TcpListener;
//! use std::time::Duration;
//!
//! let tls_config = TlsConfig::server()
//!     .cert_file("server.pem")
//!     .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
//!     .alpn(&["h2", "http/1.1"])
//!     .build()
//!     .unwrap();
//! let terminator = TlsTerminator::new(tls_config, Duration::from_secs(10));
//!
//! let listener = TcpListener::bind("127.0.0.1:8443").unwrap();
//! let (tcp_stream, _) = listener.accept().unwrap();
//! let conn = terminator.accept(tcp_stream).unwrap();
//! println!("negotiated {:?}", conn.protocol());
//! ```

pub mod cert;
pub mod config;
pub mod handshake;
pub mod session;
pub mod vars;

pub use cert::{CertInfo, SelfSigned};
pub use config::{
    ClientConfigBuilder, ServerConfigBuilder, TlsConfig, TlsError, TlsVersion, DEFAULT_ALPN,
};
pub use handshake::{Connection, HandshakeError, TlsTerminator, DEFAULT_HANDSHAKE_TIMEOUT};
pub use session::TlsSessionOps;
pub use vars::TlsVars;

/// Result type for TLS configuration
pub type Result<T> = std::result::Result<T, TlsError>;
