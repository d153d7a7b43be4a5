//! TLS termination
//!
//! [`TlsTerminator`] turns an accepted TCP socket into a [`Connection`]:
//! it runs the server handshake under a deadline, records the negotiated
//! ALPN token and classifies failures into [`HandshakeError`].

use super::config::TlsConfig;
use super::session::TlsSessionOps;
use openssl::ssl::{self, ErrorCode, Ssl, SslStream};
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Default handshake timeout
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a TLS handshake failed
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("bad certificate: {0}")]
    BadCertificate(String),

    #[error("no shared cipher: {0}")]
    UnsupportedCipher(String),

    #[error("protocol version mismatch: {0}")]
    VersionMismatch(String),

    #[error("no application protocol in common")]
    NoApplicationProtocol,

    #[error("peer aborted the handshake")]
    ClientAbort,

    #[error("handshake timed out")]
    Timeout,

    #[error("handshake failed: {0}")]
    Other(String),
}

impl From<io::Error> for HandshakeError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => HandshakeError::Timeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => HandshakeError::ClientAbort,
            _ => HandshakeError::Other(e.to_string()),
        }
    }
}

/// Map OpenSSL reason strings onto a failure class
fn classify_reason(reason: &str) -> Option<HandshakeError> {
    let lower = reason.to_ascii_lowercase();
    let owned = || reason.to_string();

    if lower.contains("no application protocol") {
        Some(HandshakeError::NoApplicationProtocol)
    } else if lower.contains("no shared cipher")
        || lower.contains("no cipher")
        || lower.contains("no suitable signature")
    {
        Some(HandshakeError::UnsupportedCipher(owned()))
    } else if lower.contains("version")
        || lower.contains("unsupported protocol")
        || lower.contains("inappropriate fallback")
    {
        Some(HandshakeError::VersionMismatch(owned()))
    } else if lower.contains("certificate") || lower.contains("unknown ca") {
        Some(HandshakeError::BadCertificate(owned()))
    } else if lower.contains("unexpected eof") {
        Some(HandshakeError::ClientAbort)
    } else {
        None
    }
}

fn classify_ssl_error(error: &ssl::Error) -> HandshakeError {
    if let Some(stack) = error.ssl_error() {
        for e in stack.errors() {
            if let Some(class) = e.reason().and_then(classify_reason) {
                return class;
            }
        }
        return HandshakeError::Other(stack.to_string());
    }

    if let Some(io_error) = error.io_error() {
        return HandshakeError::from(io::Error::new(io_error.kind(), io_error.to_string()));
    }

    let code = error.code();
    if code == ErrorCode::SYSCALL {
        // EOF in the middle of the handshake
        HandshakeError::ClientAbort
    } else if code == ErrorCode::WANT_READ || code == ErrorCode::WANT_WRITE {
        HandshakeError::Timeout
    } else {
        HandshakeError::Other(format!("{:?}", code))
    }
}

/// Classify a failed `Ssl::accept` / `Ssl::connect`
pub(crate) fn classify(error: ssl::HandshakeError<TcpStream>) -> HandshakeError {
    match error {
        ssl::HandshakeError::SetupFailure(stack) => HandshakeError::Other(stack.to_string()),
        // Blocking sockets only report WouldBlock when a socket timeout fired
        ssl::HandshakeError::WouldBlock(_) => HandshakeError::Timeout,
        ssl::HandshakeError::Failure(mid) => {
            let verify = mid.ssl().verify_result();
            if verify != openssl::x509::X509VerifyResult::OK {
                return HandshakeError::BadCertificate(verify.error_string().to_string());
            }
            classify_ssl_error(mid.error())
        }
    }
}

/// One accepted TLS connection
///
/// Owned by whichever protocol handler the negotiated ALPN token selects;
/// dropping it releases the TLS state and closes the socket.
pub struct Connection {
    session: TlsSessionOps,
    protocol: Option<Vec<u8>>,
    peer_addr: SocketAddr,
}

impl Connection {
    /// Negotiated ALPN token, `None` when the client sent no ALPN extension
    pub fn protocol(&self) -> Option<&[u8]> {
        self.protocol.as_deref()
    }

    /// Remote address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The TLS session
    pub fn session(&self) -> &TlsSessionOps {
        &self.session
    }

    /// The TLS session, mutably
    pub fn session_mut(&mut self) -> &mut TlsSessionOps {
        &mut self.session
    }

    /// Hand the session to a protocol handler
    pub fn into_session(self) -> TlsSessionOps {
        self.session
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field(
                "protocol",
                &self.protocol.as_deref().map(String::from_utf8_lossy),
            )
            .finish_non_exhaustive()
    }
}

/// Server-side TLS handshaker
#[derive(Debug, Clone)]
pub struct TlsTerminator {
    config: TlsConfig,
    handshake_timeout: Duration,
}

impl TlsTerminator {
    /// Create a terminator from a server-side configuration
    pub fn new(config: TlsConfig, handshake_timeout: Duration) -> Self {
        TlsTerminator {
            config,
            handshake_timeout,
        }
    }

    /// The TLS configuration in use
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }

    /// Run the server handshake on `stream`
    ///
    /// Each socket read and write during the handshake is bounded by the
    /// handshake timeout. On failure the socket is dropped, which closes it.
    pub fn accept(&self, stream: TcpStream) -> Result<Connection, HandshakeError> {
        if !self.config.is_server {
            return Err(HandshakeError::Other(
                "Cannot use client config for server accept".to_string(),
            ));
        }

        let peer_addr = stream.peer_addr()?;
        stream.set_read_timeout(Some(self.handshake_timeout))?;
        stream.set_write_timeout(Some(self.handshake_timeout))?;

        let ssl = Ssl::new(&self.config.ctx).map_err(|e| HandshakeError::Other(e.to_string()))?;
        let stream: SslStream<TcpStream> = ssl.accept(stream).map_err(classify)?;

        stream.get_ref().set_read_timeout(None)?;
        stream.get_ref().set_write_timeout(None)?;

        let protocol = stream.ssl().selected_alpn_protocol().map(<[u8]>::to_vec);
        let session = TlsSessionOps::from_stream(stream);
        let vars = session.vars();
        tracing::debug!(
            peer = %peer_addr,
            version = %vars.version,
            cipher = %vars.cipher,
            servername = ?vars.servername,
            protocol = ?vars.alpn,
            "TLS handshake complete"
        );

        Ok(Connection {
            session,
            protocol,
            peer_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_reason() {
        assert!(matches!(
            classify_reason("tlsv1 alert no application protocol"),
            Some(HandshakeError::NoApplicationProtocol)
        ));
        assert!(matches!(
            classify_reason("no shared cipher"),
            Some(HandshakeError::UnsupportedCipher(_))
        ));
        assert!(matches!(
            classify_reason("unsupported protocol"),
            Some(HandshakeError::VersionMismatch(_))
        ));
        assert!(matches!(
            classify_reason("tlsv1 alert protocol version"),
            Some(HandshakeError::VersionMismatch(_))
        ));
        assert!(matches!(
            classify_reason("certificate verify failed"),
            Some(HandshakeError::BadCertificate(_))
        ));
        assert!(matches!(
            classify_reason("tlsv1 alert unknown ca"),
            Some(HandshakeError::BadCertificate(_))
        ));
        assert!(matches!(
            classify_reason("unexpected eof while reading"),
            Some(HandshakeError::ClientAbort)
        ));
        assert!(classify_reason("bad record mac").is_none());
    }

    #[test]
    fn test_io_error_mapping() {
        let timeout = io::Error::from(io::ErrorKind::WouldBlock);
        assert!(matches!(HandshakeError::from(timeout), HandshakeError::Timeout));

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(matches!(HandshakeError::from(reset), HandshakeError::ClientAbort));
    }

    #[test]
    fn test_accept_rejects_client_config() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();

        let config = TlsConfig::client().build().unwrap();
        let terminator = TlsTerminator::new(config, DEFAULT_HANDSHAKE_TIMEOUT);
        assert!(matches!(
            terminator.accept(stream),
            Err(HandshakeError::Other(_))
        ));
    }
}
