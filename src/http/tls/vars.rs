//! Negotiated TLS parameters
//!
//! Captured once after the handshake for logging and for tests that assert
//! on what was negotiated.

use super::cert::CertInfo;
use openssl::ssl::{NameType, SslRef};

/// TLS variables available after handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsVars {
    /// Negotiated TLS version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI servername sent by the client
    pub servername: Option<String>,

    /// Negotiated ALPN protocol
    pub alpn: Option<String>,

    /// Peer certificate, when one was presented
    pub peer_cert: Option<CertInfo>,

    /// Whether the session was resumed
    pub sess_reused: bool,
}

impl TlsVars {
    /// Create TLS variables from an SSL connection
    pub fn from_ssl(ssl: &SslRef) -> Self {
        TlsVars {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_default(),
            servername: ssl.servername(NameType::HOST_NAME).map(str::to_string),
            alpn: ssl
                .selected_alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            peer_cert: ssl.peer_certificate().map(|c| CertInfo::from_x509(&c)),
            sess_reused: ssl.session_reused(),
        }
    }
}
