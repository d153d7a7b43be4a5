//! Protocol demultiplexing
//!
//! Maps the ALPN token negotiated during the handshake onto the handler that
//! serves the connection. The mapping is pure; nothing is retried.

use std::fmt;

/// ALPN token for HTTP/2
pub const ALPN_H2: &[u8] = b"h2";

/// ALPN token for HTTP/1.1
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

/// Application protocol served on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http11,
    H2,
}

impl Protocol {
    /// Select the protocol for a negotiated ALPN token
    ///
    /// `None` means the client sent no ALPN extension at all, which selects
    /// `fallback`.
    pub fn from_alpn(
        token: Option<&[u8]>,
        fallback: Protocol,
    ) -> Result<Protocol, UnsupportedProtocolError> {
        match token {
            None => Ok(fallback),
            Some(ALPN_H2) => Ok(Protocol::H2),
            Some(ALPN_HTTP11) => Ok(Protocol::Http11),
            Some(other) => Err(UnsupportedProtocolError {
                token: other.to_vec(),
            }),
        }
    }

    /// The protocol's ALPN token
    pub fn alpn(&self) -> &'static [u8] {
        match self {
            Protocol::Http11 => ALPN_HTTP11,
            Protocol::H2 => ALPN_H2,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Http11 => "http/1.1",
            Protocol::H2 => "h2",
        })
    }
}

/// The negotiated token names no protocol this server speaks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported application protocol {:?}", String::from_utf8_lossy(.token))]
pub struct UnsupportedProtocolError {
    pub token: Vec<u8>,
}
