//! HTTP/2 protocol implementation
//!
//! The server side is a connection manager: [`H2Server`] owns one
//! connection, multiplexes its streams and hands finished requests to the
//! worker pool. [`H2Client`] is the matching synchronous client, used by the
//! integration tests and the benchmarks.
//!
//! # Architecture
//!
//! - [`codec`]: frame reading, decoding and encoding
//! - [`hpack`]: header compression, one encoder and decoder per connection
//! - [`stream`]: the stream state machine and the stream table
//! - [`flow_control`]: connection and stream windows
//! - [`fields`]: header lists to requests and responses, with the
//!   malformed-request checks
//!
//! Stream errors reset one stream with RST_STREAM. Connection errors end the
//! connection with GOAWAY carrying the highest peer stream id seen.
//!
//! # Example
//!
//! ```no_run
//! use std::net::TcpStream;
//! use tlsmux::http::h2::H2ClientBuilder;
//! use tlsmux::http::tls::{TlsConfig, TlsSessionOps};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TlsConfig::client()
//!     .servername("localhost")
//!     .alpn(&["h2"])
//!     .build()?;
//! let tcp = TcpStream::connect("127.0.0.1:8443")?;
//! let session = TlsSessionOps::connect(tcp, &config, None)?;
//!
//! let mut client = H2ClientBuilder::new().build(session)?;
//! client.connect()?;
//! let response = client.get("/api/test")?;
//! println!("{}", response.status());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod fields;
pub mod flow_control;
pub mod frames;
pub mod hpack;
pub mod server;
pub mod settings;
pub mod stream;

pub use client::{H2Client, H2ClientBuilder};
pub use error::{Error, ErrorCode, Result};
pub use frames::{Frame, FrameFlags, FrameType, TypedFrame};
pub use server::{H2Server, H2ServerBuilder};
pub use settings::{Settings, SettingsBuilder};
pub use stream::{StreamId, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;
