//! tlsmux - HTTP/1.1 and HTTP/2 on one TLS socket
//!
//! This crate terminates TLS, negotiates the application protocol through
//! ALPN, and serves HTTP/1.1 or multiplexed HTTP/2 from the same listener.

pub mod http;
pub mod logging;
pub mod net;
pub mod server;

pub use server::{Server, ServerConfig, ServerHandle};
