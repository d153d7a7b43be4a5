//! Network plumbing
//!
//! Listening sockets are created through `socket2` so that socket options
//! can be set before `bind`/`listen`.

pub mod listener;

pub use listener::{Listener, ListenerBuilder};

/// Result type for network operations
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// Default listen backlog
pub const DEFAULT_BACKLOG: i32 = 1024;
