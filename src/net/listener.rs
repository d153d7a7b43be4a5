//! TCP listener
//!
//! A thin wrapper over a blocking `std::net::TcpListener` that was bound
//! with `SO_REUSEADDR` and an explicit backlog.

use super::{Error, Result, DEFAULT_BACKLOG};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

/// Bound TCP listener
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind with default options
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        ListenerBuilder::new().bind(addr)
    }

    /// Accept one connection
    ///
    /// Accepted sockets have `TCP_NODELAY` set; frames are written whole.
    pub fn accept(&self) -> Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept()?;
        stream.set_nodelay(true)?;
        Ok((stream, peer))
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Borrow the std listener
    pub fn get_ref(&self) -> &TcpListener {
        &self.inner
    }
}

/// Builder for [`Listener`]
#[derive(Debug, Clone)]
pub struct ListenerBuilder {
    backlog: i32,
    reuse_address: bool,
}

impl ListenerBuilder {
    /// Create a builder with default options
    pub fn new() -> Self {
        ListenerBuilder {
            backlog: DEFAULT_BACKLOG,
            reuse_address: true,
        }
    }

    /// Set the listen backlog
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Enable or disable `SO_REUSEADDR`
    pub fn reuse_address(mut self, reuse: bool) -> Self {
        self.reuse_address = reuse;
        self
    }

    /// Bind to the first address `addr` resolves to
    pub fn bind(self, addr: impl ToSocketAddrs) -> Result<Listener> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::InvalidAddress("address resolved to nothing".to_string()))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(self.reuse_address)?;
        socket
            .bind(&addr.into())
            .map_err(|source| Error::Bind { addr, source })?;
        socket.listen(self.backlog)?;

        let inner: TcpListener = socket.into();
        let local_addr = inner.local_addr()?;

        tracing::debug!(address = %local_addr, backlog = self.backlog, "listener bound");

        Ok(Listener { inner, local_addr })
    }
}

impl Default for ListenerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::thread;

    #[test]
    fn test_bind_ephemeral_port() {
        let listener = Listener::bind("127.0.0.1:0").unwrap();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[test]
    fn test_accept_sets_nodelay() {
        let listener = ListenerBuilder::new().backlog(16).bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr();

        let handle = thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"ping").unwrap();
        });

        let (mut stream, _peer) = listener.accept().unwrap();
        assert!(stream.nodelay().unwrap());

        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        handle.join().unwrap();
    }

    #[test]
    fn test_bind_conflict_reports_address() {
        let first = ListenerBuilder::new()
            .reuse_address(false)
            .bind("127.0.0.1:0")
            .unwrap();
        let addr = first.local_addr();

        let result = ListenerBuilder::new().reuse_address(false).bind(addr);
        assert!(matches!(result, Err(Error::Bind { .. })));
    }
}
