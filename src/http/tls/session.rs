//! TLS session operations
//!
//! [`TlsSessionOps`] implements [`SessionOps`] over an OpenSSL stream so the
//! HTTP/1.1 and HTTP/2 code never sees encryption.

use super::config::TlsConfig;
use super::handshake::{classify, HandshakeError};
use super::vars::TlsVars;
use crate::http::session::{poll_fds, PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{Ssl, SslStream};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// TLS session operations
///
/// Wraps an established OpenSSL stream. The TLS state is freed on drop.
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    vars: TlsVars,
    failed: bool,
}

impl TlsSessionOps {
    /// Wrap a stream whose handshake has completed
    pub(crate) fn from_stream(stream: SslStream<TcpStream>) -> Self {
        let vars = TlsVars::from_ssl(stream.ssl());
        TlsSessionOps {
            stream,
            vars,
            failed: false,
        }
    }

    /// Client-side handshake
    ///
    /// `timeout` bounds each read and write of the handshake.
    pub fn connect(
        tcp_stream: TcpStream,
        config: &TlsConfig,
        timeout: Option<Duration>,
    ) -> Result<Self, HandshakeError> {
        if config.is_server {
            return Err(HandshakeError::Other(
                "Cannot use server config for client connection".to_string(),
            ));
        }

        let mut ssl = Ssl::new(&config.ctx).map_err(|e| HandshakeError::Other(e.to_string()))?;
        if let Some(ref servername) = config.servername {
            ssl.set_hostname(servername)
                .map_err(|e| HandshakeError::Other(e.to_string()))?;
        }

        tcp_stream.set_read_timeout(timeout)?;
        tcp_stream.set_write_timeout(timeout)?;
        let stream = ssl.connect(tcp_stream).map_err(classify)?;
        stream.get_ref().set_read_timeout(None)?;
        stream.get_ref().set_write_timeout(None)?;

        Ok(Self::from_stream(stream))
    }

    /// Negotiated connection parameters
    pub fn vars(&self) -> &TlsVars {
        &self.vars
    }

    /// ALPN token selected during the handshake
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.stream.ssl().selected_alpn_protocol()
    }

    /// Check if TLS I/O failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }

    fn fail(&mut self, e: std::io::Error) -> Error {
        self.failed = true;
        Error::Io(e)
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        if events != PollEvents::Write && self.pending() > 0 {
            return Ok(true);
        }

        let ready = poll_fds(&[(self.raw_fd(), events)], timeout)?;
        Ok(ready[0])
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            // A peer that closes without close_notify is still a close
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(0),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        self.stream.write(buf).map_err(|e| self.fail(e))
    }

    fn flush(&mut self) -> HttpResult<()> {
        self.stream.flush().map_err(|e| self.fail(e))
    }

    fn close(&mut self) -> HttpResult<()> {
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        match self.stream.get_ref().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(Error::from(e)),
            _ => Ok(()),
        }
    }

    fn raw_fd(&self) -> RawFd {
        self.stream.get_ref().as_raw_fd()
    }

    fn pending(&self) -> usize {
        self.stream.ssl().pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tls::{TlsTerminator, TlsVersion};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    #[test]
    fn test_tls_client_server_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_config = TlsConfig::server()
            .version(TlsVersion::Tls13)
            .build()
            .unwrap();
        let terminator = TlsTerminator::new(server_config, Duration::from_secs(5));

        let server = thread::spawn(move || {
            let (tcp_stream, _) = listener.accept().unwrap();
            let mut conn = terminator.accept(tcp_stream).unwrap();
            let session = conn.session_mut();

            let mut buf = [0u8; 5];
            assert!(session.poll(PollEvents::Read, Some(Duration::from_secs(5))).unwrap());
            let n = session.read(&mut buf).unwrap();
            assert_eq!(&buf[..n], b"Hello");

            session.write_all(b"World").unwrap();
            session.close().unwrap();
        });

        let client_config = TlsConfig::client().version(TlsVersion::Tls13).build().unwrap();
        let tcp_stream = TcpStream::connect(addr).unwrap();
        let mut session =
            TlsSessionOps::connect(tcp_stream, &client_config, Some(Duration::from_secs(5)))
                .unwrap();

        assert_eq!(session.vars().version, "TLSv1.3");
        assert!(!session.failed());

        session.write_all(b"Hello").unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 16];
        loop {
            let n = session.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, b"World");

        server.join().unwrap();
    }

    #[test]
    fn test_connect_rejects_server_config() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let tcp_stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let config = TlsConfig::server().build().unwrap();

        let result = TlsSessionOps::connect(tcp_stream, &config, None);
        assert!(matches!(result, Err(HandshakeError::Other(_))));
    }
}
