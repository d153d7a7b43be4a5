//! TLS configuration
//!
//! Builders collect settings and only touch OpenSSL in `build()`, so every
//! failure (unreadable PEM, bad cipher string, key mismatch) surfaces there
//! as a [`TlsError`].

use super::cert::SelfSigned;
use openssl::pkey::PKey;
use openssl::ssl::{
    AlpnError, SslContext, SslContextBuilder, SslMethod, SslVerifyMode,
    SslVersion,
};
use openssl::x509::X509;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// ALPN tokens offered by default, in server preference order
pub const DEFAULT_ALPN: &[&str] = &["h2", "http/1.1"];

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(self) -> SslVersion {
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

/// TLS configuration errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),
}

/// Encode protocol names in ALPN wire format (length-prefixed)
pub fn alpn_wire(protocols: &[String]) -> Result<Vec<u8>, TlsError> {
    let mut wire = Vec::new();
    for proto in protocols {
        let len = u8::try_from(proto.len())
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| TlsError::InvalidConfig(format!("Bad ALPN token: {:?}", proto)))?;
        wire.push(len);
        wire.extend_from_slice(proto.as_bytes());
    }
    Ok(wire)
}

/// TLS configuration (immutable after building)
///
/// Cloning is cheap; the OpenSSL context is reference counted.
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: SslContext,
    pub(crate) is_server: bool,
    pub(crate) servername: Option<String>,
    alpn: Vec<String>,
}

impl TlsConfig {
    /// Create a new client configuration builder
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Create a new server configuration builder
    pub fn server() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Whether this is a server-side configuration
    pub fn is_server(&self) -> bool {
        self.is_server
    }

    /// Offered ALPN tokens (client) or accepted tokens in preference order (server)
    pub fn alpn(&self) -> &[String] {
        &self.alpn
    }
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("is_server", &self.is_server)
            .field("servername", &self.servername)
            .field("alpn", &self.alpn)
            .finish_non_exhaustive()
    }
}

/// Settings shared by both builder flavours
#[derive(Debug, Default)]
struct Common {
    min_version: Option<TlsVersion>,
    max_version: Option<TlsVersion>,
    cipher_list: Option<String>,
    ciphersuites: Option<String>,
}

impl Common {
    fn apply(&self, ctx: &mut SslContextBuilder) -> Result<(), TlsError> {
        if let (Some(min), Some(max)) = (self.min_version, self.max_version) {
            if min > max {
                return Err(TlsError::InvalidConfig(format!(
                    "min version {} above max version {}",
                    min.as_str(),
                    max.as_str()
                )));
            }
        }
        ctx.set_min_proto_version(self.min_version.map(TlsVersion::to_openssl_version))?;
        ctx.set_max_proto_version(self.max_version.map(TlsVersion::to_openssl_version))?;
        if let Some(ref ciphers) = self.cipher_list {
            ctx.set_cipher_list(ciphers)?;
        }
        if let Some(ref suites) = self.ciphersuites {
            ctx.set_ciphersuites(suites)?;
        }
        Ok(())
    }
}

/// Client configuration builder
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    common: Common,
    alpn: Vec<String>,
    servername: Option<String>,
    verify_peer: bool,
    ca_pem: Option<Vec<u8>>,
}

impl ClientConfigBuilder {
    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.common.min_version = Some(min);
        self.common.max_version = Some(max);
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: &str) -> Self {
        self.common.cipher_list = Some(ciphers.to_string());
        self
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn ciphersuites(mut self, ciphers: &str) -> Self {
        self.common.ciphersuites = Some(ciphers.to_string());
        self
    }

    /// Offer ALPN protocols, most preferred first; empty offers none
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Set SNI servername
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Enable/disable peer certificate verification (off by default)
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.verify_peer = verify;
        self
    }

    /// Trust the certificates in this PEM bundle
    pub fn ca_pem(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_pem = Some(pem.into());
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let mut ctx = SslContextBuilder::new(SslMethod::tls_client())?;
        self.common.apply(&mut ctx)?;

        if self.verify_peer {
            ctx.set_verify(SslVerifyMode::PEER);
            match self.ca_pem {
                Some(ref pem) => {
                    for cert in X509::stack_from_pem(pem)? {
                        ctx.cert_store_mut().add_cert(cert)?;
                    }
                }
                None => ctx.set_default_verify_paths()?,
            }
        } else {
            ctx.set_verify(SslVerifyMode::NONE);
        }

        if !self.alpn.is_empty() {
            ctx.set_alpn_protos(&alpn_wire(&self.alpn)?)?;
        }

        Ok(TlsConfig {
            ctx: ctx.build(),
            is_server: false,
            servername: self.servername,
            alpn: self.alpn,
        })
    }
}

/// Where the server certificate comes from
#[derive(Debug)]
enum CertSource {
    /// Certificate chain file, and a key file or `None` when the key is in the same PEM
    Files { cert: PathBuf, key: Option<PathBuf> },
    Pem { cert: Vec<u8>, key: Vec<u8> },
    SelfSigned(Vec<String>),
}

/// Server configuration builder
#[derive(Debug)]
pub struct ServerConfigBuilder {
    common: Common,
    alpn: Vec<String>,
    cert: Option<CertSource>,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        ServerConfigBuilder {
            common: Common::default(),
            alpn: DEFAULT_ALPN.iter().map(|p| p.to_string()).collect(),
            cert: None,
        }
    }
}

impl ServerConfigBuilder {
    /// Set TLS version (both min and max)
    pub fn version(self, version: TlsVersion) -> Self {
        self.version_range(version, version)
    }

    /// Set TLS version range
    pub fn version_range(mut self, min: TlsVersion, max: TlsVersion) -> Self {
        self.common.min_version = Some(min);
        self.common.max_version = Some(max);
        self
    }

    /// Set cipher list (for TLS <= 1.2)
    pub fn cipher_list(mut self, ciphers: &str) -> Self {
        self.common.cipher_list = Some(ciphers.to_string());
        self
    }

    /// Set cipher suites (for TLS 1.3)
    pub fn ciphersuites(mut self, ciphers: &str) -> Self {
        self.common.ciphersuites = Some(ciphers.to_string());
        self
    }

    /// Accepted ALPN protocols in server preference order
    ///
    /// Defaults to [`DEFAULT_ALPN`]. A client whose offer shares no token with
    /// this list fails the handshake with a `no_application_protocol` alert.
    pub fn alpn(mut self, protocols: &[&str]) -> Self {
        self.alpn = protocols.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Load certificate chain and private key from one PEM file
    pub fn cert_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cert = Some(CertSource::Files {
            cert: path.as_ref().to_path_buf(),
            key: None,
        });
        self
    }

    /// Load certificate chain and private key from separate PEM files
    pub fn cert_and_key_files<P: AsRef<Path>, K: AsRef<Path>>(mut self, cert: P, key: K) -> Self {
        self.cert = Some(CertSource::Files {
            cert: cert.as_ref().to_path_buf(),
            key: Some(key.as_ref().to_path_buf()),
        });
        self
    }

    /// Use an in-memory PEM certificate chain and private key
    pub fn cert_pem(mut self, cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        self.cert = Some(CertSource::Pem {
            cert: cert.into(),
            key: key.into(),
        });
        self
    }

    /// Generate a self-signed certificate for `hostnames` at build time
    ///
    /// This is also what happens when no certificate is configured, with
    /// `localhost` as the only name.
    pub fn self_signed(mut self, hostnames: &[&str]) -> Self {
        self.cert = Some(CertSource::SelfSigned(
            hostnames.iter().map(|h| h.to_string()).collect(),
        ));
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        let mut ctx = SslContextBuilder::new(SslMethod::tls_server())?;
        self.common.apply(&mut ctx)?;

        let source = self
            .cert
            .unwrap_or_else(|| CertSource::SelfSigned(vec!["localhost".to_string()]));
        load_certificate(&mut ctx, source)?;

        if self.alpn.is_empty() {
            return Err(TlsError::InvalidConfig("server ALPN list is empty".to_string()));
        }
        alpn_wire(&self.alpn)?;
        let preference = self.alpn.clone();
        ctx.set_alpn_select_callback(move |_ssl, client_protos| {
            select_alpn(&preference, client_protos).ok_or(AlpnError::ALERT_FATAL)
        });

        Ok(TlsConfig {
            ctx: ctx.build(),
            is_server: true,
            servername: None,
            alpn: self.alpn,
        })
    }
}

fn load_certificate(ctx: &mut SslContextBuilder, source: CertSource) -> Result<(), TlsError> {
    let (cert_pem, key_pem) = match source {
        CertSource::Files { cert, key } => {
            let cert_pem = std::fs::read(&cert)?;
            let key_pem = match key {
                Some(key) => std::fs::read(key)?,
                None => cert_pem.clone(),
            };
            (cert_pem, key_pem)
        }
        CertSource::Pem { cert, key } => (cert, key),
        CertSource::SelfSigned(hostnames) => {
            let names: Vec<&str> = hostnames.iter().map(String::as_str).collect();
            let generated = SelfSigned::generate(&names)?;
            ctx.set_certificate(&generated.cert)?;
            ctx.set_private_key(&generated.key)?;
            ctx.check_private_key()?;
            return Ok(());
        }
    };

    let mut chain = X509::stack_from_pem(&cert_pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load certificate: {}", e)))?
        .into_iter();
    let leaf = chain
        .next()
        .ok_or_else(|| TlsError::Certificate("No certificate in PEM".to_string()))?;
    ctx.set_certificate(&leaf)?;
    for intermediate in chain {
        ctx.add_extra_chain_cert(intermediate)?;
    }

    let key = PKey::private_key_from_pem(&key_pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load private key: {}", e)))?;
    let mismatch = |e: openssl::error::ErrorStack| {
        TlsError::Certificate(format!("Key does not match certificate: {}", e))
    };
    ctx.set_private_key(&key).map_err(mismatch)?;
    ctx.check_private_key().map_err(mismatch)?;

    Ok(())
}

/// Pick the first token of `preference` that the client offers
///
/// `client_protos` is the length-prefixed list from the ClientHello; the
/// returned slice borrows from it, as OpenSSL requires.
fn select_alpn<'a>(preference: &[String], client_protos: &'a [u8]) -> Option<&'a [u8]> {
    let mut offered = Vec::new();
    let mut pos = 0;
    while pos < client_protos.len() {
        let len = client_protos[pos] as usize;
        pos += 1;
        if pos + len > client_protos.len() {
            break;
        }
        offered.push(&client_protos[pos..pos + len]);
        pos += len;
    }

    preference
        .iter()
        .find_map(|want| offered.iter().copied().find(|p| *p == want.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_tls_version_parsing() {
        assert_eq!("TLSv1.2".parse::<TlsVersion>().unwrap(), TlsVersion::Tls12);
        assert_eq!("tlsv1.3".parse::<TlsVersion>().unwrap(), TlsVersion::Tls13);
        assert_eq!("TLS1.0".parse::<TlsVersion>().unwrap(), TlsVersion::Tls10);
        assert!("invalid".parse::<TlsVersion>().is_err());
    }

    #[test]
    fn test_alpn_wire() {
        let wire = alpn_wire(&["h2".to_string(), "http/1.1".to_string()]).unwrap();
        assert_eq!(wire, b"\x02h2\x08http/1.1");
        assert!(alpn_wire(&["".to_string()]).is_err());
        assert!(alpn_wire(&["x".repeat(256)]).is_err());
    }

    #[test]
    fn test_client_config_builder() {
        let config = TlsConfig::client()
            .version(TlsVersion::Tls13)
            .servername("example.com")
            .alpn(&["h2"])
            .build()
            .unwrap();

        assert!(!config.is_server());
        assert_eq!(config.servername, Some("example.com".to_string()));
        assert_eq!(config.alpn(), ["h2".to_string()]);
    }

    #[test]
    fn test_server_defaults() {
        let config = TlsConfig::server().build().unwrap();
        assert!(config.is_server());
        assert_eq!(config.alpn(), ["h2".to_string(), "http/1.1".to_string()]);
    }

    #[test]
    fn test_server_rejects_bad_settings() {
        let inverted = TlsConfig::server()
            .version_range(TlsVersion::Tls13, TlsVersion::Tls12)
            .build();
        assert!(matches!(inverted, Err(TlsError::InvalidConfig(_))));

        let no_alpn = TlsConfig::server().alpn(&[]).build();
        assert!(matches!(no_alpn, Err(TlsError::InvalidConfig(_))));

        let bad_ciphers = TlsConfig::server().cipher_list("NOT-A-CIPHER").build();
        assert!(matches!(bad_ciphers, Err(TlsError::OpenSsl(_))));
    }

    #[test]
    fn test_server_cert_from_pem_file() {
        let generated = SelfSigned::generate(&["pem.test"]).unwrap();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&generated.cert_pem().unwrap()).unwrap();
        file.write_all(&generated.key_pem().unwrap()).unwrap();
        file.flush().unwrap();

        assert!(TlsConfig::server().cert_file(file.path()).build().is_ok());
    }

    #[test]
    fn test_select_alpn_prefers_server_order() {
        let preference = vec!["h2".to_string(), "http/1.1".to_string()];
        let client = b"\x08http/1.1\x02h2";
        assert_eq!(select_alpn(&preference, client), Some(&b"h2"[..]));
        assert_eq!(select_alpn(&preference, b"\x08http/1.1"), Some(&b"http/1.1"[..]));
        assert_eq!(select_alpn(&preference, b"\x08spdy/3.1"), None);
        // truncated entry is ignored
        assert_eq!(select_alpn(&preference, b"\x08http/1"), None);
    }

    #[test]
    fn test_server_cert_key_mismatch() {
        let a = SelfSigned::generate(&["a.test"]).unwrap();
        let b = SelfSigned::generate(&["b.test"]).unwrap();
        let result = TlsConfig::server()
            .cert_pem(a.cert_pem().unwrap(), b.key_pem().unwrap())
            .build();
        assert!(matches!(result, Err(TlsError::Certificate(_))));
    }

    #[test]
    fn test_server_missing_cert_file() {
        let result = TlsConfig::server()
            .cert_file("/nonexistent/server.pem")
            .build();
        assert!(matches!(result, Err(TlsError::Io(_))));
    }
}
