//! Certificates
//!
//! Self-signed certificate generation for development listeners and tests,
//! plus a small summary type for inspecting certificates.

use super::config::TlsError;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509NameRef, X509Ref, X509};
use std::net::IpAddr;

/// Validity of generated certificates
const SELF_SIGNED_DAYS: u32 = 365;

/// A generated certificate and its private key
pub struct SelfSigned {
    pub cert: X509,
    pub key: PKey<Private>,
}

impl SelfSigned {
    /// Generate an ECDSA P-256 certificate
    ///
    /// The first hostname becomes the subject CN; all of them go in the
    /// subjectAltName extension, as IP entries when they parse as addresses.
    pub fn generate(hostnames: &[&str]) -> Result<Self, TlsError> {
        let cn = hostnames
            .first()
            .ok_or_else(|| TlsError::Certificate("no hostname for certificate".to_string()))?;

        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_nid(Nid::COMMONNAME, cn)?;
        let name = name.build();

        let mut serial = BigNum::new()?;
        serial.rand(64, MsbOption::MAYBE_ZERO, false)?;

        let serial = serial.to_asn1_integer()?;
        let not_before = Asn1Time::days_from_now(0)?;
        let not_after = Asn1Time::days_from_now(SELF_SIGNED_DAYS)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(&key)?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;

        let mut san = SubjectAlternativeName::new();
        for host in hostnames {
            if host.parse::<IpAddr>().is_ok() {
                san.ip(host);
            } else {
                san.dns(host);
            }
        }
        let san = san.build(&builder.x509v3_context(None, None))?;
        builder.append_extension(san)?;
        builder.append_extension(BasicConstraints::new().critical().build()?)?;

        builder.sign(&key, MessageDigest::sha256())?;

        Ok(SelfSigned {
            cert: builder.build(),
            key,
        })
    }

    /// Certificate in PEM form
    pub fn cert_pem(&self) -> Result<Vec<u8>, TlsError> {
        Ok(self.cert.to_pem()?)
    }

    /// PKCS#8 private key in PEM form
    pub fn key_pem(&self) -> Result<Vec<u8>, TlsError> {
        Ok(self.key.private_key_to_pem_pkcs8()?)
    }
}

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<String>,
}

impl CertInfo {
    /// Extract certificate information from an X.509 certificate
    pub fn from_x509(cert: &X509Ref) -> Self {
        CertInfo {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            subject_alt_names: subject_alt_names(cert),
        }
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let Some(sans) = cert.subject_alt_names() else {
        return Vec::new();
    };

    sans.iter()
        .filter_map(|name| {
            if let Some(dns) = name.dnsname() {
                return Some(format!("DNS:{}", dns));
            }
            let ip: IpAddr = match name.ipaddress()? {
                [a, b, c, d] => [*a, *b, *c, *d].into(),
                bytes => <[u8; 16]>::try_from(bytes).ok()?.into(),
            };
            Some(format!("IP:{}", ip))
        })
        .collect()
}
