//! Certificate handling for gateway TLS
//!
//! This module covers both sides of the mutual-TLS handshake:
//! - `LocalIdentity`: the gateway's own certificate chain and private key
//! - `PeerCertificate`: the fields the verifier reads from a client certificate
//! - `verify_self_signed`: validity, usage and signature of a self-issued certificate

use std::io::BufReader;

use anyhow::{Result, anyhow};
use num_bigint::BigInt;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use sha2::{Sha256, Digest};
use thiserror::Error;
use tracing::debug;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;
use x509_parser::x509::X509Name;

/// Calculate a SHA-256 certificate fingerprint
pub fn fingerprint(cert_der: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(cert_der);
    hasher.finalize().into()
}

/// Server-side certificate material presented to connecting clients
#[derive(Debug)]
pub struct LocalIdentity {
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
}

impl LocalIdentity {
    /// Wrap DER material; the chain is leaf first and must not be empty
    pub fn new(cert_chain: Vec<CertificateDer<'static>>, private_key: PrivateKeyDer<'static>) -> Result<Self> {
        if cert_chain.is_empty() {
            return Err(anyhow!("Local identity needs at least one certificate"));
        }
        Ok(Self { cert_chain, private_key })
    }

    /// Parse PEM certificate chain and PEM private key held in memory
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let cert_chain = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("Failed to read PEM certificates: {}", e))?;

        let private_key = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
            .map_err(|e| anyhow!("Failed to read PEM private key: {}", e))?
            .ok_or_else(|| anyhow!("No private key found in PEM input"))?;

        debug!("Loaded local identity with {} certificate(s)", cert_chain.len());
        Self::new(cert_chain, private_key)
    }

    /// Certificate chain, leaf first
    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    /// Hex SHA-256 fingerprint of the leaf certificate
    pub fn fingerprint(&self) -> String {
        self.cert_chain
            .first()
            .map(|leaf| hex::encode(fingerprint(leaf.as_ref())))
            .unwrap_or_default()
    }

    /// Clone the material for handing to a TLS config builder
    pub fn clone_parts(&self) -> (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>) {
        (self.cert_chain.clone(), self.private_key.clone_key())
    }
}

/// Failure to read or check a peer certificate
#[derive(Debug, Error)]
pub enum CertificateError {
    /// DER decoding failed
    #[error("{0}")]
    Malformed(String),

    /// Extra bytes follow the certificate
    #[error("{0} trailing bytes after certificate")]
    TrailingData(usize),

    /// Current time is outside the validity period
    #[error("certificate is only valid from {not_before} to {not_after}")]
    OutsideValidity {
        /// Start of the validity period
        not_before: String,
        /// End of the validity period
        not_after: String,
    },

    /// Extended key usage extension could not be read
    #[error("invalid extended key usage: {0}")]
    KeyUsage(String),

    /// Extended key usage excludes client authentication
    #[error("certificate is not valid for client authentication")]
    ClientAuthNotAllowed,

    /// Signature was not made by the certificate's own key
    #[error("certificate signature does not verify: {0}")]
    Signature(String),
}

/// Identity fields of a client certificate
#[derive(Debug, Clone)]
pub struct PeerCertificate {
    /// Subject common name
    pub subject_common_name: String,
    /// Issuer common name
    pub issuer_common_name: String,
    /// Serial number in decimal; `None` when the certificate carries none
    pub serial_number: Option<String>,
}

impl PeerCertificate {
    /// Parse DER bytes
    pub fn parse(cert_der: &[u8]) -> std::result::Result<Self, CertificateError> {
        let cert = parse_der(cert_der)?;

        Ok(Self {
            subject_common_name: common_name(cert.subject()),
            issuer_common_name: common_name(cert.issuer()),
            serial_number: serial_text(cert.tbs_certificate.raw_serial()),
        })
    }
}

/// Verify a certificate with itself as the only trust anchor
///
/// Checks the validity period at `now`, that extended key usage is absent or
/// allows client authentication, and that the certificate is signed by its own
/// key. Basic constraints and name constraints are not evaluated, so a
/// self-issued certificate carrying the CA flag is acceptable.
pub fn verify_self_signed(cert_der: &[u8], now: UnixTime) -> std::result::Result<(), CertificateError> {
    let cert = parse_der(cert_der)?;

    let validity = cert.validity();
    let now = i64::try_from(now.as_secs()).unwrap_or(i64::MAX);
    if now < validity.not_before.timestamp() || now > validity.not_after.timestamp() {
        return Err(CertificateError::OutsideValidity {
            not_before: validity.not_before.to_string(),
            not_after: validity.not_after.to_string(),
        });
    }

    let usage = cert
        .extended_key_usage()
        .map_err(|e| CertificateError::KeyUsage(e.to_string()))?;
    if let Some(usage) = usage {
        if !usage.value.any && !usage.value.client_auth {
            return Err(CertificateError::ClientAuthNotAllowed);
        }
    }

    cert.verify_signature(None)
        .map_err(|e| CertificateError::Signature(e.to_string()))
}

fn parse_der(cert_der: &[u8]) -> std::result::Result<X509Certificate<'_>, CertificateError> {
    let (rest, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CertificateError::Malformed(e.to_string()))?;
    if !rest.is_empty() {
        return Err(CertificateError::TrailingData(rest.len()));
    }
    Ok(cert)
}

/// Decimal text of a DER INTEGER serial, read as two's complement
fn serial_text(raw_serial: &[u8]) -> Option<String> {
    if raw_serial.is_empty() {
        return None;
    }
    Some(BigInt::from_signed_bytes_be(raw_serial).to_string())
}

/// Last common name attribute of `name`, or empty when absent or not a string
fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .last()
        .and_then(|attr| attr.as_str().ok())
        .unwrap_or_default()
        .to_string()
}
