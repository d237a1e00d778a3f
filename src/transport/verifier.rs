//! Registry-anchored client certificate verification
//!
//! Clients authenticate with a self-issued certificate whose common name is
//! their account address. Trust does not come from a CA: a certificate is
//! accepted only while the certificate registry lists it as valid for that
//! owner and serial number.
//!
//! Checks run in order and stop at the first failure:
//! 1. no certificate presented: accept (client auth is optional)
//! 2. exactly one certificate
//! 3. certificate parses
//! 4. subject common name decodes as an account address
//! 5. subject and issuer common names match
//! 6. serial number present
//! 7. registry lookup for (owner, serial, valid)
//! 8. exactly one record, and it is valid
//! 9. certificate verifies against itself as the only trust anchor, for client auth
//!
//! Only step 2 rejects without logging; every later rejection logs one error.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use tracing::{error, Span};

use crate::config::VerifierConfig;
use crate::identity::{AccountAddress, AddressError};
use crate::registry::{CertificateFilter, CertificateRecord, CertificateRegistry, CertificateState};
use super::certificates::{self, CertificateError, PeerCertificate};

/// Why a client certificate was rejected
#[derive(Debug, Error)]
pub enum VerifyError {
    /// More than one certificate presented
    #[error("tls: invalid certificate chain")]
    InvalidChain {
        /// Number of certificates presented
        presented: usize,
    },

    /// Certificate is not well-formed DER
    #[error("tls: failed to parse certificate: {0}")]
    Parse(#[source] CertificateError),

    /// Subject common name is not an account address
    #[error("tls: invalid certificate's subject common name: {0}")]
    InvalidSubject(#[source] AddressError),

    /// Certificate is not self-issued
    #[error("tls: invalid certificate's issuer common name")]
    IssuerMismatch,

    /// Certificate carries no serial number
    #[error("tls: invalid certificate serial number")]
    MissingSerial,

    /// Registry lookup failed
    #[error("tls: unable to fetch certificate from chain: {0:#}")]
    Lookup(#[source] anyhow::Error),

    /// Registry lookup exceeded its deadline
    #[error("tls: unable to fetch certificate from chain: lookup timed out after {0:?}")]
    LookupTimeout(Duration),

    /// Lookup abandoned because the handshake was cancelled
    #[error("tls: unable to fetch certificate from chain: handshake cancelled")]
    Cancelled,

    /// Registry does not hold exactly one valid record
    #[error("tls: attempt to use non-existing or revoked certificate")]
    NotValid {
        /// Number of records returned
        matches: usize,
    },

    /// Signature, validity period or key usage check failed
    #[error("tls: unable to verify certificate: {0}")]
    Verification(#[source] CertificateError),

    /// No runtime able to drive the lookup
    #[error("tls: {0}")]
    Runtime(&'static str),
}

impl VerifyError {
    /// Whether a later attempt with the same certificate could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VerifyError::Lookup(_) | VerifyError::LookupTimeout(_) | VerifyError::Cancelled
        )
    }
}

impl From<VerifyError> for rustls::Error {
    fn from(err: VerifyError) -> Self {
        rustls::Error::InvalidCertificate(rustls::CertificateError::Other(rustls::OtherError(
            Arc::new(err),
        )))
    }
}

/// Client certificate verifier backed by the certificate registry
///
/// Holds no per-handshake state; one instance serves every connection of a
/// listener.
pub struct PeerVerifier {
    registry: Arc<dyn CertificateRegistry>,
    provider: Arc<CryptoProvider>,
    account_prefix: String,
    lookup_timeout: Duration,
    cancel: CancellationToken,
    log: Span,
    runtime: Option<Handle>,
}

impl PeerVerifier {
    /// Create a verifier
    ///
    /// `cancel` aborts in-flight registry lookups; rejections are logged under `log`.
    pub fn new(
        registry: Arc<dyn CertificateRegistry>,
        config: &VerifierConfig,
        cancel: CancellationToken,
        log: Span,
    ) -> Self {
        Self {
            registry,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            account_prefix: config.account_prefix.clone(),
            lookup_timeout: config.lookup_timeout(),
            cancel,
            log,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Use a specific crypto provider for handshake signature checks
    pub fn with_provider(mut self, provider: Arc<CryptoProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Runtime used when rustls calls in from outside any tokio context
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Crypto provider used for handshake signature checks
    pub fn provider(&self) -> &Arc<CryptoProvider> {
        &self.provider
    }

    /// Verify a presented chain against the current time
    pub async fn verify(&self, chain: &[CertificateDer<'_>]) -> Result<(), VerifyError> {
        self.verify_at(chain, UnixTime::now()).await
    }

    /// Verify a presented chain, checking validity periods at `now`
    pub async fn verify_at(&self, chain: &[CertificateDer<'_>], now: UnixTime) -> Result<(), VerifyError> {
        match presented(chain)? {
            Some(end_entity) => self.verify_logged(end_entity, now).await,
            None => Ok(()),
        }
    }

    /// Verify from synchronous code such as a rustls callback
    ///
    /// Inside a multi-threaded runtime the worker is handed off with
    /// `block_in_place` while the lookup runs. Current-thread runtimes cannot
    /// drive the lookup while blocked and are refused.
    pub fn verify_blocking(&self, chain: &[CertificateDer<'_>], now: UnixTime) -> Result<(), VerifyError> {
        let end_entity = match presented(chain)? {
            Some(end_entity) => end_entity,
            None => return Ok(()),
        };

        match Handle::try_current() {
            Ok(handle) => match handle.runtime_flavor() {
                RuntimeFlavor::CurrentThread => Err(self.reject(
                    end_entity,
                    VerifyError::Runtime("registry lookup needs a multi-threaded runtime"),
                )),
                _ => tokio::task::block_in_place(|| handle.block_on(self.verify_logged(end_entity, now))),
            },
            Err(_) => match &self.runtime {
                Some(handle) => handle.block_on(self.verify_logged(end_entity, now)),
                None => Err(self.reject(
                    end_entity,
                    VerifyError::Runtime("no tokio runtime available for registry lookup"),
                )),
            },
        }
    }

    async fn verify_logged(&self, end_entity: &CertificateDer<'_>, now: UnixTime) -> Result<(), VerifyError> {
        self.verify_end_entity(end_entity, now)
            .await
            .map_err(|err| self.reject(end_entity, err))
    }

    async fn verify_end_entity(&self, end_entity: &CertificateDer<'_>, now: UnixTime) -> Result<(), VerifyError> {
        let peer = PeerCertificate::parse(end_entity).map_err(VerifyError::Parse)?;

        let owner = AccountAddress::parse(&peer.subject_common_name, &self.account_prefix)
            .map_err(VerifyError::InvalidSubject)?;

        if peer.subject_common_name != peer.issuer_common_name {
            return Err(VerifyError::IssuerMismatch);
        }

        let serial = peer.serial_number.clone().ok_or(VerifyError::MissingSerial)?;

        let filter = CertificateFilter {
            owner: owner.to_string(),
            serial,
            state: CertificateState::Valid,
        };
        let records = self.lookup(&filter).await?;

        // The registry filters on state too; its result is not trusted for that.
        match records.as_slice() {
            [record] if record.is_state(CertificateState::Valid) => {}
            _ => return Err(VerifyError::NotValid { matches: records.len() }),
        }

        certificates::verify_self_signed(end_entity, now).map_err(VerifyError::Verification)
    }

    async fn lookup(&self, filter: &CertificateFilter) -> Result<Vec<CertificateRecord>, VerifyError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(VerifyError::Cancelled),
            result = tokio::time::timeout(self.lookup_timeout, self.registry.lookup_certificates(filter)) => {
                match result {
                    Ok(records) => records.map_err(VerifyError::Lookup),
                    Err(_) => Err(VerifyError::LookupTimeout(self.lookup_timeout)),
                }
            }
        }
    }

    fn reject(&self, end_entity: &CertificateDer<'_>, err: VerifyError) -> VerifyError {
        error!(
            parent: &self.log,
            error = %err,
            fingerprint = %hex::encode(certificates::fingerprint(end_entity)),
            "VerifyPeerCertificate failed"
        );
        err
    }
}

/// The single presented certificate, or `None` when the client sent none
fn presented<'a, 'b>(chain: &'a [CertificateDer<'b>]) -> Result<Option<&'a CertificateDer<'b>>, VerifyError> {
    match chain {
        [] => Ok(None),
        [end_entity] => Ok(Some(end_entity)),
        _ => Err(VerifyError::InvalidChain { presented: chain.len() }),
    }
}

impl fmt::Debug for PeerVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerVerifier")
            .field("account_prefix", &self.account_prefix)
            .field("lookup_timeout", &self.lookup_timeout)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ClientCertVerifier for PeerVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    // Requested, not required: connections without a client certificate are
    // authorized elsewhere.
    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        let mut chain = Vec::with_capacity(1 + intermediates.len());
        chain.push(end_entity.clone());
        chain.extend(intermediates.iter().cloned());

        self.verify_blocking(&chain, now)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
