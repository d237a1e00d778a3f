//! Gateway TLS - registry-anchored mutual TLS for provider gateways
//!
//! This crate builds the server-side TLS configuration for a provider
//! gateway. Clients authenticate with self-issued certificates whose common
//! name is their account address; trust comes from the on-chain certificate
//! registry rather than from a certificate authority.
//!
//! The registry itself is an external collaborator reached through the
//! [`CertificateRegistry`] trait.

#![warn(missing_docs)]

pub mod config;
pub mod identity;
pub mod registry;
pub mod transport;

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::Span;

pub use config::{GatewayTlsConfig, VerifierConfig};
pub use identity::{AccountAddress, AddressError};
pub use registry::{
    CertificateFilter, CertificateRecord, CertificateRegistry, CertificateState, MemoryRegistry,
};
pub use transport::{
    build_quic_server_config, build_server_tls_config, quic_server_config, LocalIdentity,
    PeerCertificate, PeerVerifier, VerifyError,
};

/// Builder for gateway TLS configurations
pub struct GatewayTlsBuilder {
    registry: Arc<dyn CertificateRegistry>,
    config: GatewayTlsConfig,
    cancel: CancellationToken,
    log: Span,
}

impl GatewayTlsBuilder {
    /// Create a builder with default config
    pub fn new(registry: Arc<dyn CertificateRegistry>) -> Self {
        Self {
            registry,
            config: GatewayTlsConfig::default(),
            cancel: CancellationToken::new(),
            log: Span::current(),
        }
    }

    /// Set custom configuration
    pub fn with_config(mut self, config: GatewayTlsConfig) -> Self {
        self.config = config;
        self
    }

    /// Cancel in-flight registry lookups when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Log rejected handshakes under `log`
    pub fn with_log_span(mut self, log: Span) -> Self {
        self.log = log;
        self
    }

    /// Build the standalone verifier
    pub fn build_verifier(&self) -> PeerVerifier {
        PeerVerifier::new(
            self.registry.clone(),
            &self.config.verifier,
            self.cancel.clone(),
            self.log.clone(),
        )
    }

    /// Build a rustls server configuration
    pub fn build_server_config(&self, identity: &LocalIdentity) -> Result<rustls::ServerConfig> {
        self.config.validate()?;
        build_server_tls_config(
            self.cancel.clone(),
            identity,
            self.registry.clone(),
            &self.config.verifier,
            self.log.clone(),
        )
    }

    /// Build a QUIC server configuration
    pub fn build_quic_config(&self, identity: &LocalIdentity) -> Result<quinn::ServerConfig> {
        self.config.validate()?;
        build_quic_server_config(
            self.cancel.clone(),
            identity,
            self.registry.clone(),
            &self.config,
            self.log.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_builder_rejects_invalid_config() {
        let mut config = GatewayTlsConfig::default();
        config.verifier.lookup_timeout_ms = 0;

        let builder = GatewayTlsBuilder::new(Arc::new(MemoryRegistry::new())).with_config(config);
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::new(vec!["gateway.local".to_string()])
            .unwrap()
            .self_signed(&key)
            .unwrap();
        let identity = LocalIdentity::from_pem(cert.pem().as_bytes(), key.serialize_pem().as_bytes()).unwrap();

        assert!(builder.build_server_config(&identity).is_err());
    }

    #[tokio::test]
    async fn test_builder_verifier_accepts_empty_chain() {
        let verifier = GatewayTlsBuilder::new(Arc::new(MemoryRegistry::new())).build_verifier();
        assert!(verifier.verify(&[]).await.is_ok());
    }
}
