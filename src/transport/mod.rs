//! Server-side TLS configuration for provider gateways
//!
//! Produces rustls (and QUIC) server configurations that request a client
//! certificate and hand it to [`PeerVerifier`] instead of CA-based validation.

pub mod certificates;
pub mod verifier;

use std::sync::Arc;

use anyhow::{Result, anyhow};
use rustls::{ServerConfig, SupportedProtocolVersion};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Span};

use crate::config::{GatewayTlsConfig, VerifierConfig};
use crate::registry::CertificateRegistry;

pub use certificates::{LocalIdentity, PeerCertificate, CertificateError};
pub use verifier::{PeerVerifier, VerifyError};

static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// Build the gateway's server TLS configuration
///
/// Client certificates are requested but optional; a presented certificate is
/// accepted only if the registry lists it as valid. `cancel` aborts in-flight
/// registry lookups and rejections are logged under `log`.
pub fn build_server_tls_config(
    cancel: CancellationToken,
    identity: &LocalIdentity,
    registry: Arc<dyn CertificateRegistry>,
    config: &VerifierConfig,
    log: Span,
) -> Result<ServerConfig> {
    let verifier = PeerVerifier::new(registry, config, cancel, log);
    server_config_with_verifier(verifier, identity, config)
}

/// Build a server TLS configuration around an existing verifier
pub fn server_config_with_verifier(
    verifier: PeerVerifier,
    identity: &LocalIdentity,
    config: &VerifierConfig,
) -> Result<ServerConfig> {
    let versions: &[&SupportedProtocolVersion] = if config.tls13_only {
        TLS13_ONLY
    } else {
        rustls::ALL_VERSIONS
    };

    let provider = verifier.provider().clone();
    let (cert_chain, private_key) = identity.clone_parts();

    let server_config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(versions)
        .map_err(|e| anyhow!("Unsupported TLS protocol versions: {}", e))?
        .with_client_cert_verifier(Arc::new(verifier))
        .with_single_cert(cert_chain, private_key)
        .map_err(|e| anyhow!("Invalid local certificate or key: {}", e))?;

    debug!(
        "Server TLS config created with certificate {} (tls13_only={})",
        identity.fingerprint(),
        config.tls13_only
    );
    Ok(server_config)
}

/// Wrap a server TLS configuration for QUIC listeners
pub fn quic_server_config(mut tls: ServerConfig, alpn_protocols: &[String]) -> Result<quinn::ServerConfig> {
    tls.alpn_protocols = alpn_protocols.iter().map(|p| p.as_bytes().to_vec()).collect();

    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls)
        .map_err(|e| anyhow!("TLS config is not usable for QUIC: {}", e))?;
    Ok(quinn::ServerConfig::with_crypto(Arc::new(crypto)))
}

/// Build the QUIC server configuration for a gateway from its full configuration
pub fn build_quic_server_config(
    cancel: CancellationToken,
    identity: &LocalIdentity,
    registry: Arc<dyn CertificateRegistry>,
    config: &GatewayTlsConfig,
    log: Span,
) -> Result<quinn::ServerConfig> {
    if !config.verifier.tls13_only {
        return Err(anyhow!("QUIC requires TLS 1.3; set verifier.tls13_only"));
    }

    let tls = build_server_tls_config(cancel, identity, registry, &config.verifier, log)?;
    let quic = quic_server_config(tls, &config.alpn_protocols)?;
    info!("QUIC server config ready, ALPN: {:?}", config.alpn_protocols);
    Ok(quic)
}
