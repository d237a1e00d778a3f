//! Gateway TLS configuration module
//!
//! Provides configuration structures for registry-anchored client verification

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Serialize, Deserialize};

/// Default bech32 prefix for account addresses
pub const DEFAULT_ACCOUNT_PREFIX: &str = "akash";

/// Default deadline for a single registry lookup, in milliseconds
pub const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 10_000;

/// Environment variable prefix for overrides, e.g. `GATEWAY_TLS__VERIFIER__LOOKUP_TIMEOUT_MS`
pub const ENV_PREFIX: &str = "GATEWAY_TLS";

/// Peer verifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Human-readable prefix account addresses must carry
    pub account_prefix: String,
    /// Deadline for one registry lookup, in milliseconds
    pub lookup_timeout_ms: u64,
    /// Refuse anything older than TLS 1.3
    pub tls13_only: bool,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            account_prefix: DEFAULT_ACCOUNT_PREFIX.to_string(),
            lookup_timeout_ms: DEFAULT_LOOKUP_TIMEOUT_MS,
            tls13_only: true,
        }
    }
}

impl VerifierConfig {
    /// Deadline for one registry lookup
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

/// Top-level gateway TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayTlsConfig {
    /// Client certificate verification
    pub verifier: VerifierConfig,
    /// ALPN protocols offered on QUIC listeners
    pub alpn_protocols: Vec<String>,
}

impl GatewayTlsConfig {
    /// Load from an optional file, then apply `GATEWAY_TLS__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(env);

        let config: GatewayTlsConfig = builder
            .build()
            .context("failed to read gateway TLS configuration")?
            .try_deserialize()
            .context("invalid gateway TLS configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the verifier cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.verifier.account_prefix.is_empty() {
            anyhow::bail!("verifier.account_prefix must not be empty");
        }
        if self.verifier.lookup_timeout_ms == 0 {
            anyhow::bail!("verifier.lookup_timeout_ms must be greater than zero");
        }
        Ok(())
    }
}
