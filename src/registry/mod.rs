//! Certificate registry client interface
//!
//! The registry is the on-chain record of which client certificates are
//! currently valid. The verifier only ever reads from it, one point-in-time
//! lookup per handshake.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Serialize, Deserialize};
use tracing::debug;

/// Lifecycle state of a registered certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificateState {
    /// Usable for authentication
    Valid,
    /// Revoked by its owner
    Revoked,
    /// Past its registered lifetime
    Expired,
}

impl CertificateState {
    /// Name used in registry filters
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateState::Valid => "valid",
            CertificateState::Revoked => "revoked",
            CertificateState::Expired => "expired",
        }
    }
}

impl fmt::Display for CertificateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lookup filter: owner address, serial number and desired state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateFilter {
    /// Canonical account address of the certificate owner
    pub owner: String,
    /// Serial number in decimal
    pub serial: String,
    /// State the caller is interested in
    pub state: CertificateState,
}

/// A certificate as recorded in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Owner account address
    pub owner: String,
    /// Serial number in decimal
    pub serial: String,
    /// Current lifecycle state
    pub state: CertificateState,
}

impl CertificateRecord {
    /// Check the record's lifecycle state
    pub fn is_state(&self, state: CertificateState) -> bool {
        self.state == state
    }
}

/// Read access to the certificate registry
///
/// Implementations must be safe to call from many handshakes at once. Any
/// retry or backoff policy belongs here, not in the verifier.
#[async_trait]
pub trait CertificateRegistry: Send + Sync {
    /// Return every record matching `filter`
    async fn lookup_certificates(&self, filter: &CertificateFilter) -> Result<Vec<CertificateRecord>>;
}

/// In-process registry for development nodes and tests
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    records: DashMap<(String, String), CertificateRecord>,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a certificate, replacing any record with the same owner and serial
    pub fn insert(&self, record: CertificateRecord) {
        debug!("Registering certificate {} for {}", record.serial, record.owner);
        self.records.insert((record.owner.clone(), record.serial.clone()), record);
    }

    /// Move a certificate to `state`; returns false when it is unknown
    pub fn set_state(&self, owner: &str, serial: &str, state: CertificateState) -> bool {
        match self.records.get_mut(&(owner.to_string(), serial.to_string())) {
            Some(mut record) => {
                record.state = state;
                true
            }
            None => false,
        }
    }

    /// Mark a certificate revoked
    pub fn revoke(&self, owner: &str, serial: &str) -> bool {
        self.set_state(owner, serial, CertificateState::Revoked)
    }

    /// Number of registered certificates
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry holds no certificates
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CertificateRegistry for MemoryRegistry {
    async fn lookup_certificates(&self, filter: &CertificateFilter) -> Result<Vec<CertificateRecord>> {
        let records = self
            .records
            .iter()
            .filter(|entry| {
                let record = entry.value();
                record.owner == filter.owner
                    && record.serial == filter.serial
                    && record.state == filter.state
            })
            .map(|entry| entry.value().clone())
            .collect();
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(owner: &str, serial: &str, state: CertificateState) -> CertificateRecord {
        CertificateRecord {
            owner: owner.to_string(),
            serial: serial.to_string(),
            state,
        }
    }

    fn filter(owner: &str, serial: &str) -> CertificateFilter {
        CertificateFilter {
            owner: owner.to_string(),
            serial: serial.to_string(),
            state: CertificateState::Valid,
        }
    }

    #[tokio::test]
    async fn test_lookup_filters_by_owner_serial_and_state() -> Result<()> {
        let registry = MemoryRegistry::new();
        registry.insert(record("alice", "1", CertificateState::Valid));
        registry.insert(record("alice", "2", CertificateState::Expired));
        registry.insert(record("bob", "1", CertificateState::Valid));

        let found = registry.lookup_certificates(&filter("alice", "1")).await?;
        assert_eq!(found, vec![record("alice", "1", CertificateState::Valid)]);

        assert!(registry.lookup_certificates(&filter("alice", "2")).await?.is_empty());
        assert!(registry.lookup_certificates(&filter("carol", "1")).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_revoke_hides_record_from_valid_lookup() -> Result<()> {
        let registry = MemoryRegistry::new();
        registry.insert(record("alice", "1", CertificateState::Valid));

        assert!(registry.revoke("alice", "1"));
        assert!(!registry.revoke("alice", "9"));
        assert!(registry.lookup_certificates(&filter("alice", "1")).await?.is_empty());
        assert_eq!(registry.len(), 1);
        Ok(())
    }

    #[test]
    fn test_state_names() {
        assert_eq!(CertificateState::Valid.to_string(), "valid");
        assert_eq!(CertificateState::Revoked.as_str(), "revoked");
        assert!(record("a", "1", CertificateState::Expired).is_state(CertificateState::Expired));
    }
}
