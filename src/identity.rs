//! Account addresses carried in certificate common names
//!
//! A client certificate names its owner by account address: the bech32
//! encoding of the account's address bytes under a chain-specific
//! human-readable prefix (for example `akash1...`).

use std::fmt;

use bech32::primitives::decode::CheckedHrpstring;
use bech32::{Bech32, Hrp};
use thiserror::Error;

/// Longest address payload accepted, in bytes
pub const MAX_ADDRESS_LEN: usize = 255;

/// Reasons a common name is not a usable account address
#[derive(Debug, Error)]
pub enum AddressError {
    /// Blank input
    #[error("empty address string is not allowed")]
    Empty,

    /// Not valid bech32
    #[error("decoding bech32 failed: {0}")]
    Encoding(String),

    /// Human-readable part differs from the configured prefix
    #[error("invalid bech32 prefix: expected {expected}, got {actual}")]
    Prefix {
        /// Configured prefix
        expected: String,
        /// Prefix found in the input
        actual: String,
    },

    /// Payload empty or too long
    #[error("address length must be between 1 and {MAX_ADDRESS_LEN} bytes, got {0}")]
    Length(usize),
}

/// Decoded account address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountAddress {
    prefix: String,
    bytes: Vec<u8>,
}

impl AccountAddress {
    /// Parse `text` as a bech32 account address under `prefix`
    pub fn parse(text: &str, prefix: &str) -> Result<Self, AddressError> {
        if text.trim().is_empty() {
            return Err(AddressError::Empty);
        }

        let checked = CheckedHrpstring::new::<Bech32>(text)
            .map_err(|e| AddressError::Encoding(e.to_string()))?;

        let hrp = checked.hrp();
        if hrp.to_lowercase() != prefix.to_ascii_lowercase() {
            return Err(AddressError::Prefix {
                expected: prefix.to_string(),
                actual: hrp.to_lowercase(),
            });
        }

        let bytes: Vec<u8> = checked.byte_iter().collect();
        if bytes.is_empty() || bytes.len() > MAX_ADDRESS_LEN {
            return Err(AddressError::Length(bytes.len()));
        }

        Ok(Self { prefix: hrp.to_lowercase(), bytes })
    }

    /// Build an address from raw bytes
    pub fn from_bytes(prefix: &str, bytes: &[u8]) -> Result<Self, AddressError> {
        if bytes.is_empty() || bytes.len() > MAX_ADDRESS_LEN {
            return Err(AddressError::Length(bytes.len()));
        }
        let hrp = Hrp::parse(prefix).map_err(|e| AddressError::Encoding(e.to_string()))?;
        Ok(Self { prefix: hrp.to_lowercase(), bytes: bytes.to_vec() })
    }

    /// Raw address bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Human-readable prefix, lower case
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // bech32::encode always emits lower case, the form the registry stores.
        let hrp = Hrp::parse(&self.prefix).map_err(|_| fmt::Error)?;
        let encoded = bech32::encode::<Bech32>(hrp, &self.bytes).map_err(|_| fmt::Error)?;
        f.write_str(&encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(prefix: &str) -> String {
        AccountAddress::from_bytes(prefix, &[7u8; 20]).unwrap().to_string()
    }

    #[test]
    fn test_parse_round_trips_canonical_form() {
        let text = sample("akash");
        assert!(text.starts_with("akash1"));

        let address = AccountAddress::parse(&text, "akash").unwrap();
        assert_eq!(address.as_bytes(), &[7u8; 20]);
        assert_eq!(address.to_string(), text);
        assert_eq!(address.prefix(), "akash");
    }

    #[test]
    fn test_upper_case_input_is_canonicalized() {
        let text = sample("akash");
        let address = AccountAddress::parse(&text.to_uppercase(), "akash").unwrap();
        assert_eq!(address.to_string(), text);
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(AccountAddress::parse("", "akash"), Err(AddressError::Empty)));
        assert!(matches!(AccountAddress::parse("   ", "akash"), Err(AddressError::Empty)));
    }

    #[test]
    fn test_rejects_wrong_prefix() {
        let text = sample("cosmos");
        let err = AccountAddress::parse(&text, "akash").unwrap_err();
        assert!(matches!(err, AddressError::Prefix { .. }));
    }

    #[test]
    fn test_rejects_bad_checksum() {
        let mut text = sample("akash");
        let last = text.pop().unwrap();
        text.push(if last == 'q' { 'p' } else { 'q' });
        assert!(matches!(
            AccountAddress::parse(&text, "akash"),
            Err(AddressError::Encoding(_))
        ));
    }

    #[test]
    fn test_rejects_plain_text() {
        assert!(AccountAddress::parse("provider.example.com", "akash").is_err());
    }
}
