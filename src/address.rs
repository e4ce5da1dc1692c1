//! 20-byte account addresses and their EIP-55 checksum rendering.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Length of an account address in bytes.
pub const ADDRESS_LENGTH: usize = 20;

/// Keccak-256 digest helper shared by address derivation and checksumming.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// An account address derived from the last 20 bytes of `keccak256(pubkey)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// Wraps raw address bytes.
    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Derives the address for an uncompressed public key (64 bytes, no `0x04` tag).
    pub fn from_public_key(public_key: &[u8; 64]) -> Self {
        let digest = keccak256(public_key);
        let mut out = [0u8; ADDRESS_LENGTH];
        out.copy_from_slice(&digest[12..]);
        Self(out)
    }

    /// Builds an address from a slice, failing unless it is exactly 20 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; ADDRESS_LENGTH] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Lowercase hex without a `0x` prefix, the form genesis `alloc` keys use.
    pub fn to_plain_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// EIP-55 mixed-case rendering with a `0x` prefix.
    pub fn to_checksum(&self) -> String {
        let lower = self.to_plain_hex();
        let hash = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(2 + lower.len());
        out.push_str("0x");
        for (idx, ch) in lower.chars().enumerate() {
            let nibble = if idx % 2 == 0 {
                hash[idx / 2] >> 4
            } else {
                hash[idx / 2] & 0x0f
            };
            if ch.is_ascii_alphabetic() && nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

/// Failure to parse an address from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParseError(String);

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid address: {}", self.0)
    }
}

impl std::error::Error for AddressParseError {}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Accepts hex with or without `0x`. Checksum casing is not enforced.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let raw = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(raw).map_err(|err| AddressParseError(err.to_string()))?;
        Self::from_slice(&bytes)
            .ok_or_else(|| AddressParseError(format!("expected 20 bytes, found {}", bytes.len())))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn checksum_matches_eip55_vectors() {
        for expected in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
        ] {
            let parsed: Address = expected.to_lowercase().parse().unwrap();
            assert_eq!(parsed.to_checksum(), expected);
        }
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!("0x1234".parse::<Address>().is_err());
        assert!("zz".parse::<Address>().is_err());
    }

    #[test]
    fn plain_hex_is_lowercase_without_prefix() {
        let addr: Address = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".parse().unwrap();
        assert_eq!(addr.to_plain_hex(), "5aaeb6053f3e94c9b9a09f33669435e7ef1beaed");
    }

    proptest! {
        #[test]
        fn checksum_parses_back_and_only_changes_case(bytes in any::<[u8; 20]>()) {
            let address = Address::new(bytes);
            let checksum = address.to_checksum();
            prop_assert_eq!(checksum.parse::<Address>().unwrap(), address);
            prop_assert_eq!(checksum.to_lowercase(), format!("0x{}", address.to_plain_hex()));
        }

        #[test]
        fn ordering_follows_plain_hex(a in any::<[u8; 20]>(), b in any::<[u8; 20]>()) {
            let (a, b) = (Address::new(a), Address::new(b));
            prop_assert_eq!(a.cmp(&b), a.to_plain_hex().cmp(&b.to_plain_hex()));
        }
    }
}
