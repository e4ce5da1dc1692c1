//! Validator identity synthesis on secp256k1.
//!
//! Every identity is drawn fresh from the caller's random source; nothing is
//! derived from configuration, so two runs never share a validator set.

use crate::address::Address;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::SecretKey;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Length of a secp256k1 secret scalar.
pub const PRIVATE_KEY_LENGTH: usize = 32;
/// Length of an uncompressed public key without the SEC1 `0x04` tag.
pub const PUBLIC_KEY_LENGTH: usize = 64;

/// Redraws allowed before a source that keeps yielding invalid scalars is
/// treated as broken. A healthy source needs more than one draw with
/// probability below 2^-127.
const MAX_KEY_DRAWS: usize = 64;

/// Errors raised while synthesizing validator identities.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("validator count must be at least 1")]
    /// `generate` was called with a zero count.
    ZeroCount,
    #[error("random source failed: {0}")]
    /// The random source refused to produce bytes.
    Entropy(String),
    #[error("random source produced {attempts} invalid secp256k1 scalars in a row")]
    /// Every draw was zero or above the curve order.
    KeyRejected {
        /// Number of draws attempted.
        attempts: usize,
    },
    #[error("invalid private key: {0}")]
    /// Supplied key bytes are not a valid secp256k1 scalar.
    InvalidPrivateKey(String),
}

/// Secret scalar bytes. `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey([u8; PRIVATE_KEY_LENGTH]);

impl PrivateKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; PRIVATE_KEY_LENGTH] {
        &self.0
    }

    /// Lowercase hex without prefix, the format node software reads from its key file.
    pub fn to_plain_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Uncompressed public key, `x || y`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey([u8; PUBLIC_KEY_LENGTH]);

impl PublicKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.0
    }

    /// Lowercase hex without prefix, as embedded in enode URIs.
    pub fn to_plain_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Lowercase hex with a `0x` prefix.
    pub fn to_prefixed_hex(&self) -> String {
        format!("0x{}", self.to_plain_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_prefixed_hex())
    }
}

/// A validator slot's keypair and derived address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorIdentity {
    /// 1-based validator index.
    pub index: usize,
    /// Address derived from `public_key`.
    pub address: Address,
    /// Secret scalar.
    pub private_key: PrivateKey,
    /// Uncompressed public key.
    pub public_key: PublicKey,
}

impl ValidatorIdentity {
    /// Rebuilds an identity from known secret bytes.
    pub fn from_private_key(
        index: usize,
        bytes: [u8; PRIVATE_KEY_LENGTH],
    ) -> Result<Self, IdentityError> {
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|err| IdentityError::InvalidPrivateKey(err.to_string()))?;
        Ok(Self::from_secret(index, &secret))
    }

    fn from_secret(index: usize, secret: &SecretKey) -> Self {
        let point = secret.public_key().to_encoded_point(false);
        let mut public = [0u8; PUBLIC_KEY_LENGTH];
        // SEC1 uncompressed encoding is 0x04 || x || y.
        public.copy_from_slice(&point.as_bytes()[1..]);
        let private: [u8; PRIVATE_KEY_LENGTH] = secret.to_bytes().into();
        Self {
            index,
            address: Address::from_public_key(&public),
            private_key: PrivateKey(private),
            public_key: PublicKey(public),
        }
    }

    /// Operator-facing record used by the `validators.json` summary.
    pub fn record(&self) -> IdentityRecord {
        IdentityRecord {
            index: self.index,
            address: self.address,
            private_key: format!("0x{}", self.private_key.to_plain_hex()),
            public_key: self.public_key.to_prefixed_hex(),
        }
    }
}

/// Serialized identity entry. Holds raw key material; treat the file as a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// 1-based validator index.
    pub index: usize,
    /// Checksummed address.
    pub address: Address,
    /// `0x`-prefixed private key.
    pub private_key: String,
    /// `0x`-prefixed uncompressed public key.
    pub public_key: String,
}

/// Generates `count` identities with indices `1..=count`.
pub fn generate<R>(count: usize, rng: &mut R) -> Result<Vec<ValidatorIdentity>, IdentityError>
where
    R: RngCore + CryptoRng,
{
    if count == 0 {
        return Err(IdentityError::ZeroCount);
    }
    (1..=count)
        .map(|index| {
            let secret = draw_secret(rng)?;
            let identity = ValidatorIdentity::from_secret(index, &secret);
            debug!(index, address = %identity.address, "validator identity generated");
            Ok(identity)
        })
        .collect()
}

fn draw_secret<R>(rng: &mut R) -> Result<SecretKey, IdentityError>
where
    R: RngCore + CryptoRng,
{
    let mut bytes = [0u8; PRIVATE_KEY_LENGTH];
    for _ in 0..MAX_KEY_DRAWS {
        rng.try_fill_bytes(&mut bytes)
            .map_err(|err| IdentityError::Entropy(err.to_string()))?;
        // Rejects zero and values at or above the group order.
        if let Ok(secret) = SecretKey::from_slice(&bytes) {
            return Ok(secret);
        }
    }
    Err(IdentityError::KeyRejected {
        attempts: MAX_KEY_DRAWS,
    })
}
