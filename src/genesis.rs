//! Genesis descriptor assembly for BFT networks.
//!
//! The descriptor serializes to the genesis JSON schema node software reads.
//! `alloc` keeps validator index order so that the cross-reference check
//! against the decoded `extraData` is positional, not set-based.

use crate::address::Address;
use crate::consensus::ConsensusAlgorithm;
use crate::extra_data::{self, EncodingError};
use crate::identity::ValidatorIdentity;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

/// mixHash identifying BFT block hashing ("ctical byzantine fault tolerance").
pub const BFT_MIX_HASH: &str = "0x63746963616c2062797a616e74696e65206661756c7420746f6c6572616e6365";

/// Errors raised while assembling or auditing a genesis descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenesisError {
    #[error("block period must be at least one second")]
    /// `block_period_seconds` was zero.
    ZeroBlockPeriod,
    #[error(transparent)]
    /// The validator list could not be encoded or decoded.
    Encoding(#[from] EncodingError),
    #[error("alloc and extraData disagree: {0}")]
    /// `alloc` does not list the same validators, in order, as `extraData`.
    CrossReference(String),
    #[error("invalid balance '{0}'")]
    /// A balance was not hex or decimal, or overflowed 128 bits.
    InvalidBalance(String),
    #[error("genesis config names no ibft2 or qbft parameter block")]
    /// The consensus parameter block is missing or ambiguous.
    MissingConsensus,
}

/// Account balance in wei. Serialized as `0x` hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Balance(pub u128);

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl FromStr for Balance {
    type Err = GenesisError;

    /// Accepts `0x` hex or plain decimal.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u128::from_str_radix(hex, 16),
            None => trimmed.parse::<u128>(),
        };
        parsed
            .map(Balance)
            .map_err(|_| GenesisError::InvalidBalance(trimmed.to_string()))
    }
}

impl Serialize for Balance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Balance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A single `alloc` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Initial balance.
    pub balance: Balance,
}

/// Ordered `alloc` map, serialized as a JSON object keyed by lowercase
/// un-prefixed address.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Allocations(Vec<(Address, Allocation)>);

impl Allocations {
    /// Appends an entry, keeping insertion order.
    pub fn push(&mut self, address: Address, allocation: Allocation) {
        self.0.push((address, allocation));
    }

    /// Number of funded accounts.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no account is funded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Funded addresses in order.
    pub fn addresses(&self) -> Vec<Address> {
        self.0.iter().map(|(address, _)| *address).collect()
    }

    /// Iterates `(address, allocation)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = &(Address, Allocation)> {
        self.0.iter()
    }

    /// Balance allocated to `address`, if any.
    pub fn balance_of(&self, address: &Address) -> Option<Balance> {
        self.0
            .iter()
            .find(|(candidate, _)| candidate == address)
            .map(|(_, allocation)| allocation.balance)
    }
}

impl Serialize for Allocations {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (address, allocation) in &self.0 {
            map.serialize_entry(&address.to_plain_hex(), allocation)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Allocations {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AllocVisitor;

        impl<'de> Visitor<'de> for AllocVisitor {
            type Value = Allocations;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of address to {balance}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Allocations::default();
                while let Some((key, allocation)) = access.next_entry::<String, Allocation>()? {
                    let address = key.parse().map_err(serde::de::Error::custom)?;
                    out.push(address, allocation);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(AllocVisitor)
    }
}

/// Consensus parameter block under `config.ibft2` / `config.qbft`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BftParams {
    /// Target seconds between blocks.
    #[serde(rename = "blockperiodseconds")]
    pub block_period_seconds: u64,
    /// Blocks per epoch, after which pending votes reset.
    #[serde(rename = "epochlength")]
    pub epoch_length: u64,
    /// Round timeout in seconds.
    #[serde(rename = "requesttimeoutseconds")]
    pub request_timeout_seconds: u64,
}

/// The genesis `config` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Berlin activation block.
    pub berlin_block: u64,
    /// London activation block.
    pub london_block: u64,
    /// Shanghai activation timestamp.
    pub shanghai_time: u64,
    /// Free gas network flag.
    pub zero_base_fee: bool,
    /// IBFT 2.0 parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ibft2: Option<BftParams>,
    /// QBFT parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qbft: Option<BftParams>,
}

impl ChainConfig {
    /// The consensus family whose parameter block is present.
    pub fn algorithm(&self) -> Option<ConsensusAlgorithm> {
        match (&self.ibft2, &self.qbft) {
            (Some(_), None) => Some(ConsensusAlgorithm::Ibft2),
            (None, Some(_)) => Some(ConsensusAlgorithm::Qbft),
            _ => None,
        }
    }

    /// Parameters of the active consensus family.
    pub fn bft_params(&self) -> Option<&BftParams> {
        self.ibft2.as_ref().or(self.qbft.as_ref())
    }
}

/// Structural chain constants. Defaults match a zero-fee BFT network with
/// every fork active from block 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainParams {
    /// Berlin activation block.
    pub berlin_block: u64,
    /// London activation block.
    pub london_block: u64,
    /// Shanghai activation timestamp.
    pub shanghai_time: u64,
    /// Free gas network flag.
    pub zero_base_fee: bool,
    /// Blocks per epoch.
    pub epoch_length: u64,
    /// Round timeout in seconds.
    pub request_timeout_seconds: u64,
    /// Block gas limit ceiling.
    pub gas_limit: String,
    /// Header difficulty.
    pub difficulty: String,
    /// BFT mixHash.
    pub mix_hash: String,
    /// Genesis coinbase.
    pub coinbase: String,
    /// Genesis timestamp.
    pub timestamp: String,
    /// Genesis nonce.
    pub nonce: String,
    /// Maximum deployed contract size.
    pub contract_size_limit: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            berlin_block: 0,
            london_block: 0,
            shanghai_time: 0,
            zero_base_fee: true,
            epoch_length: 30_000,
            request_timeout_seconds: 4,
            gas_limit: "0x1FFFFFFFFFFFFF".to_string(),
            difficulty: "0x1".to_string(),
            mix_hash: BFT_MIX_HASH.to_string(),
            coinbase: "0x0000000000000000000000000000000000000000".to_string(),
            timestamp: "0x58ee40ba".to_string(),
            nonce: "0x0".to_string(),
            contract_size_limit: 99_999_999_999,
        }
    }
}

/// Complete genesis file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenesisDescriptor {
    /// Chain configuration.
    pub config: ChainConfig,
    /// Header nonce.
    pub nonce: String,
    /// Header timestamp.
    pub timestamp: String,
    /// Header gas limit.
    pub gas_limit: String,
    /// Header difficulty.
    pub difficulty: String,
    /// Maximum deployed contract size.
    pub contract_size_limit: u64,
    /// Header mixHash.
    pub mix_hash: String,
    /// Header coinbase.
    pub coinbase: String,
    /// Initial balances, one per validator in index order.
    pub alloc: Allocations,
    /// `0x`-hex RLP extension field carrying the validator set.
    pub extra_data: String,
}

impl GenesisDescriptor {
    /// Consensus family named by `config`.
    pub fn algorithm(&self) -> Result<ConsensusAlgorithm, GenesisError> {
        self.config.algorithm().ok_or(GenesisError::MissingConsensus)
    }

    /// Validator set decoded from `extraData`.
    pub fn validators(&self) -> Result<Vec<Address>, GenesisError> {
        let bytes = extra_data::from_hex(&self.extra_data)?;
        Ok(extra_data::decode_validators(self.algorithm()?, &bytes)?)
    }

    /// Checks that `alloc` lists exactly the `extraData` validators in the same order.
    pub fn verify_cross_reference(&self) -> Result<(), GenesisError> {
        let encoded = self.validators()?;
        let allocated = self.alloc.addresses();
        if encoded.len() != allocated.len() {
            return Err(GenesisError::CrossReference(format!(
                "{} allocations but {} validators in extraData",
                allocated.len(),
                encoded.len()
            )));
        }
        for (position, (alloc, header)) in allocated.iter().zip(&encoded).enumerate() {
            if alloc != header {
                return Err(GenesisError::CrossReference(format!(
                    "position {position}: alloc has {alloc}, extraData has {header}"
                )));
            }
        }
        Ok(())
    }
}

/// Assembles the genesis descriptor and verifies its cross-references.
pub fn build(
    identities: &[ValidatorIdentity],
    algorithm: ConsensusAlgorithm,
    chain_id: u64,
    block_period_seconds: u64,
    initial_balance: Balance,
    params: &ChainParams,
) -> Result<GenesisDescriptor, GenesisError> {
    if block_period_seconds == 0 {
        return Err(GenesisError::ZeroBlockPeriod);
    }

    let mut alloc = Allocations::default();
    for identity in identities {
        alloc.push(
            identity.address,
            Allocation {
                balance: initial_balance,
            },
        );
    }
    let addresses = alloc.addresses();
    let extra = extra_data::encode(algorithm, &addresses)?;

    let bft = BftParams {
        block_period_seconds,
        epoch_length: params.epoch_length,
        request_timeout_seconds: params.request_timeout_seconds,
    };
    let (ibft2, qbft) = match algorithm {
        ConsensusAlgorithm::Ibft2 => (Some(bft), None),
        ConsensusAlgorithm::Qbft => (None, Some(bft)),
    };

    let genesis = GenesisDescriptor {
        config: ChainConfig {
            chain_id,
            berlin_block: params.berlin_block,
            london_block: params.london_block,
            shanghai_time: params.shanghai_time,
            zero_base_fee: params.zero_base_fee,
            ibft2,
            qbft,
        },
        nonce: params.nonce.clone(),
        timestamp: params.timestamp.clone(),
        gas_limit: params.gas_limit.clone(),
        difficulty: params.difficulty.clone(),
        contract_size_limit: params.contract_size_limit,
        mix_hash: params.mix_hash.clone(),
        coinbase: params.coinbase.clone(),
        alloc,
        extra_data: extra_data::to_hex(&extra),
    };
    genesis.verify_cross_reference()?;

    info!(
        consensus = %algorithm,
        chain_id,
        validators = addresses.len(),
        extra_data_bytes = extra.len(),
        "genesis assembled"
    );
    Ok(genesis)
}
