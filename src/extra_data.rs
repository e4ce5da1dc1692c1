//! RLP codec for the BFT genesis `extraData` field.
//!
//! The field is a five-item RLP list:
//!
//! ```text
//! [ vanity: 32 zero bytes, [validator address; N], vote, round, seals ]
//! ```
//!
//! At genesis there is no pending vote and no committed seal. The two BFT
//! families spell "nothing" differently:
//!
//! | field | IBFT 2.0                       | QBFT                  |
//! |-------|--------------------------------|-----------------------|
//! | vote  | empty string `0x80`            | empty list `0xc0`     |
//! | round | 4-byte big-endian `0x84000000` | integer scalar `0x80` |
//! | seals | empty list `0xc0`              | empty list `0xc0`     |
//!
//! Seals are genesis-only here: the decoder rejects headers that carry any,
//! since this codec is not meant for post-genesis blocks.

use crate::address::Address;
use crate::consensus::ConsensusAlgorithm;
use rlp::{DecoderError, Rlp, RlpStream};
use thiserror::Error;

/// Length of the vanity prefix.
pub const VANITY_LENGTH: usize = 32;
/// Largest validator set accepted at genesis.
pub const MAX_GENESIS_VALIDATORS: usize = 127;
/// Width of the IBFT 2.0 round field.
const IBFT2_ROUND_LENGTH: usize = 4;
/// Items in the top-level list.
const FIELD_COUNT: usize = 5;

/// Errors raised while encoding or decoding `extraData`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("validator list is empty")]
    /// No validators were supplied (or decoded).
    Empty,
    #[error("{count} validators exceed the genesis limit of {max}")]
    /// Too many validators for a genesis header.
    TooManyValidators {
        /// Supplied validator count.
        count: usize,
        /// Accepted maximum.
        max: usize,
    },
    #[error("invalid extraData hex: {0}")]
    /// Input text was not `0x`-prefixed hex.
    Hex(String),
    #[error("malformed extraData RLP: {0}")]
    /// Structural RLP failure.
    Rlp(String),
    #[error("extraData has {0} trailing bytes after the RLP list")]
    /// Bytes remained after the top-level list.
    TrailingBytes(usize),
    #[error("extraData list has {0} items, expected 5")]
    /// Wrong top-level item count.
    FieldCount(usize),
    #[error("vanity is {0} bytes, expected 32")]
    /// Vanity prefix has the wrong length.
    InvalidVanity(usize),
    #[error("validator {position} is {len} bytes, expected 20")]
    /// A validator entry is not an address.
    InvalidAddress {
        /// 0-based position in the list.
        position: usize,
        /// Observed length.
        len: usize,
    },
    #[error("unexpected vote field for {0}")]
    /// The vote field is present or has the other family's shape.
    UnexpectedVote(ConsensusAlgorithm),
    #[error("invalid round field for {0}")]
    /// The round field has the wrong width.
    InvalidRound(ConsensusAlgorithm),
    #[error("genesis extraData must not carry seals")]
    /// The seal list is not empty.
    NonEmptySeals,
}

impl From<DecoderError> for EncodingError {
    fn from(err: DecoderError) -> Self {
        Self::Rlp(err.to_string())
    }
}

/// Decoded view of a genesis `extraData` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraData {
    /// 32-byte vanity prefix.
    pub vanity: [u8; VANITY_LENGTH],
    /// Validators in header order.
    pub validators: Vec<Address>,
    /// Consensus round.
    pub round: u32,
}

/// Encodes a genesis `extraData` value for `validators`, preserving their order.
pub fn encode(
    algorithm: ConsensusAlgorithm,
    validators: &[Address],
) -> Result<Vec<u8>, EncodingError> {
    if validators.is_empty() {
        return Err(EncodingError::Empty);
    }
    if validators.len() > MAX_GENESIS_VALIDATORS {
        return Err(EncodingError::TooManyValidators {
            count: validators.len(),
            max: MAX_GENESIS_VALIDATORS,
        });
    }

    let mut stream = RlpStream::new_list(FIELD_COUNT);
    let vanity: &[u8] = &[0u8; VANITY_LENGTH];
    stream.append(&vanity);
    stream.begin_list(validators.len());
    for address in validators {
        let raw: &[u8] = address.as_bytes();
        stream.append(&raw);
    }
    match algorithm {
        ConsensusAlgorithm::Ibft2 => {
            let round: &[u8] = &[0u8; IBFT2_ROUND_LENGTH];
            stream.append_empty_data();
            stream.append(&round);
        }
        ConsensusAlgorithm::Qbft => {
            stream.begin_list(0);
            stream.append(&0u32);
        }
    }
    stream.begin_list(0);
    Ok(stream.out().to_vec())
}

/// Decodes a genesis `extraData` value produced for `algorithm`.
pub fn decode(algorithm: ConsensusAlgorithm, bytes: &[u8]) -> Result<ExtraData, EncodingError> {
    let rlp = Rlp::new(bytes);
    if !rlp.is_list() {
        return Err(EncodingError::Rlp("extraData is not an RLP list".to_string()));
    }
    let total = rlp.payload_info()?.total();
    if total != bytes.len() {
        return Err(EncodingError::TrailingBytes(bytes.len().saturating_sub(total)));
    }
    let items = rlp.item_count()?;
    if items != FIELD_COUNT {
        return Err(EncodingError::FieldCount(items));
    }

    let vanity_raw = rlp.at(0)?.data()?;
    let vanity: [u8; VANITY_LENGTH] = vanity_raw
        .try_into()
        .map_err(|_| EncodingError::InvalidVanity(vanity_raw.len()))?;

    let list = rlp.at(1)?;
    if !list.is_list() {
        return Err(EncodingError::Rlp("validator field is not a list".to_string()));
    }
    let count = list.item_count()?;
    if count == 0 {
        return Err(EncodingError::Empty);
    }
    let mut validators = Vec::with_capacity(count);
    for position in 0..count {
        let raw = list.at(position)?.data()?;
        let address = Address::from_slice(raw).ok_or(EncodingError::InvalidAddress {
            position,
            len: raw.len(),
        })?;
        validators.push(address);
    }

    let vote = rlp.at(2)?;
    let round_item = rlp.at(3)?;
    let round = match algorithm {
        ConsensusAlgorithm::Ibft2 => {
            if !(vote.is_data() && vote.is_empty()) {
                return Err(EncodingError::UnexpectedVote(algorithm));
            }
            let raw = round_item.data()?;
            let fixed: [u8; IBFT2_ROUND_LENGTH] = raw
                .try_into()
                .map_err(|_| EncodingError::InvalidRound(algorithm))?;
            u32::from_be_bytes(fixed)
        }
        ConsensusAlgorithm::Qbft => {
            if !(vote.is_list() && vote.is_empty()) {
                return Err(EncodingError::UnexpectedVote(algorithm));
            }
            round_item
                .as_val::<u32>()
                .map_err(|_| EncodingError::InvalidRound(algorithm))?
        }
    };

    let seals = rlp.at(4)?;
    if !seals.is_list() || seals.item_count()? != 0 {
        return Err(EncodingError::NonEmptySeals);
    }

    Ok(ExtraData {
        vanity,
        validators,
        round,
    })
}

/// Decodes and returns only the validator list.
pub fn decode_validators(
    algorithm: ConsensusAlgorithm,
    bytes: &[u8],
) -> Result<Vec<Address>, EncodingError> {
    decode(algorithm, bytes).map(|extra| extra.validators)
}

/// Renders bytes as `0x`-prefixed lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Parses `0x`-prefixed hex.
pub fn from_hex(input: &str) -> Result<Vec<u8>, EncodingError> {
    let trimmed = input.trim();
    let raw = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| EncodingError::Hex("missing 0x prefix".to_string()))?;
    hex::decode(raw).map_err(|err| EncodingError::Hex(err.to_string()))
}
