//! BFT consensus families supported by the genesis generator.
//!
//! IBFT 2.0 and QBFT share the genesis layout (same mixHash, same consensus
//! parameter block) but differ in the key under `config`, in the RPC API
//! namespace they expose, and in the wire shape of the `extraData` vote and
//! round fields.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Consensus algorithm selected for the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusAlgorithm {
    /// IBFT 2.0.
    #[default]
    Ibft2,
    /// QBFT.
    Qbft,
}

impl ConsensusAlgorithm {
    /// Key used for the consensus parameter block inside genesis `config`.
    pub fn genesis_key(self) -> &'static str {
        match self {
            Self::Ibft2 => "ibft2",
            Self::Qbft => "qbft",
        }
    }

    /// JSON-RPC API namespace enabled on every node.
    pub fn rpc_api(self) -> &'static str {
        match self {
            Self::Ibft2 => "IBFT",
            Self::Qbft => "QBFT",
        }
    }
}

impl fmt::Display for ConsensusAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.genesis_key())
    }
}

impl FromStr for ConsensusAlgorithm {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ibft2" | "ibft" => Ok(Self::Ibft2),
            "qbft" => Ok(Self::Qbft),
            other => Err(format!(
                "invalid consensus '{other}' (expected ibft2|qbft)"
            )),
        }
    }
}
