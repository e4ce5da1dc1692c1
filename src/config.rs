//! Immutable network configuration consumed by the pipeline.
//!
//! Values come from an optional JSON file and are then overridden by CLI
//! flags. Every field has a default, so an empty object `{}` describes the
//! stock four-validator, one-RPC-node network.

use crate::consensus::ConsensusAlgorithm;
use crate::descriptor::ServiceTemplate;
use crate::extra_data::MAX_GENESIS_VALIDATORS;
use crate::genesis::{Balance, ChainParams};
use crate::topology::EndpointEntry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {message}")]
    /// The file could not be read.
    Io {
        /// Offending path.
        path: String,
        /// I/O error text.
        message: String,
    },
    #[error("invalid config: {0}")]
    /// The file is not valid JSON for [`NetworkConfig`].
    Parse(String),
    #[error("invalid {field}: {reason}")]
    /// A value is out of range.
    Invalid {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Full description of the network to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Number of validators.
    pub validators: usize,
    /// Number of RPC-only observer nodes.
    pub observers: usize,
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// BFT family.
    pub consensus: ConsensusAlgorithm,
    /// Target block period.
    pub block_period_seconds: u64,
    /// Balance allocated to each validator.
    pub initial_balance: Balance,
    /// Node index → host table; validators first, then observers.
    pub endpoints: Vec<EndpointEntry>,
    /// Structural genesis constants.
    pub chain: ChainParams,
    /// Manifest template.
    pub service: ServiceTemplate,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            validators: 4,
            observers: 1,
            chain_id: 1337,
            consensus: ConsensusAlgorithm::Ibft2,
            block_period_seconds: 2,
            initial_balance: Balance(1u128 << 84),
            endpoints: (11..=15)
                .map(|octet| EndpointEntry::new(format!("192.168.1.{octet}")))
                .collect(),
            chain: ChainParams::default(),
            service: ServiceTemplate::default(),
        }
    }
}

impl NetworkConfig {
    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_json(&contents)
    }

    /// Parses a JSON config document.
    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validators plus observers.
    pub fn total_nodes(&self) -> usize {
        self.validators + self.observers
    }

    /// Rejects values no network can start with. The endpoint table length is
    /// checked when the topology is bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validators == 0 {
            return Err(ConfigError::Invalid {
                field: "validators",
                reason: "at least one validator is required".to_string(),
            });
        }
        if self.validators > MAX_GENESIS_VALIDATORS {
            return Err(ConfigError::Invalid {
                field: "validators",
                reason: format!(
                    "{} exceeds the genesis limit of {MAX_GENESIS_VALIDATORS}",
                    self.validators
                ),
            });
        }
        if self.block_period_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "block_period_seconds",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.service.image.is_empty()
            || self
                .service
                .image
                .chars()
                .any(|ch| ch.is_whitespace() || ch.is_control())
        {
            return Err(ConfigError::Invalid {
                field: "service.image",
                reason: format!("'{}' is not an image reference", self.service.image),
            });
        }
        for entry in &self.endpoints {
            if entry.authority().parse::<EndpointEntry>().as_ref() != Ok(entry) {
                return Err(ConfigError::Invalid {
                    field: "endpoints",
                    reason: format!("'{}' is not a host name or IP address", entry.host),
                });
            }
        }
        Ok(())
    }
}
