//! End-to-end generation: identities → topology → genesis → descriptors.
//!
//! Each stage consumes only the finished output of the stages before it.
//! Nothing touches the filesystem here; the result is handed to
//! [`write_network`](crate::writer::write_network) once every stage succeeded.

use crate::address::Address;
use crate::config::NetworkConfig;
use crate::consensus::ConsensusAlgorithm;
use crate::descriptor::{self, DeploymentDescriptor};
use crate::error::ForgeError;
use crate::genesis::{self, GenesisDescriptor};
use crate::identity::{self, ValidatorIdentity};
use crate::layout::{node_name, ArtifactLayout};
use crate::topology::{self, Topology};
use rand::{CryptoRng, RngCore};
use std::fmt::Write as _;
use tracing::info;

/// Address of secp256k1 private key `1`.
const KNOWN_KEY_ONE_ADDRESS: &str = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf";

/// Everything one run produces, before persistence.
#[derive(Debug, Clone)]
pub struct NetworkArtifacts {
    /// Consensus family the genesis was built for.
    pub consensus: ConsensusAlgorithm,
    /// Validator identities in index order.
    pub identities: Vec<ValidatorIdentity>,
    /// Bound endpoints and bootstrap designation.
    pub topology: Topology,
    /// Shared genesis.
    pub genesis: GenesisDescriptor,
    /// One descriptor per node.
    pub descriptors: Vec<DeploymentDescriptor>,
}

impl NetworkArtifacts {
    /// Validator addresses in index order.
    pub fn validator_addresses(&self) -> Vec<Address> {
        self.identities.iter().map(|v| v.address).collect()
    }
}

/// Verifies the random source and the secp256k1 backend before any key is drawn.
pub fn self_check<R>(rng: &mut R) -> Result<(), ForgeError>
where
    R: RngCore + CryptoRng,
{
    let mut sample = [0u8; 32];
    rng.try_fill_bytes(&mut sample)
        .map_err(|err| ForgeError::DependencyMissing(format!("secure random source: {err}")))?;

    let mut key_one = [0u8; 32];
    key_one[31] = 1;
    let derived = ValidatorIdentity::from_private_key(0, key_one)
        .map_err(|err| ForgeError::DependencyMissing(format!("secp256k1 backend: {err}")))?;
    if derived.address.to_checksum() != KNOWN_KEY_ONE_ADDRESS {
        return Err(ForgeError::DependencyMissing(format!(
            "secp256k1/keccak known-answer test derived {}",
            derived.address
        )));
    }
    Ok(())
}

/// Runs every stage for `config`. Fails without side effects.
pub fn generate_network<R>(
    config: &NetworkConfig,
    layout: &ArtifactLayout,
    rng: &mut R,
) -> Result<NetworkArtifacts, ForgeError>
where
    R: RngCore + CryptoRng,
{
    self_check(rng)?;
    config.validate()?;
    info!(
        validators = config.validators,
        observers = config.observers,
        consensus = %config.consensus,
        chain_id = config.chain_id,
        block_period = config.block_period_seconds,
        "generating network"
    );

    let identities = identity::generate(config.validators, rng)?;
    info!(count = identities.len(), "validator identities generated");

    let topology = topology::bind(&identities, &config.endpoints, config.observers)?;
    info!(
        nodes = topology.endpoints.len(),
        bootstrap = topology.bootstrap_index,
        "topology bound"
    );

    let genesis = genesis::build(
        &identities,
        config.consensus,
        config.chain_id,
        config.block_period_seconds,
        config.initial_balance,
        &config.chain,
    )?;

    let descriptors =
        descriptor::generate(&identities, &topology, &genesis, layout, config.observers)?;

    Ok(NetworkArtifacts {
        consensus: config.consensus,
        identities,
        topology,
        genesis,
        descriptors,
    })
}

/// Operator instructions for distributing and starting the generated network.
pub fn deployment_guide(config: &NetworkConfig, layout: &ArtifactLayout) -> String {
    let rule = "=".repeat(60);
    let mut out = String::new();
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "DEPLOYMENT GUIDE");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out);
    let _ = writeln!(out, "1. Copy files to each server:");
    for index in 1..=config.total_nodes() {
        let host = config
            .endpoints
            .get(index - 1)
            .map(|entry| entry.host.as_str())
            .unwrap_or("<unassigned>");
        let name = node_name(index);
        let _ = writeln!(out, "   Server {index} ({host}):");
        let _ = writeln!(out, "     - {}", layout.genesis_path().display());
        if index <= config.validators {
            let _ = writeln!(out, "     - {}/", layout.key_dir(index).display());
        }
        let _ = writeln!(out, "     - {}", layout.compose_path(index).display());
        let _ = writeln!(out, "       (start with: docker compose -f {name}.yml up -d)");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "2. Start the bootstrap node ({}) first.", node_name(1));
    let _ = writeln!(out);
    let _ = writeln!(out, "3. Check node status:");
    let _ = writeln!(
        out,
        "   curl -X POST http://localhost:{} \\",
        config.service.rpc_port
    );
    let _ = writeln!(out, "     -H 'Content-Type: application/json' \\");
    let _ = writeln!(
        out,
        "     -d '{{\"jsonrpc\":\"2.0\",\"method\":\"eth_blockNumber\",\"params\":[],\"id\":1}}'"
    );
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} contains every private key; keep it off the servers.",
        layout.summary_path().display()
    );
    let _ = writeln!(out, "{rule}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::NodeRole;
    use crate::extra_data::{self, EncodingError};
    use crate::genesis::Balance;
    use crate::topology::{EndpointEntry, TopologyError};
    use crate::writer::{write_network, ExistingOutput};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn layout() -> ArtifactLayout {
        ArtifactLayout::new("out")
    }

    #[test]
    fn four_validator_network_is_cross_referenced() {
        let config = NetworkConfig {
            validators: 4,
            observers: 1,
            chain_id: 1337,
            block_period_seconds: 2,
            initial_balance: "0x1000000000000000000000".parse().unwrap(),
            ..NetworkConfig::default()
        };
        let artifacts =
            generate_network(&config, &layout(), &mut StdRng::seed_from_u64(1337)).unwrap();
        let addresses = artifacts.validator_addresses();

        assert_eq!(artifacts.genesis.config.chain_id, 1337);
        assert_eq!(artifacts.genesis.alloc.len(), 4);
        for (address, allocation) in artifacts.genesis.alloc.iter() {
            assert!(addresses.contains(address));
            assert_eq!(allocation.balance.to_string(), "0x1000000000000000000000");
        }
        assert_eq!(artifacts.genesis.validators().unwrap(), addresses);
        assert_eq!(artifacts.genesis.alloc.addresses(), addresses);

        assert_eq!(artifacts.descriptors.len(), 5);
        let first_uri = artifacts.descriptors[0]
            .endpoint
            .discovery_uri
            .clone()
            .unwrap();
        assert!(artifacts.descriptors[0].bootstrap.is_none());
        for descriptor in &artifacts.descriptors[1..] {
            assert_eq!(descriptor.bootstrap.as_deref(), Some(first_uri.as_str()));
        }
        assert_eq!(artifacts.descriptors[4].role, NodeRole::Observer);
    }

    #[test]
    fn short_endpoint_table_fails_before_genesis() {
        let config = NetworkConfig {
            endpoints: vec![
                EndpointEntry::new("10.0.0.1"),
                EndpointEntry::new("10.0.0.2"),
                EndpointEntry::new("10.0.0.3"),
            ],
            ..NetworkConfig::default()
        };
        let err = generate_network(&config, &layout(), &mut StdRng::seed_from_u64(3)).unwrap_err();
        assert!(matches!(
            err,
            ForgeError::Topology(TopologyError::TableTooShort {
                required: 5,
                available: 3
            })
        ));
    }

    #[test]
    fn repeated_runs_share_shape_but_not_secrets() {
        let config = NetworkConfig::default();
        let a = generate_network(&config, &layout(), &mut StdRng::seed_from_u64(100)).unwrap();
        let b = generate_network(&config, &layout(), &mut StdRng::seed_from_u64(200)).unwrap();
        assert_eq!(a.genesis.alloc.len(), b.genesis.alloc.len());
        assert_eq!(a.genesis.extra_data.len(), b.genesis.extra_data.len());
        assert_eq!(a.genesis.config, b.genesis.config);
        assert_ne!(a.genesis.extra_data, b.genesis.extra_data);
        let keys_a: HashSet<String> = a
            .identities
            .iter()
            .map(|v| v.private_key.to_plain_hex())
            .collect();
        assert!(b
            .identities
            .iter()
            .all(|v| !keys_a.contains(&v.private_key.to_plain_hex())));
    }

    #[test]
    fn invalid_config_is_rejected_before_keys_are_drawn() {
        let config = NetworkConfig {
            validators: 0,
            ..NetworkConfig::default()
        };
        assert!(matches!(
            generate_network(&config, &layout(), &mut StdRng::seed_from_u64(1)),
            Err(ForgeError::Config(_))
        ));
    }

    #[test]
    fn qbft_network_encodes_qbft_extra_data() {
        let config = NetworkConfig {
            consensus: ConsensusAlgorithm::Qbft,
            ..NetworkConfig::default()
        };
        let artifacts =
            generate_network(&config, &layout(), &mut StdRng::seed_from_u64(4)).unwrap();
        let bytes = extra_data::from_hex(&artifacts.genesis.extra_data).unwrap();
        assert_eq!(
            extra_data::decode_validators(ConsensusAlgorithm::Qbft, &bytes).unwrap(),
            artifacts.validator_addresses()
        );
        assert!(matches!(
            extra_data::decode(ConsensusAlgorithm::Ibft2, &bytes),
            Err(EncodingError::UnexpectedVote(_))
        ));
    }

    struct DeadRng;

    impl RngCore for DeadRng {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }
        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new("entropy source unavailable"))
        }
    }

    impl CryptoRng for DeadRng {}

    #[test]
    fn unusable_random_source_is_a_missing_dependency() {
        let err =
            generate_network(&NetworkConfig::default(), &layout(), &mut DeadRng).unwrap_err();
        assert!(matches!(err, ForgeError::DependencyMissing(_)));
    }

    #[test]
    fn written_tree_matches_generated_artifacts() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let root = std::env::temp_dir().join(format!("netforge_pipeline_{nanos}"));
        let layout = ArtifactLayout::new(root.clone());
        let config = NetworkConfig::default();
        let artifacts = generate_network(&config, &layout, &mut StdRng::seed_from_u64(8)).unwrap();
        let written =
            write_network(&layout, &artifacts, &config.service, ExistingOutput::Refuse).unwrap();
        // genesis + 4 files per validator + 5 manifests + summary
        assert_eq!(written.len(), 1 + 4 * 4 + 5 + 1);

        let text = fs::read_to_string(layout.genesis_path()).unwrap();
        let genesis: GenesisDescriptor = serde_json::from_str(&text).unwrap();
        genesis.verify_cross_reference().unwrap();
        assert_eq!(genesis.validators().unwrap(), artifacts.validator_addresses());
        for identity in &artifacts.identities {
            assert!(!text.contains(&identity.private_key.to_plain_hex()));
        }

        let first = &artifacts.identities[0];
        let key = fs::read_to_string(layout.key_dir(1).join("key")).unwrap();
        assert_eq!(key, first.private_key.to_plain_hex());
        let enode = fs::read_to_string(layout.key_dir(1).join("enode")).unwrap();
        assert_eq!(
            Some(enode.as_str()),
            artifacts.topology.bootstrap_uri()
        );
        let address = fs::read_to_string(layout.key_dir(1).join("address")).unwrap();
        assert_eq!(address, first.address.to_checksum());

        let manifest = fs::read_to_string(layout.compose_path(3)).unwrap();
        assert!(manifest.contains(&format!("--bootnodes={enode}")));
        let other_key = artifacts.identities[1].private_key.to_plain_hex();
        assert!(!manifest.contains(&other_key));

        let summary: Vec<identity::IdentityRecord> =
            serde_json::from_str(&fs::read_to_string(layout.summary_path()).unwrap()).unwrap();
        assert_eq!(summary.len(), 4);
        assert_eq!(summary[0].address, first.address);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn guide_lists_every_node() {
        let config = NetworkConfig {
            initial_balance: Balance(1),
            ..NetworkConfig::default()
        };
        let guide = deployment_guide(&config, &ArtifactLayout::new("net"));
        for index in 1..=5 {
            assert!(guide.contains(&format!("Server {index} (192.168.1.{})", 10 + index)));
        }
        assert!(guide.contains("node4.yml up -d"));
        assert!(guide.contains("http://localhost:8545"));
    }
}
