//! Per-node deployment descriptors and their compose manifests.
//!
//! Descriptors are built from the identities, the bound topology and the
//! finished genesis. Every node except the bootstrap node is told to dial the
//! bootstrap node's discovery URI; the bootstrap node is never told to dial
//! itself.

use crate::consensus::ConsensusAlgorithm;
use crate::genesis::GenesisDescriptor;
use crate::identity::ValidatorIdentity;
use crate::layout::{node_name, ArtifactLayout};
use crate::topology::{NetworkEndpoint, Topology};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while deriving descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("no endpoint bound for node {0}")]
    /// Topology does not cover a node.
    MissingEndpoint(usize),
    #[error("bootstrap node {0} has no discovery URI")]
    /// The bootstrap node is not a validator with a known key.
    MissingBootstrap(usize),
    #[error("genesis validators do not match identities: {0}")]
    /// The genesis was built for a different identity set.
    GenesisMismatch(String),
}

/// What a node does in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Votes in consensus.
    Validator,
    /// Serves RPC only.
    Observer,
}

/// Everything needed to deploy one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentDescriptor {
    /// 1-based node index.
    pub node_index: usize,
    /// Validator or observer.
    pub role: NodeRole,
    /// Own keypair, validators only.
    pub identity: Option<ValidatorIdentity>,
    /// Bound endpoint.
    pub endpoint: NetworkEndpoint,
    /// Bootstrap discovery URI; absent iff this is the bootstrap node.
    pub bootstrap: Option<String>,
    /// Chain id of the shared genesis.
    pub chain_id: u64,
    /// Genesis file as mounted from the manifest.
    pub genesis_path: String,
    /// Private key file as mounted from the manifest, validators only.
    pub key_path: Option<String>,
}

/// Produces descriptors for validators `1..=N` then observers `N+1..=N+observer_count`.
pub fn generate(
    identities: &[ValidatorIdentity],
    topology: &Topology,
    genesis: &GenesisDescriptor,
    layout: &ArtifactLayout,
    observer_count: usize,
) -> Result<Vec<DeploymentDescriptor>, DescriptorError> {
    let expected: Vec<_> = identities.iter().map(|v| v.address).collect();
    let encoded = genesis
        .validators()
        .map_err(|err| DescriptorError::GenesisMismatch(err.to_string()))?;
    if encoded != expected {
        return Err(DescriptorError::GenesisMismatch(format!(
            "extraData lists {} validators, {} identities supplied",
            encoded.len(),
            expected.len()
        )));
    }

    let bootstrap_uri = topology
        .bootstrap_uri()
        .ok_or(DescriptorError::MissingBootstrap(topology.bootstrap_index))?
        .to_string();
    let bootstrap_for = |index: usize| {
        if index == topology.bootstrap_index {
            None
        } else {
            Some(bootstrap_uri.clone())
        }
    };
    let endpoint_for = |index: usize| {
        topology
            .endpoint(index)
            .cloned()
            .ok_or(DescriptorError::MissingEndpoint(index))
    };

    let total = identities.len() + observer_count;
    let mut descriptors = Vec::with_capacity(total);
    for identity in identities {
        let index = identity.index;
        descriptors.push(DeploymentDescriptor {
            node_index: index,
            role: NodeRole::Validator,
            identity: Some(identity.clone()),
            endpoint: endpoint_for(index)?,
            bootstrap: bootstrap_for(index),
            chain_id: genesis.config.chain_id,
            genesis_path: layout.genesis_mount_source(),
            key_path: Some(layout.key_mount_source(index)),
        });
    }
    for index in identities.len() + 1..=total {
        descriptors.push(DeploymentDescriptor {
            node_index: index,
            role: NodeRole::Observer,
            identity: None,
            endpoint: endpoint_for(index)?,
            bootstrap: bootstrap_for(index),
            chain_id: genesis.config.chain_id,
            genesis_path: layout.genesis_mount_source(),
            key_path: None,
        });
    }

    for descriptor in &descriptors {
        debug!(
            index = descriptor.node_index,
            role = ?descriptor.role,
            bootstrap = descriptor.bootstrap.is_none(),
            "deployment descriptor derived"
        );
    }
    info!(
        validators = identities.len(),
        observers = observer_count,
        bootstrap = topology.bootstrap_index,
        "deployment descriptors derived"
    );
    Ok(descriptors)
}

/// Container image and node flags shared by every manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceTemplate {
    /// Container image reference.
    pub image: String,
    /// Prefix of container names.
    pub container_prefix: String,
    /// JVM options passed through the environment.
    pub jvm_opts: String,
    /// JSON-RPC HTTP port.
    pub rpc_port: u16,
    /// RPC connection cap on validators.
    pub validator_max_connections: u32,
    /// RPC connection cap on observers.
    pub observer_max_connections: u32,
    /// Minimum accepted gas price.
    pub min_gas_price: u64,
    /// Node tuning profile.
    pub profile: String,
    /// World-state storage format.
    pub storage_format: String,
    /// Transaction pool implementation.
    pub tx_pool: String,
    /// Layered pool capacity on validators.
    pub tx_pool_layer_max_capacity: u64,
}

impl Default for ServiceTemplate {
    fn default() -> Self {
        Self {
            image: "hyperledger/besu:24.1.1".to_string(),
            container_prefix: "besu".to_string(),
            jvm_opts: "-XX:MaxRAMPercentage=80.0 -XX:+UseG1GC -XX:MaxGCPauseMillis=100 -XX:+ParallelRefProcEnabled".to_string(),
            rpc_port: 8545,
            validator_max_connections: 50_000,
            observer_max_connections: 100_000,
            min_gas_price: 0,
            profile: "enterprise".to_string(),
            storage_format: "BONSAI".to_string(),
            tx_pool: "layered".to_string(),
            tx_pool_layer_max_capacity: 5_000_000,
        }
    }
}

/// Node command line for a descriptor.
pub fn command_flags(
    descriptor: &DeploymentDescriptor,
    template: &ServiceTemplate,
    algorithm: ConsensusAlgorithm,
) -> Vec<String> {
    let validator = descriptor.role == NodeRole::Validator;
    let max_connections = if validator {
        template.validator_max_connections
    } else {
        template.observer_max_connections
    };

    let mut flags = vec![
        "--data-path=/data".to_string(),
        "--genesis-file=/config/genesis.json".to_string(),
    ];
    if descriptor.key_path.is_some() {
        flags.push("--node-private-key-file=/config/key".to_string());
    }
    flags.extend([
        "--rpc-http-enabled".to_string(),
        format!("--rpc-http-api=ETH,NET,WEB3,ADMIN,TXPOOL,{}", algorithm.rpc_api()),
        "--rpc-http-host=0.0.0.0".to_string(),
        format!("--rpc-http-port={}", template.rpc_port),
        "--rpc-http-cors-origins=*".to_string(),
        format!("--rpc-http-max-active-connections={max_connections}"),
        "--host-allowlist=*".to_string(),
        format!("--p2p-host={}", descriptor.endpoint.host),
        format!("--p2p-port={}", descriptor.endpoint.p2p_port),
    ]);
    if let Some(uri) = &descriptor.bootstrap {
        flags.push(format!("--bootnodes={uri}"));
    }
    flags.extend([
        format!("--min-gas-price={}", template.min_gas_price),
        format!("--profile={}", template.profile),
        format!("--data-storage-format={}", template.storage_format),
    ]);
    if validator {
        flags.push("--bonsai-limit-trie-logs-enabled=false".to_string());
    }
    flags.push(format!("--tx-pool={}", template.tx_pool));
    if validator {
        flags.push(format!(
            "--tx-pool-layer-max-capacity={}",
            template.tx_pool_layer_max_capacity
        ));
    } else {
        flags.push("--miner-enabled=false".to_string());
    }
    flags
}

/// Renders `value` as a double-quoted YAML scalar.
pub fn yaml_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch.is_control() => {
                let _ = write!(out, "\\u{:04x}", ch as u32);
            }
            ch => out.push(ch),
        }
    }
    out.push('"');
    out
}

/// Renders the docker-compose manifest for one node.
///
/// Every value that can come from configuration is emitted as a quoted
/// scalar, so `#`, `:` or quotes inside it stay part of the value.
pub fn render_compose(
    descriptor: &DeploymentDescriptor,
    template: &ServiceTemplate,
    algorithm: ConsensusAlgorithm,
) -> String {
    let name = node_name(descriptor.node_index);
    let (label, container) = match descriptor.role {
        NodeRole::Validator => (
            "Validator",
            format!("{}-{name}", template.container_prefix),
        ),
        NodeRole::Observer => (
            "RPC Only",
            format!("{}-{name}-rpc", template.container_prefix),
        ),
    };

    let mut out = String::new();
    let _ = writeln!(out, "# Node {} - {label}", descriptor.node_index);
    let _ = writeln!(out, "# Deploy to: {}", descriptor.endpoint.host);
    out.push('\n');
    out.push_str("services:\n");
    let _ = writeln!(out, "  {name}:");
    let _ = writeln!(out, "    image: {}", yaml_quote(&template.image));
    let _ = writeln!(out, "    container_name: {}", yaml_quote(&container));
    out.push_str("    network_mode: host\n");
    out.push_str("    environment:\n");
    let _ = writeln!(
        out,
        "      - {}",
        yaml_quote(&format!("BESU_OPTS={}", template.jvm_opts))
    );
    out.push_str("    volumes:\n");
    out.push_str("      - \"./data:/data\"\n");
    let _ = writeln!(
        out,
        "      - {}",
        yaml_quote(&format!("{}:/config/genesis.json", descriptor.genesis_path))
    );
    if let Some(key_path) = &descriptor.key_path {
        let _ = writeln!(out, "      - {}", yaml_quote(&format!("{key_path}:/config/key")));
    }
    out.push_str("    command:\n");
    for flag in command_flags(descriptor, template, algorithm) {
        let _ = writeln!(out, "      - {}", yaml_quote(&flag));
    }
    out.push_str("    restart: unless-stopped\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::{build, Balance, ChainParams};
    use crate::identity::generate as generate_identities;
    use crate::topology::{bind, EndpointEntry};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    struct Fixture {
        identities: Vec<ValidatorIdentity>,
        topology: Topology,
        genesis: GenesisDescriptor,
        layout: ArtifactLayout,
    }

    fn fixture(validators: usize, observers: usize) -> Fixture {
        let identities = generate_identities(validators, &mut StdRng::seed_from_u64(21)).unwrap();
        let table: Vec<EndpointEntry> = (0..validators + observers)
            .map(|i| EndpointEntry::new(format!("192.168.1.{}", 11 + i)))
            .collect();
        let topology = bind(&identities, &table, observers).unwrap();
        let genesis = build(
            &identities,
            ConsensusAlgorithm::Ibft2,
            1337,
            2,
            Balance(1),
            &ChainParams::default(),
        )
        .unwrap();
        Fixture {
            identities,
            topology,
            genesis,
            layout: ArtifactLayout::new("out"),
        }
    }

    #[test]
    fn only_bootstrap_node_lacks_bootnodes() {
        let f = fixture(4, 1);
        let descriptors =
            generate(&f.identities, &f.topology, &f.genesis, &f.layout, 1).unwrap();
        assert_eq!(descriptors.len(), 5);
        let bootstrap = f.topology.bootstrap_uri().unwrap();
        let without: Vec<_> = descriptors
            .iter()
            .filter(|d| d.bootstrap.is_none())
            .map(|d| d.node_index)
            .collect();
        assert_eq!(without, vec![1]);
        for descriptor in &descriptors[1..] {
            assert_eq!(descriptor.bootstrap.as_deref(), Some(bootstrap));
        }
    }

    #[test]
    fn key_material_stays_with_its_owner() {
        let f = fixture(3, 2);
        let descriptors =
            generate(&f.identities, &f.topology, &f.genesis, &f.layout, 2).unwrap();
        for descriptor in &descriptors {
            match descriptor.role {
                NodeRole::Validator => {
                    let identity = descriptor.identity.as_ref().unwrap();
                    assert_eq!(identity.index, descriptor.node_index);
                    assert_eq!(
                        descriptor.key_path.as_deref(),
                        Some(format!("../config/keys/node{}/key", descriptor.node_index).as_str())
                    );
                }
                NodeRole::Observer => {
                    assert!(descriptor.identity.is_none());
                    assert!(descriptor.key_path.is_none());
                }
            }
        }
        let roles: Vec<_> = descriptors.iter().map(|d| d.role).collect();
        assert_eq!(
            roles,
            vec![
                NodeRole::Validator,
                NodeRole::Validator,
                NodeRole::Validator,
                NodeRole::Observer,
                NodeRole::Observer
            ]
        );
    }

    #[test]
    fn foreign_genesis_is_rejected() {
        let f = fixture(2, 0);
        let other = fixture(3, 0);
        let err = generate(&f.identities, &f.topology, &other.genesis, &f.layout, 0).unwrap_err();
        assert!(matches!(err, DescriptorError::GenesisMismatch(_)));
    }

    #[test]
    fn compose_for_bootstrap_validator_omits_bootnodes() {
        let f = fixture(2, 1);
        let descriptors =
            generate(&f.identities, &f.topology, &f.genesis, &f.layout, 1).unwrap();
        let template = ServiceTemplate::default();
        let first = render_compose(&descriptors[0], &template, ConsensusAlgorithm::Ibft2);
        assert!(first.contains("container_name: \"besu-node1\"\n"));
        assert!(first.contains("- \"../config/keys/node1/key:/config/key\""));
        assert!(first.contains("\"--p2p-host=192.168.1.11\""));
        assert!(first.contains("TXPOOL,IBFT\""));
        assert!(!first.contains("--bootnodes"));

        let second = render_compose(&descriptors[1], &template, ConsensusAlgorithm::Ibft2);
        let bootnodes = format!("\"--bootnodes={}\"", f.topology.bootstrap_uri().unwrap());
        assert!(second.contains(&bootnodes));
        assert!(second.contains("--tx-pool-layer-max-capacity=5000000"));
    }

    #[test]
    fn compose_for_observer_has_no_key_and_disables_mining() {
        let f = fixture(1, 1);
        let descriptors =
            generate(&f.identities, &f.topology, &f.genesis, &f.layout, 1).unwrap();
        let rendered = render_compose(
            &descriptors[1],
            &ServiceTemplate::default(),
            ConsensusAlgorithm::Qbft,
        );
        assert!(rendered.contains("container_name: \"besu-node2-rpc\""));
        assert!(!rendered.contains("/config/key"));
        assert!(rendered.contains("--miner-enabled=false"));
        assert!(rendered.contains("--rpc-http-max-active-connections=100000"));
        assert!(rendered.contains("TXPOOL,QBFT\""));
        assert!(rendered.contains("--bootnodes=enode://"));
    }

    #[test]
    fn template_values_stay_inside_their_scalars() {
        let f = fixture(1, 0);
        let descriptors =
            generate(&f.identities, &f.topology, &f.genesis, &f.layout, 0).unwrap();
        let template = ServiceTemplate {
            jvm_opts: "-Xmx4g #tuned -Dname=\"a:b\"\n-Xss1m".to_string(),
            image: "registry.local:5000/besu:24.1.1".to_string(),
            ..ServiceTemplate::default()
        };
        let rendered = render_compose(&descriptors[0], &template, ConsensusAlgorithm::Ibft2);
        assert!(rendered.contains(
            "      - \"BESU_OPTS=-Xmx4g #tuned -Dname=\\\"a:b\\\"\\n-Xss1m\"\n"
        ));
        assert!(rendered.contains("    image: \"registry.local:5000/besu:24.1.1\"\n"));
        for line in rendered.lines().filter(|line| line.starts_with("      - ")) {
            let scalar = &line["      - ".len()..];
            assert!(scalar.starts_with('"') && scalar.ends_with('"'), "{line}");
        }
    }

    #[test]
    fn quoting_escapes_yaml_metacharacters() {
        assert_eq!(yaml_quote("plain"), "\"plain\"");
        assert_eq!(yaml_quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(yaml_quote("back\\slash"), "\"back\\\\slash\"");
        assert_eq!(yaml_quote("bell\u{7}"), "\"bell\\u0007\"");
    }
}
