#![deny(missing_docs)]

//! # netforge
//!
//! **netforge** generates the artifacts a permissioned IBFT 2.0 or QBFT
//! network needs on day one, and keeps them consistent with each other:
//!
//! * **Validator identities**: secp256k1 keypairs drawn from a caller-supplied
//!   cryptographic random source, with their Keccak-derived addresses
//!   ([`identity`]).
//! * **Topology**: node index to host/port binding, `enode://` discovery URIs
//!   and the bootstrap designation ([`topology`]).
//! * **extraData**: the RLP-encoded genesis validator list, with a decoder that
//!   is its exact inverse ([`extra_data`]).
//! * **Genesis**: chain parameters, per-validator allocations and the encoded
//!   validator list, verified against each other before it is returned
//!   ([`genesis`]).
//! * **Deployment descriptors**: one per validator or RPC node, each pointing
//!   at the shared genesis and, except for the bootstrap node, at the bootstrap
//!   node's discovery URI ([`descriptor`]).
//!
//! The stages run in that order through [`generate_network`], which performs
//! no I/O; [`write_network`] stages the whole tree next to the output root
//! and renames it into place once every file is written.
//!
//! ```rust
//! use netforge::{generate_network, ArtifactLayout, NetworkConfig};
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let config = NetworkConfig::default();
//! let layout = ArtifactLayout::new("network");
//! let artifacts = generate_network(&config, &layout, &mut StdRng::seed_from_u64(1)).unwrap();
//!
//! assert_eq!(artifacts.genesis.alloc.len(), 4);
//! assert_eq!(artifacts.genesis.validators().unwrap(), artifacts.validator_addresses());
//! assert!(artifacts.descriptors[0].bootstrap.is_none());
//! ```
//!
//! Seeded generators are for tests; real networks should pass `OsRng`.

pub mod address;
pub mod config;
pub mod consensus;
pub mod descriptor;
mod error;
pub mod extra_data;
pub mod genesis;
pub mod identity;
pub mod layout;
pub mod pipeline;
pub mod topology;
pub mod writer;

pub use address::Address;
pub use config::{ConfigError, NetworkConfig};
pub use consensus::ConsensusAlgorithm;
pub use descriptor::{
    render_compose, DeploymentDescriptor, DescriptorError, NodeRole, ServiceTemplate,
};
pub use error::ForgeError;
pub use extra_data::{EncodingError, ExtraData, MAX_GENESIS_VALIDATORS};
pub use genesis::{Balance, ChainParams, GenesisDescriptor, GenesisError};
pub use identity::{IdentityError, IdentityRecord, ValidatorIdentity};
pub use layout::ArtifactLayout;
pub use pipeline::{deployment_guide, generate_network, self_check, NetworkArtifacts};
pub use topology::{EndpointEntry, NetworkEndpoint, Topology, TopologyError};
pub use writer::{write_network, ExistingOutput};
