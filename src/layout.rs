//! On-disk layout of a generated network.
//!
//! ```text
//! <root>/config/genesis.json
//! <root>/config/keys/node<i>/{key,key.pub,address,enode}
//! <root>/docker-compose/node<i>.yml
//! <root>/validators.json
//! ```
//!
//! Compose files mount the genesis and key files by paths relative to the
//! compose directory, so the tree can be copied to hosts as-is.

use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "config";
const KEYS_DIR: &str = "keys";
const COMPOSE_DIR: &str = "docker-compose";
const GENESIS_FILE: &str = "genesis.json";
const SUMMARY_FILE: &str = "validators.json";

/// Private key file name inside a node's key directory.
pub const KEY_FILE: &str = "key";
/// Public key file name.
pub const PUBLIC_KEY_FILE: &str = "key.pub";
/// Address file name.
pub const ADDRESS_FILE: &str = "address";
/// Discovery URI file name.
pub const ENODE_FILE: &str = "enode";

/// Paths of every artifact, rooted at an output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `config/`.
    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    /// Shared genesis file.
    pub fn genesis_path(&self) -> PathBuf {
        self.config_dir().join(GENESIS_FILE)
    }

    /// Key directory of node `index`.
    pub fn key_dir(&self, index: usize) -> PathBuf {
        self.config_dir().join(KEYS_DIR).join(node_name(index))
    }

    /// Compose directory.
    pub fn compose_dir(&self) -> PathBuf {
        self.root.join(COMPOSE_DIR)
    }

    /// Compose manifest of node `index`.
    pub fn compose_path(&self, index: usize) -> PathBuf {
        self.compose_dir().join(format!("{}.yml", node_name(index)))
    }

    /// Operator summary of all validator identities.
    pub fn summary_path(&self) -> PathBuf {
        self.root.join(SUMMARY_FILE)
    }

    /// Genesis path as mounted from a compose file.
    pub fn genesis_mount_source(&self) -> String {
        format!("../{CONFIG_DIR}/{GENESIS_FILE}")
    }

    /// Private key path of node `index` as mounted from a compose file.
    pub fn key_mount_source(&self, index: usize) -> String {
        format!("../{CONFIG_DIR}/{KEYS_DIR}/{}/{KEY_FILE}", node_name(index))
    }
}

/// Service and directory name of node `index`.
pub fn node_name(index: usize) -> String {
    format!("node{index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_follow_node_partitioning() {
        let layout = ArtifactLayout::new("/tmp/net");
        assert_eq!(
            layout.genesis_path(),
            PathBuf::from("/tmp/net/config/genesis.json")
        );
        assert_eq!(
            layout.key_dir(3),
            PathBuf::from("/tmp/net/config/keys/node3")
        );
        assert_eq!(
            layout.compose_path(5),
            PathBuf::from("/tmp/net/docker-compose/node5.yml")
        );
        assert_eq!(layout.summary_path(), PathBuf::from("/tmp/net/validators.json"));
    }

    #[test]
    fn mount_sources_resolve_from_compose_dir() {
        let layout = ArtifactLayout::new("out");
        let compose_dir = layout.compose_dir();
        let genesis = compose_dir.join(layout.genesis_mount_source());
        assert!(genesis.ends_with("../config/genesis.json"));
        assert_eq!(layout.key_mount_source(2), "../config/keys/node2/key");
    }
}
