//! Crate-level error type returned by the generation pipeline and the artifact writer.

use crate::config::ConfigError;
use crate::descriptor::DescriptorError;
use crate::extra_data::EncodingError;
use crate::genesis::GenesisError;
use crate::identity::IdentityError;
use crate::topology::TopologyError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Every failure a `netforge` run can end with. None of them are retried; a
/// failed run is discarded and regenerated from scratch.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("dependency missing: {0}")]
    /// The secure random source or the secp256k1 backend failed its self-check.
    DependencyMissing(String),
    #[error(transparent)]
    /// The configuration could not be loaded or failed validation.
    Config(#[from] ConfigError),
    #[error(transparent)]
    /// Identity generation was asked for an impossible key set.
    Identity(#[from] IdentityError),
    #[error(transparent)]
    /// Endpoint table could not cover every node.
    Topology(#[from] TopologyError),
    #[error(transparent)]
    /// Validator list could not be encoded into `extraData`.
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    /// Genesis assembly or its cross-reference check failed.
    Genesis(#[from] GenesisError),
    #[error(transparent)]
    /// Descriptors could not be derived from the earlier stages.
    Descriptor(#[from] DescriptorError),
    #[error("failed to write {}: {source}", .path.display())]
    /// Filesystem failure while persisting an artifact.
    WriteFailure {
        /// Artifact (or directory) that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    #[error("output directory {} already holds files", .path.display())]
    /// The output root is not empty and replacing it was not requested.
    OutputExists {
        /// Output root.
        path: PathBuf,
    },
    #[error("failed to serialize {what}: {message}")]
    /// An artifact could not be rendered to JSON.
    Serialize {
        /// Artifact label.
        what: &'static str,
        /// Serializer message.
        message: String,
    },
}

impl ForgeError {
    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::WriteFailure {
            path: path.into(),
            source,
        }
    }
}
