//! Persists generated artifacts.
//!
//! Each file is written to a sibling `.tmp` path, flushed, synced and renamed
//! into place, so an interrupted run never leaves a truncated file under its
//! final name. Key material is created owner-readable only on Unix.

use crate::descriptor::{render_compose, ServiceTemplate};
use crate::error::ForgeError;
use crate::identity::{IdentityRecord, ValidatorIdentity};
use crate::layout::{ArtifactLayout, ADDRESS_FILE, ENODE_FILE, KEY_FILE, PUBLIC_KEY_FILE};
use crate::pipeline::NetworkArtifacts;
use crate::topology::discovery_uri;
use std::fs::{self, create_dir_all, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Whether a file holds secret key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    /// World-readable per the process umask.
    Public,
    /// Owner read/write only.
    Secret,
}

/// Writes `contents` to `path` through a temporary sibling and an atomic rename.
pub fn write_atomic(
    path: &Path,
    contents: &[u8],
    sensitivity: Sensitivity,
) -> Result<PathBuf, ForgeError> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent).map_err(|err| ForgeError::write(parent, err))?;
    }
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = write_file(&tmp_path, contents, sensitivity)
        .and_then(|()| fs::rename(&tmp_path, path));
    if let Err(err) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(ForgeError::write(path, err));
    }
    debug!(path = %path.display(), bytes = contents.len(), "artifact written");
    Ok(path.to_path_buf())
}

fn write_file(path: &Path, contents: &[u8], sensitivity: Sensitivity) -> io::Result<()> {
    let file = File::create(path)?;
    if sensitivity == Sensitivity::Secret {
        restrict_to_owner(&file)?;
    }
    let mut writer = BufWriter::new(file);
    writer.write_all(contents)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

#[cfg(unix)]
fn restrict_to_owner(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_file: &File) -> io::Result<()> {
    Ok(())
}

fn to_json<T: serde::Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, ForgeError> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|err| ForgeError::Serialize {
        what,
        message: err.to_string(),
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Writes the four identity files of one validator.
pub fn write_identity(
    layout: &ArtifactLayout,
    identity: &ValidatorIdentity,
    host: &str,
    p2p_port: u16,
) -> Result<Vec<PathBuf>, ForgeError> {
    let dir = layout.key_dir(identity.index);
    Ok(vec![
        write_atomic(
            &dir.join(KEY_FILE),
            identity.private_key.to_plain_hex().as_bytes(),
            Sensitivity::Secret,
        )?,
        write_atomic(
            &dir.join(PUBLIC_KEY_FILE),
            identity.public_key.to_prefixed_hex().as_bytes(),
            Sensitivity::Public,
        )?,
        write_atomic(
            &dir.join(ADDRESS_FILE),
            identity.address.to_checksum().as_bytes(),
            Sensitivity::Public,
        )?,
        write_atomic(
            &dir.join(ENODE_FILE),
            discovery_uri(identity, host, p2p_port).as_bytes(),
            Sensitivity::Public,
        )?,
    ])
}

/// What [`write_network`] does when the output root already holds files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingOutput {
    /// Fail with [`ForgeError::OutputExists`] and leave the directory alone.
    Refuse,
    /// Discard the previous tree once the new one is fully written.
    Replace,
}

/// Writes genesis, identities, manifests and the summary. Returns every path written.
///
/// The tree is written into a sibling staging directory and renamed over the
/// output root only after every file landed, so the root always holds exactly
/// one generation.
pub fn write_network(
    layout: &ArtifactLayout,
    artifacts: &NetworkArtifacts,
    template: &ServiceTemplate,
    existing: ExistingOutput,
) -> Result<Vec<PathBuf>, ForgeError> {
    let root = layout.root();
    let occupied = match fs::read_dir(root) {
        Ok(mut entries) => entries.next().is_some(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => return Err(ForgeError::write(root, err)),
    };
    if occupied && existing == ExistingOutput::Refuse {
        return Err(ForgeError::OutputExists {
            path: root.to_path_buf(),
        });
    }

    let staging = sibling(root, "staging")?;
    discard(&staging)?;
    let staged = ArtifactLayout::new(staging.clone());
    let written = match write_tree(&staged, artifacts, template) {
        Ok(written) => written,
        Err(err) => {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }
    };
    promote(&staging, root)?;

    let written = written
        .into_iter()
        .map(|path| match path.strip_prefix(&staging) {
            Ok(relative) => root.join(relative),
            Err(_) => path,
        })
        .collect::<Vec<_>>();
    info!(
        root = %root.display(),
        files = written.len(),
        replaced = occupied,
        "artifacts written"
    );
    Ok(written)
}

fn write_tree(
    layout: &ArtifactLayout,
    artifacts: &NetworkArtifacts,
    template: &ServiceTemplate,
) -> Result<Vec<PathBuf>, ForgeError> {
    let mut written = Vec::new();

    written.push(write_atomic(
        &layout.genesis_path(),
        &to_json("genesis", &artifacts.genesis)?,
        Sensitivity::Public,
    )?);

    for descriptor in &artifacts.descriptors {
        if let Some(identity) = &descriptor.identity {
            written.extend(write_identity(
                layout,
                identity,
                &descriptor.endpoint.host,
                descriptor.endpoint.p2p_port,
            )?);
        }
    }

    for descriptor in &artifacts.descriptors {
        let manifest = render_compose(descriptor, template, artifacts.consensus);
        written.push(write_atomic(
            &layout.compose_path(descriptor.node_index),
            manifest.as_bytes(),
            Sensitivity::Public,
        )?);
    }

    let records: Vec<IdentityRecord> = artifacts.identities.iter().map(|v| v.record()).collect();
    written.push(write_atomic(
        &layout.summary_path(),
        &to_json("validator summary", &records)?,
        Sensitivity::Secret,
    )?);
    Ok(written)
}

/// `<parent>/.<name>.<suffix>` next to `root`.
fn sibling(root: &Path, suffix: &str) -> Result<PathBuf, ForgeError> {
    let name = root.file_name().ok_or_else(|| {
        ForgeError::write(
            root,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "output root must end in a directory name",
            ),
        )
    })?;
    Ok(root.with_file_name(format!(".{}.{suffix}", name.to_string_lossy())))
}

fn discard(path: &Path) -> Result<(), ForgeError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ForgeError::write(path, err)),
    }
}

/// Renames `staging` to `root`, moving any previous tree aside first and
/// restoring it if the swap fails.
fn promote(staging: &Path, root: &Path) -> Result<(), ForgeError> {
    if !root.exists() {
        return fs::rename(staging, root).map_err(|err| {
            let _ = fs::remove_dir_all(staging);
            ForgeError::write(root, err)
        });
    }

    let previous = sibling(root, "previous")?;
    discard(&previous)?;
    if let Err(err) = fs::rename(root, &previous) {
        let _ = fs::remove_dir_all(staging);
        return Err(ForgeError::write(root, err));
    }
    if let Err(err) = fs::rename(staging, root) {
        let _ = fs::rename(&previous, root);
        let _ = fs::remove_dir_all(staging);
        return Err(ForgeError::write(root, err));
    }
    if let Err(err) = fs::remove_dir_all(&previous) {
        warn!(path = %previous.display(), error = %err, "previous generation left behind");
    }
    debug!(root = %root.display(), "previous generation discarded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::pipeline::generate_network;
    use crate::topology::EndpointEntry;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("netforge_{name}_{nanos}"))
    }

    #[test]
    fn atomic_write_replaces_file_and_leaves_no_temp() {
        let root = temp_root("atomic");
        let path = root.join("nested").join("artifact.txt");
        write_atomic(&path, b"first", Sensitivity::Public).unwrap();
        write_atomic(&path, b"second", Sensitivity::Public).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!root.join("nested").join("artifact.txt.tmp").exists());
        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn failed_write_reports_path_and_leaves_nothing() {
        let root = temp_root("blocked");
        fs::create_dir_all(&root).unwrap();
        // A regular file where a directory is expected.
        let blocker = root.join("config");
        fs::write(&blocker, b"not a dir").unwrap();
        let target = blocker.join("genesis.json");
        let err = write_atomic(&target, b"{}", Sensitivity::Public).unwrap_err();
        match err {
            ForgeError::WriteFailure { path, .. } => assert_eq!(path, blocker),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!target.exists());
        fs::remove_dir_all(&root).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn secret_files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let root = temp_root("secret");
        let path = root.join("key");
        write_atomic(&path, b"00", Sensitivity::Secret).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        fs::remove_dir_all(&root).unwrap();
    }

    fn network(validators: usize, observers: usize, seed: u64) -> (NetworkConfig, NetworkArtifacts) {
        let config = NetworkConfig {
            validators,
            observers,
            endpoints: (0..validators + observers)
                .map(|i| EndpointEntry::new(format!("10.1.0.{}", i + 1)))
                .collect(),
            ..NetworkConfig::default()
        };
        let layout = ArtifactLayout::new("unused");
        let artifacts = generate_network(&config, &layout, &mut StdRng::seed_from_u64(seed)).unwrap();
        (config, artifacts)
    }

    #[test]
    fn rerun_replaces_the_whole_previous_generation() {
        let root = temp_root("rerun").join("net");
        let layout = ArtifactLayout::new(root.clone());
        let (first_config, first) = network(5, 0, 1);
        write_network(&layout, &first, &first_config.service, ExistingOutput::Refuse).unwrap();
        assert!(layout.key_dir(5).join(KEY_FILE).exists());

        let (config, second) = network(3, 1, 2);
        let written =
            write_network(&layout, &second, &config.service, ExistingOutput::Replace).unwrap();
        assert!(written.iter().all(|path| path.starts_with(&root) && path.exists()));

        assert!(!layout.key_dir(4).exists());
        assert!(!layout.key_dir(5).exists());
        assert!(!layout.compose_path(5).exists());
        let observer = fs::read_to_string(layout.compose_path(4)).unwrap();
        assert!(observer.contains("--miner-enabled=false"));
        let bootnode = second.topology.bootstrap_uri().unwrap();
        assert!(observer.contains(bootnode));
        assert!(!observer.contains(first.topology.bootstrap_uri().unwrap()));

        let parent = root.parent().unwrap();
        let mut names: Vec<_> = fs::read_dir(parent)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        names.sort();
        assert_eq!(names, vec![std::ffi::OsString::from("net")]);
        fs::remove_dir_all(parent).unwrap();
    }

    #[test]
    fn occupied_root_is_refused_and_left_untouched() {
        let root = temp_root("refuse").join("net");
        let layout = ArtifactLayout::new(root.clone());
        let (config, first) = network(2, 0, 3);
        write_network(&layout, &first, &config.service, ExistingOutput::Refuse).unwrap();
        let genesis_before = fs::read_to_string(layout.genesis_path()).unwrap();

        let (_, second) = network(2, 0, 4);
        let err = write_network(&layout, &second, &config.service, ExistingOutput::Refuse)
            .unwrap_err();
        assert!(matches!(err, ForgeError::OutputExists { ref path } if *path == root));
        assert_eq!(fs::read_to_string(layout.genesis_path()).unwrap(), genesis_before);
        fs::remove_dir_all(root.parent().unwrap()).unwrap();
    }

    #[test]
    fn failed_staging_keeps_previous_generation() {
        let root = temp_root("staging").join("net");
        let layout = ArtifactLayout::new(root.clone());
        let (config, first) = network(2, 0, 5);
        write_network(&layout, &first, &config.service, ExistingOutput::Refuse).unwrap();
        let key_before = fs::read_to_string(layout.key_dir(1).join(KEY_FILE)).unwrap();

        // A regular file where the staging directory goes.
        let blocker = root.with_file_name(".net.staging");
        fs::write(&blocker, b"occupied").unwrap();
        let (_, second) = network(2, 0, 6);
        let err = write_network(&layout, &second, &config.service, ExistingOutput::Replace)
            .unwrap_err();
        assert!(matches!(err, ForgeError::WriteFailure { .. }));
        assert_eq!(
            fs::read_to_string(layout.key_dir(1).join(KEY_FILE)).unwrap(),
            key_before
        );
        fs::remove_dir_all(root.parent().unwrap()).unwrap();
    }

    #[test]
    fn root_without_a_name_is_rejected() {
        let (config, artifacts) = network(1, 0, 7);
        let err = write_network(
            &ArtifactLayout::new("/"),
            &artifacts,
            &config.service,
            ExistingOutput::Replace,
        )
        .unwrap_err();
        assert!(matches!(err, ForgeError::WriteFailure { .. }));
    }
}
