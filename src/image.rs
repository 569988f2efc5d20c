//! OCI layer materialization.
//!
//! Layers are gzipped tar archives applied in manifest order onto the root
//! directory. Application follows the AUFS/OCI whiteout convention:
//!
//! - `.wh..wh..plnk` entries are hardlink bookkeeping markers and are skipped.
//! - `.wh..wh..opq` marks its directory opaque: everything already present
//!   there from lower layers is removed, except entries this layer created.
//! - `.wh.<name>` deletes `<name>`. If the target does not exist yet, the
//!   deletion is remembered so a creation of the same path *later in the same
//!   layer* is suppressed.
//!
//! Application is not transactional: a layer that fails midway leaves partial
//! state behind, and retries re-apply on top of it. Callers that need a clean
//! tree must discard the target directory and start over.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt, lchown, symlink};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tar::Archive;
use tracing::info;

use crate::constants::{AUTH_RETRY_DELAY, BLOB_RETRY_DELAY, MANIFEST_RETRY_DELAY, RETRY_ATTEMPTS};
use crate::error::{Error, Result};
use crate::registry::RegistryClient;
use crate::retry::retry;
use crate::sandbox::contained_path;

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_MARKER: &str = ".wh..wh..opq";
const HARDLINK_MARKER: &str = ".wh..wh..plnk";

/// Fetches `library/<image>:<tag>` from the registry and applies every layer
/// onto `root`, in manifest order, each under its own retry loop. A digest
/// mismatch re-downloads and re-applies the whole layer.
pub async fn init_from_docker(
    registry: &RegistryClient,
    root: &Path,
    image: &str,
    tag: &str,
) -> Result<()> {
    let token = retry(RETRY_ATTEMPTS, AUTH_RETRY_DELAY, move || registry.token(image)).await?;
    let token = token.as_str();
    let digests = retry(RETRY_ATTEMPTS, MANIFEST_RETRY_DELAY, move || {
        registry.layer_digests(token, image, tag)
    })
    .await?;

    for digest in &digests {
        let digest = digest.as_str();
        info!(digest, "incrementing filesystem");
        retry(RETRY_ATTEMPTS, BLOB_RETRY_DELAY, move || async move {
            let blob = registry.blob(token, image, digest).await?;
            verify_digest(&blob, digest)?;
            let root = root.to_path_buf();
            let digest = digest.to_string();
            tokio::task::spawn_blocking(move || apply_layer(&root, &blob, &digest))
                .await
                .map_err(|err| Error::Internal(format!("layer apply task failed: {err}")))?
        })
        .await?;
    }
    Ok(())
}

/// Checks a blob against its manifest digest. A mismatch is retryable: the
/// enclosing retry loop downloads the blob again.
pub fn verify_digest(blob: &[u8], expected: &str) -> Result<()> {
    let computed = format!("sha256:{}", hex::encode(Sha256::digest(blob)));
    if computed == expected {
        Ok(())
    } else {
        Err(Error::DigestMismatch {
            expected: expected.to_string(),
            computed,
        }
        .retryable())
    }
}

/// Applies one verified layer blob onto `root`.
pub fn apply_layer(root: &Path, blob: &[u8], digest: &str) -> Result<()> {
    apply_entries(root, blob).map_err(|err| match err {
        err @ (Error::PathTraversal { .. }
        | Error::UnsupportedEntryType { .. }
        | Error::MissingLinkTarget { .. }) => err,
        err => Error::LayerApplyFailed {
            digest: digest.to_string(),
            reason: err.to_string(),
        },
    })
}

fn apply_entries(root: &Path, blob: &[u8]) -> Result<()> {
    let mut archive = Archive::new(GzDecoder::new(blob));

    // Whiteouts whose target did not exist yet: suppress a later creation of
    // the same path within this layer.
    let mut pending_delete: HashSet<PathBuf> = HashSet::new();
    // Paths created or overwritten by this layer, shielded from the opaque
    // marker.
    let mut added: HashSet<PathBuf> = HashSet::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let rel = {
            let path = entry.path()?;
            contained_path(&path)?
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let base = rel.file_name().and_then(|n| n.to_str()).unwrap_or("");

        if base == HARDLINK_MARKER {
            continue;
        }

        if base == OPAQUE_MARKER {
            let parent = rel.parent().unwrap_or(Path::new("")).to_path_buf();
            let children = match fs::read_dir(root.join(&parent)) {
                Ok(children) => children,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            for child in children {
                let child = child?;
                if !added.contains(&parent.join(child.file_name())) {
                    remove_all(&child.path())?;
                }
            }
            continue;
        }

        if let Some(name) = base.strip_prefix(WHITEOUT_PREFIX) {
            let target = rel.parent().unwrap_or(Path::new("")).join(name);
            added.remove(&target);
            if !remove_all(&root.join(&target))? {
                pending_delete.insert(target);
            }
            continue;
        }

        if pending_delete.remove(&rel) {
            added.remove(&rel);
            continue;
        }

        let kind = entry.header().entry_type();
        let mode = entry.header().mode()? & 0o7777;
        let uid = entry.header().uid()? as u32;
        let gid = entry.header().gid()? as u32;

        let abs = root.join(&rel);
        // A layer may replace its own earlier entry, or change a lower
        // layer's file into a directory (or vice versa). Clear the slot,
        // except when both sides are directories: those merge, and wiping
        // would discard lower-layer contents the layer never touched.
        let existing_dir = fs::symlink_metadata(&abs)
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !(kind.is_dir() && existing_dir) {
            remove_all(&abs)?;
        }

        if kind.is_dir() {
            fs::create_dir_all(&abs)?;
        } else if kind.is_file() {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&abs)?;
            io::copy(&mut entry, &mut file)?;
        } else if kind.is_symlink() {
            let target = entry.link_name()?.ok_or_else(|| Error::MissingLinkTarget {
                path: rel.display().to_string(),
            })?;
            symlink(&target, &abs)?;
        } else if kind.is_hard_link() {
            let target = entry.link_name()?.ok_or_else(|| Error::MissingLinkTarget {
                path: rel.display().to_string(),
            })?;
            let target_abs = root.join(contained_path(&target)?);
            // The link target may only appear later in the archive; reserve
            // it with an empty file that the real entry will overwrite.
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(mode)
                .open(&target_abs)
            {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }
            fs::hard_link(&target_abs, &abs)?;
        } else {
            return Err(Error::UnsupportedEntryType {
                path: rel.display().to_string(),
                kind: format!("{kind:?}"),
            });
        }

        added.insert(rel);
        lchown(&abs, Some(uid), Some(gid))?;
        // chmod must be the last touch: without CAP_FSETID every preceding
        // write or chown clears setuid/setgid/sticky bits. Symlinks carry no
        // mode of their own on Linux.
        if !kind.is_symlink() {
            fs::set_permissions(&abs, fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

/// Removes a path of any kind, recursively. Returns whether it existed.
fn remove_all(path: &Path) -> io::Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}
