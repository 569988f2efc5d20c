//! Recursive copy preserving ownership, mode, and timestamps.

use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt, lchown, symlink};
use std::path::Path;

use filetime::FileTime;

use crate::error::{Error, Result};

/// Copies `src` to `dst` recursively. Files, directories, and symlinks are
/// reproduced with their uid/gid, permission bits, and access/modification
/// times. Directory times are restored after their contents so the copy
/// itself does not disturb them.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(src).map_err(|err| ctx(src, err))?;
    let file_type = meta.file_type();

    if file_type.is_dir() {
        fs::create_dir_all(dst).map_err(|err| ctx(dst, err))?;
        for entry in fs::read_dir(src).map_err(|err| ctx(src, err))? {
            let entry = entry.map_err(|err| ctx(src, err))?;
            copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
        }
        restore_metadata(dst, &meta, false)
    } else if file_type.is_symlink() {
        let target = fs::read_link(src).map_err(|err| ctx(src, err))?;
        symlink(&target, dst).map_err(|err| ctx(dst, err))?;
        restore_metadata(dst, &meta, true)
    } else {
        fs::copy(src, dst).map_err(|err| ctx(dst, err))?;
        restore_metadata(dst, &meta, false)
    }
}

fn restore_metadata(path: &Path, meta: &fs::Metadata, is_symlink: bool) -> Result<()> {
    lchown(path, Some(meta.uid()), Some(meta.gid())).map_err(|err| ctx(path, err))?;
    if !is_symlink {
        // chmod after chown so setuid/setgid bits survive.
        fs::set_permissions(path, fs::Permissions::from_mode(meta.mode() & 0o7777))
            .map_err(|err| ctx(path, err))?;
    }

    let atime = FileTime::from_last_access_time(meta);
    let mtime = FileTime::from_last_modification_time(meta);
    let restored = if is_symlink {
        filetime::set_symlink_file_times(path, atime, mtime)
    } else {
        filetime::set_file_times(path, atime, mtime)
    };
    restored.map_err(|err| ctx(path, err))
}

fn ctx(path: &Path, err: io::Error) -> Error {
    Error::CopyFailed {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}
