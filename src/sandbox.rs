//! Root filesystem preparation.
//!
//! Turns the executor's working directory into an isolated root: a `root`
//! subdirectory is bound to itself, populated with `proc`, `tmp`, and `dev`,
//! overlaid with the configured host mounts, and finally pivoted onto `/`.
//! The ordering is load-bearing: proc must be mounted before the pivot, the
//! DNS file must be written after it.
//!
//! Nothing here rolls back. A failed step leaves the mount namespace in an
//! undefined state; the kernel reclaims everything when the process exits.

use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt, symlink};
use std::os::unix::io::AsRawFd;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::unistd;
use tracing::{debug, warn};

use crate::constants::{DEV_LINKS, DEV_NODES, RESOLV_CONF};
use crate::error::{Error, Result};
use crate::mounts;
use crate::wire::Mount;

static SANDBOX_BUILT: AtomicBool = AtomicBool::new(false);

/// Builds the namespace-mode sandbox in the current working directory and
/// pivots into it. May run at most once per process; a second call fails with
/// [`Error::SandboxAlreadyBuilt`] even if the first attempt errored.
pub fn build(mounts_list: &[Mount]) -> Result<()> {
    if SANDBOX_BUILT.swap(true, Ordering::SeqCst) {
        return Err(Error::SandboxAlreadyBuilt);
    }

    prepare_new_root()?;
    mount_proc()?;
    mount_tmp()?;
    populate_dev()?;
    apply_mounts(mounts_list)?;
    pivot_root()?;
    configure_dns()?;
    Ok(())
}

/// Forces a container path relative to the new root, so `/etc/passwd` becomes
/// `etc/passwd` under the root being built. `..` components are refused.
pub fn contained_path(path: &Path) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                return Err(Error::PathTraversal {
                    path: path.display().to_string(),
                });
            }
        }
    }
    Ok(clean)
}

fn step_err(op: impl Into<String>) -> impl FnOnce(io::Error) -> Error {
    let op = op.into();
    move |err| Error::Sandbox {
        op,
        reason: err.to_string(),
    }
}

fn ensure_dir(path: &Path, mode: u32) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => fs::set_permissions(path, Permissions::from_mode(mode))
            .map_err(step_err(format!("setting mode on {}", path.display()))),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(step_err(format!("creating {}", path.display()))(err)),
    }
}

/// `pivot_root` cannot be applied to the directory the namespace was created
/// in, and requires the new root to be a mount point. Hence: a `root`
/// subdirectory, bound to itself, with the working directory moved inside.
fn prepare_new_root() -> Result<()> {
    mounts::remount_root_slave()?;
    let root = Path::new("root");
    ensure_dir(root, 0o755)?;
    mounts::bind(root, root, true)?;
    unistd::chdir(root).map_err(|err| Error::Sandbox {
        op: "entering new root".into(),
        reason: err.to_string(),
    })
}

fn mount_proc() -> Result<()> {
    let proc = Path::new("proc");
    ensure_dir(proc, 0o755)?;
    mounts::procfs(proc)
}

fn mount_tmp() -> Result<()> {
    let tmp = Path::new("tmp");
    ensure_dir(tmp, 0o1777)?;
    mounts::tmpfs(tmp)
}

/// A tmpfs `dev` with the host's basic device nodes bound in and the
/// conventional fd symlinks.
fn populate_dev() -> Result<()> {
    let dev = Path::new("dev");
    ensure_dir(dev, 0o755)?;
    mounts::tmpfs(dev)?;

    for node in DEV_NODES {
        let path = dev.join(node);
        // Bind mounts need an existing mount target, even for device nodes.
        OpenOptions::new()
            .create(true)
            .write(true)
            .mode(0o644)
            .open(&path)
            .map_err(step_err(format!("creating dev/{node}")))?;
        mounts::bind(&Path::new("/").join(&path), &path, true)?;
    }

    for (link, target) in DEV_LINKS {
        symlink(target, dev.join(link)).map_err(step_err(format!("linking dev/{link}")))?;
    }
    Ok(())
}

fn apply_mounts(mounts_list: &[Mount]) -> Result<()> {
    for m in mounts_list {
        let target = contained_path(&m.container)?;
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&target)
            .map_err(step_err(format!("creating mount point {}", target.display())))?;
        mounts::bind(&m.host, &target, true)?;
        if !m.writable {
            mounts::remount_readonly(&m.host, &target)?;
        }
        debug!(
            host = %m.host.display(),
            container = %target.display(),
            writable = m.writable,
            "mounted host directory"
        );
    }
    Ok(())
}

fn pivot_root() -> Result<()> {
    let put_old = Path::new(".old");
    fs::create_dir(put_old).map_err(step_err("creating .old"))?;
    mounts::pivot(Path::new("."), put_old)?;
    mounts::make_rprivate(put_old)?;
    mounts::detach(put_old)?;
    fs::remove_dir(put_old).map_err(step_err("removing .old"))
}

/// Must run after the pivot: the path is resolved inside the new root.
fn configure_dns() -> Result<()> {
    ensure_dir(Path::new("etc"), 0o755)?;
    fs::write("etc/resolv.conf", RESOLV_CONF).map_err(step_err("writing etc/resolv.conf"))
}

// =============================================================================
// Chroot Mode
// =============================================================================

/// RAII handle for chroot mode. Holds an fd of the outer root; dropping it
/// steps back out so the process can tear down cleanly.
pub struct ChrootGuard {
    old_root: fs::File,
}

/// Enters a plain chroot at `dir` instead of building the namespace sandbox.
pub fn enter_chroot(dir: &Path) -> Result<ChrootGuard> {
    let old_root = fs::File::open("/").map_err(step_err("opening old root"))?;
    unistd::chroot(dir).map_err(|err| Error::Sandbox {
        op: format!("entering chroot at {}", dir.display()),
        reason: err.to_string(),
    })?;
    unistd::chdir("/").map_err(|err| Error::Sandbox {
        op: "entering chroot root".into(),
        reason: err.to_string(),
    })?;
    Ok(ChrootGuard { old_root })
}

impl ChrootGuard {
    fn leave(&self) -> Result<()> {
        // SAFETY: fchdir is safe to call with a valid open directory fd.
        let rc = unsafe { libc::fchdir(self.old_root.as_raw_fd()) };
        if rc != 0 {
            return Err(Error::Sandbox {
                op: "returning to old root".into(),
                reason: io::Error::last_os_error().to_string(),
            });
        }
        unistd::chroot(".").map_err(|err| Error::Sandbox {
            op: "leaving chroot".into(),
            reason: err.to_string(),
        })
    }
}

impl Drop for ChrootGuard {
    fn drop(&mut self) {
        if let Err(err) = self.leave() {
            warn!(error = %err, "leaving chroot failed");
        }
    }
}
