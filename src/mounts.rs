//! Thin typed wrappers over `mount(2)` and `pivot_root(2)`.
//!
//! Linux-only. Every function here mutates the process's mount namespace and
//! requires the capabilities the executor is started with.

use std::path::Path;

use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::unistd;

use crate::error::{Error, Result};

fn syscall_err(op: impl Into<String>, err: nix::Error) -> Error {
    Error::Sandbox {
        op: op.into(),
        reason: err.to_string(),
    }
}

/// Detaches `/` from shared-subtree propagation inherited from the host.
/// systemd remounts everything as MS_SHARED; without this, mounts made here
/// would leak back out of the namespace.
pub fn remount_root_slave() -> Result<()> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_SLAVE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|err| syscall_err("remounting / as slave", err))
}

/// Bind-mounts `src` onto `dst`, optionally marking the mount private.
pub fn bind(src: &Path, dst: &Path, private: bool) -> Result<()> {
    let mut flags = MsFlags::MS_BIND;
    if private {
        flags |= MsFlags::MS_PRIVATE;
    }
    mount(Some(src), dst, None::<&str>, flags, None::<&str>).map_err(|err| {
        syscall_err(
            format!("binding {} to {}", src.display(), dst.display()),
            err,
        )
    })
}

/// Second step of the read-only bind ritual: an existing bind mount cannot be
/// created read-only directly, it has to be remounted with MS_RDONLY.
pub fn remount_readonly(src: &Path, dst: &Path) -> Result<()> {
    mount(
        Some(src),
        dst,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_PRIVATE | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
        None::<&str>,
    )
    .map_err(|err| {
        syscall_err(
            format!("remounting {} read-only at {}", src.display(), dst.display()),
            err,
        )
    })
}

/// Mounts a fresh tmpfs at `dst`.
pub fn tmpfs(dst: &Path) -> Result<()> {
    mount(
        Some("none"),
        dst,
        Some("tmpfs"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|err| syscall_err(format!("mounting tmpfs at {}", dst.display()), err))
}

/// Mounts procfs at `dst`. Must happen before the pivot so the kernel wires it
/// to the namespace's PID view.
pub fn procfs(dst: &Path) -> Result<()> {
    mount(
        Some("none"),
        dst,
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|err| syscall_err(format!("mounting proc at {}", dst.display()), err))
}

/// Swaps the process root for `new_root`, parking the old root at `put_old`.
pub fn pivot(new_root: &Path, put_old: &Path) -> Result<()> {
    unistd::pivot_root(new_root, put_old).map_err(|err| syscall_err("pivoting root", err))
}

/// Marks the mount tree at `path` private, recursively. Required on the old
/// root before detaching it so the unmount does not propagate.
pub fn make_rprivate(path: &Path) -> Result<()> {
    mount(
        None::<&str>,
        path,
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|err| syscall_err(format!("remounting {} private", path.display()), err))
}

/// Lazily unmounts `path`.
pub fn detach(path: &Path) -> Result<()> {
    umount2(path, MntFlags::MNT_DETACH)
        .map_err(|err| syscall_err(format!("unmounting {}", path.display()), err))
}
