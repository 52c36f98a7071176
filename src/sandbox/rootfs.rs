//! Root filesystem construction inside the private mount namespace.
//!
//! # Mount Order
//!
//! 1. `/` made recursively private, so nothing below propagates to the host
//! 2. Root bind-mounted onto itself (a mount point `pivot_root` accepts), private
//! 3. Fresh procfs at `<root>/proc` for the new PID namespace. A missing
//!    `proc` directory is created in the root and left there afterwards;
//!    it is the only write to the root itself
//! 4. `pivot_root(".", ".")` from inside the root, then the old root, now
//!    stacked on `/`, is lazily detached
//! 5. `chdir("/")`
//!
//! # Security Considerations
//!
//! - Runs only when [`IsolationState`] shows a private mount namespace; a
//!   mount in the host namespace would outlive the sandbox
//! - procfs uses `MS_NOSUID | MS_NODEV | MS_NOEXEC`
//! - Every failure is fatal; a half-pivoted root can leave host paths reachable

use std::io;
use std::path::{Path, PathBuf};

use nix::mount::{MntFlags, MsFlags};
use nix::sys::stat::Mode;
use tracing::{debug, instrument, trace};

use super::SandboxConfig;
use super::namespace::{IsolationState, Namespace};
use super::syscalls::Syscalls;
use crate::error::FsError;

/// Builds the sandbox root and pivots into it.
///
/// # Errors
///
/// - `FsError::MountNamespaceRequired` if `state` has no mount namespace; no
///   mount is attempted
/// - `FsError::BindMountFailed` if `/` cannot be made private or the root
///   cannot be bind-mounted
/// - `FsError::ProcMountFailed` if `<root>/proc` cannot be created or procfs
///   cannot be mounted
/// - `FsError::PivotFailed` / `FsError::OldRootDetachFailed` if the root
///   switch fails
/// - `FsError::ChdirFailed` if the working directory cannot be changed
#[instrument(skip_all, fields(root = %cfg.root_path.display()))]
pub fn prepare_root<S: Syscalls + ?Sized>(
    sys: &S,
    cfg: &SandboxConfig,
    state: IsolationState,
) -> Result<IsolationState, FsError> {
    if !state.has(Namespace::Mount) {
        return Err(FsError::MountNamespaceRequired);
    }

    let root = cfg.root_path.as_path();
    debug!("Preparing sandbox root");

    make_private(sys, Path::new("/"))?;
    bind_root(sys, root)?;
    mount_proc(sys, &root.join("proc"))?;
    pivot_into(sys, root)?;

    debug!("Sandbox root sealed");
    Ok(state.seal_root())
}

fn make_private<S: Syscalls + ?Sized>(sys: &S, target: &Path) -> Result<(), FsError> {
    trace!(target = %target.display(), "Setting mount propagation to private");
    sys.mount(
        None,
        target,
        None,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None,
    )
    .map_err(|source| FsError::BindMountFailed {
        path: target.to_path_buf(),
        source,
    })
}

/// Bind-mounts `root` onto itself and marks the new mount private.
fn bind_root<S: Syscalls + ?Sized>(sys: &S, root: &Path) -> Result<(), FsError> {
    trace!("Bind-mounting root onto itself");
    sys.mount(
        Some(root),
        root,
        None,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None,
    )
    .map_err(|source| FsError::BindMountFailed {
        path: root.to_path_buf(),
        source,
    })?;

    make_private(sys, root)
}

/// Mounts a fresh procfs at `target`, creating the mount point (mode 0555)
/// if needed.
#[instrument(skip_all, fields(target = %target.display()))]
fn mount_proc<S: Syscalls + ?Sized>(sys: &S, target: &Path) -> Result<(), FsError> {
    let failed = |source: io::Error| FsError::ProcMountFailed {
        path: target.to_path_buf(),
        source,
    };

    if !target.is_dir() {
        trace!("Creating proc mount point");
        sys.mkdir(target, Mode::from_bits_truncate(0o555))
            .map_err(|errno| failed(io::Error::from(errno)))?;
    }

    sys.mount(
        Some(Path::new("proc")),
        target,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None,
    )
    .map_err(|errno| failed(io::Error::from(errno)))?;

    debug!("procfs mounted");
    Ok(())
}

/// Switches the root to `root` and detaches the old one.
///
/// `pivot_root(".", ".")` stacks the old root on top of the new one at `/`,
/// so unmounting `.` removes it without needing a put-old directory inside
/// the sandbox root.
fn pivot_into<S: Syscalls + ?Sized>(sys: &S, root: &Path) -> Result<(), FsError> {
    chdir(sys, root)?;

    let here = Path::new(".");
    sys.pivot_root(here, here)
        .map_err(|source| FsError::PivotFailed {
            path: root.to_path_buf(),
            source,
        })?;
    trace!("pivot_root done");

    sys.umount(here, MntFlags::MNT_DETACH)
        .map_err(FsError::OldRootDetachFailed)?;
    trace!("Old root detached");

    chdir(sys, Path::new("/"))
}

fn chdir<S: Syscalls + ?Sized>(sys: &S, path: &Path) -> Result<(), FsError> {
    sys.chdir(path).map_err(|source| FsError::ChdirFailed {
        path: PathBuf::from(path),
        source,
    })
}
