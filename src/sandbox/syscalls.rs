//! Kernel boundary for the isolation-setup sequence.
//!
//! Every namespace, mount, and exec operation the child performs goes through
//! [`Syscalls`]. [`LinuxSyscalls`] forwards to `nix`; tests substitute a
//! recording fake that can fail any single step.

use std::convert::Infallible;
use std::ffi::{CStr, CString};
use std::os::fd::{AsFd, OwnedFd};
use std::path::Path;

use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags};
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sched::CloneFlags;
use nix::sys::prctl;
use nix::sys::signal::Signal;
use nix::sys::stat::Mode;
use nix::unistd::{Gid, Pid, Uid};

/// The kernel operations used between fork and exec.
pub trait Syscalls {
    /// unshare(2)
    fn unshare(&self, flags: CloneFlags) -> nix::Result<()>;

    /// mount(2)
    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> nix::Result<()>;

    /// mkdir(2)
    fn mkdir(&self, path: &Path, mode: Mode) -> nix::Result<()>;

    /// umount2(2)
    fn umount(&self, target: &Path, flags: MntFlags) -> nix::Result<()>;

    /// pivot_root(2)
    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> nix::Result<()>;

    /// chdir(2)
    fn chdir(&self, path: &Path) -> nix::Result<()>;

    /// sethostname(2)
    fn sethostname(&self, name: &str) -> nix::Result<()>;

    /// setgroups(2)
    fn setgroups(&self, groups: &[Gid]) -> nix::Result<()>;

    /// setgid(2)
    fn setgid(&self, gid: Gid) -> nix::Result<()>;

    /// setuid(2)
    fn setuid(&self, uid: Uid) -> nix::Result<()>;

    /// `prctl(PR_SET_PDEATHSIG, SIGKILL)`, then `ESRCH` if the parent has
    /// already exited. Credential changes clear the signal, so it is set
    /// again after every privilege drop.
    fn die_with_parent(&self) -> nix::Result<()>;

    /// execvp(3). Only returns on failure.
    fn execvp(&self, program: &CStr, args: &[CString]) -> nix::Result<Infallible>;
}

/// Real syscalls via `nix`.
#[derive(Debug, Default)]
pub struct LinuxSyscalls {
    parent: Option<Parent>,
}

/// How a forked process tells whether its parent is still alive.
#[derive(Debug)]
enum Parent {
    /// `getppid()` must still return this pid.
    Pid(Pid),
    /// Read end of a pipe whose only write end the parent holds.
    Pipe(OwnedFd),
}

impl LinuxSyscalls {
    /// Syscalls with no parent to track.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Syscalls for a child forked from `parent`.
    #[must_use]
    pub fn child_of(parent: Pid) -> Self {
        Self {
            parent: Some(Parent::Pid(parent)),
        }
    }

    /// Syscalls for a child whose parent holds the write end of `pipe`.
    ///
    /// Needed for a PID namespace init, where `getppid()` is always 0.
    #[must_use]
    pub fn linked_by(pipe: OwnedFd) -> Self {
        Self {
            parent: Some(Parent::Pipe(pipe)),
        }
    }

    fn parent_alive(&self) -> nix::Result<bool> {
        match &self.parent {
            None => Ok(true),
            Some(Parent::Pid(pid)) => Ok(nix::unistd::getppid() == *pid),
            Some(Parent::Pipe(pipe)) => {
                // The parent never writes, so any event is the hangup.
                let mut fds = [PollFd::new(pipe.as_fd(), PollFlags::POLLIN)];
                poll(&mut fds, PollTimeout::ZERO)?;
                Ok(fds[0].revents().is_none_or(|events| events.is_empty()))
            }
        }
    }
}

impl Syscalls for LinuxSyscalls {
    fn unshare(&self, flags: CloneFlags) -> nix::Result<()> {
        nix::sched::unshare(flags)
    }

    fn mount(
        &self,
        source: Option<&Path>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> nix::Result<()> {
        nix::mount::mount(source, target, fstype, flags, data)
    }

    fn mkdir(&self, path: &Path, mode: Mode) -> nix::Result<()> {
        nix::unistd::mkdir(path, mode)
    }

    fn umount(&self, target: &Path, flags: MntFlags) -> nix::Result<()> {
        nix::mount::umount2(target, flags)
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> nix::Result<()> {
        nix::unistd::pivot_root(new_root, put_old)
    }

    fn chdir(&self, path: &Path) -> nix::Result<()> {
        nix::unistd::chdir(path)
    }

    fn sethostname(&self, name: &str) -> nix::Result<()> {
        nix::unistd::sethostname(name)
    }

    fn setgroups(&self, groups: &[Gid]) -> nix::Result<()> {
        nix::unistd::setgroups(groups)
    }

    fn setgid(&self, gid: Gid) -> nix::Result<()> {
        nix::unistd::setgid(gid)
    }

    fn setuid(&self, uid: Uid) -> nix::Result<()> {
        nix::unistd::setuid(uid)
    }

    fn die_with_parent(&self) -> nix::Result<()> {
        prctl::set_pdeathsig(Signal::SIGKILL)?;
        if self.parent_alive()? {
            Ok(())
        } else {
            Err(Errno::ESRCH)
        }
    }

    fn execvp(&self, program: &CStr, args: &[CString]) -> nix::Result<Infallible> {
        nix::unistd::execvp(program, args)
    }
}
