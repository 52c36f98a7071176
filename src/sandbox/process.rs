//! Process layout of one sandboxed invocation.
//!
//! ```text
//! supervisor ── fork ──> child: unshare(mnt|uts|pid[|net])
//!     │                    └── fork ──> init (PID 1): prepare_root, launch/exec
//!     │                    waitpid(init) ──> exit with init's status
//! waitpid(child) ──> exit with child's status
//! ```
//!
//! The second fork exists because `CLONE_NEWPID` only applies to children of
//! the caller. Both forked processes set `PR_SET_PDEATHSIG` and then confirm
//! their parent is still alive, so the tree dies with its supervisor even if
//! the supervisor is killed mid-fork. The child compares `getppid()` with the
//! supervisor's pid. Init's `getppid()` is always 0, so it watches a pipe held
//! open by the child instead.

// fork(2) is unsafe in nix; the supervisor is single-threaded when it forks.
#![allow(unsafe_code)]

use std::convert::Infallible;

use nix::fcntl::OFlag;
use nix::unistd::{ForkResult, Pid, fork, getpid, pipe2};
use tracing::debug;

use super::syscalls::{LinuxSyscalls, Syscalls};
use super::{
    ExitOutcome, IsolationState, SandboxConfig, enter_isolation, launch, prepare_root, supervise,
};
use crate::error::{Error, IsolationError, SupervisorError, report};

/// Runs `cfg.command` in a fresh sandbox and waits for it.
///
/// Returns in the supervisor only; the forked processes exit directly.
///
/// # Errors
///
/// Returns `SupervisorError` if the sandbox process cannot be forked or
/// waited on. Setup failures inside the sandbox are reported on stderr by
/// the sandbox itself and surface here as its exit status.
pub fn run(cfg: &SandboxConfig) -> Result<ExitOutcome, Error> {
    let supervisor = getpid();
    debug!("Forking sandbox process");
    // SAFETY: no other threads exist; the child only calls into this crate
    // and exits without returning to the caller.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => Ok(supervise(child)?),
        Ok(ForkResult::Child) => exit_with(isolate(cfg, supervisor)),
        Err(errno) => Err(SupervisorError::ForkFailed(errno).into()),
    }
}

/// Child side: enter namespaces, fork PID 1, relay its status.
fn isolate(cfg: &SandboxConfig, supervisor: Pid) -> Result<ExitOutcome, Error> {
    let sys = LinuxSyscalls::child_of(supervisor);
    sys.die_with_parent().map_err(IsolationError::ParentDeathSignal)?;
    let state = enter_isolation(&sys, cfg)?;

    // Init sees end-of-file once this process, the only writer, is gone.
    let (link, keepalive) = pipe2(OFlag::O_CLOEXEC).map_err(IsolationError::ParentDeathSignal)?;

    // SAFETY: as in `run`.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            drop(link);
            let outcome = supervise(child);
            drop(keepalive);
            Ok(outcome?)
        }
        Ok(ForkResult::Child) => {
            drop(keepalive);
            let sys = LinuxSyscalls::linked_by(link);
            let result = sys
                .die_with_parent()
                .map_err(|errno| Error::from(IsolationError::ParentDeathSignal(errno)))
                .and_then(|()| seal_and_exec(&sys, cfg, state));
            match result {
                Ok(never) => match never {},
                Err(err) => exit_with(Err(err)),
            }
        }
        Err(errno) => Err(IsolationError::ForkFailed(errno).into()),
    }
}

/// PID 1 side: build the root, then exec. Only returns on failure.
pub(crate) fn seal_and_exec<S: Syscalls + ?Sized>(
    sys: &S,
    cfg: &SandboxConfig,
    state: IsolationState,
) -> Result<Infallible, Error> {
    let state = state.enter_pid_namespace()?;
    let state = prepare_root(sys, cfg, state)?;
    Ok(launch(sys, cfg, &state)?)
}

/// Terminates a forked process with the status `result` calls for.
fn exit_with(result: Result<ExitOutcome, Error>) -> ! {
    let code = match result {
        Ok(outcome) => outcome.exit_code(),
        Err(err) => {
            let code = err.exit_code();
            report(err);
            code
        }
    };
    // SAFETY: _exit skips atexit handlers and stdio flushing inherited from
    // the supervisor, which is what a forked child must do.
    unsafe { nix::libc::_exit(i32::from(code)) }
}

#[cfg(test)]
mod tests {
    use nix::errno::Errno;
    use tempfile::TempDir;

    use super::*;
    use crate::error::LaunchError;
    use crate::sandbox::config_with_root;
    use crate::sandbox::syscalls::fake::{Op, RecordingSyscalls};

    #[test]
    fn test_full_sequence_order() {
        let dir = TempDir::new().expect("tempdir");
        let cfg = config_with_root(dir.path());
        let sys = RecordingSyscalls::new();

        let state = enter_isolation(&sys, &cfg).expect("unshare should succeed");
        let err = match seal_and_exec(&sys, &cfg, state) {
            Ok(never) => match never {},
            Err(err) => err,
        };
        assert!(matches!(err, Error::Launch(LaunchError::ExecFailed { .. })));

        let ops = sys.ops();
        let unshare = ops
            .iter()
            .position(|op| matches!(op, Op::Unshare(_)))
            .expect("unshare recorded");
        let first_mount = ops.iter().position(Op::is_mount).expect("mounts recorded");
        let pivot = ops
            .iter()
            .position(|op| matches!(op, Op::PivotRoot(..)))
            .expect("pivot recorded");
        let detach = ops
            .iter()
            .position(|op| matches!(op, Op::Umount(..)))
            .expect("detach recorded");
        let exec = ops.iter().position(Op::is_exec).expect("exec recorded");

        assert_eq!(unshare, 0);
        assert!(unshare < first_mount);
        assert!(first_mount < pivot);
        assert!(pivot < detach);
        assert!(detach < exec);
        assert_eq!(exec, ops.len() - 1);
    }

    #[test]
    fn test_no_exec_after_any_setup_failure() {
        let dir = TempDir::new().expect("tempdir");
        let cfg = config_with_root(dir.path());

        let total = {
            let sys = RecordingSyscalls::new();
            let state = enter_isolation(&sys, &cfg).expect("unshare should succeed");
            let _ = seal_and_exec(&sys, &cfg, state);
            sys.ops().len()
        };

        // Every step before exec, unshare included.
        for index in 0..total - 1 {
            let sys = RecordingSyscalls::failing_at(index, Errno::EPERM);
            let result = enter_isolation(&sys, &cfg)
                .map_err(Error::from)
                .and_then(|state| seal_and_exec(&sys, &cfg, state));

            let err = match result {
                Ok(never) => match never {},
                Err(err) => err,
            };
            assert!(
                !matches!(err, Error::Launch(LaunchError::ExecFailed { .. })),
                "step {index} reached exec"
            );
            assert!(!sys.ops().iter().any(Op::is_exec), "step {index} reached exec");
            assert_eq!(sys.ops().len(), index + 1);
        }
    }

    #[test]
    fn test_unshare_failure_never_mounts() {
        let dir = TempDir::new().expect("tempdir");
        let cfg = config_with_root(dir.path());
        let sys = RecordingSyscalls::failing_at(0, Errno::EPERM);

        let err = enter_isolation(&sys, &cfg).expect_err("unshare fails");

        assert_eq!(Error::from(err).exit_code(), crate::error::EXIT_SETUP_FAILED);
        assert!(!sys.ops().iter().any(Op::is_mount));
    }

    #[test]
    fn test_pid_init_needs_unshare_first() {
        let dir = TempDir::new().expect("tempdir");
        let cfg = config_with_root(dir.path());
        let sys = RecordingSyscalls::new();

        let err = match seal_and_exec(&sys, &cfg, IsolationState::default()) {
            Ok(never) => match never {},
            Err(err) => err,
        };

        assert!(matches!(
            err,
            Error::Isolation(IsolationError::PidNamespaceNotEntered)
        ));
        assert!(sys.ops().is_empty());
    }
}
