//! Final handoff: hostname, privilege drop, exec.

use std::convert::Infallible;
use std::ffi::CString;

use nix::unistd::{Gid, Uid};
use tracing::{debug, instrument, trace};

use super::SandboxConfig;
use super::config::RunAs;
use super::namespace::IsolationState;
use super::syscalls::Syscalls;
use crate::error::LaunchError;

/// Replaces the current process with the sandboxed command.
///
/// Only returns on failure. Nothing is executed unless `state` shows every
/// namespace `cfg` calls for, PID-namespace init, and a sealed root.
///
/// # Errors
///
/// - `LaunchError::IsolationIncomplete` if any isolation step is missing
/// - `LaunchError::HostnameFailed` if the UTS hostname cannot be set
/// - `LaunchError::PrivilegeDropFailed` if switching to `cfg.run_as` fails
/// - `LaunchError::ParentDeathSignalFailed` if the parent-death signal cannot
///   be set again after the switch, or the supervisor is already gone
/// - `LaunchError::InvalidArgument` if an argument contains a NUL byte
/// - `LaunchError::ExecFailed` if the program cannot be executed
#[instrument(skip_all, fields(program = %cfg.command[0]))]
pub fn launch<S: Syscalls + ?Sized>(
    sys: &S,
    cfg: &SandboxConfig,
    state: &IsolationState,
) -> Result<Infallible, LaunchError> {
    if let Some(missing) = state.missing_for(cfg) {
        return Err(LaunchError::IsolationIncomplete { missing });
    }

    // Checked before any further syscall.
    let argv = to_argv(&cfg.command)?;

    sys.sethostname(&cfg.hostname)
        .map_err(|source| LaunchError::HostnameFailed {
            hostname: cfg.hostname.clone(),
            source,
        })?;
    trace!(hostname = %cfg.hostname, "Hostname set");

    if let Some(run_as) = cfg.run_as {
        drop_privileges(sys, run_as)?;
        // setuid/setgid cleared PR_SET_PDEATHSIG.
        sys.die_with_parent()
            .map_err(|source| LaunchError::ParentDeathSignalFailed { source })?;
    }

    debug!(argc = argv.len(), "Executing command");
    let errno = match sys.execvp(&argv[0], &argv) {
        Ok(never) => match never {},
        Err(errno) => errno,
    };
    Err(LaunchError::ExecFailed {
        command: cfg.command[0].clone(),
        errno,
    })
}

/// Switches to `run_as`: supplementary groups, then gid, then uid. The uid
/// goes last because it gives up the right to change the other two.
fn drop_privileges<S: Syscalls + ?Sized>(sys: &S, run_as: RunAs) -> Result<(), LaunchError> {
    let RunAs { uid, gid } = run_as;
    let failed = |step, source| LaunchError::PrivilegeDropFailed {
        uid,
        gid,
        step,
        source,
    };

    sys.setgroups(&[Gid::from_raw(gid)])
        .map_err(|e| failed("setgroups", e))?;
    sys.setgid(Gid::from_raw(gid))
        .map_err(|e| failed("setgid", e))?;
    sys.setuid(Uid::from_raw(uid))
        .map_err(|e| failed("setuid", e))?;

    debug!(uid, gid, "Privileges dropped");
    Ok(())
}

fn to_argv(command: &[String]) -> Result<Vec<CString>, LaunchError> {
    command
        .iter()
        .map(|arg| {
            CString::new(arg.as_bytes()).map_err(|_| LaunchError::InvalidArgument {
                arg: arg.clone(),
            })
        })
        .collect()
}
