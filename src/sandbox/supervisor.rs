//! Waiting on the sandbox and relaying its status.

use std::fmt;

use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, instrument, trace};

use crate::error::SupervisorError;

/// How the sandboxed process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with this code.
    Exited(i32),
    /// Killed by this signal number.
    Signaled(i32),
}

impl ExitOutcome {
    /// Maps a terminal wait status to an outcome. Returns `None` for
    /// stop/continue notifications.
    #[must_use]
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(Self::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(Self::Signaled(signal as i32)),
            _ => None,
        }
    }

    /// Exit code the supervisor itself should exit with: the child's own code,
    /// or `128 + signal`.
    #[must_use]
    pub fn exit_code(self) -> u8 {
        let code = match self {
            Self::Exited(code) => code,
            Self::Signaled(signal) => 128 + signal,
        };
        u8::try_from(code.clamp(0, 255)).unwrap_or(u8::MAX)
    }

    /// True for a normal exit with code 0.
    #[must_use]
    pub fn success(self) -> bool {
        self == Self::Exited(0)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}

/// Blocks until `child` terminates and returns how it ended.
///
/// Retries on `EINTR`; there is no timeout.
///
/// # Errors
///
/// Returns `SupervisorError::WaitFailed` if `waitpid` fails for any other
/// reason (e.g. `ECHILD`).
#[instrument(skip_all, fields(pid = child.as_raw()))]
pub fn supervise(child: Pid) -> Result<ExitOutcome, SupervisorError> {
    loop {
        match waitpid(child, None) {
            Ok(status) => {
                trace!(?status, "wait status");
                if let Some(outcome) = ExitOutcome::from_wait_status(status) {
                    debug!(%outcome, "Sandbox terminated");
                    return Ok(outcome);
                }
            }
            Err(Errno::EINTR) => continue,
            Err(source) => {
                return Err(SupervisorError::WaitFailed {
                    pid: child.as_raw(),
                    source,
                });
            }
        }
    }
}
