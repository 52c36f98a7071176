//! Namespace creation for the sandbox child.
//!
//! A single `unshare(2)` call moves the child into new mount and UTS
//! namespaces and, unless the host network is requested, a new network
//! namespace. `CLONE_NEWPID` only affects children of the caller, so the
//! next process forked becomes PID 1 and records that with
//! [`IsolationState::enter_pid_namespace`].

use std::fmt;

use nix::sched::CloneFlags;
use tracing::{debug, instrument};

use super::SandboxConfig;
use super::syscalls::Syscalls;
use crate::error::IsolationError;

/// A kernel namespace the sandbox can isolate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Mount table
    Mount,
    /// Hostname and domain name
    Uts,
    /// Process IDs
    Pid,
    /// Network interfaces, routes, sockets
    Network,
}

impl Namespace {
    /// The `unshare(2)` flag for this namespace.
    #[must_use]
    pub fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Network => CloneFlags::CLONE_NEWNET,
        }
    }

    /// Namespaces a configuration calls for, in unshare order.
    #[must_use]
    pub fn required(allow_net: bool) -> Vec<Namespace> {
        let mut kinds = vec![Self::Mount, Self::Uts, Self::Pid];
        if !allow_net {
            kinds.push(Self::Network);
        }
        kinds
    }

    /// Combined `unshare(2)` flags for a set of namespaces.
    #[must_use]
    pub fn flags(kinds: &[Namespace]) -> CloneFlags {
        kinds
            .iter()
            .fold(CloneFlags::empty(), |acc, ns| acc | ns.clone_flag())
    }

    /// Comma-separated list for diagnostics.
    #[must_use]
    pub fn describe(kinds: &[Namespace]) -> String {
        kinds
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mount => "mount",
            Self::Uts => "uts",
            Self::Pid => "pid",
            Self::Network => "net",
        })
    }
}

/// How far the isolation-setup sequence has progressed in this process.
///
/// Only [`enter_isolation`], [`IsolationState::enter_pid_namespace`] and
/// [`super::prepare_root`] advance it; the launcher reads it to refuse an exec
/// from a partially isolated process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsolationState {
    entered: Vec<Namespace>,
    pid_init: bool,
    root_sealed: bool,
}

impl IsolationState {
    /// Returns true if `ns` has been unshared.
    #[must_use]
    pub fn has(&self, ns: Namespace) -> bool {
        self.entered.contains(&ns)
    }

    /// True once this process is PID 1 of the new PID namespace.
    #[must_use]
    pub fn is_pid_init(&self) -> bool {
        self.pid_init
    }

    /// True once the root pivot has completed and the old root is detached.
    #[must_use]
    pub fn is_root_sealed(&self) -> bool {
        self.root_sealed
    }

    /// Records that the calling process is the first child forked after
    /// `CLONE_NEWPID`, i.e. PID 1 of the new namespace.
    ///
    /// # Errors
    ///
    /// Returns `IsolationError::PidNamespaceNotEntered` if no PID namespace
    /// was unshared.
    pub fn enter_pid_namespace(mut self) -> Result<Self, IsolationError> {
        if !self.has(Namespace::Pid) {
            return Err(IsolationError::PidNamespaceNotEntered);
        }
        self.pid_init = true;
        Ok(self)
    }

    pub(crate) fn seal_root(mut self) -> Self {
        self.root_sealed = true;
        self
    }

    /// Describes what is still missing before `cfg` may exec, if anything.
    #[must_use]
    pub fn missing_for(&self, cfg: &SandboxConfig) -> Option<String> {
        let missing: Vec<Namespace> = Namespace::required(cfg.allow_net)
            .into_iter()
            .filter(|ns| !self.has(*ns))
            .collect();
        if !missing.is_empty() {
            return Some(format!(
                "{} namespaces not entered",
                Namespace::describe(&missing)
            ));
        }
        if !self.pid_init {
            return Some("process is not PID namespace init".to_string());
        }
        if !self.root_sealed {
            return Some("root filesystem has not been pivoted".to_string());
        }
        None
    }
}

/// Unshares the namespaces `cfg` calls for.
///
/// Must run in a freshly forked child before any mount. Failure is fatal:
/// the caller must exit without executing anything.
///
/// # Errors
///
/// Returns `IsolationError::UnshareFailed` if the kernel refuses any of the
/// namespaces (EPERM without CAP_SYS_ADMIN, EINVAL without kernel support,
/// ENOSPC when a namespace limit is reached).
#[instrument(skip_all, fields(allow_net = cfg.allow_net))]
pub fn enter_isolation<S: Syscalls + ?Sized>(
    sys: &S,
    cfg: &SandboxConfig,
) -> Result<IsolationState, IsolationError> {
    let kinds = Namespace::required(cfg.allow_net);
    debug!(namespaces = %Namespace::describe(&kinds), "Unsharing namespaces");

    sys.unshare(Namespace::flags(&kinds))
        .map_err(|source| IsolationError::UnshareFailed {
            kinds: kinds.clone(),
            source,
        })?;

    debug!("Namespaces entered");
    Ok(IsolationState {
        entered: kinds,
        pid_init: false,
        root_sealed: false,
    })
}

#[cfg(test)]
mod tests {
    use nix::errno::Errno;

    use super::*;
    use crate::sandbox::syscalls::fake::{Op, RecordingSyscalls};
    use crate::sandbox::test_config;

    #[test]
    fn test_isolated_network_by_default() {
        let cfg = test_config(false);
        let sys = RecordingSyscalls::new();

        let state = enter_isolation(&sys, &cfg).expect("unshare should succeed");

        assert_eq!(
            sys.ops(),
            vec![Op::Unshare(
                CloneFlags::CLONE_NEWNS
                    | CloneFlags::CLONE_NEWUTS
                    | CloneFlags::CLONE_NEWPID
                    | CloneFlags::CLONE_NEWNET
            )]
        );
        assert!(state.has(Namespace::Network));
        assert!(!state.is_pid_init());
        assert!(!state.is_root_sealed());
    }

    #[test]
    fn test_allow_net_shares_host_network() {
        let cfg = test_config(true);
        let sys = RecordingSyscalls::new();

        let state = enter_isolation(&sys, &cfg).expect("unshare should succeed");

        assert_eq!(
            sys.ops(),
            vec![Op::Unshare(
                CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWUTS | CloneFlags::CLONE_NEWPID
            )]
        );
        assert!(state.has(Namespace::Mount));
        assert!(!state.has(Namespace::Network));
    }

    #[test]
    fn test_unshare_failure_is_reported_with_kinds() {
        let cfg = test_config(false);
        let sys = RecordingSyscalls::failing_at(0, Errno::EPERM);

        let err = enter_isolation(&sys, &cfg).expect_err("unshare should fail");

        match err {
            IsolationError::UnshareFailed { kinds, source } => {
                assert_eq!(source, Errno::EPERM);
                assert_eq!(kinds, Namespace::required(false));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_pid_init_requires_pid_namespace() {
        let err = IsolationState::default()
            .enter_pid_namespace()
            .expect_err("no pid namespace was entered");
        assert!(matches!(err, IsolationError::PidNamespaceNotEntered));
    }

    #[test]
    fn test_missing_for_reports_each_gap() {
        let cfg = test_config(false);
        let sys = RecordingSyscalls::new();

        let fresh = IsolationState::default();
        assert!(
            fresh
                .missing_for(&cfg)
                .is_some_and(|m| m.contains("namespaces not entered"))
        );

        let unshared = enter_isolation(&sys, &cfg).expect("unshare should succeed");
        assert_eq!(
            unshared.missing_for(&cfg).as_deref(),
            Some("process is not PID namespace init")
        );

        let init = unshared
            .enter_pid_namespace()
            .expect("pid namespace entered");
        assert_eq!(
            init.missing_for(&cfg).as_deref(),
            Some("root filesystem has not been pivoted")
        );

        assert_eq!(init.seal_root().missing_for(&cfg), None);
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            Namespace::describe(&[Namespace::Mount, Namespace::Pid]),
            "mount, pid"
        );
        assert_eq!(Namespace::Network.to_string(), "net");
    }
}
