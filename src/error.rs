//! Error types for nsbox.
//!
//! Uses thiserror for deriving std::error::Error and miette for rich diagnostics.
//! Every setup error is fatal: the sandbox never falls back to weaker isolation.

use std::path::PathBuf;

use miette::Diagnostic;
use nix::errno::Errno;
use thiserror::Error;

use crate::sandbox::Namespace;

/// Exit code for usage and argument errors.
pub const EXIT_USAGE: u8 = 1;

/// Exit code for failures while setting up isolation (preflight, fork,
/// namespaces, mounts, pivot, privilege drop).
pub const EXIT_SETUP_FAILED: u8 = 125;

/// Exit code when the command exists but cannot be executed.
pub const EXIT_CANNOT_EXECUTE: u8 = 126;

/// Exit code when the command cannot be found inside the new root.
pub const EXIT_NOT_FOUND: u8 = 127;

/// Top-level error type for the application.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Invalid invocation
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    /// System requirements not met
    #[error(transparent)]
    #[diagnostic(transparent)]
    SystemRequirements(#[from] SystemRequirementsError),

    /// Namespace creation failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Isolation(#[from] IsolationError),

    /// Root filesystem setup failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Fs(#[from] FsError),

    /// Command launch failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Launch(#[from] LaunchError),

    /// Waiting on the sandbox failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl Error {
    /// Returns the process exit code that reports this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => EXIT_USAGE,
            Self::Launch(LaunchError::ExecFailed { errno, .. }) => match errno {
                Errno::ENOENT | Errno::ENOTDIR => EXIT_NOT_FOUND,
                _ => EXIT_CANNOT_EXECUTE,
            },
            _ => EXIT_SETUP_FAILED,
        }
    }
}

/// Errors in the requested sandbox parameters.
#[derive(Error, Debug, Diagnostic)]
pub enum ConfigError {
    /// No root path given
    #[error("No sandbox root given")]
    #[diagnostic(
        code(nsbox::config::missing_root),
        help("Pass the directory to use as the new root with --root <path>")
    )]
    MissingRoot,

    /// Empty command vector
    #[error("No command given")]
    #[diagnostic(
        code(nsbox::config::missing_command),
        help("Separate the command from options with --, e.g. nsbox --root <path> -- /bin/sh")
    )]
    MissingCommand,

    /// Root path cannot be resolved to an existing directory
    #[error("Root path {} is not an existing directory", .path.display())]
    #[diagnostic(code(nsbox::config::invalid_path))]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Hostname cannot be set in a UTS namespace
    #[error("Invalid hostname {hostname:?}: {reason}")]
    #[diagnostic(code(nsbox::config::invalid_hostname))]
    InvalidHostname { hostname: String, reason: String },

    /// Unparseable --user value
    #[error("Invalid user {value:?}")]
    #[diagnostic(
        code(nsbox::config::invalid_user),
        help("Expected a numeric <uid> or <uid>:<gid>")
    )]
    InvalidUser { value: String },
}

/// Errors related to host prerequisites, checked before forking.
#[derive(Error, Debug, Diagnostic)]
pub enum SystemRequirementsError {
    /// Kernel version too old
    #[error("Kernel version {found} is below minimum required {required}")]
    #[diagnostic(
        code(nsbox::system::kernel_version),
        help("PID and mount namespaces with pivot_root need kernel 3.8 or later")
    )]
    KernelTooOld { found: String, required: String },

    /// Not running with the privileges needed to create namespaces
    #[error("Creating namespaces requires root (effective uid is {euid})")]
    #[diagnostic(
        code(nsbox::system::privilege),
        help("Run nsbox as root, or pass --skip-checks if it holds CAP_SYS_ADMIN")
    )]
    PrivilegeRequired { euid: u32 },

    /// A probe process could not unshare the needed namespaces
    #[error("Kernel refused to create namespaces: {errno}")]
    #[diagnostic(
        code(nsbox::system::namespaces),
        help(
            "Check that the kernel has CONFIG_NAMESPACES and that no seccomp profile \
             blocks unshare"
        )
    )]
    NamespacesUnavailable { errno: Errno },

    /// Failed to read system information
    #[error("Failed to read system information: {context}")]
    #[diagnostic(code(nsbox::system::read_failed))]
    ReadFailed {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors while entering the isolation namespaces.
#[derive(Error, Debug, Diagnostic)]
pub enum IsolationError {
    /// unshare(2) failed
    #[error("Failed to unshare {} namespaces", Namespace::describe(.kinds))]
    #[diagnostic(
        code(nsbox::isolation::unshare),
        help("EPERM means missing CAP_SYS_ADMIN; EINVAL means the kernel lacks support")
    )]
    UnshareFailed {
        kinds: Vec<Namespace>,
        #[source]
        source: Errno,
    },

    /// Forking the PID namespace init process failed
    #[error("Failed to fork PID namespace init")]
    #[diagnostic(code(nsbox::isolation::fork))]
    ForkFailed(#[source] Errno),

    /// PR_SET_PDEATHSIG failed, or the parent exited before it took effect
    #[error("Failed to tie the sandbox to its supervisor")]
    #[diagnostic(code(nsbox::isolation::parent_death_signal))]
    ParentDeathSignal(#[source] Errno),

    /// A process claimed PID 1 without a PID namespace
    #[error("No PID namespace was unshared before forking init")]
    #[diagnostic(code(nsbox::isolation::pid_namespace))]
    PidNamespaceNotEntered,
}

/// Errors while building the sandbox root filesystem.
#[derive(Error, Debug, Diagnostic)]
pub enum FsError {
    /// Mount isolation missing when filesystem setup started
    #[error("Refusing to mount outside a private mount namespace")]
    #[diagnostic(code(nsbox::rootfs::no_mount_namespace))]
    MountNamespaceRequired,

    /// Bind mount or propagation change failed
    #[error("Bind mount of {} failed", .path.display())]
    #[diagnostic(code(nsbox::rootfs::bind))]
    BindMountFailed {
        path: PathBuf,
        #[source]
        source: Errno,
    },

    /// procfs mount failed
    #[error("Mounting proc at {} failed", .path.display())]
    #[diagnostic(code(nsbox::rootfs::proc))]
    ProcMountFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// pivot_root failed
    #[error("pivot_root into {} failed", .path.display())]
    #[diagnostic(
        code(nsbox::rootfs::pivot),
        help("The root must be a mount point on a filesystem other than the initramfs rootfs")
    )]
    PivotFailed {
        path: PathBuf,
        #[source]
        source: Errno,
    },

    /// Detaching the old root failed
    #[error("Detaching the old root failed")]
    #[diagnostic(code(nsbox::rootfs::detach))]
    OldRootDetachFailed(#[source] Errno),

    /// chdir failed
    #[error("chdir to {} failed", .path.display())]
    #[diagnostic(code(nsbox::rootfs::chdir))]
    ChdirFailed {
        path: PathBuf,
        #[source]
        source: Errno,
    },
}

/// Errors at exec time.
#[derive(Error, Debug, Diagnostic)]
pub enum LaunchError {
    /// Exec attempted before isolation was complete
    #[error("Refusing to exec: {missing}")]
    #[diagnostic(code(nsbox::launch::isolation_incomplete))]
    IsolationIncomplete { missing: String },

    /// sethostname failed
    #[error("Setting hostname {hostname:?} failed")]
    #[diagnostic(code(nsbox::launch::hostname))]
    HostnameFailed {
        hostname: String,
        #[source]
        source: Errno,
    },

    /// setgroups/setgid/setuid failed
    #[error("Dropping privileges to {uid}:{gid} failed at {step}")]
    #[diagnostic(code(nsbox::launch::privileges))]
    PrivilegeDropFailed {
        uid: u32,
        gid: u32,
        step: &'static str,
        #[source]
        source: Errno,
    },

    /// PR_SET_PDEATHSIG could not be re-armed after a credential change
    #[error("Failed to tie the sandbox to its supervisor after dropping privileges")]
    #[diagnostic(
        code(nsbox::launch::parent_death_signal),
        help("ESRCH means the supervisor exited during setup")
    )]
    ParentDeathSignalFailed {
        #[source]
        source: Errno,
    },

    /// Argument cannot be passed to exec
    #[error("Argument {arg:?} contains a NUL byte")]
    #[diagnostic(code(nsbox::launch::argument))]
    InvalidArgument { arg: String },

    /// execvp failed
    #[error("Executing {command} failed: {errno}")]
    #[diagnostic(code(nsbox::launch::exec))]
    ExecFailed { command: String, errno: Errno },
}

/// Errors while waiting on the sandbox.
#[derive(Error, Debug, Diagnostic)]
pub enum SupervisorError {
    /// fork(2) failed in the supervisor
    #[error("Failed to fork sandbox process")]
    #[diagnostic(code(nsbox::supervisor::fork))]
    ForkFailed(#[source] Errno),

    /// waitpid(2) failed
    #[error("Waiting for pid {pid} failed")]
    #[diagnostic(code(nsbox::supervisor::wait))]
    WaitFailed {
        pid: i32,
        #[source]
        source: Errno,
    },
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Renders `err` with its diagnostic chain on stderr.
pub fn report(err: Error) {
    eprintln!("{:?}", miette::Report::new(err));
}
