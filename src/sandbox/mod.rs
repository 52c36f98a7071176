//! Namespace sandbox: configuration, isolation setup, and supervision.
//!
//! The setup sequence runs in a forked child and is strictly ordered:
//!
//! 1. [`enter_isolation`]: unshare mount, UTS, PID and (optionally) network
//! 2. [`prepare_root`]: private bind of the root, `/proc`, `pivot_root`
//! 3. [`launch`]: hostname, optional privilege drop, `execvp`
//!
//! Each step takes the [`IsolationState`] produced by the previous one and
//! refuses to run if it is incomplete.
//!
//! # Example
//!
//! ```no_run
//! use nsbox::sandbox::{self, SandboxRequest};
//!
//! let config = sandbox::resolve(SandboxRequest {
//!     root: Some("/srv/sandboxroot".into()),
//!     command: vec!["/bin/echo".into(), "hello".into()],
//!     ..SandboxRequest::default()
//! })?;
//!
//! let outcome = sandbox::run(&config)?;
//! assert!(outcome.success());
//! # Ok::<(), nsbox::Error>(())
//! ```

mod config;
mod launcher;
mod namespace;
mod process;
mod rootfs;
mod supervisor;
pub mod syscalls;

pub use config::{
    DEFAULT_HOSTNAME, MAX_HOSTNAME_LEN, RunAs, SandboxConfig, SandboxRequest, resolve,
};
pub use launcher::launch;
pub use namespace::{IsolationState, Namespace, enter_isolation};
pub use process::run;
pub use rootfs::prepare_root;
pub use supervisor::{ExitOutcome, supervise};

#[cfg(test)]
pub(crate) fn config_with_root(root: &std::path::Path) -> SandboxConfig {
    SandboxConfig {
        root_path: std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf()),
        allow_net: false,
        command: vec!["/bin/echo".to_string(), "hello".to_string()],
        hostname: DEFAULT_HOSTNAME.to_string(),
        run_as: None,
    }
}

#[cfg(test)]
pub(crate) fn test_config(allow_net: bool) -> SandboxConfig {
    SandboxConfig {
        allow_net,
        ..config_with_root(std::path::Path::new("/srv/sandboxroot"))
    }
}
