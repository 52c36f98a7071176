//! nsbox - run a command inside a private root with Linux namespaces.
//!
//! The supervisor forks a child that unshares mount, UTS, PID and (unless
//! the host network is requested) network namespaces, bind-mounts the given
//! root privately, mounts `/proc`, pivots into the root, and execs the
//! command. The supervisor waits and exits with the command's status.
//!
//! # Platform Requirements
//!
//! - Linux kernel 3.8+
//! - Root (or CAP_SYS_ADMIN) to create namespaces and mount
//!
//! # Example
//!
//! ```no_run
//! use nsbox::{sandbox, system};
//!
//! fn main() -> miette::Result<()> {
//!     let config = sandbox::resolve(sandbox::SandboxRequest {
//!         root: Some("/srv/sandboxroot".into()),
//!         command: vec!["/bin/echo".into(), "hello".into()],
//!         ..Default::default()
//!     })?;
//!
//!     system::check_all(config.allow_net())?;
//!     let outcome = sandbox::run(&config)?;
//!     std::process::exit(i32::from(outcome.exit_code()));
//! }
//! ```

pub mod error;
pub mod sandbox;
pub mod system;

// Re-export commonly used types
pub use error::{Error, Result};
pub use sandbox::{ExitOutcome, SandboxConfig, SandboxRequest};
