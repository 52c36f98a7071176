//! Sandbox configuration and its validation.
//!
//! [`SandboxRequest`] carries what the operator asked for; [`resolve`] turns
//! it into a [`SandboxConfig`] or a [`ConfigError`] without touching any
//! namespace or mount.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use crate::error::ConfigError;

/// Hostname used inside the UTS namespace when none is requested.
pub const DEFAULT_HOSTNAME: &str = "sandbox";

/// Maximum hostname length accepted by sethostname(2).
pub const MAX_HOSTNAME_LEN: usize = 64;

/// Identity to switch to before exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunAs {
    /// Target user id.
    pub uid: u32,
    /// Target group id; also the only supplementary group.
    pub gid: u32,
}

impl RunAs {
    /// Parses `<uid>` or `<uid>:<gid>`. The gid defaults to the uid.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidUser` for anything else.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidUser {
            value: value.to_string(),
        };
        let (uid, gid) = match value.split_once(':') {
            Some((uid, gid)) => (uid, Some(gid)),
            None => (value, None),
        };
        let uid = uid.parse::<u32>().map_err(|_| invalid())?;
        let gid = match gid {
            Some(gid) => gid.parse::<u32>().map_err(|_| invalid())?,
            None => uid,
        };
        Ok(Self { uid, gid })
    }
}

/// Unvalidated sandbox parameters, as supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct SandboxRequest {
    /// Directory to use as the new root.
    pub root: Option<PathBuf>,
    /// Share the host network namespace.
    pub allow_net: bool,
    /// Hostname inside the sandbox; [`DEFAULT_HOSTNAME`] if unset.
    pub hostname: Option<String>,
    /// Raw `--user` value.
    pub user: Option<String>,
    /// Everything after `--`.
    pub command: Vec<String>,
}

/// Validated, immutable configuration for one sandboxed invocation.
///
/// Only [`resolve`] produces one, so `root_path` is always a canonical
/// existing directory and `command` is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxConfig {
    pub(crate) root_path: PathBuf,
    pub(crate) allow_net: bool,
    pub(crate) command: Vec<String>,
    pub(crate) hostname: String,
    pub(crate) run_as: Option<RunAs>,
}

impl SandboxConfig {
    /// Canonical path of the new root.
    #[must_use]
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Whether the host network namespace is shared.
    #[must_use]
    pub fn allow_net(&self) -> bool {
        self.allow_net
    }

    /// argv of the sandboxed command; `command()[0]` is the program.
    #[must_use]
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Hostname set in the UTS namespace.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Identity to drop to before exec, if any.
    #[must_use]
    pub fn run_as(&self) -> Option<RunAs> {
        self.run_as
    }
}

/// Validates a request into a [`SandboxConfig`].
///
/// # Errors
///
/// - `ConfigError::MissingRoot` if no root path was given
/// - `ConfigError::MissingCommand` if the command vector or argv[0] is empty
/// - `ConfigError::InvalidPath` if the root cannot be canonicalized to a directory
/// - `ConfigError::InvalidHostname` / `ConfigError::InvalidUser` for bad options
#[instrument(skip_all)]
pub fn resolve(request: SandboxRequest) -> Result<SandboxConfig, ConfigError> {
    let root = request
        .root
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or(ConfigError::MissingRoot)?;

    if request.command.first().is_none_or(|program| program.is_empty()) {
        return Err(ConfigError::MissingCommand);
    }

    let root_path = canonical_dir(&root)?;

    let hostname = request
        .hostname
        .unwrap_or_else(|| DEFAULT_HOSTNAME.to_string());
    validate_hostname(&hostname)?;

    let run_as = request.user.as_deref().map(RunAs::parse).transpose()?;

    debug!(
        root = %root_path.display(),
        allow_net = request.allow_net,
        program = %request.command[0],
        "Resolved sandbox configuration"
    );

    Ok(SandboxConfig {
        root_path,
        allow_net: request.allow_net,
        command: request.command,
        hostname,
        run_as,
    })
}

fn canonical_dir(root: &Path) -> Result<PathBuf, ConfigError> {
    let invalid = |source| ConfigError::InvalidPath {
        path: root.to_path_buf(),
        source,
    };
    let canonical = fs::canonicalize(root).map_err(invalid)?;
    let metadata = fs::metadata(&canonical).map_err(invalid)?;
    if !metadata.is_dir() {
        return Err(invalid(std::io::Error::new(
            std::io::ErrorKind::NotADirectory,
            "not a directory",
        )));
    }
    Ok(canonical)
}

fn validate_hostname(hostname: &str) -> Result<(), ConfigError> {
    let reason = if hostname.is_empty() {
        Some("empty")
    } else if hostname.len() > MAX_HOSTNAME_LEN {
        Some("longer than 64 bytes")
    } else if hostname.contains('\0') {
        Some("contains a NUL byte")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ConfigError::InvalidHostname {
            hostname: hostname.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
