//! Host prerequisite checks.

#![allow(unsafe_code)]
// fork(2) for the unshare probe.

use nix::sched::unshare;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork, geteuid};
use tracing::debug;

use crate::error::{Result, SystemRequirementsError};
use crate::sandbox::Namespace;

/// Minimum required kernel version (major, minor).
///
/// 3.8 completed PID namespace support; older kernels cannot mount a
/// namespace-scoped procfs.
pub const MIN_KERNEL_VERSION: (u32, u32) = (3, 8);

/// Results of all system requirements checks.
#[derive(Debug, Clone)]
pub struct SystemRequirements {
    /// Kernel version string (e.g., "6.7.0")
    pub kernel_version: String,
    /// Effective uid of this process
    pub euid: u32,
    /// Namespaces a probe process managed to unshare
    pub namespaces: Vec<Namespace>,
}

/// Check all system requirements for a sandbox that needs the namespaces
/// implied by `allow_net`.
///
/// Returns `Ok(SystemRequirements)` with all check results, or
/// `Err` with the first failing requirement.
pub fn check_all(allow_net: bool) -> Result<SystemRequirements> {
    let kernel_version = check_kernel_version()?;
    let euid = check_privileges()?;
    let namespaces = check_namespaces(allow_net)?;

    Ok(SystemRequirements {
        kernel_version,
        euid,
        namespaces,
    })
}

fn kernel_at_least(major: u32, minor: u32) -> bool {
    major > MIN_KERNEL_VERSION.0 || (major == MIN_KERNEL_VERSION.0 && minor >= MIN_KERNEL_VERSION.1)
}

/// Check kernel version is >= 3.8.
///
/// Returns the kernel release string on success.
///
/// # Errors
///
/// Returns error if kernel version cannot be read or is below minimum.
pub fn check_kernel_version() -> Result<String> {
    let uname = nix::sys::utsname::uname().map_err(|e| SystemRequirementsError::ReadFailed {
        context: "uname syscall".to_string(),
        source: std::io::Error::from(e),
    })?;

    let release = uname.release().to_string_lossy().to_string();
    let (major, minor) = parse_kernel_version(&release)?;

    if !kernel_at_least(major, minor) {
        return Err(SystemRequirementsError::KernelTooOld {
            found: release,
            required: format!("{}.{}", MIN_KERNEL_VERSION.0, MIN_KERNEL_VERSION.1),
        }
        .into());
    }

    Ok(release)
}

/// Parse kernel version string into (major, minor).
fn parse_kernel_version(version: &str) -> Result<(u32, u32)> {
    let invalid = |context: String, what: &str| SystemRequirementsError::ReadFailed {
        context,
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, what.to_string()),
    };

    let mut parts = version.split('.');
    let (Some(major), Some(minor)) = (parts.next(), parts.next()) else {
        return Err(invalid(
            format!("Failed to parse kernel version: {version}"),
            "Invalid kernel version format",
        )
        .into());
    };

    let major = major.parse::<u32>().map_err(|_| {
        invalid(
            format!("Failed to parse kernel major version: {major}"),
            "Invalid major version",
        )
    })?;

    // Minor version might have suffix like "8-generic", extract just the number
    let minor = minor
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or("")
        .parse::<u32>()
        .map_err(|_| {
            invalid(
                format!("Failed to parse kernel minor version: {minor}"),
                "Invalid minor version",
            )
        })?;

    Ok((major, minor))
}

/// Check the process can create namespaces and mount filesystems.
///
/// # Errors
///
/// Returns `PrivilegeRequired` unless the effective uid is 0.
pub fn check_privileges() -> Result<u32> {
    let euid = geteuid();
    if !euid.is_root() {
        return Err(SystemRequirementsError::PrivilegeRequired {
            euid: euid.as_raw(),
        }
        .into());
    }
    Ok(euid.as_raw())
}

/// Check the kernel lets a throwaway child unshare every namespace the
/// sandbox will need.
///
/// # Errors
///
/// Returns `NamespacesUnavailable` with the child's errno if it could not.
pub fn check_namespaces(allow_net: bool) -> Result<Vec<Namespace>> {
    let kinds = Namespace::required(allow_net);
    let flags = Namespace::flags(&kinds);

    // SAFETY: single-threaded at preflight; the child only calls unshare and
    // _exit.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, 0)) => {
                debug!(namespaces = %Namespace::describe(&kinds), "Namespace probe succeeded");
                Ok(kinds)
            }
            Ok(WaitStatus::Exited(_, errno)) => Err(SystemRequirementsError::NamespacesUnavailable {
                errno: nix::errno::Errno::from_raw(errno),
            }
            .into()),
            Ok(status) => Err(SystemRequirementsError::ReadFailed {
                context: format!("namespace probe ended with {status:?}"),
                source: std::io::Error::other("probe did not exit normally"),
            }
            .into()),
            Err(e) => Err(SystemRequirementsError::ReadFailed {
                context: "waiting for namespace probe".to_string(),
                source: std::io::Error::from(e),
            }
            .into()),
        },
        Ok(ForkResult::Child) => {
            // Errno values fit in an exit status.
            let code = match unshare(flags) {
                Ok(()) => 0,
                Err(errno) => errno as i32,
            };
            // SAFETY: see above.
            unsafe { nix::libc::_exit(code) }
        }
        Err(e) => Err(SystemRequirementsError::ReadFailed {
            context: "fork for namespace probe".to_string(),
            source: std::io::Error::from(e),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kernel_version_standard() {
        let (major, minor) = parse_kernel_version("6.7.0").expect("should parse");
        assert_eq!(major, 6);
        assert_eq!(minor, 7);
    }

    #[test]
    fn test_parse_kernel_version_with_suffix() {
        let (major, minor) = parse_kernel_version("6.8.0-generic").expect("should parse");
        assert_eq!(major, 6);
        assert_eq!(minor, 8);
    }

    #[test]
    fn test_parse_kernel_version_two_components() {
        let (major, minor) = parse_kernel_version("4.19-rc1").expect("should parse");
        assert_eq!(major, 4);
        assert_eq!(minor, 19);
    }

    #[test]
    fn test_parse_kernel_version_garbage() {
        assert!(parse_kernel_version("linux").is_err());
        assert!(parse_kernel_version("x.1").is_err());
        assert!(parse_kernel_version("6.rc").is_err());
    }

    #[test]
    fn test_kernel_at_least() {
        assert!(kernel_at_least(3, 8));
        assert!(kernel_at_least(4, 0));
        assert!(kernel_at_least(6, 18));
        assert!(!kernel_at_least(3, 7));
        assert!(!kernel_at_least(2, 6));
    }

    #[test]
    fn test_check_kernel_version_real() {
        let result = check_kernel_version();
        assert!(result.is_ok(), "Kernel check failed: {result:?}");
    }

    #[test]
    fn test_check_privileges_matches_euid() {
        let result = check_privileges();
        assert_eq!(result.is_ok(), geteuid().is_root(), "{result:?}");
    }
}
