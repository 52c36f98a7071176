//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

/// Binaries copied into every test root, with their shared libraries.
pub const ROOTFS_BINARIES: &[&str] = &[
    "/bin/sh",
    "/bin/echo",
    "/bin/cat",
    "/bin/ls",
    "/bin/sleep",
    "/usr/bin/id",
];

pub fn nsbox(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nsbox"))
        .args(args)
        .output()
        .expect("failed to spawn nsbox")
}

/// Runs `command` in `root` with default options.
pub fn run_in(root: &Path, command: &[&str]) -> Output {
    let root = root.to_str().expect("root path is UTF-8");
    let mut args = vec!["--root", root, "--"];
    args.extend_from_slice(command);
    nsbox(&args)
}

pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

pub fn assert_exit(output: &Output, code: i32, context: &str) {
    assert_eq!(
        output.status.code(),
        Some(code),
        "{} exited unexpectedly.\nstdout:\n{}\nstderr:\n{}",
        context,
        stdout(output),
        stderr(output)
    );
}

/// Host processes whose command line mentions `tag`.
pub fn processes_matching(tag: &str) -> Vec<u32> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| {
            fs::read(format!("/proc/{pid}/cmdline"))
                .is_ok_and(|cmdline| String::from_utf8_lossy(&cmdline).contains(tag))
        })
        .collect()
}

/// Polls `condition` every 50ms for up to `timeout`.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(50));
    }
    condition()
}

/// Copies `binary` into `root` at the same path, along with every library
/// `ldd` reports for it. Returns false if the binary does not exist.
pub fn install(root: &Path, binary: &str) -> bool {
    if !Path::new(binary).exists() {
        return false;
    }
    copy_into(root, Path::new(binary));

    // Static binaries and missing ldd both leave nothing more to copy.
    if let Ok(output) = Command::new("ldd").arg(binary).output() {
        for lib in String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .filter(|token| token.starts_with('/'))
        {
            copy_into(root, Path::new(lib));
        }
    }
    true
}

fn copy_into(root: &Path, host_path: &Path) {
    let dest: PathBuf = root.join(host_path.strip_prefix("/").unwrap_or(host_path));
    if dest.exists() {
        return;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).expect("create rootfs directory");
    }
    fs::copy(host_path, &dest).expect("copy into rootfs");
}

/// Builds a minimal root with [`ROOTFS_BINARIES`].
pub fn rootfs() -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    // Traversable by the unprivileged identities some tests switch to.
    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).expect("chmod rootfs");
    for binary in ROOTFS_BINARIES {
        install(dir.path(), binary);
    }
    dir
}

/// Returns a test root when namespaces can actually be created here.
pub fn sandbox_root() -> Option<TempDir> {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("skipping: sandbox tests need root");
        return None;
    }
    let root = rootfs();
    let probe = run_in(root.path(), &["/bin/sh", "-c", "exit 0"]);
    if !probe.status.success() {
        eprintln!("skipping: sandbox unavailable here:\n{}", stderr(&probe));
        return None;
    }
    Some(root)
}
