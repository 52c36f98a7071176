//! nsbox - Entry Point
//!
//! `nsbox --root <path> -- <cmd> [args...]`

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use nsbox::error::{EXIT_SETUP_FAILED, EXIT_USAGE, report};
use nsbox::sandbox::{self, SandboxRequest};
use nsbox::{Error, system};

/// Run a command in a private root with isolated mount, PID, UTS and network namespaces.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to use as the sandbox's root filesystem
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,

    /// Share the host network namespace instead of an empty one
    #[arg(long, default_value = "false")]
    net: bool,

    /// Hostname inside the sandbox
    #[arg(long, value_name = "NAME")]
    hostname: Option<String>,

    /// Switch to this identity before exec
    #[arg(long, value_name = "UID[:GID]")]
    user: Option<String>,

    /// Skip system requirements checks
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Command to run, after `--`
    #[arg(last = true, value_name = "CMD")]
    command: Vec<String>,
}

impl From<Args> for SandboxRequest {
    fn from(args: Args) -> Self {
        Self {
            root: args.root,
            allow_net: args.net,
            hostname: args.hostname,
            user: args.user,
            command: args.command,
        }
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    // stderr is shared with the sandboxed command, so stay quiet by default.
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::WARN.into())
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let skip_checks = args.skip_checks;
    let config = match sandbox::resolve(args.into()) {
        Ok(config) => config,
        Err(e) => {
            report(Error::from(e));
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if skip_checks {
        warn!("Skipping system requirements checks (--skip-checks)");
    } else {
        match system::check_all(config.allow_net()) {
            Ok(reqs) => debug!(
                "System requirements satisfied: kernel {}, euid {}, namespaces: {}",
                reqs.kernel_version,
                reqs.euid,
                sandbox::Namespace::describe(&reqs.namespaces)
            ),
            Err(e) => {
                report(e);
                return ExitCode::from(EXIT_SETUP_FAILED);
            }
        }
    }

    match sandbox::run(&config) {
        Ok(outcome) => {
            info!(%outcome, "Sandbox finished");
            ExitCode::from(outcome.exit_code())
        }
        Err(e) => {
            let code = e.exit_code();
            report(e);
            ExitCode::from(code)
        }
    }
}
