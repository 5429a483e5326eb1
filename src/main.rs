//! vmrun: launch a VM image under a locally installed hypervisor.
//!
//! This binary is the single place where failures become exit codes: every
//! stage returns a typed error, and `main` prints one diagnostic line and
//! exits with [`vmrun::error::LaunchError::exit_code`].

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use vmrun::cli::Cli;
use vmrun::error::LaunchError;
use vmrun::logging;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = logging::init();

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("vmrun: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(vmrun::run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "launch failed");
            eprintln!("vmrun: {e}");
            if matches!(e, LaunchError::Usage(_)) {
                eprintln!("Run 'vmrun qemu --help' for usage.");
            }
            ExitCode::from(e.exit_code())
        }
    }
}

/// Single-threaded runtime: the only await point is the hypervisor wait.
fn build_runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")
}
