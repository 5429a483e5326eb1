//! vmrun: one-shot VM launcher.
//!
//! Turns a boot target plus sizing, networking and acceleration flags into a
//! single `qemu-system-<arch>` invocation, prepares the per-instance state
//! directory, and waits for the hypervisor to exit.
//!
//! ```text
//! config::resolve → vm::prepare → vm::build → vm::launch
//!   (flags+env)      (paths, network,   (args)    (spawn+wait)
//!                     backend, state)
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod vm;

use tracing::info;

use crate::cli::{Cli, Commands, QemuArgs};
use crate::error::Result;

/// Run the parsed command to completion.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.cmd {
        Commands::Qemu(args) => run_qemu(args).await,
    }
}

/// `vmrun qemu`: resolve, prepare, build and launch.
pub async fn run_qemu(args: QemuArgs) -> Result<()> {
    let opts = config::resolve(args)?;
    let launch = vm::prepare(opts, std::env::var_os("PATH"))?;
    let argv = vm::build(&launch);

    info!(
        hypervisor = %launch.hypervisor().display(),
        args = %argv.join(" "),
        "launching"
    );

    vm::launch(launch.hypervisor(), &argv).await
}
