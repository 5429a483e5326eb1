//! Command-line surface.

use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};

/// Launch a kernel+initrd or ISO image under a local hypervisor
#[derive(Parser, Debug)]
#[command(name = "vmrun", version, about = "Launch a VM image under a local hypervisor")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Boot an image with qemu-system-<arch>
    Qemu(QemuArgs),
}

/// Raw `vmrun qemu` flags, before environment overrides and host defaults.
#[derive(Args, Debug, Clone)]
pub struct QemuArgs {
    /// Boot target: path to a `<prefix>-kernel` image
    pub path: PathBuf,

    /// Graphical output (false: serial console on stdio)
    #[arg(
        long,
        default_value_t = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub gui: bool,

    /// Boot <prefix>-kernel/-initrd.img/-cmdline (false: boot <prefix>.iso)
    #[arg(
        long,
        default_value_t = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub kernel: bool,

    /// State directory (default: <prefix>-state, recreated on every launch)
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Metadata for the guest: a file path or a literal string
    #[arg(long)]
    pub data: Option<String>,

    /// KVM acceleration (default: enabled when /dev/kvm exists)
    #[arg(
        long,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub kvm: Option<bool>,

    /// Guest architecture, e.g. x86_64 or aarch64 (default: host)
    #[arg(long)]
    pub arch: Option<String>,

    /// Number of vCPUs
    #[arg(long, default_value_t = 2)]
    pub cpus: u32,

    /// Memory (MiB)
    #[arg(long, default_value_t = 2048)]
    pub mem: u32,

    /// Networking: none, user, tap,<iface> or bridge,<bridge>
    #[arg(long, default_value = "user")]
    pub networking: String,

    /// Publish a guest port on the host: HOSTPORT:GUESTPORT[/PROTO] (user networking only)
    #[arg(long)]
    pub publish: Vec<String>,

    /// Disk: [file=]path[,size=<size>][,format=<fmt>]
    #[arg(long)]
    pub disk: Vec<String>,
}
