//! Launch configuration resolution.
//!
//! Turns parsed `vmrun qemu` flags into [`QemuOptions`]:
//!
//! 1. environment overrides from [`ENV_OVERRIDES`] are applied on top of the
//!    parsed flags (so they win over flag defaults);
//! 2. host-dependent defaults (`--kvm`, `--arch`) are filled in;
//! 3. networking, publish and disk specs are parsed into typed values;
//! 4. a fresh instance UUID is allocated.

use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::cli::QemuArgs;
use crate::error::{LaunchError, Result};
use crate::paths::BootMode;
use crate::vm::filesystem::DiskSpec;
use crate::vm::network::{NetworkMode, PortPublish};

/// Device node whose presence makes KVM the default.
pub const KVM_DEVICE: &str = "/dev/kvm";

/// Fully resolved options for one launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QemuOptions {
    pub path: PathBuf,
    pub boot_mode: BootMode,
    pub gui: bool,
    pub state: Option<PathBuf>,
    pub data: Option<String>,
    pub kvm: bool,
    pub arch: String,
    pub cpus: u32,
    pub memory_mb: u32,
    pub networking: NetworkMode,
    pub publish: Vec<PortPublish>,
    pub disks: Vec<DiskSpec>,
    pub uuid: Uuid,
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

/// One environment variable that overrides an existing flag.
pub struct EnvOverride {
    pub var: &'static str,
    pub flag: &'static str,
    apply: fn(&mut QemuArgs, &str) -> std::result::Result<(), String>,
}

/// Every supported override. Each maps to a flag that already exists.
pub const ENV_OVERRIDES: &[EnvOverride] = &[
    EnvOverride {
        var: "VMRUN_QEMU_KVM",
        flag: "--kvm",
        apply: apply_kvm,
    },
    EnvOverride {
        var: "VMRUN_QEMU_GUI",
        flag: "--gui",
        apply: apply_gui,
    },
];

fn apply_kvm(args: &mut QemuArgs, raw: &str) -> std::result::Result<(), String> {
    args.kvm = Some(parse_bool(raw)?);
    Ok(())
}

fn apply_gui(args: &mut QemuArgs, raw: &str) -> std::result::Result<(), String> {
    args.gui = parse_bool(raw)?;
    Ok(())
}

/// Boolean syntax accepted in environment overrides.
pub fn parse_bool(raw: &str) -> std::result::Result<bool, String> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        other => Err(format!("'{other}' is not a boolean")),
    }
}

/// Apply every override present in `lookup` to the parsed flags.
pub fn apply_env_overrides<F>(args: &mut QemuArgs, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    for entry in ENV_OVERRIDES {
        let Some(raw) = lookup(entry.var) else {
            continue;
        };
        (entry.apply)(args, &raw).map_err(|why| {
            LaunchError::Usage(format!(
                "invalid value for {} (overrides {}): {why}",
                entry.var, entry.flag
            ))
        })?;
        debug!(var = entry.var, flag = entry.flag, value = %raw, "applied environment override");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Host defaults
// ---------------------------------------------------------------------------

/// QEMU architecture name for the host CPU.
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86" => "i386",
        "powerpc64" => "ppc64",
        other => other,
    }
}

/// Whether the host exposes KVM.
pub fn host_has_kvm() -> bool {
    Path::new(KVM_DEVICE).exists()
}

fn validate_arch(arch: &str) -> Result<()> {
    if !arch.is_empty() && arch.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(LaunchError::Usage(format!("invalid architecture '{arch}'")))
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve flags plus the process environment.
pub fn resolve(args: QemuArgs) -> Result<QemuOptions> {
    resolve_with(args, |var| std::env::var(var).ok(), host_has_kvm(), host_arch())
}

/// Resolve flags against an explicit environment and host description.
pub fn resolve_with<F>(
    mut args: QemuArgs,
    lookup: F,
    kvm_default: bool,
    arch_default: &str,
) -> Result<QemuOptions>
where
    F: Fn(&str) -> Option<String>,
{
    apply_env_overrides(&mut args, lookup)?;

    let arch = args.arch.unwrap_or_else(|| arch_default.to_string());
    validate_arch(&arch)?;

    if args.cpus == 0 {
        return Err(LaunchError::Usage("--cpus must be at least 1".to_string()));
    }
    if args.mem == 0 {
        return Err(LaunchError::Usage("--mem must be at least 1".to_string()));
    }

    let networking: NetworkMode = args.networking.parse()?;
    let publish = args
        .publish
        .iter()
        .map(|spec| spec.parse())
        .collect::<Result<Vec<PortPublish>>>()?;
    let disks = args
        .disk
        .iter()
        .map(|spec| spec.parse())
        .collect::<Result<Vec<DiskSpec>>>()?;

    let uuid = Uuid::new_v4();
    debug!(%uuid, "allocated instance identity");

    Ok(QemuOptions {
        path: args.path,
        boot_mode: if args.kernel {
            BootMode::Kernel
        } else {
            BootMode::Iso
        },
        gui: args.gui,
        state: args.state,
        data: args.data,
        kvm: args.kvm.unwrap_or(kvm_default),
        arch,
        cpus: args.cpus,
        memory_mb: args.mem,
        networking,
        publish,
        disks,
        uuid,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use std::collections::HashMap;

    fn args(argv: &[&str]) -> QemuArgs {
        let mut full = vec!["vmrun", "qemu"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().cmd {
            Commands::Qemu(args) => args,
        }
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var: &str| map.get(var).cloned()
    }

    #[test]
    fn host_defaults_fill_unset_flags() {
        let opts = resolve_with(args(&["vm-kernel"]), env(&[]), true, "aarch64").unwrap();
        assert!(opts.kvm);
        assert_eq!(opts.arch, "aarch64");
        assert_eq!(opts.boot_mode, BootMode::Kernel);
        assert_eq!(opts.networking, NetworkMode::User);
        assert_eq!(opts.cpus, 2);
        assert_eq!(opts.memory_mb, 2048);
    }

    #[test]
    fn explicit_flags_beat_host_defaults() {
        let opts = resolve_with(
            args(&["--kvm=false", "--arch", "x86_64", "--kernel=false", "vm-kernel"]),
            env(&[]),
            true,
            "aarch64",
        )
        .unwrap();
        assert!(!opts.kvm);
        assert_eq!(opts.arch, "x86_64");
        assert_eq!(opts.boot_mode, BootMode::Iso);
    }

    #[test]
    fn env_overrides_apply_after_flags() {
        let opts = resolve_with(
            args(&["--kvm=true", "vm-kernel"]),
            env(&[("VMRUN_QEMU_KVM", "0"), ("VMRUN_QEMU_GUI", "False")]),
            true,
            "x86_64",
        )
        .unwrap();
        assert!(!opts.kvm);
        assert!(!opts.gui);
    }

    #[test]
    fn invalid_env_boolean_is_a_usage_error() {
        let err = resolve_with(
            args(&["vm-kernel"]),
            env(&[("VMRUN_QEMU_KVM", "maybe")]),
            false,
            "x86_64",
        )
        .unwrap_err();
        match err {
            LaunchError::Usage(msg) => {
                assert!(msg.contains("VMRUN_QEMU_KVM"));
                assert!(msg.contains("maybe"));
            }
            other => panic!("expected Usage, got {other:?}"),
        }
    }

    #[test]
    fn every_override_names_an_existing_flag() {
        use clap::CommandFactory;
        let cmd = Cli::command();
        let qemu = cmd.find_subcommand("qemu").unwrap();
        for entry in ENV_OVERRIDES {
            let long = entry.flag.trim_start_matches("--");
            assert!(
                qemu.get_arguments().any(|a| a.get_long() == Some(long)),
                "{} maps to unknown flag {}",
                entry.var,
                entry.flag
            );
        }
    }

    #[test]
    fn parse_bool_accepts_go_style_spellings() {
        for raw in ["1", "t", "T", "TRUE", "true", "True"] {
            assert_eq!(parse_bool(raw), Ok(true));
        }
        for raw in ["0", "f", "F", "FALSE", "false", "False"] {
            assert_eq!(parse_bool(raw), Ok(false));
        }
        assert!(parse_bool("yes").is_err());
        assert!(parse_bool("").is_err());
    }

    #[test]
    fn networking_is_parsed_at_the_boundary() {
        let err = resolve_with(args(&["--networking", "tap", "vm-kernel"]), env(&[]), false, "x86_64")
            .unwrap_err();
        assert!(matches!(err, LaunchError::NetworkConfig(_)));

        let opts = resolve_with(
            args(&["--networking", "bridge,br0", "vm-kernel"]),
            env(&[]),
            false,
            "x86_64",
        )
        .unwrap();
        assert_eq!(
            opts.networking,
            NetworkMode::Bridge {
                bridge: "br0".to_string()
            }
        );
    }

    #[test]
    fn publish_with_bridge_is_accepted_here_and_rejected_later() {
        // Compatibility is checked when the netdev is rendered.
        let opts = resolve_with(
            args(&["--networking", "bridge,br0", "--publish", "80:80", "vm-kernel"]),
            env(&[]),
            false,
            "x86_64",
        )
        .unwrap();
        assert_eq!(opts.publish.len(), 1);
    }

    #[test]
    fn arch_must_be_a_plain_name() {
        let err = resolve_with(
            args(&["--arch", "../../bin/sh", "vm-kernel"]),
            env(&[]),
            false,
            "x86_64",
        )
        .unwrap_err();
        assert!(matches!(err, LaunchError::Usage(_)));
    }

    #[test]
    fn zero_sizing_is_rejected() {
        let err = resolve_with(args(&["--cpus", "0", "vm-kernel"]), env(&[]), false, "x86_64")
            .unwrap_err();
        assert!(matches!(err, LaunchError::Usage(_)));
    }

    #[test]
    fn each_resolution_gets_a_fresh_uuid() {
        let a = resolve_with(args(&["vm-kernel"]), env(&[]), false, "x86_64").unwrap();
        let b = resolve_with(args(&["vm-kernel"]), env(&[]), false, "x86_64").unwrap();
        assert_ne!(a.uuid, b.uuid);
        assert_eq!(a.uuid.get_version_num(), 4);
    }

    #[test]
    fn host_arch_uses_qemu_names() {
        let arch = host_arch();
        assert!(!arch.is_empty());
        assert_ne!(arch, "powerpc64");
        assert_ne!(arch, "x86");
    }
}
