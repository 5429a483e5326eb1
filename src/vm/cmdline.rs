//! QEMU argument assembly.
//!
//! [`build`] is a pure function of the [`LaunchConfig`]: the same config
//! always yields the same arguments, in this order:
//!
//! ```text
//! boot        -kernel K -initrd I -append C   |  -cdrom ISO -boot d
//! sizing      -smp N -m MB
//! machine     [-enable-kvm] [-cpu ...] -machine ...
//! entropy     -device virtio-rng-pci
//! disks       -drive file=...,format=...,if=virtio       (each)
//! network     -device virtio-net-pci,... -netdev ...    |  -net none
//! cdroms      -drive file=...,format=raw,media=cdrom     (each)
//! identity    -uuid U
//! pidfile     -pidfile <state>/qemu.pid
//! display     -nographic                                 (GUI off only)
//! ```

use crate::paths::Boot;
use crate::vm::LaunchConfig;
use crate::vm::network::{NETDEV_ID, mac_for_instance};

/// Pidfile QEMU writes into the state directory.
pub const PIDFILE: &str = "qemu.pid";

/// Build the QEMU argument list (without the binary itself).
pub fn build(config: &LaunchConfig) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    // Boot.
    match &config.boot {
        Boot::Kernel {
            kernel,
            initrd,
            cmdline,
        } => {
            push(&["-kernel", kernel.display().to_string().as_str()]);
            push(&["-initrd", initrd.display().to_string().as_str()]);
            push(&["-append", cmdline.as_str()]);
        }
        Boot::Iso { iso } => {
            push(&["-cdrom", iso.display().to_string().as_str()]);
            push(&["-boot", "d"]);
        }
    }

    // Sizing.
    push(&["-smp", config.cpus.to_string().as_str()]);
    push(&["-m", config.memory_mb.to_string().as_str()]);

    // Acceleration and machine type.
    let aarch64 = config.arch == "aarch64";
    if config.kvm {
        push(&["-enable-kvm"]);
        if aarch64 {
            push(&["-cpu", "host", "-machine", "virt,gic-version=host"]);
        } else {
            push(&["-machine", "q35,accel=kvm:tcg"]);
        }
    } else if aarch64 {
        push(&["-cpu", "cortex-a57", "-machine", "virt"]);
    } else {
        push(&["-machine", "q35"]);
    }

    // Entropy device (required for kernel RNG).
    push(&["-device", "virtio-rng-pci"]);

    for disk in &config.disks {
        let [flag, value] = disk.drive_args();
        push(&[flag.as_str(), value.as_str()]);
    }

    // Network.
    if config.netdev.is_empty() {
        push(&["-net", "none"]);
    } else {
        let nic = format!(
            "virtio-net-pci,netdev={NETDEV_ID},mac={}",
            mac_for_instance(&config.uuid)
        );
        push(&["-device", nic.as_str()]);
        push(&["-netdev", config.netdev.as_str()]);
    }

    for iso in &config.iso_images {
        let drive = format!("file={},format=raw,media=cdrom", iso.display());
        push(&["-drive", drive.as_str()]);
    }

    push(&["-uuid", config.uuid.to_string().as_str()]);
    let pidfile = config.state_dir.join(PIDFILE);
    push(&["-pidfile", pidfile.display().to_string().as_str()]);

    // Serial console on stdio instead of a window.
    if !config.gui {
        push(&["-nographic"]);
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::filesystem::Disk;
    use std::path::PathBuf;
    use uuid::Uuid;

    const UUID: &str = "6f1c2a4e-9b7d-4c3e-8a21-0d5f6e7b8c9a";

    fn kernel_config() -> LaunchConfig {
        LaunchConfig {
            target: PathBuf::from("/images/vm-kernel"),
            boot: Boot::Kernel {
                kernel: PathBuf::from("/images/vm-kernel"),
                initrd: PathBuf::from("/images/vm-initrd.img"),
                cmdline: "console=ttyS0 page_poison=1".to_string(),
            },
            gui: true,
            iso_images: Vec::new(),
            state_dir: PathBuf::from("/images/vm-state"),
            arch: "x86_64".to_string(),
            cpus: 2,
            memory_mb: 2048,
            kvm: false,
            hypervisor: PathBuf::from("/usr/bin/qemu-system-x86_64"),
            image_tool: None,
            published_ports: Vec::new(),
            netdev: "user,id=t0".to_string(),
            disks: Vec::new(),
            uuid: Uuid::parse_str(UUID).unwrap(),
        }
    }

    #[test]
    fn golden_kernel_boot() {
        let args = build(&kernel_config());
        let mac = mac_for_instance(&Uuid::parse_str(UUID).unwrap());

        let expected: Vec<String> = [
            "-kernel",
            "/images/vm-kernel",
            "-initrd",
            "/images/vm-initrd.img",
            "-append",
            "console=ttyS0 page_poison=1",
            "-smp",
            "2",
            "-m",
            "2048",
            "-machine",
            "q35",
            "-device",
            "virtio-rng-pci",
            "-device",
            &format!("virtio-net-pci,netdev=t0,mac={mac}"),
            "-netdev",
            "user,id=t0",
            "-uuid",
            UUID,
            "-pidfile",
            "/images/vm-state/qemu.pid",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        assert_eq!(args, expected);
    }

    #[test]
    fn golden_iso_boot_headless_with_everything() {
        let mut config = kernel_config();
        config.boot = Boot::Iso {
            iso: PathBuf::from("/images/vm.iso"),
        };
        config.gui = false;
        config.kvm = true;
        config.netdev = String::new();
        config.iso_images = vec![
            PathBuf::from("/images/vm-state/data.iso"),
            PathBuf::from("/images/extra.iso"),
        ];
        config.disks = vec![Disk {
            path: PathBuf::from("/images/vm-state/disk0.img"),
            size: Some("1G".to_string()),
            format: "qcow2".to_string(),
        }];

        let args = build(&config);

        let expected: Vec<String> = [
            "-cdrom",
            "/images/vm.iso",
            "-boot",
            "d",
            "-smp",
            "2",
            "-m",
            "2048",
            "-enable-kvm",
            "-machine",
            "q35,accel=kvm:tcg",
            "-device",
            "virtio-rng-pci",
            "-drive",
            "file=/images/vm-state/disk0.img,format=qcow2,if=virtio",
            "-net",
            "none",
            "-drive",
            "file=/images/vm-state/data.iso,format=raw,media=cdrom",
            "-drive",
            "file=/images/extra.iso,format=raw,media=cdrom",
            "-uuid",
            UUID,
            "-pidfile",
            "/images/vm-state/qemu.pid",
            "-nographic",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        assert_eq!(args, expected);
    }

    #[test]
    fn aarch64_machine_and_cpu() {
        let mut config = kernel_config();
        config.arch = "aarch64".to_string();

        let args = build(&config);
        let joined = args.join(" ");
        assert!(joined.contains("-cpu cortex-a57 -machine virt "));
        assert!(!joined.contains("-enable-kvm"));

        config.kvm = true;
        let joined = build(&config).join(" ");
        assert!(joined.contains("-enable-kvm -cpu host -machine virt,gic-version=host"));
    }

    #[test]
    fn kvm_off_never_emits_an_off_flag() {
        let args = build(&kernel_config());
        assert!(!args.iter().any(|a| a.contains("kvm")));
    }

    #[test]
    fn build_is_deterministic() {
        let config = kernel_config();
        assert_eq!(build(&config), build(&config.clone()));
    }
}
