//! QEMU launch pipeline.
//!
//! [`prepare`] takes resolved options through validation, network rendering,
//! binary discovery and host-side setup, producing a [`LaunchConfig`].
//! [`cmdline::build`] turns that into arguments and [`lifecycle::launch`]
//! runs QEMU with them.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::QemuOptions;
use crate::error::Result;
use crate::paths::{self, Boot};

pub mod backend;
pub mod cmdline;
pub mod filesystem;
pub mod lifecycle;
pub mod metadata;
pub mod network;

use filesystem::Disk;
use network::PortPublish;

// ---------------------------------------------------------------------------
// Shared types used across submodules
// ---------------------------------------------------------------------------

/// Everything needed to render the QEMU command line.
///
/// Fields are crate-private: outside this crate a `LaunchConfig` only comes
/// from [`prepare`], which never builds one without a resolved hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// The `<prefix>-kernel` boot target.
    pub(crate) target: PathBuf,

    /// Boot flow and its artifacts.
    pub(crate) boot: Boot,

    /// Graphical output; `false` redirects the console to stdio.
    pub(crate) gui: bool,

    /// Extra CD-ROM images, metadata ISO first.
    pub(crate) iso_images: Vec<PathBuf>,

    pub(crate) state_dir: PathBuf,

    /// QEMU architecture name, e.g. `x86_64`.
    pub(crate) arch: String,

    pub(crate) cpus: u32,

    pub(crate) memory_mb: u32,

    pub(crate) kvm: bool,

    /// Resolved `qemu-system-<arch>` executable.
    pub(crate) hypervisor: PathBuf,

    /// Resolved `qemu-img`, only looked up when a disk had to be created.
    pub(crate) image_tool: Option<PathBuf>,

    pub(crate) published_ports: Vec<PortPublish>,

    /// Rendered `-netdev` value; empty means no networking.
    pub(crate) netdev: String,

    pub(crate) disks: Vec<Disk>,

    pub(crate) uuid: Uuid,
}

impl LaunchConfig {
    /// The `<prefix>-kernel` boot target.
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn boot(&self) -> &Boot {
        &self.boot
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Extra CD-ROM images, metadata ISO first.
    pub fn iso_images(&self) -> &[PathBuf] {
        &self.iso_images
    }

    /// Resolved `qemu-system-<arch>` executable.
    pub fn hypervisor(&self) -> &Path {
        &self.hypervisor
    }

    pub fn image_tool(&self) -> Option<&Path> {
        self.image_tool.as_deref()
    }

    pub fn published_ports(&self) -> &[PortPublish] {
        &self.published_ports
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

/// Validate and prepare the host for a launch.
///
/// Every check that can fail on bad input runs before the state directory
/// is reset, so a rejected configuration leaves the previous state alone.
/// `search_path` is the executable search path (normally `$PATH`).
pub fn prepare(opts: QemuOptions, search_path: Option<OsString>) -> Result<LaunchConfig> {
    let (target, state_dir) = paths::locate(&opts.path, opts.state.as_deref())?;
    let boot = target.boot_artifacts(opts.boot_mode)?;

    let netdev = network::resolve(&opts.networking, &opts.publish)?;
    debug!(mode = opts.networking.keyword(), netdev = %netdev, "resolved networking");

    let hypervisor = backend::find_hypervisor_in(&opts.arch, search_path.clone())?;

    let disks = filesystem::resolve_disks(&opts.disks, &state_dir);
    let image_tool = if filesystem::plan_disks(&disks, &state_dir)? {
        Some(backend::find_image_tool_in(search_path)?)
    } else {
        None
    };

    let payload = opts
        .data
        .as_deref()
        .map(metadata::load_payload)
        .transpose()?;

    paths::reset_state_dir(&state_dir)?;

    let mut iso_images = Vec::new();
    if let Some(payload) = payload {
        iso_images.push(metadata::write_metadata_iso(&state_dir, &payload)?);
    }

    filesystem::create_missing_disks(&disks, image_tool.as_deref())?;

    info!(
        target = %target.path.display(),
        state = %state_dir.display(),
        arch = %opts.arch,
        cpus = opts.cpus,
        memory_mb = opts.memory_mb,
        kvm = opts.kvm,
        uuid = %opts.uuid,
        "launch prepared"
    );

    Ok(LaunchConfig {
        target: target.path,
        boot,
        gui: opts.gui,
        iso_images,
        state_dir,
        arch: opts.arch,
        cpus: opts.cpus,
        memory_mb: opts.memory_mb,
        kvm: opts.kvm,
        hypervisor,
        image_tool,
        published_ports: opts.publish,
        netdev,
        disks,
        uuid: opts.uuid,
    })
}

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use cmdline::build;
pub use lifecycle::launch;
