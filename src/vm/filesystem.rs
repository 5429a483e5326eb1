//! Guest disk images.
//!
//! ## Design
//!
//! Disks are given with `--disk [file=]path[,size=<size>][,format=<fmt>]`,
//! repeatable. A disk whose file is missing is created with `qemu-img` before
//! launch, which requires a size. A disk without a path lives in the state
//! directory as `disk<N>.img` and is recreated on every launch because the
//! state directory is.
//!
//! ```text
//! --disk size=4G                →  <state>/disk0.img  (qcow2, created)
//! --disk /var/vm/data.raw,format=raw
//! ```
//!
//! Each disk becomes one `-drive file=<path>,format=<fmt>,if=virtio`.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use tracing::info;

use crate::error::{LaunchError, Result};

/// Format used when a disk spec does not name one.
pub const DEFAULT_DISK_FORMAT: &str = "qcow2";

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------

/// A `--disk` argument as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSpec {
    pub path: Option<PathBuf>,
    /// Size in `qemu-img` notation, e.g. `512M` or `4G`.
    pub size: Option<String>,
    pub format: String,
}

/// A disk with its final location on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub path: PathBuf,
    pub size: Option<String>,
    pub format: String,
}

impl Disk {
    /// Whether the image has to be created before launch.
    pub fn needs_create(&self) -> bool {
        !self.path.exists()
    }

    /// Whether the image will be missing once `state_dir` has been reset.
    ///
    /// Both paths are compared after resolving them against the current
    /// directory, so `vm-state/d.img` and `/abs/vm-state/d.img` match.
    pub fn will_be_missing(&self, state_dir: &Path) -> bool {
        host_path(&self.path).starts_with(host_path(state_dir)) || !self.path.exists()
    }

    /// `-drive` arguments for this disk.
    pub fn drive_args(&self) -> [String; 2] {
        [
            "-drive".to_string(),
            format!(
                "file={},format={},if=virtio",
                self.path.display(),
                self.format
            ),
        ]
    }
}

impl FromStr for DiskSpec {
    type Err = LaunchError;

    fn from_str(spec: &str) -> Result<Self> {
        let usage = |why: String| LaunchError::Usage(format!("invalid disk spec '{spec}': {why}"));

        let mut path = None;
        let mut size = None;
        let mut format = None;

        for (index, part) in spec.split(',').enumerate() {
            match part.split_once('=') {
                Some(("file", value)) => path = Some(PathBuf::from(value)),
                Some(("size", value)) => {
                    if !is_valid_size(value) {
                        return Err(usage(format!("invalid size '{value}'")));
                    }
                    size = Some(value.to_string());
                }
                Some(("format", value)) if !value.is_empty() => format = Some(value.to_string()),
                Some((key, _)) => return Err(usage(format!("unknown option '{key}'"))),
                None if index == 0 && !part.is_empty() => path = Some(PathBuf::from(part)),
                None => return Err(usage(format!("unexpected '{part}'"))),
            }
        }

        if path.is_none() && size.is_none() {
            return Err(usage("a disk needs a path or a size".to_string()));
        }

        Ok(Self {
            path,
            size,
            format: format.unwrap_or_else(|| DEFAULT_DISK_FORMAT.to_string()),
        })
    }
}

/// `<digits>[KMGT]`, the subset of `qemu-img` size syntax we pass through.
fn is_valid_size(size: &str) -> bool {
    let digits = size.trim_end_matches(|c: char| "kKmMgGtT".contains(c));
    size.len() - digits.len() <= 1
        && !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Assign final paths: explicit paths are kept, the rest go to
/// `<state_dir>/disk<N>.img` with `N` the spec's position.
pub fn resolve_disks(specs: &[DiskSpec], state_dir: &Path) -> Vec<Disk> {
    specs
        .iter()
        .enumerate()
        .map(|(index, spec)| Disk {
            path: spec
                .path
                .clone()
                .unwrap_or_else(|| state_dir.join(format!("disk{index}.img"))),
            size: spec.size.clone(),
            format: spec.format.clone(),
        })
        .collect()
}

/// Check, before the state directory is reset, that every disk that will be
/// missing can be created. Returns whether `qemu-img` is needed.
pub fn plan_disks(disks: &[Disk], state_dir: &Path) -> Result<bool> {
    let mut needs_tool = false;
    for disk in disks.iter().filter(|disk| disk.will_be_missing(state_dir)) {
        if disk.size.is_none() {
            return Err(missing_without_size(disk));
        }
        needs_tool = true;
    }
    Ok(needs_tool)
}

/// Absolute form of `path` with its parent directory canonicalized.
///
/// The final component is kept as-is: a symlink inside the state directory
/// is removed by the reset, whatever it points to.
fn host_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|parent| parent.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}

fn missing_without_size(disk: &Disk) -> LaunchError {
    LaunchError::NotFound {
        path: disk.path.clone(),
        reason: "disk image is missing and no size was given".to_string(),
    }
}

/// Create every missing disk with `qemu-img create`.
///
/// A missing disk without a size cannot be created and is reported as
/// not found.
pub fn create_missing_disks(disks: &[Disk], image_tool: Option<&Path>) -> Result<()> {
    for disk in disks.iter().filter(|disk| disk.needs_create()) {
        let Some(size) = disk.size.as_deref() else {
            return Err(missing_without_size(disk));
        };
        let Some(image_tool) = image_tool else {
            return Err(LaunchError::DiskImage {
                path: disk.path.clone(),
                reason: "no image tool available to create it".to_string(),
            });
        };
        create_disk(image_tool, disk, size)?;
    }
    Ok(())
}

fn create_disk(image_tool: &Path, disk: &Disk, size: &str) -> Result<()> {
    if let Some(parent) = disk.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| LaunchError::DiskImage {
            path: disk.path.clone(),
            reason: format!("create parent directory {}: {e}", parent.display()),
        })?;
    }

    let output = Command::new(image_tool)
        .arg("create")
        .arg("-f")
        .arg(&disk.format)
        .arg(&disk.path)
        .arg(size)
        .output()
        .map_err(|e| LaunchError::DiskImage {
            path: disk.path.clone(),
            reason: format!("spawn {}: {e}", image_tool.display()),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LaunchError::DiskImage {
            path: disk.path.clone(),
            reason: format!("{} failed ({}): {}", image_tool.display(), output.status, stderr.trim()),
        });
    }

    info!(
        path = %disk.path.display(),
        format = %disk.format,
        size,
        "created disk image"
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
