//! Boot target validation and per-instance state directory handling.
//!
//! A boot target is the kernel produced by the image build, named
//! `<prefix>-kernel`. Its siblings share the prefix:
//!
//! - `<prefix>-initrd.img`  initial ramdisk (kernel boot)
//! - `<prefix>-cmdline`     kernel command line (kernel boot)
//! - `<prefix>.iso`         bootable ISO (ISO boot)
//! - `<prefix>-state/`      default state directory
//!
//! The state directory is wiped and recreated on every launch and is left
//! behind afterwards for inspection.

use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{LaunchError, Result};

/// Filename suffix every boot target must carry.
pub const KERNEL_SUFFIX: &str = "-kernel";
/// Suffix appended to the prefix to derive the default state directory.
pub const STATE_SUFFIX: &str = "-state";

const INITRD_SUFFIX: &str = "-initrd.img";
const CMDLINE_SUFFIX: &str = "-cmdline";
const ISO_SUFFIX: &str = ".iso";

/// Which boot flow QEMU should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootMode {
    /// `-kernel`/`-initrd`/`-append` direct kernel boot.
    Kernel,
    /// Boot from the `<prefix>.iso` CD-ROM image.
    Iso,
}

/// Resolved boot artifacts for the chosen [`BootMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Boot {
    Kernel {
        kernel: PathBuf,
        initrd: PathBuf,
        cmdline: String,
    },
    Iso {
        iso: PathBuf,
    },
}

impl Boot {
    pub fn mode(&self) -> BootMode {
        match self {
            Boot::Kernel { .. } => BootMode::Kernel,
            Boot::Iso { .. } => BootMode::Iso,
        }
    }
}

/// A boot target that exists and follows the `-kernel` naming convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootTarget {
    /// The `<prefix>-kernel` path as given.
    pub path: PathBuf,
    /// The path with exactly one `-kernel` suffix stripped.
    pub prefix: String,
}

impl BootTarget {
    /// `<prefix>-state`.
    pub fn default_state_dir(&self) -> PathBuf {
        self.sibling(STATE_SUFFIX)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.prefix, suffix))
    }

    /// Resolve the sibling artifacts `mode` needs. Reads the command line
    /// file for kernel boot; performs no writes.
    pub fn boot_artifacts(&self, mode: BootMode) -> Result<Boot> {
        match mode {
            BootMode::Kernel => {
                let initrd = existing(self.sibling(INITRD_SUFFIX), "initrd is missing")?;
                let cmdline_path = existing(self.sibling(CMDLINE_SUFFIX), "cmdline is missing")?;
                let cmdline = std::fs::read_to_string(&cmdline_path)
                    .map_err(|source| LaunchError::Io {
                        context: format!("read kernel command line {}", cmdline_path.display()),
                        source,
                    })?
                    .trim_end()
                    .to_string();

                Ok(Boot::Kernel {
                    kernel: self.path.clone(),
                    initrd,
                    cmdline,
                })
            }
            BootMode::Iso => Ok(Boot::Iso {
                iso: existing(self.sibling(ISO_SUFFIX), "ISO image is missing")?,
            }),
        }
    }
}

fn existing(path: PathBuf, reason: &str) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(LaunchError::NotFound {
            path,
            reason: reason.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check that `path` exists and ends in [`KERNEL_SUFFIX`].
///
/// Never touches the filesystem beyond a metadata lookup.
pub fn validate_target(path: &Path) -> Result<BootTarget> {
    let not_found = |reason: &str| LaunchError::NotFound {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if !path.exists() {
        return Err(not_found("no such file"));
    }

    let raw = path
        .to_str()
        .ok_or_else(|| not_found("path is not valid UTF-8"))?;
    let prefix = raw
        .strip_suffix(KERNEL_SUFFIX)
        .filter(|prefix| !prefix.is_empty() && !prefix.ends_with('/'))
        .ok_or_else(|| {
            not_found(&format!(
                "expected a kernel image named <prefix>{KERNEL_SUFFIX}; other image types need a different boot flow"
            ))
        })?;

    debug!(target = %path.display(), prefix, "validated boot target");

    Ok(BootTarget {
        path: path.to_path_buf(),
        prefix: prefix.to_string(),
    })
}

// ---------------------------------------------------------------------------
// State directory
// ---------------------------------------------------------------------------

/// Remove `dir` if present, then recreate it empty with mode 0755.
pub fn reset_state_dir(dir: &Path) -> Result<()> {
    let state_err = |source| LaunchError::StateDir {
        path: dir.to_path_buf(),
        source,
    };

    if dir.symlink_metadata().is_ok() {
        std::fs::remove_dir_all(dir).map_err(state_err)?;
        debug!(dir = %dir.display(), "removed previous state directory");
    }

    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)
        .map_err(state_err)?;

    info!(dir = %dir.display(), "state directory ready");
    Ok(())
}

/// Validate `target` and pick the state directory: `state_override` if
/// given, else `<prefix>-state`.
///
/// Touches nothing; the caller resets the directory with
/// [`reset_state_dir`] once every other check has passed.
pub fn locate(target: &Path, state_override: Option<&Path>) -> Result<(BootTarget, PathBuf)> {
    let target = validate_target(target)?;
    let state_dir = state_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| target.default_state_dir());
    Ok((target, state_dir))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
