//! Hypervisor binary discovery.
//!
//! QEMU ships one system emulator per guest architecture
//! (`qemu-system-x86_64`, `qemu-system-aarch64`, ...). The binary for the
//! requested architecture must be on the search path; there is no fallback
//! to another architecture and no bundled copy.

use std::ffi::OsString;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::{LaunchError, Result};

/// Disk image tool used to create missing disks.
pub const IMAGE_TOOL: &str = "qemu-img";

/// Conventional system emulator name for `arch`.
pub fn binary_name(arch: &str) -> String {
    format!("qemu-system-{arch}")
}

/// Locate the system emulator for `arch` in an explicit search path.
pub fn find_hypervisor_in(arch: &str, search_path: Option<OsString>) -> Result<PathBuf> {
    let path = lookup(&binary_name(arch), search_path)?;
    info!(arch, path = %path.display(), "found hypervisor binary");
    Ok(path)
}

/// Locate `qemu-img` in an explicit search path.
pub fn find_image_tool_in(search_path: Option<OsString>) -> Result<PathBuf> {
    let path = lookup(IMAGE_TOOL, search_path)?;
    debug!(path = %path.display(), "found image tool");
    Ok(path)
}

fn lookup(binary: &str, search_path: Option<OsString>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    which::which_in(binary, search_path, cwd).map_err(|e| {
        debug!(binary, error = %e, "executable lookup failed");
        LaunchError::BackendNotFound {
            binary: binary.to_string(),
        }
    })
}
