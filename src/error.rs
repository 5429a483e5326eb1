//! Error taxonomy for a single launch.
//!
//! Every pipeline stage returns [`LaunchError`] instead of exiting the
//! process. `main` is the only place that turns an error into a diagnostic
//! line and an exit code (see [`LaunchError::exit_code`]).

use std::fmt;
use std::path::PathBuf;

/// Result type alias for launch operations.
pub type Result<T> = std::result::Result<T, LaunchError>;

/// How the hypervisor process ended when it did not exit cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDetail {
    /// The process exited on its own with a non-zero status.
    Code(i32),
    /// The process was terminated by a signal.
    Signal(i32),
    /// The launcher itself received a signal and killed the process.
    Interrupted(i32),
}

impl fmt::Display for ExitDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitDetail::Code(code) => write!(f, "exited with status {code}"),
            ExitDetail::Signal(sig) => write!(f, "was terminated by signal {sig}"),
            ExitDetail::Interrupted(sig) => {
                write!(f, "was killed after the launcher received signal {sig}")
            }
        }
    }
}

/// Errors that end a launch.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    // =========================================================================
    // Configuration
    // =========================================================================
    /// Malformed or missing command-line / environment input.
    #[error("{0}")]
    Usage(String),

    /// Boot target (or one of its sibling artifacts) is missing or unrecognized.
    #[error("boot target not found: {}: {reason}", path.display())]
    NotFound { path: PathBuf, reason: String },

    /// Invalid or incompatible networking arguments.
    #[error("{0}")]
    NetworkConfig(String),

    // =========================================================================
    // Host preparation
    // =========================================================================
    /// The state directory could not be removed or recreated.
    #[error("cannot reset state directory {}: {source}", path.display())]
    StateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The metadata ISO could not be read or written.
    #[error("cannot prepare metadata ISO {}: {source}", path.display())]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A disk image could not be created.
    #[error("disk image {}: {reason}", path.display())]
    DiskImage { path: PathBuf, reason: String },

    /// The conventional hypervisor executable is absent from the search path.
    #[error("{binary} not found in PATH")]
    BackendNotFound { binary: String },

    // =========================================================================
    // Runtime
    // =========================================================================
    /// The hypervisor process could not be started at all.
    #[error("failed to start {}: {source}", binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The hypervisor ran and ended unsuccessfully.
    #[error("{} {detail}", binary.display())]
    LaunchFailure { binary: PathBuf, detail: ExitDetail },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl LaunchError {
    /// Process exit code for this error.
    ///
    /// Usage errors exit with 2 (matching clap). A failed hypervisor passes
    /// its own status through; signals map to `128 + signo` like a shell.
    pub fn exit_code(&self) -> u8 {
        match self {
            LaunchError::Usage(_) => 2,
            LaunchError::LaunchFailure { detail, .. } => match *detail {
                ExitDetail::Code(code) => u8::try_from(code).ok().filter(|c| *c != 0).unwrap_or(1),
                ExitDetail::Signal(sig) | ExitDetail::Interrupted(sig) => {
                    u8::try_from(128 + sig).unwrap_or(1)
                }
            },
            _ => 1,
        }
    }
}
