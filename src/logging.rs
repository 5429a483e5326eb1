//! Logging initialisation for vmrun.
//!
//! Diagnostics go to stderr, filtered by `RUST_LOG` (default `warn`, so a
//! normal launch only shows the hypervisor's own output). When `VMRUN_LOG`
//! is set to `1`, the default level drops to `info` and every event is also
//! appended to `vmrun/vmrun.log` under the XDG data directory.
//!
//! Returns a guard that must be kept alive for the duration of the process
//! so that buffered log lines are flushed on exit.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const APP_NAME: &str = "vmrun";
const LOG_FILE: &str = "vmrun.log";

pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialise the global tracing subscriber.
///
/// Call once from `main` and hold the returned `LogGuard` until exit.
pub fn init() -> LogGuard {
    let file_logging = std::env::var("VMRUN_LOG").as_deref() == Ok("1");
    let default_level = if file_logging { "info" } else { "warn" };

    let (file_layer, file_guard) = if file_logging {
        let dir = log_dir(
            std::env::var_os("XDG_DATA_HOME").map(PathBuf::from),
            std::env::var_os("HOME").map(PathBuf::from),
        );
        // A missing directory only loses the file copy; stderr still works.
        let _ = std::fs::create_dir_all(&dir);
        let (writer, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE));
        (
            Some(fmt::layer().with_writer(writer).with_ansi(false)),
            Some(guard),
        )
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();

    LogGuard {
        _file_guard: file_guard,
    }
}

/// `$XDG_DATA_HOME/vmrun`, else `~/.local/share/vmrun`, else a temp dir.
fn log_dir(xdg_data_home: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    xdg_data_home
        .filter(|dir| dir.is_absolute())
        .or_else(|| home.map(|home| home.join(".local").join("share")))
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}
