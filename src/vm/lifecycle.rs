//! Hypervisor process execution.
//!
//! ## Architecture
//!
//! ```text
//! launch(binary, args)
//!     └─► tokio::process::Command  →  qemu-system-<arch> child
//!             (stdin/stdout/stderr inherited, same process group)
//!             ├─► child exits            → Ok / LaunchFailure{Code|Signal}
//!             └─► SIGINT/SIGTERM to us   → kill + reap child
//!                                          → LaunchFailure{Interrupted}
//! ```
//!
//! The child stays in the caller's process group, so a terminal interrupt
//! reaches QEMU directly. There is no retry: a crashed hypervisor is
//! reported, never relaunched.

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

use crate::error::{ExitDetail, LaunchError, Result};

/// Run `binary` with `args` and wait for it to exit.
///
/// Returns `Ok(())` only when the process exits with status 0.
pub async fn launch(binary: &Path, args: &[String]) -> Result<()> {
    let listen = |kind: SignalKind| {
        signal(kind).map_err(|source| LaunchError::Io {
            context: format!("install handler for signal {}", kind.as_raw_value()),
            source,
        })
    };
    let mut sigint = listen(SignalKind::interrupt())?;
    let mut sigterm = listen(SignalKind::terminate())?;

    debug!(binary = %binary.display(), args = ?args, "spawning hypervisor");

    let mut child = Command::new(binary)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| LaunchError::Spawn {
            binary: binary.to_path_buf(),
            source,
        })?;

    info!(
        binary = %binary.display(),
        pid = child.id().unwrap_or_default(),
        "hypervisor started"
    );

    let waited = tokio::select! {
        status = child.wait() => Ok(status),
        _ = sigint.recv() => Err(SignalKind::interrupt()),
        _ = sigterm.recv() => Err(SignalKind::terminate()),
    };

    match waited {
        Ok(status) => {
            let status = status.map_err(|source| LaunchError::Io {
                context: format!("wait for {}", binary.display()),
                source,
            })?;
            check_status(binary, status)
        }
        Err(kind) => {
            let signo = kind.as_raw_value();
            warn!(signal = signo, "received signal, stopping hypervisor");
            if let Err(e) = child.kill().await {
                error!(error = %e, "failed to kill hypervisor");
            }
            Err(LaunchError::LaunchFailure {
                binary: binary.to_path_buf(),
                detail: ExitDetail::Interrupted(signo),
            })
        }
    }
}

/// Map a child exit status to the launch outcome.
pub fn check_status(binary: &Path, status: ExitStatus) -> Result<()> {
    if status.success() {
        info!(binary = %binary.display(), "hypervisor exited cleanly");
        return Ok(());
    }

    let detail = match (status.code(), status.signal()) {
        (Some(code), _) => ExitDetail::Code(code),
        (None, Some(sig)) => ExitDetail::Signal(sig),
        (None, None) => ExitDetail::Code(1),
    };
    error!(binary = %binary.display(), exit_status = ?status, "hypervisor failed");

    Err(LaunchError::LaunchFailure {
        binary: binary.to_path_buf(),
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clean_exit_is_ok() {
        launch(Path::new("/bin/sh"), &["-c".to_string(), "exit 0".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_launch_failure() {
        let err = launch(Path::new("/bin/sh"), &["-c".to_string(), "exit 3".to_string()])
            .await
            .unwrap_err();

        match err {
            LaunchError::LaunchFailure { detail, .. } => assert_eq!(detail, ExitDetail::Code(3)),
            other => panic!("expected LaunchFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn signaled_child_reports_signal() {
        let err = launch(
            Path::new("/bin/sh"),
            &["-c".to_string(), "kill -KILL $$".to_string()],
        )
        .await
        .unwrap_err();

        match err {
            LaunchError::LaunchFailure { detail, .. } => assert_eq!(detail, ExitDetail::Signal(9)),
            other => panic!("expected LaunchFailure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let err = launch(Path::new("/nonexistent/qemu-system-x86_64"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }

    #[test]
    fn status_mapping() {
        let ok = ExitStatus::from_raw(0);
        assert!(check_status(Path::new("qemu"), ok).is_ok());

        // wait(2) encoding: exit code in the high byte
        let failed = ExitStatus::from_raw(2 << 8);
        assert!(matches!(
            check_status(Path::new("qemu"), failed),
            Err(LaunchError::LaunchFailure {
                detail: ExitDetail::Code(2),
                ..
            })
        ));

        let killed = ExitStatus::from_raw(15);
        assert!(matches!(
            check_status(Path::new("qemu"), killed),
            Err(LaunchError::LaunchFailure {
                detail: ExitDetail::Signal(15),
                ..
            })
        ));
    }
}
