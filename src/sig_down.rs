//! Graceful shutdown on SIGTERM and SIGINT.
//!
//! A background task listens for either signal and fires a cancellation
//! token. The caller drains in-flight work against that token; a second
//! watchdog enforces the shutdown deadline and force-exits if draining
//! hangs.

use std::time::Duration;
use tokio::signal::unix::SignalKind;
use tokio::signal::unix::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How long graceful shutdown may take before the process force-exits.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

pub struct SigDown {
    _task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Registers the signal handlers. Fails if signal registration fails.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let inner = CancellationToken::new();
        let outer = inner.clone();
        let task_tracker = TaskTracker::new();
        task_tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                    inner.cancel();
                },
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT, shutting down");
                    inner.cancel();
                }
            }
        });
        task_tracker.close();
        Ok(Self {
            _task_tracker: task_tracker,
            cancellation_token: outer,
        })
    }

    /// A clone of the cancellation token for distributing to subsystems.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Arm the force-exit watchdog: once shutdown starts, the process has
    /// `SHUTDOWN_DEADLINE` to finish draining.
    pub fn arm_deadline(&self) {
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            tokio::time::sleep(SHUTDOWN_DEADLINE).await;
            tracing::error!("graceful shutdown exceeded deadline, exiting");
            std::process::exit(1);
        });
    }
}
