//! Shutdown coordination (spec.md §4.I).
//!
//! Signal plumbing grounded on the teacher's `run_with_transport`
//! (`turbomcp-server`'s `server/core.rs`): one task races
//! `tokio::signal::ctrl_c()` against a `#[cfg(unix)]` `SIGTERM` listener,
//! both driving a single shutdown point rather than each acting
//! independently.

use std::time::Duration;

use tokio::time::Instant;

use crate::queue::PerTargetQueueMap;
use crate::sse::SseHub;

/// Default time allotted for in-flight queue entries to finish naturally
/// before they're cancelled and rejected with `Shutdown` (spec.md §4.I).
pub const DEFAULT_DRAIN_DEADLINE: Duration = Duration::from_secs(30);

/// How the drain concluded, driving the process exit code (spec.md §4.I
/// step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every queue went idle before the deadline.
    Clean,
    /// The drain deadline fired with work still outstanding.
    DeadlineExceeded,
}

impl DrainOutcome {
    /// The process exit code this outcome maps to.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::DeadlineExceeded => 1,
        }
    }
}

/// Resolves once SIGINT or (on Unix) SIGTERM is received.
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
                    _ = sigterm.recv() => tracing::info!("SIGTERM received"),
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler, falling back to SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("SIGINT received");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("SIGINT received");
    }
}

/// Spawns a task that exits the process immediately with 130 if a second
/// shutdown signal arrives while the first drain is still running
/// (spec.md §4.I).
pub fn spawn_second_signal_guard() {
    tokio::spawn(async {
        wait_for_shutdown_signal().await;
        tracing::warn!("second shutdown signal received during drain, exiting immediately");
        std::process::exit(130);
    });
}

/// Drives spec.md §4.I steps 2-3: every `PerTargetQueue` enters draining
/// mode, the SSE hub marks its subscribers dead, and the caller polls until
/// every queue goes idle or `deadline` elapses.
///
/// Step 1 (stop accepting new connections) and step 4 (closing the
/// `EventStore` once outstanding writes return) happen around this call in
/// `main`: the listener's graceful-shutdown future is what actually stops
/// accepting connections, and the store is simply dropped once every
/// `AuditLogger` clone referencing it has gone out of scope.
pub async fn drain(queues: &PerTargetQueueMap, sse: &SseHub, deadline: Duration) -> DrainOutcome {
    queues.drain_all(deadline).await;
    sse.shutdown();

    let poll_interval = Duration::from_millis(50);
    let started = Instant::now();
    loop {
        if queues.all_idle().await {
            return DrainOutcome::Clean;
        }
        if started.elapsed() >= deadline {
            return DrainOutcome::DeadlineExceeded;
        }
        tokio::time::sleep(poll_interval).await;
    }
}
