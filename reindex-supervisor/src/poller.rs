//! Polling change source.
//!
//! Instead of filesystem notifications, periodically asks the engine whether
//! anything changed and runs an attempt through the controller when it did.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backoff::{AttemptOutcome, BackoffController};
use crate::config::{PollConfig, PollMode};
use crate::engine::ReindexEngine;
use crate::health::HealthRegistry;

/// Granularity at which shutdown is observed while sleeping.
const SHUTDOWN_SLICE: Duration = Duration::from_secs(1);

/// What a single poll iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The engine reported no changes.
    Unchanged,

    /// Changes were found but only reported.
    DryRun { summary: String },

    /// Changes were found and an attempt ran.
    Attempted(AttemptOutcome),

    /// The change check itself failed.
    CheckFailed(String),
}

/// Periodic change detection driving the backoff controller.
pub struct PollingMonitor {
    interval: Duration,
    mode: PollMode,
    engine: Arc<dyn ReindexEngine>,
    controller: Arc<BackoffController>,
    registry: Arc<HealthRegistry>,
}

impl PollingMonitor {
    pub fn new(
        config: &PollConfig,
        engine: Arc<dyn ReindexEngine>,
        controller: Arc<BackoffController>,
        registry: Arc<HealthRegistry>,
    ) -> Self {
        Self {
            interval: config.interval(),
            mode: config.mode,
            engine,
            controller,
            registry,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn mode(&self) -> PollMode {
        self.mode
    }

    /// Run one check-and-sync iteration.
    pub async fn poll_once(&self) -> PollOutcome {
        let check = match self.engine.detect_changes().await {
            Ok(check) => check,
            Err(e) => {
                let message = e.to_string();
                error!("Change check failed: {message}");
                return PollOutcome::CheckFailed(message);
            }
        };

        if !check.changed {
            debug!("No changes detected");
            return PollOutcome::Unchanged;
        }

        let summary = check
            .summary
            .unwrap_or_else(|| "changes detected".to_string());

        if self.mode == PollMode::DryRun {
            info!("[dry run] Would sync: {summary}");
            return PollOutcome::DryRun { summary };
        }

        info!("Changes detected: {summary}");
        self.registry.set_pending_count(1);
        let outcome = self
            .controller
            .attempt(false, std::slice::from_ref(&summary))
            .await;
        if matches!(
            outcome,
            AttemptOutcome::Completed { .. } | AttemptOutcome::Skipped { .. }
        ) {
            self.registry.set_pending_count(0);
        }
        PollOutcome::Attempted(outcome)
    }

    /// Poll until `shutdown` fires, or once for the single-shot modes.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Polling every {}s ({:?} mode)",
            self.interval.as_secs(),
            self.mode
        );

        loop {
            // An iteration in progress always completes.
            self.poll_once().await;

            if matches!(self.mode, PollMode::Once | PollMode::DryRun) {
                break;
            }
            if !sleep_unless_cancelled(self.interval, &shutdown).await {
                break;
            }
        }

        info!("Polling monitor stopped");
    }
}

/// Sleep for `total` in short slices. Returns `false` if cancelled first.
async fn sleep_unless_cancelled(total: Duration, shutdown: &CancellationToken) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        let slice = remaining.min(SHUTDOWN_SLICE);
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = tokio::time::sleep(slice) => {}
        }
        remaining = remaining.saturating_sub(slice);
    }
    !shutdown.is_cancelled()
}

impl std::fmt::Debug for PollingMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingMonitor")
            .field("interval", &self.interval)
            .field("mode", &self.mode)
            .finish()
    }
}
