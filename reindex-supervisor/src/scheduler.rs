//! Debounced scheduling of reindex attempts.
//!
//! ```text
//! Idle ──change──► Pending ──quiet period──► Firing ──attempt──► Idle
//!                    ▲   │
//!                    └───┘ change: cancel timer, re-arm full interval
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use codex_directory_watcher::{ChangeDescription, ChangeSink};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::backoff::{AttemptOutcome, BackoffController};
use crate::error::Result;
use crate::health::HealthRegistry;

/// Number of pending entries written to the log when a window fires.
const LOGGED_CHANGES: usize = 5;

/// Coalesces bursts of changes into single reindex attempts.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DebounceScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    debounce: Duration,
    quiet: bool,
    controller: Arc<BackoffController>,
    registry: Arc<HealthRegistry>,
    runtime: Handle,
    attempts: TaskTracker,
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    pending: BTreeSet<String>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
    force_next: bool,
    closed: bool,
}

impl DebounceScheduler {
    /// Create a scheduler bound to the current tokio runtime. With `quiet`
    /// set, individual changes are logged at debug level only.
    pub fn new(
        debounce: Duration,
        quiet: bool,
        controller: Arc<BackoffController>,
        registry: Arc<HealthRegistry>,
    ) -> Result<Self> {
        let runtime = Handle::try_current()?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                debounce,
                quiet,
                controller,
                registry,
                runtime,
                attempts: TaskTracker::new(),
                state: Mutex::new(SchedulerState::default()),
            }),
        })
    }

    /// The quiet period.
    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    /// Record a change and restart the quiet period.
    pub fn record(&self, description: impl Into<String>) {
        let description = description.into();
        if self.inner.quiet {
            debug!("Change: {description}");
        } else {
            info!("Change: {description}");
        }

        let mut state = self.inner.state();
        if state.closed {
            return;
        }
        state.pending.insert(description);
        self.inner.registry.set_pending_count(state.pending.len());
        SchedulerInner::arm(&self.inner, &mut state, self.inner.debounce);
    }

    /// Fire as soon as possible, without waiting for a quiet period.
    pub fn trigger_now(&self, force: bool) {
        let mut state = self.inner.state();
        if state.closed {
            return;
        }
        state.force_next |= force;
        SchedulerInner::arm(&self.inner, &mut state, Duration::ZERO);
    }

    /// Re-arm a full quiet period if changes are still queued. Used after a
    /// failure counter reset so halted work resumes.
    pub fn rearm_if_pending(&self) -> bool {
        self.rearm_after(self.inner.debounce)
    }

    /// Arm a timer firing after `delay` if changes are queued.
    pub fn rearm_after(&self, delay: Duration) -> bool {
        let mut state = self.inner.state();
        if state.closed || state.pending.is_empty() {
            return false;
        }
        SchedulerInner::arm(&self.inner, &mut state, delay);
        true
    }

    /// Snapshot of the pending change set.
    pub fn pending(&self) -> Vec<String> {
        self.inner.state().pending.iter().cloned().collect()
    }

    /// Whether a timer is currently armed.
    pub fn is_armed(&self) -> bool {
        self.inner.state().timer.is_some()
    }

    /// Stop scheduling: cancel the armed timer and ignore further changes.
    /// In-flight attempts keep running; see [`Self::wait_idle`].
    pub fn cancel(&self) {
        let mut state = self.inner.state();
        state.closed = true;
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
            debug!("Cancelled pending debounce timer");
        }
    }

    /// Wait for every attempt started by this scheduler to finish.
    pub async fn wait_idle(&self) {
        self.inner.attempts.close();
        self.inner.attempts.wait().await;
    }
}

impl SchedulerInner {
    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace any armed timer with one firing after `delay`. Must be called
    /// with the state lock held.
    fn arm(inner: &Arc<Self>, state: &mut SchedulerState, delay: Duration) {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
        let generation = state.generation;
        let this = Arc::clone(inner);
        state.timer = Some(inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            Self::fire(this, generation);
        }));
    }

    /// Timer expiry: take the pending set and hand it to an attempt task.
    fn fire(inner: Arc<Self>, generation: u64) {
        let (changes, force) = {
            let mut state = inner.state();
            if state.closed || state.generation != generation {
                return;
            }
            // Detach from the timer slot so a later re-arm cannot abort the
            // attempt below.
            state.timer = None;
            let changes: Vec<String> = std::mem::take(&mut state.pending).into_iter().collect();
            inner.registry.set_pending_count(0);
            (changes, std::mem::take(&mut state.force_next))
        };

        let this = Arc::clone(&inner);
        inner
            .attempts
            .spawn_on(async move { this.run_attempt(changes, force).await }, &inner.runtime);
    }

    async fn run_attempt(self: Arc<Self>, changes: Vec<String>, force: bool) {
        log_changes(&changes);

        let outcome = self.controller.attempt(force, &changes).await;
        let retry_in = match outcome {
            AttemptOutcome::Completed { .. } | AttemptOutcome::Skipped { .. } => return,
            AttemptOutcome::Failed { retry_in, .. } => retry_in,
            AttemptOutcome::Halted { .. } => None,
            AttemptOutcome::Deferred { remaining } => Some(remaining),
        };
        self.requeue(changes, force, retry_in);
    }

    /// Put attempted changes and the force flag back, and optionally arm a
    /// retry timer.
    fn requeue(self: &Arc<Self>, changes: Vec<String>, force: bool, retry_in: Option<Duration>) {
        let mut state = self.state();
        if state.closed {
            warn!(
                "Shutting down with {} unsynced change(s)",
                changes.len() + state.pending.len()
            );
            return;
        }
        state.force_next |= force;
        state.pending.extend(changes);
        self.registry.set_pending_count(state.pending.len());
        if let Some(delay) = retry_in {
            Self::arm(self, &mut state, delay);
        }
    }
}

fn log_changes(changes: &[String]) {
    if changes.is_empty() {
        info!("Running requested sync with no recorded changes");
        return;
    }

    let shown: Vec<&str> = changes
        .iter()
        .take(LOGGED_CHANGES)
        .map(String::as_str)
        .collect();
    let more = changes.len().saturating_sub(LOGGED_CHANGES);
    if more > 0 {
        info!(
            "Syncing {} change(s): {} (+{more} more)",
            changes.len(),
            shown.join(", ")
        );
    } else {
        info!("Syncing {} change(s): {}", changes.len(), shown.join(", "));
    }
}

impl ChangeSink for DebounceScheduler {
    fn record(&self, change: ChangeDescription) {
        DebounceScheduler::record(self, change.to_string());
    }
}

impl std::fmt::Debug for DebounceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebounceScheduler")
            .field("debounce", &self.inner.debounce)
            .field("pending", &self.inner.state().pending.len())
            .finish()
    }
}
