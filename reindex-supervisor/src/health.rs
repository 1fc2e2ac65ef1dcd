//! Health registry.
//!
//! Lock-protected counters shared by the notification path, the attempt
//! path and the health interface. Snapshots are computed on demand.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// Read-only projection of the registry at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// When the process started.
    pub started_at: DateTime<Utc>,

    /// Seconds since start.
    pub uptime_seconds: u64,

    /// Last completed sync.
    pub last_sync: Option<DateTime<Utc>>,

    /// Failures since the last success, skip or reset.
    pub consecutive_failures: u32,

    /// Failure ceiling.
    pub max_failures: u32,

    /// Whether consecutive failures are below the ceiling.
    pub healthy: bool,

    /// Whether a sync is running right now.
    pub syncing: bool,

    /// Size of the pending change set.
    pub pending_changes: usize,

    /// Lifetime completed syncs.
    pub total_syncs: u64,

    /// Lifetime skipped syncs.
    pub skipped_syncs: u64,

    /// Lifetime failed syncs.
    pub failed_syncs: u64,

    /// Vectors written by the last completed sync.
    pub last_vectors_indexed: Option<u64>,

    /// Duration of the last completed sync.
    pub last_duration_seconds: Option<f64>,

    /// Most recent failure text.
    pub last_error: Option<String>,

    /// Most recent skip reason.
    pub last_skip_reason: Option<String>,

    /// Whether the event-driven watcher is active.
    pub watching: bool,

    /// Roots being watched.
    pub watched_paths: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct HealthState {
    last_sync: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    syncing: bool,
    pending_changes: usize,
    total_syncs: u64,
    skipped_syncs: u64,
    failed_syncs: u64,
    last_vectors_indexed: Option<u64>,
    last_duration_seconds: Option<f64>,
    last_error: Option<String>,
    last_skip_reason: Option<String>,
    watching: bool,
    watched_paths: Vec<PathBuf>,
}

/// Thread-safe store of supervisor health.
#[derive(Debug)]
pub struct HealthRegistry {
    max_failures: u32,
    started_at: DateTime<Utc>,
    started: Instant,
    state: Mutex<HealthState>,
    resets: watch::Sender<u64>,
}

impl HealthRegistry {
    /// Create a registry for the given failure ceiling.
    pub fn new(max_failures: u32) -> Self {
        let (resets, _) = watch::channel(0);
        Self {
            max_failures,
            started_at: Utc::now(),
            started: Instant::now(),
            state: Mutex::new(HealthState::default()),
            resets,
        }
    }

    fn state(&self) -> MutexGuard<'_, HealthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A sync attempt is starting.
    pub fn record_attempt_start(&self) {
        self.state().syncing = true;
    }

    /// A sync completed.
    pub fn record_success(&self, vectors_indexed: u64, duration_seconds: f64) {
        let mut state = self.state();
        state.syncing = false;
        state.consecutive_failures = 0;
        state.last_sync = Some(Utc::now());
        state.total_syncs += 1;
        state.last_vectors_indexed = Some(vectors_indexed);
        state.last_duration_seconds = Some(duration_seconds);
        state.last_error = None;
    }

    /// A sync found nothing to do. Clears the failure streak but leaves the
    /// last sync timestamp alone.
    pub fn record_skipped(&self, reason: &str) {
        let mut state = self.state();
        state.syncing = false;
        state.consecutive_failures = 0;
        state.skipped_syncs += 1;
        state.last_skip_reason = Some(reason.to_string());
    }

    /// A sync failed. Returns the reset generation this failure was counted
    /// under.
    pub fn record_failure(&self, error: &str) -> u64 {
        let mut state = self.state();
        state.syncing = false;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.failed_syncs += 1;
        state.last_error = Some(error.to_string());
        *self.resets.borrow()
    }

    /// Update the pending change count.
    pub fn set_pending_count(&self, count: usize) {
        self.state().pending_changes = count;
    }

    /// Update the watching flag and the watched roots.
    pub fn set_watching(&self, enabled: bool, paths: Vec<PathBuf>) {
        let mut state = self.state();
        state.watching = enabled;
        state.watched_paths = paths;
    }

    /// Consecutive failures recorded so far.
    pub fn consecutive_failures(&self) -> u32 {
        self.state().consecutive_failures
    }

    /// The failure ceiling.
    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    /// True while consecutive failures are below the ceiling.
    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures() < self.max_failures
    }

    /// Zero the failure streak and notify reset subscribers.
    pub fn reset_failures(&self) {
        let previous = {
            let mut state = self.state();
            // Bumped under the state lock so failures are ordered against it.
            self.resets.send_modify(|generation| *generation += 1);
            std::mem::take(&mut state.consecutive_failures)
        };
        info!("Failure counter reset (was {previous})");
    }

    /// Number of resets so far.
    pub fn reset_generation(&self) -> u64 {
        *self.resets.borrow()
    }

    /// Subscribe to reset notifications.
    pub fn subscribe_resets(&self) -> watch::Receiver<u64> {
        self.resets.subscribe()
    }

    /// Compute a fresh snapshot.
    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self.state();
        HealthSnapshot {
            started_at: self.started_at,
            uptime_seconds: self.started.elapsed().as_secs(),
            last_sync: state.last_sync,
            consecutive_failures: state.consecutive_failures,
            max_failures: self.max_failures,
            healthy: state.consecutive_failures < self.max_failures,
            syncing: state.syncing,
            pending_changes: state.pending_changes,
            total_syncs: state.total_syncs,
            skipped_syncs: state.skipped_syncs,
            failed_syncs: state.failed_syncs,
            last_vectors_indexed: state.last_vectors_indexed,
            last_duration_seconds: state.last_duration_seconds,
            last_error: state.last_error.clone(),
            last_skip_reason: state.last_skip_reason.clone(),
            watching: state.watching,
            watched_paths: state.watched_paths.clone(),
        }
    }
}
