//! Failure tracking, exponential backoff and the failure ceiling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::engine::{ReindexEngine, SyncReport, SyncRequest, SyncStatus};
use crate::health::HealthRegistry;

/// Backoff bounds and failure ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Backoff floor, used after a success and for the first retry.
    pub min_delay: Duration,

    /// Backoff cap.
    pub max_delay: Duration,

    /// Consecutive failures after which attempts stop.
    pub max_failures: u32,
}

impl BackoffPolicy {
    /// Create a policy.
    pub fn new(min_delay: Duration, max_delay: Duration, max_failures: u32) -> Self {
        Self {
            min_delay,
            max_delay,
            max_failures,
        }
    }

    /// Backoff after `failures` consecutive failures: `min(min * 2^k, max)`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.min_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Failure bookkeeping owned by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureState {
    /// Failures since the last success, skip or reset.
    pub consecutive_failures: u32,

    /// When the last failure happened.
    pub last_failure: Option<Instant>,

    /// Current backoff delay. Doubles per failure up to the cap.
    pub backoff: Duration,

    /// Wait required after the last failure before the next attempt: the
    /// backoff that was in effect when that failure happened.
    pub retry_wait: Duration,
}

impl FailureState {
    /// Fresh state at the backoff floor.
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self {
            consecutive_failures: 0,
            last_failure: None,
            backoff: policy.min_delay,
            retry_wait: Duration::ZERO,
        }
    }

    /// Record a failure at `now`.
    pub fn record_failure(&mut self, policy: &BackoffPolicy, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);
        self.retry_wait = self.backoff;
        self.backoff = self.backoff.saturating_mul(2).min(policy.max_delay);
    }

    /// Clear the failure streak and return to the backoff floor.
    pub fn reset(&mut self, policy: &BackoffPolicy) {
        *self = Self::new(policy);
    }

    /// Whether the failure ceiling has been reached.
    pub fn is_halted(&self, policy: &BackoffPolicy) -> bool {
        self.consecutive_failures >= policy.max_failures
    }

    /// Time left before another attempt is allowed, if any.
    pub fn remaining_wait(&self, now: Instant) -> Option<Duration> {
        let last = self.last_failure?;
        let elapsed = now.saturating_duration_since(last);
        let remaining = self.retry_wait.saturating_sub(elapsed);
        (!remaining.is_zero()).then_some(remaining)
    }
}

/// Broad category of a failure, derived from its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Another process holds an exclusive lock on the index.
    Locked,

    /// An upstream API is rate limiting.
    RateLimited,

    /// Anything else.
    Other,
}

impl FailureKind {
    /// Classify a failure by pattern-matching its message.
    pub fn classify(error: &str) -> Self {
        let lower = error.to_lowercase();
        let mut words = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|word| !word.is_empty());

        if lower.contains("rate limit")
            || lower.contains("ratelimit")
            || lower.contains("too many requests")
            || lower.split(|c: char| !c.is_ascii_digit()).any(|n| n == "429")
        {
            Self::RateLimited
        } else if lower.contains("resource busy")
            || words.any(|word| matches!(word, "lock" | "locked" | "lockerror" | "locking"))
        {
            Self::Locked
        } else {
            Self::Other
        }
    }

    fn guidance(self) -> &'static str {
        match self {
            Self::Locked => "another process holds the index lock; it will be retried once released",
            Self::RateLimited => "the embedding API is rate limiting; backing off before retrying",
            Self::Other => "check the reindex engine logs",
        }
    }
}

/// Result of one controller attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The engine synced.
    Completed {
        vectors_indexed: u64,
        duration_seconds: f64,
    },

    /// The engine had nothing to do.
    Skipped { reason: String },

    /// The engine failed. `retry_in` is `None` once the ceiling is reached.
    Failed {
        error: String,
        kind: FailureKind,
        retry_in: Option<Duration>,
    },

    /// The failure ceiling refused the attempt.
    Halted { failures: u32 },

    /// The backoff window has not elapsed.
    Deferred { remaining: Duration },
}

#[derive(Debug)]
struct ControllerState {
    failures: FailureState,
    seen_reset: u64,
}

/// Wraps each reindex attempt with the ceiling and backoff gates.
///
/// Attempts are serialized: a second caller waits for the first to finish.
pub struct BackoffController {
    engine: Arc<dyn ReindexEngine>,
    registry: Arc<HealthRegistry>,
    policy: BackoffPolicy,
    full_reindex: bool,
    state: Mutex<ControllerState>,
}

impl BackoffController {
    /// Create a controller.
    pub fn new(
        engine: Arc<dyn ReindexEngine>,
        registry: Arc<HealthRegistry>,
        policy: BackoffPolicy,
    ) -> Self {
        let seen_reset = registry.reset_generation();
        Self {
            engine,
            registry,
            policy,
            full_reindex: false,
            state: Mutex::new(ControllerState {
                failures: FailureState::new(&policy),
                seen_reset,
            }),
        }
    }

    /// Request full rebuilds instead of incremental syncs.
    pub fn with_full_reindex(mut self, full_reindex: bool) -> Self {
        self.full_reindex = full_reindex;
        self
    }

    /// The policy in force.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Copy of the current failure state.
    pub async fn failure_state(&self) -> FailureState {
        let mut state = self.state.lock().await;
        self.observe_reset(&mut state);
        state.failures.clone()
    }

    /// Wait for any in-flight attempt to finish.
    pub async fn wait_idle(&self) {
        drop(self.state.lock().await);
    }

    /// Run one reindex attempt through the gates.
    ///
    /// `changes` is only used for logging; the caller keeps ownership of the
    /// pending set and decides what to re-queue from the outcome.
    pub async fn attempt(&self, force: bool, changes: &[String]) -> AttemptOutcome {
        let mut state = self.state.lock().await;
        self.observe_reset(&mut state);

        if state.failures.is_halted(&self.policy) {
            let failures = state.failures.consecutive_failures;
            warn!(
                "Reindex halted after {failures} consecutive failures; {} change(s) stay queued until the failure counter is reset",
                changes.len()
            );
            return AttemptOutcome::Halted { failures };
        }

        if let Some(remaining) = state.failures.remaining_wait(Instant::now()) {
            info!(
                "In backoff after {} failure(s); retrying in {:.0}s",
                state.failures.consecutive_failures,
                remaining.as_secs_f64()
            );
            return AttemptOutcome::Deferred { remaining };
        }

        self.registry.record_attempt_start();
        let request = SyncRequest {
            force,
            full_reindex: self.full_reindex,
        };
        let result = self.run_engine(request).await;

        // A reset may have arrived while the engine was running.
        self.observe_reset(&mut state);

        match result {
            Ok(report) if report.status == SyncStatus::Completed => {
                state.failures.reset(&self.policy);
                self.registry
                    .record_success(report.vectors_indexed, report.duration_seconds);
                info!(
                    "Reindex completed: {} vectors in {:.1}s",
                    report.vectors_indexed, report.duration_seconds
                );
                AttemptOutcome::Completed {
                    vectors_indexed: report.vectors_indexed,
                    duration_seconds: report.duration_seconds,
                }
            }
            Ok(report) if report.status == SyncStatus::Skipped => {
                let reason = report
                    .reason
                    .unwrap_or_else(|| "no changes detected".to_string());
                state.failures.reset(&self.policy);
                self.registry.record_skipped(&reason);
                info!("Reindex skipped: {reason}");
                AttemptOutcome::Skipped { reason }
            }
            Ok(report) => {
                let error = report
                    .error
                    .unwrap_or_else(|| "reindex engine reported failure".to_string());
                self.fail(&mut state, error)
            }
            Err(error) => self.fail(&mut state, error),
        }
    }

    async fn run_engine(&self, request: SyncRequest) -> Result<SyncReport, String> {
        // The engine runs in its own task so a panic inside it is reported
        // as a failed attempt instead of unwinding through the caller.
        let engine = Arc::clone(&self.engine);
        match tokio::spawn(async move { engine.sync(request).await }).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("reindex task aborted: {e}")),
        }
    }

    fn fail(&self, state: &mut ControllerState, error: String) -> AttemptOutcome {
        // The registry orders this failure against resets; a reset that landed
        // before it must clear our state first, or the two counters drift.
        let generation = self.registry.record_failure(&error);
        self.apply_reset(state, generation);
        state.failures.record_failure(&self.policy, Instant::now());

        let kind = FailureKind::classify(&error);
        let failures = state.failures.consecutive_failures;
        let max = self.policy.max_failures;

        let retry_in = if state.failures.is_halted(&self.policy) {
            error!(
                "Reindex failed ({failures}/{max}): {error}. Failure ceiling reached; automatic retries stopped until reset"
            );
            None
        } else {
            let wait = state.failures.retry_wait;
            warn!(
                "Reindex failed ({failures}/{max}): {error}. {}; next attempt in {}s",
                kind.guidance(),
                wait.as_secs()
            );
            Some(wait)
        };

        AttemptOutcome::Failed {
            error,
            kind,
            retry_in,
        }
    }

    fn observe_reset(&self, state: &mut ControllerState) {
        self.apply_reset(state, self.registry.reset_generation());
    }

    fn apply_reset(&self, state: &mut ControllerState, generation: u64) {
        if generation != state.seen_reset {
            state.seen_reset = generation;
            state.failures.reset(&self.policy);
            info!(
                "Failure state cleared by reset; backoff returned to {}s",
                self.policy.min_delay.as_secs()
            );
        }
    }
}

impl std::fmt::Debug for BackoffController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffController")
            .field("policy", &self.policy)
            .field("full_reindex", &self.full_reindex)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_secs(60), Duration::from_secs(3600), 10)
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = policy();
        for k in 0..12 {
            let expected = (60u64 * 2u64.pow(k)).min(3600);
            assert_eq!(policy.delay_after(k), Duration::from_secs(expected));
        }
        assert_eq!(policy.delay_after(100), Duration::from_secs(3600));
    }

    #[test]
    fn test_failure_state_follows_policy() {
        let policy = policy();
        let mut state = FailureState::new(&policy);
        let now = Instant::now();

        for k in 1..8 {
            state.record_failure(&policy, now);
            assert_eq!(state.consecutive_failures, k);
            assert_eq!(state.backoff, policy.delay_after(k));
            assert_eq!(state.retry_wait, policy.delay_after(k - 1));
        }

        state.reset(&policy);
        assert_eq!(state.backoff, policy.min_delay);
        assert_eq!(state.remaining_wait(now), None);
    }

    #[test]
    fn test_remaining_wait_counts_down() {
        let policy = policy();
        let mut state = FailureState::new(&policy);
        let start = Instant::now();
        state.record_failure(&policy, start);

        assert_eq!(
            state.remaining_wait(start + Duration::from_secs(20)),
            Some(Duration::from_secs(40))
        );
        assert_eq!(state.remaining_wait(start + Duration::from_secs(60)), None);
    }

    #[test]
    fn test_halts_at_ceiling() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(8), 3);
        let mut state = FailureState::new(&policy);
        let now = Instant::now();
        for _ in 0..2 {
            state.record_failure(&policy, now);
            assert!(!state.is_halted(&policy));
        }
        state.record_failure(&policy, now);
        assert!(state.is_halted(&policy));
    }

    #[test]
    fn test_classifies_failures() {
        assert_eq!(
            FailureKind::classify("database is locked"),
            FailureKind::Locked
        );
        assert_eq!(
            FailureKind::classify("LockError: could not acquire index lock"),
            FailureKind::Locked
        );
        assert_eq!(
            FailureKind::classify("HTTP 429 Too Many Requests"),
            FailureKind::RateLimited
        );
        assert_eq!(
            FailureKind::classify("Rate limit exceeded for embeddings"),
            FailureKind::RateLimited
        );
        assert_eq!(
            FailureKind::classify("connection refused"),
            FailureKind::Other
        );
    }

    #[test]
    fn test_classification_matches_whole_words() {
        for text in [
            "request blocked by proxy",
            "clock skew detected",
            "wrote 14290 vectors before timeout",
            "port 4290 refused",
        ] {
            assert_eq!(FailureKind::classify(text), FailureKind::Other, "{text}");
        }
        assert_eq!(
            FailureKind::classify("status=429"),
            FailureKind::RateLimited
        );
        assert_eq!(
            FailureKind::classify("Resource busy (os error 16)"),
            FailureKind::Locked
        );
    }
}
