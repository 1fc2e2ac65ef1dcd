//! Shared fixtures for the supervisor integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use codex_reindex_supervisor::{
    BackoffController, BackoffPolicy, ChangeCheck, ChangeSource, DebounceScheduler, EngineError,
    HealthRegistry, ReindexEngine, Result, SyncReport, SyncRequest,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One scripted response to `sync`.
#[derive(Debug, Clone)]
pub enum Step {
    Report(SyncReport),
    Error(String),
    Panic,
}

/// A recorded `sync` call.
#[derive(Debug, Clone, Copy)]
pub struct Call {
    pub at: Instant,
    pub request: SyncRequest,
}

/// In-memory engine that replays a script and records every call.
///
/// Once the script runs out every sync completes.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    steps: Mutex<VecDeque<Step>>,
    checks: Mutex<VecDeque<std::result::Result<ChangeCheck, String>>>,
    calls: Mutex<Vec<Call>>,
    check_calls: Mutex<usize>,
    sync_duration: Duration,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Make every sync take `duration` of (virtual) time.
    pub fn with_sync_duration(mut self, duration: Duration) -> Self {
        self.sync_duration = duration;
        self
    }

    pub fn push_check(&self, check: std::result::Result<ChangeCheck, String>) {
        self.checks.lock().unwrap().push_back(check);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn check_count(&self) -> usize {
        *self.check_calls.lock().unwrap()
    }

    /// Whole seconds from `start` to each call.
    pub fn call_offsets(&self, start: Instant) -> Vec<u64> {
        self.calls()
            .iter()
            .map(|call| call.at.duration_since(start).as_secs())
            .collect()
    }
}

#[async_trait]
impl ReindexEngine for ScriptedEngine {
    async fn sync(&self, request: SyncRequest) -> std::result::Result<SyncReport, EngineError> {
        self.calls.lock().unwrap().push(Call {
            at: Instant::now(),
            request,
        });
        let step = self.steps.lock().unwrap().pop_front();

        if !self.sync_duration.is_zero() {
            tokio::time::sleep(self.sync_duration).await;
        }

        match step {
            None => Ok(SyncReport::completed(10, 0.5)),
            Some(Step::Report(report)) => Ok(report),
            Some(Step::Error(message)) => Err(EngineError::Failed(message)),
            Some(Step::Panic) => panic!("engine exploded"),
        }
    }

    async fn detect_changes(&self) -> std::result::Result<ChangeCheck, EngineError> {
        *self.check_calls.lock().unwrap() += 1;
        match self.checks.lock().unwrap().pop_front() {
            None => Ok(ChangeCheck::unchanged()),
            Some(Ok(check)) => Ok(check),
            Some(Err(message)) => Err(EngineError::Unavailable(message)),
        }
    }
}

/// Scheduler, controller and registry wired around one engine.
pub struct Harness {
    pub engine: Arc<ScriptedEngine>,
    pub registry: Arc<HealthRegistry>,
    pub controller: Arc<BackoffController>,
    pub scheduler: DebounceScheduler,
}

/// Debounce 5 s, ceiling 3, backoff 60 s to 3600 s.
pub fn harness(engine: ScriptedEngine) -> Harness {
    harness_with(engine, Duration::from_secs(5), policy(3))
}

pub fn harness_with(engine: ScriptedEngine, debounce: Duration, policy: BackoffPolicy) -> Harness {
    let engine = Arc::new(engine);
    let registry = Arc::new(HealthRegistry::new(policy.max_failures));
    let controller = Arc::new(BackoffController::new(
        Arc::clone(&engine) as Arc<dyn ReindexEngine>,
        Arc::clone(&registry),
        policy,
    ));
    let scheduler = DebounceScheduler::new(
        debounce,
        false,
        Arc::clone(&controller),
        Arc::clone(&registry),
    )
    .unwrap();
    Harness {
        engine,
        registry,
        controller,
        scheduler,
    }
}

pub fn policy(max_failures: u32) -> BackoffPolicy {
    BackoffPolicy::new(
        Duration::from_secs(60),
        Duration::from_secs(3600),
        max_failures,
    )
}

/// A source that produces nothing and waits for shutdown. Tests feed the
/// scheduler directly.
#[derive(Debug, Default)]
pub struct IdleSource;

#[async_trait]
impl ChangeSource for IdleSource {
    fn name(&self) -> &'static str {
        "idle"
    }

    async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        shutdown.cancelled().await;
        Ok(())
    }
}

/// Sleep on the (possibly paused) tokio clock.
pub async fn sleep_secs(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}
