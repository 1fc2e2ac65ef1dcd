//! End-to-end supervisor runs.

mod common;

use std::sync::Arc;
use std::time::Duration;

use codex_reindex_supervisor::{
    ChangeCheck, PollMode, ReindexEngine, Supervisor, SupervisorConfig, SupervisorError,
};
use common::{IdleSource, ScriptedEngine, Step, sleep_secs};
use pretty_assertions::assert_eq;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn config() -> SupervisorConfig {
    let mut config = SupervisorConfig::new()
        .with_debounce_seconds(5.0)
        .with_max_failures(3)
        .with_retry_delays(60, 3600);
    config.health.enabled = false;
    config
}

fn start(
    config: SupervisorConfig,
    engine: &Arc<ScriptedEngine>,
) -> (Arc<Supervisor>, CancellationToken, JoinHandle<()>) {
    let supervisor = Arc::new(
        Supervisor::new(config, Arc::clone(engine) as Arc<dyn ReindexEngine>).unwrap(),
    );
    let shutdown = CancellationToken::new();
    let task = {
        let supervisor = Arc::clone(&supervisor);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            supervisor
                .run(Box::new(IdleSource), shutdown)
                .await
                .unwrap();
        })
    };
    (supervisor, shutdown, task)
}

#[tokio::test(start_paused = true)]
async fn test_halted_changes_resume_after_reset() {
    let engine = Arc::new(ScriptedEngine::with_steps(
        (0..3).map(|_| Step::Error("database is locked".to_string())),
    ));
    let (supervisor, shutdown, task) = start(config(), &engine);
    let begin = Instant::now();

    supervisor.scheduler().record("modified: a.md");

    // Attempts at 5, then after waits of 60 and 120 seconds.
    sleep_secs(1000).await;
    assert_eq!(engine.call_offsets(begin), vec![5, 65, 185]);
    assert!(!supervisor.registry().is_healthy());
    assert_eq!(
        supervisor.scheduler().pending(),
        vec!["modified: a.md".to_string()]
    );
    assert!(!supervisor.scheduler().is_armed());

    supervisor.registry().reset_failures();
    sleep_secs(10).await;
    assert_eq!(engine.call_offsets(begin), vec![5, 65, 185, 1005]);
    assert!(supervisor.registry().is_healthy());
    assert!(supervisor.scheduler().pending().is_empty());

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_sync_on_start_runs_immediately() {
    let engine = Arc::new(ScriptedEngine::new());
    let mut config = config();
    config.sync_on_start = true;
    let (supervisor, shutdown, task) = start(config, &engine);
    let begin = Instant::now();

    sleep_secs(1).await;
    assert_eq!(engine.call_offsets(begin), vec![0]);
    assert_eq!(supervisor.registry().snapshot().total_syncs, 1);

    shutdown.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_flight_attempt() {
    let engine = Arc::new(ScriptedEngine::new().with_sync_duration(Duration::from_secs(30)));
    let (supervisor, shutdown, task) = start(config(), &engine);

    supervisor.scheduler().record("modified: a.md");
    sleep_secs(6).await;
    assert!(supervisor.registry().snapshot().syncing);

    supervisor.scheduler().record("modified: b.md");
    shutdown.cancel();
    task.await.unwrap();

    let snapshot = supervisor.registry().snapshot();
    assert!(!snapshot.syncing);
    assert_eq!(snapshot.total_syncs, 1);
    assert_eq!(engine.call_count(), 1);
    assert!(!supervisor.scheduler().is_armed());
}

#[tokio::test(start_paused = true)]
async fn test_polling_source_once() {
    let engine = Arc::new(ScriptedEngine::new());
    engine.push_check(Ok(ChangeCheck::changed("3 files modified")));
    let mut config = config();
    config.poll.mode = PollMode::Once;
    config.poll.full_reindex = true;

    let supervisor =
        Supervisor::new(config, Arc::clone(&engine) as Arc<dyn ReindexEngine>).unwrap();
    let source = supervisor.polling_source();
    supervisor
        .run(Box::new(source), CancellationToken::new())
        .await
        .unwrap();

    let calls = engine.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].request.full_reindex);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let engine = Arc::new(ScriptedEngine::new()) as Arc<dyn ReindexEngine>;
    let config = config().with_retry_delays(600, 60);
    let err = Supervisor::new(config, engine).unwrap_err();
    assert!(matches!(err, SupervisorError::Config(_)));
}

#[tokio::test]
async fn test_event_source_requires_watch_dirs() {
    let engine = Arc::new(ScriptedEngine::new()) as Arc<dyn ReindexEngine>;
    let supervisor = Supervisor::new(config(), engine).unwrap();
    assert!(matches!(
        supervisor.event_source(),
        Err(SupervisorError::Config(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_file_change_triggers_reindex() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let engine = Arc::new(ScriptedEngine::new());
    let config = config()
        .with_watch_dir(&root)
        .with_debounce_seconds(0.2);
    let supervisor = Arc::new(
        Supervisor::new(config, Arc::clone(&engine) as Arc<dyn ReindexEngine>).unwrap(),
    );
    let source = supervisor.event_source().unwrap();

    let shutdown = CancellationToken::new();
    let task = {
        let supervisor = Arc::clone(&supervisor);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { supervisor.run(Box::new(source), shutdown).await })
    };

    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while !supervisor.registry().snapshot().watching {
        assert!(std::time::Instant::now() < deadline, "watcher never started");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(supervisor.registry().snapshot().watched_paths.len(), 1);

    std::fs::write(root.join("notes.md"), "# Notes\n").unwrap();
    std::fs::write(root.join("ignored.txt"), "skip").unwrap();

    while engine.call_count() == 0 {
        assert!(std::time::Instant::now() < deadline, "no reindex attempt");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    shutdown.cancel();
    task.await.unwrap().unwrap();
    assert!(!supervisor.registry().snapshot().watching);
}
