//! Debounce scheduling on a paused clock.

mod common;

use std::time::Duration;

use common::{ScriptedEngine, Step, harness, sleep_secs};
use pretty_assertions::assert_eq;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_burst_coalesces_into_one_attempt() {
    let h = harness(ScriptedEngine::new());
    let start = Instant::now();

    h.scheduler.record("modified: a.md");
    sleep_secs(1).await;
    h.scheduler.record("modified: b.yaml");
    sleep_secs(2).await;
    h.scheduler.record("modified: a.md");

    // t = 7: still inside the quiet period of the last change.
    sleep_secs(4).await;
    assert_eq!(h.engine.call_count(), 0);
    assert_eq!(
        h.scheduler.pending(),
        vec!["modified: a.md".to_string(), "modified: b.yaml".to_string()]
    );
    assert_eq!(h.registry.snapshot().pending_changes, 2);

    sleep_secs(2).await;
    assert_eq!(h.engine.call_offsets(start), vec![8]);
    assert!(h.scheduler.pending().is_empty());
    assert!(!h.scheduler.is_armed());

    let snapshot = h.registry.snapshot();
    assert_eq!(snapshot.total_syncs, 1);
    assert_eq!(snapshot.pending_changes, 0);
}

#[tokio::test(start_paused = true)]
async fn test_single_change_fires_after_one_interval() {
    let h = harness(ScriptedEngine::new());
    let start = Instant::now();

    h.scheduler.record("created: notes.md");
    assert!(h.scheduler.is_armed());

    sleep_secs(30).await;
    assert_eq!(h.engine.call_offsets(start), vec![5]);
    assert!(!h.engine.calls()[0].request.force);
}

#[tokio::test(start_paused = true)]
async fn test_change_during_attempt_waits_for_next_cycle() {
    let h = harness(ScriptedEngine::new().with_sync_duration(Duration::from_secs(10)));
    let start = Instant::now();

    h.scheduler.record("modified: a.md");
    // The first attempt runs from t = 5 to t = 15.
    sleep_secs(7).await;
    h.scheduler.record("modified: b.md");
    assert_eq!(h.scheduler.pending(), vec!["modified: b.md".to_string()]);

    sleep_secs(30).await;
    // The second window closes at 12 but waits for the first attempt.
    assert_eq!(h.engine.call_offsets(start), vec![5, 15]);
    assert!(h.scheduler.pending().is_empty());
    assert_eq!(h.registry.snapshot().total_syncs, 2);
}

#[tokio::test(start_paused = true)]
async fn test_trigger_now_skips_quiet_period() {
    let h = harness(ScriptedEngine::new());
    let start = Instant::now();

    h.scheduler.trigger_now(true);
    sleep_secs(1).await;

    assert_eq!(h.engine.call_offsets(start), vec![0]);
    assert!(h.engine.calls()[0].request.force);
}

#[tokio::test(start_paused = true)]
async fn test_failed_attempt_requeues_and_retries() {
    let h = harness(ScriptedEngine::with_steps([Step::Error(
        "connection refused".to_string(),
    )]));
    let start = Instant::now();

    h.scheduler.record("modified: a.md");
    sleep_secs(6).await;
    assert_eq!(h.engine.call_offsets(start), vec![5]);
    assert_eq!(h.scheduler.pending(), vec!["modified: a.md".to_string()]);
    assert_eq!(h.registry.consecutive_failures(), 1);
    assert!(h.scheduler.is_armed());

    // Retry after the 60 s floor.
    sleep_secs(100).await;
    assert_eq!(h.engine.call_offsets(start), vec![5, 65]);
    assert!(h.scheduler.pending().is_empty());
    assert_eq!(h.registry.consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_drops_armed_timer() {
    let h = harness(ScriptedEngine::new());

    h.scheduler.record("modified: a.md");
    h.scheduler.cancel();
    assert!(!h.scheduler.is_armed());

    h.scheduler.record("modified: b.md");
    sleep_secs(60).await;

    assert_eq!(h.engine.call_count(), 0);
    assert!(!h.scheduler.is_armed());
    h.scheduler.wait_idle().await;
}

#[tokio::test(start_paused = true)]
async fn test_wait_idle_lets_attempt_finish() {
    let h = harness(ScriptedEngine::new().with_sync_duration(Duration::from_secs(20)));

    h.scheduler.record("modified: a.md");
    sleep_secs(6).await;
    assert!(h.registry.snapshot().syncing);

    h.scheduler.cancel();
    h.scheduler.wait_idle().await;

    let snapshot = h.registry.snapshot();
    assert!(!snapshot.syncing);
    assert_eq!(snapshot.total_syncs, 1);
}

#[tokio::test(start_paused = true)]
async fn test_change_during_backoff_waits_out_remaining_time() {
    let h = harness(ScriptedEngine::with_steps([Step::Error(
        "connection refused".to_string(),
    )]));
    let start = Instant::now();

    h.scheduler.record("modified: a.md");
    sleep_secs(20).await;
    assert_eq!(h.engine.call_offsets(start), vec![5]);

    // The new window closes at 25, inside the 60 s backoff from t = 5.
    h.scheduler.record("modified: b.md");
    sleep_secs(10).await;
    assert_eq!(h.engine.call_offsets(start), vec![5]);
    assert_eq!(
        h.scheduler.pending(),
        vec!["modified: a.md".to_string(), "modified: b.md".to_string()]
    );
    assert!(h.scheduler.is_armed());

    sleep_secs(100).await;
    assert_eq!(h.engine.call_offsets(start), vec![5, 65]);
    assert!(h.scheduler.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_forced_trigger_survives_backoff() {
    let h = harness(ScriptedEngine::with_steps([Step::Error(
        "connection refused".to_string(),
    )]));
    let start = Instant::now();

    h.scheduler.record("modified: a.md");
    sleep_secs(10).await;
    h.scheduler.trigger_now(true);

    sleep_secs(100).await;
    let calls = h.engine.calls();
    assert_eq!(h.engine.call_offsets(start), vec![5, 65]);
    assert!(!calls[0].request.force);
    assert!(calls[1].request.force);
}
