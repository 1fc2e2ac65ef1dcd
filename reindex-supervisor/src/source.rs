//! Change sources feeding the supervisor.

use std::sync::Arc;

use async_trait::async_trait;
use codex_directory_watcher::DirectoryWatcher;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Result;
use crate::health::HealthRegistry;
use crate::poller::PollingMonitor;
use crate::scheduler::DebounceScheduler;

/// Something that produces reindex work until told to stop.
#[async_trait]
pub trait ChangeSource: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Run until `shutdown` is cancelled, or until the source is exhausted.
    async fn run(&mut self, shutdown: CancellationToken) -> Result<()>;
}

/// Filesystem notifications debounced through the scheduler.
#[derive(Debug)]
pub struct EventSource {
    watcher: DirectoryWatcher,
    scheduler: DebounceScheduler,
    registry: Arc<HealthRegistry>,
}

impl EventSource {
    pub fn new(
        watcher: DirectoryWatcher,
        scheduler: DebounceScheduler,
        registry: Arc<HealthRegistry>,
    ) -> Self {
        Self {
            watcher,
            scheduler,
            registry,
        }
    }

    pub fn watcher(&self) -> &DirectoryWatcher {
        &self.watcher
    }
}

#[async_trait]
impl ChangeSource for EventSource {
    fn name(&self) -> &'static str {
        "watch"
    }

    async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let watched = self.watcher.start(Arc::new(self.scheduler.clone()))?;
        self.registry.set_watching(true, watched);

        for (root, files) in self.watcher.inventory() {
            info!("Watching {} ({files} matching files)", root.display());
        }
        info!(
            "Waiting for changes (debounce {:.1}s)",
            self.scheduler.debounce().as_secs_f64()
        );

        shutdown.cancelled().await;

        self.watcher.stop();
        self.scheduler.cancel();
        self.registry.set_watching(false, Vec::new());
        Ok(())
    }
}

/// Periodic change detection through the engine.
#[derive(Debug)]
pub struct PollSource {
    monitor: PollingMonitor,
}

impl PollSource {
    pub fn new(monitor: PollingMonitor) -> Self {
        Self { monitor }
    }

    pub fn monitor(&self) -> &PollingMonitor {
        &self.monitor
    }
}

#[async_trait]
impl ChangeSource for PollSource {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.monitor.run(shutdown).await;
        Ok(())
    }
}
