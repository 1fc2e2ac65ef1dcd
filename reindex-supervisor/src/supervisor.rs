//! Wiring of sources, scheduler, controller, registry and health server.

use std::sync::Arc;

use codex_directory_watcher::{DirectoryWatcher, PathFilter};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backoff::{BackoffController, BackoffPolicy};
use crate::config::SupervisorConfig;
use crate::engine::ReindexEngine;
use crate::error::{ConfigError, Result};
use crate::health::HealthRegistry;
use crate::poller::PollingMonitor;
use crate::scheduler::DebounceScheduler;
use crate::server::spawn_health_server;
use crate::shutdown::wait_for_signal;
use crate::source::{ChangeSource, EventSource, PollSource};

/// Owns the shared supervisor state for one run.
pub struct Supervisor {
    config: SupervisorConfig,
    engine: Arc<dyn ReindexEngine>,
    registry: Arc<HealthRegistry>,
    controller: Arc<BackoffController>,
    scheduler: DebounceScheduler,
}

impl Supervisor {
    /// Validate `config` and build the shared components. Must be called
    /// inside a tokio runtime.
    pub fn new(config: SupervisorConfig, engine: Arc<dyn ReindexEngine>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(HealthRegistry::new(config.max_consecutive_failures));
        let policy = BackoffPolicy::new(
            config.min_retry_delay(),
            config.max_retry_delay(),
            config.max_consecutive_failures,
        );
        let controller = Arc::new(
            BackoffController::new(Arc::clone(&engine), Arc::clone(&registry), policy)
                .with_full_reindex(config.poll.full_reindex),
        );
        let scheduler = DebounceScheduler::new(
            config.debounce()?,
            config.quiet,
            Arc::clone(&controller),
            Arc::clone(&registry),
        )?;

        Ok(Self {
            config,
            engine,
            registry,
            controller,
            scheduler,
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HealthRegistry> {
        &self.registry
    }

    pub fn controller(&self) -> &Arc<BackoffController> {
        &self.controller
    }

    pub fn scheduler(&self) -> &DebounceScheduler {
        &self.scheduler
    }

    /// Filesystem-notification source over the configured directories.
    pub fn event_source(&self) -> Result<EventSource> {
        if self.config.watch_dirs.is_empty() {
            return Err(ConfigError::Invalid(
                "watch_dirs must name at least one directory".to_string(),
            )
            .into());
        }
        let watcher = DirectoryWatcher::new(PathFilter::new(self.config.filter_config()));
        Ok(EventSource::new(
            watcher,
            self.scheduler.clone(),
            Arc::clone(&self.registry),
        ))
    }

    /// Polling source asking the engine for changes.
    pub fn polling_source(&self) -> PollSource {
        PollSource::new(PollingMonitor::new(
            &self.config.poll,
            Arc::clone(&self.engine),
            Arc::clone(&self.controller),
            Arc::clone(&self.registry),
        ))
    }

    /// Run `source` until `shutdown` fires or the source finishes on its own.
    ///
    /// On the way out the armed timer is cancelled, an in-flight attempt is
    /// allowed to finish and the health server is stopped. A supervisor runs
    /// once.
    pub async fn run(
        &self,
        mut source: Box<dyn ChangeSource>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!("Starting reindex supervisor ({} source)", source.name());
        let stop = shutdown.child_token();

        let server =
            spawn_health_server(&self.config.health, Arc::clone(&self.registry), stop.clone())
                .await;
        let resets = self.spawn_reset_listener(stop.clone());

        if self.config.sync_on_start {
            info!("Running initial sync");
            self.scheduler.trigger_now(false);
        }

        let result = source.run(stop.clone()).await;
        if let Err(e) = &result {
            warn!("{} source stopped with error: {e}", source.name());
        }

        stop.cancel();
        self.scheduler.cancel();
        self.scheduler.wait_idle().await;
        self.controller.wait_idle().await;

        if let Err(e) = resets.await {
            warn!("Reset listener ended abnormally: {e}");
        }
        if let Some(server) = server {
            server.join().await;
        }

        info!("Reindex supervisor stopped");
        result
    }

    /// [`Self::run`] with shutdown driven by Ctrl-C or SIGTERM.
    pub async fn run_until_signal(&self, source: Box<dyn ChangeSource>) -> Result<()> {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        let signals = tokio::spawn(async move {
            wait_for_signal().await;
            trigger.cancel();
        });

        let result = self.run(source, shutdown).await;
        signals.abort();
        result
    }

    /// Re-arm queued work whenever the failure counter is reset.
    fn spawn_reset_listener(&self, stop: CancellationToken) -> tokio::task::JoinHandle<()> {
        let mut resets = self.registry.subscribe_resets();
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    changed = resets.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if scheduler.rearm_if_pending() {
                            info!(
                                "Resuming {} queued change(s) after reset",
                                scheduler.pending().len()
                            );
                        }
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("controller", &self.controller)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
