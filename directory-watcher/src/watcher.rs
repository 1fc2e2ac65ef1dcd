//! Directory watcher implementation.

use std::path::PathBuf;
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::{Result, WatcherError};
use crate::event::{ChangeDescription, ChangeTranslator};
use crate::filter::PathFilter;

/// Receives relevant changes as they are observed.
///
/// Called from notify's event thread, so implementations must not block.
pub trait ChangeSink: Send + Sync + 'static {
    /// Record one relevant change.
    fn record(&self, change: ChangeDescription);
}

/// Watches a set of roots recursively and forwards relevant changes to a sink.
pub struct DirectoryWatcher {
    /// Shared relevance filter.
    filter: Arc<PathFilter>,

    /// Internal notify watcher, present while running.
    watcher: Option<RecommendedWatcher>,

    /// Roots that were successfully registered.
    watched: Vec<PathBuf>,
}

impl DirectoryWatcher {
    /// Create a watcher for the roots named in the filter configuration.
    pub fn new(filter: PathFilter) -> Self {
        Self {
            filter: Arc::new(filter),
            watcher: None,
            watched: Vec::new(),
        }
    }

    /// The relevance filter applied to every event.
    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    /// Configured roots, whether or not they are currently watched.
    pub fn roots(&self) -> &[PathBuf] {
        &self.filter.config().roots
    }

    /// Start watching every configured root.
    ///
    /// Roots that are missing or cannot be registered are logged and
    /// skipped. Fails only when no root could be watched at all. Returns the
    /// roots that are being watched.
    pub fn start(&mut self, sink: Arc<dyn ChangeSink>) -> Result<Vec<PathBuf>> {
        if self.watcher.is_some() {
            return Ok(self.watched.clone());
        }

        let mut translator = ChangeTranslator::new(Arc::clone(&self.filter));
        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for change in translator.translate(&event) {
                        sink.record(change);
                    }
                }
                Err(e) => {
                    warn!("Watch error: {e}");
                }
            },
        )?;

        let mut watched = Vec::new();
        for root in self.roots() {
            if !root.is_dir() {
                warn!("Skipping missing watch directory: {}", root.display());
                continue;
            }

            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => {
                    debug!("Started watching: {}", root.display());
                    watched.push(root.clone());
                }
                Err(e) => warn!("Failed to watch {}: {e}", root.display()),
            }
        }

        if watched.is_empty() {
            return Err(WatcherError::NothingWatched);
        }

        info!("Directory watcher started on {} root(s)", watched.len());
        self.watcher = Some(watcher);
        self.watched = watched.clone();
        Ok(watched)
    }

    /// Stop watching. Dropping the notify watcher stops event delivery.
    pub fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            for path in &self.watched {
                let _ = watcher.unwatch(path);
            }
            info!("Directory watcher stopped");
        }
        self.watched.clear();
    }

    /// Check if the watcher is running.
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Roots currently being watched.
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Count relevant files under each watched root.
    pub fn inventory(&self) -> Vec<(PathBuf, usize)> {
        self.watched
            .iter()
            .filter_map(|root| match self.filter.scan_relevant(root) {
                Ok(count) => Some((root.clone(), count)),
                Err(e) => {
                    warn!("Failed to scan {}: {e}", root.display());
                    None
                }
            })
            .collect()
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DirectoryWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryWatcher")
            .field("roots", &self.roots())
            .field("watched", &self.watched)
            .finish()
    }
}
