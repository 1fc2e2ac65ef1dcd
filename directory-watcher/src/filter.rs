//! Relevance filtering for changed paths.

use std::path::{Component, Path};

use walkdir::WalkDir;

use crate::config::FilterConfig;
use crate::error::{Result, WatcherError};

/// Decides whether a changed path should trigger a reindex.
///
/// Rules are applied in order:
/// 1. any hidden segment (below the watched root) rejects the path,
/// 2. an exact ignored file name rejects it,
/// 3. any ignored substring rejects it,
/// 4. otherwise the extension must be in the watched set.
#[derive(Debug, Clone)]
pub struct PathFilter {
    config: FilterConfig,
}

impl PathFilter {
    /// Create a filter from its configuration.
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    /// The configuration this filter evaluates against.
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Check whether `path` is relevant to the index.
    pub fn should_process(&self, path: &Path) -> bool {
        if self.has_hidden_segment(path) {
            return false;
        }

        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if self.config.ignore_files.contains(name) {
                return false;
            }
        }

        let path_str = path.to_string_lossy();
        if self
            .config
            .ignore_patterns
            .iter()
            .any(|pattern| path_str.contains(pattern.as_str()))
        {
            return false;
        }

        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.config.extensions.contains(&ext.to_ascii_lowercase()))
    }

    /// Count the files under `root` that pass the filter.
    pub fn scan_relevant(&self, root: &Path) -> Result<usize> {
        if !root.is_dir() {
            return Err(WatcherError::DirectoryNotFound(root.to_path_buf()));
        }

        let count = WalkDir::new(root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| self.should_process(entry.path()))
            .count();

        Ok(count)
    }

    fn has_hidden_segment(&self, path: &Path) -> bool {
        // Segments of the root itself are not inspected, so a root living
        // under e.g. ~/.local still works.
        let relative = self
            .config
            .roots
            .iter()
            .filter_map(|root| path.strip_prefix(root).ok())
            .min_by_key(|rel| rel.components().count())
            .unwrap_or(path);

        relative.components().any(|component| match component {
            Component::Normal(segment) => segment.to_string_lossy().starts_with('.'),
            _ => false,
        })
    }
}
