//! Configuration for path filtering.

use std::collections::BTreeSet;
use std::path::PathBuf;

/// Which paths are relevant to the downstream index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    /// Root directories being watched.
    pub roots: Vec<PathBuf>,

    /// Accepted file extensions, lowercase and without the leading dot.
    pub extensions: BTreeSet<String>,

    /// Substrings that exclude any path containing them.
    pub ignore_patterns: Vec<String>,

    /// File names that are excluded wherever they appear.
    pub ignore_files: BTreeSet<String>,
}

impl FilterConfig {
    /// Create an empty filter config. Nothing is accepted until at least one
    /// extension is added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a watched root.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    /// Accept files with the given extension (`"md"` and `".md"` are equivalent).
    pub fn with_extension(mut self, extension: impl AsRef<str>) -> Self {
        let normalized = normalize_extension(extension.as_ref());
        if !normalized.is_empty() {
            self.extensions.insert(normalized);
        }
        self
    }

    /// Exclude any path containing `pattern`.
    pub fn ignore_pattern(mut self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        if !pattern.is_empty() && !self.ignore_patterns.contains(&pattern) {
            self.ignore_patterns.push(pattern);
        }
        self
    }

    /// Exclude files with exactly this name.
    pub fn ignore_file(mut self, name: impl Into<String>) -> Self {
        self.ignore_files.insert(name.into());
        self
    }
}

pub(crate) fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}
