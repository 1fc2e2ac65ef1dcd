//! Contract with the external reindex engine.
//!
//! The supervisor never looks inside the engine; it only calls these two
//! methods and reads the report shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by a reindex engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine ran and failed.
    #[error("{0}")]
    Failed(String),

    /// The engine could not be reached.
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters of one sync call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Sync even if the engine believes nothing changed.
    pub force: bool,

    /// Rebuild the whole index instead of syncing incrementally.
    pub full_reindex: bool,
}

/// Outcome reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Work was done.
    Completed,

    /// Nothing needed doing.
    Skipped,

    /// The sync failed.
    Failed,
}

/// Result of a sync call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Overall status.
    pub status: SyncStatus,

    /// Number of vectors written.
    #[serde(default)]
    pub vectors_indexed: u64,

    /// Wall time spent by the engine.
    #[serde(default)]
    pub duration_seconds: f64,

    /// Why the sync was skipped.
    #[serde(default)]
    pub reason: Option<String>,

    /// Why the sync failed.
    #[serde(default)]
    pub error: Option<String>,
}

impl SyncReport {
    /// A completed sync.
    pub fn completed(vectors_indexed: u64, duration_seconds: f64) -> Self {
        Self {
            status: SyncStatus::Completed,
            vectors_indexed,
            duration_seconds,
            reason: None,
            error: None,
        }
    }

    /// A sync that had nothing to do.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Skipped,
            vectors_indexed: 0,
            duration_seconds: 0.0,
            reason: Some(reason.into()),
            error: None,
        }
    }

    /// A sync that failed without raising an error.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Failed,
            vectors_indexed: 0,
            duration_seconds: 0.0,
            reason: None,
            error: Some(error.into()),
        }
    }
}

/// Answer to "did anything change since the last check?".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCheck {
    /// Whether the indexed content differs from the source.
    pub changed: bool,

    /// Human-readable summary of what changed.
    pub summary: Option<String>,
}

impl ChangeCheck {
    /// Content changed.
    pub fn changed(summary: impl Into<String>) -> Self {
        Self {
            changed: true,
            summary: Some(summary.into()),
        }
    }

    /// Nothing changed.
    pub fn unchanged() -> Self {
        Self::default()
    }
}

/// The external engine that reads content and updates the index.
#[async_trait]
pub trait ReindexEngine: Send + Sync {
    /// Sync the index with its source files.
    async fn sync(&self, request: SyncRequest) -> Result<SyncReport, EngineError>;

    /// Cheap change detection, e.g. a manifest or content-hash comparison.
    ///
    /// Engines without a cheap check report a change every time, so the
    /// polling monitor always asks them to sync.
    async fn detect_changes(&self) -> Result<ChangeCheck, EngineError> {
        Ok(ChangeCheck::changed("change detection not supported"))
    }
}
