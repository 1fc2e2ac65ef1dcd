//! # Reindex Supervisor
//!
//! Keeps a derived search index in step with a directory of source files.
//! Changes are debounced into single reindex attempts, failures back off
//! exponentially up to a ceiling, and a small HTTP interface reports health.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Reindex Supervisor                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐        ┌──────────────┐                       │
//! │  │ EventSource  │        │  PollSource  │   (one per run)       │
//! │  └──────────────┘        └──────────────┘                       │
//! │         │                       │                               │
//! │         ▼                       │                               │
//! │  ┌──────────────┐               │                               │
//! │  │   Debounce   │               │                               │
//! │  │  Scheduler   │               │                               │
//! │  └──────────────┘               │                               │
//! │         │                       │                               │
//! │         └───────────┬───────────┘                               │
//! │                     ▼                                           │
//! │             ┌──────────────┐        ┌──────────────┐            │
//! │             │   Backoff    │───────►│ ReindexEngine│            │
//! │             │  Controller  │        └──────────────┘            │
//! │             └──────────────┘                                    │
//! │                     │                                           │
//! │                     ▼                                           │
//! │             ┌──────────────┐        ┌──────────────┐            │
//! │             │    Health    │◄───────│ HTTP /health │            │
//! │             │   Registry   │        │ /metrics ... │            │
//! │             └──────────────┘        └──────────────┘            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use codex_reindex_supervisor::{Supervisor, SupervisorConfig};
//!
//! let config = SupervisorConfig::load("supervisor.toml")?;
//! codex_reindex_supervisor::logging::init_tracing(config.quiet)?;
//!
//! let supervisor = Supervisor::new(config, Arc::new(MyEngine::new()))?;
//! let source = supervisor.event_source()?;
//! supervisor.run_until_signal(Box::new(source)).await?;
//! ```

pub mod backoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod logging;
pub mod poller;
pub mod scheduler;
pub mod server;
pub mod shutdown;
pub mod source;
pub mod supervisor;

pub use backoff::{AttemptOutcome, BackoffController, BackoffPolicy, FailureKind, FailureState};
pub use config::{HealthServerConfig, PollConfig, PollMode, SupervisorConfig};
pub use engine::{ChangeCheck, EngineError, ReindexEngine, SyncReport, SyncRequest, SyncStatus};
pub use error::{ConfigError, Result, SupervisorError};
pub use health::{HealthRegistry, HealthSnapshot};
pub use poller::{PollOutcome, PollingMonitor};
pub use scheduler::DebounceScheduler;
pub use server::{HealthServer, router, spawn_health_server};
pub use source::{ChangeSource, EventSource, PollSource};
pub use supervisor::Supervisor;

// Re-export from dependencies for convenience
pub use codex_directory_watcher::{ChangeDescription, ChangeKind, FilterConfig, PathFilter};
pub use tokio_util::sync::CancellationToken;
