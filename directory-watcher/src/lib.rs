//! # Directory Watcher
//!
//! File system monitoring for the Codex reindex supervisor. It watches
//! content roots, drops paths the downstream index does not care about, and
//! hands short change descriptions to a [`ChangeSink`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Directory Watcher                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  notify::Event ──► PathFilter ──► ChangeDescription            │
//! │                        │                  │                     │
//! │                        ▼                  ▼                     │
//! │                  FilterConfig         ChangeSink                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod watcher;

pub use config::FilterConfig;
pub use error::{Result, WatcherError};
pub use event::{ChangeDescription, ChangeKind, ChangeTranslator, describe_event};
pub use filter::PathFilter;
pub use watcher::{ChangeSink, DirectoryWatcher};
