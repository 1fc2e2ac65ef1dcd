//! Change descriptions derived from file system events.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use notify::event::{EventKind, ModifyKind, RenameMode};

use crate::filter::PathFilter;

/// Kind of change observed on a relevant file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    /// File was created.
    Created,

    /// File content was modified.
    Modified,

    /// File was deleted.
    Deleted,

    /// File was renamed or moved away.
    Moved,
}

impl ChangeKind {
    /// Label used in change descriptions.
    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Moved => "moved",
        }
    }
}

/// A short, human-readable record of one change, e.g. `modified: a.md`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeDescription {
    /// The kind of change.
    pub kind: ChangeKind,

    /// File name of the affected path.
    pub name: String,
}

impl ChangeDescription {
    /// Describe a change to `path`.
    pub fn new(kind: ChangeKind, path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { kind, name }
    }
}

impl fmt::Display for ChangeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.name)
    }
}

/// Translate a raw notify event into descriptions of relevant changes.
///
/// A rename carrying both paths yields a single `moved` entry naming the
/// original file. When only the destination is relevant (atomic save through
/// a temp file) it is reported as `modified`. A lone rename target means the
/// content arrived from outside the tree and is reported as `created`.
pub fn describe_event(event: &notify::Event, filter: &PathFilter) -> Vec<ChangeDescription> {
    let each = |kind: ChangeKind| -> Vec<ChangeDescription> {
        event
            .paths
            .iter()
            .filter(|path| filter.should_process(path))
            .map(|path| ChangeDescription::new(kind, path))
            .collect()
    };

    match event.kind {
        EventKind::Create(_) => each(ChangeKind::Created),
        EventKind::Remove(_) => each(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            match (event.paths.first(), event.paths.get(1)) {
                (Some(from), _) if filter.should_process(from) => {
                    vec![ChangeDescription::new(ChangeKind::Moved, from)]
                }
                (_, Some(to)) if filter.should_process(to) => {
                    vec![ChangeDescription::new(ChangeKind::Modified, to)]
                }
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(_)) => each(ChangeKind::Moved),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => each(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Rename halves remembered while waiting for their pair.
const PENDING_RENAMES: usize = 64;

/// Stateful wrapper over [`describe_event`] that folds the halves of one
/// rename into a single description.
///
/// inotify reports a rename inside the tree as `From`, `To` and then `Both`,
/// all sharing one tracker id. A move out of the tree only sends `From`, a
/// move in only sends `To`. The `From` half is described as soon as it
/// arrives; a `To` with a known tracker is dropped, and the closing `Both`
/// only adds a `modified` entry when the source was irrelevant (atomic save).
#[derive(Debug)]
pub struct ChangeTranslator {
    filter: Arc<PathFilter>,
    /// Tracker id and whether its `From` half produced a description.
    renames: VecDeque<(usize, bool)>,
}

impl ChangeTranslator {
    pub fn new(filter: Arc<PathFilter>) -> Self {
        Self {
            filter,
            renames: VecDeque::new(),
        }
    }

    /// Describe `event`, taking earlier rename halves into account.
    pub fn translate(&mut self, event: &notify::Event) -> Vec<ChangeDescription> {
        let EventKind::Modify(ModifyKind::Name(mode)) = event.kind else {
            return describe_event(event, &self.filter);
        };
        let Some(id) = event.tracker() else {
            return describe_event(event, &self.filter);
        };

        match mode {
            RenameMode::From => {
                let changes = describe_event(event, &self.filter);
                if self.renames.len() == PENDING_RENAMES {
                    self.renames.pop_front();
                }
                self.renames.push_back((id, !changes.is_empty()));
                changes
            }
            RenameMode::To if self.renames.iter().any(|(known, _)| *known == id) => Vec::new(),
            RenameMode::Both => match self.take(id) {
                Some(true) => Vec::new(),
                Some(false) => event
                    .paths
                    .get(1)
                    .filter(|to| self.filter.should_process(to))
                    .map(|to| vec![ChangeDescription::new(ChangeKind::Modified, to)])
                    .unwrap_or_default(),
                None => describe_event(event, &self.filter),
            },
            _ => describe_event(event, &self.filter),
        }
    }

    fn take(&mut self, id: usize) -> Option<bool> {
        let index = self.renames.iter().position(|(known, _)| *known == id)?;
        self.renames.remove(index).map(|(_, described)| described)
    }
}
