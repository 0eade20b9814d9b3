//! The observer interface a History fans lifecycle events out to.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::action::Action;

/// Unique identifier for a repo observing a History.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(Uuid);

impl RepoId {
    /// Create a new random repo id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for RepoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A read-only observer of a History.
///
/// Callbacks arrive in registration order within one reconciliation pass:
/// `rollback` once, `reconcile` and `cache` while walking the active branch,
/// then `release` for every action that requested the pass. Repos must only
/// change the tree through `append`, `checkout`, `add_repo` or `remove_repo`.
pub trait Repo {
    fn id(&self) -> RepoId;

    /// Discard state computed past the focus.
    fn rollback(&self);

    /// Fold one action on the active branch.
    fn reconcile(&self, action: &Action);

    /// The focus advanced past a disposable action; `archived` is the root
    /// that was torn down in the process, if any.
    fn cache(&self, archived: Option<&Action>);

    /// The pass is over. `action` is the action whose transition triggered it.
    fn release(&self, action: Option<&Action>);
}
