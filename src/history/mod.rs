//! The action tree and its reconciliation walk.
//!
//! A History owns every action appended to it. `head` is the tip of the
//! active branch, `root` the oldest retained action, and `focus` the
//! watermark up to which observing repos have already folded state.
//!
//! Reconciliation broadcasts to repos in registration order:
//! `rollback`, then `reconcile`/`cache` per action after the focus, then
//! `release`. The focus only moves across a contiguous run of disposable
//! actions, and each move may archive the root to keep the branch bounded.

mod repo;
mod tree;

pub use repo::{Repo, RepoId};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::action::{Action, ActionId};
use crate::config::HistoryConfig;
use crate::error::HistoryError;
use crate::tag::ActionType;

use tree::Tree;

/// Shared handle to an action tree. Clones refer to the same tree.
#[derive(Clone)]
pub struct History {
    shared: Rc<HistoryShared>,
}

pub(crate) struct HistoryShared {
    tree: RefCell<Tree>,
    repos: RefCell<Vec<(RepoId, Weak<dyn Repo>)>>,
    reconciling: Cell<bool>,
    queue: RefCell<Vec<Option<Action>>>,
    /// Set by a direct `archive` call; served at the start of the next pass.
    archive_requested: Cell<bool>,
}

/// Clears the in-progress flag even if a repo panics mid-pass.
struct PassGuard<'a>(&'a Cell<bool>);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl History {
    #[must_use]
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            shared: Rc::new(HistoryShared {
                tree: RefCell::new(Tree::new(config.limit)),
                repos: RefCell::new(Vec::new()),
                reconciling: Cell::new(false),
                queue: RefCell::new(Vec::new()),
                archive_requested: Cell::new(false),
            }),
        }
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self::new(HistoryConfig { limit })
    }

    pub(crate) fn from_shared(shared: Rc<HistoryShared>) -> Self {
        Self { shared }
    }

    // ---- tree state ----

    #[must_use]
    pub fn root(&self) -> Option<Action> {
        let tree = self.shared.tree.borrow();
        tree.action(tree.root)
    }

    #[must_use]
    pub fn head(&self) -> Option<Action> {
        let tree = self.shared.tree.borrow();
        tree.action(tree.head)
    }

    #[must_use]
    pub fn focus(&self) -> Option<Action> {
        let tree = self.shared.tree.borrow();
        tree.action(tree.focus)
    }

    /// Length of the active branch, root through head.
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.tree.borrow().size
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.shared.tree.borrow().limit
    }

    pub fn set_limit(&self, limit: usize) {
        self.shared.tree.borrow_mut().limit = limit;
    }

    /// Number of actions held, abandoned branches included.
    #[must_use]
    pub fn retained(&self) -> usize {
        self.shared.tree.borrow().len()
    }

    /// True when the tree is empty or nobody is listening.
    #[must_use]
    pub fn is_dormant(&self) -> bool {
        self.size() == 0 || self.repo_count() == 0
    }

    #[must_use]
    pub fn contains(&self, action: &Action) -> bool {
        self.validate(action).is_ok()
    }

    pub(crate) fn contains_id(&self, id: ActionId) -> bool {
        self.shared.tree.borrow().contains(id)
    }

    // ---- navigation ----

    pub fn parent(&self, action: &Action) -> Result<Option<Action>, HistoryError> {
        self.link(action, |node| node.parent)
    }

    pub fn next(&self, action: &Action) -> Result<Option<Action>, HistoryError> {
        self.link(action, |node| node.next)
    }

    pub fn sibling(&self, action: &Action) -> Result<Option<Action>, HistoryError> {
        self.link(action, |node| node.sibling)
    }

    /// Every child of `action`, newest first.
    pub fn children(&self, action: &Action) -> Result<Vec<Action>, HistoryError> {
        self.validate(action)?;
        let tree = self.shared.tree.borrow();
        let mut children = Vec::new();
        let mut cursor = tree.get(action.id()).and_then(|node| node.next);
        while let Some(id) = cursor {
            let Some(node) = tree.get(id) else {
                break;
            };
            children.push(node.action.clone());
            cursor = node.sibling;
        }
        Ok(children)
    }

    /// Actions strictly after `base` through head, oldest first.
    #[must_use]
    pub fn to_array(&self, base: Option<&Action>) -> Vec<Action> {
        self.shared.tree.borrow().to_array(base.map(Action::id))
    }

    // ---- mutation ----

    /// Create an action as the head's newest child and make it the head.
    pub fn append(&self, ty: impl Into<ActionType>, origin: Option<RepoId>) -> Action {
        let mut tree = self.shared.tree.borrow_mut();
        let id = tree.issue_id();
        let action = Action::new(id, ty.into(), origin, Rc::downgrade(&self.shared));
        tree.attach(action.clone());
        debug!(action = %id, ty = %action.command(), size = tree.size, "append");
        action
    }

    /// Point head at any retained action, or empty the tree with `None`.
    ///
    /// Clears the focus, so the next pass replays the whole branch.
    pub fn checkout(&self, action: Option<&Action>) -> Result<(), HistoryError> {
        let dropped = {
            let mut tree = self.shared.tree.borrow_mut();
            let dropped = match action {
                Some(action) => {
                    self.validate_in(&tree, action)?;
                    tree.head = Some(action.id());
                    Vec::new()
                }
                None => tree.clear(),
            };
            tree.focus = None;
            tree.set_size();
            debug!(head = ?tree.head, size = tree.size, "checkout");
            dropped
        };

        for action in &dropped {
            action.teardown();
        }

        self.reconcile(None);
        Ok(())
    }

    /// Forget the focus and replay the active branch.
    pub fn invalidate(&self) {
        self.shared.tree.borrow_mut().focus = None;
        self.reconcile(None);
    }

    /// Archive the root if the branch is over its limit.
    ///
    /// Repos are told through `cache` within a pass, after `rollback` has
    /// restored their focus state.
    pub fn archive(&self) -> bool {
        if !self.shared.tree.borrow().is_archivable() {
            return false;
        }
        if self.is_dormant() {
            return self.archive_root().is_some();
        }
        self.shared.archive_requested.set(true);
        self.reconcile(None);
        true
    }

    /// Run a reconciliation pass.
    ///
    /// A request made while a pass is running is queued and served by a
    /// follow-up pass, so no pass folds against a stale walk.
    pub fn reconcile(&self, action: Option<&Action>) {
        self.shared.queue.borrow_mut().push(action.cloned());
        if self.shared.reconciling.replace(true) {
            return;
        }
        let _guard = PassGuard(&self.shared.reconciling);

        loop {
            let batch: Vec<Option<Action>> = self.shared.queue.borrow_mut().drain(..).collect();
            if batch.is_empty() {
                break;
            }
            if self.is_dormant() {
                trace!("reconcile skipped: dormant");
                continue;
            }

            self.invoke(|repo| repo.rollback());
            if self.shared.archive_requested.replace(false) {
                let archived = self.archive_root();
                self.invoke(|repo| repo.cache(archived.as_ref()));
            }
            self.rollforward();
            for action in &batch {
                self.invoke(|repo| repo.release(action.as_ref()));
            }
        }
    }

    // ---- repos ----

    pub fn add_repo<R: Repo + 'static>(&self, repo: &Rc<R>) {
        let id = repo.id();
        let weak: Weak<dyn Repo> = Rc::downgrade(repo) as Weak<dyn Repo>;
        let mut repos = self.shared.repos.borrow_mut();
        repos.retain(|(_, repo)| repo.strong_count() > 0);
        if repos.iter().all(|(existing, _)| *existing != id) {
            repos.push((id, weak));
            debug!(repo = %id, "repo added");
        }
    }

    pub fn remove_repo(&self, id: RepoId) {
        self.shared.repos.borrow_mut().retain(|(existing, _)| *existing != id);
        debug!(repo = %id, "repo removed");
    }

    /// Registered repos that are still alive.
    #[must_use]
    pub fn repo_count(&self) -> usize {
        self.shared
            .repos
            .borrow()
            .iter()
            .filter(|(_, repo)| repo.strong_count() > 0)
            .count()
    }

    // ---- internals ----

    fn rollforward(&self) {
        let actions = {
            let tree = self.shared.tree.borrow();
            tree.to_array(tree.focus)
        };
        let mut cacheable = true;

        for action in &actions {
            if action.ty().is_some() {
                self.invoke(|repo| repo.reconcile(action));
            }

            if cacheable && action.is_disposable() && self.contains_id(action.id()) {
                self.shared.tree.borrow_mut().focus = Some(action.id());
                let archived = self.archive_root();
                self.invoke(|repo| repo.cache(archived.as_ref()));
            } else {
                cacheable = false;
            }
        }
    }

    fn archive_root(&self) -> Option<Action> {
        let archived = self.shared.tree.borrow_mut().archive();
        for action in &archived.pruned {
            action.teardown();
        }
        let root = archived.root?;
        root.teardown();
        debug!(action = %root.id(), pruned = archived.pruned.len(), size = self.size(), "archived root");
        Some(root)
    }

    fn invoke(&self, f: impl Fn(&dyn Repo)) {
        let repos: Vec<Weak<dyn Repo>> = self
            .shared
            .repos
            .borrow()
            .iter()
            .map(|(_, repo)| Weak::clone(repo))
            .collect();

        let mut dead = false;
        for repo in repos {
            match repo.upgrade() {
                Some(repo) => f(repo.as_ref()),
                None => {
                    trace!("skipping dropped repo");
                    dead = true;
                }
            }
        }

        if dead {
            self.shared.repos.borrow_mut().retain(|(_, repo)| repo.strong_count() > 0);
        }
    }

    fn link(
        &self,
        action: &Action,
        pick: impl Fn(&tree::Node) -> Option<ActionId>,
    ) -> Result<Option<Action>, HistoryError> {
        let tree = self.shared.tree.borrow();
        self.validate_in(&tree, action)?;
        Ok(tree.action(tree.get(action.id()).and_then(pick)))
    }

    fn validate(&self, action: &Action) -> Result<(), HistoryError> {
        let tree = self.shared.tree.borrow();
        self.validate_in(&tree, action)
    }

    fn validate_in(&self, tree: &Tree, action: &Action) -> Result<(), HistoryError> {
        let id = action.id();
        if !action.belongs_to(&self.shared) {
            return Err(HistoryError::NotInHistory { id });
        }
        if action.is_archived() || !tree.contains(id) {
            return Err(HistoryError::Archived { id });
        }
        Ok(())
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(HistoryConfig::default())
    }
}

impl fmt::Debug for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tree = self.shared.tree.borrow();
        f.debug_struct("History")
            .field("root", &tree.root)
            .field("head", &tree.head)
            .field("focus", &tree.focus)
            .field("size", &tree.size)
            .field("limit", &tree.limit)
            .field("repos", &self.shared.repos.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::action::Status;

    #[derive(Default)]
    struct Recorder {
        id: RepoId,
        log: RefCell<Vec<String>>,
    }

    impl Repo for Recorder {
        fn id(&self) -> RepoId {
            self.id
        }

        fn rollback(&self) {
            self.log.borrow_mut().push("rollback".into());
        }

        fn reconcile(&self, action: &Action) {
            self.log.borrow_mut().push(format!("reconcile {}", action.id()));
        }

        fn cache(&self, archived: Option<&Action>) {
            self.log.borrow_mut().push(format!("cache {}", archived.is_some()));
        }

        fn release(&self, _action: Option<&Action>) {
            self.log.borrow_mut().push("release".into());
        }
    }

    #[test]
    fn test_append_sets_root_head_and_size() {
        let history = History::with_limit(10);
        let a = history.append("a", None);
        let b = history.append("b", None);

        assert_eq!(history.root(), Some(a.clone()));
        assert_eq!(history.head(), Some(b.clone()));
        assert_eq!(history.size(), 2);
        assert_eq!(history.next(&a).unwrap(), Some(b.clone()));
        assert_eq!(history.parent(&b).unwrap(), Some(a));
        assert_eq!(history.sibling(&b).unwrap(), None);
    }

    #[test]
    fn test_dormant_without_repos() {
        let history = History::default();
        let action = history.append("a", None);
        action.resolve(true);
        assert!(history.is_dormant());
        assert!(history.focus().is_none());
    }

    #[test]
    fn test_focus_stops_at_first_pending_action() {
        let history = History::with_limit(10);
        let repo = Rc::new(Recorder::default());
        history.add_repo(&repo);

        let a = history.append("a", None);
        let b = history.append("b", None);
        let c = history.append("c", None);

        c.resolve(1);
        assert!(history.focus().is_none());

        a.resolve(1);
        assert_eq!(history.focus(), Some(a.clone()));

        b.resolve(1);
        assert_eq!(history.focus(), Some(c));
        assert_eq!(b.status(), Status::Done);
    }

    #[test]
    fn test_broadcast_order() {
        let history = History::with_limit(10);
        let repo = Rc::new(Recorder::default());
        history.add_repo(&repo);

        let a = history.append("a", None);
        a.resolve(1);

        assert_eq!(
            *repo.log.borrow(),
            vec!["rollback", "reconcile #0", "cache false", "release"]
        );
    }

    #[test]
    fn test_dropped_repo_is_skipped() {
        let history = History::default();
        let kept = Rc::new(Recorder::default());
        {
            let gone = Rc::new(Recorder::default());
            history.add_repo(&gone);
        }
        history.add_repo(&kept);

        assert_eq!(history.repo_count(), 1);
        assert_eq!(history.shared.repos.borrow().len(), 1);

        history.append("a", None).resolve(1);
        assert!(kept.log.borrow().contains(&"release".to_string()));
    }

    #[test]
    fn test_archived_handles_are_invalid() {
        let history = History::with_limit(0);
        let repo = Rc::new(Recorder::default());
        history.add_repo(&repo);

        let a = history.append("a", None);
        a.resolve(1);
        let b = history.append("b", None);
        b.resolve(1);

        assert!(a.is_archived());
        assert_eq!(history.parent(&a), Err(HistoryError::Archived { id: a.id() }));
        assert!(history.contains(&b));
    }

    #[test]
    fn test_foreign_action_rejected() {
        let one = History::default();
        let two = History::default();
        let action = one.append("a", None);
        assert_eq!(
            two.checkout(Some(&action)),
            Err(HistoryError::NotInHistory { id: action.id() })
        );
    }

    #[test]
    fn test_checkout_none_empties_tree() {
        let history = History::default();
        let a = history.append("a", None);
        history.checkout(None).unwrap();
        assert_eq!(history.size(), 0);
        assert!(history.root().is_none());
        assert!(history.head().is_none());
        assert!(a.is_archived());
        assert_eq!(history.retained(), 0);
    }
}
