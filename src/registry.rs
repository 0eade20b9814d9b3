//! Handler registration and lookup.
//!
//! Domains and effects declare, per action type, either one handler, a list
//! of handlers, or a status-keyed map. A bare handler or list is shorthand for
//! the `done` status. Lookup is a pure function over the declared map; the
//! [`Registry`] adds a per-type cache on top.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::action::{Action, Status};
use crate::tag::ActionType;

/// What an owner declared for one action type.
#[derive(Clone)]
pub enum Registration<H> {
    One(H),
    Many(Vec<H>),
    ByStatus(HashMap<Status, Vec<H>>),
}

impl<H> Registration<H> {
    /// Handlers for a single status.
    #[must_use]
    pub fn on(status: Status, handler: H) -> Self {
        Self::ByStatus(HashMap::from([(status, vec![handler])]))
    }

    /// Add a handler for `status`, converting shorthand forms as needed.
    #[must_use]
    pub fn and(self, status: Status, handler: H) -> Self {
        let mut map = match self {
            Self::One(h) => HashMap::from([(Status::Done, vec![h])]),
            Self::Many(hs) => HashMap::from([(Status::Done, hs)]),
            Self::ByStatus(map) => map,
        };
        map.entry(status).or_default().push(handler);
        Self::ByStatus(map)
    }
}

/// Declared registrations keyed by action type.
pub type Registrations<H> = HashMap<ActionType, Registration<H>>;

type StatusMap<H> = HashMap<Status, Vec<H>>;

/// Ordered handlers `registration` declares for `status`.
#[must_use]
pub fn handlers_for<H: Clone>(registration: Option<&Registration<H>>, status: Status) -> Vec<H> {
    match registration {
        None => Vec::new(),
        Some(Registration::One(h)) if status == Status::Done => vec![h.clone()],
        Some(Registration::Many(hs)) if status == Status::Done => hs.clone(),
        Some(Registration::ByStatus(map)) => map.get(&status).cloned().unwrap_or_default(),
        Some(_) => Vec::new(),
    }
}

/// Memoized handler lookup for one registrant.
pub struct Registry<H> {
    declared: Registrations<H>,
    entries: RefCell<HashMap<ActionType, Rc<StatusMap<H>>>>,
}

impl<H: Clone> Registry<H> {
    #[must_use]
    pub fn new(declared: Registrations<H>) -> Self {
        Self {
            declared,
            entries: RefCell::new(HashMap::new()),
        }
    }

    /// Handlers for `action`'s type and current status.
    ///
    /// Disabled actions resolve to nothing.
    #[must_use]
    pub fn resolve(&self, action: &Action) -> Vec<H> {
        match action.ty() {
            Some(ty) => self.resolve_status(&ty, action.status()),
            None => Vec::new(),
        }
    }

    #[must_use]
    pub fn resolve_status(&self, ty: &ActionType, status: Status) -> Vec<H> {
        let entry = self.entry(ty);
        entry.get(&status).cloned().unwrap_or_default()
    }

    /// True once `ty` has been resolved at least once.
    #[must_use]
    pub fn is_cached(&self, ty: &ActionType) -> bool {
        self.entries.borrow().contains_key(ty)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    fn entry(&self, ty: &ActionType) -> Rc<StatusMap<H>> {
        if let Some(entry) = self.entries.borrow().get(ty) {
            return Rc::clone(entry);
        }

        let registration = self.declared.get(ty);
        let entry: StatusMap<H> = Status::ALL
            .into_iter()
            .map(|status| (status, handlers_for(registration, status)))
            .filter(|(_, handlers)| !handlers.is_empty())
            .collect();
        let entry = Rc::new(entry);
        self.entries.borrow_mut().insert(ty.clone(), Rc::clone(&entry));
        entry
    }
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self {
            declared: HashMap::new(),
            entries: RefCell::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shorthand_means_done() {
        let one = Registration::One(1);
        assert_eq!(handlers_for(Some(&one), Status::Done), vec![1]);
        assert!(handlers_for(Some(&one), Status::Open).is_empty());

        let many = Registration::Many(vec![1, 2]);
        assert_eq!(handlers_for(Some(&many), Status::Done), vec![1, 2]);
        assert!(handlers_for::<i32>(None, Status::Done).is_empty());
    }

    #[test]
    fn test_status_map() {
        let reg = Registration::on(Status::Open, 'o').and(Status::Error, 'e').and(Status::Error, 'f');
        assert_eq!(handlers_for(Some(&reg), Status::Open), vec!['o']);
        assert_eq!(handlers_for(Some(&reg), Status::Error), vec!['e', 'f']);
        assert!(handlers_for(Some(&reg), Status::Done).is_empty());
    }

    #[test]
    fn test_registry_caches_by_type() {
        let ty = ActionType::new("save");
        let registry = Registry::new(HashMap::from([(ty.clone(), Registration::Many(vec![1, 2]))]));

        assert!(!registry.is_cached(&ty));
        assert_eq!(registry.resolve_status(&ty, Status::Done), vec![1, 2]);
        assert!(registry.is_cached(&ty));
        assert_eq!(registry.resolve_status(&ActionType::new("save"), Status::Done), vec![1, 2]);
        assert!(registry.resolve_status(&ActionType::new("other"), Status::Done).is_empty());
    }
}
