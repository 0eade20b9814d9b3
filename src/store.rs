//! The store: a repo that folds a History into state.
//!
//! A store keeps one state snapshot per cached focus plus an archived base,
//! the state as of the most recently archived action. Rolling back restores
//! the snapshot at the focus, so a pass only ever refolds the actions the
//! focus has not passed yet.
//!
//! Forks share their parent's History. A fork owns its own domains; its
//! [`Store::state`] overlays its slices on the parent's.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::action::{Action, ActionId, Status};
use crate::command::{Behavior, Outcome};
use crate::config::{merge_options, StoreConfig};
use crate::domain::{Domain, DomainEngine, Effect, EffectHandler, Lifecycle};
use crate::error::{HistoryError, StoreError, StreamError};
use crate::history::{History, Repo, RepoId};
use crate::observable::Observable;
use crate::registry::Registry;
use crate::tag::{ActionType, Tagger};

const ADD_DOMAIN: &str = "$addDomain";
const RESET: &str = "$reset";
const PATCH: &str = "$patch";

type ChangeFn = Rc<dyn Fn(&Value)>;

/// Handle to a store. Clones share state.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

struct EffectEntry {
    effect: Rc<dyn Effect>,
    registry: Registry<EffectHandler>,
    options: Value,
}

struct StoreInner {
    id: RepoId,
    me: Weak<StoreInner>,
    history: History,
    tagger: Tagger,
    options: Value,
    parent: Option<Store>,
    domains: RefCell<DomainEngine>,
    effects: RefCell<Vec<EffectEntry>>,
    /// State as of the last archived action.
    archived: RefCell<Map<String, Value>>,
    /// State as of each cached focus.
    snapshots: RefCell<HashMap<ActionId, Map<String, Value>>>,
    /// Working state of the current pass.
    staged: RefCell<Map<String, Value>>,
    /// Published state.
    state: RefCell<Map<String, Value>>,
    listeners: RefCell<Vec<ChangeFn>>,
}

impl Store {
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self::with_tagger(config, Tagger::new())
    }

    /// Create a store whose commands are tagged by `tagger`.
    #[must_use]
    pub fn with_tagger(config: StoreConfig, tagger: Tagger) -> Self {
        let history = History::new(config.history());
        Self::attach(history, tagger, config.options, None)
    }

    fn attach(history: History, tagger: Tagger, options: Value, parent: Option<Store>) -> Self {
        let id = RepoId::new();
        let inner = Rc::new_cyclic(|me| StoreInner {
            id,
            me: Weak::clone(me),
            history,
            tagger,
            options,
            parent,
            domains: RefCell::new(DomainEngine::new(id)),
            effects: RefCell::new(Vec::new()),
            archived: RefCell::new(Map::new()),
            snapshots: RefCell::new(HashMap::new()),
            staged: RefCell::new(Map::new()),
            state: RefCell::new(Map::new()),
            listeners: RefCell::new(Vec::new()),
        });
        inner.history.add_repo(&inner);
        debug!(store = %inner.id, forked = inner.parent.is_some(), "store attached");
        Self { inner }
    }

    #[must_use]
    pub fn id(&self) -> RepoId {
        self.inner.id
    }

    #[must_use]
    pub fn history(&self) -> &History {
        &self.inner.history
    }

    #[must_use]
    pub fn tagger(&self) -> &Tagger {
        &self.inner.tagger
    }

    #[must_use]
    pub fn options(&self) -> &Value {
        &self.inner.options
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Store> {
        self.inner.parent.as_ref()
    }

    /// Published state, overlaid on the parent's for forks.
    #[must_use]
    pub fn state(&self) -> Value {
        let mut merged = match &self.inner.parent {
            Some(parent) => match parent.state() {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            None => Map::new(),
        };
        for (key, value) in self.inner.state.borrow().iter() {
            merged.insert(key.clone(), value.clone());
        }
        Value::Object(merged)
    }

    /// One slice of [`Store::state`], or `Null`.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        self.state().get(key).cloned().unwrap_or(Value::Null)
    }

    /// Register a domain under `key` and fold its initial state in.
    pub fn add_domain(
        &self,
        key: &str,
        domain: impl Domain + 'static,
        options: Value,
    ) -> Result<Action, StoreError> {
        self.inner
            .domains
            .borrow_mut()
            .add(key, Rc::new(domain), &self.inner.options, &options)?;
        debug!(store = %self.id(), domain = key, "domain added");

        let action = self.append(ActionType::new(ADD_DOMAIN));
        action.resolve(serde_json::json!({ "key": key }));
        Ok(action)
    }

    /// Register an effect. It runs after state is released for every action.
    pub fn add_effect(&self, effect: impl Effect + 'static, options: Value) -> Result<(), StoreError> {
        let effect: Rc<dyn Effect> = Rc::new(effect);
        let options = merge_options([&self.inner.options, &effect.defaults(), &options])?;
        effect.setup(self, &options);
        self.inner.effects.borrow_mut().push(EffectEntry {
            registry: Registry::new(effect.register()),
            effect,
            options,
        });
        Ok(())
    }

    /// Listen for published state. Called after every pass.
    pub fn on_change(&self, f: impl Fn(&Value) + 'static) {
        self.inner.listeners.borrow_mut().push(Rc::new(f));
    }

    /// Append an action for `behavior` and run it with `args`.
    pub fn push(&self, behavior: impl Into<Behavior>, args: Vec<Value>) -> Action {
        match behavior.into() {
            Behavior::Type(ty) => {
                let action = self.append(ty);
                action.resolve(args.into_iter().next().unwrap_or(Value::Null));
                action
            }
            Behavior::Command(command) => {
                let action = self.append(command.ty().clone());
                let outcome = command.call(&args);
                self.run(&action, outcome);
                action
            }
        }
    }

    /// Move the History's head. See [`History::checkout`].
    pub fn checkout(&self, action: Option<&Action>) -> Result<(), HistoryError> {
        self.inner.history.checkout(action)
    }

    /// Replace every owned slice with initial state overlaid by `data`.
    pub fn reset(&self, data: Value) -> Result<Action, StoreError> {
        let initial = Value::Object(
            self.inner
                .domains
                .borrow()
                .lifecycle(Lifecycle::InitialState, &Value::Null, None),
        );
        let payload = merge_options([&initial, &data])?;
        Ok(self.lifecycle_action(RESET, payload))
    }

    /// Replace the owned slices named in `data`.
    pub fn patch(&self, data: Value) -> Result<Action, StoreError> {
        let payload = merge_options([&data])?;
        Ok(self.lifecycle_action(PATCH, payload))
    }

    /// State in transport form. Domains without `serialize` contribute their raw slice.
    #[must_use]
    pub fn serialize(&self) -> Value {
        let mut out = match self.inner.parent.as_ref().map(Store::serialize) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let own = Value::Object(self.inner.state.borrow().clone());
        let serialized = self.inner.domains.borrow().lifecycle(Lifecycle::Serialize, &own, None);
        if let Value::Object(own) = own {
            out.extend(own);
        }
        out.extend(serialized);
        Value::Object(out)
    }

    /// Turn serialized data back into state. Domains without `deserialize` keep the raw slice.
    #[must_use]
    pub fn deserialize(&self, raw: &Value) -> Value {
        let mut out = match self.inner.parent.as_ref().map(|parent| parent.deserialize(raw)) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if let Value::Object(map) = raw {
            out.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        out.extend(self.inner.domains.borrow().lifecycle(Lifecycle::Deserialize, raw, None));
        Value::Object(out)
    }

    /// Like [`Store::deserialize`], from a JSON document.
    pub fn deserialize_str(&self, raw: &str) -> Result<Value, StoreError> {
        let raw: Value = serde_json::from_str(raw).map_err(|e| StoreError::Malformed {
            message: e.to_string(),
        })?;
        Ok(self.deserialize(&raw))
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        self.serialize()
    }

    /// A child store sharing this store's History.
    #[must_use]
    pub fn fork(&self) -> Store {
        Self::attach(
            self.inner.history.clone(),
            self.inner.tagger.clone(),
            self.inner.options.clone(),
            Some(self.clone()),
        )
    }

    /// Detach from the History and tear down domains and effects.
    pub fn shutdown(&self) {
        self.inner.history.remove_repo(self.inner.id);
        self.inner.domains.borrow_mut().teardown();
        let effects: Vec<EffectEntry> = self.inner.effects.borrow_mut().drain(..).collect();
        for entry in effects {
            entry.effect.teardown(self, &entry.options);
        }
        self.inner.listeners.borrow_mut().clear();
        debug!(store = %self.id(), "store shut down");
    }

    fn append(&self, ty: ActionType) -> Action {
        self.inner.history.append(ty, Some(self.inner.id))
    }

    fn lifecycle_action(&self, ty: &str, payload: Value) -> Action {
        let action = self.append(ActionType::new(ty));
        action.resolve(payload);
        action
    }

    fn run(&self, action: &Action, outcome: Outcome) {
        match outcome {
            Outcome::Value(value) => action.resolve(value),
            Outcome::Stream(stream) => self.follow(action, &stream),
            Outcome::Deferred(deferred) => self.follow(action, &Observable::wrap(deferred)),
            Outcome::Thunk(thunk) => {
                if let Some(value) = thunk(action, self) {
                    action.resolve(value);
                }
            }
            Outcome::Fail(reason) => {
                if let Err(e) = action.reject(reason) {
                    warn!(action = %action.id(), error = %e, "command failed after settling");
                }
            }
        }
    }

    fn follow(&self, action: &Action, stream: &Observable) {
        if let Err(e) = action.follow(stream) {
            warn!(action = %action.id(), error = %e, "stream refused subscription");
            let reason = e.reason().cloned().unwrap_or_else(|| Value::String(e.to_string()));
            if let Err(StreamError::Violation(_)) = action.reject(reason) {
                trace!(action = %action.id(), "action already settled");
            }
        }
    }

    fn from_inner(inner: Rc<StoreInner>) -> Self {
        Self { inner }
    }
}

impl StoreInner {
    fn handle(&self) -> Option<Store> {
        self.me.upgrade().map(Store::from_inner)
    }

    fn fold_lifecycle(&self, action: &Action, staged: &mut Map<String, Value>) {
        let Some(ty) = action.ty() else {
            return;
        };
        if !ty.is_lifecycle() || action.status() != Status::Done || action.origin() != Some(self.id) {
            return;
        }

        let payload = action.payload();
        let domains = self.domains.borrow();
        match ty.as_str() {
            ADD_DOMAIN => {
                let key = payload.get("key").and_then(Value::as_str).unwrap_or_default();
                if let Some(initial) = domains.initial_state(key) {
                    staged.insert(key.to_string(), initial);
                }
            }
            RESET => staged.extend(domains.lifecycle(Lifecycle::Reset, &payload, action.origin())),
            PATCH => staged.extend(domains.lifecycle(Lifecycle::Patch, &payload, action.origin())),
            _ => {}
        }
    }
}

impl Repo for StoreInner {
    fn id(&self) -> RepoId {
        self.id
    }

    fn rollback(&self) {
        let base = match self.history.focus() {
            Some(focus) => self.snapshots.borrow().get(&focus.id()).cloned(),
            None => None,
        };
        let base = base.unwrap_or_else(|| self.archived.borrow().clone());
        *self.staged.borrow_mut() = base;
    }

    fn reconcile(&self, action: &Action) {
        let mut staged = std::mem::take(&mut *self.staged.borrow_mut());
        self.fold_lifecycle(action, &mut staged);
        let staged = self.domains.borrow().dispatch(action, staged);
        *self.staged.borrow_mut() = staged;
    }

    fn cache(&self, archived: Option<&Action>) {
        if let Some(focus) = self.history.focus() {
            let staged = self.staged.borrow().clone();
            self.snapshots.borrow_mut().insert(focus.id(), staged);
        }

        if let Some(archived) = archived {
            if let Some(base) = self.snapshots.borrow_mut().remove(&archived.id()) {
                *self.archived.borrow_mut() = base;
            }
            let history = &self.history;
            self.snapshots.borrow_mut().retain(|id, _| history.contains_id(*id));
            trace!(store = %self.id, archived = %archived.id(), "archived base advanced");
        }
    }

    fn release(&self, action: Option<&Action>) {
        let published = self.staged.borrow().clone();
        *self.state.borrow_mut() = published;

        let Some(store) = self.handle() else {
            return;
        };

        let listeners: Vec<ChangeFn> = self.listeners.borrow().iter().map(Rc::clone).collect();
        if !listeners.is_empty() {
            let state = store.state();
            for listener in listeners {
                listener(&state);
            }
        }

        let Some(action) = action else {
            return;
        };
        let handlers: Vec<EffectHandler> = self
            .effects
            .borrow()
            .iter()
            .flat_map(|entry| entry.registry.resolve(action))
            .collect();
        if handlers.is_empty() {
            return;
        }

        let payload = action.payload();
        let meta = action.meta();
        for handler in handlers {
            handler(&store, &payload, &meta);
        }
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        self.history.remove_repo(self.id);
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("domains", &self.inner.domains.borrow().len())
            .field("effects", &self.inner.effects.borrow().len())
            .field("forked", &self.inner.parent.is_some())
            .field("state", &self.inner.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;
    use std::collections::HashMap;

    use serde_json::json;

    use crate::command::Command;
    use crate::domain::{effect_handler, handler, Handler};
    use crate::observable::{Deferred, Teardown};
    use crate::registry::{Registration, Registrations};

    struct Count;

    impl Domain for Count {
        fn get_initial_state(&self) -> Value {
            json!(0)
        }

        fn register(&self) -> Registrations<Handler> {
            HashMap::from([(
                ActionType::new("add"),
                Registration::One(handler(|state, payload, _| {
                    json!(state.as_i64().unwrap_or(0) + payload.as_i64().unwrap_or(0))
                })),
            )])
        }
    }

    #[test]
    fn test_add_domain_folds_initial_state() {
        let store = Store::new(StoreConfig::default());
        store.add_domain("count", Count, Value::Null).unwrap();
        assert_eq!(store.get("count"), json!(0));
        assert_eq!(store.history().size(), 1);
    }

    #[test]
    fn test_push_type_resolves_with_first_arg() {
        let store = Store::new(StoreConfig::default().with_max_history(10));
        store.add_domain("count", Count, Value::Null).unwrap();

        let action = store.push("add", vec![json!(2), json!(99)]);
        assert!(action.is_complete());
        assert_eq!(action.payload(), json!(2));
        assert_eq!(store.get("count"), json!(2));
        assert_eq!(action.origin(), Some(store.id()));
    }

    #[test]
    fn test_stream_outcome() {
        let store = Store::new(StoreConfig::default());
        let command = Command::tagged("stream", |_| {
            Outcome::Stream(Observable::of(vec![json!(1), json!(2)]))
        });
        let action = store.push(&command, vec![]);
        assert!(action.is_complete());
        assert_eq!(action.payload(), json!(2));
    }

    #[test]
    fn test_deferred_outcome_settles_later() {
        let store = Store::new(StoreConfig::default());
        let deferred = Deferred::new();
        let d = deferred.clone();
        let command = Command::tagged("later", move |_| Outcome::Deferred(d.clone()));

        let action = store.push(&command, vec![]);
        assert_eq!(action.status(), Status::Open);

        deferred.resolve("ok");
        assert!(action.is_complete());
        assert_eq!(action.payload(), json!("ok"));
    }

    #[test]
    fn test_fail_outcome() {
        let store = Store::new(StoreConfig::default());
        let command = Command::tagged("broken", |_| Outcome::Fail(json!("nope")));
        let action = store.push(&command, vec![]);
        assert_eq!(action.status(), Status::Error);
        assert_eq!(action.payload(), json!("nope"));
    }

    #[test]
    fn test_invalid_cleanup_rejects_action() {
        let store = Store::new(StoreConfig::default());
        let command = Command::tagged("bad", |_| {
            Outcome::Stream(Observable::new(|_| Ok(Teardown::Value(json!(true)))))
        });
        let action = store.push(&command, vec![]);
        assert_eq!(action.status(), Status::Error);
    }

    #[test]
    fn test_thunk_runs_once_with_action_and_store() {
        let store = Store::new(StoreConfig::default());
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        let expected = store.id();
        let command = Command::tagged("thunk", move |_| {
            let c = Rc::clone(&c);
            Outcome::thunk(move |action, store| {
                c.set(c.get() + 1);
                assert_eq!(store.id(), expected);
                action.update(json!("working"));
                None
            })
        });

        let action = store.push(&command, vec![]);
        assert_eq!(calls.get(), 1);
        assert_eq!(action.status(), Status::Update);
    }

    #[test]
    fn test_effect_runs_after_release() {
        struct Echo(Rc<RefCell<Vec<Value>>>);

        impl Effect for Echo {
            fn register(&self) -> Registrations<EffectHandler> {
                let seen = Rc::clone(&self.0);
                HashMap::from([(
                    ActionType::new("add"),
                    Registration::One(effect_handler(move |store, _, _| {
                        seen.borrow_mut().push(store.get("count"));
                    })),
                )])
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let store = Store::new(StoreConfig::default());
        store.add_domain("count", Count, Value::Null).unwrap();
        store.add_effect(Echo(Rc::clone(&seen)), Value::Null).unwrap();

        store.push("add", vec![json!(4)]);
        assert_eq!(*seen.borrow(), vec![json!(4)]);
    }

    #[test]
    fn test_on_change_sees_published_state() {
        let store = Store::new(StoreConfig::default());
        store.add_domain("count", Count, Value::Null).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        store.on_change(move |state| s.borrow_mut().push(state["count"].clone()));

        store.push("add", vec![json!(3)]);
        assert_eq!(seen.borrow().last(), Some(&json!(3)));
    }

    #[test]
    fn test_reset_and_patch() {
        let store = Store::new(StoreConfig::default());
        store.add_domain("count", Count, Value::Null).unwrap();
        store.add_domain("other", Count, Value::Null).unwrap();
        store.push("add", vec![json!(5)]);
        assert_eq!(store.get("other"), json!(5));

        store.patch(json!({"count": 42})).unwrap();
        assert_eq!(store.get("count"), json!(42));
        assert_eq!(store.get("other"), json!(5));

        store.reset(json!({"other": 7})).unwrap();
        assert_eq!(store.get("count"), json!(0));
        assert_eq!(store.get("other"), json!(7));

        assert!(matches!(store.patch(json!(3)), Err(StoreError::InvalidOptions { .. })));
    }

    #[test]
    fn test_shutdown_detaches() {
        let store = Store::new(StoreConfig::default());
        store.add_domain("count", Count, Value::Null).unwrap();
        store.shutdown();
        assert_eq!(store.history().repo_count(), 0);
        assert!(store.history().is_dormant());
    }

    #[test]
    fn test_dropped_forks_leave_the_history() {
        let store = Store::new(StoreConfig::default());
        for _ in 0..100 {
            let _fork = store.fork();
        }
        assert_eq!(store.history().repo_count(), 1);

        let history = store.history().clone();
        drop(store);
        assert_eq!(history.repo_count(), 0);
        assert!(history.is_dormant());
    }
}
