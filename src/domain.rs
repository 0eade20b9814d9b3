//! Domains, effects and the engine that folds them.
//!
//! A domain owns one named slice of state and declares reducers per action
//! type. An effect owns nothing; it reacts to actions after state has been
//! released. The [`DomainEngine`] keeps domains in registration order, so a
//! later domain always observes the slices an earlier one already folded for
//! the same action.

use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::trace;

use crate::action::{Action, Meta};
use crate::config::merge_options;
use crate::error::StoreError;
use crate::history::RepoId;
use crate::registry::{Registrations, Registry};
use crate::store::Store;

/// Reducer: `(slice, payload, meta) -> slice`.
pub type Handler = Rc<dyn Fn(Value, &Value, &Meta) -> Value>;

/// Effect callback: `(store, payload, meta)`.
pub type EffectHandler = Rc<dyn Fn(&Store, &Value, &Meta)>;

pub fn handler(f: impl Fn(Value, &Value, &Meta) -> Value + 'static) -> Handler {
    Rc::new(f)
}

pub fn effect_handler(f: impl Fn(&Store, &Value, &Meta) + 'static) -> EffectHandler {
    Rc::new(f)
}

/// Owner of one state slice.
///
/// Every method is optional. `serialize` and `deserialize` return `None` when
/// the domain keeps its slice as-is.
pub trait Domain {
    /// Options merged beneath the caller's options at registration.
    fn defaults(&self) -> Value {
        Value::Null
    }

    fn setup(&self, _options: &Value) {}

    fn teardown(&self, _options: &Value) {}

    fn get_initial_state(&self) -> Value {
        Value::Null
    }

    fn register(&self) -> Registrations<Handler> {
        Registrations::new()
    }

    fn serialize(&self, _state: &Value) -> Option<Value> {
        None
    }

    fn deserialize(&self, _raw: &Value) -> Option<Value> {
        None
    }
}

/// Stateless reactor to actions.
pub trait Effect {
    fn defaults(&self) -> Value {
        Value::Null
    }

    fn setup(&self, _store: &Store, _options: &Value) {}

    fn teardown(&self, _store: &Store, _options: &Value) {}

    fn register(&self) -> Registrations<EffectHandler>;
}

/// Structural operations a store runs across every domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    InitialState,
    Serialize,
    Deserialize,
    Reset,
    Patch,
}

struct DomainEntry {
    key: String,
    domain: Rc<dyn Domain>,
    registry: Registry<Handler>,
    options: Value,
}

/// Domains of one repo, in registration order.
pub struct DomainEngine {
    origin: RepoId,
    domains: Vec<DomainEntry>,
}

impl DomainEngine {
    #[must_use]
    pub fn new(origin: RepoId) -> Self {
        Self {
            origin,
            domains: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.domains.iter().any(|entry| entry.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.domains.iter().map(|entry| entry.key.as_str())
    }

    /// Register `domain` under `key` and run its setup with the merged options.
    ///
    /// Options merge as repo options, the domain's defaults, `{key}`, then
    /// the caller's options; later sources win.
    pub fn add(
        &mut self,
        key: &str,
        domain: Rc<dyn Domain>,
        repo_options: &Value,
        options: &Value,
    ) -> Result<Value, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidDomainKey);
        }
        if self.contains(key) {
            return Err(StoreError::DuplicateDomain { key: key.to_string() });
        }

        let key_options = serde_json::json!({ "key": key });
        let merged = merge_options([repo_options, &domain.defaults(), &key_options, options])?;

        domain.setup(&merged);
        self.domains.push(DomainEntry {
            key: key.to_string(),
            registry: Registry::new(domain.register()),
            domain,
            options: merged.clone(),
        });
        Ok(merged)
    }

    /// Fold every resolved handler for `action` over its domain's slice.
    ///
    /// Slices without handlers for this action pass through untouched.
    #[must_use]
    pub fn dispatch(&self, action: &Action, mut state: Map<String, Value>) -> Map<String, Value> {
        let payload = action.payload();
        let meta = action.meta();

        for entry in &self.domains {
            let handlers = entry.registry.resolve(action);
            if handlers.is_empty() {
                continue;
            }
            trace!(action = %action.id(), domain = %entry.key, handlers = handlers.len(), "dispatch");

            let mut slice = state.remove(&entry.key).unwrap_or(Value::Null);
            for handler in &handlers {
                slice = handler(slice, &payload, &meta);
            }
            state.insert(entry.key.clone(), slice);
        }

        state
    }

    /// Run a structural operation across domains and collect the slices it produced.
    ///
    /// `Reset` and `Patch` only touch domains when `origin` is this engine's
    /// repo, so nested repos never clobber each other's slices.
    #[must_use]
    pub fn lifecycle(&self, kind: Lifecycle, payload: &Value, origin: Option<RepoId>) -> Map<String, Value> {
        let mut out = Map::new();
        let owned = origin == Some(self.origin);

        for entry in &self.domains {
            let key = entry.key.as_str();
            let slice = payload.get(key);
            let value = match kind {
                Lifecycle::InitialState => Some(entry.domain.get_initial_state()),
                Lifecycle::Serialize => entry.domain.serialize(slice.unwrap_or(&Value::Null)),
                Lifecycle::Deserialize => entry.domain.deserialize(slice.unwrap_or(&Value::Null)),
                Lifecycle::Reset if owned => Some(slice.cloned().unwrap_or(Value::Null)),
                Lifecycle::Patch if owned => slice.cloned(),
                Lifecycle::Reset | Lifecycle::Patch => None,
            };
            if let Some(value) = value {
                out.insert(key.to_string(), value);
            }
        }

        out
    }

    /// Initial state of the domain registered under `key`.
    #[must_use]
    pub fn initial_state(&self, key: &str) -> Option<Value> {
        self.domains
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.domain.get_initial_state())
    }

    /// Run every domain's teardown and forget them.
    pub fn teardown(&mut self) {
        for entry in self.domains.drain(..) {
            entry.domain.teardown(&entry.options);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Weak;

    use serde_json::json;

    use crate::action::ActionId;
    use crate::registry::Registration;
    use crate::tag::ActionType;

    struct Counter;

    impl Domain for Counter {
        fn defaults(&self) -> Value {
            json!({"step": 1})
        }

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

        fn serialize(&self, state: &Value) -> Option<Value> {
            Some(json!(format!("n={state}")))
        }
    }

    struct Doubler;

    impl Domain for Doubler {
        fn register(&self) -> Registrations<Handler> {
            HashMap::from([(
                ActionType::new("add"),
                Registration::One(handler(|_, payload, _| json!(payload.as_i64().unwrap_or(0) * 2))),
            )])
        }
    }

    struct Recorded(Rc<RefCell<Vec<Value>>>);

    impl Domain for Recorded {
        fn setup(&self, options: &Value) {
            self.0.borrow_mut().push(options.clone());
        }
    }

    fn done(name: &str, payload: Value) -> Action {
        let action = Action::new(ActionId::from_raw(0), ActionType::new(name), None, Weak::new());
        action.resolve(payload);
        action
    }

    #[test]
    fn test_add_merges_options_in_precedence() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut engine = DomainEngine::new(RepoId::new());
        engine
            .add("log", Rc::new(Recorded(Rc::clone(&seen))), &json!({"repo": true, "key": "x"}), &json!({"extra": 1}))
            .unwrap();

        assert_eq!(seen.borrow()[0], json!({"repo": true, "key": "log", "extra": 1}));
    }

    #[test]
    fn test_add_rejects_bad_keys() {
        let mut engine = DomainEngine::new(RepoId::new());
        assert_eq!(
            engine.add("", Rc::new(Counter), &Value::Null, &Value::Null),
            Err(StoreError::InvalidDomainKey)
        );
        engine.add("count", Rc::new(Counter), &Value::Null, &Value::Null).unwrap();
        assert!(matches!(
            engine.add("count", Rc::new(Counter), &Value::Null, &Value::Null),
            Err(StoreError::DuplicateDomain { .. })
        ));
        assert!(matches!(
            engine.add("other", Rc::new(Counter), &Value::Null, &json!("nope")),
            Err(StoreError::InvalidOptions { .. })
        ));
    }

    #[test]
    fn test_dispatch_folds_each_slice() {
        let mut engine = DomainEngine::new(RepoId::new());
        engine.add("count", Rc::new(Counter), &Value::Null, &Value::Null).unwrap();
        engine.add("double", Rc::new(Doubler), &Value::Null, &Value::Null).unwrap();

        let mut state = Map::new();
        state.insert("count".into(), json!(2));
        state.insert("untouched".into(), json!("same"));

        let next = engine.dispatch(&done("add", json!(3)), state);
        assert_eq!(next["count"], json!(5));
        assert_eq!(next["double"], json!(6));
        assert_eq!(next["untouched"], json!("same"));

        let skipped = engine.dispatch(&done("other", json!(3)), Map::new());
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_reset_and_patch_respect_origin() {
        let owner = RepoId::new();
        let mut engine = DomainEngine::new(owner);
        engine.add("count", Rc::new(Counter), &Value::Null, &Value::Null).unwrap();
        engine.add("double", Rc::new(Doubler), &Value::Null, &Value::Null).unwrap();

        let payload = json!({"count": 10});
        let reset = engine.lifecycle(Lifecycle::Reset, &payload, Some(owner));
        assert_eq!(reset.get("count"), Some(&json!(10)));
        assert_eq!(reset.get("double"), Some(&Value::Null));

        let patch = engine.lifecycle(Lifecycle::Patch, &payload, Some(owner));
        assert_eq!(patch.len(), 1);

        assert!(engine.lifecycle(Lifecycle::Reset, &payload, Some(RepoId::new())).is_empty());
        assert!(engine.lifecycle(Lifecycle::Patch, &payload, None).is_empty());
    }

    #[test]
    fn test_serialize_only_implemented() {
        let mut engine = DomainEngine::new(RepoId::new());
        engine.add("count", Rc::new(Counter), &Value::Null, &Value::Null).unwrap();
        engine.add("double", Rc::new(Doubler), &Value::Null, &Value::Null).unwrap();

        let out = engine.lifecycle(Lifecycle::Serialize, &json!({"count": 4, "double": 8}), None);
        assert_eq!(out.get("count"), Some(&json!("n=4")));
        assert!(!out.contains_key("double"));

        let initial = engine.lifecycle(Lifecycle::InitialState, &Value::Null, None);
        assert_eq!(initial.get("count"), Some(&json!(0)));
        assert_eq!(initial.get("double"), Some(&Value::Null));
    }
}
