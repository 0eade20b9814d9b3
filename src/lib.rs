//! # actiontree - an action-tree state container
//!
//! Every unit of intent is recorded as an [`Action`] in a [`History`]. Actions
//! fold into aggregate state through the domains of a [`Store`], and the
//! History replays only what changed since its focus, so undo, redo and
//! bounded-memory compression all fall out of one reconciliation walk.
//!
//! ## Core Concepts
//!
//! - **Observable / Subject**: a terminable push-based stream that delivers exactly one terminal event per subscription
//! - **Action**: a tree node and status machine (`inactive → open → update* → done | error | cancel`)
//! - **History**: the action tree with checkout (time travel) and archive (compression)
//! - **Store**: a repo that folds the tree into state through domains and effects
//!
//! ## Usage
//!
//! ```rust,ignore
//! use actiontree::{handler, Domain, Handler, Registration, Registrations, Store, StoreConfig};
//! use serde_json::{json, Value};
//!
//! struct Counter;
//!
//! impl Domain for Counter {
//!     fn get_initial_state(&self) -> Value {
//!         json!(0)
//!     }
//!
//!     fn register(&self) -> Registrations<Handler> {
//!         Registrations::from([(
//!             "add".into(),
//!             Registration::One(handler(|n, by, _| json!(n.as_i64().unwrap_or(0) + by.as_i64().unwrap_or(0)))),
//!         )])
//!     }
//! }
//!
//! let store = Store::new(StoreConfig::default());
//! store.add_domain("count", Counter, Value::Null)?;
//! store.push("add", vec![json!(2)]);
//! assert_eq!(store.get("count"), json!(2));
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Reactive primitive and actions
pub mod action;
pub mod error;
pub mod observable;
pub mod tag;

// Tree and folding
pub mod command;
pub mod config;
pub mod domain;
pub mod history;
pub mod registry;
pub mod store;

// Re-export primary types at crate root for convenience
pub use action::{Action, ActionId, Meta, Status};
pub use command::{Behavior, Command, Outcome, Thunk};
pub use config::{merge_options, HistoryConfig, StoreConfig};
pub use domain::{effect_handler, handler, Domain, DomainEngine, Effect, EffectHandler, Handler, Lifecycle};
pub use error::{ActionTreeError, ActionTreeResult, HistoryError, StoreError, StreamError};
pub use history::{History, Repo, RepoId};
pub use observable::{
    Deferred, Emitter, Observable, Observer, Settlement, Source, Subject, Subscribe, Subscription,
    SubscriptionState, Teardown,
};
pub use registry::{handlers_for, Registration, Registrations, Registry};
pub use store::Store;
pub use tag::{ActionType, Tagger};
