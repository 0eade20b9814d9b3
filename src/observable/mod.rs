//! Push-based reactive primitive.
//!
//! An [`Observable`] runs its producer once per subscription; a [`Subject`]
//! multicasts to many subscribers and is itself an observer. Both guarantee
//! exactly one terminal event per subscription, ignore `next` after
//! settlement, and run cleanup exactly once.
//!
//! Everything here is single-threaded and synchronous: producers and
//! subscriber callbacks run inside the call that triggered them unless the
//! producer itself defers (for example by holding on to its [`Emitter`]).

/// Observers, subscriptions and emitters.
pub mod observer;
/// Observable and combinators.
pub mod stream;
/// Subject and Deferred.
pub mod subject;

pub use observer::{
    CompleteFn, Emitter, Observer, Settlement, Subscribe, Subscription, SubscriptionState, Teardown, ValueFn,
};
pub use stream::{Observable, Producer, Source};
pub use subject::{Deferred, Subject};
