//! Single-use Observable and its static combinators.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::error::StreamError;

use super::observer::{Emitter, Failure, Observer, Sink, Subscribe, Subscription, Teardown};
use super::subject::{Deferred, Subject};

/// Producer invoked once per subscription.
pub type Producer = Rc<dyn Fn(&Emitter) -> Result<Teardown, StreamError>>;

/// Push-based stream. The producer runs once for every subscriber.
///
/// The Observable tracks its live subscriptions so [`Observable::cancel`]
/// can broadcast to all of them.
#[derive(Clone)]
pub struct Observable {
    inner: Rc<ObservableInner>,
}

struct ObservableInner {
    producer: Producer,
    active: RefCell<Vec<Rc<Sink>>>,
}

impl Observable {
    pub fn new<F>(producer: F) -> Self
    where
        F: Fn(&Emitter) -> Result<Teardown, StreamError> + 'static,
    {
        Self {
            inner: Rc::new(ObservableInner {
                producer: Rc::new(producer),
                active: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Subscribe and run the producer.
    ///
    /// Fails when given a null observer, when the producer returns a
    /// non-callable teardown, or when an error reaches a subscription without
    /// an error handler.
    pub fn subscribe(&self, observer: impl Into<Subscribe>) -> Result<Subscription, StreamError> {
        let observer = observer.into().into_observer()?;
        let sink = Sink::new(observer);
        let subscription = Subscription::new(Rc::clone(&sink));

        if !sink.start() {
            return Ok(subscription);
        }

        {
            let mut active = self.inner.active.borrow_mut();
            active.retain(|s| !s.is_settled());
            active.push(Rc::clone(&sink));
        }

        let emitter = Emitter::new(Rc::clone(&sink));
        match (self.inner.producer)(&emitter) {
            Ok(teardown) => sink.attach(teardown)?,
            Err(StreamError::Raised(reason)) => sink.error(reason)?,
            Err(other) => return Err(other),
        }

        Ok(subscription)
    }

    /// Cancel every live subscription, in subscription order.
    pub fn cancel(&self, reason: impl Into<Value>) {
        let reason = reason.into();
        let active: Vec<Rc<Sink>> = self.inner.active.borrow_mut().drain(..).collect();
        for sink in active {
            sink.cancel(&reason);
        }
    }

    /// Number of subscriptions that have not settled.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.active.borrow().iter().filter(|s| !s.is_settled()).count()
    }

    /// Emit each value synchronously, then complete.
    #[must_use]
    pub fn of(values: Vec<Value>) -> Self {
        Self::new(move |emitter| {
            for value in &values {
                emitter.next(value.clone());
            }
            emitter.complete();
            Ok(Teardown::None)
        })
    }

    /// Lift a value, deferred, subject or observable into an Observable.
    #[must_use]
    pub fn wrap(source: impl Into<Source>) -> Self {
        match source.into() {
            Source::Stream(observable) => observable,
            Source::Value(value) => Self::new(move |emitter| {
                emitter.next(value.clone());
                emitter.complete();
                Ok(Teardown::None)
            }),
            Source::Deferred(deferred) => Self::follow(deferred.subject().clone()),
            Source::Subject(subject) => Self::follow(subject),
        }
    }

    /// Merge a mapping of sources into one Observable of the merged mapping.
    ///
    /// Emits only when the merged mapping differs from the previous emission
    /// and completes once every member has completed.
    #[must_use]
    pub fn hash(sources: BTreeMap<String, Source>) -> Self {
        let members: Rc<Vec<(String, Self)>> = Rc::new(
            sources
                .into_iter()
                .map(|(key, source)| (key, Self::wrap(source)))
                .collect(),
        );

        Self::new(move |emitter| {
            if members.is_empty() {
                emitter.next(Value::Object(Map::new()));
                emitter.complete();
                return Ok(Teardown::None);
            }

            let merge = Rc::new(RefCell::new(HashMerge {
                values: Map::new(),
                last: None,
                remaining: members.len(),
            }));
            let failure = Failure::new();
            let mut subscriptions = Vec::with_capacity(members.len());
            let mut subscribed = Ok(());

            for (key, member) in members.iter() {
                let observer = hash_member(key.clone(), &merge, emitter, &failure);
                match member.subscribe(observer) {
                    Ok(subscription) => subscriptions.push(subscription),
                    Err(err) => {
                        subscribed = Err(err);
                        break;
                    }
                }
                if emitter.is_settled() {
                    break;
                }
            }

            let finished = failure.finish();
            if let Err(err) = subscribed {
                for subscription in subscriptions {
                    subscription.unsubscribe();
                }
                return Err(err);
            }
            finished?;

            Ok(Teardown::cleanup(move || {
                for subscription in subscriptions {
                    subscription.unsubscribe();
                }
            }))
        })
    }

    /// Forward a subject's events, replay included.
    fn follow(subject: Subject) -> Self {
        Self::new(move |emitter| {
            let failure = Failure::new();
            let subscribed = subject.subscribe(emitter.forward(failure.clone()));
            let finished = failure.finish();
            let subscription = subscribed?;
            finished?;
            Ok(Teardown::cleanup(move || subscription.unsubscribe()))
        })
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("active", &self.active_count())
            .finish()
    }
}

struct HashMerge {
    values: Map<String, Value>,
    last: Option<Value>,
    remaining: usize,
}

fn hash_member(
    key: String,
    merge: &Rc<RefCell<HashMerge>>,
    emitter: &Emitter,
    failure: &Failure,
) -> Observer {
    let on_next = (Rc::clone(merge), emitter.clone());
    let on_complete = (Rc::clone(merge), emitter.clone());
    let on_error = (emitter.clone(), failure.clone());
    let on_cancel = emitter.clone();

    Observer::new()
        .on_next(move |value| {
            let (merge, emitter) = &on_next;
            let changed = {
                let mut merge = merge.borrow_mut();
                merge.values.insert(key.clone(), value.clone());
                let merged = Value::Object(merge.values.clone());
                if merge.last.as_ref() == Some(&merged) {
                    None
                } else {
                    merge.last = Some(merged.clone());
                    Some(merged)
                }
            };
            if let Some(merged) = changed {
                emitter.next(merged);
            }
        })
        .on_complete(move |_| {
            let (merge, emitter) = &on_complete;
            let done = {
                let mut merge = merge.borrow_mut();
                merge.remaining = merge.remaining.saturating_sub(1);
                (merge.remaining == 0).then(|| Value::Object(merge.values.clone()))
            };
            if let Some(merged) = done {
                emitter.complete_with(merged);
            }
        })
        .on_error(move |reason| {
            let (emitter, failure) = &on_error;
            if let Err(err) = emitter.error(reason.clone()) {
                failure.record(err);
            }
        })
        .on_cancel(move |reason| on_cancel.cancel(reason.clone()))
}

/// Anything [`Observable::wrap`] can lift.
#[derive(Debug, Clone)]
pub enum Source {
    /// A plain value: one `next`, then complete.
    Value(Value),
    /// A promise-like: `next` + complete on resolve, error on reject.
    Deferred(Deferred),
    /// A multicast subject; its current payload is replayed.
    Subject(Subject),
    /// Passed through untouched.
    Stream(Observable),
}

impl From<Value> for Source {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Deferred> for Source {
    fn from(deferred: Deferred) -> Self {
        Self::Deferred(deferred)
    }
}

impl From<Subject> for Source {
    fn from(subject: Subject) -> Self {
        Self::Subject(subject)
    }
}

impl From<Observable> for Source {
    fn from(observable: Observable) -> Self {
        Self::Stream(observable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::observable::Settlement;

    use serde_json::json;

    #[test]
    fn test_of_emits_in_order_then_completes() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let done = Rc::new(Cell::new(false));
        let s = Rc::clone(&seen);
        let d = Rc::clone(&done);

        Observable::of(vec![json!(1), json!(2), json!(3)])
            .subscribe(
                Observer::new()
                    .on_next(move |v| s.borrow_mut().push(v.clone()))
                    .on_complete(move |_| d.set(true)),
            )
            .unwrap();

        assert_eq!(*seen.borrow(), vec![json!(1), json!(2), json!(3)]);
        assert!(done.get());
    }

    #[test]
    fn test_producer_runs_per_subscription() {
        let runs = Rc::new(Cell::new(0));
        let r = Rc::clone(&runs);
        let observable = Observable::new(move |_| {
            r.set(r.get() + 1);
            Ok(Teardown::None)
        });

        observable.subscribe(Observer::new()).unwrap();
        observable.subscribe(Observer::new()).unwrap();
        assert_eq!(runs.get(), 2);
        assert_eq!(observable.active_count(), 2);
    }

    #[test]
    fn test_wrap_deferred_rejected_after_subscribe() {
        let deferred = Deferred::new();
        let subscription = Observable::wrap(deferred.clone())
            .subscribe(Observer::new())
            .unwrap();
        assert!(!subscription.is_closed());

        // No error handler and no producer left to report to.
        deferred.reject("late");
        assert_eq!(subscription.settlement(), Some(Settlement::Errored));
    }

    #[test]
    fn test_wrap_value() {
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        Observable::wrap(json!(true))
            .subscribe(Observer::from_next(move |v| *s.borrow_mut() = Some(v.clone())))
            .unwrap();
        assert_eq!(*seen.borrow(), Some(json!(true)));
    }

    #[test]
    fn test_hash_of_empty_mapping() {
        let seen = Rc::new(RefCell::new(None));
        let s = Rc::clone(&seen);
        Observable::hash(BTreeMap::new())
            .subscribe(Observer::from_next(move |v| *s.borrow_mut() = Some(v.clone())))
            .unwrap();
        assert_eq!(*seen.borrow(), Some(json!({})));
    }
}
