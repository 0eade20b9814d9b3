//! Multicast Subject and the promise-like Deferred.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::warn;

use crate::error::StreamError;

use super::observer::{Observer, Settlement, Sink, Subscribe, Subscription};

/// A stream that is also an observer.
///
/// Supports any number of concurrent subscribers, notified in subscription
/// order. Late subscribers receive the current payload and, once settled, the
/// terminal event.
#[derive(Clone, Default)]
pub struct Subject {
    inner: Rc<SubjectInner>,
}

#[derive(Default)]
struct SubjectInner {
    payload: RefCell<Option<Value>>,
    settlement: Cell<Option<Settlement>>,
    subscribers: RefCell<Vec<Rc<Sink>>>,
}

impl Subject {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent payload (value, completion value or reason).
    #[must_use]
    pub fn payload(&self) -> Option<Value> {
        self.inner.payload.borrow().clone()
    }

    #[must_use]
    pub fn settlement(&self) -> Option<Settlement> {
        self.inner.settlement.get()
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.settlement.get().is_some()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().iter().filter(|s| !s.is_settled()).count()
    }

    pub fn subscribe(&self, observer: impl Into<Subscribe>) -> Result<Subscription, StreamError> {
        let observer = observer.into().into_observer()?;
        let sink = Sink::new(observer);
        let subscription = Subscription::new(Rc::clone(&sink));

        if !sink.start() {
            return Ok(subscription);
        }

        let payload = self.payload();
        match self.inner.settlement.get() {
            None => {
                if let Some(payload) = &payload {
                    sink.next(payload);
                }
                let mut subscribers = self.inner.subscribers.borrow_mut();
                subscribers.retain(|s| !s.is_settled());
                subscribers.push(sink);
            }
            Some(Settlement::Completed) => {
                if let Some(payload) = &payload {
                    sink.next(payload);
                }
                sink.complete(payload.as_ref());
            }
            Some(Settlement::Errored) => sink.error(payload.unwrap_or(Value::Null))?,
            Some(Settlement::Cancelled | Settlement::Unsubscribed) => {
                sink.cancel(&payload.unwrap_or(Value::Null));
            }
        }

        Ok(subscription)
    }

    pub fn next(&self, value: impl Into<Value>) {
        if self.is_settled() {
            return;
        }
        let value = value.into();
        *self.inner.payload.borrow_mut() = Some(value.clone());
        for sink in self.live() {
            sink.next(&value);
        }
    }

    /// Complete, keeping the current payload. Idempotent.
    pub fn complete(&self) {
        if !self.settle(Settlement::Completed) {
            return;
        }
        let payload = self.payload();
        for sink in self.drain() {
            sink.complete(payload.as_ref());
        }
    }

    /// Complete with a final payload. Idempotent.
    pub fn complete_with(&self, value: impl Into<Value>) {
        if self.is_settled() {
            return;
        }
        *self.inner.payload.borrow_mut() = Some(value.into());
        self.complete();
    }

    /// Fail every subscriber.
    ///
    /// A second error, or an error after completion, returns `Violation`.
    /// An error after cancellation is ignored.
    pub fn error(&self, reason: impl Into<Value>) -> Result<(), StreamError> {
        let reason = reason.into();
        match self.inner.settlement.get() {
            Some(Settlement::Completed | Settlement::Errored) => return Err(StreamError::Violation(reason)),
            Some(Settlement::Cancelled | Settlement::Unsubscribed) => return Ok(()),
            None => {}
        }
        self.settle(Settlement::Errored);
        *self.inner.payload.borrow_mut() = Some(reason.clone());

        for sink in self.drain() {
            if let Err(err) = sink.error(reason.clone()) {
                warn!(error = %err, "subject subscriber has no error handler");
            }
        }
        Ok(())
    }

    /// Broadcast cancellation to every subscriber, each exactly once.
    pub fn cancel(&self, reason: impl Into<Value>) {
        if !self.settle(Settlement::Cancelled) {
            return;
        }
        let reason = reason.into();
        *self.inner.payload.borrow_mut() = Some(reason.clone());
        for sink in self.drain() {
            sink.cancel(&reason);
        }
    }

    /// An observer that pipes events into this subject.
    #[must_use]
    pub fn observer(&self) -> Observer {
        let next = self.clone();
        let complete = self.clone();
        let error = self.clone();
        let cancel = self.clone();
        Observer::new()
            .on_next(move |v| next.next(v.clone()))
            .on_complete(move |v| match v {
                Some(v) => complete.complete_with(v.clone()),
                None => complete.complete(),
            })
            .on_error(move |r| {
                if let Err(err) = error.error(r.clone()) {
                    warn!(error = %err, "subject refused upstream error");
                }
            })
            .on_cancel(move |r| cancel.cancel(r.clone()))
    }

    fn settle(&self, how: Settlement) -> bool {
        if self.is_settled() {
            return false;
        }
        self.inner.settlement.set(Some(how));
        true
    }

    fn live(&self) -> Vec<Rc<Sink>> {
        self.inner
            .subscribers
            .borrow()
            .iter()
            .filter(|s| !s.is_settled())
            .cloned()
            .collect()
    }

    fn drain(&self) -> Vec<Rc<Sink>> {
        self.inner.subscribers.borrow_mut().drain(..).collect()
    }
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("payload", &self.inner.payload.borrow())
            .field("settlement", &self.inner.settlement.get())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A promise-like value that settles once.
///
/// Unlike a subject, a second settlement is silently ignored.
#[derive(Clone, Default)]
pub struct Deferred {
    subject: Subject,
}

impl Deferred {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, value: impl Into<Value>) {
        if self.subject.is_settled() {
            return;
        }
        let value = value.into();
        self.subject.next(value.clone());
        self.subject.complete_with(value);
    }

    pub fn reject(&self, reason: impl Into<Value>) {
        if self.subject.is_settled() {
            return;
        }
        // Cannot fail: the subject is unsettled.
        let _ = self.subject.error(reason);
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.subject.is_settled()
    }

    /// Late subscribers receive the settled value or reason immediately.
    pub fn subscribe(&self, observer: impl Into<Subscribe>) -> Result<Subscription, StreamError> {
        self.subject.subscribe(observer)
    }

    pub(crate) fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("payload", &self.subject.payload())
            .field("settled", &self.subject.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_late_subscriber_receives_current_payload() {
        let subject = Subject::new();
        subject.next(1);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        subject
            .subscribe(Observer::from_next(move |v| s.borrow_mut().push(v.clone())))
            .unwrap();
        subject.next(2);

        assert_eq!(*seen.borrow(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_subscribers_notified_in_order() {
        let subject = Subject::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for name in ["first", "second", "third"] {
            let o = Rc::clone(&order);
            subject
                .subscribe(Observer::from_next(move |_| o.borrow_mut().push(name)))
                .unwrap();
        }
        subject.next(true);
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_complete_with_keeps_payload() {
        let subject = Subject::new();
        subject.next(3);
        subject.complete();
        subject.complete_with(4);
        assert_eq!(subject.payload(), Some(json!(3)));
        assert_eq!(subject.settlement(), Some(Settlement::Completed));
    }

    #[test]
    fn test_double_error_is_violation() {
        let subject = Subject::new();
        assert!(subject.error("one").is_ok());
        assert_eq!(subject.error("two"), Err(StreamError::Violation(json!("two"))));
    }

    #[test]
    fn test_error_after_cancel_is_ignored() {
        let subject = Subject::new();
        subject.cancel("stop");
        assert!(subject.error("late").is_ok());
        assert_eq!(subject.settlement(), Some(Settlement::Cancelled));
    }

    #[test]
    fn test_deferred_settles_once() {
        let deferred = Deferred::new();
        deferred.resolve(1);
        deferred.reject("ignored");
        deferred.resolve(2);
        assert_eq!(deferred.subject().payload(), Some(json!(1)));
        assert!(deferred.is_settled());
    }
}
