//! Observers, subscriptions and the producer-side emitter.
//!
//! Every subscription is backed by a [`Sink`]: a small state machine that
//! guarantees a single terminal event, swallows late `next` calls, and runs
//! cleanup exactly once. Producers drive a sink through an [`Emitter`];
//! consumers hold the matching [`Subscription`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::warn;

use crate::error::StreamError;

/// Callback receiving a value or reason.
pub type ValueFn = Rc<dyn Fn(&Value)>;
/// Callback receiving an optional completion value.
pub type CompleteFn = Rc<dyn Fn(Option<&Value>)>;
/// Callback invoked with the subscription before the producer runs.
pub type StartFn = Rc<dyn Fn(&Subscription)>;
/// Callback invoked once when the subscription settles or is cancelled.
pub type CleanupFn = Rc<dyn Fn()>;

/// Per-subscription lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Created, producer not yet running.
    Pending,
    /// Producer running; events are delivered.
    Active,
    /// A terminal event (or cancellation) has been delivered.
    Settled,
}

/// How a subscription settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Completed,
    Errored,
    Cancelled,
    Unsubscribed,
}

/// Canonical observer. Every handler is optional.
#[derive(Clone, Default)]
pub struct Observer {
    pub(crate) start: Option<StartFn>,
    pub(crate) next: Option<ValueFn>,
    pub(crate) complete: Option<CompleteFn>,
    pub(crate) error: Option<ValueFn>,
    pub(crate) cancel: Option<ValueFn>,
    pub(crate) cleanup: Option<CleanupFn>,
}

impl Observer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An observer that only listens to values.
    #[must_use]
    pub fn from_next(next: impl Fn(&Value) + 'static) -> Self {
        Self::new().on_next(next)
    }

    /// The positional calling form: `next`, then optional `error` and `complete`.
    #[must_use]
    pub fn positional(next: ValueFn, error: Option<ValueFn>, complete: Option<CompleteFn>) -> Self {
        Self {
            next: Some(next),
            error,
            complete,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn on_start(mut self, f: impl Fn(&Subscription) + 'static) -> Self {
        self.start = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn on_next(mut self, f: impl Fn(&Value) + 'static) -> Self {
        self.next = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn on_complete(mut self, f: impl Fn(Option<&Value>) + 'static) -> Self {
        self.complete = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&Value) + 'static) -> Self {
        self.error = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn on_cancel(mut self, f: impl Fn(&Value) + 'static) -> Self {
        self.cancel = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn on_cleanup(mut self, f: impl Fn() + 'static) -> Self {
        self.cleanup = Some(Rc::new(f));
        self
    }

    /// Returns true if errors will be handled rather than raised.
    #[must_use]
    pub fn has_error_handler(&self) -> bool {
        self.error.is_some()
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("start", &self.start.is_some())
            .field("next", &self.next.is_some())
            .field("complete", &self.complete.is_some())
            .field("error", &self.error.is_some())
            .field("cancel", &self.cancel.is_some())
            .field("cleanup", &self.cleanup.is_some())
            .finish()
    }
}

/// The accepted calling forms of `subscribe`, normalized by [`Subscribe::into_observer`].
pub enum Subscribe {
    /// A full observer.
    Observer(Observer),
    /// `next` as the only argument.
    Next(ValueFn),
    /// `next`, then optional `error` and `complete`.
    Positional {
        next: ValueFn,
        error: Option<ValueFn>,
        complete: Option<CompleteFn>,
    },
    /// A missing observer. Always rejected.
    Null,
}

impl Subscribe {
    /// Subscribe with a `next` callback only.
    #[must_use]
    pub fn next(f: impl Fn(&Value) + 'static) -> Self {
        Self::Next(Rc::new(f))
    }

    /// Subscribe with positional callbacks.
    #[must_use]
    pub fn positional(
        next: impl Fn(&Value) + 'static,
        error: Option<ValueFn>,
        complete: Option<CompleteFn>,
    ) -> Self {
        Self::Positional {
            next: Rc::new(next),
            error,
            complete,
        }
    }

    /// Normalize into the canonical observer.
    pub fn into_observer(self) -> Result<Observer, StreamError> {
        match self {
            Self::Observer(observer) => Ok(observer),
            Self::Next(next) => Ok(Observer {
                next: Some(next),
                ..Observer::default()
            }),
            Self::Positional { next, error, complete } => Ok(Observer::positional(next, error, complete)),
            Self::Null => Err(StreamError::InvalidObserver {
                value: "null".to_string(),
            }),
        }
    }
}

impl fmt::Debug for Subscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observer(observer) => f.debug_tuple("Observer").field(observer).finish(),
            Self::Next(_) => f.write_str("Next"),
            Self::Positional { error, complete, .. } => f
                .debug_struct("Positional")
                .field("error", &error.is_some())
                .field("complete", &complete.is_some())
                .finish(),
            Self::Null => f.write_str("Null"),
        }
    }
}

impl From<Observer> for Subscribe {
    fn from(observer: Observer) -> Self {
        Self::Observer(observer)
    }
}

impl From<Option<Observer>> for Subscribe {
    fn from(observer: Option<Observer>) -> Self {
        observer.map_or(Self::Null, Self::Observer)
    }
}

/// What a producer hands back for cleanup.
#[derive(Default)]
pub enum Teardown {
    /// Nothing to clean up.
    #[default]
    None,
    /// Run once when the subscription settles or is cancelled.
    Cleanup(Box<dyn FnOnce()>),
    /// A dynamic value. `null` means nothing; anything else is rejected.
    Value(Value),
}

impl Teardown {
    #[must_use]
    pub fn cleanup(f: impl FnOnce() + 'static) -> Self {
        Self::Cleanup(Box::new(f))
    }
}

impl From<()> for Teardown {
    fn from((): ()) -> Self {
        Self::None
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("Teardown::None"),
            Self::Cleanup(_) => f.write_str("Teardown::Cleanup(..)"),
            Self::Value(v) => write!(f, "Teardown::Value({v})"),
        }
    }
}

/// Delivery state shared by a subscription and its emitter.
pub(crate) struct Sink {
    observer: Observer,
    state: Cell<SubscriptionState>,
    settlement: Cell<Option<Settlement>>,
    teardown: RefCell<Option<Box<dyn FnOnce()>>>,
    hook_ran: Cell<bool>,
}

impl Sink {
    pub(crate) fn new(observer: Observer) -> Rc<Self> {
        Rc::new(Self {
            observer,
            state: Cell::new(SubscriptionState::Pending),
            settlement: Cell::new(None),
            teardown: RefCell::new(None),
            hook_ran: Cell::new(false),
        })
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        self.state.get()
    }

    pub(crate) fn settlement(&self) -> Option<Settlement> {
        self.settlement.get()
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settlement.get().is_some()
    }

    /// Run the `start` hook. Returns false if the hook closed the subscription.
    pub(crate) fn start(self: &Rc<Self>) -> bool {
        if let Some(start) = self.observer.start.clone() {
            start(&Subscription::new(Rc::clone(self)));
        }
        if self.is_settled() {
            return false;
        }
        self.state.set(SubscriptionState::Active);
        true
    }

    pub(crate) fn next(&self, value: &Value) {
        if self.state.get() != SubscriptionState::Active {
            return;
        }
        if let Some(next) = self.observer.next.clone() {
            next(value);
        }
    }

    pub(crate) fn complete(&self, value: Option<&Value>) {
        if !self.settle(Settlement::Completed) {
            return;
        }
        if let Some(complete) = self.observer.complete.clone() {
            complete(value);
        }
        self.run_cleanup();
    }

    pub(crate) fn error(&self, reason: Value) -> Result<(), StreamError> {
        match self.settlement.get() {
            Some(Settlement::Completed | Settlement::Errored) => return Err(StreamError::Violation(reason)),
            Some(Settlement::Cancelled | Settlement::Unsubscribed) => return Ok(()),
            None => {}
        }
        self.settle(Settlement::Errored);

        let result = match self.observer.error.clone() {
            Some(handler) => {
                handler(&reason);
                Ok(())
            }
            None => Err(StreamError::Unhandled(reason)),
        };
        self.run_cleanup();
        result
    }

    pub(crate) fn cancel(&self, reason: &Value) {
        if !self.settle(Settlement::Cancelled) {
            return;
        }
        if let Some(cancel) = self.observer.cancel.clone() {
            cancel(reason);
        }
        self.run_cleanup();
    }

    pub(crate) fn unsubscribe(&self) {
        if self.settle(Settlement::Unsubscribed) {
            self.run_cleanup();
        }
    }

    /// Attach the producer's teardown. Runs it at once if already settled.
    pub(crate) fn attach(&self, teardown: Teardown) -> Result<(), StreamError> {
        let cleanup = match teardown {
            Teardown::None | Teardown::Value(Value::Null) => return Ok(()),
            Teardown::Value(other) => {
                return Err(StreamError::InvalidCleanup {
                    value: other.to_string(),
                })
            }
            Teardown::Cleanup(f) => f,
        };

        if self.is_settled() {
            cleanup();
        } else {
            *self.teardown.borrow_mut() = Some(cleanup);
        }
        Ok(())
    }

    fn settle(&self, how: Settlement) -> bool {
        if self.settlement.get().is_some() {
            return false;
        }
        self.settlement.set(Some(how));
        self.state.set(SubscriptionState::Settled);
        true
    }

    fn run_cleanup(&self) {
        let teardown = self.teardown.borrow_mut().take();
        if let Some(teardown) = teardown {
            teardown();
        }
        if !self.hook_ran.replace(true) {
            if let Some(cleanup) = self.observer.cleanup.clone() {
                cleanup();
            }
        }
    }
}

/// Consumer handle for one subscription.
#[derive(Clone)]
pub struct Subscription {
    sink: Rc<Sink>,
}

impl Subscription {
    pub(crate) fn new(sink: Rc<Sink>) -> Self {
        Self { sink }
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.sink.state()
    }

    /// How the subscription settled, if it has.
    #[must_use]
    pub fn settlement(&self) -> Option<Settlement> {
        self.sink.settlement()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sink.is_settled()
    }

    /// Stop listening without notifying the cancel handler.
    pub fn unsubscribe(&self) {
        self.sink.unsubscribe();
    }

    /// Cancel with a reason. No-op once settled.
    pub fn cancel(&self, reason: impl Into<Value>) {
        self.sink.cancel(&reason.into());
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("state", &self.sink.state())
            .field("settlement", &self.sink.settlement())
            .finish()
    }
}

/// Producer-side observer capability.
#[derive(Clone)]
pub struct Emitter {
    sink: Rc<Sink>,
}

impl Emitter {
    pub(crate) fn new(sink: Rc<Sink>) -> Self {
        Self { sink }
    }

    /// Deliver a value. Ignored once settled.
    pub fn next(&self, value: impl Into<Value>) {
        self.sink.next(&value.into());
    }

    /// Complete without a value. Idempotent.
    pub fn complete(&self) {
        self.sink.complete(None);
    }

    /// Complete with a final value. Idempotent.
    pub fn complete_with(&self, value: impl Into<Value>) {
        self.sink.complete(Some(&value.into()));
    }

    /// Fail the subscription.
    ///
    /// Returns `Unhandled` when the subscriber supplied no error handler, and
    /// `Violation` when the subscription already completed or errored.
    pub fn error(&self, reason: impl Into<Value>) -> Result<(), StreamError> {
        self.sink.error(reason.into())
    }

    /// Cancel the subscription. No-op once settled.
    pub fn cancel(&self, reason: impl Into<Value>) {
        self.sink.cancel(&reason.into());
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.sink.is_settled()
    }

    /// An observer forwarding every event into this emitter.
    ///
    /// Errors raised by the forwarded `error` are handed to `failure`.
    pub(crate) fn forward(&self, failure: Failure) -> Observer {
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
                    failure.record(err);
                }
            })
            .on_cancel(move |r| cancel.cancel(r.clone()))
    }
}

/// Collects an error raised by an inner subscription.
///
/// While the producer is still running the first error is parked and
/// returned by [`Failure::finish`]. Errors arriving afterwards have no caller
/// left to receive them and are logged.
#[derive(Clone)]
pub(crate) struct Failure {
    parked: Rc<RefCell<Option<StreamError>>>,
    running: Rc<Cell<bool>>,
}

impl Failure {
    pub(crate) fn new() -> Self {
        Self {
            parked: Rc::new(RefCell::new(None)),
            running: Rc::new(Cell::new(true)),
        }
    }

    pub(crate) fn record(&self, err: StreamError) {
        if self.running.get() {
            self.parked.borrow_mut().get_or_insert(err);
        } else {
            warn!(error = %err, "inner stream failed after its producer returned");
        }
    }

    pub(crate) fn finish(&self) -> Result<(), StreamError> {
        self.running.set(false);
        self.parked.borrow_mut().take().map_or(Ok(()), Err)
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").field("state", &self.sink.state()).finish()
    }
}
