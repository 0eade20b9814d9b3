//! Actions: tree nodes that are also reactive streams.
//!
//! An action's observer capability is its public mutation interface:
//! `open`/`update` deliver values, `resolve`/`complete` finish with `done`,
//! `reject` fails with `error`, and `cancel` abandons it. Every accepted
//! transition first asks the owning History to reconcile, then notifies the
//! action's own subscribers, so subscribers observe already-folded state.

mod status;

pub use status::{ActionId, Meta, Status};

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::{trace, warn};

use crate::error::StreamError;
use crate::history::{History, HistoryShared, RepoId};
use crate::observable::{Observable, Observer, Subject, Subscribe, Subscription};
use crate::tag::ActionType;

/// Handle to one action. Clones share state.
#[derive(Clone)]
pub struct Action {
    inner: Rc<ActionInner>,
}

struct ActionInner {
    id: ActionId,
    command: ActionType,
    status: Cell<Status>,
    payload: RefCell<Value>,
    meta: RefCell<Meta>,
    disabled: Cell<bool>,
    archived: Cell<bool>,
    subject: Subject,
    upstream: RefCell<Option<Subscription>>,
    history: Weak<HistoryShared>,
}

impl Action {
    pub(crate) fn new(
        id: ActionId,
        command: ActionType,
        origin: Option<RepoId>,
        history: Weak<HistoryShared>,
    ) -> Self {
        Self {
            inner: Rc::new(ActionInner {
                id,
                command,
                status: Cell::new(Status::Inactive),
                payload: RefCell::new(Value::Null),
                meta: RefCell::new(Meta::new(origin)),
                disabled: Cell::new(false),
                archived: Cell::new(false),
                subject: Subject::new(),
                upstream: RefCell::new(None),
                history,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> ActionId {
        self.inner.id
    }

    /// The resolved type, or `None` while the action is disabled.
    #[must_use]
    pub fn ty(&self) -> Option<ActionType> {
        (!self.inner.disabled.get()).then(|| self.inner.command.clone())
    }

    /// The type the action was created with, regardless of toggling.
    #[must_use]
    pub fn command(&self) -> &ActionType {
        &self.inner.command
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.status.get()
    }

    #[must_use]
    pub fn is(&self, status: Status) -> bool {
        self.status() == status
    }

    #[must_use]
    pub fn payload(&self) -> Value {
        self.inner.payload.borrow().clone()
    }

    #[must_use]
    pub fn meta(&self) -> Meta {
        self.inner.meta.borrow().clone()
    }

    #[must_use]
    pub fn origin(&self) -> Option<RepoId> {
        self.inner.meta.borrow().origin
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.is(Status::Done)
    }

    /// Terminal and never in need of recomputation; gates focus advancement.
    #[must_use]
    pub fn is_disposable(&self) -> bool {
        self.is_terminal()
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.get()
    }

    /// True once the owning History has torn this action down.
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.inner.archived.get()
    }

    /// The History that owns this action, while it is alive.
    #[must_use]
    pub fn history(&self) -> Option<History> {
        self.inner.history.upgrade().map(History::from_shared)
    }

    pub(crate) fn belongs_to(&self, shared: &Rc<HistoryShared>) -> bool {
        std::ptr::eq(self.inner.history.as_ptr(), Rc::as_ptr(shared))
    }

    pub fn subscribe(&self, observer: impl Into<Subscribe>) -> Result<Subscription, StreamError> {
        self.inner.subject.subscribe(observer)
    }

    /// Move to `open`. Only valid from `inactive`.
    pub fn open(&self, payload: impl Into<Value>) {
        let payload = payload.into();
        if self.advance(Status::Open, Some(payload.clone())) {
            self.reconcile();
            self.inner.subject.next(payload);
        }
    }

    /// Deliver an intermediate value.
    pub fn update(&self, payload: impl Into<Value>) {
        let payload = payload.into();
        if self.advance(Status::Update, Some(payload.clone())) {
            self.reconcile();
            self.inner.subject.next(payload);
        }
    }

    /// Finish with `done` and a payload.
    pub fn resolve(&self, payload: impl Into<Value>) {
        let payload = payload.into();
        if self.advance(Status::Done, Some(payload.clone())) {
            self.release_upstream();
            self.reconcile();
            self.inner.subject.complete_with(payload);
        }
    }

    /// Finish with `done`, keeping the current payload.
    pub fn complete(&self) {
        if self.advance(Status::Done, None) {
            self.release_upstream();
            self.reconcile();
            self.inner.subject.complete_with(self.payload());
        }
    }

    /// Fail with `error`.
    ///
    /// A second terminal error is a producer bug and is returned as
    /// `Violation`; an error after cancellation is ignored.
    pub fn reject(&self, reason: impl Into<Value>) -> Result<(), StreamError> {
        let reason = reason.into();
        match self.status() {
            Status::Done | Status::Error => return Err(StreamError::Violation(reason)),
            Status::Cancel => return Ok(()),
            _ => {}
        }
        if !self.advance(Status::Error, Some(reason.clone())) {
            return Ok(());
        }
        self.release_upstream();
        self.reconcile();
        self.inner.subject.error(reason)
    }

    /// Abandon the action and its underlying behavior. No-op once terminal.
    pub fn cancel(&self, reason: impl Into<Value>) {
        let reason = reason.into();
        if !self.advance(Status::Cancel, Some(reason.clone())) {
            return;
        }
        let upstream = self.inner.upstream.borrow_mut().take();
        if let Some(upstream) = upstream {
            upstream.cancel(reason.clone());
        }
        self.reconcile();
        self.inner.subject.cancel(reason);
    }

    /// Disable or re-enable the action and recompute state.
    pub fn toggle(&self) {
        self.inner.disabled.set(!self.inner.disabled.get());
        if let Some(history) = self.history() {
            history.invalidate();
        }
    }

    /// An observer that drives this action.
    #[must_use]
    pub fn observer(&self) -> Observer {
        let next = self.clone();
        let complete = self.clone();
        let error = self.clone();
        let cancel = self.clone();
        Observer::new()
            .on_next(move |v| next.update(v.clone()))
            .on_complete(move |v| match v {
                Some(v) => complete.resolve(v.clone()),
                None => complete.complete(),
            })
            .on_error(move |r| {
                if let Err(violation) = error.reject(r.clone()) {
                    warn!(
                        action = %error.id(),
                        error = %violation,
                        "upstream failed after the action settled"
                    );
                }
            })
            .on_cancel(move |r| cancel.cancel(r.clone()))
    }

    /// Open the action and let `source` drive it to completion.
    pub fn follow(&self, source: &Observable) -> Result<(), StreamError> {
        self.open(Value::Null);
        let subscription = source.subscribe(self.observer())?;
        if !self.is_terminal() {
            *self.inner.upstream.borrow_mut() = Some(subscription);
        }
        Ok(())
    }

    pub fn on_open(&self, f: impl Fn(&Value) + 'static) -> Result<Subscription, StreamError> {
        let action = self.clone();
        self.subscribe(Observer::new().on_next(move |v| {
            if action.is(Status::Open) {
                f(v);
            }
        }))
    }

    pub fn on_update(&self, f: impl Fn(&Value) + 'static) -> Result<Subscription, StreamError> {
        let action = self.clone();
        self.subscribe(Observer::new().on_next(move |v| {
            if action.is(Status::Update) {
                f(v);
            }
        }))
    }

    pub fn on_done(&self, f: impl Fn(&Value) + 'static) -> Result<Subscription, StreamError> {
        self.subscribe(Observer::new().on_complete(move |v| f(v.unwrap_or(&Value::Null))))
    }

    pub fn on_error(&self, f: impl Fn(&Value) + 'static) -> Result<Subscription, StreamError> {
        self.subscribe(Observer::new().on_error(f))
    }

    pub fn on_cancel(&self, f: impl Fn(&Value) + 'static) -> Result<Subscription, StreamError> {
        self.subscribe(Observer::new().on_cancel(f))
    }

    /// Release everything held for this action. Called when it is archived.
    pub(crate) fn teardown(&self) {
        if self.inner.archived.replace(true) {
            return;
        }
        let upstream = self.inner.upstream.borrow_mut().take();
        if let Some(upstream) = upstream {
            upstream.unsubscribe();
        }
        trace!(action = %self.id(), "action torn down");
    }

    fn advance(&self, to: Status, payload: Option<Value>) -> bool {
        let from = self.status();
        if self.is_archived() || !from.accepts(to) {
            return false;
        }
        self.inner.status.set(to);
        if let Some(payload) = payload {
            *self.inner.payload.borrow_mut() = payload;
        }
        self.inner.meta.borrow_mut().touch();
        trace!(action = %self.id(), from = %from, to = %to, "action transition");
        true
    }

    fn release_upstream(&self) {
        self.inner.upstream.borrow_mut().take();
    }

    fn reconcile(&self) {
        if let Some(history) = self.history() {
            history.reconcile(Some(self));
        }
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Action {}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.inner.id)
            .field("type", &self.inner.command)
            .field("status", &self.status())
            .field("payload", &self.inner.payload.borrow())
            .field("disabled", &self.inner.disabled.get())
            .field("archived", &self.inner.archived.get())
            .finish()
    }
}
