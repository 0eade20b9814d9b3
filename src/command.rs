//! Behaviors a store can push.
//!
//! A behavior is either a bare [`ActionType`], which completes at once with
//! its first argument, or a [`Command`]: a tagged callable whose [`Outcome`]
//! decides how the resulting action settles.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::action::Action;
use crate::observable::{Deferred, Observable};
use crate::store::Store;
use crate::tag::{ActionType, Tagger};

/// Deferred work that drives its action by hand.
pub type Thunk = Box<dyn FnOnce(&Action, &Store) -> Option<Value>>;

/// What a command produced.
pub enum Outcome {
    /// Complete with this payload.
    Value(Value),
    /// Open, update per value, then complete or fail with the stream.
    Stream(Observable),
    /// Open, then settle when the deferred does.
    Deferred(Deferred),
    /// Called once with the action and the store. `Some` completes the
    /// action with that payload; `None` leaves the action to the thunk.
    Thunk(Thunk),
    /// Fail with this reason.
    Fail(Value),
}

impl Outcome {
    pub fn thunk(f: impl FnOnce(&Action, &Store) -> Option<Value> + 'static) -> Self {
        Self::Thunk(Box::new(f))
    }
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Observable> for Outcome {
    fn from(stream: Observable) -> Self {
        Self::Stream(stream)
    }
}

impl From<Deferred> for Outcome {
    fn from(deferred: Deferred) -> Self {
        Self::Deferred(deferred)
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Stream(_) => f.write_str("Stream"),
            Self::Deferred(_) => f.write_str("Deferred"),
            Self::Thunk(_) => f.write_str("Thunk"),
            Self::Fail(r) => f.debug_tuple("Fail").field(r).finish(),
        }
    }
}

type Run = Rc<dyn Fn(&[Value]) -> Outcome>;

/// A tagged callable. Clones share the tag, so registries keyed on a
/// command's type match every clone.
#[derive(Clone)]
pub struct Command {
    ty: ActionType,
    run: Run,
}

impl Command {
    /// Tag `f` with a fresh `{name}-{n}` type from `tagger`.
    pub fn new(tagger: &Tagger, name: &str, f: impl Fn(&[Value]) -> Outcome + 'static) -> Self {
        Self::tagged(tagger.tag(Some(name)), f)
    }

    /// Use an explicit type.
    pub fn tagged(ty: impl Into<ActionType>, f: impl Fn(&[Value]) -> Outcome + 'static) -> Self {
        Self {
            ty: ty.into(),
            run: Rc::new(f),
        }
    }

    #[must_use]
    pub fn ty(&self) -> &ActionType {
        &self.ty
    }

    #[must_use]
    pub fn call(&self, args: &[Value]) -> Outcome {
        (self.run)(args)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command").field("ty", &self.ty).finish_non_exhaustive()
    }
}

impl From<&Command> for ActionType {
    fn from(command: &Command) -> Self {
        command.ty.clone()
    }
}

/// Anything a store can push.
#[derive(Debug, Clone)]
pub enum Behavior {
    Type(ActionType),
    Command(Command),
}

impl Behavior {
    #[must_use]
    pub fn ty(&self) -> &ActionType {
        match self {
            Self::Type(ty) => ty,
            Self::Command(command) => command.ty(),
        }
    }
}

impl From<ActionType> for Behavior {
    fn from(ty: ActionType) -> Self {
        Self::Type(ty)
    }
}

impl From<&str> for Behavior {
    fn from(ty: &str) -> Self {
        Self::Type(ActionType::new(ty))
    }
}

impl From<Command> for Behavior {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

impl From<&Command> for Behavior {
    fn from(command: &Command) -> Self {
        Self::Command(command.clone())
    }
}
