//! Error types for actiontree.
//!
//! All errors are strongly typed using thiserror. Reasons carried by the
//! reactive primitive are dynamic JSON values, mirroring the payloads that
//! flow through actions.

use serde_json::Value;
use thiserror::Error;

use crate::action::ActionId;

/// Errors raised by the Observable/Subject primitive.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    /// A producer failed synchronously.
    #[error("Producer raised: {0}")]
    Raised(Value),

    /// An error was delivered to a subscription without an error handler.
    #[error("Unhandled stream error: {0}")]
    Unhandled(Value),

    /// A producer attempted a second terminal error. Never swallowed.
    #[error("Stream already settled, refusing error: {0}")]
    Violation(Value),

    #[error("Unable to subscribe via {value}")]
    InvalidObserver {
        value: String,
    },

    #[error("{value} is not a function")]
    InvalidCleanup {
        value: String,
    },
}

impl StreamError {
    /// The reason carried by this error, if it carries one.
    #[must_use]
    pub fn reason(&self) -> Option<&Value> {
        match self {
            Self::Raised(reason) | Self::Unhandled(reason) | Self::Violation(reason) => Some(reason),
            Self::InvalidObserver { .. } | Self::InvalidCleanup { .. } => None,
        }
    }

    /// Returns true for double-terminal producer bugs.
    #[must_use]
    pub const fn is_violation(&self) -> bool {
        matches!(self, Self::Violation(_))
    }
}

impl From<Value> for StreamError {
    fn from(reason: Value) -> Self {
        Self::Raised(reason)
    }
}

impl From<&str> for StreamError {
    fn from(reason: &str) -> Self {
        Self::Raised(Value::String(reason.to_string()))
    }
}

/// Errors raised while navigating or mutating the action tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("Action {id} has been archived")]
    Archived {
        id: ActionId,
    },

    #[error("Action {id} does not belong to this history")]
    NotInHistory {
        id: ActionId,
    },
}

/// Errors raised by the store and its domain engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Can not add domain to root level")]
    InvalidDomainKey,

    #[error("Domain '{key}' is already registered")]
    DuplicateDomain {
        key: String,
    },

    #[error("Expected a plain object for options, got {value}")]
    InvalidOptions {
        value: Value,
    },

    #[error("Unable to parse serialized state: {message}")]
    Malformed {
        message: String,
    },
}

/// Top-level error type for actiontree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionTreeError {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ActionTreeError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a stream error.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Returns true if this is a history error.
    #[must_use]
    pub const fn is_history(&self) -> bool {
        matches!(self, Self::History(_))
    }

    /// Returns true if this is a store error.
    #[must_use]
    pub const fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    /// Returns true if a producer broke the single-terminal contract.
    #[must_use]
    pub const fn is_violation(&self) -> bool {
        matches!(self, Self::Stream(StreamError::Violation(_)))
    }
}

/// Result type alias for actiontree operations.
pub type ActionTreeResult<T> = Result<T, ActionTreeError>;
