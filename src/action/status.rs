//! Action identity, status vocabulary and metadata.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::history::RepoId;

/// Stable handle for an action within its History.
///
/// Ids are issued monotonically and never reused, so a handle to an archived
/// action stays invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(u64);

impl ActionId {
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Action lifecycle.
///
/// `Inactive → Open → Update* → {Done | Error | Cancel}`; terminal statuses
/// accept no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Inactive,
    Open,
    Update,
    Done,
    Error,
    Cancel,
}

impl Status {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Inactive,
        Self::Open,
        Self::Update,
        Self::Done,
        Self::Error,
        Self::Cancel,
    ];

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancel)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Open => "open",
            Self::Update => "update",
            Self::Done => "done",
            Self::Error => "error",
            Self::Cancel => "cancel",
        }
    }

    /// Whether moving from `self` to `to` respects the lifecycle order.
    #[must_use]
    pub const fn accepts(self, to: Self) -> bool {
        match (self, to) {
            (from, _) if from.is_terminal() => false,
            (_, Self::Inactive) => false,
            (Self::Inactive, _) => true,
            (_, Self::Open) => false,
            _ => true,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action metadata passed to handlers alongside the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// The repo that pushed the action, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<RepoId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Meta {
    #[must_use]
    pub fn new(origin: Option<RepoId>) -> Self {
        let now = Utc::now();
        Self {
            origin,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<Status> = Status::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![Status::Done, Status::Error, Status::Cancel]);
    }

    #[test]
    fn test_transition_order() {
        assert!(Status::Inactive.accepts(Status::Open));
        assert!(Status::Inactive.accepts(Status::Done));
        assert!(Status::Open.accepts(Status::Update));
        assert!(Status::Update.accepts(Status::Update));
        assert!(Status::Update.accepts(Status::Cancel));
        assert!(!Status::Update.accepts(Status::Open));
        assert!(!Status::Open.accepts(Status::Inactive));
        assert!(!Status::Done.accepts(Status::Error));
        assert!(!Status::Cancel.accepts(Status::Done));
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&Status::Cancel).unwrap();
        assert_eq!(json, "\"cancel\"");
        let back: Status = serde_json::from_str("\"update\"").unwrap();
        assert_eq!(back, Status::Update);
    }

    #[test]
    fn test_meta_touch_moves_forward() {
        let mut meta = Meta::new(None);
        let created = meta.created_at;
        meta.touch();
        assert!(meta.updated_at >= created);
        assert!(meta.origin.is_none());
    }
}
