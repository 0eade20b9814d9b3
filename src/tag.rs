//! Action type tags.
//!
//! Every command gets a stable string key so registries can look up handlers
//! by type equality. Keys are issued by an injectable [`Tagger`] rather than a
//! process-wide counter, which lets tests seed and reset numbering.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

const FALLBACK: &str = "_action";

/// Stable identifier for an action type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionType(Rc<str>);

impl ActionType {
    /// Wrap a pre-tagged identifier.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Rc::from(name))
    }

    /// The string form of this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for types reserved for store lifecycle actions.
    #[must_use]
    pub fn is_lifecycle(&self) -> bool {
        self.0.starts_with('$')
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ActionType {
    fn from(name: String) -> Self {
        Self(Rc::from(name))
    }
}

/// Issues unique action type tags of the form `{name}-{n}`.
///
/// Clones share one counter.
#[derive(Debug, Clone, Default)]
pub struct Tagger {
    next: Rc<Cell<u64>>,
}

impl Tagger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering at `seed`.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            next: Rc::new(Cell::new(seed)),
        }
    }

    /// Issue a fresh tag. An empty or missing name falls back to `_action`.
    pub fn tag(&self, name: Option<&str>) -> ActionType {
        let uid = self.next.get();
        self.next.set(uid + 1);

        let name = name.filter(|n| !n.is_empty()).unwrap_or(FALLBACK);
        ActionType::from(format!("{name}-{uid}"))
    }

    /// Restart numbering from zero.
    pub fn reset(&self) {
        self.next.set(0);
    }
}
