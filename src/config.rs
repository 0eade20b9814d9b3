//! Configuration for histories and stores.
//!
//! Both config types deserialize from JSON with every field optional, so a
//! partial document only overrides what it names.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// History settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Branch length past which the oldest action is archived.
    pub limit: usize,
}

/// Store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// History limit for the store's own History.
    pub max_history: usize,
    /// Repo-level options handed to every domain and effect.
    pub options: Value,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_history: 0,
            options: Value::Object(Map::new()),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.max_history = max_history;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    /// Parse from a JSON document.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub(crate) fn history(&self) -> HistoryConfig {
        HistoryConfig {
            limit: self.max_history,
        }
    }
}

/// Shallow-merge plain JSON objects; later sources win. `null` sources are skipped.
pub fn merge_options<'a>(sources: impl IntoIterator<Item = &'a Value>) -> Result<Value, StoreError> {
    let mut merged = Map::new();
    for source in sources {
        match source {
            Value::Null => {}
            Value::Object(map) => {
                for (key, value) in map {
                    merged.insert(key.clone(), value.clone());
                }
            }
            other => {
                return Err(StoreError::InvalidOptions {
                    value: other.clone(),
                })
            }
        }
    }
    Ok(Value::Object(merged))
}
