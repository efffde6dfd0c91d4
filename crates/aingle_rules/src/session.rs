//! Per-ruleset session state.
//!
//! Facts are append-only and cannot express "not yet done", so actions keep
//! cross-firing decisions here. The usual idiom is a one-shot flag: a setup
//! rule sets `deadline_unset = true`, and the first guarded rule that acts
//! flips it to `false` so later firings decline.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A ruleset's mutable scratchpad, independent of its facts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState {
    values: IndexMap<String, Value>,
}

impl SessionState {
    /// Creates an empty session state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Sets `key`, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key.into(), value.into())
    }

    /// Removes `key`, returning the value it held.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.shift_remove(key)
    }

    /// Whether `key` holds a value.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// `true` only if `key` holds `Boolean(true)`. Absent keys read as unset.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(Value::Boolean(true)))
    }

    /// Entries in first-write order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Removes every key.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}
