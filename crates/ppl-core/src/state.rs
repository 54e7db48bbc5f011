//! Execution state carried through suspension points.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Positional identifier for one random-choice or factor site.
///
/// Addresses are produced by the program rewriting step and are stable across
/// re-executions that follow the same control path. They are plain strings
/// built by appending site labels, e.g. `_3_7`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Returns the empty root address.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Creates an address from its raw string representation.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Derives the address of a nested site.
    pub fn child(&self, site: impl Display) -> Self {
        Self(format!("{}_{}", self.0, site))
    }

    /// Returns the raw string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Snapshot of all mutable program-visible state at a suspension point.
///
/// The store is a value type: cloning it yields an independent deep copy, so
/// forked particles and proposals never alias each other's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Store {
    slots: BTreeMap<String, Value>,
}

impl Store {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value bound to `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.slots.get(key)
    }

    /// Binds `key` to `value`, returning the previous binding.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.slots.insert(key.into(), value)
    }

    /// Builder-style variant of [`Store::insert`].
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    /// Removes the binding for `key`.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.slots.remove(key)
    }

    /// Number of bound slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store has no bindings.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
