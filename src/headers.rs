//! A case-insensitive, order-preserving header/query map.
//!
//! Header names are stored exactly as received (so re-serializing an event
//! reproduces the original casing) but looked up case-insensitively.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderMap {
    /// Insertion-ordered `(original-name, value)` pairs.
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from an iterator of (name, value) pairs, first value
    /// wins per-name on lookup but all pairs are retained for iteration.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = Self::new();
        for (k, v) in pairs {
            map.entries.push((k.into(), v.into()));
        }
        map
    }

    /// Inserts a header, keeping prior values for this name (first-value
    /// lookup semantics still return the earliest insertion).
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replaces all values for `name` with a single new value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(&name));
        self.entries.push((name, value.into()));
    }

    /// Case-insensitive lookup of the first value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collapses to a plain string→string map, first value per name wins,
    /// matching the `QueryStringParameters` shape API Gateway sends.
    pub fn to_first_value_map(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        for (k, v) in &self.entries {
            out.entry(k.clone()).or_insert_with(|| v.clone());
        }
        out
    }
}

impl FromIterator<(String, String)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
