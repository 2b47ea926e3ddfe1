use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Stable, opaque key addressing one child entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChildKey(String);

impl ChildKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ChildKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChildKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ChildKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One child entity and the event time of its last accepted write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildEntry {
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

/// Best-known state of one top-level resource and its children.
///
/// Only the reconciler mutates a view. Subscribers receive immutable
/// `Arc<ResourceView>` copies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceView {
    pub resource_id: String,
    /// Top-level fields, without the child collection.
    pub fields: Map<String, Value>,
    /// Children in first-seen order.
    pub children: IndexMap<ChildKey, ChildEntry>,
    /// Timestamp of the last full snapshot applied.
    pub snapshot_at: Option<DateTime<Utc>>,
    /// Bumped on every accepted update.
    pub revision: u64,
    #[serde(skip)]
    pub(crate) field_times: HashMap<String, DateTime<Utc>>,
}

impl ResourceView {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            fields: Map::new(),
            children: IndexMap::new(),
            snapshot_at: None,
            revision: 0,
            field_times: HashMap::new(),
        }
    }

    pub fn child(&self, key: &str) -> Option<&ChildEntry> {
        self.children.get(key)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Whether any update has been applied yet.
    pub fn is_loaded(&self) -> bool {
        self.revision > 0
    }

    /// Event time a top-level field must beat to be overwritten.
    pub(crate) fn field_baseline(&self, name: &str) -> Option<DateTime<Utc>> {
        match (self.field_times.get(name).copied(), self.snapshot_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}
