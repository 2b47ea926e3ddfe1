use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use indexmap::map::Entry;
use serde_json::{Map, Value};

use provisync_api::event::key_string;

use super::view::{ChildEntry, ChildKey};
use crate::config::ResourceLayout;

/// A full resource payload, from REST or a pushed `snapshot` event.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub payload: Value,
    /// Event or envelope time; children without their own time inherit it.
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(payload: Value, timestamp: DateTime<Utc>) -> Self {
        Self { payload, timestamp }
    }
}

/// A snapshot split into top-level fields and keyed children.
#[derive(Debug, Default)]
pub(crate) struct Extracted {
    pub fields: Map<String, Value>,
    pub children: IndexMap<ChildKey, ChildEntry>,
    /// Why each skipped child was skipped.
    pub skipped: Vec<String>,
}

/// Split `payload` according to `layout`.
///
/// The child collection may be an array of objects carrying `key_field`,
/// or an object keyed by child key. Duplicate keys keep the newest entry;
/// on equal timestamps the later item wins.
pub(crate) fn extract(
    layout: &ResourceLayout,
    payload: Value,
    timestamp: DateTime<Utc>,
) -> Result<Extracted, String> {
    let Value::Object(mut fields) = payload else {
        return Err("snapshot payload is not an object".into());
    };

    let mut out = Extracted::default();
    let raw_children = fields.remove(&layout.children_field);

    let items: Vec<(Option<String>, Value)> = match raw_children {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| (item.get(&layout.key_field).and_then(key_string), item))
            .collect(),
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(key, item)| (Some(key), item))
            .collect(),
        Some(_) => {
            return Err(format!(
                "'{}' is neither an array nor an object",
                layout.children_field
            ));
        }
    };

    for (index, (key, data)) in items.into_iter().enumerate() {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            out.skipped
                .push(format!("child #{index} has no usable '{}'", layout.key_field));
            continue;
        };

        let updated_at = child_timestamp(layout, &data).unwrap_or(timestamp);
        let entry = ChildEntry { data, updated_at };

        match out.children.entry(ChildKey::from(key)) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            Entry::Occupied(mut slot) => {
                if entry.updated_at >= slot.get().updated_at {
                    slot.insert(entry);
                }
            }
        }
    }

    out.fields = fields;
    Ok(out)
}

fn child_timestamp(layout: &ResourceLayout, data: &Value) -> Option<DateTime<Utc>> {
    let field = layout.timestamp_field.as_deref()?;
    let raw = data.get(field)?.as_str()?;
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            tracing::debug!(field, raw, error = %e, "child timestamp unparseable, using snapshot time");
            None
        }
    }
}
