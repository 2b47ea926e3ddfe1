// ── State reconciler ──
//
// Folds snapshots and partial stream events for one resource into a single
// `ResourceView`. Child upserts and top-level field merges follow
// last-write-wins by event time: an update must be strictly newer than what
// it replaces, regardless of arrival order.

use std::sync::Arc;

use provisync_api::schema::validate;
use provisync_api::{EventKind, PayloadSchema, StreamEvent};
use serde_json::{Map, Value};

use crate::config::ResourceLayout;
use crate::diagnostics::{Counter, Diagnostics};
use crate::model::snapshot::extract;
use crate::model::{ChildEntry, ChildKey, ResourceView, Snapshot};

/// Input to [`Reconciler::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Full replacement (REST poll or initial load).
    Snapshot(Snapshot),
    /// Decoded push event.
    Event(StreamEvent),
}

/// Why an update left the view untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum IgnoreReason {
    Heartbeat,
    UnknownKind,
    ForeignResource,
}

/// What [`Reconciler::apply`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Whole view replaced by a snapshot.
    Replaced { children: usize, skipped: usize },
    ChildInserted(ChildKey),
    ChildReplaced(ChildKey),
    /// `applied` fields written, `stale` fields rejected.
    FieldsMerged { applied: usize, stale: usize },
    /// Not strictly newer than the stored state.
    Stale,
    Ignored(IgnoreReason),
    /// Payload could not be interpreted as a snapshot.
    Invalid(String),
}

impl ApplyOutcome {
    /// Whether the view changed.
    pub fn is_accepted(&self) -> bool {
        match self {
            Self::Replaced { .. } | Self::ChildInserted(_) | Self::ChildReplaced(_) => true,
            Self::FieldsMerged { applied, .. } => *applied > 0,
            Self::Stale | Self::Ignored(_) | Self::Invalid(_) => false,
        }
    }
}

/// Merge rules for one resource.
#[derive(Clone)]
pub struct Reconciler {
    layout: ResourceLayout,
    schema: Option<Arc<dyn PayloadSchema>>,
    child_schema: Option<Arc<dyn PayloadSchema>>,
    null_removes_field: bool,
    diagnostics: Arc<Diagnostics>,
}

impl Reconciler {
    pub fn new(layout: ResourceLayout, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            layout,
            schema: None,
            child_schema: None,
            null_removes_field: true,
            diagnostics,
        }
    }

    pub fn with_schema(mut self, schema: Option<Arc<dyn PayloadSchema>>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_child_schema(mut self, schema: Option<Arc<dyn PayloadSchema>>) -> Self {
        self.child_schema = schema;
        self
    }

    pub fn with_null_removes_field(mut self, enabled: bool) -> Self {
        self.null_removes_field = enabled;
        self
    }

    /// Apply one update to `view`.
    pub fn apply(&self, view: &mut ResourceView, update: Update) -> ApplyOutcome {
        let outcome = match update {
            Update::Snapshot(snapshot) => self.replace(view, snapshot),
            Update::Event(event) => self.apply_event(view, event),
        };
        if outcome.is_accepted() {
            view.revision += 1;
        }
        outcome
    }

    fn apply_event(&self, view: &mut ResourceView, event: StreamEvent) -> ApplyOutcome {
        if let Some(ref target) = event.resource_id {
            if *target != view.resource_id {
                tracing::debug!(
                    event_resource = %target,
                    resource = %view.resource_id,
                    kind = event.kind.name(),
                    "ignoring event for another resource"
                );
                self.diagnostics.record(Counter::ForeignEvents);
                return ApplyOutcome::Ignored(IgnoreReason::ForeignResource);
            }
        }

        let timestamp = event.timestamp;
        match event.kind {
            EventKind::Snapshot { payload } => self.replace(view, Snapshot::new(payload, timestamp)),
            EventKind::ChildChanged { key, data } => {
                self.upsert_child(view, ChildKey::from(key), data, timestamp)
            }
            EventKind::ResourceChanged { fields } => self.merge_fields(view, fields, timestamp),
            EventKind::Heartbeat => ApplyOutcome::Ignored(IgnoreReason::Heartbeat),
            EventKind::Unknown { kind, .. } => {
                tracing::debug!(kind = %kind, "ignoring unknown event kind");
                self.diagnostics.record(Counter::UnknownEvents);
                ApplyOutcome::Ignored(IgnoreReason::UnknownKind)
            }
        }
    }

    // ── Full snapshot ────────────────────────────────────────────────

    fn replace(&self, view: &mut ResourceView, snapshot: Snapshot) -> ApplyOutcome {
        let payload = self.check(self.schema.as_deref(), snapshot.payload);

        let extracted = match extract(&self.layout, payload, snapshot.timestamp) {
            Ok(extracted) => extracted,
            Err(reason) => {
                tracing::warn!(resource = %view.resource_id, %reason, "snapshot rejected");
                self.diagnostics.record(Counter::SchemaWarnings);
                return ApplyOutcome::Invalid(reason);
            }
        };

        for reason in &extracted.skipped {
            tracing::warn!(resource = %view.resource_id, %reason, "snapshot child skipped");
        }
        let skipped = extracted.skipped.len();
        self.diagnostics
            .add(Counter::SchemaWarnings, u64::try_from(skipped).unwrap_or(u64::MAX));

        let mut children = extracted.children;
        if self.child_schema.is_some() {
            for entry in children.values_mut() {
                let data = std::mem::take(&mut entry.data);
                entry.data = self.check(self.child_schema.as_deref(), data);
            }
        }

        view.fields = extracted.fields;
        view.children = children;
        view.field_times.clear();
        view.snapshot_at = Some(snapshot.timestamp);

        ApplyOutcome::Replaced {
            children: view.children.len(),
            skipped,
        }
    }

    // ── Partial: child changed ───────────────────────────────────────

    fn upsert_child(
        &self,
        view: &mut ResourceView,
        key: ChildKey,
        data: Value,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> ApplyOutcome {
        if let Some(existing) = view.children.get(&key) {
            if timestamp <= existing.updated_at {
                tracing::debug!(
                    key = %key,
                    incoming = %timestamp,
                    stored = %existing.updated_at,
                    "rejecting stale child update"
                );
                self.diagnostics.record(Counter::StaleRejections);
                return ApplyOutcome::Stale;
            }
        }

        let data = self.check(self.child_schema.as_deref(), data);
        let entry = ChildEntry {
            data,
            updated_at: timestamp,
        };
        match view.children.insert(key.clone(), entry) {
            Some(_) => ApplyOutcome::ChildReplaced(key),
            None => ApplyOutcome::ChildInserted(key),
        }
    }

    // ── Partial: resource changed ────────────────────────────────────

    fn merge_fields(
        &self,
        view: &mut ResourceView,
        fields: Map<String, Value>,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> ApplyOutcome {
        let mut applied: usize = 0;
        let mut stale: usize = 0;

        for (name, value) in fields {
            if name == self.layout.children_field {
                tracing::debug!(field = %name, "child collection cannot change through resource.changed");
                continue;
            }
            if view.field_baseline(&name).is_some_and(|base| timestamp <= base) {
                stale += 1;
                continue;
            }
            if value.is_null() && self.null_removes_field {
                view.fields.remove(&name);
            } else {
                view.fields.insert(name.clone(), value);
            }
            view.field_times.insert(name, timestamp);
            applied += 1;
        }

        if stale > 0 {
            tracing::debug!(stale, applied, "rejected stale field updates");
            self.diagnostics
                .add(Counter::StaleRejections, u64::try_from(stale).unwrap_or(u64::MAX));
        }
        if applied == 0 && stale > 0 {
            return ApplyOutcome::Stale;
        }
        ApplyOutcome::FieldsMerged { applied, stale }
    }

    fn check(&self, schema: Option<&dyn PayloadSchema>, payload: Value) -> Value {
        let Some(schema) = schema else {
            return payload;
        };
        let validated = validate(payload, schema);
        if !validated.is_clean() {
            self.diagnostics.add(
                Counter::SchemaWarnings,
                u64::try_from(validated.warnings.len()).unwrap_or(u64::MAX),
            );
        }
        validated.value
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use provisync_api::{FieldKind, FieldSchema};
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_767_225_600 + secs, 0).unwrap()
    }

    fn setup() -> (Reconciler, Arc<Diagnostics>, ResourceView) {
        let diag = Arc::new(Diagnostics::new());
        let reconciler = Reconciler::new(ResourceLayout::default(), Arc::clone(&diag));
        (reconciler, diag, ResourceView::new("sess-1"))
    }

    fn event(kind: EventKind, at: i64) -> Update {
        Update::Event(StreamEvent {
            kind,
            version: 1,
            resource_id: Some("sess-1".into()),
            timestamp: ts(at),
            correlation_id: None,
        })
    }

    fn child(key: &str, state: &str, at: i64) -> Update {
        event(
            EventKind::ChildChanged {
                key: key.into(),
                data: json!({ "state": state }),
            },
            at,
        )
    }

    fn snapshot(payload: Value, at: i64) -> Update {
        Update::Snapshot(Snapshot::new(payload, ts(at)))
    }

    #[test]
    fn snapshot_then_new_child_gives_four_entities() {
        let (r, _, mut view) = setup();
        let outcome = r.apply(
            &mut view,
            snapshot(
                json!({"id": "sess-1", "children": [{"id": "a"}, {"id": "b"}, {"id": "c"}]}),
                0,
            ),
        );
        assert_eq!(outcome, ApplyOutcome::Replaced { children: 3, skipped: 0 });

        let outcome = r.apply(&mut view, child("d", "new", 1));
        assert_eq!(outcome, ApplyOutcome::ChildInserted(ChildKey::from("d")));
        assert_eq!(view.len(), 4);
        assert_eq!(view.revision, 2);
    }

    #[test]
    fn arrival_order_does_not_change_final_state() {
        let updates = vec![child("a", "s1", 1), child("a", "s2", 2), child("b", "x", 3), child("a", "s3", 4)];

        let (r, _, mut in_order) = setup();
        for u in updates.clone() {
            r.apply(&mut in_order, u);
        }

        let permutations = [[3, 2, 1, 0], [1, 3, 0, 2], [2, 0, 3, 1]];
        for order in permutations {
            let (r, _, mut shuffled) = setup();
            for i in order {
                r.apply(&mut shuffled, updates[i].clone());
            }
            assert_eq!(shuffled.children, in_order.children, "order {order:?}");
        }
        assert_eq!(in_order.child("a").unwrap().data, json!({"state": "s3"}));
    }

    #[test]
    fn older_or_equal_child_update_is_rejected() {
        let (r, diag, mut view) = setup();
        r.apply(&mut view, child("a", "current", 10));

        assert_eq!(r.apply(&mut view, child("a", "older", 5)), ApplyOutcome::Stale);
        assert_eq!(r.apply(&mut view, child("a", "same-time", 10)), ApplyOutcome::Stale);
        assert_eq!(view.child("a").unwrap().data, json!({"state": "current"}));
        assert_eq!(diag.snapshot().stale_rejections, 2);
        assert_eq!(view.revision, 1);
    }

    #[test]
    fn child_update_older_than_snapshot_is_rejected() {
        let (r, _, mut view) = setup();
        r.apply(&mut view, snapshot(json!({"children": [{"id": "a", "state": "snap"}]}), 10));
        assert_eq!(r.apply(&mut view, child("a", "late", 9)), ApplyOutcome::Stale);
        assert_eq!(view.child("a").unwrap().data, json!({"id": "a", "state": "snap"}));
    }

    #[test]
    fn snapshot_replaces_wholesale() {
        let (r, _, mut view) = setup();
        r.apply(&mut view, snapshot(json!({"status": "a", "children": [{"id": "x"}, {"id": "y"}]}), 0));
        r.apply(&mut view, child("z", "added", 1));
        r.apply(&mut view, snapshot(json!({"progress": 50, "children": [{"id": "y"}]}), 2));

        assert_eq!(view.fields, json!({"progress": 50}).as_object().unwrap().clone());
        let keys: Vec<&str> = view.children.keys().map(ChildKey::as_str).collect();
        assert_eq!(keys, vec!["y"]);
    }

    #[test]
    fn resource_changed_merges_named_fields_only() {
        let (r, _, mut view) = setup();
        r.apply(
            &mut view,
            snapshot(json!({"status": "pending", "owner": "ops", "children": [{"id": "a"}]}), 0),
        );

        let mut fields = Map::new();
        fields.insert("status".into(), json!("running"));
        fields.insert("owner".into(), Value::Null);
        fields.insert("children".into(), json!([]));
        let outcome = r.apply(&mut view, event(EventKind::ResourceChanged { fields }, 5));

        assert_eq!(outcome, ApplyOutcome::FieldsMerged { applied: 2, stale: 0 });
        assert_eq!(view.fields, json!({"status": "running"}).as_object().unwrap().clone());
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn resource_changed_is_last_write_wins_per_field() {
        let (r, diag, mut view) = setup();
        r.apply(&mut view, snapshot(json!({"status": "pending"}), 10));

        let stale_fields = json!({"status": "ancient"}).as_object().unwrap().clone();
        assert_eq!(
            r.apply(&mut view, event(EventKind::ResourceChanged { fields: stale_fields }, 9)),
            ApplyOutcome::Stale
        );

        let fresh = json!({"status": "running", "progress": 10}).as_object().unwrap().clone();
        r.apply(&mut view, event(EventKind::ResourceChanged { fields: fresh }, 20));
        let mixed = json!({"status": "older", "progress": 20}).as_object().unwrap().clone();
        assert_eq!(
            r.apply(&mut view, event(EventKind::ResourceChanged { fields: mixed }, 15)),
            ApplyOutcome::Stale
        );

        assert_eq!(view.field("status"), Some(&json!("running")));
        assert_eq!(view.field("progress"), Some(&json!(10)));
        assert_eq!(diag.snapshot().stale_rejections, 3);
    }

    #[test]
    fn null_is_stored_when_removal_is_disabled() {
        let (r, _, mut view) = setup();
        let r = r.with_null_removes_field(false);
        let fields = json!({"owner": null}).as_object().unwrap().clone();
        r.apply(&mut view, event(EventKind::ResourceChanged { fields }, 1));
        assert_eq!(view.field("owner"), Some(&Value::Null));
    }

    #[test]
    fn heartbeat_unknown_and_foreign_events_leave_view_untouched() {
        let (r, diag, mut view) = setup();
        r.apply(&mut view, child("a", "s", 1));
        let before = view.clone();

        assert_eq!(
            r.apply(&mut view, event(EventKind::Heartbeat, 2)),
            ApplyOutcome::Ignored(IgnoreReason::Heartbeat)
        );
        assert_eq!(
            r.apply(
                &mut view,
                event(
                    EventKind::Unknown {
                        kind: "session.archived".into(),
                        body: json!({})
                    },
                    3
                )
            ),
            ApplyOutcome::Ignored(IgnoreReason::UnknownKind)
        );
        let foreign = Update::Event(StreamEvent {
            kind: EventKind::ChildChanged {
                key: "a".into(),
                data: json!({}),
            },
            version: 1,
            resource_id: Some("sess-2".into()),
            timestamp: ts(4),
            correlation_id: None,
        });
        assert_eq!(
            r.apply(&mut view, foreign),
            ApplyOutcome::Ignored(IgnoreReason::ForeignResource)
        );

        assert_eq!(view, before);
        let snap = diag.snapshot();
        assert_eq!(snap.unknown_events, 1);
        assert_eq!(snap.foreign_events, 1);
    }

    #[test]
    fn pushed_snapshot_event_replaces_view() {
        let (r, _, mut view) = setup();
        r.apply(&mut view, child("old", "s", 1));
        let outcome = r.apply(
            &mut view,
            event(
                EventKind::Snapshot {
                    payload: json!({"children": [{"id": "n1"}, {"id": "n2"}]}),
                },
                2,
            ),
        );
        assert_eq!(outcome, ApplyOutcome::Replaced { children: 2, skipped: 0 });
        assert!(view.child("old").is_none());
        assert_eq!(view.snapshot_at, Some(ts(2)));
    }

    #[test]
    fn schema_strips_bad_fields_and_counts_warnings() {
        let diag = Arc::new(Diagnostics::new());
        let schema = FieldSchema::new()
            .required("status", FieldKind::String)
            .optional("progress", FieldKind::Number);
        let r = Reconciler::new(ResourceLayout::default(), Arc::clone(&diag))
            .with_schema(Some(Arc::new(schema)));
        let mut view = ResourceView::new("sess-1");

        let outcome = r.apply(
            &mut view,
            snapshot(json!({"status": "running", "progress": "lots", "children": [{"id": "a"}, {}]}), 0),
        );

        assert_eq!(outcome, ApplyOutcome::Replaced { children: 1, skipped: 1 });
        assert_eq!(view.fields, json!({"status": "running"}).as_object().unwrap().clone());
        assert_eq!(diag.snapshot().schema_warnings, 2);
    }

    #[test]
    fn invalid_snapshot_leaves_view_untouched() {
        let (r, diag, mut view) = setup();
        r.apply(&mut view, child("a", "s", 1));
        let outcome = r.apply(&mut view, snapshot(json!("not an object"), 2));
        assert!(matches!(outcome, ApplyOutcome::Invalid(_)));
        assert_eq!(view.len(), 1);
        assert_eq!(diag.snapshot().schema_warnings, 1);
    }
}
