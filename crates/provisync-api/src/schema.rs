// ── Business-schema validation for success payloads ──
//
// The envelope codec keeps payloads opaque. Callers that know the shape of
// a resource type plug a `PayloadSchema` in here; fields that violate it are
// stripped and reported instead of discarding the whole payload.

use serde::Serialize;
use serde_json::Value;

/// One field that did not match the caller's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaWarning {
    /// JSON pointer to the offending field (e.g. `/devices/2/serial`).
    pub pointer: String,
    pub reason: String,
}

/// A payload after validation: what survived plus what was wrong.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub value: Value,
    pub warnings: Vec<SchemaWarning>,
}

impl Validated {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Caller-supplied business schema for one resource type.
pub trait PayloadSchema: Send + Sync {
    /// List every violation in `payload`. An empty list means it conforms.
    ///
    /// A warning whose pointer is empty (`""`) condemns the whole payload.
    fn check(&self, payload: &Value) -> Vec<SchemaWarning>;
}

/// Apply `schema` to `payload`, removing every field it flags.
///
/// A warning pointing at the root leaves the payload as-is: there is no
/// partial value to fall back to, and the caller still gets the warning.
pub fn validate(payload: Value, schema: &dyn PayloadSchema) -> Validated {
    let warnings = schema.check(&payload);
    let mut value = payload;

    for warning in &warnings {
        tracing::warn!(pointer = %warning.pointer, reason = %warning.reason, "payload schema violation");
        if !warning.pointer.is_empty() {
            remove_pointer(&mut value, &warning.pointer);
        }
    }

    Validated { value, warnings }
}

/// Remove the value at a JSON pointer. Missing paths are ignored.
fn remove_pointer(value: &mut Value, pointer: &str) {
    let Some((parent, last)) = pointer.rsplit_once('/') else {
        return;
    };
    let key = unescape(last);
    let target = if parent.is_empty() {
        Some(value)
    } else {
        value.pointer_mut(parent)
    };
    match target {
        Some(Value::Object(map)) => {
            map.remove(&key);
        }
        Some(Value::Array(items)) => {
            // Replace rather than remove so sibling indices stay valid.
            if let Some(slot) = key.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                *slot = Value::Null;
            }
        }
        _ => {}
    }
}

fn unescape(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

// ── Declarative schema ───────────────────────────────────────────────

/// Expected JSON kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldRule {
    name: String,
    kind: FieldKind,
    required: bool,
}

/// Flat object schema: named top-level fields with an expected kind.
///
/// Fields not mentioned are allowed. `null` counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSchema {
    rules: Vec<FieldRule>,
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.rules.push(FieldRule {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.rules.push(FieldRule {
            name: name.into(),
            kind,
            required: false,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl PayloadSchema for FieldSchema {
    fn check(&self, payload: &Value) -> Vec<SchemaWarning> {
        let Some(obj) = payload.as_object() else {
            return vec![SchemaWarning {
                pointer: String::new(),
                reason: "payload is not an object".into(),
            }];
        };

        let mut warnings = Vec::new();
        for rule in &self.rules {
            let pointer = format!("/{}", escape(&rule.name));
            match obj.get(&rule.name) {
                None | Some(Value::Null) if rule.required => warnings.push(SchemaWarning {
                    pointer,
                    reason: "required field is missing".into(),
                }),
                None | Some(Value::Null) => {}
                Some(value) if !rule.kind.matches(value) => warnings.push(SchemaWarning {
                    pointer,
                    reason: format!("expected {:?}", rule.kind).to_lowercase(),
                }),
                Some(_) => {}
            }
        }
        warnings
    }
}
