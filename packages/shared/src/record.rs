//! The tracked record: the unit of work the pipeline re-harvests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::status::Status;

// ---------------------------------------------------------------------------
// TrackedRecord
// ---------------------------------------------------------------------------

/// A persistent record selected, processed, and updated by the pipeline.
///
/// `status` holds the raw persisted code (see [`Status`]); `fields` is the
/// domain payload as a flat JSON object. Only the reconciler mutates stored
/// records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedRecord {
    /// Unique key. Callers choose the scheme (a URL, a content hash, ...).
    pub id: String,
    /// Raw status code as persisted.
    pub status: i64,
    /// When the record was last written by the reconciler.
    pub edited_at: DateTime<Utc>,
    /// Domain fields, merged on successful harvests.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl TrackedRecord {
    /// A brand-new record: `not_started`, epoch timestamp, so it is
    /// immediately due for processing.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Status::NotStarted.code(),
            edited_at: DateTime::UNIX_EPOCH,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter, handy for seeding and tests.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Typed view of the raw status code, when it matches a known variant.
    pub fn status_kind(&self) -> Option<Status> {
        Status::from_code(self.status)
    }

    /// A string field, if present and a string.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Merge policy
// ---------------------------------------------------------------------------

/// Default per-field merge predicate for single-record reconciliation.
///
/// Blank extracted values must not clobber data already on the record, so
/// `null`, empty strings, numeric zero, and empty containers are rejected.
/// Booleans are the exception: `false` is meaningful and always merges.
/// Harvesters whose schema has legitimate zero or empty values override
/// the predicate on the trait instead.
pub fn default_mergeable(_field: &str, value: &Value) -> bool {
    match value {
        Value::Bool(_) => true,
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_record_is_immediately_due() {
        let rec = TrackedRecord::new("https://example.com/a");
        assert_eq!(rec.status, 0);
        assert_eq!(rec.status_kind(), Some(Status::NotStarted));
        assert_eq!(rec.edited_at, DateTime::UNIX_EPOCH);
        assert!(rec.fields.is_empty());
    }

    #[test]
    fn with_field_builder() {
        let rec = TrackedRecord::new("k")
            .with_field("title", json!("Hello"))
            .with_field("views", json!(7));
        assert_eq!(rec.str_field("title"), Some("Hello"));
        assert_eq!(rec.fields.get("views"), Some(&json!(7)));
        assert_eq!(rec.str_field("views"), None);
    }

    #[test]
    fn booleans_always_merge() {
        assert!(default_mergeable("flag", &json!(true)));
        assert!(default_mergeable("flag", &json!(false)));
    }

    #[test]
    fn blank_values_do_not_merge() {
        assert!(!default_mergeable("f", &json!(null)));
        assert!(!default_mergeable("f", &json!("")));
        assert!(!default_mergeable("f", &json!(0)));
        assert!(!default_mergeable("f", &json!(0.0)));
        assert!(!default_mergeable("f", &json!([])));
        assert!(!default_mergeable("f", &json!({})));
    }

    #[test]
    fn substantive_values_merge() {
        assert!(default_mergeable("f", &json!("x")));
        assert!(default_mergeable("f", &json!(-3)));
        assert!(default_mergeable("f", &json!(0.5)));
        assert!(default_mergeable("f", &json!(["a"])));
        assert!(default_mergeable("f", &json!({"k": 1})));
    }

    #[test]
    fn record_json_roundtrip() {
        let rec = TrackedRecord::new("id-1").with_field("a", json!("v"));
        let json = serde_json::to_string(&rec).expect("serialize");
        let parsed: TrackedRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.id, "id-1");
        assert_eq!(parsed.str_field("a"), Some("v"));
    }
}
