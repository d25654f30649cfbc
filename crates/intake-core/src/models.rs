//! Data models for form state
//!
//! Defines item records, collections and the snapshot that holds them all.
//! The JSON shapes here are the persisted format: records carry camelCase
//! system fields next to their form fields, and the snapshot keeps every
//! collection at the top level beside `_lastSaved` and `_version`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field name to value mapping as supplied by the UI layer
pub type FieldMap = Map<String, Value>;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 2;

/// Field names owned by the cache rather than the form
pub mod system_fields {
    pub const ID: &str = "id";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";

    /// Whether a field name is reserved for system use
    pub fn is_system(name: &str) -> bool {
        matches!(name, ID | CREATED_AT | UPDATED_AT)
    }
}

/// A stored record: form fields plus identity and timestamps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemRecord {
    /// Unique identifier within the collection
    pub id: String,
    /// When this record was first stored
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// When this record was last written
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    /// Form fields
    #[serde(flatten)]
    pub fields: FieldMap,
}

impl ItemRecord {
    /// Create a record with a fresh id and both timestamps set to now
    pub fn new(fields: FieldMap) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), fields)
    }

    /// Create a record with a specific id
    pub fn with_id(id: impl Into<String>, fields: FieldMap) -> Self {
        let now = Utc::now();
        let mut record = Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            fields: FieldMap::new(),
        };
        record.replace_fields(fields);
        record
    }

    /// Get a field value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Get a field value as a string slice
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Replace the form fields, dropping any system fields from the input
    pub fn replace_fields(&mut self, fields: FieldMap) {
        self.fields = fields
            .into_iter()
            .filter(|(name, _)| !system_fields::is_system(name))
            .collect();
    }
}

/// Extract a usable id from a field map, if one was supplied
///
/// Strings are taken as-is (when non-empty); numbers are accepted and
/// rendered in decimal so ids coming from numeric form inputs still match.
pub fn id_from_fields(fields: &FieldMap) -> Option<String> {
    match fields.get(system_fields::ID)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Named group of records keyed by id
pub type Collection = BTreeMap<String, ItemRecord>;

/// The whole persisted form state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Snapshot {
    /// When this snapshot was last saved
    #[serde(rename = "_lastSaved", default, skip_serializing_if = "Option::is_none")]
    pub last_saved: Option<DateTime<Utc>>,
    /// Format version
    #[serde(rename = "_version", default)]
    pub version: u32,
    /// All collections, keyed by name
    #[serde(flatten)]
    pub collections: BTreeMap<String, Collection>,
}

impl Snapshot {
    /// Create an empty snapshot at the current version
    pub fn new() -> Self {
        Self {
            last_saved: None,
            version: SNAPSHOT_VERSION,
            collections: BTreeMap::new(),
        }
    }

    /// Number of items per collection
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.collections
            .iter()
            .map(|(name, items)| (name.clone(), items.len()))
            .collect()
    }

    /// Total number of items across all collections
    pub fn total_items(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    /// Name of the collection holding the most items
    pub fn largest_collection(&self) -> Option<&str> {
        self.collections
            .iter()
            .filter(|(_, items)| !items.is_empty())
            .max_by_key(|(_, items)| items.len())
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> FieldMap {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_record_new_generates_id_and_timestamps() {
        let record = ItemRecord::new(fields(json!({"nome": "Maria"})));
        assert!(Uuid::parse_str(&record.id).is_ok());
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(record.get_str("nome"), Some("Maria"));
    }

    #[test]
    fn test_record_strips_system_fields_from_input() {
        let record = ItemRecord::with_id(
            "abc",
            fields(json!({
                "id": "other",
                "createdAt": "1999-01-01T00:00:00Z",
                "cpf": "12345678901"
            })),
        );
        assert_eq!(record.id, "abc");
        assert!(record.get("createdAt").is_none());
        assert!(record.get("id").is_none());
        assert_eq!(record.get_str("cpf"), Some("12345678901"));
    }

    #[test]
    fn test_record_json_shape() {
        let record = ItemRecord::with_id("abc", fields(json!({"cpf": "12345678901"})));
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["id"], "abc");
        assert_eq!(value["cpf"], "12345678901");
        assert!(value["createdAt"].is_string());
        assert!(value["updatedAt"].is_string());
    }

    #[test]
    fn test_id_from_fields() {
        assert_eq!(id_from_fields(&fields(json!({"id": "x1"}))), Some("x1".into()));
        assert_eq!(id_from_fields(&fields(json!({"id": 42}))), Some("42".into()));
        assert_eq!(id_from_fields(&fields(json!({"id": "  "}))), None);
        assert_eq!(id_from_fields(&fields(json!({"id": null}))), None);
        assert_eq!(id_from_fields(&fields(json!({"nome": "a"}))), None);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let mut snapshot = Snapshot::new();
        let record = ItemRecord::with_id("abc", fields(json!({"cpf": "1"})));
        snapshot
            .collections
            .entry("formularios".to_string())
            .or_default()
            .insert(record.id.clone(), record);
        snapshot.last_saved = Some(Utc::now());

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["_version"], 2);
        assert!(value["_lastSaved"].is_string());
        assert_eq!(value["formularios"]["abc"]["cpf"], "1");

        let parsed: Snapshot = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_largest_collection() {
        let mut snapshot = Snapshot::new();
        assert!(snapshot.largest_collection().is_none());

        for (name, n) in [("a", 1), ("b", 3), ("c", 2)] {
            let items = snapshot.collections.entry(name.to_string()).or_default();
            for i in 0..n {
                let record = ItemRecord::with_id(format!("{name}{i}"), FieldMap::new());
                items.insert(record.id.clone(), record);
            }
        }

        assert_eq!(snapshot.largest_collection(), Some("b"));
        assert_eq!(snapshot.total_items(), 6);
        assert_eq!(snapshot.counts()["c"], 2);
    }
}
