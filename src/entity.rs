//! Entities and sparse updates

use crate::id::format_timestamp;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Application fields of an entity, keyed by application field name
pub type Fields = BTreeMap<String, Value>;

/// A stored record: the three base fields plus the collection's own fields.
///
/// Serializes as one flat JSON object, e.g.
/// `{"id": "...", "createdAt": "...", "updatedAt": "...", "title": "Buy milk"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Opaque, immutable identifier
    pub id: String,
    /// Set once at creation
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    /// Bumped on every mutation, never decreases
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Entity {
    /// Read a field by application name, base fields included.
    ///
    /// Timestamps are returned in their persisted text form so that
    /// filtering on them behaves the same in every backend.
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::Text(self.id.clone())),
            "createdAt" => Some(Value::Text(format_timestamp(&self.created_at))),
            "updatedAt" => Some(Value::Text(format_timestamp(&self.updated_at))),
            _ => self.fields.get(field).cloned(),
        }
    }

    /// Text value of a field, if it holds one
    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_text)
    }
}

/// Sparse update for [`StorageEngine::update`](crate::StorageEngine::update).
///
/// A field absent from the patch is left untouched; a field set to
/// [`Value::Null`] is explicitly cleared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    fields: BTreeMap<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field to a value
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Explicitly clear a field
    pub fn clear(self, field: impl Into<String>) -> Self {
        self.set(field, Value::Null)
    }

    /// Whether the patch touches `field`
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Merge the patch into an entity's fields
    pub fn apply_to(&self, fields: &mut Fields) {
        for (name, value) in &self.fields {
            fields.insert(name.clone(), value.clone());
        }
    }
}

impl IntoIterator for Patch {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl From<Fields> for Patch {
    fn from(fields: Fields) -> Self {
        Self { fields }
    }
}

/// Build a [`Fields`] map from `(name, value)` pairs.
///
/// ```
/// let fields = stowage::fields([("title", "Buy milk".into()), ("priority", 2.into())]);
/// assert_eq!(fields.len(), 2);
/// ```
pub fn fields<I, N>(pairs: I) -> Fields
where
    I: IntoIterator<Item = (N, Value)>,
    N: Into<String>,
{
    pairs.into_iter().map(|(n, v)| (n.into(), v)).collect()
}

/// Serde adapter keeping timestamps in the fixed millisecond ISO-8601 form
pub(crate) mod timestamp {
    use crate::id::{format_timestamp, parse_timestamp};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_timestamp(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_timestamp(&s).map_err(serde::de::Error::custom)
    }
}
