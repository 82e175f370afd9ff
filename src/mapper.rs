//! Entity mapping between application shape and persisted rows
//!
//! Applications name fields in camelCase (`dueDate`, `createdAt`); the
//! relational medium stores snake_case columns (`due_date`, `created_at`).
//! All naming translation and write validation lives here so neither
//! engine has to know about it.

use crate::entity::{Entity, Fields, Patch};
use crate::id::{format_timestamp, parse_timestamp};
use crate::schema::{BASE_COLUMNS, BASE_FIELDS, SchemaDescriptor};
use crate::value::{FieldType, Value};
use crate::{Error, PersistenceError, Result};
use std::borrow::Cow;
use std::sync::Arc;

/// Convert an application field name to its physical column name.
///
/// `dueDate` becomes `due_date`; names that are already snake_case pass
/// through unchanged.
pub fn to_column_name(field: &str) -> String {
    let mut out = String::with_capacity(field.len() + 4);
    for (i, ch) in field.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Convert a physical column name to the camelCase application name.
pub fn to_field_name(column: &str) -> String {
    let mut out = String::with_capacity(column.len());
    let mut upper_next = false;
    for ch in column.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

/// Physical row: column name and physical value, in column order.
pub type Row = Vec<(String, Value)>;

/// Bidirectional translator between entities and physical rows.
///
/// With a schema, every write is checked against the declared fields and
/// types. Without one (schema-less log collections) the mapper is the
/// identity and only refuses writes to the base fields.
#[derive(Debug, Clone)]
pub struct EntityMapper {
    collection: String,
    schema: Option<Arc<SchemaDescriptor>>,
}

impl EntityMapper {
    pub fn new(collection: impl Into<String>, schema: Arc<SchemaDescriptor>) -> Self {
        Self {
            collection: collection.into(),
            schema: Some(schema),
        }
    }

    /// Mapper for a collection without a declared schema
    pub fn identity(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            schema: None,
        }
    }

    pub fn schema(&self) -> Option<&SchemaDescriptor> {
        self.schema.as_deref()
    }

    fn unknown(&self, field: &str) -> Error {
        Error::UnknownField {
            collection: self.collection.clone(),
            field: field.to_string(),
        }
    }

    /// Validate and normalize one written field
    fn check_write(&self, field: &str, value: Value) -> Result<Value> {
        if BASE_FIELDS.contains(&field) {
            return Err(self.unknown(field));
        }
        match &self.schema {
            Some(schema) => {
                let def = schema.field(field).ok_or_else(|| self.unknown(field))?;
                value.conform(field, def.field_type)
            }
            None => Ok(value),
        }
    }

    /// Validate the fields of a new entity.
    ///
    /// Declared fields that were not supplied are filled with `Null`, so
    /// both backends hold the same shape.
    pub fn check_new(&self, fields: Fields) -> Result<Fields> {
        let mut out = Fields::new();
        for (name, value) in fields {
            let value = self.check_write(&name, value)?;
            out.insert(name, value);
        }
        if let Some(schema) = &self.schema {
            for def in schema.fields() {
                out.entry(def.name.clone()).or_insert(Value::Null);
            }
        }
        Ok(out)
    }

    /// Validate a sparse update
    pub fn check_patch(&self, patch: Patch) -> Result<Patch> {
        let mut out = Patch::new();
        for (name, value) in patch {
            let value = self.check_write(&name, value)?;
            out = out.set(name, value);
        }
        Ok(out)
    }

    /// Declared type of a readable field, including the base fields.
    ///
    /// Returns `None` for schema-less collections, where any name is accepted.
    pub fn field_type(&self, field: &str) -> Result<Option<FieldType>> {
        if BASE_FIELDS.contains(&field) {
            return Ok(Some(FieldType::Text));
        }
        match &self.schema {
            Some(schema) => schema
                .field(field)
                .map(|def| Some(def.field_type))
                .ok_or_else(|| self.unknown(field)),
            None => Ok(None),
        }
    }

    /// Physical column for an application field, including the base fields
    pub fn column_for(&self, field: &str) -> Result<Cow<'_, str>> {
        if let Some(pos) = BASE_FIELDS.iter().position(|f| *f == field) {
            return Ok(Cow::Borrowed(BASE_COLUMNS[pos]));
        }
        match &self.schema {
            Some(schema) => schema
                .field(field)
                .map(|def| Cow::Borrowed(def.column.as_str()))
                .ok_or_else(|| self.unknown(field)),
            None => Ok(Cow::Owned(to_column_name(field))),
        }
    }

    /// Validate a filter value for `field` the same way a write would be
    pub fn check_filter(&self, field: &str, value: Value) -> Result<Value> {
        match self.field_type(field)? {
            Some(field_type) => value.conform(field, field_type),
            None => Ok(value),
        }
    }

    /// Translate an entity into its physical row
    pub fn to_row(&self, entity: &Entity) -> Row {
        let mut row: Row = vec![
            ("id".to_string(), Value::Text(entity.id.clone())),
            ("created_at".to_string(), Value::Text(format_timestamp(&entity.created_at))),
            ("updated_at".to_string(), Value::Text(format_timestamp(&entity.updated_at))),
        ];
        match &self.schema {
            Some(schema) => {
                for def in schema.fields() {
                    let value = entity.fields.get(&def.name).cloned().unwrap_or(Value::Null);
                    row.push((def.column.clone(), to_physical(value)));
                }
            }
            None => {
                for (name, value) in &entity.fields {
                    row.push((to_column_name(name), to_physical(value.clone())));
                }
            }
        }
        row
    }

    /// Translate the physical form of a patch into `(column, value)` pairs
    pub fn patch_columns(&self, patch: &Patch) -> Result<Row> {
        patch
            .iter()
            .map(|(name, value)| Ok((self.column_for(name)?.into_owned(), to_physical(value.clone()))))
            .collect()
    }

    /// Physical form of a single value for `field`
    pub fn physical_value(&self, value: Value) -> Value {
        to_physical(value)
    }

    /// Rebuild an entity from a physical row.
    ///
    /// Columns the schema does not know are dropped so that rows written by
    /// a newer schema stay readable.
    pub fn from_row(&self, row: Row) -> Result<Entity> {
        let mut id = None;
        let mut created_at = None;
        let mut updated_at = None;
        let mut fields = Fields::new();

        for (column, value) in row {
            match column.as_str() {
                "id" => id = Some(expect_text(&column, value)?),
                "created_at" => created_at = Some(parse_timestamp(&expect_text(&column, value)?)?),
                "updated_at" => updated_at = Some(parse_timestamp(&expect_text(&column, value)?)?),
                _ => match &self.schema {
                    Some(schema) => match schema.field_by_column(&column) {
                        Some(def) => {
                            let value = from_physical(&def.name, def.field_type, value)?;
                            fields.insert(def.name.clone(), value);
                        }
                        None => {
                            tracing::warn!(
                                "Dropping unknown column {} in collection {}",
                                column,
                                self.collection
                            );
                        }
                    },
                    None => {
                        fields.insert(to_field_name(&column), value);
                    }
                },
            }
        }

        let missing = |name: &str| {
            PersistenceError::Corrupt(format!("row in '{}' has no {} column", self.collection, name))
        };
        let id = id.ok_or_else(|| missing("id"))?;
        let created_at = created_at.ok_or_else(|| missing("created_at"))?;
        let updated_at = updated_at.ok_or_else(|| missing("updated_at"))?;

        Ok(Entity {
            id,
            created_at,
            updated_at,
            fields: self.project(fields),
        })
    }

    /// Shape stored fields to the current schema.
    ///
    /// Fields the schema does not declare are dropped, and declared fields a
    /// record predates read as `Null`. Schema-less collections pass through
    /// unchanged.
    pub fn project(&self, mut fields: Fields) -> Fields {
        let Some(schema) = &self.schema else {
            return fields;
        };
        fields.retain(|name, _| {
            let declared = schema.field(name).is_some();
            if !declared {
                tracing::warn!("Dropping unknown field {} in collection {}", name, self.collection);
            }
            declared
        });
        for def in schema.fields() {
            fields.entry(def.name.clone()).or_insert(Value::Null);
        }
        fields
    }
}

fn to_physical(value: Value) -> Value {
    match value {
        Value::Boolean(b) => Value::Integer(b as i64),
        other => other,
    }
}

fn from_physical(field: &str, field_type: FieldType, value: Value) -> Result<Value> {
    let corrupt = |v: &Value| {
        PersistenceError::Corrupt(format!(
            "column for '{}' holds {} where {} was declared",
            field,
            v.kind(),
            field_type
        ))
    };
    match (field_type, value) {
        (_, Value::Null) => Ok(Value::Null),
        (FieldType::Boolean, Value::Integer(n)) => Ok(Value::Boolean(n != 0)),
        (FieldType::Real, Value::Integer(n)) => Ok(Value::Real(n as f64)),
        (FieldType::Text, v @ Value::Text(_))
        | (FieldType::Integer, v @ Value::Integer(_))
        | (FieldType::Real, v @ Value::Real(_)) => Ok(v),
        (_, other) => Err(corrupt(&other).into()),
    }
}

fn expect_text(column: &str, value: Value) -> Result<String> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(PersistenceError::Corrupt(format!(
            "column {} holds {} instead of text",
            column,
            other.kind()
        ))
        .into()),
    }
}
