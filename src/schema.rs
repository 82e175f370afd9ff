//! Schema descriptors
//!
//! A [`SchemaDescriptor`] declares the application fields of one collection
//! and their logical types. It owns the translation of each field name into
//! its physical column name, so the column list it produces is deterministic
//! and collision-free.

use crate::mapper::to_column_name;
use crate::value::FieldType;
use crate::{Error, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Application names of the three base fields every entity carries
pub const BASE_FIELDS: [&str; 3] = ["id", "createdAt", "updatedAt"];

/// Physical names of the three base columns
pub const BASE_COLUMNS: [&str; 3] = ["id", "created_at", "updated_at"];

static IDENTIFIER: OnceLock<Regex> = OnceLock::new();

/// Check that a collection or field name is a plain identifier.
///
/// Table and column names are the only tokens spliced into SQL text, so
/// anything beyond `[A-Za-z][A-Za-z0-9_]*` is refused up front.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    let re = IDENTIFIER.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid regex"));
    if re.is_match(name) {
        Ok(())
    } else {
        Err(Error::Schema(format!("Invalid {} name: {:?}", kind, name)))
    }
}

static COLLECTION: OnceLock<Regex> = OnceLock::new();

/// Check that a collection name is a lowercase identifier.
///
/// SQLite folds table names case-insensitively while register keys are
/// exact, so mixed-case names would alias on one backend only.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let re = COLLECTION.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid regex"));
    if re.is_match(name) {
        Ok(())
    } else {
        Err(Error::Schema(format!(
            "Invalid collection name: {:?} (use lowercase letters, digits and '_')",
            name
        )))
    }
}

/// One declared schema field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Application-facing name (e.g. `dueDate`)
    pub name: String,
    /// Physical column name (e.g. `due_date`)
    pub column: String,
    /// Logical type
    pub field_type: FieldType,
}

/// Physical column definition derived from a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub sql_type: &'static str,
    pub primary_key: bool,
    pub not_null: bool,
}

/// Declared fields of one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    fields: Vec<FieldDef>,
}

impl SchemaDescriptor {
    /// Build a descriptor from `(field name, type)` pairs in declaration order.
    ///
    /// Fails with [`Error::Schema`] when the list is empty, a name repeats,
    /// two names map onto the same column, a name shadows a base field, or
    /// a name is not a plain identifier.
    pub fn new<I, N>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, FieldType)>,
        N: Into<String>,
    {
        let mut defs = Vec::new();
        let mut names = HashSet::new();
        let mut columns: HashSet<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();

        for (name, field_type) in fields {
            let name = name.into();
            validate_identifier("field", &name)?;

            if BASE_FIELDS.contains(&name.as_str()) {
                return Err(Error::Schema(format!("Field '{}' is reserved", name)));
            }
            if !names.insert(name.clone()) {
                return Err(Error::Schema(format!("Duplicate field: {}", name)));
            }

            let column = to_column_name(&name);
            if !columns.insert(column.clone()) {
                return Err(Error::Schema(format!(
                    "Field '{}' maps to column '{}', which is already taken",
                    name, column
                )));
            }

            defs.push(FieldDef { name, column, field_type });
        }

        if defs.is_empty() {
            return Err(Error::Schema("Schema declares no fields".to_string()));
        }

        Ok(Self { fields: defs })
    }

    /// Declared fields in declaration order
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Look up a field by its application name
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a field by its physical column name
    pub fn field_by_column(&self, column: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.column == column)
    }

    /// Full physical column list: base columns first, then schema columns
    /// in declaration order.
    pub fn columns(&self) -> Vec<Column> {
        let mut columns = vec![
            Column { name: "id".to_string(), sql_type: "TEXT", primary_key: true, not_null: true },
            Column { name: "created_at".to_string(), sql_type: "TEXT", primary_key: false, not_null: true },
            Column { name: "updated_at".to_string(), sql_type: "TEXT", primary_key: false, not_null: true },
        ];
        columns.extend(self.fields.iter().map(|f| Column {
            name: f.column.clone(),
            sql_type: f.field_type.sql_type(),
            primary_key: false,
            not_null: false,
        }));
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_schema() -> SchemaDescriptor {
        SchemaDescriptor::new([
            ("title", FieldType::Text),
            ("dueDate", FieldType::Text),
            ("priority", FieldType::Integer),
            ("done", FieldType::Boolean),
        ])
        .unwrap()
    }

    #[test]
    fn test_columns_are_deterministic() {
        let names: Vec<String> = task_schema().columns().into_iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec!["id", "created_at", "updated_at", "title", "due_date", "priority", "done"]
        );
        assert_eq!(task_schema().columns(), task_schema().columns());
    }

    #[test]
    fn test_column_types() {
        let columns = task_schema().columns();
        assert!(columns[0].primary_key);
        assert_eq!(columns[5].sql_type, "INTEGER");
        assert_eq!(columns[6].sql_type, "INTEGER");
    }

    #[test]
    fn test_empty_schema_rejected() {
        let fields: Vec<(&str, FieldType)> = vec![];
        assert!(matches!(SchemaDescriptor::new(fields), Err(Error::Schema(_))));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let result = SchemaDescriptor::new([("title", FieldType::Text), ("title", FieldType::Integer)]);
        assert!(matches!(result, Err(Error::Schema(_))));
    }

    #[test]
    fn test_column_collision_rejected() {
        let result = SchemaDescriptor::new([("dueDate", FieldType::Text), ("due_date", FieldType::Text)]);
        assert!(matches!(result, Err(Error::Schema(_))));
    }

    #[test]
    fn test_reserved_fields_rejected() {
        assert!(SchemaDescriptor::new([("createdAt", FieldType::Text)]).is_err());
        assert!(SchemaDescriptor::new([("created_at", FieldType::Text)]).is_err());
        assert!(SchemaDescriptor::new([("id", FieldType::Integer)]).is_err());
    }

    #[test]
    fn test_non_identifier_rejected() {
        assert!(SchemaDescriptor::new([("title\"; DROP", FieldType::Text)]).is_err());
        assert!(SchemaDescriptor::new([("1st", FieldType::Text)]).is_err());
        assert!(validate_identifier("collection", "tasks_2").is_ok());
    }

    #[test]
    fn test_collection_names_are_lowercase() {
        assert!(validate_collection_name("tasks_2").is_ok());
        assert!(matches!(validate_collection_name("Tasks"), Err(Error::Schema(_))));
        assert!(validate_collection_name("taskS").is_err());
        assert!(validate_collection_name("_tasks").is_err());
    }

    #[test]
    fn test_lookup() {
        let schema = task_schema();
        assert_eq!(schema.field("dueDate").unwrap().column, "due_date");
        assert_eq!(schema.field_by_column("due_date").unwrap().name, "dueDate");
        assert!(schema.field("missing").is_none());
    }
}
