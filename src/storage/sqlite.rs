//! SQLite storage implementation

use super::schema;
use crate::engine::{StorageEngine, fold_query};
use crate::entity::{Entity, Fields, Patch};
use crate::id::{Clock, IdGenerator, system_clock};
use crate::mapper::{EntityMapper, Row};
use crate::schema::{BASE_COLUMNS, SchemaDescriptor, validate_collection_name};
use crate::value::{FieldType, Value};
use crate::{Error, Result};
use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OptionalExtension, Statement, ToSql, params_from_iter};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Boolean(b) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*b as i64)),
            Value::Integer(n) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*n)),
            Value::Real(n) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*n)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// Column names of a prepared statement, captured before stepping it
fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(String::from).collect()
}

/// Helper to convert a result row into `(column, value)` pairs
fn read_row(row: &rusqlite::Row, names: &[String]) -> rusqlite::Result<Row> {
    let mut out = Vec::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => Value::Integer(n),
            ValueRef::Real(n) => Value::Real(n),
            ValueRef::Text(bytes) => {
                let text = std::str::from_utf8(bytes).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(i, rusqlite::types::Type::Text, Box::new(e))
                })?;
                Value::Text(text.to_string())
            }
            ValueRef::Blob(_) => {
                return Err(rusqlite::Error::InvalidColumnType(
                    i,
                    name.clone(),
                    rusqlite::types::Type::Blob,
                ));
            }
        };
        out.push((name.clone(), value));
    }
    Ok(out)
}

/// Register the Unicode case-folding function used by search
fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        schema::FOLD_FUNCTION,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(match ctx.get_raw(0) {
                ValueRef::Text(bytes) => Some(fold_query(&String::from_utf8_lossy(bytes))),
                _ => None,
            })
        },
    )
}

/// Shared handle to one SQLite database holding any number of collections
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        register_functions(&conn)?;
        tracing::debug!("Opened database {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        register_functions(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Bind an engine to one collection of this database
    pub fn engine(&self, collection: &str, schema: SchemaDescriptor) -> Result<RelationalEngine> {
        RelationalEngine::new(self, collection, schema)
    }
}

/// [`StorageEngine`] over one SQLite table.
///
/// Each operation is a single parameterized statement; isolation is
/// whatever SQLite gives that statement. There are no multi-statement
/// transactions, so [`bulk_create`](StorageEngine::bulk_create) is not
/// atomic here either.
pub struct RelationalEngine {
    conn: Arc<Mutex<Connection>>,
    collection: String,
    schema: Arc<SchemaDescriptor>,
    mapper: EntityMapper,
    ids: IdGenerator,
    initialized: AtomicBool,
}

impl RelationalEngine {
    pub fn new(db: &Database, collection: &str, schema: SchemaDescriptor) -> Result<Self> {
        validate_collection_name(collection)?;
        let schema = Arc::new(schema);
        Ok(Self {
            conn: db.conn.clone(),
            collection: collection.to_string(),
            mapper: EntityMapper::new(collection, schema.clone()),
            schema,
            ids: IdGenerator::new(system_clock()),
            initialized: AtomicBool::new(false),
        })
    }

    /// Replace the clock used for timestamps and ids
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = IdGenerator::new(clock);
        self
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    fn ready(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::NotInitialized(self.collection.clone()))
        }
    }

    /// Run a row-returning statement and map every row to an entity
    async fn query_entities(&self, sql: &str, params: &[Value]) -> Result<Vec<Entity>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(sql)?;
        let names = column_names(&stmt);
        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| read_row(row, &names))?
            .collect::<rusqlite::Result<Vec<Row>>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter().map(|row| self.mapper.from_row(row)).collect()
    }
}

#[async_trait]
impl StorageEngine for RelationalEngine {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        let existing: HashSet<String> = {
            let mut stmt = conn.prepare(schema::TABLE_COLUMNS)?;
            stmt.query_map([&self.collection], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<HashSet<String>>>()?
        };

        let columns = self.schema.columns();
        if existing.is_empty() {
            conn.execute(&schema::create_table(&self.collection, &columns), [])?;
            conn.execute(&schema::create_index(&self.collection), [])?;
            tracing::info!("Created table {} ({} columns)", self.collection, columns.len());
        } else {
            if let Some(base) = BASE_COLUMNS.iter().find(|c| !existing.contains(**c)) {
                return Err(Error::Schema(format!(
                    "Existing table {} has no {} column",
                    self.collection, base
                )));
            }
            for column in columns.iter().filter(|c| !existing.contains(&c.name)) {
                conn.execute(&schema::add_column(&self.collection, column), [])?;
                tracing::info!("Added column {}.{}", self.collection, column.name);
            }
            conn.execute(&schema::create_index(&self.collection), [])?;
        }

        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn create(&self, fields: Fields) -> Result<String> {
        self.ready()?;
        let fields = self.mapper.check_new(fields)?;
        let (id, now) = self.ids.next();
        let entity = Entity {
            id: id.clone(),
            created_at: now,
            updated_at: now,
            fields,
        };

        let row = self.mapper.to_row(&entity);
        let columns: Vec<&str> = row.iter().map(|(c, _)| c.as_str()).collect();
        let values: Vec<&Value> = row.iter().map(|(_, v)| v).collect();

        let conn = self.conn.lock().await;
        conn.execute(&schema::insert(&self.collection, &columns), params_from_iter(values))?;
        tracing::debug!("Created {} in {}", id, self.collection);
        Ok(id)
    }

    async fn get_all(&self) -> Result<Vec<Entity>> {
        self.ready()?;
        self.query_entities(&schema::select_all(&self.collection), &[]).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Entity>> {
        self.ready()?;
        let row = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&schema::select_by_id(&self.collection))?;
            let names = column_names(&stmt);
            stmt.query_row([id], |row| read_row(row, &names)).optional()?
        };
        row.map(|row| self.mapper.from_row(row)).transpose()
    }

    async fn update(&self, id: &str, patch: Patch) -> Result<Entity> {
        self.ready()?;
        let patch = self.mapper.check_patch(patch)?;
        let assignments = self.mapper.patch_columns(&patch)?;
        let now = crate::id::format_timestamp(&self.ids.now());

        let columns: Vec<&str> = assignments.iter().map(|(c, _)| c.as_str()).collect();
        let mut params: Vec<Value> = assignments.iter().map(|(_, v)| v.clone()).collect();
        params.push(Value::Text(now));
        params.push(Value::Text(id.to_string()));

        let row = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&schema::update(&self.collection, &columns))?;
            let names = column_names(&stmt);
            stmt.query_row(params_from_iter(params.iter()), |row| read_row(row, &names))
                .optional()?
        };

        match row {
            Some(row) => {
                tracing::debug!("Updated {} in {} ({} fields)", id, self.collection, columns.len());
                self.mapper.from_row(row)
            }
            None => Err(Error::NotFound {
                collection: self.collection.clone(),
                id: id.to_string(),
            }),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.ready()?;
        let conn = self.conn.lock().await;
        let removed = conn.execute(&schema::delete(&self.collection), [id])?;
        tracing::debug!("Deleted {} from {} (removed: {})", id, self.collection, removed);
        Ok(removed > 0)
    }

    async fn search(&self, query: &str, fields: &[&str]) -> Result<Vec<Entity>> {
        self.ready()?;
        let mut text_columns: Vec<String> = Vec::new();
        for field in fields {
            let field_type = self.mapper.field_type(field)?;
            let column = self.mapper.column_for(field)?.into_owned();
            if field_type == Some(FieldType::Text) && !text_columns.contains(&column) {
                text_columns.push(column);
            }
        }

        if fields.is_empty() {
            return Ok(Vec::new());
        }
        if query.is_empty() {
            return self.get_all().await;
        }
        if text_columns.is_empty() {
            return Ok(Vec::new());
        }

        let columns: Vec<&str> = text_columns.iter().map(String::as_str).collect();
        let pattern = Value::Text(schema::like_pattern(&fold_query(query)));
        tracing::debug!("Searching {} for {:?} in {:?}", self.collection, query, columns);
        self.query_entities(&schema::search(&self.collection, &columns), &[pattern])
            .await
    }

    async fn get_by_field(&self, field: &str, value: Value) -> Result<Vec<Entity>> {
        self.ready()?;
        let value = self.mapper.check_filter(field, value)?;
        let column = self.mapper.column_for(field)?;
        let sql = schema::select_by_field(&self.collection, &column, value.is_null());

        if value.is_null() {
            self.query_entities(&sql, &[]).await
        } else {
            let value = self.mapper.physical_value(value);
            self.query_entities(&sql, &[value]).await
        }
    }

    async fn count(&self) -> Result<usize> {
        self.ready()?;
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(&schema::count(&self.collection), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<()> {
        self.ready()?;
        let conn = self.conn.lock().await;
        let removed = conn.execute(&schema::clear(&self.collection), [])?;
        tracing::info!("Cleared {} ({} entities removed)", self.collection, removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::fields;
    use crate::id::ManualClock;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::tempdir;

    fn task_schema() -> SchemaDescriptor {
        SchemaDescriptor::new([
            ("title", FieldType::Text),
            ("note", FieldType::Text),
            ("priority", FieldType::Integer),
            ("done", FieldType::Boolean),
        ])
        .unwrap()
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()))
    }

    async fn engine_with(clock: Arc<ManualClock>) -> RelationalEngine {
        let db = Database::open_in_memory().unwrap();
        let engine = db.engine("tasks", task_schema()).unwrap().with_clock(clock);
        engine.initialize().await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_requires_initialize() {
        let db = Database::open_in_memory().unwrap();
        let engine = db.engine("tasks", task_schema()).unwrap();

        let err = engine.count().await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized(ref c) if c == "tasks"));

        engine.initialize().await.unwrap();
        engine.initialize().await.unwrap();
        assert_eq!(engine.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_entity_crud() {
        let clock = clock();
        let engine = engine_with(clock.clone()).await;

        let id = engine
            .create(fields([("title", Value::from("Buy milk")), ("done", Value::from(false))]))
            .await
            .unwrap();

        let entity = engine.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(entity.text("title"), Some("Buy milk"));
        assert_eq!(entity.fields.get("done"), Some(&Value::Boolean(false)));
        assert_eq!(entity.fields.get("note"), Some(&Value::Null));
        assert_eq!(entity.created_at, entity.updated_at);

        clock.advance(Duration::seconds(5));
        let updated = engine
            .update(&id, Patch::new().set("done", true).set("priority", 2))
            .await
            .unwrap();
        assert_eq!(updated.fields.get("done"), Some(&Value::Boolean(true)));
        assert_eq!(updated.text("title"), Some("Buy milk"));
        assert_eq!(updated.created_at, entity.created_at);
        assert!(updated.updated_at > entity.updated_at);

        assert!(engine.delete(&id).await.unwrap());
        assert!(!engine.delete(&id).await.unwrap());
        assert!(engine.get_by_id(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_id() {
        let engine = engine_with(clock()).await;
        let err = engine.update("nope", Patch::new().set("title", "x")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { ref id, .. } if id == "nope"));
    }

    #[tokio::test]
    async fn test_updated_at_never_decreases() {
        let clock = clock();
        let engine = engine_with(clock.clone()).await;
        let id = engine.create(fields([("title", Value::from("a"))])).await.unwrap();
        let before = engine.get_by_id(&id).await.unwrap().unwrap();

        clock.advance(Duration::minutes(-10));
        let after = engine.update(&id, Patch::new().set("title", "b")).await.unwrap();
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn test_values_are_never_interpolated() {
        let engine = engine_with(clock()).await;
        let hostile = "x'); DROP TABLE \"tasks\"; --";
        let id = engine.create(fields([("title", Value::from(hostile))])).await.unwrap();

        assert_eq!(engine.count().await.unwrap(), 1);
        let found = engine.get_by_field("title", Value::from(hostile)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert_eq!(engine.search("drop table", &["title"]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_escapes_wildcards() {
        let engine = engine_with(clock()).await;
        engine.create(fields([("title", Value::from("50% off"))])).await.unwrap();
        engine.create(fields([("title", Value::from("500 apples"))])).await.unwrap();

        let hits = engine.search("0%", &["title"]).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text("title"), Some("50% off"));

        assert!(engine.search("_", &["title"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_by_field_null_and_bool() {
        let engine = engine_with(clock()).await;
        engine.create(fields([("title", Value::from("a")), ("done", Value::from(true))])).await.unwrap();
        engine.create(fields([("title", Value::from("b"))])).await.unwrap();

        let done = engine.get_by_field("done", Value::from(true)).await.unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].text("title"), Some("a"));

        let unknown = engine.get_by_field("done", Value::Null).await.unwrap();
        assert_eq!(unknown.len(), 1);
        assert_eq!(unknown[0].text("title"), Some("b"));

        assert!(matches!(
            engine.get_by_field("colour", Value::from("red")).await,
            Err(Error::UnknownField { .. })
        ));
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("store.db");

        let id = {
            let db = Database::open(&db_path).unwrap();
            let engine = db.engine("tasks", task_schema()).unwrap();
            engine.initialize().await.unwrap();
            engine.create(fields([("title", Value::from("kept"))])).await.unwrap()
        };

        let db = Database::open(&db_path).unwrap();
        let engine = db.engine("tasks", task_schema()).unwrap();
        engine.initialize().await.unwrap();
        let entity = engine.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(entity.text("title"), Some("kept"));
    }

    #[tokio::test]
    async fn test_initialize_adds_new_columns() {
        let db = Database::open_in_memory().unwrap();
        let old = db
            .engine("notes", SchemaDescriptor::new([("title", FieldType::Text)]).unwrap())
            .unwrap();
        old.initialize().await.unwrap();
        let id = old.create(fields([("title", Value::from("old row"))])).await.unwrap();

        let newer = db
            .engine(
                "notes",
                SchemaDescriptor::new([("title", FieldType::Text), ("pinned", FieldType::Boolean)]).unwrap(),
            )
            .unwrap();
        newer.initialize().await.unwrap();

        let entity = newer.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(entity.fields.get("pinned"), Some(&Value::Null));
        newer.update(&id, Patch::new().set("pinned", true)).await.unwrap();

        // the older schema still reads the row and ignores the extra column
        let entity = old.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(entity.fields.len(), 1);
    }

    #[tokio::test]
    async fn test_collections_share_a_database() {
        let db = Database::open_in_memory().unwrap();
        let tasks = db.engine("tasks", task_schema()).unwrap();
        let notes = db
            .engine("notes", SchemaDescriptor::new([("body", FieldType::Text)]).unwrap())
            .unwrap();
        tasks.initialize().await.unwrap();
        notes.initialize().await.unwrap();

        tasks.create(fields([("title", Value::from("t"))])).await.unwrap();
        assert_eq!(tasks.count().await.unwrap(), 1);
        assert_eq!(notes.count().await.unwrap(), 0);

        notes.clear().await.unwrap();
        assert_eq!(tasks.count().await.unwrap(), 1);
    }

    #[test]
    fn test_invalid_collection_name() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.engine("tasks; --", task_schema()), Err(Error::Schema(_))));
        // SQLite table names ignore case, so mixed case would alias "tasks"
        assert!(matches!(db.engine("Tasks", task_schema()), Err(Error::Schema(_))));
    }
}
