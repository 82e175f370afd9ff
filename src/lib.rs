//! # Stowage - Local persistence for small applications
//!
//! Schema-described entity collections behind one storage contract.
//!
//! Stowage provides:
//! - A [`StorageEngine`] contract: CRUD, search, field lookup, bulk create
//! - A relational engine over SQLite with per-collection tables
//! - A log engine that keeps each collection as one JSON blob in a key-value register
//! - Schema descriptors and an entity mapper that validate writes identically for both
//! - Time-ordered (UUIDv7) identifiers and millisecond ISO-8601 timestamps

pub mod value;
pub mod schema;
pub mod entity;
pub mod mapper;
pub mod id;
pub mod engine;
pub mod storage;
pub mod kv;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use value::{FieldType, Value};
pub use schema::SchemaDescriptor;
pub use entity::{Entity, Fields, Patch, fields};
pub use mapper::EntityMapper;
pub use id::{Clock, IdGenerator, ManualClock, SystemClock};
pub use engine::StorageEngine;
pub use storage::{Database, RelationalEngine};
pub use kv::{FileRegister, LogEngine, MemoryRegister, Register};

/// Result type alias for Stowage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Stowage operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Unknown field '{field}' in collection {collection}")]
    UnknownField { collection: String, field: String },

    #[error("Invalid value for '{field}': expected {expected}, found {found}")]
    InvalidValue {
        field: String,
        expected: FieldType,
        found: &'static str,
    },

    #[error("Entity not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Collection {0} is not initialized")]
    NotInitialized(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Config error: {0}")]
    Config(String),
}

/// Failures of the underlying storage medium
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Storage error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Register key '{key}' would hold {size} bytes (limit {limit})")]
    CapacityExceeded { key: String, size: usize, limit: usize },

    #[error("Corrupt data: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Persistence(e.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Persistence(e.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Persistence(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::NotFound {
            collection: "tasks".to_string(),
            id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "Entity not found: tasks/abc");

        let err = Error::InvalidValue {
            field: "done".to_string(),
            expected: FieldType::Boolean,
            found: "text",
        };
        assert_eq!(err.to_string(), "Invalid value for 'done': expected boolean, found text");
    }

    #[test]
    fn test_persistence_conversions() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Persistence(PersistenceError::Io(_))));

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json.into();
        assert!(matches!(err, Error::Persistence(PersistenceError::Serialization(_))));
    }
}
