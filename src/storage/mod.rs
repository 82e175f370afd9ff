//! Relational backend - SQLite-backed persistence
//!
//! One table per collection:
//! - `id TEXT PRIMARY KEY`, `created_at TEXT`, `updated_at TEXT`
//! - one column per schema field (TEXT / INTEGER / REAL, booleans as INTEGER)

pub mod schema;
pub mod sqlite;

pub use sqlite::{Database, RelationalEngine};
