//! The storage contract shared by every backend
//!
//! Application code talks to a collection only through [`StorageEngine`].
//! The relational and log engines implement it over very different media,
//! and the helpers at the bottom of this module pin down the ordering and
//! matching rules both of them must agree on.

use crate::entity::{Entity, Fields, Patch};
use crate::value::Value;
use crate::Result;
use async_trait::async_trait;
use std::cmp::Ordering;

/// Data-access contract for one named collection.
///
/// Every operation other than [`initialize`](StorageEngine::initialize)
/// fails with [`Error::NotInitialized`](crate::Error::NotInitialized) until
/// `initialize` has completed once.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Name of the collection this engine is bound to
    fn collection(&self) -> &str;

    /// One-time setup of the backing medium. Safe to call again.
    async fn initialize(&self) -> Result<()>;

    /// Persist a new entity and return its id.
    ///
    /// `createdAt` and `updatedAt` are both set to the current time.
    async fn create(&self, fields: Fields) -> Result<String>;

    /// All entities, newest `createdAt` first, ties broken by id (descending)
    async fn get_all(&self) -> Result<Vec<Entity>>;

    /// Look up one entity; a miss is `Ok(None)`
    async fn get_by_id(&self, id: &str) -> Result<Option<Entity>>;

    /// Merge `patch` into an existing entity and return the result.
    ///
    /// Only the fields present in the patch change. `updatedAt` is refreshed
    /// and never moves backwards. Fails with
    /// [`Error::NotFound`](crate::Error::NotFound) when `id` does not exist.
    async fn update(&self, id: &str, patch: Patch) -> Result<Entity>;

    /// Remove an entity. Deleting an absent id is not an error; the return
    /// value says whether anything was removed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Case-insensitive substring search, OR-combined across `fields`, in
    /// the same order as [`get_all`](StorageEngine::get_all).
    ///
    /// Only text values can match. An empty `query` matches every entity;
    /// an empty `fields` list matches none.
    async fn search(&self, query: &str, fields: &[&str]) -> Result<Vec<Entity>>;

    /// Create entities one after another, returning ids in input order.
    ///
    /// Not atomic: if creation fails partway, the entities created before
    /// the failure stay persisted and the error is returned.
    async fn bulk_create(&self, list: Vec<Fields>) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(list.len());
        for fields in list {
            ids.push(self.create(fields).await?);
        }
        Ok(ids)
    }

    /// Entities whose `field` equals `value` exactly, ordered as `get_all`
    async fn get_by_field(&self, field: &str, value: Value) -> Result<Vec<Entity>>;

    /// Number of entities currently stored
    async fn count(&self) -> Result<usize>;

    /// Remove every entity in the collection
    async fn clear(&self) -> Result<()>;
}

/// Ordering used by every listing operation: newest first, then id descending.
pub fn newest_first(a: &Entity, b: &Entity) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// Sort a listing in contract order
pub fn sort_newest_first(entities: &mut [Entity]) {
    entities.sort_by(newest_first);
}

/// Unicode lowercase fold applied to both the needle and the searched text.
///
/// The relational engine registers this same function with SQLite, so
/// both backends fold identically.
pub fn fold_query(query: &str) -> String {
    query.to_lowercase()
}

/// Whether `entity` matches a folded search needle in any of `fields`
pub fn matches_search(entity: &Entity, needle: &str, fields: &[&str]) -> bool {
    fields.iter().any(|field| match entity.get(field) {
        Some(Value::Text(text)) => needle.is_empty() || fold_query(&text).contains(needle),
        _ => needle.is_empty(),
    })
}

/// Whether `entity` holds exactly `value` in `field`.
///
/// A field the entity does not carry at all counts as null.
pub fn matches_field(entity: &Entity, field: &str, value: &Value) -> bool {
    entity.get(field).unwrap_or(Value::Null) == *value
}
