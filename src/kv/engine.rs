//! Log engine: one serialized collection per register key

use super::register::Register;
use crate::engine::{StorageEngine, fold_query, matches_field, matches_search, sort_newest_first};
use crate::entity::{Entity, Fields, Patch};
use crate::id::{Clock, IdGenerator, system_clock};
use crate::mapper::EntityMapper;
use crate::schema::{SchemaDescriptor, validate_collection_name};
use crate::value::Value;
use crate::{Error, PersistenceError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// [`StorageEngine`] that keeps a whole collection as one JSON blob.
///
/// Each operation reads the full collection, works on it in memory and, for
/// mutations, writes the full collection back: O(n) per call. The only
/// atomicity is the register's single-key replace; two concurrent mutations
/// of the same collection race, and the later write wins.
pub struct LogEngine {
    register: Arc<dyn Register>,
    collection: String,
    mapper: EntityMapper,
    ids: IdGenerator,
    initialized: AtomicBool,
}

impl LogEngine {
    /// Schema-less engine: any field name except the base fields is accepted
    pub fn new(register: Arc<dyn Register>, collection: &str) -> Result<Self> {
        validate_collection_name(collection)?;
        Ok(Self {
            register,
            collection: collection.to_string(),
            mapper: EntityMapper::identity(collection),
            ids: IdGenerator::new(system_clock()),
            initialized: AtomicBool::new(false),
        })
    }

    /// Validate writes against `schema`, exactly as the relational engine does
    pub fn with_schema(mut self, schema: SchemaDescriptor) -> Self {
        self.mapper = EntityMapper::new(self.collection.clone(), Arc::new(schema));
        self
    }

    /// Replace the clock used for timestamps and ids
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = IdGenerator::new(clock);
        self
    }

    pub fn schema(&self) -> Option<&SchemaDescriptor> {
        self.mapper.schema()
    }

    fn ready(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::NotInitialized(self.collection.clone()))
        }
    }

    /// Read the whole collection, in stored order
    async fn load(&self) -> Result<Vec<Entity>> {
        match self.register.read(&self.collection).await? {
            Some(blob) => serde_json::from_str(&blob).map_err(|e| {
                PersistenceError::Corrupt(format!("collection {}: {}", self.collection, e)).into()
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Write the whole collection back
    async fn store(&self, entities: &[Entity]) -> Result<()> {
        let blob = serde_json::to_string(entities)?;
        self.register.write(&self.collection, &blob).await
    }

    /// Entity as callers see it under the current schema. The stored blob
    /// keeps every field it was written with.
    fn view(&self, mut entity: Entity) -> Entity {
        entity.fields = self.mapper.project(entity.fields);
        entity
    }

    /// Read the whole collection in listing order, shaped to the schema
    async fn load_sorted(&self) -> Result<Vec<Entity>> {
        let mut entities: Vec<Entity> = self.load().await?.into_iter().map(|e| self.view(e)).collect();
        sort_newest_first(&mut entities);
        Ok(entities)
    }
}

#[async_trait]
impl StorageEngine for LogEngine {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn initialize(&self) -> Result<()> {
        // Parse what is there now so a corrupt blob surfaces at startup.
        let existing = self.load().await?;
        if self.register.read(&self.collection).await?.is_none() {
            self.store(&existing).await?;
            tracing::info!("Created register key {}", self.collection);
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn create(&self, fields: Fields) -> Result<String> {
        self.ready()?;
        let fields = self.mapper.check_new(fields)?;
        let (id, now) = self.ids.next();

        let mut entities = self.load().await?;
        entities.push(Entity {
            id: id.clone(),
            created_at: now,
            updated_at: now,
            fields,
        });
        self.store(&entities).await?;
        tracing::debug!("Created {} in {}", id, self.collection);
        Ok(id)
    }

    async fn get_all(&self) -> Result<Vec<Entity>> {
        self.ready()?;
        self.load_sorted().await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Entity>> {
        self.ready()?;
        let found = self.load().await?.into_iter().find(|e| e.id == id);
        Ok(found.map(|e| self.view(e)))
    }

    async fn update(&self, id: &str, patch: Patch) -> Result<Entity> {
        self.ready()?;
        let patch = self.mapper.check_patch(patch)?;
        let now = self.ids.now();

        let mut entities = self.load().await?;
        let entity = entities
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::NotFound {
                collection: self.collection.clone(),
                id: id.to_string(),
            })?;

        patch.apply_to(&mut entity.fields);
        entity.updated_at = entity.updated_at.max(now);
        let updated = entity.clone();

        self.store(&entities).await?;
        tracing::debug!("Updated {} in {} ({} fields)", id, self.collection, patch.len());
        Ok(self.view(updated))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        self.ready()?;
        let mut entities = self.load().await?;
        let before = entities.len();
        entities.retain(|e| e.id != id);

        let removed = entities.len() < before;
        if removed {
            self.store(&entities).await?;
        }
        tracing::debug!("Deleted {} from {} (removed: {})", id, self.collection, removed);
        Ok(removed)
    }

    async fn search(&self, query: &str, fields: &[&str]) -> Result<Vec<Entity>> {
        self.ready()?;
        for field in fields {
            self.mapper.field_type(field)?;
        }
        if fields.is_empty() {
            return Ok(Vec::new());
        }

        let needle = fold_query(query);
        let mut hits = self.load_sorted().await?;
        hits.retain(|e| matches_search(e, &needle, fields));
        Ok(hits)
    }

    async fn get_by_field(&self, field: &str, value: Value) -> Result<Vec<Entity>> {
        self.ready()?;
        let value = self.mapper.check_filter(field, value)?;
        let mut hits = self.load_sorted().await?;
        hits.retain(|e| matches_field(e, field, &value));
        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        self.ready()?;
        Ok(self.load().await?.len())
    }

    async fn clear(&self) -> Result<()> {
        self.ready()?;
        let previous = self.load().await;
        self.store(&[]).await?;
        match previous {
            Ok(entities) => {
                tracing::info!("Cleared {} ({} entities removed)", self.collection, entities.len())
            }
            Err(e) => tracing::warn!("Cleared {} over an unreadable blob: {}", self.collection, e),
        }
        Ok(())
    }
}
