use crate::engine::StorageEngine;
use crate::kv::{FileRegister, LogEngine, Register};
use crate::schema::{SchemaDescriptor, validate_collection_name};
use crate::storage::Database;
use crate::value::FieldType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Which engine backs the collections of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Relational,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StowageConfig {
    #[serde(default)]
    pub backend: Backend,
    pub database: Option<String>,
    pub register_dir: Option<String>,
    /// Collection name -> field name -> type
    #[serde(default)]
    pub collections: BTreeMap<String, BTreeMap<String, FieldType>>,
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("stowage.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".stowage").join("stowage.db")
}

pub fn default_register_dir_in(base: &Path) -> PathBuf {
    base.join(".stowage").join("registers")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<StowageConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: StowageConfig = toml::from_str(&contents)?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &StowageConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn ensure_gitignore(project_root: &Path) -> anyhow::Result<()> {
    let gitignore_path = project_root.join(".gitignore");
    let entry = ".stowage/";

    let mut content = String::new();
    if gitignore_path.exists() {
        content = std::fs::read_to_string(&gitignore_path)?;
        if content.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
    }
    content.push_str(entry);
    content.push('\n');
    std::fs::write(&gitignore_path, content)?;
    Ok(())
}

impl StowageConfig {
    /// Descriptor for a declared collection.
    ///
    /// The log engine also runs schema-less, so an undeclared collection is
    /// `Ok(None)` there and an error for the relational backend.
    pub fn schema_for(&self, collection: &str) -> Result<Option<SchemaDescriptor>> {
        match self.collections.get(collection) {
            Some(fields) => SchemaDescriptor::new(fields.iter().map(|(name, ty)| (name.clone(), *ty))).map(Some),
            None if self.backend == Backend::Log => Ok(None),
            None => Err(Error::Config(format!(
                "collection '{}' is not declared in the config",
                collection
            ))),
        }
    }

    pub fn database_path(&self, base: &Path) -> PathBuf {
        match &self.database {
            Some(p) => base.join(p),
            None => default_database_path_in(base),
        }
    }

    pub fn register_dir(&self, base: &Path) -> PathBuf {
        match &self.register_dir {
            Some(p) => base.join(p),
            None => default_register_dir_in(base),
        }
    }

    /// Declared collections plus, for the log backend, any collection
    /// already stored in the register directory
    pub async fn known_collections(&self, base: &Path) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = self.collections.keys().cloned().collect();
        if self.backend == Backend::Log {
            let stored = FileRegister::new(self.register_dir(base)).keys().await?;
            names.extend(
                stored
                    .into_iter()
                    .filter(|key| validate_collection_name(key).is_ok()),
            );
        }
        Ok(names.into_iter().collect())
    }

    /// Open and initialize the configured engine for one collection
    pub async fn open_engine(&self, base: &Path, collection: &str) -> Result<Box<dyn StorageEngine>> {
        let schema = self.schema_for(collection)?;
        let engine: Box<dyn StorageEngine> = match self.backend {
            Backend::Relational => {
                let path = self.database_path(base);
                ensure_db_dir(&path)?;
                let db = Database::open(&path)?;
                let schema = schema.ok_or_else(|| Error::Config(format!("no schema for {}", collection)))?;
                Box::new(db.engine(collection, schema)?)
            }
            Backend::Log => {
                let register = Arc::new(FileRegister::new(self.register_dir(base)));
                let engine = LogEngine::new(register, collection)?;
                match schema {
                    Some(schema) => Box::new(engine.with_schema(schema)),
                    None => Box::new(engine),
                }
            }
        };
        engine.initialize().await?;
        Ok(engine)
    }
}
