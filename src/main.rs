//! Stowage CLI - Command-line interface for local entity collections

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;
use stowage::config::{self, Backend, StowageConfig};
use stowage::ui::{self, Icons};
use stowage::{Entity, Fields, Patch, SchemaDescriptor, StorageEngine, Value};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "stowage")]
#[command(version)]
#[command(about = "Local persistence for schema-described entity collections")]
#[command(long_about = r#"
Stowage keeps small collections of entities on local disk, either in
SQLite tables or as JSON blobs in a key-value register directory.

Example usage:
  stowage init --backend relational
  stowage create tasks --set title="Buy milk" --set done=false
  stowage search tasks milk --fields title,notes
  stowage find tasks done true
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config and prepare the data directory
    Init {
        /// Storage backend
        #[arg(short, long, value_enum, default_value = "relational")]
        backend: Backend,

        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Create one entity
    Create {
        collection: String,

        /// Field assignment, `name=value` (repeatable)
        #[arg(short, long = "set", value_name = "FIELD=VALUE")]
        sets: Vec<String>,
    },

    /// Create entities from a JSON array of objects
    BulkCreate {
        collection: String,

        /// JSON file to read
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List every entity, newest first
    List { collection: String },

    /// Show one entity
    Get { collection: String, id: String },

    /// Change fields of an existing entity
    Update {
        collection: String,
        id: String,

        /// Field assignment, `name=value` (repeatable); `name=null` clears
        #[arg(short, long = "set", value_name = "FIELD=VALUE")]
        sets: Vec<String>,
    },

    /// Delete one entity
    Delete { collection: String, id: String },

    /// Case-insensitive substring search
    Search {
        collection: String,
        query: String,

        /// Comma-separated fields to search
        #[arg(short, long, value_delimiter = ',', required = true)]
        fields: Vec<String>,
    },

    /// Entities whose field equals a value exactly
    Find {
        collection: String,
        field: String,
        value: String,
    },

    /// Number of entities in a collection
    Count { collection: String },

    /// Delete every entity in a collection
    Clear { collection: String },

    /// Show backend, paths, and per-collection counts
    Stats,
}

/// How results are written to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    fn is_human(self) -> bool {
        self == OutputMode::Human
    }
}

fn emit_json(command: &str, data: serde_json::Value) -> anyhow::Result<()> {
    let envelope = serde_json::json!({
        "ok": true,
        "command": command,
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("STOWAGE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mode = if cli.json { OutputMode::Json } else { OutputMode::Human };
    if let Err(e) = run(cli, mode).await {
        if mode.is_human() {
            ui::error(&format!("{:#}", e));
        } else {
            let envelope = serde_json::json!({ "ok": false, "error": format!("{:#}", e) });
            println!("{}", envelope);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli, mode: OutputMode) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if let Commands::Init { backend, force } = cli.command {
        return run_init(&config_path, &base, backend, force, mode);
    }

    let config = config::load_config(Some(&config_path))?.ok_or_else(|| {
        anyhow::anyhow!(
            "no config at {} (run `stowage init` first)",
            config_path.display()
        )
    })?;

    let started = Instant::now();
    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),

        Commands::Create { collection, sets } => {
            let engine = config.open_engine(&base, &collection).await?;
            let fields = parse_assignments(&config, &collection, &sets)?;
            let id = engine.create(fields).await?;
            if mode.is_human() {
                ui::entity_created(&collection, &id);
            } else {
                emit_json("create", serde_json::json!({ "id": id }))?;
            }
        }

        Commands::BulkCreate { collection, file } => {
            let engine = config.open_engine(&base, &collection).await?;
            let contents = std::fs::read_to_string(&file)?;
            let list: Vec<Fields> = serde_json::from_str(&contents)?;
            let ids = engine.bulk_create(list).await?;
            if mode.is_human() {
                for id in &ids {
                    ui::entity_created(&collection, id);
                }
                ui::success(&format!("Created {} entities", ids.len()));
                ui::timing(&format!("{:.2?}", started.elapsed()));
            } else {
                emit_json("bulk-create", serde_json::json!({ "ids": ids }))?;
            }
        }

        Commands::List { collection } => {
            let engine = config.open_engine(&base, &collection).await?;
            let entities = engine.get_all().await?;
            print_entities(mode, "list", &entities)?;
        }

        Commands::Get { collection, id } => {
            let engine = config.open_engine(&base, &collection).await?;
            match engine.get_by_id(&id).await? {
                Some(entity) => print_entities(mode, "get", std::slice::from_ref(&entity))?,
                None if mode.is_human() => ui::warn(&format!("{}/{} not found", collection, id)),
                None => emit_json("get", serde_json::Value::Null)?,
            }
        }

        Commands::Update { collection, id, sets } => {
            let engine = config.open_engine(&base, &collection).await?;
            let patch = Patch::from(parse_assignments(&config, &collection, &sets)?);
            if patch.is_empty() {
                anyhow::bail!("nothing to update (pass at least one --set FIELD=VALUE)");
            }
            let entity = engine.update(&id, patch).await?;
            if mode.is_human() {
                ui::entity_updated(&collection, &id);
                println!("{}", ui::entity_table(std::slice::from_ref(&entity)));
            } else {
                emit_json("update", serde_json::to_value(&entity)?)?;
            }
        }

        Commands::Delete { collection, id } => {
            let engine = config.open_engine(&base, &collection).await?;
            let removed = engine.delete(&id).await?;
            if mode.is_human() {
                if removed {
                    ui::entity_deleted(&collection, &id);
                } else {
                    ui::warn(&format!("{}/{} did not exist", collection, id));
                }
            } else {
                emit_json("delete", serde_json::json!({ "id": id, "removed": removed }))?;
            }
        }

        Commands::Search { collection, query, fields } => {
            let engine = config.open_engine(&base, &collection).await?;
            let fields: Vec<&str> = fields.iter().map(String::as_str).collect();
            let hits = engine.search(&query, &fields).await?;
            print_entities(mode, "search", &hits)?;
        }

        Commands::Find { collection, field, value } => {
            let engine = config.open_engine(&base, &collection).await?;
            let schema = config.schema_for(&collection)?;
            let value = parse_value(schema.as_ref(), &field, &value)?;
            let hits = engine.get_by_field(&field, value).await?;
            print_entities(mode, "find", &hits)?;
        }

        Commands::Count { collection } => {
            let engine = config.open_engine(&base, &collection).await?;
            let count = engine.count().await?;
            if mode.is_human() {
                ui::info(&collection, &count.to_string());
            } else {
                emit_json("count", serde_json::json!({ "collection": collection, "count": count }))?;
            }
        }

        Commands::Clear { collection } => {
            let engine = config.open_engine(&base, &collection).await?;
            engine.clear().await?;
            if mode.is_human() {
                ui::success(&format!("Cleared {}", collection));
            } else {
                emit_json("clear", serde_json::json!({ "collection": collection }))?;
            }
        }

        Commands::Stats => run_stats(&config, &base, mode).await?,
    }
    Ok(())
}

fn run_init(
    config_path: &Path,
    base: &Path,
    backend: Backend,
    force: bool,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let config = StowageConfig {
        backend,
        ..StowageConfig::default()
    };
    config::write_config(config_path, &config, force)?;

    let data_dir = match backend {
        Backend::Relational => config.database_path(base),
        Backend::Log => config.register_dir(base).join("placeholder"),
    };
    config::ensure_db_dir(&data_dir)?;
    config::ensure_gitignore(base)?;

    if mode.is_human() {
        ui::header("Initialized stowage");
        ui::summary_row("config", &config_path.display().to_string());
        ui::summary_row("backend", &format!("{:?}", backend).to_lowercase());
        println!();
        println!(
            "{}",
            ui::dim("Declare collections under [collections.<name>] in the config.")
        );
    } else {
        emit_json(
            "init",
            serde_json::json!({ "config": config_path.display().to_string(), "backend": backend }),
        )?;
    }
    Ok(())
}

async fn run_stats(config: &StowageConfig, base: &Path, mode: OutputMode) -> anyhow::Result<()> {
    let mut counts = Vec::new();
    for collection in config.known_collections(base).await? {
        let engine = config.open_engine(base, &collection).await?;
        let count = engine.count().await?;
        counts.push((collection, count));
    }

    let location = match config.backend {
        Backend::Relational => config.database_path(base),
        Backend::Log => config.register_dir(base),
    };

    if mode.is_human() {
        ui::section(&format!("{} Stowage", Icons::DATABASE));
        let backend = format!("{:?}", config.backend).to_lowercase();
        let location = location.display().to_string();
        let count_strings: Vec<(String, String)> = counts
            .iter()
            .map(|(name, count)| (name.clone(), count.to_string()))
            .collect();

        let mut rows: Vec<(&str, &str)> = vec![("Backend", backend.as_str()), ("Location", location.as_str())];
        rows.extend(count_strings.iter().map(|(n, c)| (n.as_str(), c.as_str())));
        println!("{}", ui::stats_table(&rows));
    } else {
        let collections: serde_json::Map<String, serde_json::Value> = counts
            .into_iter()
            .map(|(name, count)| (name, serde_json::json!(count)))
            .collect();
        emit_json(
            "stats",
            serde_json::json!({
                "backend": config.backend,
                "location": location.display().to_string(),
                "collections": collections,
            }),
        )?;
    }
    Ok(())
}

fn print_entities(mode: OutputMode, command: &str, entities: &[Entity]) -> anyhow::Result<()> {
    if mode.is_human() {
        if entities.is_empty() {
            println!("{}", ui::muted("(no entities)"));
        } else {
            println!("{}", ui::entity_table(entities));
        }
    } else {
        emit_json(command, serde_json::to_value(entities)?)?;
    }
    Ok(())
}

/// Parse `name=value` pairs, typed by the collection's schema when it has one
fn parse_assignments(config: &StowageConfig, collection: &str, sets: &[String]) -> anyhow::Result<Fields> {
    let schema = config.schema_for(collection)?;
    let mut fields = Fields::new();
    for set in sets {
        let (name, raw) = set
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected FIELD=VALUE, got {:?}", set))?;
        let name = name.trim();
        fields.insert(name.to_string(), parse_value(schema.as_ref(), name, raw)?);
    }
    Ok(fields)
}

fn parse_value(schema: Option<&SchemaDescriptor>, field: &str, raw: &str) -> anyhow::Result<Value> {
    // Unknown fields fall through untyped; the engine reports them.
    match schema.and_then(|s| s.field(field)) {
        Some(def) => Ok(Value::parse_as(field, raw, def.field_type)?),
        None => Ok(Value::infer(raw)),
    }
}
