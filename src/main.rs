//! configdb CLI - inspect and maintain a configuration object store

use clap::{Parser, Subcommand, ValueEnum};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use configdb::catalog::default_registry;
use configdb::config::{self, ConfigDbConfig};
use configdb::storage::SqliteStore;
use configdb::ui::{self, theme, Icons};
use configdb::ConfigDatabase;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "configdb")]
#[command(version)]
#[command(about = "Relational configuration object store")]
#[command(long_about = r#"
configdb keeps configuration entities (workspaces, data stores, services)
in four generic SQLite tables shared by several server processes.

Example usage:
  configdb init
  configdb types
  configdb list --type workspace
  configdb find --type datastore --property workspace --value wsid
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides the config file
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file and create the database schema
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Show row counts and schema version
    Stats,

    /// List known types with their indexed properties
    Types,

    /// List the objects of one type
    List {
        #[arg(short, long = "type")]
        type_name: String,
    },

    /// Show one object and its property rows
    Show {
        id: String,
    },

    /// Find objects of a type by indexed property value
    Find {
        #[arg(short, long = "type")]
        type_name: String,

        #[arg(short, long)]
        property: String,

        #[arg(long)]
        value: String,
    },

    /// Delete an object and its property rows
    Remove {
        id: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(&cli) {
        ui::error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);

    if let Commands::Init { force } = &cli.command {
        return init(cli, &config_path, *force);
    }

    let settings = config::load_config(Some(&config_path))?.unwrap_or_default();
    let db_path = resolve_db_path(cli, &config_path, &settings);
    if !db_path.exists() {
        anyhow::bail!("no database at {} (run `configdb init` first)", db_path.display());
    }
    let store = SqliteStore::open_with(&db_path, settings.max_connections(), settings.init_db())?;

    match &cli.command {
        Commands::Init { .. } => unreachable!("handled above"),

        Commands::Stats => {
            let stats = store.stats()?;
            if cli.format == Format::Json {
                emit(&serde_json::json!({
                    "database": db_path.display().to_string(),
                    "schema_version": stats.schema_version,
                    "types": stats.types,
                    "property_types": stats.property_types,
                    "objects": stats.objects,
                    "properties": stats.properties,
                }))?;
            } else {
                ui::header(Icons::STATS, &format!("configdb statistics ({})", db_path.display()));
                let rows = [
                    ("Schema version", stats.schema_version.to_string()),
                    ("Types", stats.types.to_string()),
                    ("Property types", stats.property_types.to_string()),
                    ("Objects", stats.objects.to_string()),
                    ("Property rows", stats.properties.to_string()),
                ];
                let rows: Vec<(&str, &str)> = rows.iter().map(|(k, v)| (*k, v.as_str())).collect();
                println!("{}", ui::stats_table(&rows));
            }
        }

        Commands::Types => {
            let mut types = Vec::new();
            for summary in store.list_types()? {
                let props = store.property_types(&summary.name)?;
                types.push((summary, props));
            }
            if cli.format == Format::Json {
                let data: Vec<_> = types
                    .iter()
                    .map(|(summary, props)| {
                        serde_json::json!({
                            "type": summary.name,
                            "objects": summary.objects,
                            "properties": props.iter().map(|p| serde_json::json!({
                                "name": p.name,
                                "indexed": p.indexed,
                            })).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                emit(&serde_json::json!(data))?;
            } else if types.is_empty() {
                ui::warn("No types registered yet");
            } else {
                ui::header(Icons::PACKAGE, "Types");
                println!("{}", ui::types_table(&types));
            }
        }

        Commands::List { type_name } => {
            let ids = store.select_ids_by_type(type_name)?;
            let rows = ids
                .iter()
                .map(|id| store.select_by_id(id))
                .collect::<configdb::Result<Vec<_>>>()?;
            print_rows(cli.format, &format!("{} objects", type_name), &rows)?;
        }

        Commands::Show { id } => {
            let row = store.select_by_id(id)?;
            let props = store.properties_of(id)?;
            if cli.format == Format::Json {
                let blob: serde_json::Value = serde_json::from_str(&row.blob)?;
                emit(&serde_json::json!({
                    "id": row.id,
                    "type": row.type_name,
                    "object": blob,
                    "properties": props.iter().cloned().collect::<std::collections::BTreeMap<_, _>>(),
                }))?;
            } else {
                ui::header(Icons::MAG, &row.id.style(theme().key.clone()).to_string());
                ui::summary_row("Type:", &row.type_name);
                ui::summary_row("Blob:", &row.blob);
                if !props.is_empty() {
                    ui::section("Property rows");
                    println!("{}", ui::properties_table(&props));
                }
            }
        }

        Commands::Find { type_name, property, value } => {
            let ids = store.select_by_type_and_property(type_name, property, value)?;
            let rows = ids
                .iter()
                .map(|id| store.select_by_id(id))
                .collect::<configdb::Result<Vec<_>>>()?;
            print_rows(cli.format, &format!("{} where {} = {}", type_name, property, value), &rows)?;
        }

        Commands::Remove { id } => {
            let db = ConfigDatabase::new(store, default_registry());
            db.remove(id)?;
            db.dispose();
            if cli.format == Format::Json {
                emit(&serde_json::json!({ "removed": id }))?;
            } else {
                ui::success(&format!("Removed {}", id));
            }
        }
    }
    Ok(())
}

fn init(cli: &Cli, config_path: &Path, force: bool) -> anyhow::Result<()> {
    let settings = ConfigDbConfig {
        database: cli.database.as_ref().map(|p| p.display().to_string()),
        ..ConfigDbConfig::default()
    };
    config::write_config(config_path, &settings, force)?;

    let db_path = resolve_db_path(cli, config_path, &settings);
    config::ensure_db_dir(&db_path)?;
    let store = SqliteStore::open_with(&db_path, settings.max_connections(), true)?;
    let version = store.stats()?.schema_version;
    store.close();

    if cli.format == Format::Json {
        emit(&serde_json::json!({
            "config": config_path.display().to_string(),
            "database": db_path.display().to_string(),
            "schema_version": version,
        }))?;
    } else {
        ui::success(&format!("Wrote {}", config_path.display()));
        ui::info("Database", &db_path.display().to_string());
        ui::info("Schema version", &version.to_string());
    }
    Ok(())
}

/// `--database` wins; otherwise the config file decides, relative to its
/// own directory
fn resolve_db_path(cli: &Cli, config_path: &Path, settings: &ConfigDbConfig) -> PathBuf {
    if let Some(db) = &cli.database {
        return db.clone();
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    settings.database_path(base)
}

fn print_rows(format: Format, title: &str, rows: &[configdb::ObjectRow]) -> anyhow::Result<()> {
    if format == Format::Json {
        let data = rows
            .iter()
            .map(|row| {
                Ok(serde_json::json!({
                    "id": row.id,
                    "type": row.type_name,
                    "object": serde_json::from_str::<serde_json::Value>(&row.blob)?,
                }))
            })
            .collect::<serde_json::Result<Vec<_>>>()?;
        return emit(&serde_json::json!(data));
    }

    if rows.is_empty() {
        ui::warn(&format!("No {}", title));
        return Ok(());
    }
    ui::header(Icons::DATABASE, &format!("{} ({})", title, rows.len()));
    println!("{}", ui::objects_table(rows));
    println!("{}", ui::muted(&format!("{} {} row(s)", Icons::LINK, rows.len())));
    Ok(())
}

fn emit(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
