use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::storage::DEFAULT_MAX_CONNECTIONS;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ConfigDbConfig {
    /// Database file, relative to the directory holding the config
    pub database: Option<String>,
    pub max_connections: Option<usize>,
    /// Create the schema on open when it is missing
    pub init_db: Option<bool>,
}

impl ConfigDbConfig {
    pub fn database_path(&self, base: &Path) -> PathBuf {
        match &self.database {
            Some(db) => base.join(db),
            None => default_database_path_in(base),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS).max(1)
    }

    pub fn init_db(&self) -> bool {
        self.init_db.unwrap_or(true)
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("configdb.toml")
}

pub fn default_database_path_in(base: &Path) -> PathBuf {
    base.join(".configdb").join("config.db")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<ConfigDbConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: ConfigDbConfig = toml::from_str(&contents)?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &ConfigDbConfig, force: bool) -> anyhow::Result<()> {
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
