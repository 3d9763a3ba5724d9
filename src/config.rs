use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub sources: SourcesConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Directory scanned for authentication source files.
    pub dir: PathBuf,
    pub suffix: String,
    /// Copy the new default's settings into every other file source when
    /// the default changes.
    #[serde(default)]
    pub mirror_default_config: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub db_type: String,
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sources: SourcesConfig {
                dir: PathBuf::from("custom/conf/auth.d"),
                suffix: ".conf".to_string(),
                mirror_default_config: false,
            },
            database: None,
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.suffix.is_empty() {
            return Err(anyhow!("Source file suffix cannot be empty"));
        }

        if let Some(db) = &self.database {
            if !["mysql", "postgres", "pgsql", "postgresql"].contains(&db.db_type.to_lowercase().as_str()) {
                return Err(anyhow!("Unsupported database type: {}", db.db_type));
            }
            if db.url.is_empty() {
                return Err(anyhow!("Database URL cannot be empty"));
            }
            if db.max_connections == 0 {
                return Err(anyhow!("Max connections must be greater than 0"));
            }
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(anyhow!("Invalid log level: {}", self.logging.level));
        }

        Ok(())
    }
}
