//! Configuration management

use anyhow::Result;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub driver: String,
    pub url: String,
}

/// File locations used by a single ingestion run.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// The one CSV export picked up per run
    pub input_path: PathBuf,
    /// Consumed inputs are moved here as `input_<YYYYMMDD_HHMMSS>.csv`
    pub archive_dir: PathBuf,
    /// Per-batch CSV fact exports land in `output_dir/batch_<id>/`
    pub output_dir: PathBuf,
    #[serde(default = "default_export_csv")]
    pub export_csv: bool,
}

fn default_export_csv() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = "config.toml";

        let builder = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("DAMLOG").separator("__"));

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.http_port == 0 {
            anyhow::bail!("Invalid http_port: 0 is not allowed");
        }
        if self.server.host.is_empty() {
            anyhow::bail!("Server host cannot be empty");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.driver != "sqlite" {
            anyhow::bail!("Invalid database driver '{}'. Only 'sqlite' is supported", self.database.driver);
        }

        if self.ingest.input_path.as_os_str().is_empty() {
            anyhow::bail!("ingest.input_path cannot be empty");
        }
        if self.ingest.archive_dir.as_os_str().is_empty() {
            anyhow::bail!("ingest.archive_dir cannot be empty");
        }
        if self.ingest.export_csv && self.ingest.output_dir.as_os_str().is_empty() {
            anyhow::bail!("ingest.output_dir must be set when export_csv is enabled");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid logging level '{}'. Must be one of: {:?}", self.logging.level, valid_levels);
        }

        Ok(())
    }
}
