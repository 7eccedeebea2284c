use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::transform::UnspentPolicy;

/// Which of the two chain linkage regimes is active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LinkageMode {
    /// Initial sync: blocks are staged without hooks and linkage is repaired
    /// once per batch.
    #[default]
    Bulk,
    /// Steady state: every insert and delete updates its predecessor.
    Incremental,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub pool_size: u32,
    pub connection_timeout_secs: u64,
    /// Parallel transform workers
    pub workers: usize,
    pub unspent_policy: UnspentPolicy,
    pub linkage_mode: LinkageMode,
    pub log_format: LogFormat,
}

impl Settings {
    /// Loads settings from defaults, an optional `indexer.toml` and
    /// `INDEXER_*` environment variables, later sources winning.
    /// `DATABASE_URL` is used when `INDEXER_DATABASE_URL` is not set.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let mut builder = Config::builder()
            .set_default("database_url", "")?
            .set_default("pool_size", 10)?
            .set_default("connection_timeout_secs", 30)?
            .set_default("workers", workers as i64)?
            .set_default("unspent_policy", "retain")?
            .set_default("linkage_mode", "bulk")?
            .set_default("log_format", "text")?;
        if let Ok(url) = env::var("DATABASE_URL") {
            builder = builder.set_default("database_url", url)?;
        }

        let settings: Settings = builder
            .add_source(File::with_name("indexer").required(false))
            .add_source(Environment::with_prefix("INDEXER"))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if settings.workers == 0 {
            anyhow::bail!("workers must be at least 1");
        }
        Ok(settings)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// The database url, or an error naming both variables that can set it.
    pub fn require_database_url(&self) -> Result<&str> {
        if self.database_url.is_empty() {
            anyhow::bail!("DATABASE_URL or INDEXER_DATABASE_URL must be set");
        }
        Ok(&self.database_url)
    }
}
