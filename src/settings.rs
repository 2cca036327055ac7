use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment};
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://dungeonedraghi.it/compendio/incantesimi/";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Runtime settings: built-in defaults overridden by `SPELLS_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub base_url: String,
    pub timeout_secs: u64,
    pub batch_size: usize,
    pub bind: String,
    pub user_agent: String,
    pub accept_language: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::from_env(Environment::with_prefix("SPELLS"))
    }

    fn from_env(env: Environment) -> Result<Self> {
        let settings: Settings = Config::builder()
            .set_default("db_path", "data/magic_enchant.db")?
            .set_default("base_url", DEFAULT_BASE_URL)?
            .set_default("timeout_secs", 30_i64)?
            .set_default("batch_size", 25_i64)?
            .set_default("bind", "127.0.0.1:5178")?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .set_default("accept_language", "it-IT,it;q=0.9,en;q=0.8")?
            .add_source(env.try_parsing(true))
            .build()
            .context("Failed to build settings")?
            .try_deserialize()
            .context("Invalid SPELLS_* settings")?;

        if settings.batch_size == 0 {
            bail!("SPELLS_BATCH_SIZE must be at least 1");
        }
        Ok(settings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
