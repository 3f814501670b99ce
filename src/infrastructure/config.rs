//! Layered application configuration.
//!
//! Defaults live in code; a `tonearm.toml` next to the binary and
//! `TONEARM__`-prefixed environment variables override them, in that order.

use serde::{Deserialize, Serialize};

use crate::infrastructure::http_client::HttpClientConfig;

/// Worker count floor used when the host parallelism cannot be determined.
pub const MIN_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database URL, e.g. `sqlite:data/tonearm.db`.
    pub database_url: String,

    /// Hours between automatic update runs.
    pub update_interval_hours: u64,

    /// Drop unchanged pages instead of forwarding them.
    pub filter_unchanged: bool,

    /// Workers per pipeline stage; 0 means available parallelism (floor 4).
    pub concurrency: usize,

    pub source: HttpClientConfig,

    pub providers: ProvidersConfig,

    /// Optional directory for rolling log files; stdout only when unset.
    pub log_dir: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:data/tonearm.db".to_string(),
            update_interval_hours: 48,
            filter_unchanged: false,
            concurrency: 0,
            source: HttpClientConfig::default(),
            providers: ProvidersConfig::default(),
            log_dir: None,
        }
    }
}

impl AppConfig {
    /// Loads configuration from file and environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("tonearm").required(false))
            .add_source(config::Environment::with_prefix("TONEARM").separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Effective per-stage worker count.
    #[must_use]
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            return self.concurrency;
        }
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(MIN_CONCURRENCY)
            .max(MIN_CONCURRENCY)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub spotify: SpotifyConfig,
    /// Comma-separated provider names enabled for artist search.
    pub artist_providers: String,
    /// Comma-separated provider names enabled for album search.
    pub album_providers: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
}
