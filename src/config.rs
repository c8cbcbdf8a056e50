use chrono::Duration;
use serde::Deserialize;

use crate::models::SeedTitle;
use crate::services::catalogue::CatalogueSettings;
use crate::services::session_engine::SessionSettings;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Redis connection URL, used for the catalogue snapshot and TMDb lookups
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// TMDb API key
    pub tmdb_api_key: String,

    /// TMDb API base URL
    #[serde(default = "default_tmdb_api_url")]
    pub tmdb_api_url: String,

    /// Age after which a loaded snapshot triggers a background rebuild
    #[serde(default = "default_catalogue_ttl_hours")]
    pub catalogue_ttl_hours: i64,

    /// Interval between scheduled catalogue rebuilds
    #[serde(default = "default_catalogue_refresh_minutes")]
    pub catalogue_refresh_minutes: u64,

    /// Per-bucket upstream timeout
    #[serde(default = "default_bucket_timeout_secs")]
    pub bucket_timeout_secs: u64,

    /// Result pages fetched per list bucket
    #[serde(default = "default_pages_per_bucket")]
    pub pages_per_bucket: u32,

    #[serde(default = "default_display_per_bucket")]
    pub display_per_bucket: usize,

    #[serde(default = "default_display_limit")]
    pub display_limit: usize,

    /// Session lifetime measured from creation
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: i64,

    #[serde(default = "default_session_sweep_secs")]
    pub session_sweep_secs: u64,

    /// Base number of rounds per session, before skips
    #[serde(default = "default_total_rounds")]
    pub total_rounds: u32,

    #[serde(default = "default_recommendation_count")]
    pub recommendation_count: usize,

    /// Comma separated `Title (Year)` entries pinned into the "Staff Picks" bucket
    #[serde(default)]
    pub catalogue_seed_titles: Vec<String>,

    /// Comma separated TMDb ids pinned into the "Staff Picks" bucket
    #[serde(default)]
    pub catalogue_seed_ids: Vec<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_tmdb_api_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}

fn default_catalogue_ttl_hours() -> i64 {
    24
}

fn default_catalogue_refresh_minutes() -> u64 {
    360
}

fn default_bucket_timeout_secs() -> u64 {
    20
}

fn default_pages_per_bucket() -> u32 {
    2
}

fn default_display_per_bucket() -> usize {
    8
}

fn default_display_limit() -> usize {
    60
}

fn default_session_ttl_secs() -> i64 {
    3600
}

fn default_session_sweep_secs() -> u64 {
    300
}

fn default_total_rounds() -> u32 {
    7
}

fn default_recommendation_count() -> usize {
    5
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the engines cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.total_rounds < 1 {
            anyhow::bail!("TOTAL_ROUNDS must be at least 1");
        }
        if self.session_ttl_secs < 1 {
            anyhow::bail!("SESSION_TTL_SECS must be at least 1");
        }
        Ok(())
    }

    /// Seeds for the "Staff Picks" bucket, titles first then ids
    pub fn seed_titles(&self) -> Vec<SeedTitle> {
        self.catalogue_seed_titles
            .iter()
            .filter_map(|raw| SeedTitle::parse(raw))
            .chain(self.catalogue_seed_ids.iter().map(|id| SeedTitle::ById(*id)))
            .collect()
    }

    pub fn catalogue_settings(&self) -> CatalogueSettings {
        CatalogueSettings {
            ttl: Duration::hours(self.catalogue_ttl_hours),
            bucket_timeout: std::time::Duration::from_secs(self.bucket_timeout_secs),
            display_per_bucket: self.display_per_bucket,
            display_limit: self.display_limit,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            total_rounds: self.total_rounds,
            ttl: Duration::seconds(self.session_ttl_secs),
        }
    }
}
