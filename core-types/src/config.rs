use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};

/// Config structure with the key ingestion knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Rows reconciled per chunk before progress is reported and buffers dropped.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Simultaneous ingestion jobs. Kept low on purpose to bound memory.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Wall-clock ceiling for one job.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Whole-job attempts on transient failure.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_chunk_size() -> usize {
    250
}

fn default_max_concurrent_jobs() -> usize {
    1
}

fn default_job_timeout_secs() -> u64 {
    30 * 60
}

fn default_max_attempts() -> usize {
    3
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            job_timeout_secs: default_job_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub base_url: String,
    /// TTL for cached third-party auth tokens.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

fn default_token_ttl_secs() -> u64 {
    50 * 60
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

impl AppConfig {
    /// Layered load: optional `catalog.toml` in the working directory, then
    /// `CATALOG__*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(config::File::with_name("catalog").required(false))
            .add_source(config::Environment::with_prefix("CATALOG").separator("__"))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_knobs() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.ingest.chunk_size, 250);
        assert_eq!(cfg.ingest.max_concurrent_jobs, 1);
        assert_eq!(cfg.ingest.job_timeout_secs, 1800);
        assert_eq!(cfg.ingest.max_attempts, 3);
    }

    #[test]
    fn deserializes_partial_sections() {
        let cfg: AppConfig =
            serde_json::from_str(r#"{"ingest": {"chunk_size": 50}}"#).unwrap();
        assert_eq!(cfg.ingest.chunk_size, 50);
        assert_eq!(cfg.ingest.max_attempts, 3);
    }
}
