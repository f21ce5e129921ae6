use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub redis: FileRedisConfig,
    #[serde(default)]
    pub retry: FileRetryConfig,
    #[serde(default)]
    pub engine: FileEngineConfig,
    #[serde(default)]
    pub buckets: FileBucketConfig,
    #[serde(default)]
    pub categorization: FileCategorizationConfig,
    #[serde(default)]
    pub topology: FileTopologyConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letter_key: Option<String>,
    /// Humantime string, e.g. `"5s"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRetryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sleep: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harvest_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harvest_sleep: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileEngineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_error_samples_per_type: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_error_types_per_task: Option<usize>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileBucketConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_records: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harvested_records: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_bucket_size: Option<i64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCategorizationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slack: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileTopologyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
}

/// Values gathered from the process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub retries: Option<u32>,
    pub retry_sleep: Option<String>,
    pub cache_capacity: Option<usize>,
    pub topology: Option<String>,
    pub topics: Option<Vec<String>>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        let mut env_config = Self::default();

        env_config.config_path =
            std::env::var("TALLYFLOW_CONFIG").ok().map(PathBuf::from);
        env_config.database_url = std::env::var("DATABASE_URL").ok();
        env_config.redis_url = std::env::var("REDIS_URL").ok();
        env_config.retries = std::env::var("TALLYFLOW_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok());
        env_config.retry_sleep = std::env::var("TALLYFLOW_RETRY_SLEEP").ok();
        env_config.cache_capacity = std::env::var("TALLYFLOW_CACHE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok());
        env_config.topology = std::env::var("TALLYFLOW_TOPOLOGY").ok();
        env_config.topics = parse_csv_var("TALLYFLOW_TOPICS");

        env_config
    }
}

fn parse_csv_var(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|raw| split_csv(&raw))
}

pub(crate) fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|part| {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}
