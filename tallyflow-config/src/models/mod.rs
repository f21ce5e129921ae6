pub mod sources;

use std::{path::PathBuf, time::Duration};

use tallyflow_core::{
    bucket::BucketCount,
    categorize::{DEFAULT_DATE_STAMP_SLACK_DAYS, DateStampCategorization},
    harvest::{
        HarvestSettings,
        identifiers::{DEFAULT_HARVEST_RETRIES, DEFAULT_HARVEST_SLEEP_MS},
    },
    notification::EngineConfig,
    retry::{DEFAULT_RETRIES, DEFAULT_SLEEP_MS, RetryPolicy},
};

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/tallyflow";
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_QUEUE_KEY: &str = "tallyflow:notifications";
pub const DEFAULT_DEAD_LETTER_KEY: &str = "tallyflow:notifications:dead";
pub const DEFAULT_TOPOLOGY: &str = "default";

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub retry: RetryConfig,
    pub engine: EngineSettings,
    pub buckets: BucketConfig,
    pub categorization: CategorizationConfig,
    pub topology: TopologyConfig,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Tuning for the notification engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            cache_capacity: self.engine.cache_capacity,
            retry: self.retry.storage_policy(),
            notification_bucket_size: self.buckets.notification_bucket_size,
            processed_record_buckets: self.buckets.processed_records,
            max_error_samples_per_type: self.engine.max_error_samples_per_type,
            max_error_types_per_task: self.engine.max_error_types_per_task,
        }
    }

    pub fn harvest_settings(&self) -> HarvestSettings {
        HarvestSettings {
            processed_record_buckets: self.buckets.processed_records,
            retry: self.retry.storage_policy(),
            ..HarvestSettings::default()
        }
    }

    pub fn categorization_rule(&self) -> DateStampCategorization {
        DateStampCategorization {
            slack: self.categorization.slack_as_chrono(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            min_connections: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    /// List the worker pops events from.
    pub queue_key: String,
    pub dead_letter_key: String,
    pub poll_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            dead_letter_key: DEFAULT_DEAD_LETTER_KEY.to_string(),
            poll_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub retries: u32,
    pub sleep: Duration,
    pub harvest_retries: u32,
    pub harvest_sleep: Duration,
}

impl RetryConfig {
    pub fn storage_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, self.sleep)
    }

    pub fn harvest_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.harvest_retries, self.harvest_sleep)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            sleep: Duration::from_millis(DEFAULT_SLEEP_MS),
            harvest_retries: DEFAULT_HARVEST_RETRIES,
            harvest_sleep: Duration::from_millis(DEFAULT_HARVEST_SLEEP_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub cache_capacity: usize,
    pub max_error_samples_per_type: i64,
    pub max_error_types_per_task: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let defaults = EngineConfig::default();
        Self {
            cache_capacity: defaults.cache_capacity,
            max_error_samples_per_type: defaults.max_error_samples_per_type,
            max_error_types_per_task: defaults.max_error_types_per_task,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    pub processed_records: BucketCount,
    pub harvested_records: BucketCount,
    /// Sequence numbers per notifications bucket.
    pub notification_bucket_size: i64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            processed_records: BucketCount::PROCESSED_RECORDS,
            harvested_records: BucketCount::HARVESTED_RECORDS,
            notification_bucket_size: EngineConfig::default().notification_bucket_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorizationConfig {
    /// Tolerance between a record's date stamp and its last publication.
    pub slack: Duration,
}

impl CategorizationConfig {
    pub fn slack_as_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.slack).unwrap_or_else(|_| {
            chrono::Duration::days(DEFAULT_DATE_STAMP_SLACK_DAYS)
        })
    }
}

impl Default for CategorizationConfig {
    fn default() -> Self {
        Self {
            slack: Duration::from_secs(
                DEFAULT_DATE_STAMP_SLACK_DAYS.unsigned_abs() * SECONDS_PER_DAY,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyConfig {
    pub name: String,
    /// Topics whose task index is reconciled on startup.
    pub topics: Vec<String>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_TOPOLOGY.to_string(),
            topics: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
