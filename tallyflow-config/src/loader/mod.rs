pub mod error;

use once_cell::sync::Lazy;
use std::{fs, path::PathBuf, time::Duration};
use tallyflow_core::bucket::BucketCount;
use tracing::debug;

use self::error::ConfigLoadError;
use crate::{
    models::{
        BucketConfig, CategorizationConfig, Config, ConfigMetadata,
        DatabaseConfig, EngineSettings, RedisConfig, RetryConfig,
        TopologyConfig,
        sources::{EnvConfig, FileConfig},
    },
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("tallyflow.toml"),
        PathBuf::from("config/tallyflow.toml"),
    ]
});

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Reads `.env`, the process environment and the config file.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Same as [`ConfigLoader::load`] with an already gathered environment.
    pub fn load_with_env(
        &self,
        env_config: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env_config)?;

        let mut warnings = ConfigWarnings::default();
        if config_path.is_none() {
            warnings.push_with_hint(
                "No tallyflow.toml detected; falling back to environment variables",
                "Set TALLYFLOW_CONFIG or place tallyflow.toml in the working directory",
            );
        }

        let config = compose_config(
            file_config.unwrap_or_default(),
            env_config,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        )?;

        warnings.extend(validation::apply_guard_rails(&config)?);

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env_config.config_path {
            source.env = Some(from_env.clone());
        }

        if source.is_empty() {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
                .cloned();
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        debug!(path = %path.display(), ?provenance, "Reading configuration file");

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file: FileConfig,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        database: file_database,
        redis: file_redis,
        retry: file_retry,
        engine: file_engine,
        buckets: file_buckets,
        categorization: file_categorization,
        topology: file_topology,
    } = file;

    let database_defaults = DatabaseConfig::default();
    let database = DatabaseConfig {
        url: env
            .database_url
            .or(file_database.url)
            .unwrap_or(database_defaults.url),
        max_connections: file_database
            .max_connections
            .unwrap_or(database_defaults.max_connections),
        min_connections: file_database
            .min_connections
            .unwrap_or(database_defaults.min_connections),
    };

    let redis_defaults = RedisConfig::default();
    let redis = RedisConfig {
        url: env.redis_url.or(file_redis.url).unwrap_or(redis_defaults.url),
        queue_key: file_redis.queue_key.unwrap_or(redis_defaults.queue_key),
        dead_letter_key: file_redis
            .dead_letter_key
            .unwrap_or(redis_defaults.dead_letter_key),
        poll_timeout: parse_duration(
            "redis.poll_timeout",
            file_redis.poll_timeout,
            redis_defaults.poll_timeout,
        )?,
    };

    let retry_defaults = RetryConfig::default();
    let retry = RetryConfig {
        retries: env
            .retries
            .or(file_retry.retries)
            .unwrap_or(retry_defaults.retries),
        sleep: parse_duration(
            "retry.sleep",
            env.retry_sleep.or(file_retry.sleep),
            retry_defaults.sleep,
        )?,
        harvest_retries: file_retry
            .harvest_retries
            .unwrap_or(retry_defaults.harvest_retries),
        harvest_sleep: parse_duration(
            "retry.harvest_sleep",
            file_retry.harvest_sleep,
            retry_defaults.harvest_sleep,
        )?,
    };

    let engine_defaults = EngineSettings::default();
    let engine = EngineSettings {
        cache_capacity: env
            .cache_capacity
            .or(file_engine.cache_capacity)
            .unwrap_or(engine_defaults.cache_capacity),
        max_error_samples_per_type: file_engine
            .max_error_samples_per_type
            .unwrap_or(engine_defaults.max_error_samples_per_type),
        max_error_types_per_task: file_engine
            .max_error_types_per_task
            .unwrap_or(engine_defaults.max_error_types_per_task),
    };

    let bucket_defaults = BucketConfig::default();
    let buckets = BucketConfig {
        processed_records: bucket_count(
            "buckets.processed_records",
            file_buckets.processed_records,
            bucket_defaults.processed_records,
        )?,
        harvested_records: bucket_count(
            "buckets.harvested_records",
            file_buckets.harvested_records,
            bucket_defaults.harvested_records,
        )?,
        notification_bucket_size: file_buckets
            .notification_bucket_size
            .unwrap_or(bucket_defaults.notification_bucket_size),
    };

    let categorization = CategorizationConfig {
        slack: parse_duration(
            "categorization.slack",
            file_categorization.slack,
            CategorizationConfig::default().slack,
        )?,
    };

    let topology_defaults = TopologyConfig::default();
    let topology = TopologyConfig {
        name: env
            .topology
            .or(file_topology.name)
            .unwrap_or(topology_defaults.name),
        topics: env
            .topics
            .or(file_topology.topics)
            .unwrap_or(topology_defaults.topics),
    };

    Ok(Config {
        database,
        redis,
        retry,
        engine,
        buckets,
        categorization,
        topology,
        metadata,
    })
}

fn parse_duration(
    field: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match raw {
        Some(value) => humantime::parse_duration(value.trim()).map_err(
            |source| ConfigLoadError::InvalidDuration {
                field,
                value,
                source,
            },
        ),
        None => Ok(default),
    }
}

fn bucket_count(
    field: &'static str,
    raw: Option<u16>,
    default: BucketCount,
) -> Result<BucketCount, ConfigLoadError> {
    match raw {
        Some(count) => BucketCount::new(count)
            .ok_or(ConfigLoadError::Invalid(ConfigGuardRailError::Zero { field })),
        None => Ok(default),
    }
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn is_empty(&self) -> bool {
        self.explicit.is_none() && self.env.is_none() && self.default.is_none()
    }

    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(
            self,
            ConfigPathProvenance::Explicit | ConfigPathProvenance::Env
        )
    }
}
