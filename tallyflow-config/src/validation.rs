use thiserror::Error;

use super::models::Config;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error("{field} must not be zero")]
    Zero { field: &'static str },
    #[error(
        "notification bucket size must be at least 2 (got {size}); bucket 0 would hold no rows"
    )]
    NotificationBucketTooSmall { size: i64 },
    #[error("topology name must not be empty")]
    EmptyTopology,
    #[error(
        "database min_connections ({min}) exceeds max_connections ({max})"
    )]
    PoolBounds { min: u32, max: u32 },
    #[error("invalid {field} URL")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if config.engine.cache_capacity == 0 {
        return Err(ConfigGuardRailError::Zero {
            field: "engine.cache_capacity",
        });
    }
    if config.engine.max_error_types_per_task == 0 {
        return Err(ConfigGuardRailError::Zero {
            field: "engine.max_error_types_per_task",
        });
    }
    if config.buckets.notification_bucket_size < 2 {
        return Err(ConfigGuardRailError::NotificationBucketTooSmall {
            size: config.buckets.notification_bucket_size,
        });
    }
    // BRPOP blocks forever on a zero timeout.
    if config.redis.poll_timeout.is_zero() {
        return Err(ConfigGuardRailError::Zero {
            field: "redis.poll_timeout",
        });
    }
    if config.topology.name.trim().is_empty() {
        return Err(ConfigGuardRailError::EmptyTopology);
    }
    if config.database.max_connections == 0 {
        return Err(ConfigGuardRailError::Zero {
            field: "database.max_connections",
        });
    }
    if config.database.min_connections > config.database.max_connections {
        return Err(ConfigGuardRailError::PoolBounds {
            min: config.database.min_connections,
            max: config.database.max_connections,
        });
    }

    url::Url::parse(&config.database.url).map_err(|source| {
        ConfigGuardRailError::InvalidUrl {
            field: "database",
            source,
        }
    })?;
    url::Url::parse(&config.redis.url).map_err(|source| {
        ConfigGuardRailError::InvalidUrl {
            field: "redis",
            source,
        }
    })?;

    if config.topology.topics.is_empty() {
        warnings.push_with_hint(
            "No topics configured; startup reconciliation is skipped",
            "Set TALLYFLOW_TOPICS or add topics to the [topology] section",
        );
    }

    if config.engine.max_error_samples_per_type == 0 {
        warnings.push(
            "max_error_samples_per_type is 0; error types are counted without samples",
        );
    }

    Ok(warnings)
}
