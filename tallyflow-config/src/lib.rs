//! Configuration for tallyflow workers.
//!
//! Settings are resolved from built-in defaults, an optional TOML file and
//! the process environment (with `.env` support), in that order of
//! increasing precedence. The resolved [`Config`] converts into the tuning
//! structs of `tallyflow-core`.

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::{
    BucketConfig, CategorizationConfig, Config, ConfigMetadata, DatabaseConfig,
    EngineSettings, RedisConfig, RetryConfig, TopologyConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
