use std::{fs, time::Duration};

use tallyflow_config::{
    ConfigLoadError, ConfigLoader, models::sources::EnvConfig,
};
use tallyflow_core::bucket::BucketCount;

const SAMPLE: &str = r#"
[database]
url = "postgres://tally:secret@db:5432/tallyflow"
max_connections = 4

[redis]
queue_key = "oai:notifications"
poll_timeout = "2s"

[retry]
retries = 3
sleep = "250ms"

[buckets]
processed_records = 16
notification_bucket_size = 500

[categorization]
slack = "36h"

[topology]
name = "oai_topology"
topics = ["oai_topic_1", "oai_topic_2"]
"#;

#[test]
fn file_values_override_defaults() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tallyflow.toml");
    fs::write(&path, SAMPLE)?;

    let load = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(EnvConfig::default(), false)?;
    let config = load.config;

    assert_eq!(config.database.url, "postgres://tally:secret@db:5432/tallyflow");
    assert_eq!(config.database.max_connections, 4);
    assert_eq!(config.redis.queue_key, "oai:notifications");
    assert_eq!(config.redis.poll_timeout, Duration::from_secs(2));
    assert_eq!(config.retry.retries, 3);
    assert_eq!(config.retry.sleep, Duration::from_millis(250));
    assert_eq!(config.retry.harvest_retries, 3);
    assert_eq!(config.buckets.processed_records.get(), 16);
    assert_eq!(config.buckets.harvested_records, BucketCount::HARVESTED_RECORDS);
    assert_eq!(config.topology.topics.len(), 2);
    assert_eq!(config.metadata.config_path.as_deref(), Some(path.as_path()));
    assert!(load.warnings.is_empty());

    let engine = config.engine_config();
    assert_eq!(engine.notification_bucket_size, 500);
    assert_eq!(engine.cache_capacity, 50);
    assert_eq!(engine.retry.retries, 3);
    assert_eq!(
        config.categorization_rule().slack,
        chrono::Duration::hours(36)
    );

    let harvest = config.harvest_settings();
    assert_eq!(harvest.processed_record_buckets.get(), 16);
    assert_eq!(harvest.retry.sleep(), Duration::from_millis(250));
    let listing = config.retry.harvest_policy();
    assert_eq!(listing.retries, 3);
    assert_eq!(listing.sleep(), Duration::from_secs(5));
    Ok(())
}

#[test]
fn environment_wins_over_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tallyflow.toml");
    fs::write(&path, SAMPLE)?;

    let env = EnvConfig {
        database_url: Some("postgres://override/tallyflow".into()),
        retries: Some(7),
        retry_sleep: Some("1s".into()),
        cache_capacity: Some(5),
        topology: Some("xslt_topology".into()),
        topics: Some(vec!["xslt_topic".into()]),
        ..EnvConfig::default()
    };

    let config = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(env, true)?
        .config;

    assert_eq!(config.database.url, "postgres://override/tallyflow");
    assert_eq!(config.retry.retries, 7);
    assert_eq!(config.retry.sleep, Duration::from_secs(1));
    assert_eq!(config.engine.cache_capacity, 5);
    assert_eq!(config.topology.name, "xslt_topology");
    assert_eq!(config.topology.topics, vec!["xslt_topic".to_string()]);
    assert!(config.metadata.env_file_loaded);
    Ok(())
}

#[test]
fn env_config_path_is_used_when_no_explicit_path() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("custom.toml");
    fs::write(&path, "[topology]\nname = \"from_env_path\"\n")?;

    let env = EnvConfig {
        config_path: Some(path.clone()),
        ..EnvConfig::default()
    };
    let config = ConfigLoader::new().load_with_env(env, false)?.config;

    assert_eq!(config.topology.name, "from_env_path");
    Ok(())
}

#[test]
fn missing_explicit_file_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let missing = dir.path().join("absent.toml");

    let result = ConfigLoader::new()
        .with_config_path(&missing)
        .load_with_env(EnvConfig::default(), false);

    assert!(matches!(
        result,
        Err(ConfigLoadError::MissingConfig { path }) if path == missing
    ));
    Ok(())
}

#[test]
fn defaults_apply_without_any_file() -> anyhow::Result<()> {
    let load = ConfigLoader::new().load_with_env(EnvConfig::default(), false)?;

    assert!(load.config.metadata.config_path.is_none());
    assert_eq!(load.config.retry.retries, 10);
    assert_eq!(load.config.retry.sleep, Duration::from_secs(5));
    assert_eq!(load.config.buckets.notification_bucket_size, 10_000);
    assert_eq!(
        load.config.categorization_rule().slack,
        chrono::Duration::days(2)
    );
    // no file and no topics
    assert_eq!(load.warnings.items.len(), 2);
    Ok(())
}

#[test]
fn malformed_file_reports_parse_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tallyflow.toml");
    fs::write(&path, "[retry\nretries = ")?;

    let result = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(EnvConfig::default(), false);

    assert!(matches!(result, Err(ConfigLoadError::Parse { .. })));
    Ok(())
}

#[test]
fn single_row_notification_buckets_fail_validation() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tallyflow.toml");
    fs::write(&path, "[buckets]\nnotification_bucket_size = 1\n")?;

    let result = ConfigLoader::new()
        .with_config_path(&path)
        .load_with_env(EnvConfig::default(), false);

    assert!(matches!(result, Err(ConfigLoadError::Invalid(_))));
    Ok(())
}

#[test]
fn missing_env_file_is_not_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tallyflow.toml");
    fs::write(&path, SAMPLE)?;

    let load = ConfigLoader::new()
        .with_config_path(&path)
        .with_env_file(dir.path().join(".env.missing"))
        .load()?;

    assert!(!load.config.metadata.env_file_loaded);
    Ok(())
}
