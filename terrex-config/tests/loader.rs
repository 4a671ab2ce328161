use std::fs;

use tempfile::TempDir;
use terrex_config::{
    ConfigLoadError, ConfigLoader, ConfigSource, EnvConfig, TerrexConfig, loader,
};
use terrex_core::ports::ResolutionStatus;

const SAMPLE_TOML: &str = r#"
[database]
url = "postgres://terrex@db:5432/terrex"

[inventory]
url = "https://inventory.example.org/api"
timeout_ms = 2500

[cluster]
list_command = "cat jobs.txt"
kill_command = "echo"

[cache]
root = "/srv/terrex/cache"
quota_bytes = 1000000

[orchestrator.purge]
retention_days = 3

[[orchestrator.classifier.rules]]
patterns = ["connection refused", "timed out"]
status = "retry"
reason = "Transient archive failure"
retry_after_secs = 3600
"#;

fn isolated(root: &TempDir) -> ConfigLoader {
    ConfigLoader::new()
        .without_env_file()
        .with_search_root(root.path())
        .with_env(EnvConfig::default())
}

#[test]
fn defaults_when_nothing_is_configured() {
    let root = TempDir::new().expect("tempdir");
    let load = isolated(&root).load().expect("load");

    assert_eq!(load.metadata.source, ConfigSource::Default);
    assert!(load.metadata.env_overrides.is_empty());
    assert!(load.config.database.url.is_none());
    assert!(load.config.redis.is_none());
    assert_eq!(load.config.orchestrator.purge.retention_days, 10);
}

#[test]
fn default_file_is_found_under_config_dir() {
    let root = TempDir::new().expect("tempdir");
    fs::create_dir(root.path().join("config")).expect("mkdir");
    let path = root.path().join("config/terrex.toml");
    fs::write(&path, SAMPLE_TOML).expect("write");

    let load = isolated(&root).load().expect("load");

    assert_eq!(load.metadata.source, ConfigSource::File(path));
    let config = load.config;
    assert_eq!(config.inventory.url(), Some("https://inventory.example.org/api"));
    assert_eq!(config.inventory.timeout_ms, 2500);
    assert_eq!(config.ordering.timeout_ms, 10_000);
    assert_eq!(config.cluster.list_command, "cat jobs.txt");
    assert_eq!(config.cache.quota_bytes, 1_000_000);
    assert_eq!(config.orchestrator.purge.retention_days, 3);
    assert_eq!(config.orchestrator.purge.run_every_secs, 86_400);
    assert_eq!(config.orchestrator.classifier.rules.len(), 1);
    assert_eq!(
        config.orchestrator.classifier.rules[0].status,
        ResolutionStatus::Retry
    );
}

#[test]
fn explicit_path_wins_over_inline_json_and_default_file() {
    let root = TempDir::new().expect("tempdir");
    fs::write(root.path().join("terrex.toml"), "[cache]\nquota_bytes = 1\n").expect("write");
    let explicit = root.path().join("deploy.json");
    fs::write(&explicit, r#"{"cache":{"quota_bytes":42}}"#).expect("write");

    let load = ConfigLoader::new()
        .without_env_file()
        .with_search_root(root.path())
        .with_env(EnvConfig {
            config_path: Some(explicit.clone()),
            config_json: Some(r#"{"cache":{"quota_bytes":7}}"#.into()),
            ..EnvConfig::default()
        })
        .load()
        .expect("load");

    assert_eq!(load.metadata.source, ConfigSource::EnvPath(explicit));
    assert_eq!(load.config.cache.quota_bytes, 42);
}

#[test]
fn inline_json_is_used_without_a_path() {
    let root = TempDir::new().expect("tempdir");
    let load = ConfigLoader::new()
        .without_env_file()
        .with_search_root(root.path())
        .with_env(EnvConfig {
            config_json: Some(r#"{"orchestrator":{"import":{"enabled":false}}}"#.into()),
            ..EnvConfig::default()
        })
        .load()
        .expect("load");

    assert_eq!(load.metadata.source, ConfigSource::EnvInline);
    assert!(!load.config.orchestrator.import.enabled);
    assert_eq!(load.config.orchestrator.retry.default_retry_limit, 5);
}

#[test]
fn database_and_redis_urls_from_env_override_the_file() {
    let root = TempDir::new().expect("tempdir");
    fs::write(root.path().join("terrex.toml"), SAMPLE_TOML).expect("write");

    let load = ConfigLoader::new()
        .without_env_file()
        .with_search_root(root.path())
        .with_env(EnvConfig {
            database_url: Some("postgres://override@db2/terrex".into()),
            redis_url: Some("redis://lease:6379".into()),
            ..EnvConfig::default()
        })
        .load()
        .expect("load");

    assert_eq!(
        load.config.database.url.as_deref(),
        Some("postgres://override@db2/terrex")
    );
    let redis = load.config.redis.expect("redis configured");
    assert_eq!(redis.url, "redis://lease:6379");
    assert_eq!(redis.key_prefix, "terrex:lease");
    assert_eq!(load.metadata.env_overrides, ["DATABASE_URL", "REDIS_URL"]);
}

#[test]
fn invalid_classifier_pattern_is_rejected_at_load() {
    let root = TempDir::new().expect("tempdir");
    fs::write(
        root.path().join("terrex.json"),
        r#"{"orchestrator":{"classifier":{"rules":[{"patterns":["(unclosed"],"status":"retry","reason":"x"}]}}}"#,
    )
    .expect("write");

    let err = isolated(&root).load().expect_err("bad regex");
    assert!(matches!(err, ConfigLoadError::Classifier(_)));
}

#[test]
fn malformed_url_is_rejected() {
    let mut config = TerrexConfig::default();
    config.ordering.url = Some("not a url".into());
    let err = loader::validate(&config).expect_err("bad url");
    assert!(matches!(
        err,
        ConfigLoadError::InvalidUrl {
            field: "ordering",
            ..
        }
    ));
}

#[test]
fn extensionless_file_accepts_toml_or_json() {
    let toml = loader::parse_from_str("[cache]\nquota_bytes = 5\n", "inline").expect("toml");
    assert_eq!(toml.cache.quota_bytes, 5);
    let json = loader::parse_from_str(r#"{"cache":{"quota_bytes":6}}"#, "inline").expect("json");
    assert_eq!(json.cache.quota_bytes, 6);

    let err = loader::parse_from_str("{{ neither", "inline").expect_err("garbage");
    assert!(matches!(err, ConfigLoadError::Unrecognized { .. }));
}

#[test]
fn env_file_is_reported_when_loaded() {
    let root = TempDir::new().expect("tempdir");
    let env_file = root.path().join("terrex.env");
    fs::write(&env_file, "TERREX_CONFIG_LOADER_TEST=1\n").expect("write");

    let load = ConfigLoader::new()
        .with_env_file(&env_file)
        .with_search_root(root.path())
        .with_env(EnvConfig::default())
        .load()
        .expect("load");
    assert!(load.metadata.env_file_loaded);

    let load = ConfigLoader::new()
        .with_env_file(root.path().join("missing.env"))
        .with_search_root(root.path())
        .with_env(EnvConfig::default())
        .load()
        .expect("load");
    assert!(!load.metadata.env_file_loaded);
}

#[test]
fn printed_config_round_trips_through_toml() {
    let config = loader::parse_from_str(SAMPLE_TOML, "sample").expect("parse");
    let printed = toml::to_string_pretty(&config).expect("serialize");
    let reparsed: TerrexConfig = toml::from_str(&printed).expect("reparse");
    assert_eq!(reparsed.cache.root, config.cache.root);
    assert_eq!(reparsed.orchestrator.classifier.rules.len(), 1);
}
