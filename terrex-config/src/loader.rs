use std::{
    env, fs,
    path::{Path, PathBuf},
};

use terrex_core::infra::PatternClassifier;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::models::{ConfigMetadata, ConfigSource, RedisConfig, TerrexConfig};

const DEFAULT_CANDIDATES: &[&str] = &[
    "terrex.toml",
    "terrex.json",
    "config/terrex.toml",
    "config/terrex.json",
];

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {origin}: {source}")]
    Toml {
        origin: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config {origin}: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse config {origin}: toml error: {toml}; json error: {json}")]
    Unrecognized {
        origin: String,
        toml: String,
        json: String,
    },
    #[error("invalid {field} url: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid classifier rules: {0}")]
    Classifier(String),
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Environment values the loader consults.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub config_json: Option<String>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: non_blank_var("TERREX_CONFIG_PATH").map(PathBuf::from),
            config_json: non_blank_var("TERREX_CONFIG_JSON"),
            database_url: non_blank_var("DATABASE_URL"),
            redis_url: non_blank_var("REDIS_URL"),
        }
    }
}

fn non_blank_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Result of a successful load.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: TerrexConfig,
    pub metadata: ConfigMetadata,
}

/// Resolves the effective configuration.
///
/// Evaluation order:
/// 1) `$TERREX_CONFIG_PATH` (TOML or JSON file),
/// 2) `$TERREX_CONFIG_JSON` (inline JSON),
/// 3) `terrex.toml` / `config/terrex.toml` under the search root,
/// 4) defaults.
///
/// `DATABASE_URL` and `REDIS_URL` then replace whatever the source said.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    env_file: Option<PathBuf>,
    load_env_file: bool,
    search_root: PathBuf,
    config_path: Option<PathBuf>,
    env: Option<EnvConfig>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            env_file: None,
            load_env_file: true,
            search_root: PathBuf::from("."),
            config_path: None,
            env: None,
        }
    }

    /// Load this file instead of searching for `.env`.
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self.load_env_file = true;
        self
    }

    pub fn without_env_file(mut self) -> Self {
        self.load_env_file = false;
        self
    }

    pub fn with_search_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.search_root = root.into();
        self
    }

    /// Takes precedence over `$TERREX_CONFIG_PATH`.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Use these values instead of reading the process environment.
    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.env = Some(env);
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = self.load_env_file && self.read_env_file();
        let mut env = self.env.clone().unwrap_or_else(EnvConfig::gather);
        if let Some(path) = &self.config_path {
            env.config_path = Some(path.clone());
        }

        let (mut config, source) = self.resolve_source(&env)?;
        let mut env_overrides = Vec::new();

        if let Some(url) = env.database_url {
            config.database.url = Some(url);
            env_overrides.push("DATABASE_URL");
        }
        if let Some(url) = env.redis_url {
            match config.redis.as_mut() {
                Some(redis) => redis.url = url,
                None => config.redis = Some(RedisConfig::new(url)),
            }
            env_overrides.push("REDIS_URL");
        }

        validate(&config)?;

        info!(
            source = ?source,
            env_file_loaded,
            overrides = ?env_overrides,
            "configuration loaded"
        );

        Ok(ConfigLoad {
            config,
            metadata: ConfigMetadata {
                source,
                env_file_loaded,
                env_overrides,
            },
        })
    }

    fn read_env_file(&self) -> bool {
        let outcome = match &self.env_file {
            Some(path) => dotenvy::from_path(path).map(|()| path.clone()),
            None => dotenvy::dotenv(),
        };
        match outcome {
            Ok(path) => {
                debug!(path = %path.display(), "loaded env file");
                true
            }
            Err(err) => {
                debug!(error = %err, "no env file loaded");
                false
            }
        }
    }

    fn resolve_source(
        &self,
        env: &EnvConfig,
    ) -> Result<(TerrexConfig, ConfigSource), ConfigLoadError> {
        if let Some(path) = &env.config_path {
            let config = load_from_file(path)?;
            return Ok((config, ConfigSource::EnvPath(path.clone())));
        }

        if let Some(raw) = &env.config_json {
            let config = parse_json(raw, "TERREX_CONFIG_JSON")?;
            return Ok((config, ConfigSource::EnvInline));
        }

        if let Some(path) = self.find_default_file() {
            let config = load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((TerrexConfig::default(), ConfigSource::Default))
    }

    fn find_default_file(&self) -> Option<PathBuf> {
        DEFAULT_CANDIDATES
            .iter()
            .map(|candidate| self.search_root.join(candidate))
            .find(|path| path.is_file())
    }
}

pub fn load_from_file(path: &Path) -> Result<TerrexConfig, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let origin = path.display().to_string();

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => parse_json(&contents, &origin),
        Some("toml") => {
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Toml { origin, source })
        }
        _ => parse_from_str(&contents, &origin),
    }
}

/// Tries TOML first, then JSON.
pub fn parse_from_str(contents: &str, origin: &str) -> Result<TerrexConfig, ConfigLoadError> {
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| ConfigLoadError::Unrecognized {
            origin: origin.to_string(),
            toml: toml_err.to_string(),
            json: json_err.to_string(),
        })
    })
}

pub fn parse_json(raw: &str, origin: &str) -> Result<TerrexConfig, ConfigLoadError> {
    serde_json::from_str(raw).map_err(|source| ConfigLoadError::Json {
        origin: origin.to_string(),
        source,
    })
}

/// Catches settings that would only fail once the orchestrator is running.
pub fn validate(config: &TerrexConfig) -> Result<(), ConfigLoadError> {
    check_url("database", config.database.url.as_deref())?;
    check_url("redis", config.redis.as_ref().map(|redis| redis.url.as_str()))?;
    check_url("inventory", config.inventory.url())?;
    check_url("ordering", config.ordering.url())?;
    check_url("notifications", config.notifications.url())?;

    if config.database.max_connections == 0 {
        return Err(ConfigLoadError::Invalid {
            field: "database.max_connections",
            reason: "must be at least 1".into(),
        });
    }
    if config.cluster.list_command.trim().is_empty() {
        return Err(ConfigLoadError::Invalid {
            field: "cluster.list_command",
            reason: "must not be empty".into(),
        });
    }
    if config.orchestrator.purge.retention_days < 0 {
        return Err(ConfigLoadError::Invalid {
            field: "orchestrator.purge.retention_days",
            reason: "must not be negative".into(),
        });
    }

    PatternClassifier::from_config(&config.orchestrator.classifier)
        .map_err(|err| ConfigLoadError::Classifier(err.to_string()))?;
    Ok(())
}

fn check_url(field: &'static str, raw: Option<&str>) -> Result<(), ConfigLoadError> {
    match raw {
        Some(raw) => Url::parse(raw)
            .map(|_| ())
            .map_err(|source| ConfigLoadError::InvalidUrl { field, source }),
        None => Ok(()),
    }
}
