use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use terrex_core::orchestration::OrchestratorConfig;
use url::Url;

/// Everything a Terrex deployment needs to wire the orchestrator to its
/// collaborators.
///
/// Every section has defaults, so a file only has to name what differs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrexConfig {
    pub database: DatabaseConfig,
    /// Without it the purge lease lives in process memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisConfig>,
    pub inventory: EndpointConfig,
    pub ordering: EndpointConfig,
    /// Without a url notifications are written to the log only.
    pub notifications: EndpointConfig,
    pub cluster: ClusterConfig,
    pub cache: CacheConfig,
    pub orchestrator: OrchestratorConfig,
}

impl TerrexConfig {
    /// Copy of the config with credentials masked, for printing.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.database.url = copy.database.url.as_deref().map(redact_url);
        if let Some(redis) = copy.redis.as_mut() {
            redis.url = redact_url(&redis.url);
        }
        copy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection url. Absent means the in-memory store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_lease_prefix")]
    pub key_prefix: String,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: default_lease_prefix(),
        }
    }
}

fn default_lease_prefix() -> String {
    "terrex:lease".to_string()
}

/// An HTTP collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: 10_000,
        }
    }
}

impl EndpointConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }

    /// Trimmed url, or `None` when blank.
    pub fn url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Shell command printing one `<job id> <job name>` per line.
    pub list_command: String,
    /// Command the job id is appended to.
    pub kill_command: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            list_command: "squeue --noheader --format='%i %j'".to_string(),
            kill_command: "scancel".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub quota_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./cache"),
            quota_bytes: 5 * 1024 * 1024 * 1024 * 1024,
        }
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub source: ConfigSource,
    pub env_file_loaded: bool,
    /// Environment variables that replaced file values.
    pub env_overrides: Vec<&'static str>,
}

fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) if parsed.password().is_some() => {
            if parsed.set_password(Some("***")).is_err() {
                return "***".to_string();
            }
            parsed.to_string()
        }
        Ok(_) => raw.to_string(),
        Err(_) => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_masks_passwords_only() {
        let mut config = TerrexConfig::default();
        config.database.url = Some("postgres://terrex:hunter2@db:5432/terrex".into());
        config.redis = Some(RedisConfig::new("redis://cache:6379"));

        let shown = config.redacted();
        assert_eq!(
            shown.database.url.as_deref(),
            Some("postgres://terrex:***@db:5432/terrex")
        );
        assert_eq!(
            shown.redis.as_ref().map(|redis| redis.url.as_str()),
            Some("redis://cache:6379")
        );
        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://terrex:hunter2@db:5432/terrex")
        );
    }

    #[test]
    fn blank_endpoint_url_is_absent() {
        let endpoint = EndpointConfig {
            url: Some("   ".into()),
            timeout_ms: 500,
        };
        assert_eq!(endpoint.url(), None);
        assert_eq!(endpoint.timeout(), std::time::Duration::from_millis(500));
    }
}
