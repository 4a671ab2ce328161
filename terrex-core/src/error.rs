use std::fmt;

use thiserror::Error;

/// External collaborators the orchestrator talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalService {
    Inventory,
    Ordering,
    Cluster,
    DistributionCache,
    Notification,
    LeaseStore,
    Store,
}

impl fmt::Display for ExternalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternalService::Inventory => "inventory",
            ExternalService::Ordering => "ordering service",
            ExternalService::Cluster => "cluster job index",
            ExternalService::DistributionCache => "distribution cache",
            ExternalService::Notification => "notification sink",
            ExternalService::LeaseStore => "lease store",
            ExternalService::Store => "work-item store",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Network failure or timeout; the affected work is retried next pass.
    #[error("{service} unavailable: {message}")]
    TransientExternal {
        service: ExternalService,
        message: String,
    },

    /// Authoritative negative answer from the upstream archive.
    #[error("Upstream rejected: {0}")]
    UpstreamRejected(String),

    /// Failure reported by the processing cluster, before classification.
    #[error("Processing failure: {0}")]
    ProcessingFailure(String),

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// A retry would push `retry_count` past `retry_limit`.
    #[error("Retry limit exceeded for {scene}: limit {limit}")]
    RetryLimitExceeded { scene: String, limit: u32 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl OrchestratorError {
    pub fn unreachable(
        service: ExternalService,
        message: impl Into<String>,
    ) -> Self {
        OrchestratorError::TransientExternal {
            service,
            message: message.into(),
        }
    }

    /// Errors that should make a sub-pass skip rather than fail.
    pub fn is_transient(&self) -> bool {
        match self {
            OrchestratorError::TransientExternal { .. } => true,
            #[cfg(feature = "database")]
            OrchestratorError::Redis(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
