use std::{fmt, time::Duration};

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::{debug, info};

use crate::{
    error::{ExternalService, OrchestratorError, Result},
    ports::SharedLeaseStore,
};

/// Lease store shared by every orchestrator instance through Redis.
///
/// `acquire` is a single `SET key value NX PX ttl`, so exactly one instance
/// wins per TTL window.
#[derive(Clone)]
pub struct RedisLeaseStore {
    conn: ConnectionManager,
    prefix: String,
}

impl fmt::Debug for RedisLeaseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLeaseStore")
            .field("connection", &"ConnectionManager")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl RedisLeaseStore {
    pub async fn new(redis_url: &str, prefix: impl Into<String>) -> Result<Self> {
        info!("Connecting to Redis lease store");

        let client = redis::Client::open(redis_url).map_err(|e| {
            OrchestratorError::Configuration(format!("Failed to create Redis client: {e}"))
        })?;
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            OrchestratorError::unreachable(
                ExternalService::LeaseStore,
                format!("Failed to connect to Redis: {e}"),
            )
        })?;

        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{key}", self.prefix)
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl SharedLeaseStore for RedisLeaseStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let key = self.key(key);
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        let acquired = reply.is_some();
        debug!("Lease ACQUIRE: {} -> {}", key, acquired);
        Ok(acquired)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let key = self.key(key);
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<()>(&mut conn)
            .await?;
        debug!("Lease SET: {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }
}
