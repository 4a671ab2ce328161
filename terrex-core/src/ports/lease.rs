use std::{fmt, time::Duration};

use async_trait::async_trait;

use crate::error::Result;

/// TTL-backed keys shared by every orchestrator instance.
#[async_trait]
pub trait SharedLeaseStore: Send + Sync + fmt::Debug {
    /// Write `key` only if it is absent or expired. Returns whether this
    /// caller now holds it.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;
}
