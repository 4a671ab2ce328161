use std::fmt;

use async_trait::async_trait;
use terrex_model::CacheCapacity;

use crate::error::Result;

/// Filesystem store of completed artifacts, one tree per order key.
#[async_trait]
pub trait DistributionCache: Send + Sync + fmt::Debug {
    async fn exists(&self, orderid: &str) -> Result<bool>;

    /// Remove the order's artifact tree. Deleting a missing tree is not an
    /// error.
    async fn delete(&self, orderid: &str) -> Result<()>;

    async fn capacity(&self) -> Result<CacheCapacity>;

    /// Size in bytes of a delivered artifact, or `None` if it is not
    /// visible yet.
    async fn artifact_size(&self, location: &str) -> Result<Option<u64>>;
}
