use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LiveJob {
    pub id: String,
    pub name: String,
}

/// Liveness view of the processing cluster.
#[async_trait]
pub trait ClusterJobIndex: Send + Sync + fmt::Debug {
    async fn list_live_jobs(&self) -> Result<Vec<LiveJob>>;

    async fn kill_job(&self, id: &str) -> Result<()>;

    async fn list_live_job_names(&self) -> Result<Vec<String>> {
        Ok(self
            .list_live_jobs()
            .await?
            .into_iter()
            .map(|job| job.name)
            .collect())
    }
}
