use std::{
    io,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use terrex_model::CacheCapacity;
use tracing::{debug, info};

use crate::{
    error::{OrchestratorError, Result},
    ports::DistributionCache,
};

/// Distribution cache on a local or mounted filesystem.
///
/// Order artifacts live under `{root}/orders/{orderid}`. Capacity is
/// measured against a configured quota; without one the total equals the
/// bytes in use.
#[derive(Debug, Clone)]
pub struct FsDistributionCache {
    root: PathBuf,
    quota_bytes: u64,
}

impl FsDistributionCache {
    pub fn new(root: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            root: root.into(),
            quota_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn order_dir(&self, orderid: &str) -> Result<PathBuf> {
        let mut components = Path::new(orderid).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => {
                return Err(OrchestratorError::IntegrityViolation(format!(
                    "order key {orderid:?} is not a plain directory name"
                )));
            }
        }
        Ok(self.root.join("orders").join(orderid))
    }

    fn resolve(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

fn tree_size(path: &Path) -> io::Result<u64> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };
    if !meta.is_dir() {
        return Ok(meta.len());
    }

    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        total += tree_size(&entry?.path())?;
    }
    Ok(total)
}

#[async_trait]
impl DistributionCache for FsDistributionCache {
    async fn exists(&self, orderid: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.order_dir(orderid)?).await?)
    }

    async fn delete(&self, orderid: &str) -> Result<()> {
        let dir = self.order_dir(orderid)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(order = orderid, path = %dir.display(), "removed order artifacts");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(order = orderid, "no artifacts to remove");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn capacity(&self) -> Result<CacheCapacity> {
        let root = self.root.clone();
        let used = tokio::task::spawn_blocking(move || tree_size(&root))
            .await
            .map_err(|e| io::Error::other(e.to_string()))??;
        let total = if self.quota_bytes == 0 {
            used
        } else {
            self.quota_bytes
        };
        Ok(CacheCapacity::new(total, used))
    }

    async fn artifact_size(&self, location: &str) -> Result<Option<u64>> {
        if location.is_empty() {
            return Ok(None);
        }
        match tokio::fs::metadata(self.resolve(location)).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delete_is_idempotent_and_frees_capacity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = FsDistributionCache::new(dir.path(), 1_000);
        let order_dir = cache.order_dir("o-1").expect("dir");
        std::fs::create_dir_all(&order_dir).expect("mkdir");
        std::fs::write(order_dir.join("LT05.tar.gz"), vec![0u8; 300]).expect("write");

        assert!(cache.exists("o-1").await.expect("exists"));
        let before = cache.capacity().await.expect("capacity");
        assert_eq!(before.used, 300);
        assert_eq!(before.available, 700);

        let location = order_dir.join("LT05.tar.gz");
        assert_eq!(
            cache
                .artifact_size(location.to_str().expect("utf8"))
                .await
                .expect("size"),
            Some(300)
        );

        cache.delete("o-1").await.expect("delete");
        cache.delete("o-1").await.expect("delete again");
        assert!(!cache.exists("o-1").await.expect("exists"));
        assert_eq!(cache.capacity().await.expect("capacity").used, 0);
    }

    #[test]
    fn order_keys_cannot_escape_the_root() {
        let cache = FsDistributionCache::new("/cache", 0);
        assert!(cache.order_dir("../etc").is_err());
        assert!(cache.order_dir("a/b").is_err());
        assert!(cache.order_dir("alice-03092024-140507-042").is_ok());
    }
}
