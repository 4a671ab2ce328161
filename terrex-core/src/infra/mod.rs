pub mod classifier;
pub mod cluster;
pub mod fs_cache;
pub mod http;
pub mod memory;
pub mod notify;

#[cfg(feature = "database")]
#[cfg_attr(docsrs, doc(cfg(feature = "database")))]
pub mod postgres;
#[cfg(feature = "database")]
#[cfg_attr(docsrs, doc(cfg(feature = "database")))]
pub mod redis_lease;

pub use classifier::PatternClassifier;
pub use cluster::CommandJobIndex;
pub use fs_cache::FsDistributionCache;
pub use http::{HttpInventoryOracle, HttpOrderingService};
pub use memory::{InMemoryLeaseStore, InMemoryWorkItemStore};
pub use notify::{LogNotifier, WebhookNotifier};

#[cfg(feature = "database")]
pub use postgres::PostgresWorkItemStore;
#[cfg(feature = "database")]
pub use redis_lease::RedisLeaseStore;
