//! Narrow contracts for every collaborator the orchestrator talks to.

pub mod classifier;
pub mod cluster;
pub mod distribution;
pub mod inventory;
pub mod lease;
pub mod notify;
pub mod ordering;
pub mod store;

pub use classifier::{ErrorClassifier, Resolution, ResolutionStatus};
pub use cluster::{ClusterJobIndex, LiveJob};
pub use distribution::DistributionCache;
pub use inventory::InventoryOracle;
pub use lease::SharedLeaseStore;
pub use notify::{Notification, NotificationSink, PurgedOrder};
pub use ordering::{
    ImportedOrder, ImportedUnit, OrderingService, UnitStatus, UnitStatusReport,
};
pub use store::{
    OrderFilter, OrderUpdate, SceneFilter, SceneUpdate, WorkItemStore,
};
