use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use terrex_model::{ProductOptions, SensorFamily, UpstreamUnitStatus};

use crate::error::Result;

/// Per-unit state reported by the upstream archive for an order batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitStatusReport {
    Ordered,
    Available,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    /// Scene name as it was placed.
    pub unit_id: String,
    pub status: UnitStatusReport,
}

/// A unit of an order submitted through the upstream archive's own portal.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedUnit {
    pub unit_id: String,
    pub name: String,
    pub sensor: SensorFamily,
    /// Present when the archive refuses to release the input. Carries the
    /// customer-facing reason.
    pub restricted: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedOrder {
    pub ee_order_id: String,
    pub email: String,
    pub requester: String,
    pub order_date: DateTime<Utc>,
    pub product_opts: ProductOptions,
    pub units: Vec<ImportedUnit>,
}

/// Upstream archive ordering client.
///
/// Network failures map to `TransientExternal`; authoritative refusals map
/// to `UpstreamRejected`.
#[async_trait]
pub trait OrderingService: Send + Sync + fmt::Debug {
    /// Place scenes on order; returns the batch correlation id.
    async fn place_order(&self, scene_names: &[String]) -> Result<String>;

    async fn poll_status(&self, batch_id: &str) -> Result<Vec<UnitStatus>>;

    async fn push_unit_status(
        &self,
        ee_order_id: &str,
        unit_id: &str,
        status: UpstreamUnitStatus,
    ) -> Result<()>;

    /// Orders submitted upstream that are waiting to be picked up.
    async fn fetch_imported_orders(&self) -> Result<Vec<ImportedOrder>>;
}
