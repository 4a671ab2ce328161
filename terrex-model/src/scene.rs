use chrono::{DateTime, Utc};

use crate::{
    ids::{OrderId, SceneId},
    sensor::SensorFamily,
    status::{SceneStatus, UpstreamUnitStatus},
};

/// Scene name reserved for the order-level plotting and statistics product.
pub const PLOT_SCENE_NAME: &str = "plot";

/// One unit of processing work owned by exactly one order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Scene {
    pub id: SceneId,
    pub order_id: OrderId,
    pub name: String,
    pub sensor_type: SensorFamily,
    pub status: SceneStatus,
    pub status_modified: DateTime<Utc>,
    pub note: String,

    /// Ordering-system batch id, present while `onorder`.
    pub tram_order_id: Option<String>,
    /// Upstream unit id, present only for scenes of imported orders.
    pub ee_unit_id: Option<String>,
    pub job_name: Option<String>,
    pub processing_location: Option<String>,

    pub retry_count: u32,
    pub retry_limit: u32,
    pub retry_after: Option<DateTime<Utc>>,

    pub reported_orphan: Option<DateTime<Utc>>,
    pub orphaned: bool,

    /// Upstream status push that failed and still has to be delivered.
    pub failed_lta_status_update: Option<UpstreamUnitStatus>,

    pub product_distro_location: String,
    pub product_dload_url: String,
    pub cksum_distro_location: String,
    pub cksum_download_url: String,
    pub download_size: u64,
    pub log_file_contents: String,
    pub completion_date: Option<DateTime<Utc>>,
}

impl Scene {
    pub fn is_plot(&self) -> bool {
        self.sensor_type.is_derived()
    }
}

/// Insert payload for a new scene row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewScene {
    pub name: String,
    pub sensor_type: SensorFamily,
    pub status: SceneStatus,
    pub note: String,
    pub ee_unit_id: Option<String>,
    pub retry_limit: u32,
}

impl NewScene {
    pub fn submitted(
        name: impl Into<String>,
        sensor_type: SensorFamily,
        retry_limit: u32,
    ) -> Self {
        Self {
            name: name.into(),
            sensor_type,
            status: SceneStatus::Submitted,
            note: String::new(),
            ee_unit_id: None,
            retry_limit,
        }
    }

    pub fn plot(retry_limit: u32) -> Self {
        Self::submitted(PLOT_SCENE_NAME, SensorFamily::Plot, retry_limit)
    }

    pub fn with_unit(mut self, unit_id: impl Into<String>) -> Self {
        self.ee_unit_id = Some(unit_id.into());
        self
    }

    pub fn unavailable(mut self, note: impl Into<String>) -> Self {
        self.status = SceneStatus::Unavailable;
        self.note = note.into();
        self
    }

    /// Materialise the row as the store would persist it.
    pub fn into_scene(
        self,
        order_id: OrderId,
        created_at: DateTime<Utc>,
    ) -> Scene {
        Scene {
            id: SceneId::new(),
            order_id,
            name: self.name,
            sensor_type: self.sensor_type,
            status: self.status,
            status_modified: created_at,
            note: self.note,
            tram_order_id: None,
            ee_unit_id: self.ee_unit_id,
            job_name: None,
            processing_location: None,
            retry_count: 0,
            retry_limit: self.retry_limit,
            retry_after: None,
            reported_orphan: None,
            orphaned: false,
            failed_lta_status_update: None,
            product_distro_location: String::new(),
            product_dload_url: String::new(),
            cksum_distro_location: String::new(),
            cksum_download_url: String::new(),
            download_size: 0,
            log_file_contents: String::new(),
            completion_date: None,
        }
    }
}
