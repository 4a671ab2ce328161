//! Work-item store contract.
//!
//! The orchestrator never issues blind `status = X WHERE status = Y` writes.
//! Every mutation is either a single-row update guarded by the expected
//! status or a bulk update over an explicit id list read beforehand.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use terrex_model::{
    NewOrder, NewScene, Order, OrderId, OrderSource, OrderStatus,
    ProductOptions, Scene, SceneId, SceneStatus, SensorFamily,
    UpstreamUnitStatus,
};

use crate::error::Result;

/// Predicate over scenes. Fields left `None` do not constrain the result.
///
/// `requester` and `order_statuses` constrain the owning order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneFilter {
    pub ids: Option<Vec<SceneId>>,
    pub order_ids: Option<Vec<OrderId>>,
    pub names: Option<Vec<String>>,
    pub statuses: Option<Vec<SceneStatus>>,
    pub sensors: Option<Vec<SensorFamily>>,
    pub tram_order_ids: Option<Vec<String>>,
    pub job_names: Option<Vec<String>>,
    pub requester: Option<String>,
    pub order_statuses: Option<Vec<OrderStatus>>,
    pub status_modified_before: Option<DateTime<Utc>>,
    pub retry_after_before: Option<DateTime<Utc>>,
    pub has_failed_upstream_update: Option<bool>,
    pub has_reported_orphan: Option<bool>,
    pub orphaned: Option<bool>,
    pub download_size_zero: bool,
    pub limit: Option<usize>,
}

impl SceneFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_order(order_id: OrderId) -> Self {
        Self::new().order_ids([order_id])
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = SceneId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn order_ids(
        mut self,
        ids: impl IntoIterator<Item = OrderId>,
    ) -> Self {
        self.order_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn status(self, status: SceneStatus) -> Self {
        self.statuses([status])
    }

    pub fn statuses(
        mut self,
        statuses: impl IntoIterator<Item = SceneStatus>,
    ) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn sensors(
        mut self,
        sensors: impl IntoIterator<Item = SensorFamily>,
    ) -> Self {
        self.sensors = Some(sensors.into_iter().collect());
        self
    }

    pub fn tram_order_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tram_order_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn job_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.job_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn requester(mut self, requester: Option<&str>) -> Self {
        self.requester = requester.map(str::to_string);
        self
    }

    pub fn order_statuses(
        mut self,
        statuses: impl IntoIterator<Item = OrderStatus>,
    ) -> Self {
        self.order_statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn modified_before(mut self, at: DateTime<Utc>) -> Self {
        self.status_modified_before = Some(at);
        self
    }

    pub fn retry_due_before(mut self, at: DateTime<Utc>) -> Self {
        self.retry_after_before = Some(at);
        self
    }

    pub fn with_failed_upstream_update(mut self) -> Self {
        self.has_failed_upstream_update = Some(true);
        self
    }

    pub fn with_reported_orphan(mut self, reported: bool) -> Self {
        self.has_reported_orphan = Some(reported);
        self
    }

    pub fn orphaned(mut self, orphaned: bool) -> Self {
        self.orphaned = Some(orphaned);
        self
    }

    pub fn without_download_size(mut self) -> Self {
        self.download_size_zero = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluate the predicate against a scene and its owning order.
    ///
    /// `limit` is not considered here; stores apply it after ordering.
    pub fn matches(&self, scene: &Scene, order: &Order) -> bool {
        fn within<T: PartialEq>(set: &Option<Vec<T>>, value: &T) -> bool {
            set.as_ref().is_none_or(|set| set.contains(value))
        }
        fn within_opt(set: &Option<Vec<String>>, value: &Option<String>) -> bool {
            match (set, value) {
                (None, _) => true,
                (Some(set), Some(value)) => set.contains(value),
                (Some(_), None) => false,
            }
        }

        within(&self.ids, &scene.id)
            && within(&self.order_ids, &scene.order_id)
            && within(&self.names, &scene.name)
            && within(&self.statuses, &scene.status)
            && within(&self.sensors, &scene.sensor_type)
            && within_opt(&self.tram_order_ids, &scene.tram_order_id)
            && within_opt(&self.job_names, &scene.job_name)
            && self
                .requester
                .as_ref()
                .is_none_or(|requester| &order.requester == requester)
            && within(&self.order_statuses, &order.status)
            && self
                .status_modified_before
                .is_none_or(|cutoff| scene.status_modified < cutoff)
            && self.retry_after_before.is_none_or(|cutoff| {
                scene.retry_after.is_some_and(|after| after < cutoff)
            })
            && self.has_failed_upstream_update.is_none_or(|wanted| {
                scene.failed_lta_status_update.is_some() == wanted
            })
            && self
                .has_reported_orphan
                .is_none_or(|wanted| scene.reported_orphan.is_some() == wanted)
            && self.orphaned.is_none_or(|wanted| scene.orphaned == wanted)
            && (!self.download_size_zero || scene.download_size == 0)
    }
}

/// Predicate over orders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    pub ids: Option<Vec<OrderId>>,
    pub statuses: Option<Vec<OrderStatus>>,
    pub sources: Option<Vec<OrderSource>>,
    pub requester: Option<String>,
    pub initial_email_unsent: bool,
    pub completion_email_unsent: bool,
    pub completed_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl OrderFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = OrderId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.statuses = Some(vec![status]);
        self
    }

    pub fn source(mut self, source: OrderSource) -> Self {
        self.sources = Some(vec![source]);
        self
    }

    pub fn requester(mut self, requester: Option<&str>) -> Self {
        self.requester = requester.map(str::to_string);
        self
    }

    pub fn initial_email_unsent(mut self) -> Self {
        self.initial_email_unsent = true;
        self
    }

    pub fn completion_email_unsent(mut self) -> Self {
        self.completion_email_unsent = true;
        self
    }

    pub fn completed_before(mut self, at: DateTime<Utc>) -> Self {
        self.completed_before = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.ids.as_ref().is_none_or(|ids| ids.contains(&order.id))
            && self
                .statuses
                .as_ref()
                .is_none_or(|statuses| statuses.contains(&order.status))
            && self
                .sources
                .as_ref()
                .is_none_or(|sources| sources.contains(&order.order_source))
            && self
                .requester
                .as_ref()
                .is_none_or(|requester| &order.requester == requester)
            && (!self.initial_email_unsent
                || order.initial_email_sent.is_none())
            && (!self.completion_email_unsent
                || order.completion_email_sent.is_none())
            && self.completed_before.is_none_or(|cutoff| {
                order.completion_date.is_some_and(|done| done < cutoff)
            })
    }
}

/// Column changes for a scene. `None` leaves a column untouched; nullable
/// columns use `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneUpdate {
    pub status: Option<SceneStatus>,
    pub status_modified: Option<DateTime<Utc>>,
    pub note: Option<String>,
    pub tram_order_id: Option<Option<String>>,
    pub job_name: Option<Option<String>>,
    pub processing_location: Option<Option<String>>,
    pub retry_count: Option<u32>,
    pub retry_limit: Option<u32>,
    pub retry_after: Option<Option<DateTime<Utc>>>,
    pub reported_orphan: Option<Option<DateTime<Utc>>>,
    pub orphaned: Option<bool>,
    pub failed_lta_status_update: Option<Option<UpstreamUnitStatus>>,
    pub product_distro_location: Option<String>,
    pub product_dload_url: Option<String>,
    pub cksum_distro_location: Option<String>,
    pub cksum_download_url: Option<String>,
    pub download_size: Option<u64>,
    pub log_file_contents: Option<String>,
    pub completion_date: Option<Option<DateTime<Utc>>>,
}

impl SceneUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status write; `status_modified` always moves with it.
    pub fn status(mut self, status: SceneStatus, at: DateTime<Utc>) -> Self {
        self.status = Some(status);
        self.status_modified = Some(at);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn tram_order_id(mut self, id: Option<String>) -> Self {
        self.tram_order_id = Some(id);
        self
    }

    pub fn job(
        mut self,
        job_name: Option<String>,
        location: Option<String>,
    ) -> Self {
        self.job_name = Some(job_name);
        self.processing_location = Some(location);
        self
    }

    pub fn retry(
        mut self,
        count: u32,
        limit: u32,
        after: Option<DateTime<Utc>>,
    ) -> Self {
        self.retry_count = Some(count);
        self.retry_limit = Some(limit);
        self.retry_after = Some(after);
        self
    }

    pub fn retry_after(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.retry_after = Some(at);
        self
    }

    /// Zero the retry counter and drop any pending retry time.
    pub fn reset_retries(mut self) -> Self {
        self.retry_count = Some(0);
        self.retry_after = Some(None);
        self
    }

    pub fn reported_orphan(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.reported_orphan = Some(at);
        self
    }

    pub fn orphaned(mut self, orphaned: bool) -> Self {
        self.orphaned = Some(orphaned);
        self
    }

    pub fn failed_upstream_update(
        mut self,
        pending: Option<UpstreamUnitStatus>,
    ) -> Self {
        self.failed_lta_status_update = Some(pending);
        self
    }

    pub fn download_size(mut self, size: u64) -> Self {
        self.download_size = Some(size);
        self
    }

    pub fn log(mut self, contents: impl Into<String>) -> Self {
        self.log_file_contents = Some(contents.into());
        self
    }

    pub fn completion_date(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.completion_date = Some(at);
        self
    }

    /// Blank every delivery-location field.
    pub fn clear_delivery(mut self) -> Self {
        self.product_distro_location = Some(String::new());
        self.product_dload_url = Some(String::new());
        self.cksum_distro_location = Some(String::new());
        self.cksum_download_url = Some(String::new());
        self.log_file_contents = Some(String::new());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, scene: &mut Scene) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }

        set(&mut scene.status, &self.status);
        set(&mut scene.status_modified, &self.status_modified);
        set(&mut scene.note, &self.note);
        set(&mut scene.tram_order_id, &self.tram_order_id);
        set(&mut scene.job_name, &self.job_name);
        set(&mut scene.processing_location, &self.processing_location);
        set(&mut scene.retry_count, &self.retry_count);
        set(&mut scene.retry_limit, &self.retry_limit);
        set(&mut scene.retry_after, &self.retry_after);
        set(&mut scene.reported_orphan, &self.reported_orphan);
        set(&mut scene.orphaned, &self.orphaned);
        set(
            &mut scene.failed_lta_status_update,
            &self.failed_lta_status_update,
        );
        set(
            &mut scene.product_distro_location,
            &self.product_distro_location,
        );
        set(&mut scene.product_dload_url, &self.product_dload_url);
        set(&mut scene.cksum_distro_location, &self.cksum_distro_location);
        set(&mut scene.cksum_download_url, &self.cksum_download_url);
        set(&mut scene.download_size, &self.download_size);
        set(&mut scene.log_file_contents, &self.log_file_contents);
        set(&mut scene.completion_date, &self.completion_date);
    }
}

/// Column changes for an order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderUpdate {
    pub status: Option<OrderStatus>,
    pub completion_date: Option<Option<DateTime<Utc>>>,
    pub initial_email_sent: Option<Option<DateTime<Utc>>>,
    pub completion_email_sent: Option<Option<DateTime<Utc>>>,
    pub product_opts: Option<ProductOptions>,
    pub note: Option<Option<String>>,
}

impl OrderUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn completion_date(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.completion_date = Some(at);
        self
    }

    pub fn initial_email_sent(mut self, at: DateTime<Utc>) -> Self {
        self.initial_email_sent = Some(Some(at));
        self
    }

    pub fn completion_email_sent(mut self, at: DateTime<Utc>) -> Self {
        self.completion_email_sent = Some(Some(at));
        self
    }

    pub fn product_opts(mut self, opts: ProductOptions) -> Self {
        self.product_opts = Some(opts);
        self
    }

    pub fn apply(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(at) = self.completion_date {
            order.completion_date = at;
        }
        if let Some(at) = self.initial_email_sent {
            order.initial_email_sent = at;
        }
        if let Some(at) = self.completion_email_sent {
            order.completion_email_sent = at;
        }
        if let Some(opts) = &self.product_opts {
            order.product_opts = opts.clone();
        }
        if let Some(note) = &self.note {
            order.note = note.clone();
        }
    }
}

/// Durable table of orders and scenes.
///
/// Scene queries return rows ordered by owning order date, then order id,
/// then scene name, so `limit` picks the oldest work first.
#[async_trait]
pub trait WorkItemStore: Send + Sync + fmt::Debug {
    async fn find_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn find_order_by_key(&self, orderid: &str) -> Result<Option<Order>>;

    async fn find_order_by_upstream_id(
        &self,
        ee_order_id: &str,
    ) -> Result<Option<Order>>;

    async fn find_scenes(&self, filter: &SceneFilter) -> Result<Vec<Scene>>;

    async fn get_scene(&self, id: SceneId) -> Result<Option<Scene>>;

    /// Insert an order together with its scenes, atomically.
    async fn create_order(
        &self,
        order: NewOrder,
        scenes: Vec<NewScene>,
        at: DateTime<Utc>,
    ) -> Result<Order>;

    async fn insert_scenes(
        &self,
        order_id: OrderId,
        scenes: Vec<NewScene>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Scene>>;

    /// Returns whether the row matched `expected` and was written.
    async fn update_scene(
        &self,
        id: SceneId,
        expected: Option<SceneStatus>,
        update: &SceneUpdate,
    ) -> Result<bool>;

    /// Returns the number of rows written.
    async fn bulk_update_scenes(
        &self,
        ids: &[SceneId],
        expected: Option<&[SceneStatus]>,
        update: &SceneUpdate,
    ) -> Result<u64>;

    async fn update_order(
        &self,
        id: OrderId,
        expected: Option<OrderStatus>,
        update: &OrderUpdate,
    ) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Order {
        Order {
            id: OrderId::new(),
            orderid: "o-1".into(),
            requester: "alice".into(),
            email: "alice@example.com".into(),
            status: OrderStatus::Ordered,
            order_source: OrderSource::SelfService,
            order_date: Utc::now(),
            completion_date: None,
            initial_email_sent: None,
            completion_email_sent: None,
            ee_order_id: None,
            product_opts: ProductOptions::default(),
            note: None,
        }
    }

    #[test]
    fn scene_filter_checks_owning_order() {
        let order = order();
        let scene = NewScene::submitted("LT05", SensorFamily::Landsat, 5)
            .into_scene(order.id, Utc::now());

        assert!(SceneFilter::new().requester(Some("alice")).matches(&scene, &order));
        assert!(!SceneFilter::new().requester(Some("bob")).matches(&scene, &order));
        assert!(
            !SceneFilter::new()
                .order_statuses([OrderStatus::Cancelled])
                .matches(&scene, &order)
        );
    }

    #[test]
    fn optional_columns_do_not_match_missing_values() {
        let order = order();
        let scene = NewScene::submitted("LT05", SensorFamily::Landsat, 5)
            .into_scene(order.id, Utc::now());

        assert!(!SceneFilter::new().job_names(["job-1"]).matches(&scene, &order));
        assert!(
            !SceneFilter::new()
                .retry_due_before(Utc::now())
                .matches(&scene, &order)
        );
    }

    #[test]
    fn update_clears_nullable_columns() {
        let order = order();
        let mut scene = NewScene::submitted("LT05", SensorFamily::Landsat, 5)
            .into_scene(order.id, Utc::now());
        scene.job_name = Some("job".into());
        scene.reported_orphan = Some(Utc::now());

        let update = SceneUpdate::new()
            .job(None, None)
            .reported_orphan(None)
            .orphaned(false);
        update.apply(&mut scene);

        assert_eq!(scene.job_name, None);
        assert_eq!(scene.reported_orphan, None);
        assert!(!update.is_empty());
        assert!(SceneUpdate::new().is_empty());
    }
}
