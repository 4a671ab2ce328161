use std::{collections::HashMap, fmt, future::Future, sync::Arc};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use terrex_model::{Order, OrderId, Scene, SceneId, UpstreamUnitStatus};
use tracing::{debug, warn};

use crate::{
    clock::Clock,
    error::{ExternalService, OrchestratorError, Result},
    orchestration::config::OrchestratorConfig,
    ports::{
        ClusterJobIndex, DistributionCache, ErrorClassifier, InventoryOracle,
        NotificationSink, OrderFilter, OrderingService, SceneFilter,
        SceneUpdate, SharedLeaseStore, WorkItemStore,
    },
};

/// Lease key that rate-limits "cannot update upstream" warnings.
pub const UPSTREAM_FAILURE_LOG_KEY: &str = "upstream.cannot.update";
/// Lease key guarding the cache purge.
pub const PURGE_LEASE_KEY: &str = "orders_last_purged";

/// Every external collaborator the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn WorkItemStore>,
    pub inventory: Arc<dyn InventoryOracle>,
    pub ordering: Arc<dyn OrderingService>,
    pub cluster: Arc<dyn ClusterJobIndex>,
    pub cache: Arc<dyn DistributionCache>,
    pub classifier: Arc<dyn ErrorClassifier>,
    pub notifier: Arc<dyn NotificationSink>,
    pub lease: Arc<dyn SharedLeaseStore>,
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("store", &self.store)
            .field("inventory", &self.inventory)
            .field("ordering", &self.ordering)
            .field("cluster", &self.cluster)
            .field("cache", &self.cache)
            .field("classifier", &self.classifier)
            .field("notifier", &self.notifier)
            .field("lease", &self.lease)
            .field("clock", &self.clock)
            .finish()
    }
}

/// The production control loop.
///
/// Holds no per-pass state: every decision is re-derived from the store, so
/// any number of instances may run passes concurrently.
#[derive(Debug, Clone)]
pub struct ProductionOrchestrator {
    pub(crate) store: Arc<dyn WorkItemStore>,
    pub(crate) inventory: Arc<dyn InventoryOracle>,
    pub(crate) ordering: Arc<dyn OrderingService>,
    pub(crate) cluster: Arc<dyn ClusterJobIndex>,
    pub(crate) cache: Arc<dyn DistributionCache>,
    pub(crate) classifier: Arc<dyn ErrorClassifier>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) lease: Arc<dyn SharedLeaseStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: OrchestratorConfig,
}

impl ProductionOrchestrator {
    pub fn new(collaborators: Collaborators, config: OrchestratorConfig) -> Self {
        let Collaborators {
            store,
            inventory,
            ordering,
            cluster,
            cache,
            classifier,
            notifier,
            lease,
            clock,
        } = collaborators;

        Self {
            store,
            inventory,
            ordering,
            cluster,
            cache,
            classifier,
            notifier,
            lease,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn WorkItemStore> {
        &self.store
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Bound an external call by the configured per-call timeout. A timeout
    /// counts as the service being unreachable for this pass.
    pub(crate) async fn call<T, F>(
        &self,
        service: ExternalService,
        fut: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.config.upstream.call_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(OrchestratorError::unreachable(
                service,
                format!("no answer within {}ms", timeout.as_millis()),
            )),
        }
    }

    pub(crate) async fn load_scene(&self, id: SceneId) -> Result<Scene> {
        self.store
            .get_scene(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("scene {id}")))
    }

    pub(crate) async fn load_order(&self, id: OrderId) -> Result<Order> {
        self.store
            .get_order(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("order {id}")))
    }

    /// Resolve a scene by business key, the way the processing tier names it.
    pub async fn find_scene(
        &self,
        orderid: &str,
        name: &str,
    ) -> Result<(Order, Scene)> {
        let order = self.store.find_order_by_key(orderid).await?.ok_or_else(
            || OrchestratorError::NotFound(format!("order {orderid}")),
        )?;
        let scene = self
            .store
            .find_scenes(&SceneFilter::for_order(order.id).names([name]))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("scene {name} in {orderid}"))
            })?;
        Ok((order, scene))
    }

    /// Orders keyed by id.
    pub(crate) async fn orders_for(
        &self,
        ids: impl IntoIterator<Item = OrderId>,
    ) -> Result<HashMap<OrderId, Order>> {
        let mut ids: Vec<OrderId> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self
            .store
            .find_orders(&OrderFilter::new().ids(ids))
            .await?
            .into_iter()
            .map(|order| (order.id, order))
            .collect())
    }

    /// Mirror a unit status to the upstream archive for imported scenes.
    ///
    /// Push failures never propagate. Transient ones are parked in
    /// `failed_lta_status_update` for the repair sub-pass; an authoritative
    /// rejection is logged and dropped since resending cannot succeed.
    /// Returns the number of pushes that were parked.
    pub(crate) async fn push_unit_statuses(
        &self,
        items: &[(Scene, Order)],
        status: UpstreamUnitStatus,
    ) -> Result<u64> {
        let pushes = items.iter().filter_map(|(scene, order)| {
            let ee_order_id = order.ee_order_id.as_deref()?;
            let unit_id = scene.ee_unit_id.as_deref()?;
            order.is_imported().then_some((scene, ee_order_id, unit_id))
        });

        let failed: Vec<SceneId> = stream::iter(pushes)
            .map(|(scene, ee_order_id, unit_id)| async move {
                let result = self
                    .call(
                        ExternalService::Ordering,
                        self.ordering.push_unit_status(
                            ee_order_id,
                            unit_id,
                            status,
                        ),
                    )
                    .await;
                match result {
                    Ok(()) => None,
                    Err(OrchestratorError::UpstreamRejected(reason)) => {
                        warn!(
                            target: "reconcile::upstream",
                            scene = %scene.name,
                            unit = unit_id,
                            %reason,
                            "upstream refused unit status; not retrying"
                        );
                        None
                    }
                    Err(err) => {
                        self.warn_upstream_failure(&format!(
                            "unit {unit_id} of {ee_order_id} -> {}: {err}",
                            status.as_char()
                        ))
                        .await;
                        Some(scene.id)
                    }
                }
            })
            .buffer_unordered(self.config.upstream.parallelism())
            .filter_map(|failed| async move { failed })
            .collect()
            .await;

        if failed.is_empty() {
            return Ok(0);
        }

        let update = SceneUpdate::new().failed_upstream_update(Some(status));
        self.store.bulk_update_scenes(&failed, None, &update).await
    }

    /// Warn at most once per cool-down across all instances; the rest go to
    /// debug.
    pub(crate) async fn warn_upstream_failure(&self, message: &str) {
        let cooldown = self.config.upstream.failure_log_cooldown();
        match self.lease.acquire(UPSTREAM_FAILURE_LOG_KEY, cooldown).await {
            Ok(true) => warn!(
                target: "reconcile::upstream",
                "cannot update upstream archive: {message}"
            ),
            Ok(false) => debug!(
                target: "reconcile::upstream",
                "cannot update upstream archive: {message}"
            ),
            Err(err) => warn!(
                target: "reconcile::upstream",
                error = %err,
                "cannot update upstream archive: {message}"
            ),
        }
    }
}
