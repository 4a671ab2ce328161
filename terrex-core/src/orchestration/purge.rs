//! Retention sweep of the distribution cache.

use terrex_model::{CacheCapacity, Order, OrderStatus, SceneId, SceneStatus};
use tracing::{debug, error, info};

use crate::{
    error::{ExternalService, Result},
    orchestration::orchestrator::{PURGE_LEASE_KEY, ProductionOrchestrator},
    ports::{Notification, OrderFilter, OrderUpdate, PurgedOrder, SceneFilter, SceneUpdate},
};

/// What one purge run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurgeSummary {
    pub before: CacheCapacity,
    pub after: CacheCapacity,
    pub orders: Vec<PurgedOrder>,
}

impl PurgeSummary {
    pub fn scenes(&self) -> u64 {
        self.orders.iter().map(|order| order.scenes).sum()
    }
}

impl ProductionOrchestrator {
    /// Purge once per `run_every_secs` across all instances.
    ///
    /// Returns `None` when another run holds the lease.
    pub async fn purge_if_due(&self) -> Result<Option<PurgeSummary>> {
        let interval = self.config.purge.interval();
        let acquired = self
            .call(
                ExternalService::LeaseStore,
                self.lease.acquire(PURGE_LEASE_KEY, interval),
            )
            .await?;
        if !acquired {
            debug!(target: "reconcile::purge", "purge lease held; skipping");
            return Ok(None);
        }

        self.purge_expired_orders().await.map(Some)
    }

    /// Archive complete orders older than the retention window.
    ///
    /// Rows stay as an audit trail in `purged`; only the artifacts go.
    pub async fn purge_expired_orders(&self) -> Result<PurgeSummary> {
        let cutoff = self.now() - self.config.purge.retention();
        let expired = self
            .store
            .find_orders(
                &OrderFilter::new()
                    .status(OrderStatus::Complete)
                    .completed_before(cutoff),
            )
            .await?;

        let before = self
            .call(ExternalService::DistributionCache, self.cache.capacity())
            .await?;
        info!(target: "reconcile::purge", orders = expired.len(), %before, "starting purge");

        let mut purged = Vec::with_capacity(expired.len());
        for order in &expired {
            match self.purge_order(order).await {
                Ok(Some(done)) => purged.push(done),
                Ok(None) => {}
                Err(err) => {
                    error!(target: "reconcile::purge", order = %order.orderid, error = %err, "could not purge order");
                }
            }
        }

        let after = self
            .call(ExternalService::DistributionCache, self.cache.capacity())
            .await?;
        let summary = PurgeSummary {
            before,
            after,
            orders: purged,
        };
        info!(
            target: "reconcile::purge",
            orders = summary.orders.len(),
            scenes = summary.scenes(),
            %after,
            "purge finished"
        );

        if self.config.purge.send_report
            && let Err(err) = self
                .notify(&Notification::PurgeReport {
                    before: summary.before,
                    after: summary.after,
                    orders: summary.orders.clone(),
                })
                .await
        {
            error!(target: "reconcile::purge", error = %err, "purge report not sent");
        }

        Ok(summary)
    }

    async fn purge_order(&self, order: &Order) -> Result<Option<PurgedOrder>> {
        let scenes = self
            .store
            .find_scenes(&SceneFilter::for_order(order.id))
            .await?;
        let ids: Vec<SceneId> = scenes.iter().map(|scene| scene.id).collect();

        let now = self.now();
        let update = SceneUpdate::new()
            .status(SceneStatus::Purged, now)
            .clear_delivery();
        let written = if ids.is_empty() {
            0
        } else {
            self.store
                .bulk_update_scenes(
                    &ids,
                    Some(&[SceneStatus::Complete, SceneStatus::Unavailable]),
                    &update,
                )
                .await?
        };

        if !self
            .store
            .update_order(
                order.id,
                Some(OrderStatus::Complete),
                &OrderUpdate::new().status(OrderStatus::Purged),
            )
            .await?
        {
            return Ok(None);
        }

        if let Err(err) = self
            .call(
                ExternalService::DistributionCache,
                self.cache.delete(&order.orderid),
            )
            .await
        {
            error!(target: "reconcile::purge", order = %order.orderid, error = %err, "could not delete artifacts");
        }

        debug!(target: "reconcile::purge", order = %order.orderid, scenes = written, "order purged");
        Ok(Some(PurgedOrder {
            orderid: order.orderid.clone(),
            scenes: written,
        }))
    }
}
