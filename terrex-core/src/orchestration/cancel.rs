use terrex_model::{Order, OrderStatus, Scene, SceneId, SceneStatus, UpstreamUnitStatus};
use tracing::info;

use crate::{
    error::{OrchestratorError, Result},
    orchestration::orchestrator::ProductionOrchestrator,
    ports::{OrderUpdate, SceneFilter, SceneUpdate},
};

/// Result of an order cancellation.
#[derive(Debug, Clone, PartialEq)]
pub struct Cancellation {
    pub order: Order,
    pub scenes_cancelled: u64,
}

impl ProductionOrchestrator {
    /// Cancel an order and every scene in a cancellable status.
    ///
    /// Scenes still `processing` keep running; the cluster callback cancels
    /// them when it reports back. Cancelling twice is a no-op.
    pub async fn cancel_order(&self, orderid: &str) -> Result<Cancellation> {
        let order = self
            .store
            .find_order_by_key(orderid)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("order {orderid}")))?;

        match order.status {
            OrderStatus::Ordered | OrderStatus::Complete => {}
            OrderStatus::Cancelled => {
                return Ok(Cancellation {
                    order,
                    scenes_cancelled: 0,
                });
            }
            OrderStatus::Purged => {
                return Err(OrchestratorError::Conflict(format!(
                    "order {orderid} is already purged"
                )));
            }
        }

        let scenes = self
            .store
            .find_scenes(
                &SceneFilter::for_order(order.id).statuses(SceneStatus::CANCELLABLE),
            )
            .await?;
        let ids: Vec<SceneId> = scenes.iter().map(|scene| scene.id).collect();

        let mut cancelled = 0;
        if !ids.is_empty() {
            let update = SceneUpdate::new()
                .status(SceneStatus::Cancelled, self.now())
                .tram_order_id(None)
                .retry_after(None)
                .reported_orphan(None)
                .orphaned(false);
            cancelled = self
                .store
                .bulk_update_scenes(&ids, Some(&SceneStatus::CANCELLABLE), &update)
                .await?;
        } else {
            info!(order = %order.orderid, "no scenes to cancel");
        }

        if !self
            .store
            .update_order(
                order.id,
                Some(order.status),
                &OrderUpdate::new().status(OrderStatus::Cancelled),
            )
            .await?
        {
            return Err(OrchestratorError::Conflict(format!(
                "order {orderid} changed status during cancellation"
            )));
        }

        if order.is_imported() {
            let pushes: Vec<(Scene, Order)> = scenes
                .into_iter()
                .map(|scene| (scene, order.clone()))
                .collect();
            self.push_unit_statuses(&pushes, UpstreamUnitStatus::Rejected)
                .await?;
        }

        info!(order = %order.orderid, scenes = cancelled, "order cancelled");
        let order = self.load_order(order.id).await?;
        Ok(Cancellation {
            order,
            scenes_cancelled: cancelled,
        })
    }
}
