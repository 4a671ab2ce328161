//! Order-level bookkeeping: notifications, retry maturation, size backfill,
//! completion and cancellation finalization.
//!
//! Every step here is re-derived from the store on each pass. Sent flags are
//! set only after a successful send, so a crash between the two costs at
//! most one duplicate email and never a lost one.

use terrex_model::{Order, OrderSource, OrderStatus, SceneId, SceneStatus};
use tracing::{debug, error, info, warn};

use crate::{
    error::{ExternalService, Result},
    orchestration::{orchestrator::ProductionOrchestrator, reconcile::Scope},
    ports::{Notification, OrderFilter, OrderUpdate, SceneFilter, SceneUpdate},
};

/// Note on a complete scene whose artifact vanished from the cache.
pub const DOWNLOAD_MISSING_NOTE: &str = "product download not found";

impl ProductionOrchestrator {
    /// Send "order received" for every pending order not yet notified.
    pub(crate) async fn send_initial_emails(&self, scope: &Scope) -> Result<u64> {
        let orders = self
            .store
            .find_orders(
                &OrderFilter::new()
                    .status(OrderStatus::Ordered)
                    .initial_email_unsent()
                    .requester(scope.requester()),
            )
            .await?;

        let mut sent = 0;
        let mut last_error = None;
        for order in &orders {
            let notification = Notification::OrderReceived {
                orderid: order.orderid.clone(),
                email: order.email.clone(),
            };
            match self.notify(&notification).await {
                Ok(()) => {
                    let update = OrderUpdate::new().initial_email_sent(self.now());
                    if self.store.update_order(order.id, None, &update).await? {
                        sent += 1;
                    }
                }
                Err(err) => {
                    warn!(order = %order.orderid, error = %err, "order received email not sent");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if sent == 0 => Err(err),
            _ => Ok(sent),
        }
    }

    /// Move `retry` scenes whose `retry_after` has passed back to
    /// `submitted`.
    pub(crate) async fn mature_retries(&self, scope: &Scope) -> Result<u64> {
        let now = self.now();
        let due = self
            .store
            .find_scenes(
                &SceneFilter::new()
                    .status(SceneStatus::Retry)
                    .retry_due_before(now)
                    .order_statuses([OrderStatus::Ordered])
                    .requester(scope.requester()),
            )
            .await?;
        if due.is_empty() {
            return Ok(0);
        }

        let ids: Vec<SceneId> = due.iter().map(|scene| scene.id).collect();
        let update = SceneUpdate::new()
            .status(SceneStatus::Submitted, now)
            .note("")
            .retry_after(None);
        let written = self
            .store
            .bulk_update_scenes(&ids, Some(&[SceneStatus::Retry]), &update)
            .await?;
        debug!(count = written, "retries matured");
        Ok(written)
    }

    /// Delete artifacts and notify for fully cancelled orders, once.
    ///
    /// `completion_email_sent` doubles as the "finalized" flag; imported
    /// orders get it set without an email.
    pub(crate) async fn finalize_cancellations(&self, scope: &Scope) -> Result<u64> {
        let orders = self
            .store
            .find_orders(
                &OrderFilter::new()
                    .status(OrderStatus::Cancelled)
                    .completion_email_unsent()
                    .requester(scope.requester()),
            )
            .await?;

        let mut finalized = 0;
        let mut last_error = None;
        for order in &orders {
            match self.finalize_cancellation(order).await {
                Ok(true) => finalized += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(order = %order.orderid, error = %err, "cancellation not finalized");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if finalized == 0 => Err(err),
            _ => Ok(finalized),
        }
    }

    async fn finalize_cancellation(&self, order: &Order) -> Result<bool> {
        let scenes = self
            .store
            .find_scenes(&SceneFilter::for_order(order.id))
            .await?;
        if scenes.iter().any(|scene| scene.status != SceneStatus::Cancelled) {
            debug!(order = %order.orderid, "cancelled order has outstanding scenes");
            return Ok(false);
        }

        if self
            .call(ExternalService::DistributionCache, self.cache.exists(&order.orderid))
            .await?
        {
            self.call(
                ExternalService::DistributionCache,
                self.cache.delete(&order.orderid),
            )
            .await?;
        }

        if order.order_source == OrderSource::SelfService {
            self.notify(&Notification::OrderCancelled {
                orderid: order.orderid.clone(),
                email: order.email.clone(),
            })
            .await?;
        }

        let update = OrderUpdate::new().completion_email_sent(self.now());
        let written = self.store.update_order(order.id, Some(OrderStatus::Cancelled), &update).await?;
        info!(order = %order.orderid, "cancelled order finalized");
        Ok(written)
    }

    /// Re-measure complete scenes that recorded no size. A missing artifact
    /// demotes the scene to `error`.
    pub(crate) async fn backfill_download_sizes(&self, scope: &Scope) -> Result<u64> {
        let scenes = self
            .store
            .find_scenes(
                &SceneFilter::new()
                    .status(SceneStatus::Complete)
                    .without_download_size()
                    .order_statuses([OrderStatus::Ordered])
                    .requester(scope.requester()),
            )
            .await?;

        let mut affected = 0;
        let mut measured_any = false;
        let mut last_error = None;
        for scene in &scenes {
            let measured = match self
                .call(
                    ExternalService::DistributionCache,
                    self.cache.artifact_size(&scene.product_distro_location),
                )
                .await
            {
                Ok(measured) => measured,
                Err(err) => {
                    warn!(
                        scene = %scene.name,
                        location = %scene.product_distro_location,
                        error = %err,
                        "could not measure completed product"
                    );
                    last_error = Some(err);
                    continue;
                }
            };
            measured_any = true;
            let update = match measured {
                Some(size) => SceneUpdate::new().download_size(size),
                None => {
                    error!(
                        scene = %scene.name,
                        location = %scene.product_distro_location,
                        "completed product missing from cache"
                    );
                    SceneUpdate::new()
                        .status(SceneStatus::Error, self.now())
                        .note(DOWNLOAD_MISSING_NOTE)
                }
            };
            if self
                .store
                .update_scene(scene.id, Some(SceneStatus::Complete), &update)
                .await?
            {
                affected += 1;
            }
        }

        match last_error {
            Some(err) if !measured_any => Err(err),
            _ => Ok(affected),
        }
    }

    /// Flip pending orders whose scenes are all terminal to `complete`, then
    /// send the completion email to self-service orders that lack it.
    pub(crate) async fn finalize_orders(&self, scope: &Scope) -> Result<u64> {
        let pending = self
            .store
            .find_orders(
                &OrderFilter::new()
                    .status(OrderStatus::Ordered)
                    .requester(scope.requester()),
            )
            .await?;

        let mut affected = 0;
        for order in &pending {
            let scenes = self
                .store
                .find_scenes(&SceneFilter::for_order(order.id))
                .await?;
            if scenes.iter().any(|scene| !scene.status.is_terminal()) {
                continue;
            }

            let update = OrderUpdate::new()
                .status(OrderStatus::Complete)
                .completion_date(Some(self.now()));
            if self
                .store
                .update_order(order.id, Some(OrderStatus::Ordered), &update)
                .await?
            {
                info!(order = %order.orderid, scenes = scenes.len(), "order complete");
                affected += 1;
            }
        }

        let unsent = self
            .store
            .find_orders(
                &OrderFilter::new()
                    .status(OrderStatus::Complete)
                    .source(OrderSource::SelfService)
                    .completion_email_unsent()
                    .requester(scope.requester()),
            )
            .await?;
        for order in &unsent {
            let notification = Notification::OrderComplete {
                orderid: order.orderid.clone(),
                email: order.email.clone(),
            };
            match self.notify(&notification).await {
                Ok(()) => {
                    let update = OrderUpdate::new().completion_email_sent(self.now());
                    if self.store.update_order(order.id, None, &update).await? {
                        affected += 1;
                    }
                }
                Err(err) => {
                    error!(order = %order.orderid, error = %err, "completion email not sent");
                }
            }
        }

        Ok(affected)
    }

    pub(crate) async fn notify(&self, notification: &Notification) -> Result<()> {
        self.call(ExternalService::Notification, self.notifier.send(notification))
            .await
    }
}
