//! Scene transition primitives shared by the reconciliation passes and the
//! processing-tier callbacks.

use std::time::Duration;

use terrex_model::{
    Order, OrderStatus, Scene, SceneId, SceneStatus, UpstreamUnitStatus,
};
use tracing::{debug, info, warn};

use crate::{
    error::{ExternalService, OrchestratorError, Result},
    orchestration::{orchestrator::ProductionOrchestrator, policy::RetryPlan},
    ports::{ResolutionStatus, SceneFilter, SceneUpdate},
};

/// Note recorded when a retry is refused because the limit is spent.
pub const RETRY_LIMIT_NOTE: &str = "retry limit exceeded";

/// Result of a transition request that may be superseded by a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// The owning order was cancelled; the scene was cancelled instead.
    Cancelled,
    /// Already in the requested state, or a concurrent writer got there
    /// first.
    Unchanged,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied)
    }
}

/// Delivery fields reported by the cluster for a finished scene.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedProduct {
    pub location: String,
    pub checksum_location: String,
    pub log: String,
}

impl ProductionOrchestrator {
    /// Record a successful cluster run.
    ///
    /// The artifact size is measured right away but a missing file is not an
    /// error; the backfill sub-pass picks it up later.
    pub async fn mark_complete(
        &self,
        scene_id: SceneId,
        product: &CompletedProduct,
    ) -> Result<TransitionOutcome> {
        let scene = self.load_scene(scene_id).await?;
        let order = self.load_order(scene.order_id).await?;

        if order.status == OrderStatus::Cancelled {
            return self.discard_for_cancelled(&scene, &order).await;
        }

        match scene.status {
            SceneStatus::Complete => return Ok(TransitionOutcome::Unchanged),
            SceneStatus::Queued | SceneStatus::Processing => {}
            other => {
                return Err(OrchestratorError::IntegrityViolation(format!(
                    "cannot mark {} complete from {other}",
                    scene.name
                )));
            }
        }

        let download_size = match self
            .call(
                ExternalService::DistributionCache,
                self.cache.artifact_size(&product.location),
            )
            .await
        {
            Ok(size) => size.unwrap_or(0),
            Err(err) => {
                debug!(scene = %scene.name, error = %err, "artifact size unavailable; deferring to backfill");
                0
            }
        };

        let now = self.now();
        let delivery = &self.config.delivery;
        let mut update = SceneUpdate::new()
            .status(SceneStatus::Complete, now)
            .note("")
            .log(product.log.clone())
            .download_size(download_size)
            .completion_date(Some(now))
            .job(None, None)
            .reported_orphan(None)
            .orphaned(false);
        update.product_distro_location = Some(product.location.clone());
        update.product_dload_url = Some(delivery.download_url(&order.orderid, &product.location));
        update.cksum_distro_location = Some(product.checksum_location.clone());
        update.cksum_download_url =
            Some(delivery.download_url(&order.orderid, &product.checksum_location));

        if !self
            .store
            .update_scene(scene.id, Some(scene.status), &update)
            .await?
        {
            return Ok(TransitionOutcome::Unchanged);
        }

        info!(order = %order.orderid, scene = %scene.name, size = download_size, "scene complete");
        self.push_unit_statuses(&[(scene, order)], UpstreamUnitStatus::Complete)
            .await?;
        Ok(TransitionOutcome::Applied)
    }

    pub async fn set_unavailable(
        &self,
        scene_id: SceneId,
        reason: &str,
    ) -> Result<TransitionOutcome> {
        let scene = self.load_scene(scene_id).await?;
        if scene.status == SceneStatus::Unavailable {
            return Ok(TransitionOutcome::Unchanged);
        }
        if !scene.status.can_transition_to(SceneStatus::Unavailable) {
            return Err(OrchestratorError::IntegrityViolation(format!(
                "cannot mark {} unavailable from {}",
                scene.name, scene.status
            )));
        }

        match self.set_products_unavailable(&[scene], reason).await? {
            0 => Ok(TransitionOutcome::Unchanged),
            _ => Ok(TransitionOutcome::Applied),
        }
    }

    /// Bulk form of [`set_unavailable`](Self::set_unavailable), used when one
    /// decision covers a whole batch. Scenes that cannot legally move to
    /// `unavailable` are skipped. Returns the number of rows written.
    pub async fn set_products_unavailable(
        &self,
        scenes: &[Scene],
        reason: &str,
    ) -> Result<u64> {
        let eligible: Vec<&Scene> = scenes
            .iter()
            .filter(|scene| {
                let ok = scene.status.can_transition_to(SceneStatus::Unavailable);
                if !ok {
                    debug!(scene = %scene.name, status = %scene.status, "skipping unavailable transition");
                }
                ok
            })
            .collect();
        if eligible.is_empty() {
            return Ok(0);
        }

        let mut sources: Vec<SceneStatus> =
            eligible.iter().map(|scene| scene.status).collect();
        sources.sort();
        sources.dedup();
        let ids: Vec<SceneId> = eligible.iter().map(|scene| scene.id).collect();

        let now = self.now();
        let update = SceneUpdate::new()
            .status(SceneStatus::Unavailable, now)
            .note(reason)
            .completion_date(Some(now))
            .tram_order_id(None)
            .job(None, None)
            .reported_orphan(None)
            .orphaned(false);
        let written = self
            .store
            .bulk_update_scenes(&ids, Some(sources.as_slice()), &update)
            .await?;
        if written == 0 {
            return Ok(0);
        }

        // Only rows this call wrote are reported upstream.
        let applied: Vec<Scene> = if written == ids.len() as u64 {
            eligible.into_iter().cloned().collect()
        } else {
            self.store
                .find_scenes(
                    &SceneFilter::new()
                        .ids(ids)
                        .status(SceneStatus::Unavailable),
                )
                .await?
                .into_iter()
                .filter(|scene| {
                    scene.note == reason
                        && (scene.status_modified - now).abs()
                            <= chrono::Duration::microseconds(1)
                })
                .collect()
        };

        let orders = self
            .orders_for(applied.iter().map(|scene| scene.order_id))
            .await?;
        let imported: Vec<(Scene, Order)> = applied
            .into_iter()
            .filter_map(|scene| {
                let order = orders.get(&scene.order_id)?.clone();
                order.is_imported().then_some((scene, order))
            })
            .collect();
        if !imported.is_empty() {
            self.push_unit_statuses(&imported, UpstreamUnitStatus::Rejected)
                .await?;
        }

        Ok(written)
    }

    /// Move a scene to `retry`, failing closed once the limit is spent.
    pub async fn set_retry(
        &self,
        scene_id: SceneId,
        after: Duration,
        limit: Option<u32>,
    ) -> Result<TransitionOutcome> {
        let scene = self.load_scene(scene_id).await?;
        self.retry_scene(&scene, after, limit, "", None).await
    }

    pub(crate) async fn retry_scene(
        &self,
        scene: &Scene,
        after: Duration,
        limit: Option<u32>,
        reason: &str,
        log: Option<&str>,
    ) -> Result<TransitionOutcome> {
        if !scene.status.can_transition_to(SceneStatus::Retry) {
            return Err(OrchestratorError::IntegrityViolation(format!(
                "cannot retry {} from {}",
                scene.name, scene.status
            )));
        }

        let now = self.now();
        let plan = RetryPlan::next(scene, after, limit, now)?;
        let mut update = SceneUpdate::new()
            .status(SceneStatus::Retry, now)
            .retry(plan.retry_count, plan.retry_limit, Some(plan.retry_after))
            .note(reason)
            .job(None, None)
            .reported_orphan(None)
            .orphaned(false);
        if let Some(log) = log {
            update = update.log(log);
        }

        let written = self
            .store
            .update_scene(scene.id, Some(scene.status), &update)
            .await?;
        if written {
            info!(
                scene = %scene.name,
                attempt = plan.retry_count,
                limit = plan.retry_limit,
                after = %plan.retry_after,
                "scene scheduled for retry"
            );
            Ok(TransitionOutcome::Applied)
        } else {
            Ok(TransitionOutcome::Unchanged)
        }
    }

    /// Route a cluster failure through the error classifier.
    ///
    /// Returns the status stored for the scene afterwards. A resolution the
    /// current status cannot take falls back to a hard `error`.
    pub async fn set_error(
        &self,
        scene_id: SceneId,
        raw_log: &str,
    ) -> Result<SceneStatus> {
        let scene = self.load_scene(scene_id).await?;
        let order = self.load_order(scene.order_id).await?;

        if order.status == OrderStatus::Cancelled {
            self.discard_for_cancelled(&scene, &order).await?;
            return Ok(SceneStatus::Cancelled);
        }

        let resolution = if scene.is_plot() {
            None
        } else {
            self.classifier.classify(raw_log, &scene.name)
        };

        let Some(resolution) = resolution else {
            self.hard_error(&scene, "", raw_log).await?;
            return self.stored_status(scene.id).await;
        };

        let target = resolution.status.scene_status();
        if !scene.status.can_transition_to(target) {
            if scene.status.can_transition_to(SceneStatus::Error) {
                warn!(
                    scene = %scene.name,
                    status = %scene.status,
                    %target,
                    "resolution does not apply; marking error"
                );
                self.hard_error(&scene, &resolution.reason, raw_log).await?;
            } else {
                debug!(scene = %scene.name, status = %scene.status, "failure report ignored");
            }
            return self.stored_status(scene.id).await;
        }

        match resolution.status {
            ResolutionStatus::Submitted => {
                let update = resubmit_update(self.now()).note("").log(raw_log);
                if self
                    .store
                    .update_scene(scene.id, Some(scene.status), &update)
                    .await?
                {
                    debug!(scene = %scene.name, "transient failure; resubmitted");
                }
            }
            ResolutionStatus::Unavailable => {
                let written = self
                    .set_products_unavailable(
                        std::slice::from_ref(&scene),
                        &resolution.reason,
                    )
                    .await?;
                if written > 0 {
                    self.store
                        .update_scene(
                            scene.id,
                            Some(SceneStatus::Unavailable),
                            &SceneUpdate::new().log(raw_log),
                        )
                        .await?;
                }
            }
            ResolutionStatus::Retry => {
                let after = resolution.retry_after.unwrap_or_default();
                match self
                    .retry_scene(
                        &scene,
                        after,
                        resolution.retry_limit,
                        &resolution.reason,
                        Some(raw_log),
                    )
                    .await
                {
                    Ok(_) => {}
                    Err(OrchestratorError::RetryLimitExceeded { limit, .. }) => {
                        warn!(scene = %scene.name, limit, "retry limit exceeded; marking error");
                        self.hard_error(&scene, RETRY_LIMIT_NOTE, raw_log)
                            .await?;
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        self.stored_status(scene.id).await
    }

    async fn stored_status(&self, scene_id: SceneId) -> Result<SceneStatus> {
        Ok(self.load_scene(scene_id).await?.status)
    }

    async fn hard_error(
        &self,
        scene: &Scene,
        note: &str,
        raw_log: &str,
    ) -> Result<bool> {
        let update = SceneUpdate::new()
            .status(SceneStatus::Error, self.now())
            .note(note)
            .log(raw_log)
            .job(None, None)
            .reported_orphan(None)
            .orphaned(false);
        self.store
            .update_scene(scene.id, Some(scene.status), &update)
            .await
    }

    /// Work finished for an order that was cancelled meanwhile: drop the
    /// artifacts and cancel the scene.
    pub(crate) async fn discard_for_cancelled(
        &self,
        scene: &Scene,
        order: &Order,
    ) -> Result<TransitionOutcome> {
        if let Err(err) = self
            .call(
                ExternalService::DistributionCache,
                self.cache.delete(&order.orderid),
            )
            .await
        {
            warn!(order = %order.orderid, error = %err, "could not remove artifacts of cancelled order");
        }

        if scene.status == SceneStatus::Cancelled {
            return Ok(TransitionOutcome::Cancelled);
        }

        let update = SceneUpdate::new()
            .status(SceneStatus::Cancelled, self.now())
            .job(None, None);
        self.store
            .update_scene(scene.id, Some(scene.status), &update)
            .await?;
        info!(order = %order.orderid, scene = %scene.name, "discarded result of cancelled order");
        Ok(TransitionOutcome::Cancelled)
    }
}

/// Fields written when a scene goes back to `submitted` for a fresh run.
pub(crate) fn resubmit_update(now: chrono::DateTime<chrono::Utc>) -> SceneUpdate {
    SceneUpdate::new()
        .status(SceneStatus::Submitted, now)
        .job(None, None)
        .reported_orphan(None)
        .orphaned(false)
        .retry_after(None)
}
