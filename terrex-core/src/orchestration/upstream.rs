//! Upstream archive synchronisation: polling `onorder` batches and repairing
//! status pushes that failed earlier.

use std::collections::{BTreeSet, HashSet};

use futures::{StreamExt, stream};
use terrex_model::{OrderStatus, Scene, SceneId, SceneStatus};
use tracing::{debug, info, warn};

use crate::{
    error::{ExternalService, OrchestratorError, Result},
    orchestration::{orchestrator::ProductionOrchestrator, reconcile::Scope},
    ports::{SceneFilter, SceneUpdate, UnitStatus, UnitStatusReport},
};

/// Note attached to scenes the archive refused to produce.
pub const UPSTREAM_REJECTED_NOTE: &str = "Level 1 product could not be produced";

impl ProductionOrchestrator {
    /// Poll the oldest `onorder` batches and apply their unit statuses.
    ///
    /// Batch ids are sequential, so sorting them processes the oldest
    /// batches first; at most `onorder_batch_window` are polled per pass.
    pub(crate) async fn sync_onorder(&self, scope: &Scope) -> Result<u64> {
        let onorder = self
            .store
            .find_scenes(
                &SceneFilter::new()
                    .status(SceneStatus::Onorder)
                    .order_statuses([OrderStatus::Ordered])
                    .requester(scope.requester()),
            )
            .await?;

        let batches: Vec<String> = onorder
            .iter()
            .filter_map(|scene| scene.tram_order_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .take(self.config.upstream.onorder_batch_window)
            .collect();
        if batches.is_empty() {
            return Ok(0);
        }

        let polled: Vec<(String, Result<Vec<UnitStatus>>)> = stream::iter(batches)
            .map(|batch| async move {
                let result = self
                    .call(
                        ExternalService::Ordering,
                        self.ordering.poll_status(&batch),
                    )
                    .await;
                (batch, result)
            })
            .buffer_unordered(self.config.upstream.parallelism())
            .collect()
            .await;

        let mut rejected = HashSet::new();
        let mut available = HashSet::new();
        let mut last_error = None;
        let mut answered = 0usize;
        for (batch, result) in polled {
            match result {
                Ok(units) => {
                    answered += 1;
                    for unit in units {
                        match unit.status {
                            UnitStatusReport::Rejected => {
                                rejected.insert(unit.unit_id);
                            }
                            UnitStatusReport::Available => {
                                available.insert(unit.unit_id);
                            }
                            UnitStatusReport::Ordered => {}
                        }
                    }
                }
                Err(err) => {
                    debug!(target: "reconcile::upstream", %batch, error = %err, "batch poll failed");
                    last_error = Some(err);
                }
            }
        }
        if answered == 0
            && let Some(err) = last_error
        {
            return Err(err);
        }

        let mut affected = 0;

        // Duplicate batches may carry the same scene; every onorder copy is
        // resolved, not only the one in the polled batch.
        let rejected_scenes: Vec<Scene> = onorder
            .iter()
            .filter(|scene| rejected.contains(&scene.name))
            .cloned()
            .collect();
        if !rejected_scenes.is_empty() {
            affected += self
                .set_products_unavailable(&rejected_scenes, UPSTREAM_REJECTED_NOTE)
                .await?;
        }

        let available_count = available.len();
        if !available.is_empty() {
            let ready = self
                .store
                .find_scenes(
                    &SceneFilter::new()
                        .status(SceneStatus::Onorder)
                        .names(available),
                )
                .await?;
            let ids: Vec<SceneId> = ready.iter().map(|scene| scene.id).collect();
            if !ids.is_empty() {
                let update = SceneUpdate::new()
                    .status(SceneStatus::Oncache, self.now())
                    .note("")
                    .tram_order_id(None);
                affected += self
                    .store
                    .bulk_update_scenes(&ids, Some(&[SceneStatus::Onorder]), &update)
                    .await?;
            }
        }

        if affected > 0 {
            info!(
                target: "reconcile::upstream",
                rejected = rejected_scenes.len(),
                available = available_count,
                "onorder batches resolved"
            );
        }
        Ok(affected)
    }

    /// Resend parked upstream status pushes. The flag clears only after a
    /// successful push.
    pub(crate) async fn repair_upstream_statuses(
        &self,
        scope: &Scope,
    ) -> Result<u64> {
        let pending = self
            .store
            .find_scenes(
                &SceneFilter::new()
                    .with_failed_upstream_update()
                    .requester(scope.requester()),
            )
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let orders = self.orders_for(pending.iter().map(|s| s.order_id)).await?;
        let attempts = pending.iter().filter_map(|scene| {
            let status = scene.failed_lta_status_update?;
            let order = orders.get(&scene.order_id)?;
            let ee_order_id = order.ee_order_id.as_deref()?;
            let unit_id = scene.ee_unit_id.as_deref()?;
            Some((scene, ee_order_id, unit_id, status))
        });

        let results: Vec<(SceneId, Result<()>)> = stream::iter(attempts)
            .map(|(scene, ee_order_id, unit_id, status)| async move {
                let result = self
                    .call(
                        ExternalService::Ordering,
                        self.ordering
                            .push_unit_status(ee_order_id, unit_id, status),
                    )
                    .await;
                (scene.id, result)
            })
            .buffer_unordered(self.config.upstream.parallelism())
            .collect()
            .await;

        let mut cleared = Vec::new();
        let mut failures = 0usize;
        let mut last_error = None;
        for (id, result) in results {
            match result {
                Ok(()) => cleared.push(id),
                Err(OrchestratorError::UpstreamRejected(reason)) => {
                    warn!(target: "reconcile::upstream", scene = %id, %reason, "upstream refused parked status; dropping it");
                    cleared.push(id);
                }
                Err(err) => {
                    failures += 1;
                    last_error = Some(err);
                }
            }
        }

        if let Some(err) = &last_error {
            self.warn_upstream_failure(&format!(
                "{failures} parked status update(s) still failing: {err}"
            ))
            .await;
        }

        if cleared.is_empty() {
            return match last_error {
                Some(err) => Err(err),
                None => Ok(0),
            };
        }

        let update = SceneUpdate::new().failed_upstream_update(None);
        let written = self.store.bulk_update_scenes(&cleared, None, &update).await?;
        info!(target: "reconcile::upstream", repaired = written, still_failing = failures, "parked upstream statuses resent");
        Ok(written)
    }
}
