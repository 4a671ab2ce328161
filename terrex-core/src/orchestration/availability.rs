use std::collections::{BTreeSet, HashSet};

use terrex_model::{OrderId, OrderStatus, Scene, SceneId, SceneStatus, SensorFamily};
use tracing::{debug, error, info, warn};

use crate::{
    error::{ExternalService, OrchestratorError, Result},
    orchestration::{orchestrator::ProductionOrchestrator, reconcile::Scope},
    ports::{SceneFilter, SceneUpdate},
};

/// Note attached to a plot whose order produced nothing to plot.
pub const NO_PLOT_INPUTS_NOTE: &str =
    "No input products were available for plotting and statistics";

impl ProductionOrchestrator {
    /// Check `submitted` scenes against the catalog, one batch per sensor
    /// family. Families are checked concurrently; one family's catalog being
    /// down does not hold back the other.
    pub(crate) async fn verify_availability(&self, scope: &Scope) -> Result<u64> {
        let (landsat, modis) = tokio::join!(
            self.verify_family(SensorFamily::Landsat, scope),
            self.verify_family(SensorFamily::Modis, scope),
        );

        match (landsat, modis) {
            (Ok(a), Ok(b)) => Ok(a + b),
            (Ok(done), Err(err)) | (Err(err), Ok(done)) => {
                warn!(error = %err, "availability check incomplete");
                Ok(done)
            }
            (Err(err), Err(_)) => Err(err),
        }
    }

    async fn verify_family(
        &self,
        sensor: SensorFamily,
        scope: &Scope,
    ) -> Result<u64> {
        let config = &self.config.availability;
        let scenes = self
            .store
            .find_scenes(
                &SceneFilter::new()
                    .status(SceneStatus::Submitted)
                    .sensors([sensor])
                    .order_statuses([OrderStatus::Ordered])
                    .requester(scope.requester())
                    .limit(config.batch_limit),
            )
            .await?;
        if scenes.is_empty() {
            return Ok(0);
        }

        let mut names: Vec<String> =
            scenes.iter().map(|scene| scene.name.clone()).collect();
        names.sort();
        names.dedup();

        let answers = self
            .call(
                ExternalService::Inventory,
                self.inventory.check_availability(sensor, &names),
            )
            .await?;
        let valid: HashSet<&str> = answers
            .iter()
            .filter(|(_, available)| **available)
            .map(|(name, _)| name.as_str())
            .collect();

        let (found, missing): (Vec<Scene>, Vec<Scene>) = scenes
            .into_iter()
            .partition(|scene| valid.contains(scene.name.as_str()));
        debug!(%sensor, found = found.len(), missing = missing.len(), "catalog answered");

        let mut affected = 0;
        if !found.is_empty() {
            affected += if sensor == SensorFamily::Landsat
                && config.landsat_order_via_archive
            {
                self.place_with_archive(&found).await?
            } else {
                let ids: Vec<SceneId> = found.iter().map(|scene| scene.id).collect();
                let update = SceneUpdate::new()
                    .status(SceneStatus::Oncache, self.now())
                    .note("");
                self.store
                    .bulk_update_scenes(&ids, Some(&[SceneStatus::Submitted]), &update)
                    .await?
            };
        }

        if !missing.is_empty() {
            affected += self
                .set_products_unavailable(&missing, &config.unavailable_reason)
                .await?;
        }

        Ok(affected)
    }

    async fn place_with_archive(&self, scenes: &[Scene]) -> Result<u64> {
        let mut names: Vec<String> =
            scenes.iter().map(|scene| scene.name.clone()).collect();
        names.sort();
        names.dedup();

        let batch = self
            .call(ExternalService::Ordering, self.ordering.place_order(&names))
            .await?;

        let ids: Vec<SceneId> = scenes.iter().map(|scene| scene.id).collect();
        let update = SceneUpdate::new()
            .status(SceneStatus::Onorder, self.now())
            .note("")
            .tram_order_id(Some(batch.clone()));
        let written = self
            .store
            .bulk_update_scenes(&ids, Some(&[SceneStatus::Submitted]), &update)
            .await?;
        info!(target: "reconcile::upstream", %batch, count = written, "placed scenes with archive");
        Ok(written)
    }

    /// Release plot scenes once every sibling in their order is terminal.
    pub(crate) async fn promote_plots(&self, scope: &Scope) -> Result<u64> {
        let plots = self
            .store
            .find_scenes(
                &SceneFilter::new()
                    .status(SceneStatus::Submitted)
                    .sensors([SensorFamily::Plot])
                    .order_statuses([OrderStatus::Ordered])
                    .requester(scope.requester()),
            )
            .await?;

        let order_ids: Vec<OrderId> = plots
            .iter()
            .map(|plot| plot.order_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut affected = 0;
        let mut first_error = None;
        for order_id in order_ids {
            match self.promote_order_plot(order_id).await {
                Ok(n) => affected += n,
                Err(err) => {
                    error!(order = %order_id, error = %err, "plot promotion failed");
                    first_error = first_error.or(Some(err));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(affected),
        }
    }

    async fn promote_order_plot(&self, order_id: OrderId) -> Result<u64> {
        let scenes = self
            .store
            .find_scenes(&SceneFilter::for_order(order_id))
            .await?;

        let outstanding = scenes.iter().filter(|s| !s.status.is_terminal()).count();
        if outstanding != 1 {
            return Ok(0);
        }

        let plots: Vec<&Scene> = scenes.iter().filter(|s| s.is_plot()).collect();
        let [plot] = plots.as_slice() else {
            return Err(OrchestratorError::IntegrityViolation(format!(
                "order {order_id} has {} plot scenes",
                plots.len()
            )));
        };
        if plot.status != SceneStatus::Submitted {
            return Ok(0);
        }

        let complete = scenes
            .iter()
            .filter(|s| s.status == SceneStatus::Complete)
            .count();
        if complete == 0 {
            info!(order = %order_id, "no inputs available for plotting");
            return self
                .set_products_unavailable(
                    std::slice::from_ref(*plot),
                    NO_PLOT_INPUTS_NOTE,
                )
                .await;
        }

        let update = SceneUpdate::new()
            .status(SceneStatus::Oncache, self.now())
            .note("");
        let written = self
            .store
            .update_scene(plot.id, Some(SceneStatus::Submitted), &update)
            .await?;
        debug!(order = %order_id, "plot on cache");
        Ok(u64::from(written))
    }
}
