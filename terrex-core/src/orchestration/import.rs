//! Pulls orders placed through the upstream archive's own portal.

use std::collections::HashSet;

use terrex_model::{
    NewOrder, NewScene, Order, OrderSource, Scene, SceneStatus, UpstreamUnitStatus,
};
use tracing::{debug, error, info};

use crate::{
    error::{ExternalService, OrchestratorError, Result},
    orchestration::{orchestrator::ProductionOrchestrator, reconcile::Scope},
    ports::{ImportedOrder, ImportedUnit, OrderUpdate, SceneFilter},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub created: u64,
    /// Scenes added to orders that already existed locally.
    pub injected: u64,
    pub refreshed: u64,
}

impl ImportSummary {
    pub fn affected(&self) -> u64 {
        self.created + self.injected + self.refreshed
    }
}

impl ProductionOrchestrator {
    /// Find-or-create local rows for every pending upstream order.
    ///
    /// Existing orders are never re-created; units missing locally are
    /// injected and the order's options refreshed.
    pub(crate) async fn import_orders(&self, scope: &Scope) -> Result<ImportSummary> {
        if !self.config.import.enabled {
            return Err(OrchestratorError::Configuration(
                "order import is disabled".into(),
            ));
        }

        let incoming = self
            .call(
                ExternalService::Ordering,
                self.ordering.fetch_imported_orders(),
            )
            .await?;

        let mut summary = ImportSummary::default();
        let mut first_error = None;
        for upstream in incoming
            .iter()
            .filter(|order| scope.requester().is_none_or(|r| order.requester == r))
        {
            let result = match self
                .store
                .find_order_by_upstream_id(&upstream.ee_order_id)
                .await
            {
                Ok(Some(existing)) => self.refresh_import(&existing, upstream, &mut summary).await,
                Ok(None) => self.create_import(upstream).await.map(|_| {
                    summary.created += 1;
                }),
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                error!(upstream = %upstream.ee_order_id, error = %err, "could not import order");
                first_error = first_error.or(Some(err));
            }
        }

        match first_error {
            Some(err) if summary.affected() == 0 => Err(err),
            _ => Ok(summary),
        }
    }

    async fn create_import(&self, upstream: &ImportedOrder) -> Result<Order> {
        let now = self.now();
        let new = NewOrder {
            orderid: Order::imported_key(&upstream.email, &upstream.ee_order_id),
            requester: upstream.requester.clone(),
            email: upstream.email.clone(),
            order_source: OrderSource::Imported,
            order_date: upstream.order_date,
            ee_order_id: Some(upstream.ee_order_id.clone()),
            product_opts: upstream.product_opts.clone(),
            note: Some(upstream.ee_order_id.clone()),
        };
        let scenes = upstream
            .units
            .iter()
            .map(|unit| self.imported_scene(unit))
            .collect();

        let order = self.store.create_order(new, scenes, now).await?;
        info!(order = %order.orderid, units = upstream.units.len(), "imported order");

        let created = self
            .store
            .find_scenes(&SceneFilter::for_order(order.id))
            .await?;
        self.reject_restricted(&order, created).await?;
        Ok(order)
    }

    async fn refresh_import(
        &self,
        order: &Order,
        upstream: &ImportedOrder,
        summary: &mut ImportSummary,
    ) -> Result<()> {
        let known: HashSet<String> = self
            .store
            .find_scenes(&SceneFilter::for_order(order.id))
            .await?
            .into_iter()
            .filter_map(|scene| scene.ee_unit_id)
            .collect();

        let missing: Vec<NewScene> = upstream
            .units
            .iter()
            .filter(|unit| !known.contains(&unit.unit_id))
            .map(|unit| self.imported_scene(unit))
            .collect();
        if missing.is_empty() {
            debug!(order = %order.orderid, "imported order already up to date");
            return Ok(());
        }

        let inserted = self
            .store
            .insert_scenes(order.id, missing, self.now())
            .await?;
        summary.injected += inserted.len() as u64;
        info!(order = %order.orderid, count = inserted.len(), "injected missing scenes");

        if order.product_opts != upstream.product_opts
            && self
                .store
                .update_order(
                    order.id,
                    None,
                    &OrderUpdate::new().product_opts(upstream.product_opts.clone()),
                )
                .await?
        {
            summary.refreshed += 1;
        }

        self.reject_restricted(order, inserted).await
    }

    fn imported_scene(&self, unit: &ImportedUnit) -> NewScene {
        let scene = NewScene::submitted(
            unit.name.clone(),
            unit.sensor,
            self.config.retry.default_retry_limit,
        )
        .with_unit(unit.unit_id.clone());
        match &unit.restricted {
            Some(reason) => scene.unavailable(reason.clone()),
            None => scene,
        }
    }

    /// Tell the archive about units that arrived already `unavailable`.
    async fn reject_restricted(&self, order: &Order, scenes: Vec<Scene>) -> Result<()> {
        let rejected: Vec<(Scene, Order)> = scenes
            .into_iter()
            .filter(|scene| scene.status == SceneStatus::Unavailable)
            .map(|scene| (scene, order.clone()))
            .collect();
        if rejected.is_empty() {
            return Ok(());
        }
        self.push_unit_statuses(&rejected, UpstreamUnitStatus::Rejected)
            .await?;
        Ok(())
    }
}
