//! The processing tier's side of the scene state machine: handing out work,
//! queueing it and recording what the cluster reports.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use terrex_model::{
    OrderStatus, ProductOptions, Scene, SceneId, SceneStatus, SensorFamily,
};
use tracing::{debug, info, warn};

use crate::{
    error::{ExternalService, OrchestratorError, Result},
    orchestration::{
        orchestrator::ProductionOrchestrator,
        transitions::{CompletedProduct, TransitionOutcome, resubmit_update},
    },
    ports::{SceneFilter, SceneUpdate},
};

/// One `oncache` scene ready to be run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingItem {
    pub orderid: String,
    pub requester: String,
    pub scene: String,
    pub sensor: SensorFamily,
    pub order_date: DateTime<Utc>,
    pub product_opts: ProductOptions,
}

/// Callback from the processing tier, keyed by the action it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProductAction {
    UpdateStatus {
        #[serde(default)]
        status: Option<SceneStatus>,
        #[serde(default)]
        processing_location: Option<String>,
    },
    SetProductError {
        error: String,
    },
    SetProductUnavailable {
        note: String,
    },
    MarkProductComplete {
        completed_file_location: String,
        #[serde(default)]
        cksum_file_location: String,
        #[serde(default)]
        log_file_contents: String,
    },
}

impl ProductionOrchestrator {
    /// `oncache` scenes of pending orders, oldest order first.
    pub async fn products_to_process(
        &self,
        limit: usize,
        sensors: &[SensorFamily],
        requester: Option<&str>,
    ) -> Result<Vec<ProcessingItem>> {
        let scenes = self
            .store
            .find_scenes(
                &SceneFilter::new()
                    .status(SceneStatus::Oncache)
                    .sensors(sensors.iter().copied())
                    .order_statuses([OrderStatus::Ordered])
                    .requester(requester)
                    .limit(limit),
            )
            .await?;
        let orders = self.orders_for(scenes.iter().map(|s| s.order_id)).await?;

        let items = scenes
            .into_iter()
            .filter_map(|scene| {
                let order = orders.get(&scene.order_id)?;
                Some(ProcessingItem {
                    orderid: order.orderid.clone(),
                    requester: order.requester.clone(),
                    scene: scene.name,
                    sensor: scene.sensor_type,
                    order_date: order.order_date,
                    product_opts: order.product_opts.clone(),
                })
            })
            .collect::<Vec<_>>();
        debug!(count = items.len(), limit, "products to process");
        Ok(items)
    }

    /// Move `(orderid, scene name)` pairs from `oncache` to `queued` under
    /// one cluster job.
    pub async fn queue_products(
        &self,
        items: &[(String, String)],
        processing_location: &str,
        job_name: &str,
    ) -> Result<u64> {
        let mut by_order: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (orderid, name) in items {
            by_order.entry(orderid.as_str()).or_default().push(name.as_str());
        }

        let now = self.now();
        let update = SceneUpdate::new()
            .status(SceneStatus::Queued, now)
            .job(Some(job_name.to_string()), Some(processing_location.to_string()))
            .log("")
            .note("");

        let mut queued = 0;
        for (orderid, names) in by_order {
            let Some(order) = self.store.find_order_by_key(orderid).await? else {
                warn!(order = orderid, "cannot queue scenes of unknown order");
                continue;
            };
            let scenes = self
                .store
                .find_scenes(
                    &SceneFilter::for_order(order.id)
                        .names(names)
                        .status(SceneStatus::Oncache),
                )
                .await?;
            let ids: Vec<SceneId> = scenes.iter().map(|scene| scene.id).collect();
            if ids.is_empty() {
                continue;
            }
            queued += self
                .store
                .bulk_update_scenes(&ids, Some(&[SceneStatus::Oncache]), &update)
                .await?;
        }

        info!(job = job_name, location = processing_location, count = queued, "scenes queued");
        Ok(queued)
    }

    /// Status and location update reported while a job runs.
    ///
    /// A scene of a cancelled order is cancelled instead.
    pub async fn update_status(
        &self,
        name: &str,
        orderid: &str,
        processing_location: Option<&str>,
        status: Option<SceneStatus>,
    ) -> Result<TransitionOutcome> {
        let (order, scene) = self.find_scene(orderid, name).await?;

        if order.status == OrderStatus::Cancelled {
            if scene.status != SceneStatus::Cancelled {
                let update = SceneUpdate::new()
                    .status(SceneStatus::Cancelled, self.now())
                    .job(None, None);
                self.store
                    .update_scene(scene.id, Some(scene.status), &update)
                    .await?;
            }
            return Ok(TransitionOutcome::Cancelled);
        }

        let mut update = SceneUpdate::new();
        if let Some(status) = status
            && status != scene.status
        {
            if !scene.status.can_transition_to(status) {
                return Err(OrchestratorError::IntegrityViolation(format!(
                    "cannot move {name} from {} to {status}",
                    scene.status
                )));
            }
            update = update.status(status, self.now());
        }
        if let Some(location) = processing_location {
            update.processing_location = Some(Some(location.to_string()));
        }
        if update.is_empty() {
            return Ok(TransitionOutcome::Unchanged);
        }

        if !self
            .store
            .update_scene(scene.id, Some(scene.status), &update)
            .await?
        {
            return Ok(TransitionOutcome::Unchanged);
        }
        info!(
            order = orderid,
            scene = name,
            status = %status.unwrap_or(scene.status),
            location = processing_location.unwrap_or_default(),
            "scene status updated"
        );
        Ok(TransitionOutcome::Applied)
    }

    /// Dispatch a processing-tier callback. Returns the scene as stored
    /// afterwards.
    pub async fn update_product(
        &self,
        orderid: &str,
        name: &str,
        action: ProductAction,
    ) -> Result<Scene> {
        let (_, scene) = self.find_scene(orderid, name).await?;
        match action {
            ProductAction::UpdateStatus {
                status,
                processing_location,
            } => {
                self.update_status(name, orderid, processing_location.as_deref(), status)
                    .await?;
            }
            ProductAction::SetProductError { error } => {
                self.set_error(scene.id, &error).await?;
            }
            ProductAction::SetProductUnavailable { note } => {
                self.set_unavailable(scene.id, &note).await?;
            }
            ProductAction::MarkProductComplete {
                completed_file_location,
                cksum_file_location,
                log_file_contents,
            } => {
                let product = CompletedProduct {
                    location: completed_file_location,
                    checksum_location: cksum_file_location,
                    log: log_file_contents,
                };
                self.mark_complete(scene.id, &product).await?;
            }
        }
        self.load_scene(scene.id).await
    }

    /// Send every queued/processing scene back to `submitted`.
    pub async fn reset_processing_status(&self) -> Result<u64> {
        let scenes = self
            .store
            .find_scenes(&SceneFilter::new().statuses(SceneStatus::ON_CLUSTER))
            .await?;
        if scenes.is_empty() {
            return Ok(0);
        }

        let ids: Vec<SceneId> = scenes.iter().map(|scene| scene.id).collect();
        let written = self
            .store
            .bulk_update_scenes(
                &ids,
                Some(&SceneStatus::ON_CLUSTER),
                &resubmit_update(self.now()),
            )
            .await?;
        info!(count = written, "processing status reset");
        Ok(written)
    }

    /// Kill the cluster jobs running a requester's scenes.
    pub async fn kill_requester_jobs(&self, requester: &str) -> Result<u64> {
        let scenes = self
            .store
            .find_scenes(
                &SceneFilter::new()
                    .statuses(SceneStatus::ON_CLUSTER)
                    .requester(Some(requester)),
            )
            .await?;
        let names: HashSet<&str> = scenes
            .iter()
            .filter_map(|scene| scene.job_name.as_deref())
            .collect();
        if names.is_empty() {
            return Ok(0);
        }

        let live = self
            .call(ExternalService::Cluster, self.cluster.list_live_jobs())
            .await?;

        let mut killed = 0;
        let mut last_error = None;
        for job in live.iter().filter(|job| names.contains(job.name.as_str())) {
            match self
                .call(ExternalService::Cluster, self.cluster.kill_job(&job.id))
                .await
            {
                Ok(()) => killed += 1,
                Err(err) => {
                    warn!(job = %job.id, name = %job.name, error = %err, "could not kill job");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if killed == 0 => Err(err),
            _ => {
                info!(requester, killed, "killed requester jobs");
                Ok(killed)
            }
        }
    }
}
