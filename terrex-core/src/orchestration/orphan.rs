//! Cluster orphan detection and resubmission.
//!
//! A scene is only confirmed orphaned after two absences from the live job
//! listing at least `orphan_hysteresis_secs` apart. A single incomplete
//! listing never moves a scene out of `queued`/`processing`.

use std::collections::HashSet;

use terrex_model::{OrderStatus, Scene, SceneId, SceneStatus};
use tracing::{info, warn};

use crate::{
    error::{ExternalService, Result},
    orchestration::{
        orchestrator::ProductionOrchestrator, policy::OrphanDecision,
        transitions::resubmit_update,
    },
    ports::{SceneFilter, SceneUpdate},
};

/// Counts from one orphan detection sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrphanSweep {
    pub checked: usize,
    pub first_absences: u64,
    pub confirmed: u64,
    pub cleared: u64,
}

impl OrphanSweep {
    pub fn affected(&self) -> u64 {
        self.first_absences + self.confirmed + self.cleared
    }
}

/// Counts from moving confirmed orphans off the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrphanResubmission {
    pub resubmitted: u64,
    pub cancelled: u64,
}

impl ProductionOrchestrator {
    /// Compare `scenes` against the live job listing and record absences.
    pub async fn detect_orphans(&self, scenes: &[Scene]) -> Result<OrphanSweep> {
        let mut sweep = OrphanSweep {
            checked: scenes.len(),
            ..OrphanSweep::default()
        };
        if scenes.is_empty() {
            return Ok(sweep);
        }

        let live: HashSet<String> = self
            .call(ExternalService::Cluster, self.cluster.list_live_job_names())
            .await?
            .into_iter()
            .collect();

        let now = self.now();
        let hysteresis = self.config.stuck.orphan_hysteresis();
        let mut first = Vec::new();
        let mut confirm = Vec::new();
        let mut clear = Vec::new();

        for scene in scenes {
            let job_live = scene
                .job_name
                .as_ref()
                .is_some_and(|name| live.contains(name));
            match OrphanDecision::decide(scene, job_live, now, hysteresis) {
                OrphanDecision::FirstAbsence => first.push(scene.id),
                OrphanDecision::Confirm => confirm.push(scene.id),
                OrphanDecision::ClearSuspicion => clear.push(scene.id),
                OrphanDecision::Healthy
                | OrphanDecision::Pending
                | OrphanDecision::AlreadyOrphaned => {}
            }
        }

        let on_cluster = SceneStatus::ON_CLUSTER;
        if !first.is_empty() {
            sweep.first_absences = self
                .store
                .bulk_update_scenes(
                    &first,
                    Some(&on_cluster),
                    &SceneUpdate::new().reported_orphan(Some(now)),
                )
                .await?;
        }
        if !confirm.is_empty() {
            sweep.confirmed = self
                .store
                .bulk_update_scenes(
                    &confirm,
                    Some(&on_cluster),
                    &SceneUpdate::new().orphaned(true),
                )
                .await?;
        }
        if !clear.is_empty() {
            sweep.cleared = self
                .store
                .bulk_update_scenes(
                    &clear,
                    Some(&on_cluster),
                    &SceneUpdate::new().reported_orphan(None),
                )
                .await?;
        }

        if sweep.affected() > 0 {
            info!(
                target: "reconcile::orphan",
                checked = sweep.checked,
                first_absences = sweep.first_absences,
                confirmed = sweep.confirmed,
                cleared = sweep.cleared,
                "orphan sweep"
            );
        }
        Ok(sweep)
    }

    /// Stuck-job sub-pass: scenes on the cluster whose status has not moved
    /// for `stuck_after_secs` are checked for orphans, and confirmed orphans
    /// are resubmitted.
    pub(crate) async fn handle_stuck_jobs(&self) -> Result<u64> {
        let cutoff = self.now() - self.config.stuck.stuck_after();
        let stuck = self
            .store
            .find_scenes(
                &SceneFilter::new()
                    .statuses(SceneStatus::ON_CLUSTER)
                    .modified_before(cutoff),
            )
            .await?;
        if stuck.is_empty() {
            return Ok(0);
        }

        let sweep = self.detect_orphans(&stuck).await?;
        let ids: Vec<SceneId> = stuck.iter().map(|scene| scene.id).collect();
        let moved = self.resubmit_confirmed(Some(ids)).await?;
        Ok(sweep.affected() + moved.resubmitted + moved.cancelled)
    }

    /// Operator-driven two-sample resubmission.
    ///
    /// Resets every orphan flag, samples the job listing, waits past the
    /// hysteresis window, samples again, and only then moves confirmed
    /// orphans back to `submitted`. Blocks for `resubmit_wait_secs`.
    pub async fn resubmit_orphaned(&self) -> Result<OrphanResubmission> {
        let flagged = self
            .store
            .find_scenes(&SceneFilter::new().with_reported_orphan(true))
            .await?;
        let mut ids: Vec<SceneId> = flagged.iter().map(|scene| scene.id).collect();
        let orphaned = self
            .store
            .find_scenes(&SceneFilter::new().orphaned(true))
            .await?;
        ids.extend(orphaned.iter().map(|scene| scene.id));
        ids.sort();
        ids.dedup();
        if !ids.is_empty() {
            let reset = SceneUpdate::new().reported_orphan(None).orphaned(false);
            self.store.bulk_update_scenes(&ids, None, &reset).await?;
        }

        let on_cluster = SceneFilter::new().statuses(SceneStatus::ON_CLUSTER);
        let scenes = self.store.find_scenes(&on_cluster).await?;
        self.detect_orphans(&scenes).await?;

        let wait = self.config.stuck.resubmit_wait();
        info!(target: "reconcile::orphan", seconds = wait.as_secs(), "waiting before confirming orphans");
        self.clock.sleep(wait).await;

        let scenes = self.store.find_scenes(&on_cluster).await?;
        self.detect_orphans(&scenes).await?;

        let moved = self.resubmit_confirmed(None).await?;
        info!(
            target: "reconcile::orphan",
            resubmitted = moved.resubmitted,
            cancelled = moved.cancelled,
            "orphan resubmission finished"
        );
        Ok(moved)
    }

    /// Move confirmed orphans (optionally restricted to `within`) off the
    /// cluster. Scenes of cancelled orders are cancelled, never resubmitted.
    async fn resubmit_confirmed(
        &self,
        within: Option<Vec<SceneId>>,
    ) -> Result<OrphanResubmission> {
        let mut filter = SceneFilter::new()
            .statuses(SceneStatus::ON_CLUSTER)
            .orphaned(true);
        if let Some(ids) = within {
            filter = filter.ids(ids);
        }
        let orphans = self.store.find_scenes(&filter).await?;
        if orphans.is_empty() {
            return Ok(OrphanResubmission::default());
        }

        let orders = self.orders_for(orphans.iter().map(|s| s.order_id)).await?;
        let (cancel, resubmit): (Vec<&Scene>, Vec<&Scene>) =
            orphans.iter().partition(|scene| {
                orders
                    .get(&scene.order_id)
                    .is_some_and(|order| order.status == OrderStatus::Cancelled)
            });

        let now = self.now();
        let on_cluster = SceneStatus::ON_CLUSTER;
        let mut moved = OrphanResubmission::default();

        if !resubmit.is_empty() {
            let ids: Vec<SceneId> = resubmit.iter().map(|scene| scene.id).collect();
            let update = resubmit_update(now).reset_retries();
            moved.resubmitted = self
                .store
                .bulk_update_scenes(&ids, Some(&on_cluster), &update)
                .await?;
            warn!(target: "reconcile::orphan", count = moved.resubmitted, "resubmitted orphaned scenes");
        }

        if !cancel.is_empty() {
            let ids: Vec<SceneId> = cancel.iter().map(|scene| scene.id).collect();
            let update = SceneUpdate::new()
                .status(SceneStatus::Cancelled, now)
                .job(None, None)
                .reported_orphan(None)
                .orphaned(false);
            moved.cancelled = self
                .store
                .bulk_update_scenes(&ids, Some(&on_cluster), &update)
                .await?;
        }

        Ok(moved)
    }
}
