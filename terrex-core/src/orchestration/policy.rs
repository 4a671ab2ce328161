//! Pure retry and orphan decisions. Nothing here touches a collaborator.

use std::time::Duration;

use chrono::{DateTime, Utc};
use terrex_model::Scene;

use crate::error::{OrchestratorError, Result};

/// Outcome of comparing one queued/processing scene against a job listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrphanDecision {
    /// Job is live and nothing was suspected.
    Healthy,
    /// Job is live again after an earlier absence; drop the suspicion.
    ClearSuspicion,
    /// First absence; stamp `reported_orphan`.
    FirstAbsence,
    /// Absent again but inside the hysteresis window.
    Pending,
    /// Absent again, at least `hysteresis` after the first sighting.
    Confirm,
    AlreadyOrphaned,
}

impl OrphanDecision {
    pub fn decide(
        scene: &Scene,
        job_live: bool,
        now: DateTime<Utc>,
        hysteresis: chrono::Duration,
    ) -> Self {
        if job_live {
            return if scene.reported_orphan.is_some() && !scene.orphaned {
                OrphanDecision::ClearSuspicion
            } else {
                OrphanDecision::Healthy
            };
        }

        if scene.orphaned {
            return OrphanDecision::AlreadyOrphaned;
        }

        match scene.reported_orphan {
            None => OrphanDecision::FirstAbsence,
            Some(first) if now - first >= hysteresis => OrphanDecision::Confirm,
            Some(_) => OrphanDecision::Pending,
        }
    }
}

/// Retry bookkeeping to persist when a scene moves to `retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    pub retry_count: u32,
    pub retry_limit: u32,
    pub retry_after: DateTime<Utc>,
}

impl RetryPlan {
    /// Fails closed when the incremented count would exceed the limit.
    ///
    /// `limit` overrides the scene's stored limit when given.
    pub fn next(
        scene: &Scene,
        after: Duration,
        limit: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let retry_limit = limit.unwrap_or(scene.retry_limit);
        let retry_count = scene.retry_count.saturating_add(1);
        if retry_count > retry_limit {
            return Err(OrchestratorError::RetryLimitExceeded {
                scene: scene.name.clone(),
                limit: retry_limit,
            });
        }

        let delay = chrono::Duration::from_std(after)
            .unwrap_or_else(|_| chrono::Duration::zero());
        Ok(Self {
            retry_count,
            retry_limit,
            retry_after: now + delay,
        })
    }
}
