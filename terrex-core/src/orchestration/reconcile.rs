//! The reconciliation pass: twelve independently guarded sub-passes run in a
//! fixed order over the current store snapshot.

use std::{fmt, panic::AssertUnwindSafe, time::Instant};

use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    error::{OrchestratorError, Result},
    orchestration::orchestrator::ProductionOrchestrator,
};

/// Optional restriction of a pass to one requester's orders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    requester: Option<String>,
}

impl Scope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn requester_only(requester: impl Into<String>) -> Self {
        Self {
            requester: Some(requester.into()),
        }
    }

    pub fn requester(&self) -> Option<&str> {
        self.requester.as_deref()
    }
}

impl From<Option<String>> for Scope {
    fn from(requester: Option<String>) -> Self {
        Self { requester }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subpass {
    Import,
    NotifyNew,
    OnorderSync,
    StuckJobs,
    RetryMaturation,
    UpstreamRepair,
    CancellationFinalization,
    AvailabilityVerification,
    PlotPromotion,
    DownloadSizeBackfill,
    OrderFinalization,
    CachePurge,
}

impl Subpass {
    /// Execution order.
    pub const ALL: [Subpass; 12] = [
        Subpass::Import,
        Subpass::NotifyNew,
        Subpass::OnorderSync,
        Subpass::StuckJobs,
        Subpass::RetryMaturation,
        Subpass::UpstreamRepair,
        Subpass::CancellationFinalization,
        Subpass::AvailabilityVerification,
        Subpass::PlotPromotion,
        Subpass::DownloadSizeBackfill,
        Subpass::OrderFinalization,
        Subpass::CachePurge,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Subpass::Import => "import",
            Subpass::NotifyNew => "notify_new",
            Subpass::OnorderSync => "onorder_sync",
            Subpass::StuckJobs => "stuck_jobs",
            Subpass::RetryMaturation => "retry_maturation",
            Subpass::UpstreamRepair => "upstream_repair",
            Subpass::CancellationFinalization => "cancellation_finalization",
            Subpass::AvailabilityVerification => "availability_verification",
            Subpass::PlotPromotion => "plot_promotion",
            Subpass::DownloadSizeBackfill => "download_size_backfill",
            Subpass::OrderFinalization => "order_finalization",
            Subpass::CachePurge => "cache_purge",
        }
    }
}

impl fmt::Display for Subpass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubpassStatus {
    Completed { affected: u64 },
    /// A collaborator was unreachable or the step is disabled; nothing was
    /// attempted beyond the failing call.
    Skipped { reason: String },
    Failed { error: String },
}

impl SubpassStatus {
    fn from_error(err: &OrchestratorError) -> Self {
        if err.is_transient() || matches!(err, OrchestratorError::Configuration(_)) {
            SubpassStatus::Skipped {
                reason: err.to_string(),
            }
        } else {
            SubpassStatus::Failed {
                error: err.to_string(),
            }
        }
    }
}

/// Outcome of one reconciliation pass, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub subpasses: Vec<(Subpass, SubpassStatus)>,
}

impl PassReport {
    pub fn is_success(&self) -> bool {
        !self
            .subpasses
            .iter()
            .any(|(_, status)| matches!(status, SubpassStatus::Failed { .. }))
    }

    pub fn status(&self, subpass: Subpass) -> Option<&SubpassStatus> {
        self.subpasses
            .iter()
            .find(|(candidate, _)| *candidate == subpass)
            .map(|(_, status)| status)
    }

    pub fn affected(&self) -> u64 {
        self.subpasses
            .iter()
            .map(|(_, status)| match status {
                SubpassStatus::Completed { affected } => *affected,
                _ => 0,
            })
            .sum()
    }
}

impl ProductionOrchestrator {
    /// Run every sub-pass once. A failing sub-pass is recorded and the rest
    /// still run.
    ///
    /// Panics are caught the same way only when unwinding is enabled. The
    /// release profile aborts on panic, so there a panicking sub-pass ends
    /// the process.
    pub async fn reconcile_pass(&self, scope: &Scope) -> PassReport {
        let started = Instant::now();
        let mut report = PassReport::default();

        for subpass in Subpass::ALL {
            let outcome = AssertUnwindSafe(self.run_subpass(subpass, scope))
                .catch_unwind()
                .await;
            let status = match outcome {
                Ok(Ok(status)) => status,
                Ok(Err(err)) => SubpassStatus::from_error(&err),
                Err(panic) => {
                    let message = if let Some(s) = panic.downcast_ref::<String>() {
                        s.clone()
                    } else if let Some(s) = panic.downcast_ref::<&str>() {
                        s.to_string()
                    } else {
                        "unknown panic".to_string()
                    };
                    SubpassStatus::Failed {
                        error: format!("panicked: {message}"),
                    }
                }
            };

            match &status {
                SubpassStatus::Completed { affected } => {
                    debug!(target: "reconcile::pass", %subpass, affected, "sub-pass completed");
                }
                SubpassStatus::Skipped { reason } => {
                    warn!(target: "reconcile::pass", %subpass, %reason, "sub-pass skipped");
                }
                SubpassStatus::Failed { error } => {
                    error!(target: "reconcile::pass", %subpass, %error, "sub-pass failed");
                }
            }
            report.subpasses.push((subpass, status));
        }

        info!(
            target: "reconcile::pass",
            requester = scope.requester().unwrap_or("*"),
            affected = report.affected(),
            success = report.is_success(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "reconcile pass finished"
        );
        report
    }

    async fn run_subpass(&self, subpass: Subpass, scope: &Scope) -> Result<SubpassStatus> {
        let affected = match subpass {
            Subpass::Import => self.import_orders(scope).await?.affected(),
            Subpass::NotifyNew => self.send_initial_emails(scope).await?,
            Subpass::OnorderSync => self.sync_onorder(scope).await?,
            // Cluster liveness is global; a requester scope does not narrow it.
            Subpass::StuckJobs => self.handle_stuck_jobs().await?,
            Subpass::RetryMaturation => self.mature_retries(scope).await?,
            Subpass::UpstreamRepair => self.repair_upstream_statuses(scope).await?,
            Subpass::CancellationFinalization => {
                self.finalize_cancellations(scope).await?
            }
            Subpass::AvailabilityVerification => self.verify_availability(scope).await?,
            Subpass::PlotPromotion => self.promote_plots(scope).await?,
            Subpass::DownloadSizeBackfill => self.backfill_download_sizes(scope).await?,
            Subpass::OrderFinalization => self.finalize_orders(scope).await?,
            Subpass::CachePurge => match self.purge_if_due().await? {
                Some(summary) => summary.orders.len() as u64,
                None => {
                    return Ok(SubpassStatus::Skipped {
                        reason: "purge lease held".into(),
                    });
                }
            },
        };
        Ok(SubpassStatus::Completed { affected })
    }
}
