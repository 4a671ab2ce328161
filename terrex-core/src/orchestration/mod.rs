//! Production orchestration: transition primitives, retry and orphan policy,
//! and the reconciliation pass that drives every scene to a terminal state.

pub mod availability;
pub mod cancel;
pub mod config;
pub mod finalize;
pub mod import;
pub mod intake;
pub mod orchestrator;
pub mod orphan;
pub mod policy;
pub mod processing;
pub mod purge;
pub mod reconcile;
pub mod transitions;
pub mod upstream;

pub use availability::NO_PLOT_INPUTS_NOTE;
pub use cancel::Cancellation;
pub use config::*;
pub use finalize::DOWNLOAD_MISSING_NOTE;
pub use import::ImportSummary;
pub use intake::{NewOrderRequest, RequestedScene};
pub use orchestrator::{
    Collaborators, PURGE_LEASE_KEY, ProductionOrchestrator,
    UPSTREAM_FAILURE_LOG_KEY,
};
pub use orphan::{OrphanResubmission, OrphanSweep};
pub use policy::{OrphanDecision, RetryPlan};
pub use processing::{ProcessingItem, ProductAction};
pub use purge::PurgeSummary;
pub use reconcile::{PassReport, Scope, Subpass, SubpassStatus};
pub use transitions::{CompletedProduct, RETRY_LIMIT_NOTE, TransitionOutcome};
pub use upstream::UPSTREAM_REJECTED_NOTE;
