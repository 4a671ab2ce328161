//! # Terrex Core
//!
//! Production orchestration engine for satellite scene orders.
//!
//! A customer orders derived products for named scenes; the engine moves
//! each scene through catalog verification, archive ordering, cluster
//! processing and delivery, while reconciling its bookkeeping against the
//! external systems that hold the ground truth.
//!
//! ## Feature Flags
//!
//! - `database`: PostgreSQL work-item store (SQLx) and Redis lease store
//!
//! ## Architecture
//!
//! - [`ports`]: narrow traits for every external collaborator
//! - [`orchestration`]: transition primitives, retry/orphan policy and the
//!   reconciliation pass
//! - [`infra`]: in-memory, Postgres, Redis, filesystem, process and HTTP
//!   adapters for the ports
//! - [`clock`]: injected time source
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use terrex_core::{
//!     clock::SystemClock,
//!     infra::{
//!         CommandJobIndex, FsDistributionCache, HttpInventoryOracle,
//!         HttpOrderingService, InMemoryLeaseStore, InMemoryWorkItemStore,
//!         LogNotifier, PatternClassifier,
//!     },
//!     orchestration::{Collaborators, OrchestratorConfig, ProductionOrchestrator, Scope},
//! };
//!
//! async fn one_pass() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OrchestratorConfig::default();
//!     let clock = Arc::new(SystemClock);
//!     let orchestrator = ProductionOrchestrator::new(
//!         Collaborators {
//!             store: Arc::new(InMemoryWorkItemStore::new()),
//!             inventory: Arc::new(HttpInventoryOracle::new("http://inventory.local")?),
//!             ordering: Arc::new(HttpOrderingService::new("http://ordering.local")?),
//!             cluster: Arc::new(CommandJobIndex::new("squeue --noheader -o '%i %j'", "scancel")),
//!             cache: Arc::new(FsDistributionCache::new("/data/cache", 0)),
//!             classifier: Arc::new(PatternClassifier::from_config(&config.classifier)?),
//!             notifier: Arc::new(LogNotifier),
//!             lease: Arc::new(InMemoryLeaseStore::new(clock.clone())),
//!             clock,
//!         },
//!         config,
//!     );
//!
//!     let report = orchestrator.reconcile_pass(&Scope::all()).await;
//!     println!("success: {}", report.is_success());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Injected time source
pub mod clock;

/// Error types shared by every port and pass
pub mod error;

/// Adapters implementing the ports
pub mod infra;

/// Control loop, transition primitives and policy
pub mod orchestration;

/// Contracts for external collaborators
pub mod ports;

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use error::{OrchestratorError, Result};
pub use orchestration::{PassReport, ProductionOrchestrator, Scope};
