//! Fakes and a harness shared by the orchestration integration tests.
#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use terrex_core::{
    clock::ManualClock,
    error::{ExternalService, OrchestratorError, Result},
    infra::{InMemoryLeaseStore, InMemoryWorkItemStore, PatternClassifier},
    orchestration::{
        ClassifierRule, Collaborators, OrchestratorConfig, ProductionOrchestrator,
    },
    ports::{
        ClusterJobIndex, DistributionCache, ImportedOrder, InventoryOracle, LiveJob,
        Notification, NotificationSink, OrderingService, ResolutionStatus, SceneFilter,
        SceneUpdate, UnitStatus, WorkItemStore,
    },
};
use terrex_model::{
    CacheCapacity, NewOrder, NewScene, Order, OrderSource, ProductOptions, Scene,
    SceneStatus, SensorFamily, UpstreamUnitStatus,
};

pub const RETRY_LOG: &str = "ERROR: connection refused by archive mirror";
pub const GONE_LOG: &str = "input granule not found in archive";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 9, 14, 0, 0)
        .single()
        .expect("valid timestamp")
}

#[derive(Debug, Default)]
pub struct FakeInventory {
    pub answers: Mutex<HashMap<String, bool>>,
    pub down: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeInventory {
    pub fn knows(&self, names: &[&str]) {
        let mut answers = self.answers.lock();
        for name in names {
            answers.insert(name.to_string(), true);
        }
    }
}

#[async_trait]
impl InventoryOracle for FakeInventory {
    async fn check_availability(
        &self,
        _sensor: SensorFamily,
        ids: &[String],
    ) -> Result<HashMap<String, bool>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(OrchestratorError::unreachable(
                ExternalService::Inventory,
                "connection refused",
            ));
        }
        let answers = self.answers.lock();
        Ok(ids
            .iter()
            .map(|id| (id.clone(), answers.get(id).copied().unwrap_or(false)))
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct FakeOrdering {
    pub batches: Mutex<HashMap<String, Vec<UnitStatus>>>,
    pub placed: Mutex<Vec<Vec<String>>>,
    pub pushes: Mutex<Vec<(String, String, UpstreamUnitStatus)>>,
    pub push_down: AtomicBool,
    pub poll_down: AtomicBool,
    pub imports: Mutex<Vec<ImportedOrder>>,
}

impl FakeOrdering {
    pub fn report(&self, batch: &str, units: Vec<UnitStatus>) {
        self.batches.lock().insert(batch.to_string(), units);
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }
}

#[async_trait]
impl OrderingService for FakeOrdering {
    async fn place_order(&self, scene_names: &[String]) -> Result<String> {
        let mut placed = self.placed.lock();
        placed.push(scene_names.to_vec());
        Ok(format!("batch-{:04}", placed.len()))
    }

    async fn poll_status(&self, batch_id: &str) -> Result<Vec<UnitStatus>> {
        if self.poll_down.load(Ordering::SeqCst) {
            return Err(OrchestratorError::unreachable(
                ExternalService::Ordering,
                "503 Service Unavailable",
            ));
        }
        Ok(self
            .batches
            .lock()
            .get(batch_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn push_unit_status(
        &self,
        ee_order_id: &str,
        unit_id: &str,
        status: UpstreamUnitStatus,
    ) -> Result<()> {
        if self.push_down.load(Ordering::SeqCst) {
            return Err(OrchestratorError::unreachable(
                ExternalService::Ordering,
                "connect timeout",
            ));
        }
        self.pushes
            .lock()
            .push((ee_order_id.to_string(), unit_id.to_string(), status));
        Ok(())
    }

    async fn fetch_imported_orders(&self) -> Result<Vec<ImportedOrder>> {
        Ok(self.imports.lock().clone())
    }
}

#[derive(Debug, Default)]
pub struct FakeCluster {
    pub live: Mutex<Vec<LiveJob>>,
    pub killed: Mutex<Vec<String>>,
    pub listings: AtomicUsize,
}

impl FakeCluster {
    pub fn run(&self, id: &str, name: &str) {
        self.live.lock().push(LiveJob {
            id: id.to_string(),
            name: name.to_string(),
        });
    }

    pub fn clear(&self) {
        self.live.lock().clear();
    }
}

#[async_trait]
impl ClusterJobIndex for FakeCluster {
    async fn list_live_jobs(&self) -> Result<Vec<LiveJob>> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        Ok(self.live.lock().clone())
    }

    async fn kill_job(&self, id: &str) -> Result<()> {
        self.killed.lock().push(id.to_string());
        self.live.lock().retain(|job| job.id != id);
        Ok(())
    }
}

/// Cache where each order tree weighs 100 bytes out of 10 000.
#[derive(Debug, Default)]
pub struct FakeCache {
    pub orders: Mutex<HashSet<String>>,
    pub artifacts: Mutex<HashMap<String, u64>>,
    /// Locations whose lookup fails with an I/O error.
    pub unreadable: Mutex<HashSet<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeCache {
    pub fn store_artifact(&self, orderid: &str, location: &str, size: u64) {
        self.orders.lock().insert(orderid.to_string());
        self.artifacts.lock().insert(location.to_string(), size);
    }

    pub fn break_artifact(&self, location: &str) {
        self.unreadable.lock().insert(location.to_string());
    }
}

#[async_trait]
impl DistributionCache for FakeCache {
    async fn exists(&self, orderid: &str) -> Result<bool> {
        Ok(self.orders.lock().contains(orderid))
    }

    async fn delete(&self, orderid: &str) -> Result<()> {
        self.orders.lock().remove(orderid);
        self.deleted.lock().push(orderid.to_string());
        Ok(())
    }

    async fn capacity(&self) -> Result<CacheCapacity> {
        let used = self.orders.lock().len() as u64 * 100;
        Ok(CacheCapacity::new(10_000, used))
    }

    async fn artifact_size(&self, location: &str) -> Result<Option<u64>> {
        if self.unreadable.lock().contains(location) {
            return Err(OrchestratorError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                "Not a directory",
            )));
        }
        Ok(self.artifacts.lock().get(location).copied())
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
    pub down: AtomicBool,
}

impl RecordingNotifier {
    pub fn count(&self, kind: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|notification| notification.kind() == kind)
            .count()
    }

    pub fn total(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(OrchestratorError::unreachable(
                ExternalService::Notification,
                "relay down",
            ));
        }
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

pub fn classifier_rules() -> Vec<ClassifierRule> {
    vec![
        ClassifierRule {
            patterns: vec!["connection refused".into()],
            status: ResolutionStatus::Retry,
            reason: "Retrying, the archive mirror was unreachable".into(),
            retry_after_secs: Some(3600),
            retry_limit: None,
        },
        ClassifierRule {
            patterns: vec!["not found in archive".into()],
            status: ResolutionStatus::Unavailable,
            reason: "Input is no longer in the archive".into(),
            retry_after_secs: None,
            retry_limit: None,
        },
    ]
}

#[derive(Debug)]
pub struct Harness {
    pub orchestrator: ProductionOrchestrator,
    pub store: InMemoryWorkItemStore,
    pub clock: ManualClock,
    pub inventory: Arc<FakeInventory>,
    pub ordering: Arc<FakeOrdering>,
    pub cluster: Arc<FakeCluster>,
    pub cache: Arc<FakeCache>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    pub fn with_config(mut config: OrchestratorConfig) -> Self {
        if config.classifier.rules.is_empty() {
            config.classifier.rules = classifier_rules();
        }
        let store = InMemoryWorkItemStore::new();
        let clock = ManualClock::new(start_time());
        let inventory = Arc::new(FakeInventory::default());
        let ordering = Arc::new(FakeOrdering::default());
        let cluster = Arc::new(FakeCluster::default());
        let cache = Arc::new(FakeCache::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let classifier =
            PatternClassifier::from_config(&config.classifier).expect("classifier rules");

        let orchestrator = ProductionOrchestrator::new(
            Collaborators {
                store: Arc::new(store.clone()),
                inventory: inventory.clone(),
                ordering: ordering.clone(),
                cluster: cluster.clone(),
                cache: cache.clone(),
                classifier: Arc::new(classifier),
                notifier: notifier.clone(),
                lease: Arc::new(InMemoryLeaseStore::new(Arc::new(clock.clone()))),
                clock: Arc::new(clock.clone()),
            },
            config,
        );

        Self {
            orchestrator,
            store,
            clock,
            inventory,
            ordering,
            cluster,
            cache,
            notifier,
        }
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(chrono::Duration::minutes(minutes));
    }

    /// Self-service order with Landsat scenes, all `submitted`.
    pub async fn order(&self, orderid: &str, names: &[&str]) -> Order {
        self.create(orderid, "alice", OrderSource::SelfService, None, names)
            .await
    }

    /// Imported order whose scene names double as upstream unit ids.
    pub async fn imported_order(&self, orderid: &str, names: &[&str]) -> Order {
        self.create(
            orderid,
            "bob",
            OrderSource::Imported,
            Some(format!("ee-{orderid}")),
            names,
        )
        .await
    }

    async fn create(
        &self,
        orderid: &str,
        requester: &str,
        source: OrderSource,
        ee_order_id: Option<String>,
        names: &[&str],
    ) -> Order {
        let imported = ee_order_id.is_some();
        let scenes = names
            .iter()
            .map(|name| {
                let scene = NewScene::submitted(*name, SensorFamily::Landsat, 5);
                if imported { scene.with_unit(*name) } else { scene }
            })
            .collect();
        self.store
            .create_order(
                NewOrder {
                    orderid: orderid.to_string(),
                    requester: requester.to_string(),
                    email: format!("{requester}@example.org"),
                    order_source: source,
                    order_date: self.clock_now(),
                    ee_order_id,
                    product_opts: ProductOptions::with_outputs("tm5", ["sr"]),
                    note: None,
                },
                scenes,
                self.clock_now(),
            )
            .await
            .expect("create order")
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        terrex_core::clock::Clock::now(&self.clock)
    }

    pub async fn scene(&self, orderid: &str, name: &str) -> Scene {
        self.orchestrator
            .find_scene(orderid, name)
            .await
            .expect("scene exists")
            .1
    }

    pub async fn order_status(&self, orderid: &str) -> Order {
        self.store
            .find_order_by_key(orderid)
            .await
            .expect("store")
            .expect("order exists")
    }

    pub async fn scenes(&self, orderid: &str) -> Vec<Scene> {
        let order = self.order_status(orderid).await;
        self.store
            .find_scenes(&SceneFilter::for_order(order.id))
            .await
            .expect("store")
    }

    /// Force a scene into a state, bypassing the transition rules.
    pub async fn set(&self, orderid: &str, name: &str, update: SceneUpdate) {
        let scene = self.scene(orderid, name).await;
        assert!(
            self.store
                .update_scene(scene.id, None, &update)
                .await
                .expect("store"),
            "scene {name} not updated"
        );
    }

    pub async fn set_status(&self, orderid: &str, name: &str, status: SceneStatus) {
        self.set(orderid, name, SceneUpdate::new().status(status, self.clock_now()))
            .await;
    }

    /// Put a scene on the cluster under `job` and register the job as live.
    pub async fn run_on_cluster(&self, orderid: &str, name: &str, job: &str) {
        self.set(
            orderid,
            name,
            SceneUpdate::new()
                .status(SceneStatus::Processing, self.clock_now())
                .job(Some(job.to_string()), Some("node-1".to_string())),
        )
        .await;
        self.cluster.run(&format!("id-{job}"), job);
    }

    /// Mark a scene complete with a delivered artifact.
    pub async fn deliver(&self, orderid: &str, name: &str) {
        let location = format!("/cache/orders/{orderid}/{name}.tar.gz");
        self.cache.store_artifact(orderid, &location, 4096);
        let mut update = SceneUpdate::new()
            .status(SceneStatus::Complete, self.clock_now())
            .download_size(4096)
            .completion_date(Some(self.clock_now()));
        update.product_distro_location = Some(location);
        self.set(orderid, name, update).await;
    }
}
