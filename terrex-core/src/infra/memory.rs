//! In-process adapters for the store and lease ports. Used by tests and by
//! single-instance deployments without Postgres or Redis.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use terrex_model::{
    NewOrder, NewScene, Order, OrderId, OrderStatus, Scene, SceneId, SceneStatus,
};
use tokio::sync::RwLock;

use crate::{
    clock::Clock,
    error::{OrchestratorError, Result},
    ports::{
        OrderFilter, OrderUpdate, SceneFilter, SceneUpdate, SharedLeaseStore,
        WorkItemStore,
    },
};

#[derive(Debug, Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    scenes: BTreeMap<SceneId, Scene>,
}

impl Tables {
    fn insert_scenes(
        &mut self,
        order_id: OrderId,
        scenes: Vec<NewScene>,
        at: DateTime<Utc>,
    ) -> Vec<Scene> {
        scenes
            .into_iter()
            .map(|scene| {
                let scene = scene.into_scene(order_id, at);
                self.scenes.insert(scene.id, scene.clone());
                scene
            })
            .collect()
    }
}

/// Work-item store held in memory behind a tokio `RwLock`.
///
/// Each call takes the lock once, so conditional updates are atomic with
/// respect to each other just like row updates in a database.
#[derive(Clone, Debug, Default)]
pub struct InMemoryWorkItemStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryWorkItemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkItemStore for InMemoryWorkItemStore {
    async fn find_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|order| filter.matches(order))
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.order_date.cmp(&b.order_date).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            orders.truncate(limit);
        }
        Ok(orders)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn find_order_by_key(&self, orderid: &str) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .find(|order| order.orderid == orderid)
            .cloned())
    }

    async fn find_order_by_upstream_id(
        &self,
        ee_order_id: &str,
    ) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .find(|order| order.ee_order_id.as_deref() == Some(ee_order_id))
            .cloned())
    }

    async fn find_scenes(&self, filter: &SceneFilter) -> Result<Vec<Scene>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<(&Order, &Scene)> = tables
            .scenes
            .values()
            .filter_map(|scene| {
                let order = tables.orders.get(&scene.order_id)?;
                filter.matches(scene, order).then_some((order, scene))
            })
            .collect();
        rows.sort_by(|(oa, sa), (ob, sb)| {
            oa.order_date
                .cmp(&ob.order_date)
                .then(oa.id.cmp(&ob.id))
                .then(sa.name.cmp(&sb.name))
        });

        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|(_, scene)| scene.clone())
            .collect())
    }

    async fn get_scene(&self, id: SceneId) -> Result<Option<Scene>> {
        Ok(self.tables.read().await.scenes.get(&id).cloned())
    }

    async fn create_order(
        &self,
        order: NewOrder,
        scenes: Vec<NewScene>,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        let mut tables = self.tables.write().await;
        if tables
            .orders
            .values()
            .any(|existing| existing.orderid == order.orderid)
        {
            return Err(OrchestratorError::Conflict(format!(
                "order {} already exists",
                order.orderid
            )));
        }

        let row = Order {
            id: OrderId::new(),
            orderid: order.orderid,
            requester: order.requester,
            email: order.email,
            status: OrderStatus::Ordered,
            order_source: order.order_source,
            order_date: order.order_date,
            completion_date: None,
            initial_email_sent: None,
            completion_email_sent: None,
            ee_order_id: order.ee_order_id,
            product_opts: order.product_opts,
            note: order.note,
        };
        tables.orders.insert(row.id, row.clone());
        tables.insert_scenes(row.id, scenes, at);
        Ok(row)
    }

    async fn insert_scenes(
        &self,
        order_id: OrderId,
        scenes: Vec<NewScene>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Scene>> {
        let mut tables = self.tables.write().await;
        if !tables.orders.contains_key(&order_id) {
            return Err(OrchestratorError::NotFound(format!("order {order_id}")));
        }
        Ok(tables.insert_scenes(order_id, scenes, at))
    }

    async fn update_scene(
        &self,
        id: SceneId,
        expected: Option<SceneStatus>,
        update: &SceneUpdate,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(scene) = tables.scenes.get_mut(&id) else {
            return Ok(false);
        };
        if expected.is_some_and(|status| scene.status != status) {
            return Ok(false);
        }
        update.apply(scene);
        Ok(true)
    }

    async fn bulk_update_scenes(
        &self,
        ids: &[SceneId],
        expected: Option<&[SceneStatus]>,
        update: &SceneUpdate,
    ) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut written = 0;
        for id in ids {
            let Some(scene) = tables.scenes.get_mut(id) else {
                continue;
            };
            if expected.is_some_and(|statuses| !statuses.contains(&scene.status)) {
                continue;
            }
            update.apply(scene);
            written += 1;
        }
        Ok(written)
    }

    async fn update_order(
        &self,
        id: OrderId,
        expected: Option<OrderStatus>,
        update: &OrderUpdate,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(order) = tables.orders.get_mut(&id) else {
            return Ok(false);
        };
        if expected.is_some_and(|status| order.status != status) {
            return Ok(false);
        }
        update.apply(order);
        Ok(true)
    }
}

/// Lease store whose expiry follows the injected clock.
#[derive(Debug)]
pub struct InMemoryLeaseStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl InMemoryLeaseStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        self.clock.now() + ttl
    }
}

#[async_trait]
impl SharedLeaseStore for InMemoryLeaseStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let expires = self.expiry(ttl);
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, until)) if *until > now => Ok(false),
            _ => {
                entries.insert(key.to_string(), (now.to_rfc3339(), expires));
                Ok(true)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires = self.expiry(ttl);
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .filter(|(_, until)| *until > now)
            .map(|(value, _)| value.clone()))
    }
}
