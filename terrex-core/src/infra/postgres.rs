//! PostgreSQL-backed work-item store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, postgres::PgPoolOptions, types::Json};
use terrex_model::{
    NewOrder, NewScene, Order, OrderId, OrderStatus, ProductOptions, Scene, SceneId,
    SceneStatus, UpstreamUnitStatus,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{OrchestratorError, Result},
    ports::{OrderFilter, OrderUpdate, SceneFilter, SceneUpdate, WorkItemStore},
};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

const ORDER_COLUMNS: &str = "o.id, o.orderid, o.requester, o.email, o.status, o.order_source, \
     o.order_date, o.completion_date, o.initial_email_sent, o.completion_email_sent, \
     o.ee_order_id, o.product_opts, o.note";

const SCENE_COLUMNS: &str = "s.id, s.order_id, s.name, s.sensor_type, s.status, \
     s.status_modified, s.note, s.tram_order_id, s.ee_unit_id, s.job_name, \
     s.processing_location, s.retry_count, s.retry_limit, s.retry_after, \
     s.reported_orphan, s.orphaned, s.failed_lta_status_update, \
     s.product_distro_location, s.product_dload_url, s.cksum_distro_location, \
     s.cksum_download_url, s.download_size, s.log_file_contents, s.completion_date";

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    orderid: String,
    requester: String,
    email: String,
    status: String,
    order_source: String,
    order_date: DateTime<Utc>,
    completion_date: Option<DateTime<Utc>>,
    initial_email_sent: Option<DateTime<Utc>>,
    completion_email_sent: Option<DateTime<Utc>>,
    ee_order_id: Option<String>,
    product_opts: Json<ProductOptions>,
    note: Option<String>,
}

impl TryFrom<OrderRow> for Order {
    type Error = OrchestratorError;

    fn try_from(row: OrderRow) -> Result<Self> {
        Ok(Order {
            id: OrderId(row.id),
            status: row.status.parse().map_err(corrupt)?,
            order_source: row.order_source.parse().map_err(corrupt)?,
            orderid: row.orderid,
            requester: row.requester,
            email: row.email,
            order_date: row.order_date,
            completion_date: row.completion_date,
            initial_email_sent: row.initial_email_sent,
            completion_email_sent: row.completion_email_sent,
            ee_order_id: row.ee_order_id,
            product_opts: row.product_opts.0,
            note: row.note,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SceneRow {
    id: Uuid,
    order_id: Uuid,
    name: String,
    sensor_type: String,
    status: String,
    status_modified: DateTime<Utc>,
    note: String,
    tram_order_id: Option<String>,
    ee_unit_id: Option<String>,
    job_name: Option<String>,
    processing_location: Option<String>,
    retry_count: i32,
    retry_limit: i32,
    retry_after: Option<DateTime<Utc>>,
    reported_orphan: Option<DateTime<Utc>>,
    orphaned: bool,
    failed_lta_status_update: Option<String>,
    product_distro_location: String,
    product_dload_url: String,
    cksum_distro_location: String,
    cksum_download_url: String,
    download_size: i64,
    log_file_contents: String,
    completion_date: Option<DateTime<Utc>>,
}

impl TryFrom<SceneRow> for Scene {
    type Error = OrchestratorError;

    fn try_from(row: SceneRow) -> Result<Self> {
        let failed_lta_status_update = match row.failed_lta_status_update.as_deref() {
            None => None,
            Some(raw) => Some(
                raw.chars()
                    .next()
                    .and_then(UpstreamUnitStatus::from_char)
                    .ok_or_else(|| {
                        OrchestratorError::IntegrityViolation(format!(
                            "unknown upstream status {raw:?} on scene {}",
                            row.id
                        ))
                    })?,
            ),
        };

        Ok(Scene {
            id: SceneId(row.id),
            order_id: OrderId(row.order_id),
            sensor_type: row.sensor_type.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            name: row.name,
            status_modified: row.status_modified,
            note: row.note,
            tram_order_id: row.tram_order_id,
            ee_unit_id: row.ee_unit_id,
            job_name: row.job_name,
            processing_location: row.processing_location,
            retry_count: u32::try_from(row.retry_count).unwrap_or_default(),
            retry_limit: u32::try_from(row.retry_limit).unwrap_or_default(),
            retry_after: row.retry_after,
            reported_orphan: row.reported_orphan,
            orphaned: row.orphaned,
            failed_lta_status_update,
            product_distro_location: row.product_distro_location,
            product_dload_url: row.product_dload_url,
            cksum_distro_location: row.cksum_distro_location,
            cksum_download_url: row.cksum_download_url,
            download_size: u64::try_from(row.download_size).unwrap_or_default(),
            log_file_contents: row.log_file_contents,
            completion_date: row.completion_date,
        })
    }
}

fn corrupt(err: terrex_model::ModelError) -> OrchestratorError {
    OrchestratorError::IntegrityViolation(format!("stored row is invalid: {err}"))
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn uuids<T: AsRef<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| *id.as_ref()).collect()
}

fn status_strings(statuses: &[SceneStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

fn push_order_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &OrderFilter) {
    if let Some(ids) = &filter.ids {
        builder.push(" AND o.id = ANY(");
        builder.push_bind(uuids(ids));
        builder.push(")");
    }
    if let Some(statuses) = &filter.statuses {
        builder.push(" AND o.status = ANY(");
        builder.push_bind(
            statuses
                .iter()
                .map(|s| s.as_str().to_string())
                .collect::<Vec<_>>(),
        );
        builder.push(")");
    }
    if let Some(sources) = &filter.sources {
        builder.push(" AND o.order_source = ANY(");
        builder.push_bind(
            sources
                .iter()
                .map(|s| s.as_str().to_string())
                .collect::<Vec<_>>(),
        );
        builder.push(")");
    }
    if let Some(requester) = &filter.requester {
        builder.push(" AND o.requester = ");
        builder.push_bind(requester.clone());
    }
    if filter.initial_email_unsent {
        builder.push(" AND o.initial_email_sent IS NULL");
    }
    if filter.completion_email_unsent {
        builder.push(" AND o.completion_email_sent IS NULL");
    }
    if let Some(cutoff) = filter.completed_before {
        builder.push(" AND o.completion_date < ");
        builder.push_bind(cutoff);
    }
}

fn push_scene_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &SceneFilter) {
    fn any_text(builder: &mut QueryBuilder<'_, Postgres>, column: &str, values: Vec<String>) {
        builder.push(format!(" AND {column} = ANY("));
        builder.push_bind(values);
        builder.push(")");
    }

    if let Some(ids) = &filter.ids {
        builder.push(" AND s.id = ANY(");
        builder.push_bind(uuids(ids));
        builder.push(")");
    }
    if let Some(ids) = &filter.order_ids {
        builder.push(" AND s.order_id = ANY(");
        builder.push_bind(uuids(ids));
        builder.push(")");
    }
    if let Some(names) = &filter.names {
        any_text(builder, "s.name", names.clone());
    }
    if let Some(statuses) = &filter.statuses {
        any_text(builder, "s.status", status_strings(statuses));
    }
    if let Some(sensors) = &filter.sensors {
        any_text(
            builder,
            "s.sensor_type",
            sensors.iter().map(|s| s.as_str().to_string()).collect(),
        );
    }
    if let Some(ids) = &filter.tram_order_ids {
        any_text(builder, "s.tram_order_id", ids.clone());
    }
    if let Some(names) = &filter.job_names {
        any_text(builder, "s.job_name", names.clone());
    }
    if let Some(requester) = &filter.requester {
        builder.push(" AND o.requester = ");
        builder.push_bind(requester.clone());
    }
    if let Some(statuses) = &filter.order_statuses {
        any_text(
            builder,
            "o.status",
            statuses.iter().map(|s| s.as_str().to_string()).collect(),
        );
    }
    if let Some(cutoff) = filter.status_modified_before {
        builder.push(" AND s.status_modified < ");
        builder.push_bind(cutoff);
    }
    if let Some(cutoff) = filter.retry_after_before {
        builder.push(" AND s.retry_after < ");
        builder.push_bind(cutoff);
    }
    match filter.has_failed_upstream_update {
        Some(true) => {
            builder.push(" AND s.failed_lta_status_update IS NOT NULL");
        }
        Some(false) => {
            builder.push(" AND s.failed_lta_status_update IS NULL");
        }
        None => {}
    }
    match filter.has_reported_orphan {
        Some(true) => {
            builder.push(" AND s.reported_orphan IS NOT NULL");
        }
        Some(false) => {
            builder.push(" AND s.reported_orphan IS NULL");
        }
        None => {}
    }
    if let Some(orphaned) = filter.orphaned {
        builder.push(" AND s.orphaned = ");
        builder.push_bind(orphaned);
    }
    if filter.download_size_zero {
        builder.push(" AND s.download_size = 0");
    }
}

/// Appends `SET col = $n, ...`. Returns false when the update is empty.
fn push_scene_set(builder: &mut QueryBuilder<'_, Postgres>, update: &SceneUpdate) -> bool {
    let mut columns = 0usize;
    let mut set = builder.separated(", ");

    macro_rules! column {
        ($name:literal, $value:expr) => {{
            set.push(concat!($name, " = "));
            set.push_bind_unseparated($value);
            columns += 1;
        }};
    }

    if let Some(status) = update.status {
        column!("status", status.as_str().to_string());
    }
    if let Some(at) = update.status_modified {
        column!("status_modified", at);
    }
    if let Some(note) = &update.note {
        column!("note", note.clone());
    }
    if let Some(id) = &update.tram_order_id {
        column!("tram_order_id", id.clone());
    }
    if let Some(name) = &update.job_name {
        column!("job_name", name.clone());
    }
    if let Some(location) = &update.processing_location {
        column!("processing_location", location.clone());
    }
    if let Some(count) = update.retry_count {
        column!("retry_count", to_i32(count));
    }
    if let Some(limit) = update.retry_limit {
        column!("retry_limit", to_i32(limit));
    }
    if let Some(at) = update.retry_after {
        column!("retry_after", at);
    }
    if let Some(at) = update.reported_orphan {
        column!("reported_orphan", at);
    }
    if let Some(orphaned) = update.orphaned {
        column!("orphaned", orphaned);
    }
    if let Some(pending) = update.failed_lta_status_update {
        column!(
            "failed_lta_status_update",
            pending.map(|status| status.as_char().to_string())
        );
    }
    if let Some(location) = &update.product_distro_location {
        column!("product_distro_location", location.clone());
    }
    if let Some(url) = &update.product_dload_url {
        column!("product_dload_url", url.clone());
    }
    if let Some(location) = &update.cksum_distro_location {
        column!("cksum_distro_location", location.clone());
    }
    if let Some(url) = &update.cksum_download_url {
        column!("cksum_download_url", url.clone());
    }
    if let Some(size) = update.download_size {
        column!("download_size", to_i64(size));
    }
    if let Some(log) = &update.log_file_contents {
        column!("log_file_contents", log.clone());
    }
    if let Some(at) = update.completion_date {
        column!("completion_date", at);
    }

    columns > 0
}

#[derive(Clone, Debug)]
pub struct PostgresWorkItemStore {
    pool: PgPool,
}

impl PostgresWorkItemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn connect_with(database_url: &str, max_connections: u32) -> Result<Self> {
        info!(max_connections, "Connecting to work-item database");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        crate::MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| OrchestratorError::Configuration(format!("migrations failed: {e}")))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert_scene_rows(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        order_id: OrderId,
        scenes: Vec<NewScene>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Scene>> {
        if scenes.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<Scene> = scenes
            .into_iter()
            .map(|scene| scene.into_scene(order_id, at))
            .collect();

        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO scenes (id, order_id, name, sensor_type, status, status_modified, \
             note, ee_unit_id, retry_count, retry_limit) ",
        );
        builder.push_values(&rows, |mut b, scene| {
            b.push_bind(scene.id.to_uuid())
                .push_bind(scene.order_id.to_uuid())
                .push_bind(scene.name.clone())
                .push_bind(scene.sensor_type.as_str().to_string())
                .push_bind(scene.status.as_str().to_string())
                .push_bind(scene.status_modified)
                .push_bind(scene.note.clone())
                .push_bind(scene.ee_unit_id.clone())
                .push_bind(to_i32(scene.retry_count))
                .push_bind(to_i32(scene.retry_limit));
        });
        builder.build().execute(&mut **tx).await?;
        Ok(rows)
    }
}

fn conflict_on_unique(err: sqlx::Error, what: &str) -> OrchestratorError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            OrchestratorError::Conflict(format!("{what} already exists"))
        }
        _ => err.into(),
    }
}

#[async_trait]
impl WorkItemStore for PostgresWorkItemStore {
    async fn find_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ORDER_COLUMNS} FROM orders o WHERE 1=1"
        ));
        push_order_filter(&mut builder, filter);
        builder.push(" ORDER BY o.order_date, o.id");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder
            .build_query_as::<OrderRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        self.find_orders(&OrderFilter::new().ids([id]))
            .await
            .map(|orders| orders.into_iter().next())
    }

    async fn find_order_by_key(&self, orderid: &str) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders o WHERE o.orderid = $1"
        ))
        .bind(orderid)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn find_order_by_upstream_id(
        &self,
        ee_order_id: &str,
    ) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders o WHERE o.ee_order_id = $1"
        ))
        .bind(ee_order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Order::try_from).transpose()
    }

    async fn find_scenes(&self, filter: &SceneFilter) -> Result<Vec<Scene>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {SCENE_COLUMNS} FROM scenes s JOIN orders o ON o.id = s.order_id WHERE 1=1"
        ));
        push_scene_filter(&mut builder, filter);
        builder.push(" ORDER BY o.order_date, o.id, s.name");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = builder
            .build_query_as::<SceneRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Scene::try_from).collect()
    }

    async fn get_scene(&self, id: SceneId) -> Result<Option<Scene>> {
        let row = sqlx::query_as::<_, SceneRow>(&format!(
            "SELECT {SCENE_COLUMNS} FROM scenes s WHERE s.id = $1"
        ))
        .bind(id.to_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Scene::try_from).transpose()
    }

    async fn create_order(
        &self,
        order: NewOrder,
        scenes: Vec<NewScene>,
        at: DateTime<Utc>,
    ) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let id = OrderId::new();
        let orderid = order.orderid.clone();

        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders AS o (id, orderid, requester, email, status, order_source, \
             order_date, ee_order_id, product_opts, note) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(id.to_uuid())
        .bind(order.orderid)
        .bind(order.requester)
        .bind(order.email)
        .bind(OrderStatus::Ordered.as_str())
        .bind(order.order_source.as_str())
        .bind(order.order_date)
        .bind(order.ee_order_id)
        .bind(Json(order.product_opts))
        .bind(order.note)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, &format!("order {orderid}")))?;

        let count = scenes.len();
        Self::insert_scene_rows(&mut tx, id, scenes, at).await?;
        tx.commit().await?;

        debug!(order = %orderid, scenes = count, "order inserted");
        Order::try_from(row)
    }

    async fn insert_scenes(
        &self,
        order_id: OrderId,
        scenes: Vec<NewScene>,
        at: DateTime<Utc>,
    ) -> Result<Vec<Scene>> {
        let mut tx = self.pool.begin().await?;
        let exists: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id.to_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        if exists.is_none() {
            return Err(OrchestratorError::NotFound(format!("order {order_id}")));
        }
        let rows = Self::insert_scene_rows(&mut tx, order_id, scenes, at).await?;
        tx.commit().await?;
        Ok(rows)
    }

    async fn update_scene(
        &self,
        id: SceneId,
        expected: Option<SceneStatus>,
        update: &SceneUpdate,
    ) -> Result<bool> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE scenes SET ");
        if !push_scene_set(&mut builder, update) {
            return Ok(false);
        }
        builder.push(" WHERE id = ");
        builder.push_bind(id.to_uuid());
        if let Some(status) = expected {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str().to_string());
        }

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }

    async fn bulk_update_scenes(
        &self,
        ids: &[SceneId],
        expected: Option<&[SceneStatus]>,
        update: &SceneUpdate,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE scenes SET ");
        if !push_scene_set(&mut builder, update) {
            return Ok(0);
        }
        builder.push(" WHERE id = ANY(");
        builder.push_bind(uuids(ids));
        builder.push(")");
        if let Some(statuses) = expected {
            builder.push(" AND status = ANY(");
            builder.push_bind(status_strings(statuses));
            builder.push(")");
        }

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn update_order(
        &self,
        id: OrderId,
        expected: Option<OrderStatus>,
        update: &OrderUpdate,
    ) -> Result<bool> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE orders SET ");
        let mut columns = 0usize;
        {
            let mut set = builder.separated(", ");
            if let Some(status) = update.status {
                set.push("status = ");
                set.push_bind_unseparated(status.as_str().to_string());
                columns += 1;
            }
            if let Some(at) = update.completion_date {
                set.push("completion_date = ");
                set.push_bind_unseparated(at);
                columns += 1;
            }
            if let Some(at) = update.initial_email_sent {
                set.push("initial_email_sent = ");
                set.push_bind_unseparated(at);
                columns += 1;
            }
            if let Some(at) = update.completion_email_sent {
                set.push("completion_email_sent = ");
                set.push_bind_unseparated(at);
                columns += 1;
            }
            if let Some(opts) = &update.product_opts {
                set.push("product_opts = ");
                set.push_bind_unseparated(Json(opts.clone()));
                columns += 1;
            }
            if let Some(note) = &update.note {
                set.push("note = ");
                set.push_bind_unseparated(note.clone());
                columns += 1;
            }
        }
        if columns == 0 {
            return Ok(false);
        }

        builder.push(" WHERE id = ");
        builder.push_bind(id.to_uuid());
        if let Some(status) = expected {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str().to_string());
        }

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() == 1)
    }
}
