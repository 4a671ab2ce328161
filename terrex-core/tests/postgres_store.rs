#![cfg(feature = "database")]

use chrono::{Duration, TimeZone, Utc};
use sqlx::{PgPool, Row};
use terrex_core::{
    OrchestratorError,
    infra::PostgresWorkItemStore,
    ports::{OrderFilter, OrderUpdate, SceneFilter, SceneUpdate, WorkItemStore},
};
use terrex_model::{
    NewOrder, NewScene, OrderSource, OrderStatus, ProductOptions, SceneStatus, SensorFamily,
    UpstreamUnitStatus,
};

fn new_order(orderid: &str, requester: &str, days_ago: i64) -> NewOrder {
    let at = Utc
        .with_ymd_and_hms(2024, 3, 9, 14, 0, 0)
        .single()
        .expect("valid timestamp")
        - Duration::days(days_ago);
    NewOrder {
        orderid: orderid.to_string(),
        requester: requester.to_string(),
        email: format!("{requester}@example.org"),
        order_source: OrderSource::SelfService,
        order_date: at,
        ee_order_id: None,
        product_opts: ProductOptions::with_outputs("tm5", ["sr", "toa"]),
        note: None,
    }
}

fn landsat(names: &[&str]) -> Vec<NewScene> {
    names
        .iter()
        .map(|name| NewScene::submitted(*name, SensorFamily::Landsat, 5))
        .collect()
}

#[sqlx::test(migrator = "terrex_core::MIGRATOR")]
async fn orders_and_scenes_round_trip(pool: PgPool) {
    let store = PostgresWorkItemStore::new(pool.clone());
    let now = Utc::now();

    let order = store
        .create_order(new_order("o-1", "alice", 0), landsat(&["LT05_B", "LT05_A"]), now)
        .await
        .expect("create order");
    assert_eq!(order.status, OrderStatus::Ordered);
    assert_eq!(order.product_opts.outputs_for("tm5"), ["sr", "toa"]);

    let scenes = store
        .find_scenes(&SceneFilter::for_order(order.id))
        .await
        .expect("find scenes");
    let names: Vec<&str> = scenes.iter().map(|scene| scene.name.as_str()).collect();
    assert_eq!(names, ["LT05_A", "LT05_B"]);
    assert!(scenes.iter().all(|scene| scene.status == SceneStatus::Submitted));

    let by_key = store
        .find_order_by_key("o-1")
        .await
        .expect("lookup")
        .expect("order exists");
    assert_eq!(by_key.id, order.id);

    let row = sqlx::query("SELECT count(*) AS n FROM scenes WHERE order_id = $1")
        .bind(order.id.to_uuid())
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(row.get::<i64, _>("n"), 2);
}

#[sqlx::test(migrator = "terrex_core::MIGRATOR")]
async fn duplicate_order_key_is_a_conflict(pool: PgPool) {
    let store = PostgresWorkItemStore::new(pool);
    let now = Utc::now();
    store
        .create_order(new_order("o-dup", "alice", 0), landsat(&["LT05_A"]), now)
        .await
        .expect("first insert");

    let err = store
        .create_order(new_order("o-dup", "alice", 0), landsat(&["LT05_A"]), now)
        .await
        .expect_err("duplicate key");
    assert!(matches!(err, OrchestratorError::Conflict(_)));
}

#[sqlx::test(migrator = "terrex_core::MIGRATOR")]
async fn guarded_updates_only_apply_from_the_expected_status(pool: PgPool) {
    let store = PostgresWorkItemStore::new(pool);
    let now = Utc::now();
    let order = store
        .create_order(new_order("o-g", "alice", 0), landsat(&["LT05_A", "LT05_B"]), now)
        .await
        .expect("create order");
    let scenes = store
        .find_scenes(&SceneFilter::for_order(order.id))
        .await
        .expect("scenes");

    let to_cache = SceneUpdate::new().status(SceneStatus::Oncache, now).note("");
    assert!(
        store
            .update_scene(scenes[0].id, Some(SceneStatus::Submitted), &to_cache)
            .await
            .expect("update")
    );
    assert!(
        !store
            .update_scene(scenes[0].id, Some(SceneStatus::Submitted), &to_cache)
            .await
            .expect("update")
    );

    let ids: Vec<_> = scenes.iter().map(|scene| scene.id).collect();
    let park = SceneUpdate::new()
        .failed_upstream_update(Some(UpstreamUnitStatus::Rejected))
        .retry_after(Some(now));
    let written = store
        .bulk_update_scenes(&ids, Some(&[SceneStatus::Submitted]), &park)
        .await
        .expect("bulk update");
    assert_eq!(written, 1);

    let parked = store
        .find_scenes(&SceneFilter::new().with_failed_upstream_update())
        .await
        .expect("parked");
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].name, "LT05_B");
    assert_eq!(
        parked[0].failed_lta_status_update,
        Some(UpstreamUnitStatus::Rejected)
    );

    let cleared = store
        .bulk_update_scenes(&ids, None, &SceneUpdate::new().failed_upstream_update(None))
        .await
        .expect("clear");
    assert_eq!(cleared, 2);
    assert!(
        store
            .find_scenes(&SceneFilter::new().with_failed_upstream_update())
            .await
            .expect("parked")
            .is_empty()
    );
}

#[sqlx::test(migrator = "terrex_core::MIGRATOR")]
async fn filters_follow_the_owning_order(pool: PgPool) {
    let store = PostgresWorkItemStore::new(pool);
    let now = Utc::now();
    let old = store
        .create_order(new_order("o-old", "alice", 20), landsat(&["LT05_O"]), now)
        .await
        .expect("old order");
    store
        .create_order(new_order("o-new", "bob", 1), landsat(&["LT05_N"]), now)
        .await
        .expect("new order");

    let first = store
        .find_scenes(&SceneFilter::new().status(SceneStatus::Submitted).limit(1))
        .await
        .expect("oldest first");
    assert_eq!(first[0].name, "LT05_O");

    let bobs = store
        .find_scenes(&SceneFilter::new().requester(Some("bob")))
        .await
        .expect("by requester");
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].name, "LT05_N");

    let done = now - Duration::days(15);
    assert!(
        store
            .update_order(
                old.id,
                Some(OrderStatus::Ordered),
                &OrderUpdate::new()
                    .status(OrderStatus::Complete)
                    .completion_date(Some(done)),
            )
            .await
            .expect("complete")
    );
    let expired = store
        .find_orders(
            &OrderFilter::new()
                .status(OrderStatus::Complete)
                .completed_before(now - Duration::days(10)),
        )
        .await
        .expect("expired");
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].orderid, "o-old");

    let pending = store
        .find_scenes(&SceneFilter::new().order_statuses([OrderStatus::Ordered]))
        .await
        .expect("pending");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].name, "LT05_N");
}

#[sqlx::test(migrator = "terrex_core::MIGRATOR")]
async fn inserting_into_a_missing_order_is_not_found(pool: PgPool) {
    let store = PostgresWorkItemStore::new(pool);
    let err = store
        .insert_scenes(
            terrex_model::OrderId::new(),
            landsat(&["LT05_A"]),
            Utc::now(),
        )
        .await
        .expect_err("no such order");
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}
