mod support;

use chrono::Duration;
use terrex_core::{
    OrchestratorError,
    orchestration::{
        CompletedProduct, ProductAction, RETRY_LIMIT_NOTE, Scope, TransitionOutcome,
    },
    ports::SceneUpdate,
};
use terrex_model::{OrderStatus, SceneStatus, SensorFamily, UpstreamUnitStatus};

use support::{GONE_LOG, Harness, RETRY_LOG};

#[tokio::test]
async fn retry_refuses_to_pass_the_limit() {
    let h = Harness::new();
    h.order("o-lim", &["LT05_A"]).await;
    h.run_on_cluster("o-lim", "LT05_A", "job-a").await;
    h.set("o-lim", "LT05_A", SceneUpdate::new().retry(5, 5, None)).await;
    let scene = h.scene("o-lim", "LT05_A").await;

    let err = h
        .orchestrator
        .set_retry(scene.id, std::time::Duration::from_secs(60), None)
        .await
        .expect_err("limit spent");
    assert!(matches!(err, OrchestratorError::RetryLimitExceeded { limit: 5, .. }));

    let unchanged = h.scene("o-lim", "LT05_A").await;
    assert_eq!(unchanged.status, SceneStatus::Processing);
    assert_eq!(unchanged.retry_count, 5);
}

#[tokio::test]
async fn classified_retry_past_the_limit_becomes_a_hard_error() {
    let h = Harness::new();
    h.order("o-lim", &["LT05_A"]).await;
    h.run_on_cluster("o-lim", "LT05_A", "job-a").await;
    h.set("o-lim", "LT05_A", SceneUpdate::new().retry(5, 5, None)).await;
    let scene = h.scene("o-lim", "LT05_A").await;

    let status = h
        .orchestrator
        .set_error(scene.id, RETRY_LOG)
        .await
        .expect("set error");

    assert_eq!(status, SceneStatus::Error);
    let scene = h.scene("o-lim", "LT05_A").await;
    assert_eq!(scene.status, SceneStatus::Error);
    assert_eq!(scene.note, RETRY_LIMIT_NOTE);
    assert_eq!(scene.log_file_contents, RETRY_LOG);
    assert!(scene.retry_count <= scene.retry_limit);
}

#[tokio::test]
async fn classifier_routes_failures() {
    let h = Harness::new();
    h.order("o-err", &["LT05_R", "LT05_U", "LT05_E"]).await;
    for (name, job) in [("LT05_R", "job-r"), ("LT05_U", "job-u"), ("LT05_E", "job-e")] {
        h.run_on_cluster("o-err", name, job).await;
    }
    h.set("o-err", "LT05_R", SceneUpdate::new().retry(4, 5, None)).await;

    let retry = h.scene("o-err", "LT05_R").await;
    assert_eq!(
        h.orchestrator.set_error(retry.id, RETRY_LOG).await.expect("retry"),
        SceneStatus::Retry
    );
    let retry = h.scene("o-err", "LT05_R").await;
    assert_eq!(retry.retry_count, 5);
    assert_eq!(retry.retry_after, Some(h.clock_now() + Duration::hours(1)));
    assert_eq!(retry.job_name, None);

    let gone = h.scene("o-err", "LT05_U").await;
    assert_eq!(
        h.orchestrator.set_error(gone.id, GONE_LOG).await.expect("unavailable"),
        SceneStatus::Unavailable
    );
    let gone = h.scene("o-err", "LT05_U").await;
    assert_eq!(gone.note, "Input is no longer in the archive");
    assert_eq!(gone.log_file_contents, GONE_LOG);

    let hard = h.scene("o-err", "LT05_E").await;
    assert_eq!(
        h.orchestrator
            .set_error(hard.id, "segmentation fault")
            .await
            .expect("error"),
        SceneStatus::Error
    );
    assert_eq!(h.scene("o-err", "LT05_E").await.note, "");
}

#[tokio::test]
async fn failure_on_a_queued_scene_resolves_like_a_running_one() {
    let h = Harness::new();
    h.order("o-q", &["LT05_R", "LT05_U"]).await;
    for name in ["LT05_R", "LT05_U"] {
        h.set(
            "o-q",
            name,
            SceneUpdate::new()
                .status(SceneStatus::Queued, h.clock_now())
                .job(Some(format!("job-{name}")), Some("node-1".to_string())),
        )
        .await;
    }

    let gone = h.scene("o-q", "LT05_U").await;
    let status = h.orchestrator.set_error(gone.id, GONE_LOG).await.expect("unavailable");
    let gone = h.scene("o-q", "LT05_U").await;
    assert_eq!(status, SceneStatus::Unavailable);
    assert_eq!(gone.status, status);
    assert_eq!(gone.log_file_contents, GONE_LOG);
    assert_eq!(gone.job_name, None);

    let retry = h.scene("o-q", "LT05_R").await;
    let status = h.orchestrator.set_error(retry.id, RETRY_LOG).await.expect("retry");
    let retry = h.scene("o-q", "LT05_R").await;
    assert_eq!(status, SceneStatus::Retry);
    assert_eq!(retry.status, status);
    assert_eq!(retry.retry_count, 1);
}

#[tokio::test]
async fn resolution_the_scene_cannot_take_falls_back_to_error() {
    let h = Harness::new();
    h.order("o-late", &["LT05_A"]).await;
    h.deliver("o-late", "LT05_A").await;
    let scene = h.scene("o-late", "LT05_A").await;

    let status = h
        .orchestrator
        .set_error(scene.id, RETRY_LOG)
        .await
        .expect("set error");

    let stored = h.scene("o-late", "LT05_A").await;
    assert_eq!(status, SceneStatus::Error);
    assert_eq!(stored.status, SceneStatus::Error);
    assert_eq!(stored.note, "Retrying, the archive mirror was unreachable");
    assert_eq!(stored.log_file_contents, RETRY_LOG);
}

#[tokio::test]
async fn failure_report_for_a_scene_awaiting_retry_changes_nothing() {
    let h = Harness::new();
    h.order("o-dup", &["LT05_A"]).await;
    h.set_status("o-dup", "LT05_A", SceneStatus::Retry).await;
    let scene = h.scene("o-dup", "LT05_A").await;

    let status = h
        .orchestrator
        .set_error(scene.id, RETRY_LOG)
        .await
        .expect("set error");

    assert_eq!(status, SceneStatus::Retry);
    let stored = h.scene("o-dup", "LT05_A").await;
    assert_eq!(stored.retry_count, scene.retry_count);
    assert_eq!(stored.log_file_contents, scene.log_file_contents);
}

#[tokio::test]
async fn bulk_unavailable_only_rejects_units_it_wrote() {
    let h = Harness::new();
    h.imported_order("imp-u", &["LC08_A", "LC08_B"]).await;
    let snapshot = h.scenes("imp-u").await;
    h.deliver("imp-u", "LC08_B").await;

    let written = h
        .orchestrator
        .set_products_unavailable(&snapshot, "withdrawn upstream")
        .await
        .expect("bulk unavailable");

    assert_eq!(written, 1);
    assert_eq!(h.scene("imp-u", "LC08_A").await.status, SceneStatus::Unavailable);
    assert_eq!(h.scene("imp-u", "LC08_B").await.status, SceneStatus::Complete);
    let pushes = h.ordering.pushes.lock().clone();
    assert_eq!(
        pushes.iter().map(|(_, unit, status)| (unit.as_str(), *status)).collect::<Vec<_>>(),
        vec![("LC08_A", UpstreamUnitStatus::Rejected)]
    );
}

#[tokio::test]
async fn mark_complete_records_delivery_and_pushes_upstream() {
    let h = Harness::new();
    h.imported_order("imp-2", &["LC08_A"]).await;
    h.run_on_cluster("imp-2", "LC08_A", "job-a").await;
    let location = "/cache/orders/imp-2/LC08_A.tar.gz";
    h.cache.store_artifact("imp-2", location, 8192);
    let scene = h.scene("imp-2", "LC08_A").await;

    let outcome = h
        .orchestrator
        .mark_complete(
            scene.id,
            &CompletedProduct {
                location: location.into(),
                checksum_location: "/cache/orders/imp-2/LC08_A.md5".into(),
                log: "done".into(),
            },
        )
        .await
        .expect("mark complete");

    assert_eq!(outcome, TransitionOutcome::Applied);
    let scene = h.scene("imp-2", "LC08_A").await;
    assert_eq!(scene.status, SceneStatus::Complete);
    assert_eq!(scene.download_size, 8192);
    assert_eq!(scene.product_distro_location, location);
    assert_eq!(scene.job_name, None);
    assert!(scene.completion_date.is_some());
    assert_eq!(
        *h.ordering.pushes.lock(),
        vec![(
            "ee-imp-2".to_string(),
            "LC08_A".to_string(),
            UpstreamUnitStatus::Complete
        )]
    );

    let again = h
        .orchestrator
        .mark_complete(scene.id, &CompletedProduct::default())
        .await
        .expect("repeat");
    assert_eq!(again, TransitionOutcome::Unchanged);
}

#[tokio::test]
async fn cancel_moves_cancellable_scenes_and_spares_running_work() {
    let h = Harness::new();
    h.order("o-can", &["LT05_A", "LT05_B", "LT05_C"]).await;
    h.run_on_cluster("o-can", "LT05_B", "job-b").await;
    h.deliver("o-can", "LT05_C").await;

    let cancellation = h.orchestrator.cancel_order("o-can").await.expect("cancel");
    assert_eq!(cancellation.scenes_cancelled, 2);
    assert_eq!(cancellation.order.status, OrderStatus::Cancelled);
    assert_eq!(h.scene("o-can", "LT05_A").await.status, SceneStatus::Cancelled);
    assert_eq!(h.scene("o-can", "LT05_B").await.status, SceneStatus::Processing);
    assert_eq!(h.scene("o-can", "LT05_C").await.status, SceneStatus::Cancelled);

    h.orchestrator.reconcile_pass(&Scope::all()).await;
    assert_eq!(h.notifier.count("order_cancelled"), 0);

    let running = h.scene("o-can", "LT05_B").await;
    let outcome = h
        .orchestrator
        .mark_complete(
            running.id,
            &CompletedProduct {
                location: "/cache/orders/o-can/LT05_B.tar.gz".into(),
                ..CompletedProduct::default()
            },
        )
        .await
        .expect("late completion");
    assert_eq!(outcome, TransitionOutcome::Cancelled);
    assert_eq!(h.scene("o-can", "LT05_B").await.status, SceneStatus::Cancelled);
    assert!(h.cache.deleted.lock().contains(&"o-can".to_string()));

    h.orchestrator.reconcile_pass(&Scope::all()).await;
    h.orchestrator.reconcile_pass(&Scope::all()).await;
    assert_eq!(h.notifier.count("order_cancelled"), 1);
    assert!(h.order_status("o-can").await.completion_email_sent.is_some());

    let again = h.orchestrator.cancel_order("o-can").await.expect("repeat");
    assert_eq!(again.scenes_cancelled, 0);
}

#[tokio::test]
async fn cancel_leaves_purged_scenes_alone() {
    let h = Harness::new();
    h.order("o-mixed", &["LT05_A", "LT05_P"]).await;
    h.set_status("o-mixed", "LT05_P", SceneStatus::Purged).await;

    h.orchestrator.cancel_order("o-mixed").await.expect("cancel");

    assert_eq!(h.scene("o-mixed", "LT05_P").await.status, SceneStatus::Purged);
    assert_eq!(h.scene("o-mixed", "LT05_A").await.status, SceneStatus::Cancelled);
}

#[tokio::test]
async fn cancelling_an_unknown_order_is_not_found() {
    let h = Harness::new();
    let err = h.orchestrator.cancel_order("nope").await.expect_err("missing");
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn cancelling_an_imported_order_rejects_its_units_upstream() {
    let h = Harness::new();
    h.imported_order("imp-c", &["LC08_A", "LC08_B"]).await;

    h.orchestrator.cancel_order("imp-c").await.expect("cancel");

    let mut pushes = h.ordering.pushes.lock().clone();
    pushes.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(
        pushes.iter().map(|(_, unit, status)| (unit.as_str(), *status)).collect::<Vec<_>>(),
        vec![
            ("LC08_A", UpstreamUnitStatus::Rejected),
            ("LC08_B", UpstreamUnitStatus::Rejected)
        ]
    );
}

#[tokio::test]
async fn single_absence_inside_the_window_does_not_confirm_an_orphan() {
    let h = Harness::new();
    h.order("o-orph", &["LT05_A"]).await;
    h.run_on_cluster("o-orph", "LT05_A", "job-a").await;
    h.cluster.clear();

    let scene = h.scene("o-orph", "LT05_A").await;
    let sweep = h.orchestrator.detect_orphans(&[scene]).await.expect("sweep");
    assert_eq!(sweep.first_absences, 1);
    let first_seen = h.clock_now();

    h.advance_minutes(9);
    let scene = h.scene("o-orph", "LT05_A").await;
    let sweep = h.orchestrator.detect_orphans(&[scene]).await.expect("sweep");
    assert_eq!(sweep.confirmed, 0);
    let scene = h.scene("o-orph", "LT05_A").await;
    assert!(!scene.orphaned);
    assert_eq!(scene.reported_orphan, Some(first_seen));

    h.advance_minutes(2);
    let sweep = h.orchestrator.detect_orphans(&[scene]).await.expect("sweep");
    assert_eq!(sweep.confirmed, 1);
    assert!(h.scene("o-orph", "LT05_A").await.orphaned);
}

#[tokio::test]
async fn reappearing_job_clears_the_suspicion() {
    let h = Harness::new();
    h.order("o-flap", &["LT05_A"]).await;
    h.run_on_cluster("o-flap", "LT05_A", "job-a").await;
    h.cluster.clear();

    let scene = h.scene("o-flap", "LT05_A").await;
    h.orchestrator.detect_orphans(&[scene]).await.expect("sweep");

    h.advance_minutes(5);
    h.cluster.run("id-job-a", "job-a");
    let scene = h.scene("o-flap", "LT05_A").await;
    let sweep = h.orchestrator.detect_orphans(&[scene]).await.expect("sweep");
    assert_eq!(sweep.cleared, 1);

    h.cluster.clear();
    h.advance_minutes(11);
    let scene = h.scene("o-flap", "LT05_A").await;
    let sweep = h.orchestrator.detect_orphans(&[scene]).await.expect("sweep");
    assert_eq!(sweep.first_absences, 1);
    assert!(!h.scene("o-flap", "LT05_A").await.orphaned);
}

#[tokio::test]
async fn operator_resubmit_samples_twice_and_spares_cancelled_orders() {
    let h = Harness::new();
    h.order("o-live", &["LT05_L"]).await;
    h.run_on_cluster("o-live", "LT05_L", "job-l").await;
    h.order("o-lost", &["LT05_X"]).await;
    h.run_on_cluster("o-lost", "LT05_X", "job-x").await;
    h.set("o-lost", "LT05_X", SceneUpdate::new().retry(3, 5, None)).await;
    h.order("o-gone", &["LT05_G"]).await;
    h.run_on_cluster("o-gone", "LT05_G", "job-g").await;
    h.orchestrator.cancel_order("o-gone").await.expect("cancel");

    h.cluster.live.lock().retain(|job| job.name == "job-l");
    let started = h.clock_now();

    let moved = h.orchestrator.resubmit_orphaned().await.expect("resubmit");

    assert_eq!(moved.resubmitted, 1);
    assert_eq!(moved.cancelled, 1);
    assert!(h.clock_now() - started >= Duration::minutes(10));
    assert_eq!(h.cluster.listings.load(std::sync::atomic::Ordering::SeqCst), 2);

    let lost = h.scene("o-lost", "LT05_X").await;
    assert_eq!(lost.status, SceneStatus::Submitted);
    assert_eq!(lost.retry_count, 0);
    assert!(!lost.orphaned);
    assert_eq!(h.scene("o-gone", "LT05_G").await.status, SceneStatus::Cancelled);
    let live = h.scene("o-live", "LT05_L").await;
    assert_eq!(live.status, SceneStatus::Processing);
    assert_eq!(live.reported_orphan, None);
}

#[tokio::test]
async fn processing_tier_round_trip() {
    let h = Harness::new();
    let order = h.order("o-proc", &["LT05_A", "LT05_B"]).await;
    h.set_status("o-proc", "LT05_A", SceneStatus::Oncache).await;
    h.set_status("o-proc", "LT05_B", SceneStatus::Oncache).await;

    let work = h
        .orchestrator
        .products_to_process(10, &[SensorFamily::Landsat], Some("alice"))
        .await
        .expect("list");
    assert_eq!(work.len(), 2);
    assert_eq!(work[0].orderid, "o-proc");
    assert_eq!(work[0].product_opts, order.product_opts);
    assert!(
        h.orchestrator
            .products_to_process(10, &[SensorFamily::Modis], None)
            .await
            .expect("list")
            .is_empty()
    );

    let items = vec![
        ("o-proc".to_string(), "LT05_A".to_string()),
        ("o-proc".to_string(), "LT05_B".to_string()),
    ];
    let queued = h
        .orchestrator
        .queue_products(&items, "node-7", "job-77")
        .await
        .expect("queue");
    assert_eq!(queued, 2);
    assert_eq!(h.scene("o-proc", "LT05_A").await.job_name.as_deref(), Some("job-77"));

    let outcome = h
        .orchestrator
        .update_status("LT05_A", "o-proc", Some("node-8"), Some(SceneStatus::Processing))
        .await
        .expect("status");
    assert!(outcome.is_applied());
    let running = h.scene("o-proc", "LT05_A").await;
    assert_eq!(running.status, SceneStatus::Processing);
    assert_eq!(running.processing_location.as_deref(), Some("node-8"));

    let err = h
        .orchestrator
        .update_status("LT05_A", "o-proc", None, Some(SceneStatus::Oncache))
        .await
        .expect_err("illegal edge");
    assert!(matches!(err, OrchestratorError::IntegrityViolation(_)));

    let location = "/cache/orders/o-proc/LT05_A.tar.gz";
    h.cache.store_artifact("o-proc", location, 1024);
    let action: ProductAction = serde_json::from_value(serde_json::json!({
        "action": "mark_product_complete",
        "completed_file_location": location,
        "log_file_contents": "ok",
    }))
    .expect("action");
    let done = h
        .orchestrator
        .update_product("o-proc", "LT05_A", action)
        .await
        .expect("complete");
    assert_eq!(done.status, SceneStatus::Complete);
    assert_eq!(done.download_size, 1024);

    h.cluster.run("id-77", "job-77");
    assert_eq!(h.orchestrator.kill_requester_jobs("alice").await.expect("kill"), 1);
    assert_eq!(*h.cluster.killed.lock(), vec!["id-77".to_string()]);

    assert_eq!(h.orchestrator.reset_processing_status().await.expect("reset"), 1);
    let reset = h.scene("o-proc", "LT05_B").await;
    assert_eq!(reset.status, SceneStatus::Submitted);
    assert_eq!(reset.job_name, None);
}

#[tokio::test]
async fn status_update_for_cancelled_order_cancels_the_scene() {
    let h = Harness::new();
    h.order("o-late", &["LT05_A"]).await;
    h.run_on_cluster("o-late", "LT05_A", "job-a").await;
    h.orchestrator.cancel_order("o-late").await.expect("cancel");

    let outcome = h
        .orchestrator
        .update_status("LT05_A", "o-late", None, Some(SceneStatus::Processing))
        .await
        .expect("status");

    assert_eq!(outcome, TransitionOutcome::Cancelled);
    assert_eq!(h.scene("o-late", "LT05_A").await.status, SceneStatus::Cancelled);
}
