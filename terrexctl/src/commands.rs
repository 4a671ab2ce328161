use std::{path::Path, time::Duration};

use anyhow::{Context, bail};
use serde::Serialize;
use serde_json::json;
use terrex_config::TerrexConfig;
use terrex_core::{
    ProductionOrchestrator, Scope,
    orchestration::{
        CompletedProduct, NewOrderRequest, PassReport, PurgeSummary, SubpassStatus,
    },
};

use crate::cli::{Command, ConfigCommand, ProcessCommand, SceneCommand, SceneRef};

pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce() -> String) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", human());
        }
        Ok(())
    }
}

/// Commands that only need the configuration.
pub fn run_config(command: &ConfigCommand, config: &TerrexConfig, out: &Output) -> anyhow::Result<()> {
    match command {
        ConfigCommand::Print => {
            let shown = config.redacted();
            if out.json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                print!(
                    "{}",
                    toml::to_string_pretty(&shown).context("failed to render configuration")?
                );
            }
        }
        ConfigCommand::Check => out.emit(&json!({ "valid": true }), || {
            "configuration is valid".to_string()
        })?,
    }
    Ok(())
}

pub async fn run(
    command: Command,
    orchestrator: &ProductionOrchestrator,
    out: &Output,
) -> anyhow::Result<()> {
    match command {
        Command::Reconcile { requester } => {
            let report = orchestrator.reconcile_pass(&Scope::from(requester)).await;
            out.emit(&report, || render_report(&report))?;
            if !report.is_success() {
                bail!("reconciliation pass finished with failed sub-passes");
            }
        }
        Command::ResubmitOrphans => {
            let outcome = orchestrator.resubmit_orphaned().await?;
            out.emit(
                &json!({ "resubmitted": outcome.resubmitted, "cancelled": outcome.cancelled }),
                || {
                    format!(
                        "resubmitted {} orphaned scenes, cancelled {}",
                        outcome.resubmitted, outcome.cancelled
                    )
                },
            )?;
        }
        Command::ResetProcessing => {
            let reset = orchestrator.reset_processing_status().await?;
            out.emit(&json!({ "reset": reset }), || {
                format!("reset {reset} scenes to submitted")
            })?;
        }
        Command::KillJobs { requester } => {
            let killed = orchestrator.kill_requester_jobs(&requester).await?;
            out.emit(&json!({ "requester": requester, "reset": killed }), || {
                format!("killed jobs of {requester}; {killed} scenes resubmitted")
            })?;
        }
        Command::Purge => {
            let summary = orchestrator.purge_expired_orders().await?;
            out.emit(&purge_json(&summary), || {
                format!(
                    "purged {} orders ({} scenes); cache {} -> {}",
                    summary.orders.len(),
                    summary.scenes(),
                    summary.before,
                    summary.after
                )
            })?;
        }
        Command::Submit { request } => {
            let raw = tokio::fs::read_to_string(&request)
                .await
                .with_context(|| format!("failed to read {}", request.display()))?;
            let request: NewOrderRequest =
                serde_json::from_str(&raw).context("invalid order request")?;
            let order = orchestrator.submit_order(request).await?;
            out.emit(&order, || format!("order {} placed", order.orderid))?;
        }
        Command::Cancel { orderid } => {
            let cancellation = orchestrator.cancel_order(&orderid).await?;
            out.emit(
                &json!({
                    "orderid": cancellation.order.orderid,
                    "scenes_cancelled": cancellation.scenes_cancelled,
                }),
                || {
                    format!(
                        "order {} cancelled ({} scenes)",
                        cancellation.order.orderid, cancellation.scenes_cancelled
                    )
                },
            )?;
        }
        Command::Scene(command) => run_scene(command, orchestrator, out).await?,
        Command::Process(command) => run_process(command, orchestrator, out).await?,
        Command::Config(_) => bail!("config commands do not need the orchestrator"),
    }
    Ok(())
}

async fn run_scene(
    command: SceneCommand,
    orchestrator: &ProductionOrchestrator,
    out: &Output,
) -> anyhow::Result<()> {
    match command {
        SceneCommand::Show { scene } => {
            let (_, stored) = resolve(orchestrator, &scene).await?;
            out.emit(&stored, || {
                format!(
                    "{}/{} {} (retries {}/{}) {}",
                    scene.orderid,
                    stored.name,
                    stored.status,
                    stored.retry_count,
                    stored.retry_limit,
                    stored.note
                )
            })?;
        }
        SceneCommand::Complete {
            scene,
            location,
            checksum,
            log_file,
        } => {
            let (_, stored) = resolve(orchestrator, &scene).await?;
            let log = match log_file {
                Some(path) => read_log(&path).await?,
                None => String::new(),
            };
            let product = CompletedProduct {
                location,
                checksum_location: checksum,
                log,
            };
            let outcome = orchestrator.mark_complete(stored.id, &product).await?;
            out.emit(&json!({ "outcome": format!("{outcome:?}") }), || {
                format!("{}/{}: {outcome:?}", scene.orderid, scene.name)
            })?;
        }
        SceneCommand::Error {
            scene,
            log,
            log_file,
        } => {
            let (_, stored) = resolve(orchestrator, &scene).await?;
            let log = match (log, log_file) {
                (Some(log), _) => log,
                (None, Some(path)) => read_log(&path).await?,
                (None, None) => bail!("either --log or --log-file is required"),
            };
            let status = orchestrator.set_error(stored.id, &log).await?;
            out.emit(&json!({ "status": status }), || {
                format!("{}/{} is now {status}", scene.orderid, scene.name)
            })?;
        }
        SceneCommand::Unavailable { scene, note } => {
            let (_, stored) = resolve(orchestrator, &scene).await?;
            let outcome = orchestrator.set_unavailable(stored.id, &note).await?;
            out.emit(&json!({ "outcome": format!("{outcome:?}") }), || {
                format!("{}/{}: {outcome:?}", scene.orderid, scene.name)
            })?;
        }
        SceneCommand::Retry {
            scene,
            after_secs,
            limit,
        } => {
            let (_, stored) = resolve(orchestrator, &scene).await?;
            let outcome = orchestrator
                .set_retry(stored.id, Duration::from_secs(after_secs), limit)
                .await?;
            out.emit(&json!({ "outcome": format!("{outcome:?}") }), || {
                format!("{}/{}: {outcome:?}", scene.orderid, scene.name)
            })?;
        }
        SceneCommand::Status {
            scene,
            status,
            location,
        } => {
            let outcome = orchestrator
                .update_status(&scene.name, &scene.orderid, location.as_deref(), status)
                .await?;
            out.emit(&json!({ "outcome": format!("{outcome:?}") }), || {
                format!("{}/{}: {outcome:?}", scene.orderid, scene.name)
            })?;
        }
    }
    Ok(())
}

async fn run_process(
    command: ProcessCommand,
    orchestrator: &ProductionOrchestrator,
    out: &Output,
) -> anyhow::Result<()> {
    match command {
        ProcessCommand::List {
            limit,
            sensors,
            requester,
        } => {
            let items = orchestrator
                .products_to_process(limit, &sensors, requester.as_deref())
                .await?;
            out.emit(&items, || {
                items
                    .iter()
                    .map(|item| {
                        format!("{}\t{}\t{}\t{}", item.orderid, item.scene, item.sensor, item.requester)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
        ProcessCommand::Queue {
            scenes,
            location,
            job,
        } => {
            let queued = orchestrator.queue_products(&scenes, &location, &job).await?;
            out.emit(&json!({ "queued": queued, "job": job }), || {
                format!("{queued} scenes queued under {job}")
            })?;
        }
    }
    Ok(())
}

async fn resolve(
    orchestrator: &ProductionOrchestrator,
    scene: &SceneRef,
) -> anyhow::Result<(terrex_model::Order, terrex_model::Scene)> {
    orchestrator
        .find_scene(&scene.orderid, &scene.name)
        .await
        .with_context(|| format!("scene {}/{}", scene.orderid, scene.name))
}

async fn read_log(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read log file {}", path.display()))
}

fn render_report(report: &PassReport) -> String {
    report
        .subpasses
        .iter()
        .map(|(subpass, status)| {
            let detail = match status {
                SubpassStatus::Completed { affected } => format!("completed ({affected})"),
                SubpassStatus::Skipped { reason } => format!("skipped: {reason}"),
                SubpassStatus::Failed { error } => format!("FAILED: {error}"),
            };
            format!("{:<26} {detail}", subpass.as_str())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn purge_json(summary: &PurgeSummary) -> serde_json::Value {
    json!({
        "before": summary.before,
        "after": summary.after,
        "orders": summary
            .orders
            .iter()
            .map(|order| json!({ "orderid": order.orderid, "scenes": order.scenes }))
            .collect::<Vec<_>>(),
    })
}
