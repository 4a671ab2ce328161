use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{
    error::{ExternalService, OrchestratorError, Result},
    ports::{ClusterJobIndex, LiveJob},
};

/// Cluster job index backed by the scheduler's command-line tools.
///
/// `list_command` runs through `sh -c` and must print one `<job id> <job
/// name>` pair per line. `kill_command` is split on whitespace and invoked
/// with the job id appended.
#[derive(Debug, Clone)]
pub struct CommandJobIndex {
    list_command: String,
    kill_command: String,
}

impl CommandJobIndex {
    pub fn new(list_command: impl Into<String>, kill_command: impl Into<String>) -> Self {
        Self {
            list_command: list_command.into(),
            kill_command: kill_command.into(),
        }
    }
}

pub(crate) fn parse_job_listing(stdout: &str) -> Vec<LiveJob> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let id = fields.next()?;
            let name = fields.next()?;
            Some(LiveJob {
                id: id.to_string(),
                name: name.to_string(),
            })
        })
        .collect()
}

#[async_trait]
impl ClusterJobIndex for CommandJobIndex {
    async fn list_live_jobs(&self) -> Result<Vec<LiveJob>> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.list_command)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                OrchestratorError::unreachable(
                    ExternalService::Cluster,
                    format!("failed to run job listing: {e}"),
                )
            })?;
        if !output.status.success() {
            return Err(OrchestratorError::unreachable(
                ExternalService::Cluster,
                format!(
                    "job listing exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        let jobs = parse_job_listing(&String::from_utf8_lossy(&output.stdout));
        debug!(count = jobs.len(), "listed live cluster jobs");
        Ok(jobs)
    }

    async fn kill_job(&self, id: &str) -> Result<()> {
        let mut parts = self.kill_command.split_whitespace();
        let program = parts.next().ok_or_else(|| {
            OrchestratorError::Configuration("cluster kill command is empty".into())
        })?;

        let status = Command::new(program)
            .args(parts)
            .arg(id)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| {
                OrchestratorError::unreachable(
                    ExternalService::Cluster,
                    format!("failed to run kill command: {e}"),
                )
            })?;
        if !status.success() {
            return Err(OrchestratorError::unreachable(
                ExternalService::Cluster,
                format!("kill of job {id} exited with {status}"),
            ));
        }
        info!(job = id, "killed cluster job");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_skips_malformed_lines() {
        let jobs = parse_job_listing("101 job-a\n\n  102   job-b  extra\nlonely\n");
        assert_eq!(
            jobs,
            vec![
                LiveJob {
                    id: "101".into(),
                    name: "job-a".into()
                },
                LiveJob {
                    id: "102".into(),
                    name: "job-b".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn lists_jobs_from_command_output() {
        let index = CommandJobIndex::new("printf '7 job-x\\n8 job-y\\n'", "true");
        let names = index.list_live_job_names().await.expect("list");
        assert_eq!(names, ["job-x", "job-y"]);
    }

    #[tokio::test]
    async fn failing_listing_is_transient() {
        let index = CommandJobIndex::new("exit 3", "true");
        let err = index.list_live_jobs().await.expect_err("non-zero exit");
        assert!(err.is_transient());
    }
}
