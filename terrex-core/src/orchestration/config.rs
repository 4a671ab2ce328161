use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::ports::ResolutionStatus;

/// Global knobs that tune the reconciliation pass.
///
/// All fields carry defaults so a deployment only has to spell out the
/// values it wants to change.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Staleness and orphan hysteresis.
    pub stuck: StuckConfig,
    /// Upstream archive call volume and failure logging.
    pub upstream: UpstreamConfig,
    pub availability: AvailabilityConfig,
    pub retry: RetryConfig,
    /// Retention window and purge cadence.
    pub purge: PurgeConfig,
    pub import: ImportConfig,
    pub delivery: DeliveryConfig,
    /// Error classification table. Empty means every failure is a hard error.
    pub classifier: ClassifierConfig,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StuckConfig {
    /// Queued/processing scenes untouched for this long are checked against
    /// the cluster listing.
    pub stuck_after_secs: u64,
    /// Minimum gap between the first and the confirming absence.
    pub orphan_hysteresis_secs: u64,
    /// Wait between the two samples of an operator resubmit.
    pub resubmit_wait_secs: u64,
}

impl StuckConfig {
    pub fn stuck_after(&self) -> chrono::Duration {
        secs(self.stuck_after_secs)
    }

    pub fn orphan_hysteresis(&self) -> chrono::Duration {
        secs(self.orphan_hysteresis_secs)
    }

    pub fn resubmit_wait(&self) -> Duration {
        Duration::from_secs(self.resubmit_wait_secs)
    }
}

impl Default for StuckConfig {
    fn default() -> Self {
        Self {
            stuck_after_secs: 6 * 60 * 60,
            orphan_hysteresis_secs: 10 * 60,
            resubmit_wait_secs: 10 * 60 + 30,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Max distinct ordering batches polled per pass.
    pub onorder_batch_window: usize,
    /// Cool-down between "cannot update upstream" warnings.
    pub failure_log_cooldown_secs: u64,
    /// Per-call timeout for every external call.
    pub call_timeout_ms: u64,
    pub max_parallel_calls: usize,
}

impl UpstreamConfig {
    pub fn failure_log_cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_log_cooldown_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn parallelism(&self) -> usize {
        self.max_parallel_calls.max(1)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            onorder_batch_window: 500,
            failure_log_cooldown_secs: 600,
            call_timeout_ms: 10_000,
            max_parallel_calls: 8,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AvailabilityConfig {
    /// Scenes checked per sensor family per pass.
    pub batch_limit: usize,
    /// Place verified Landsat scenes with the archive instead of moving them
    /// straight to `oncache`.
    pub landsat_order_via_archive: bool,
    /// Note attached to scenes the catalog no longer knows.
    pub unavailable_reason: String,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            batch_limit: 500,
            landsat_order_via_archive: false,
            unavailable_reason:
                "No longer found in the archive, please search again".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Limit stamped on new scenes.
    pub default_retry_limit: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_retry_limit: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeConfig {
    pub retention_days: i64,
    /// TTL of the purge lease.
    pub run_every_secs: u64,
    pub send_report: bool,
}

impl PurgeConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.run_every_secs)
    }
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            retention_days: 10,
            run_every_secs: 24 * 60 * 60,
            send_report: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub enabled: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Public root of the distribution cache. Download urls take the form
    /// `{base}/orders/{orderid}/{file name}`.
    pub download_base_url: String,
}

impl DeliveryConfig {
    /// Falls back to the raw location when no base url is configured.
    pub fn download_url(&self, orderid: &str, location: &str) -> String {
        let file = Path::new(location)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        if self.download_base_url.is_empty() || file.is_empty() {
            return location.to_string();
        }
        format!(
            "{}/orders/{orderid}/{file}",
            self.download_base_url.trim_end_matches('/')
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Evaluated in order; first match wins.
    pub rules: Vec<ClassifierRule>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassifierRule {
    /// Case-insensitive regular expressions matched against the raw log.
    pub patterns: Vec<String>,
    pub status: ResolutionStatus,
    pub reason: String,
    #[serde(default)]
    pub retry_after_secs: Option<u64>,
    #[serde(default)]
    pub retry_limit: Option<u32>,
}

fn secs(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}
