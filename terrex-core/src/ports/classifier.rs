use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use terrex_model::SceneStatus;

/// Target state chosen for a failed scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStatus {
    Retry,
    Unavailable,
    /// Transient failure; resubmit without counting a retry.
    Submitted,
}

impl ResolutionStatus {
    pub fn scene_status(self) -> SceneStatus {
        match self {
            ResolutionStatus::Retry => SceneStatus::Retry,
            ResolutionStatus::Unavailable => SceneStatus::Unavailable,
            ResolutionStatus::Submitted => SceneStatus::Submitted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub status: ResolutionStatus,
    pub reason: String,
    pub retry_after: Option<Duration>,
    pub retry_limit: Option<u32>,
}

/// Maps a raw processing log to a resolution. `None` means the failure is
/// not recognised and the scene takes a hard `error`.
pub trait ErrorClassifier: Send + Sync + fmt::Debug {
    fn classify(&self, raw_log: &str, scene_name: &str) -> Option<Resolution>;
}
