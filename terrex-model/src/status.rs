use std::{fmt, str::FromStr};

use crate::error::ModelError;

/// Lifecycle state of a single scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SceneStatus {
    Submitted,
    Oncache,
    Onorder,
    Queued,
    Processing,
    Retry,
    Complete,
    Error,
    Unavailable,
    Cancelled,
    Purged,
}

impl SceneStatus {
    pub const ALL: [SceneStatus; 11] = [
        SceneStatus::Submitted,
        SceneStatus::Oncache,
        SceneStatus::Onorder,
        SceneStatus::Queued,
        SceneStatus::Processing,
        SceneStatus::Retry,
        SceneStatus::Complete,
        SceneStatus::Error,
        SceneStatus::Unavailable,
        SceneStatus::Cancelled,
        SceneStatus::Purged,
    ];

    /// Statuses an order cancellation moves to `cancelled`.
    ///
    /// `processing` is absent: running cluster work is not aborted, it is
    /// cancelled when the cluster reports back.
    pub const CANCELLABLE: [SceneStatus; 8] = [
        SceneStatus::Submitted,
        SceneStatus::Oncache,
        SceneStatus::Onorder,
        SceneStatus::Queued,
        SceneStatus::Retry,
        SceneStatus::Error,
        SceneStatus::Unavailable,
        SceneStatus::Complete,
    ];

    /// Statuses that mean a cluster job should exist for the scene.
    pub const ON_CLUSTER: [SceneStatus; 2] =
        [SceneStatus::Queued, SceneStatus::Processing];

    pub const fn as_str(&self) -> &'static str {
        match self {
            SceneStatus::Submitted => "submitted",
            SceneStatus::Oncache => "oncache",
            SceneStatus::Onorder => "onorder",
            SceneStatus::Queued => "queued",
            SceneStatus::Processing => "processing",
            SceneStatus::Retry => "retry",
            SceneStatus::Complete => "complete",
            SceneStatus::Error => "error",
            SceneStatus::Unavailable => "unavailable",
            SceneStatus::Cancelled => "cancelled",
            SceneStatus::Purged => "purged",
        }
    }

    /// Terminal for the purpose of order completion.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SceneStatus::Complete | SceneStatus::Unavailable)
    }

    pub fn is_cancellable(&self) -> bool {
        Self::CANCELLABLE.contains(self)
    }

    pub fn is_on_cluster(&self) -> bool {
        Self::ON_CLUSTER.contains(self)
    }

    /// Whether `self -> next` is an edge of the scene state machine.
    ///
    /// Error resolutions reported straight from `queued` or `processing`
    /// (retry, unavailable, resubmit) count as edges because the
    /// intermediate `error` state is never persisted for them.
    pub fn can_transition_to(&self, next: SceneStatus) -> bool {
        use SceneStatus::*;

        if next == Cancelled && (self.is_cancellable() || *self == Processing) {
            return true;
        }

        match (self, next) {
            (Submitted, Oncache | Unavailable | Onorder) => true,
            (Onorder, Oncache | Unavailable) => true,
            (Oncache, Queued) => true,
            (Queued, Processing) => true,
            (
                Queued | Processing,
                Complete | Error | Submitted | Retry | Unavailable,
            ) => true,
            (Error, Retry | Unavailable | Submitted) => true,
            (Retry, Submitted) => true,
            (Complete, Purged | Error) => true,
            (Unavailable, Purged) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SceneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SceneStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SceneStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ModelError::UnknownStatus(s.to_string()))
    }
}

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum OrderStatus {
    Ordered,
    Complete,
    Cancelled,
    Purged,
}

impl OrderStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Ordered => "ordered",
            OrderStatus::Complete => "complete",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Purged => "purged",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ordered" => Ok(OrderStatus::Ordered),
            "complete" => Ok(OrderStatus::Complete),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "purged" => Ok(OrderStatus::Purged),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

/// Per-unit status mirrored back to the upstream archive for imported orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UpstreamUnitStatus {
    /// `C`: product delivered.
    Complete,
    /// `R`: product rejected or unavailable.
    Rejected,
    /// `I`: still in progress.
    InProgress,
}

impl UpstreamUnitStatus {
    pub const fn as_char(&self) -> char {
        match self {
            UpstreamUnitStatus::Complete => 'C',
            UpstreamUnitStatus::Rejected => 'R',
            UpstreamUnitStatus::InProgress => 'I',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'C' => Some(UpstreamUnitStatus::Complete),
            'R' => Some(UpstreamUnitStatus::Rejected),
            'I' => Some(UpstreamUnitStatus::InProgress),
            _ => None,
        }
    }

}

impl fmt::Display for UpstreamUnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}
