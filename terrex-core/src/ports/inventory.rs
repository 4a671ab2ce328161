use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use terrex_model::SensorFamily;

use crate::error::Result;

/// Acquisition catalog lookup.
///
/// An unreachable backend must surface as
/// [`OrchestratorError::TransientExternal`](crate::error::OrchestratorError::TransientExternal),
/// never as an all-`false` answer.
#[async_trait]
pub trait InventoryOracle: Send + Sync + fmt::Debug {
    /// Per-id availability against the catalog serving `sensor`.
    ///
    /// Ids missing from the returned map are treated as unavailable.
    async fn check_availability(
        &self,
        sensor: SensorFamily,
        ids: &[String],
    ) -> Result<HashMap<String, bool>>;
}
