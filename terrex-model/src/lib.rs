//! Core data model definitions shared across Terrex crates.
#![allow(missing_docs)]

pub mod capacity;
pub mod error;
pub mod ids;
pub mod order;
pub mod scene;
pub mod sensor;
pub mod status;

pub use capacity::CacheCapacity;
pub use error::{ModelError, Result as ModelResult};
pub use ids::{OrderId, SceneId};
pub use order::{NewOrder, Order, OrderSource, ProductOptions};
pub use scene::{NewScene, PLOT_SCENE_NAME, Scene};
pub use sensor::SensorFamily;
pub use status::{OrderStatus, SceneStatus, UpstreamUnitStatus};
