//! Configuration for Terrex deployments.
//!
//! Reads a TOML or JSON file (or inline JSON), lays `.env` and the
//! `DATABASE_URL` / `REDIS_URL` overrides on top, and validates the result
//! before anything connects.

pub mod loader;
pub mod models;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, EnvConfig};
pub use models::{
    CacheConfig, ClusterConfig, ConfigMetadata, ConfigSource, DatabaseConfig, EndpointConfig,
    RedisConfig, TerrexConfig,
};
