pub mod config;
pub mod container_specs;
pub mod errors;
pub mod hash;
pub mod logging;
pub mod manifest_staging;
pub mod migrate;
pub mod registry;

pub use config::MigrationConfig;
pub use errors::{ReplicationError, Result};
pub use migrate::{migrate, Migration, MigrationReport};
