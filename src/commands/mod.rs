//! CLI commands module.

pub mod config;
pub mod info;
pub mod migrate;
pub mod new;
pub mod rollback;
pub mod status;

use anyhow::{Context, Result};
use dirmigrate_core::{MigrationConfig, MigrationManager};

/// Connect to the configured database and build a manager.
pub(crate) async fn connect(config: &MigrationConfig) -> Result<MigrationManager> {
    MigrationManager::connect(config)
        .await
        .context("Failed to connect to the database")
}
