//! # dirmigrate-core
//!
//! Directory-based migration runner.
//!
//! Migration files live in one or more directories and are named
//! `<prefix>_<identifier>_<description>.<ext>`. Each run applies, per
//! directory, the files whose identifier is newer than the latest one
//! recorded for that directory. Every run is one batch sharing a sequence
//! number, and every processed file is recorded in an append-only store.
//!
//! This crate provides:
//! - Filename parsing with a configurable prefix
//! - Pending-file discovery across ordered directories
//! - SQL and script executors, routed by extension
//! - SQL-backed and in-memory record stores
//! - Batch bookkeeping with tolerated or fatal failures
//!
//! ## Example
//!
//! ```rust,no_run
//! use dirmigrate_core::{MigrationConfig, MigrationManager, NoProgress};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MigrationConfig::builder()
//!         .database_url("sqlite://app.db?mode=rwc")
//!         .directory("db/schema")
//!         .directory("db/data")
//!         .build()?;
//!
//!     let manager = MigrationManager::connect(&config).await?;
//!     let outcome = manager.migrate(&NoProgress).await?;
//!     println!("{} files imported", outcome.records().len());
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod identifier;
pub mod manager;
pub mod pool;
pub mod record;
pub mod store;

pub use config::{DatabaseType, MigrationConfig, MigrationConfigBuilder};
pub use discovery::{CandidateFile, Discoverer, LexicalPathNormalizer, PathNormalizer};
pub use error::{ExecutionError, MigrationError, Result};
pub use executor::{ExtensionRouter, MigrationExecutor, ScriptExecutor, SqlExecutor};
pub use identifier::{Identifier, IdentifierParser, ParsedName};
pub use manager::{
    DirectoryStatus, MigrationManager, MigrationManagerBuilder, MigrationOutcome,
    MigrationProgress, MigrationReport, NoProgress, RollbackPlan, RunContext,
};
pub use pool::DatabasePool;
pub use record::{MigrationRecord, RecordStatus, Sequence};
pub use store::{MemoryRecordStore, RecordStore, SqlRecordStore};

/// Re-export sqlx types for convenience
pub use sqlx;
