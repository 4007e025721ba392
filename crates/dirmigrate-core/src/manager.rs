//! Migration manager: discovery, batching, execution and recording for one
//! invocation.
//!
//! A run walks the configured directories in order, collects the files whose
//! identifier is newer than the directory's latest record, and applies them
//! one after another under a single new batch sequence. Each processed file
//! gets a record. A failure either aborts the run (earlier records stay) or,
//! with `ignore_errors`, is recorded as skipped and never retried.
//!
//! No locking is done: a single invoker per record store is assumed.

use crate::config::MigrationConfig;
use crate::discovery::{
    deduplicate, ensure_directory, CandidateFile, Discoverer, LexicalPathNormalizer,
    PathNormalizer,
};
use crate::error::{ExecutionError, MigrationError, Result};
use crate::executor::{ExtensionRouter, MigrationExecutor, ScriptExecutor, SqlExecutor};
use crate::identifier::{Identifier, IdentifierParser};
use crate::pool::DatabasePool;
use crate::record::{MigrationRecord, Sequence};
use crate::store::{RecordStore, SqlRecordStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Observer of a run's progress. All methods default to doing nothing.
pub trait MigrationProgress: Send + Sync {
    /// A batch of `total` files is about to be applied under `sequence`.
    fn started(&self, _total: usize, _sequence: Sequence) {}

    /// `file` is about to be applied.
    fn applying(&self, _file: &CandidateFile) {}

    /// `file` was applied, or failed with `error`.
    fn finished(&self, _file: &CandidateFile, _error: Option<&ExecutionError>) {}

    /// The whole batch was processed.
    fn completed(&self, _report: &MigrationReport) {}

    /// A rollback from `from` to `to` was requested.
    fn rollback_announced(&self, _from: Sequence, _to: Sequence) {}
}

/// Progress observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl MigrationProgress for NoProgress {}

/// Immutable per-run settings shared by every file of the batch.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    /// Sequence assigned to the whole batch.
    pub sequence: Sequence,
    /// Whether per-file failures are tolerated.
    pub ignore_errors: bool,
    /// When the batch started.
    pub started_at: DateTime<Utc>,
}

/// Result of a migrate run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// No pending files; nothing was written.
    UpToDate,
    /// A batch was processed.
    Completed(MigrationReport),
}

impl MigrationOutcome {
    /// Records written by the run.
    #[must_use]
    pub fn records(&self) -> &[MigrationRecord] {
        match self {
            Self::UpToDate => &[],
            Self::Completed(report) => &report.records,
        }
    }
}

/// Summary of a processed batch.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Batch sequence.
    pub sequence: Sequence,
    /// Records written, in application order.
    pub records: Vec<MigrationRecord>,
    /// Wall-clock duration of the batch.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl MigrationReport {
    /// Number of files processed.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.records.len()
    }

    /// Number of files that applied successfully.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.records.iter().filter(|r| r.is_successful()).count()
    }

    /// Number of tolerated failures.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.processed() - self.applied()
    }
}

/// Read-only view of what a rollback of the latest batch would touch.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackPlan {
    /// Latest recorded sequence.
    pub from: Sequence,
    /// Sequence a rollback would return to.
    pub to: Sequence,
    /// Records of the latest batch, most recent first.
    pub records: Vec<MigrationRecord>,
}

/// Discovery state of one configured directory.
#[derive(Debug, Clone)]
pub struct DirectoryStatus {
    /// Directory as configured.
    pub path: PathBuf,
    /// Normalized key used in records.
    pub key: String,
    /// Latest recorded identifier, if any.
    pub latest: Option<Identifier>,
    /// Pending files, in application order.
    pub pending: Vec<CandidateFile>,
}

/// Orchestrates migrate and rollback over the configured directories.
pub struct MigrationManager {
    directories: Vec<PathBuf>,
    ignore_errors: bool,
    migration_timeout: Duration,
    discoverer: Discoverer,
    store: Arc<dyn RecordStore>,
    executor: Arc<dyn MigrationExecutor>,
    normalizer: Arc<dyn PathNormalizer>,
}

impl MigrationManager {
    /// Start building a manager from a configuration.
    #[must_use]
    pub fn builder(config: &MigrationConfig) -> MigrationManagerBuilder {
        MigrationManagerBuilder::new(config)
    }

    /// Connect to the configured database and wire the SQL record store and
    /// the default executors (`sql` statements, `sh` scripts).
    pub async fn connect(config: &MigrationConfig) -> Result<Self> {
        let pool = DatabasePool::connect(config).await?;
        let store = SqlRecordStore::new(pool.clone(), config);

        let sql: Arc<dyn MigrationExecutor> =
            Arc::new(SqlExecutor::new(pool, config.use_transactions));
        let script: Arc<dyn MigrationExecutor> = Arc::new(
            ScriptExecutor::new(&config.script_interpreter)
                .with_database_url(&config.database_url),
        );
        let router = ExtensionRouter::new().route("sql", sql).route("sh", script);

        Self::builder(config)
            .store(Arc::new(store))
            .executor(Arc::new(router))
            .build()
    }

    /// Configured directories, in application order.
    #[must_use]
    pub fn directories(&self) -> &[PathBuf] {
        &self.directories
    }

    /// Whether per-file failures are tolerated.
    #[must_use]
    pub fn ignore_errors(&self) -> bool {
        self.ignore_errors
    }

    /// The record store in use.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Latest recorded sequence, `0` when nothing has been recorded.
    ///
    /// Read-only: the records table is not created, and a failed lookup
    /// (e.g. the table does not exist yet) counts as `0`.
    pub async fn latest_sequence(&self) -> Result<Sequence> {
        match self.store.latest_sequence().await {
            Ok(sequence) => Ok(sequence),
            Err(err) => {
                warn!(error = %err, "Latest sequence lookup failed, treating as no batches");
                Ok(0)
            }
        }
    }

    /// Every directory's baseline and pending files, without applying
    /// anything or creating the records table. Fails on the first missing
    /// directory.
    pub async fn status(&self) -> Result<Vec<DirectoryStatus>> {
        for dir in &self.directories {
            if let Err(err) = ensure_directory(dir).await {
                error!(directory = %dir.display(), "Directory not found");
                return Err(err);
            }
        }

        let mut statuses = Vec::with_capacity(self.directories.len());
        for dir in &self.directories {
            let key = self.normalizer.normalize(dir);
            let latest = self.baseline(&key).await;
            let pending = self.discoverer.discover(dir, &key, latest).await?;
            statuses.push(DirectoryStatus {
                path: dir.clone(),
                key,
                latest,
                pending,
            });
        }
        Ok(statuses)
    }

    /// Pending files across all directories, deduplicated, in application
    /// order.
    pub async fn pending(&self) -> Result<Vec<CandidateFile>> {
        let discovered = self
            .status()
            .await?
            .into_iter()
            .flat_map(|status| status.pending)
            .collect();
        Ok(deduplicate(discovered))
    }

    /// Apply every pending file under one new batch sequence.
    pub async fn migrate(&self, progress: &dyn MigrationProgress) -> Result<MigrationOutcome> {
        info!(directories = ?self.directories, "Starting migration");

        let pending = self.pending().await?;
        if pending.is_empty() {
            info!("Everything is up to date");
            return Ok(MigrationOutcome::UpToDate);
        }

        self.store.ensure().await?;
        let ctx = RunContext {
            sequence: self.store.next_sequence().await?,
            ignore_errors: self.ignore_errors,
            started_at: Utc::now(),
        };
        let start = Instant::now();

        info!(
            files = pending.len(),
            sequence = ctx.sequence,
            "Applying pending migrations"
        );
        progress.started(pending.len(), ctx.sequence);

        let mut records = Vec::with_capacity(pending.len());
        for file in &pending {
            records.push(self.process(&ctx, file, progress).await?);
        }

        let report = MigrationReport {
            sequence: ctx.sequence,
            records,
            elapsed: start.elapsed(),
        };

        progress.completed(&report);
        info!(
            sequence = report.sequence,
            processed = report.processed(),
            skipped = report.skipped(),
            started_at = %ctx.started_at.to_rfc3339(),
            "Finished, {} files imported",
            report.processed()
        );

        Ok(MigrationOutcome::Completed(report))
    }

    /// Announce a rollback of the latest batch.
    ///
    /// Reversal is not supported: this computes the target and returns
    /// [`MigrationError::RollbackNotImplemented`] without touching the
    /// records or the database.
    pub async fn rollback(&self, progress: &dyn MigrationProgress) -> Result<()> {
        let from = self.latest_sequence().await?;
        if from == 0 {
            return Err(MigrationError::NothingToRollBack);
        }
        let to = from - 1;

        info!(from, to, "Rollback from sequence {} to {}", from, to);
        progress.rollback_announced(from, to);

        warn!(from, to, "Rollback is not implemented; records left untouched");
        Err(MigrationError::RollbackNotImplemented { from, to })
    }

    /// What a rollback of the latest batch would touch, or `None` when
    /// nothing has been recorded.
    pub async fn rollback_plan(&self) -> Result<Option<RollbackPlan>> {
        let from = self.latest_sequence().await?;
        if from == 0 {
            return Ok(None);
        }

        let mut records = self.store.records_in_sequence(from).await?;
        records.reverse();

        Ok(Some(RollbackPlan {
            from,
            to: from - 1,
            records,
        }))
    }

    /// Latest recorded identifier of a directory. Lookup failures count as
    /// "no baseline".
    async fn baseline(&self, key: &str) -> Option<Identifier> {
        match self.store.latest_identifier(key).await {
            Ok(latest) => latest,
            Err(err) => {
                warn!(
                    directory = key,
                    error = %err,
                    "Latest identifier lookup failed, treating directory as having no baseline"
                );
                None
            }
        }
    }

    async fn process(
        &self,
        ctx: &RunContext,
        file: &CandidateFile,
        progress: &dyn MigrationProgress,
    ) -> Result<MigrationRecord> {
        progress.applying(file);
        debug!(file = %file.filename, directory = %file.directory, "Importing file");

        let start = Instant::now();
        let result = match tokio::time::timeout(self.migration_timeout, self.executor.apply(file))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout(self.migration_timeout)),
        };
        progress.finished(file, result.as_ref().err());

        let record = MigrationRecord::applied(
            &file.directory,
            file.identifier,
            &file.filename,
            ctx.sequence,
        );

        let record = match result {
            Ok(()) => {
                info!(
                    file = %file.filename,
                    identifier = %file.identifier,
                    execution_time_ms = start.elapsed().as_millis() as u64,
                    "Migration applied"
                );
                record
            }
            Err(source) if ctx.ignore_errors => {
                warn!(
                    file = %file.filename,
                    error = %source,
                    "Migration failed, error ignored and file marked as processed"
                );
                record.skipped(source.to_string())
            }
            Err(source) => {
                error!(file = %file.filename, error = %source, "Migration failed, aborting run");
                return Err(MigrationError::Failed {
                    file: file.filename.clone(),
                    source,
                });
            }
        };

        self.store.record(&record).await?;
        Ok(record)
    }
}

impl std::fmt::Debug for MigrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationManager")
            .field("directories", &self.directories)
            .field("ignore_errors", &self.ignore_errors)
            .field("migration_timeout", &self.migration_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MigrationManager`]; the store and executor are required.
pub struct MigrationManagerBuilder {
    directories: Vec<PathBuf>,
    ignore_errors: bool,
    migration_timeout: Duration,
    file_prefix: String,
    store: Option<Arc<dyn RecordStore>>,
    executor: Option<Arc<dyn MigrationExecutor>>,
    normalizer: Option<Arc<dyn PathNormalizer>>,
}

impl MigrationManagerBuilder {
    /// Seed the builder from a configuration.
    #[must_use]
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            directories: config.directories.clone(),
            ignore_errors: config.ignore_errors,
            migration_timeout: config.migration_timeout,
            file_prefix: config.file_prefix.clone(),
            store: None,
            executor: None,
            normalizer: None,
        }
    }

    /// Set the record store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the executor.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn MigrationExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the path normalizer (defaults to [`LexicalPathNormalizer`]).
    #[must_use]
    pub fn normalizer(mut self, normalizer: Arc<dyn PathNormalizer>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Override whether failures are tolerated.
    #[must_use]
    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    /// Build the manager.
    pub fn build(self) -> Result<MigrationManager> {
        let store = self
            .store
            .ok_or_else(|| MigrationError::config("a record store is required"))?;
        let executor = self
            .executor
            .ok_or_else(|| MigrationError::config("an executor is required"))?;
        let normalizer = self
            .normalizer
            .unwrap_or_else(|| Arc::new(LexicalPathNormalizer::new()));

        Ok(MigrationManager {
            directories: self.directories,
            ignore_errors: self.ignore_errors,
            migration_timeout: self.migration_timeout,
            discoverer: Discoverer::new(IdentifierParser::new(&self.file_prefix)?),
            store,
            executor,
            normalizer,
        })
    }
}
