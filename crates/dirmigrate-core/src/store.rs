//! Persistence of migration records.
//!
//! The store is append-only: records are written once per processed file
//! and never updated. Two lookups drive discovery and batching, the latest
//! identifier of a directory and the latest sequence overall.

use crate::config::{DatabaseType, MigrationConfig};
use crate::error::{MigrationError, Result};
use crate::identifier::Identifier;
use crate::pool::DatabasePool;
use crate::record::{MigrationRecord, RecordStatus, Sequence};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::Row;
use tokio::sync::RwLock;
use tracing::debug;

/// Append-only store of migration records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create the backing storage if it does not exist yet.
    async fn ensure(&self) -> Result<()>;

    /// Highest identifier recorded for a directory.
    async fn latest_identifier(&self, directory: &str) -> Result<Option<Identifier>>;

    /// Highest sequence recorded anywhere, `0` when empty.
    async fn latest_sequence(&self) -> Result<Sequence>;

    /// Sequence to use for a new batch.
    ///
    /// Computed as `latest + 1` without a reservation, so it is only correct
    /// with a single writer.
    async fn next_sequence(&self) -> Result<Sequence> {
        Ok(self.latest_sequence().await? + 1)
    }

    /// Append a record. Durable once this returns.
    async fn record(&self, record: &MigrationRecord) -> Result<()>;

    /// All records, ordered by sequence then insertion.
    async fn records(&self) -> Result<Vec<MigrationRecord>>;

    /// Records of one batch, in insertion order.
    async fn records_in_sequence(&self, sequence: Sequence) -> Result<Vec<MigrationRecord>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .filter(|r| r.sequence == sequence)
            .collect())
    }
}

/// Record store backed by a SQL table.
#[derive(Debug, Clone)]
pub struct SqlRecordStore {
    pool: DatabasePool,
    database_type: DatabaseType,
    schema: String,
    table_name: String,
    table: String,
}

impl SqlRecordStore {
    /// Create a store using the table settings of `config`.
    #[must_use]
    pub fn new(pool: DatabasePool, config: &MigrationConfig) -> Self {
        Self {
            database_type: pool.database_type(),
            pool,
            schema: config.schema.clone(),
            table_name: config.table_name.clone(),
            table: config.full_table_name(),
        }
    }

    /// Fully qualified table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn init_statements(&self) -> Vec<String> {
        let table = &self.table;
        let name = &self.table_name;
        match self.database_type {
            DatabaseType::PostgreSQL => vec![
                format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema),
                format!(
                    r#"CREATE TABLE IF NOT EXISTS {table} (
                        id BIGSERIAL PRIMARY KEY,
                        directory TEXT NOT NULL,
                        identifier BIGINT NOT NULL,
                        filename TEXT NOT NULL,
                        sequence BIGINT NOT NULL,
                        status VARCHAR(20) NOT NULL DEFAULT 'applied',
                        error TEXT,
                        created_at TEXT NOT NULL
                    )"#
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{name}_directory ON {table}(directory, identifier)"
                ),
                format!("CREATE INDEX IF NOT EXISTS idx_{name}_sequence ON {table}(sequence)"),
            ],
            DatabaseType::SQLite => vec![
                format!(
                    r#"CREATE TABLE IF NOT EXISTS {table} (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        directory TEXT NOT NULL,
                        identifier INTEGER NOT NULL,
                        filename TEXT NOT NULL,
                        sequence INTEGER NOT NULL,
                        status TEXT NOT NULL DEFAULT 'applied',
                        error TEXT,
                        created_at TEXT NOT NULL
                    )"#
                ),
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{name}_directory ON {table}(directory, identifier)"
                ),
                format!("CREATE INDEX IF NOT EXISTS idx_{name}_sequence ON {table}(sequence)"),
            ],
        }
    }

    fn select_columns(&self) -> String {
        format!(
            "SELECT directory, identifier, filename, sequence, status, error, created_at FROM {}",
            self.table
        )
    }
}

fn record_from_row(row: &AnyRow) -> Result<MigrationRecord> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MigrationError::store(format!("invalid created_at `{created_at}`: {e}")))?;

    Ok(MigrationRecord {
        directory: row.try_get("directory")?,
        identifier: Identifier::new(row.try_get("identifier")?),
        filename: row.try_get("filename")?,
        sequence: row.try_get("sequence")?,
        status: RecordStatus::parse(&status)
            .ok_or_else(|| MigrationError::store(format!("unknown record status `{status}`")))?,
        error: row.try_get("error")?,
        created_at,
    })
}

#[async_trait]
impl RecordStore for SqlRecordStore {
    async fn ensure(&self) -> Result<()> {
        for statement in self.init_statements() {
            sqlx::query(&statement).execute(self.pool.inner()).await?;
        }
        debug!(table = %self.table, "Records table ready");
        Ok(())
    }

    async fn latest_identifier(&self, directory: &str) -> Result<Option<Identifier>> {
        let sql = format!(
            "SELECT MAX(identifier) AS latest FROM {} WHERE directory = $1",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(directory)
            .fetch_one(self.pool.inner())
            .await?;
        let latest: Option<i64> = row.try_get("latest")?;
        Ok(latest.map(Identifier::new))
    }

    async fn latest_sequence(&self) -> Result<Sequence> {
        let sql = format!(
            "SELECT COALESCE(MAX(sequence), 0) AS latest FROM {}",
            self.table
        );
        let row = sqlx::query(&sql).fetch_one(self.pool.inner()).await?;
        Ok(row.try_get("latest")?)
    }

    async fn record(&self, record: &MigrationRecord) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (directory, identifier, filename, sequence, status, error, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            self.table
        );

        sqlx::query(&sql)
            .bind(&record.directory)
            .bind(record.identifier.value())
            .bind(&record.filename)
            .bind(record.sequence)
            .bind(record.status.to_string())
            .bind(&record.error)
            .bind(record.created_at.to_rfc3339())
            .execute(self.pool.inner())
            .await?;

        Ok(())
    }

    async fn records(&self) -> Result<Vec<MigrationRecord>> {
        let sql = format!("{} ORDER BY sequence, id", self.select_columns());
        let rows = sqlx::query(&sql).fetch_all(self.pool.inner()).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn records_in_sequence(&self, sequence: Sequence) -> Result<Vec<MigrationRecord>> {
        let sql = format!("{} WHERE sequence = $1 ORDER BY id", self.select_columns());
        let rows = sqlx::query(&sql)
            .bind(sequence)
            .fetch_all(self.pool.inner())
            .await?;
        rows.iter().map(record_from_row).collect()
    }
}

/// In-process record store. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<Vec<MigrationRecord>>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with existing records.
    #[must_use]
    pub fn with_records(records: Vec<MigrationRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Number of records held.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether no records are held.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn ensure(&self) -> Result<()> {
        Ok(())
    }

    async fn latest_identifier(&self, directory: &str) -> Result<Option<Identifier>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.directory == directory)
            .map(|r| r.identifier)
            .max())
    }

    async fn latest_sequence(&self) -> Result<Sequence> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .map(|r| r.sequence)
            .max()
            .unwrap_or(0))
    }

    async fn record(&self, record: &MigrationRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn records(&self) -> Result<Vec<MigrationRecord>> {
        let mut records = self.records.read().await.clone();
        records.sort_by_key(|r| r.sequence);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(dir: &str, id: i64, seq: Sequence) -> MigrationRecord {
        MigrationRecord::applied(dir, Identifier::new(id), format!("V_{id}_x.sql"), seq)
    }

    #[tokio::test]
    async fn test_memory_store_empty() {
        let store = MemoryRecordStore::new();
        assert!(store.is_empty().await);
        assert_eq!(store.latest_identifier("/a").await.unwrap(), None);
        assert_eq!(store.latest_sequence().await.unwrap(), 0);
        assert_eq!(store.next_sequence().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_memory_store_latest_per_directory() {
        let store = MemoryRecordStore::with_records(vec![
            record("/a", 1, 1),
            record("/a", 7, 2),
            record("/b", 3, 2),
        ]);

        assert_eq!(store.latest_identifier("/a").await.unwrap(), Some(Identifier::new(7)));
        assert_eq!(store.latest_identifier("/b").await.unwrap(), Some(Identifier::new(3)));
        assert_eq!(store.latest_identifier("/c").await.unwrap(), None);
        assert_eq!(store.latest_sequence().await.unwrap(), 2);
        assert_eq!(store.records_in_sequence(2).await.unwrap().len(), 2);
    }

    async fn sqlite_store(dir: &tempfile::TempDir) -> SqlRecordStore {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("records.db").display());
        let config = MigrationConfig::builder()
            .database_url(url)
            .table_name("records")
            .max_connections(1)
            .build()
            .unwrap();
        let pool = DatabasePool::connect(&config).await.unwrap();
        let store = SqlRecordStore::new(pool, &config);
        store.ensure().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_sql_store_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(&dir).await;

        assert_eq!(store.table(), "records");
        assert_eq!(store.latest_identifier("/a").await.unwrap(), None);
        assert_eq!(store.latest_sequence().await.unwrap(), 0);
        assert!(store.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sql_store_records_and_queries() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(&dir).await;

        store.record(&record("/a", 1, 1)).await.unwrap();
        store.record(&record("/a", 2, 1)).await.unwrap();
        store
            .record(&record("/b", 10, 2).skipped("boom"))
            .await
            .unwrap();

        assert_eq!(store.latest_identifier("/a").await.unwrap(), Some(Identifier::new(2)));
        assert_eq!(store.latest_identifier("/b").await.unwrap(), Some(Identifier::new(10)));
        assert_eq!(store.latest_sequence().await.unwrap(), 2);
        assert_eq!(store.next_sequence().await.unwrap(), 3);

        let all = store.records().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].filename, "V_1_x.sql");
        assert_eq!(all[2].status, RecordStatus::Skipped);
        assert_eq!(all[2].error.as_deref(), Some("boom"));

        let batch = store.records_in_sequence(1).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|r| r.directory == "/a"));
    }

    #[tokio::test]
    async fn test_sql_store_ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(&dir).await;
        store.record(&record("/a", 1, 1)).await.unwrap();
        store.ensure().await.unwrap();
        assert_eq!(store.records().await.unwrap().len(), 1);
    }
}
