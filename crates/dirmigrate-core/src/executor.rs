//! Application of a single migration file.

use crate::discovery::CandidateFile;
use crate::error::ExecutionError;
use crate::pool::DatabasePool;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Applies the content of one migration file to the target.
#[async_trait]
pub trait MigrationExecutor: Send + Sync {
    /// Apply `file`. No retry is attempted on failure.
    async fn apply(&self, file: &CandidateFile) -> Result<(), ExecutionError>;
}

/// Runs `.sql` files against the database.
#[derive(Debug, Clone)]
pub struct SqlExecutor {
    pool: DatabasePool,
    use_transactions: bool,
}

impl SqlExecutor {
    /// Create an executor. With `use_transactions`, each file runs in one
    /// transaction and a failing statement rolls the whole file back.
    #[must_use]
    pub fn new(pool: DatabasePool, use_transactions: bool) -> Self {
        Self {
            pool,
            use_transactions,
        }
    }

    async fn execute_sql(&self, sql: &str) -> Result<(), ExecutionError> {
        sqlx::raw_sql(sql).execute(self.pool.inner()).await?;
        Ok(())
    }

    async fn execute_in_transaction(&self, sql: &str) -> Result<(), ExecutionError> {
        let mut tx = self.pool.inner().begin().await?;
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(sql)).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MigrationExecutor for SqlExecutor {
    async fn apply(&self, file: &CandidateFile) -> Result<(), ExecutionError> {
        let sql = tokio::fs::read_to_string(&file.path).await?;
        if sql.trim().is_empty() {
            debug!(file = %file.filename, "Empty SQL migration");
            return Ok(());
        }

        debug!(
            file = %file.filename,
            bytes = sql.len(),
            transactional = self.use_transactions,
            "Executing SQL migration"
        );

        // One script per file; the driver finds statement boundaries.
        if self.use_transactions {
            self.execute_in_transaction(&sql).await
        } else {
            self.execute_sql(&sql).await
        }
    }
}

/// Runs migration files as scripts through an interpreter.
///
/// The script sees `DIRMIGRATE_DIRECTORY` (the normalized directory) and,
/// when configured, `DATABASE_URL`. It runs with its own directory as the
/// working directory.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    interpreter: String,
    database_url: Option<String>,
}

impl ScriptExecutor {
    /// Create an executor running files with `interpreter`.
    #[must_use]
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            database_url: None,
        }
    }

    /// Expose the target database to scripts.
    #[must_use]
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }
}

#[async_trait]
impl MigrationExecutor for ScriptExecutor {
    async fn apply(&self, file: &CandidateFile) -> Result<(), ExecutionError> {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(&file.path)
            .env("DIRMIGRATE_DIRECTORY", &file.directory)
            .kill_on_drop(true);
        if let Some(parent) = file.path.parent() {
            command.current_dir(parent);
        }
        if let Some(ref url) = self.database_url {
            command.env("DATABASE_URL", url);
        }

        debug!(file = %file.filename, interpreter = %self.interpreter, "Running script migration");

        let output = command.output().await.map_err(|e| {
            ExecutionError::Other(format!("failed to run `{}`: {e}", self.interpreter))
        })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ExecutionError::Script {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// Dispatches files to executors by extension.
#[derive(Clone, Default)]
pub struct ExtensionRouter {
    routes: HashMap<String, Arc<dyn MigrationExecutor>>,
}

impl ExtensionRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle files with `extension` (case-insensitive) using `executor`.
    #[must_use]
    pub fn route(
        mut self,
        extension: impl AsRef<str>,
        executor: Arc<dyn MigrationExecutor>,
    ) -> Self {
        self.routes.insert(
            extension.as_ref().trim_start_matches('.').to_lowercase(),
            executor,
        );
        self
    }

    /// Registered extensions, sorted.
    #[must_use]
    pub fn extensions(&self) -> Vec<&str> {
        let mut extensions: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        extensions.sort_unstable();
        extensions
    }
}

impl std::fmt::Debug for ExtensionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRouter")
            .field("extensions", &self.extensions())
            .finish()
    }
}

#[async_trait]
impl MigrationExecutor for ExtensionRouter {
    async fn apply(&self, file: &CandidateFile) -> Result<(), ExecutionError> {
        let extension = file.extension.to_lowercase();
        match self.routes.get(&extension) {
            Some(executor) => executor.apply(file).await,
            None => Err(ExecutionError::UnsupportedExtension(extension)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use crate::identifier::Identifier;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candidate(path: &Path) -> CandidateFile {
        let filename = path.file_name().unwrap().to_string_lossy().to_string();
        let extension = path.extension().unwrap().to_string_lossy().to_string();
        CandidateFile {
            path: path.to_path_buf(),
            filename,
            directory: "/a".to_string(),
            identifier: Identifier::new(1),
            extension,
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl MigrationExecutor for Counting {
        async fn apply(&self, _file: &CandidateFile) -> Result<(), ExecutionError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_router_dispatches_by_extension() {
        let sql = Arc::new(Counting::default());
        let router = ExtensionRouter::new().route(".SQL", sql.clone());
        assert_eq!(router.extensions(), vec!["sql"]);

        router
            .apply(&candidate(Path::new("/a/V_1_x.Sql")))
            .await
            .unwrap();
        assert_eq!(sql.0.load(Ordering::SeqCst), 1);

        let err = router
            .apply(&candidate(Path::new("/a/V_1_x.py")))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::UnsupportedExtension(ref e) if e == "py"));
    }

    #[tokio::test]
    async fn test_script_executor_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("V_1_ok.sh");
        std::fs::write(&ok, "test \"$DIRMIGRATE_DIRECTORY\" = /a && touch marker\n").unwrap();
        let bad = dir.path().join("V_2_bad.sh");
        std::fs::write(&bad, "echo broken >&2\nexit 3\n").unwrap();

        let executor = ScriptExecutor::new("sh");
        executor.apply(&candidate(&ok)).await.unwrap();
        assert!(dir.path().join("marker").exists());

        let err = executor.apply(&candidate(&bad)).await.unwrap_err();
        match err {
            ExecutionError::Script { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    async fn sqlite_pool(dir: &tempfile::TempDir) -> DatabasePool {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("exec.db").display());
        let config = MigrationConfig::builder()
            .database_url(url)
            .max_connections(1)
            .build()
            .unwrap();
        DatabasePool::connect(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_sql_executor_applies_statements() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir).await;
        let file = dir.path().join("V_1_init.sql");
        std::fs::write(
            &file,
            "CREATE TABLE items (id INTEGER PRIMARY KEY);\nINSERT INTO items (id) VALUES (1);\n",
        )
        .unwrap();

        SqlExecutor::new(pool.clone(), true)
            .apply(&candidate(&file))
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(pool.inner())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_sql_executor_semicolons_in_literals_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir).await;
        let file = dir.path().join("V_1_notes.sql");
        std::fs::write(
            &file,
            "-- later; see ticket\nCREATE TABLE notes (body TEXT);\nINSERT INTO notes VALUES ('a;b');\n",
        )
        .unwrap();

        SqlExecutor::new(pool.clone(), true)
            .apply(&candidate(&file))
            .await
            .unwrap();

        let body: String = sqlx::query_scalar("SELECT body FROM notes")
            .fetch_one(pool.inner())
            .await
            .unwrap();
        assert_eq!(body, "a;b");
    }

    #[tokio::test]
    async fn test_sql_executor_rolls_back_failed_file() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir).await;
        sqlx::query("CREATE TABLE items (id INTEGER PRIMARY KEY)")
            .execute(pool.inner())
            .await
            .unwrap();

        let file = dir.path().join("V_2_bad.sql");
        std::fs::write(
            &file,
            "INSERT INTO items (id) VALUES (1);\nINSERT INTO nowhere VALUES (2);\n",
        )
        .unwrap();

        let err = SqlExecutor::new(pool.clone(), true)
            .apply(&candidate(&file))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Sql(_)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
            .fetch_one(pool.inner())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_sql_executor_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let pool = sqlite_pool(&dir).await;
        let err = SqlExecutor::new(pool, false)
            .apply(&candidate(&dir.path().join("V_9_gone.sql")))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Read(_)));
    }
}
