//! Migration error types.

use std::path::PathBuf;

/// Result type for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Migration error type.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// A configured migration directory is missing at migrate time.
    #[error("Directory not found: {}", path.display())]
    DirectoryNotFound {
        /// The configured path that could not be found.
        path: PathBuf,
    },

    /// A migration file failed to apply and errors are not ignored.
    #[error("Migration {file} failed: {source}")]
    Failed {
        /// Basename of the failing file.
        file: String,
        /// Underlying execution failure.
        #[source]
        source: ExecutionError,
    },

    /// Rollback is announced but reversal is not supported.
    #[error("Rollback from sequence {from} to {to} is not implemented")]
    RollbackNotImplemented {
        /// Latest applied sequence.
        from: i64,
        /// Target sequence.
        to: i64,
    },

    /// Nothing has been recorded yet.
    #[error("Nothing to roll back: no migrations have been recorded")]
    NothingToRollBack,

    /// Record store error.
    #[error("Record store error: {0}")]
    Store(String),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout error.
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl MigrationError {
    /// Create a record store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a missing-directory error.
    pub fn directory_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DirectoryNotFound { path: path.into() }
    }

    /// Whether the error terminated a run before any file was touched.
    #[must_use]
    pub fn is_pre_flight(&self) -> bool {
        matches!(self, Self::DirectoryNotFound { .. } | Self::Config(_))
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(e) => Self::Config(e.to_string()),
            sqlx::Error::Io(e) => Self::Io(e),
            sqlx::Error::PoolTimedOut => Self::Timeout("Connection pool timed out".to_string()),
            sqlx::Error::PoolClosed => Self::Connection("Connection pool is closed".to_string()),
            _ => Self::Store(err.to_string()),
        }
    }
}

impl From<serde_yaml::Error> for MigrationError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<toml::de::Error> for MigrationError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Failure of a single migration file.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The file could not be read.
    #[error("failed to read migration file: {0}")]
    Read(#[from] std::io::Error),

    /// A SQL statement failed.
    #[error("SQL execution error: {0}")]
    Sql(String),

    /// A script exited unsuccessfully.
    #[error("script exited with {status}: {stderr}")]
    Script {
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// No executor handles this file extension.
    #[error("no executor registered for extension `{0}`")]
    UnsupportedExtension(String),

    /// Applying the file took too long.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Any other cause.
    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for ExecutionError {
    fn from(err: sqlx::Error) -> Self {
        Self::Sql(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrationError::directory_not_found("/b");
        assert_eq!(err.to_string(), "Directory not found: /b");

        let err = MigrationError::RollbackNotImplemented { from: 3, to: 2 };
        assert!(err.to_string().contains("from sequence 3 to 2"));

        let err = MigrationError::Failed {
            file: "V_2_add.sql".to_string(),
            source: ExecutionError::Sql("syntax error".to_string()),
        };
        assert!(err.to_string().contains("V_2_add.sql"));
        assert!(err.to_string().contains("syntax error"));
    }

    #[test]
    fn test_error_pre_flight() {
        assert!(MigrationError::directory_not_found("/b").is_pre_flight());
        assert!(MigrationError::config("bad").is_pre_flight());
        assert!(!MigrationError::store("down").is_pre_flight());
        assert!(!MigrationError::NothingToRollBack.is_pre_flight());
    }

    #[test]
    fn test_error_constructors() {
        let err = MigrationError::connection("connection failed");
        assert!(matches!(err, MigrationError::Connection(_)));

        let err = MigrationError::store("query failed");
        assert!(matches!(err, MigrationError::Store(_)));

        let err = MigrationError::config("invalid config");
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError::Script {
            status: "exit status: 3".to_string(),
            stderr: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "script exited with exit status: 3: boom");
        assert!(ExecutionError::UnsupportedExtension("py".to_string())
            .to_string()
            .contains("`py`"));
    }
}
