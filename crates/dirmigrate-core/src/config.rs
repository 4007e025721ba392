//! Migration configuration.

use crate::error::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Database type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// PostgreSQL database.
    #[default]
    PostgreSQL,
    /// SQLite database.
    SQLite,
}

impl DatabaseType {
    /// Parse from a database URL.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if url.starts_with("sqlite://") || url.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PostgreSQL => write!(f, "postgresql"),
            Self::SQLite => write!(f, "sqlite"),
        }
    }
}

/// Migration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Database type (auto-detected from the URL when possible).
    pub database_type: DatabaseType,

    /// Schema name for the records table (PostgreSQL only).
    pub schema: String,

    /// Records table name.
    pub table_name: String,

    /// Directories to scan, in application order.
    pub directories: Vec<PathBuf>,

    /// Tolerate per-file failures and keep going.
    pub ignore_errors: bool,

    /// Literal prefix of migration filenames (`<prefix>_<digits>_<description>.<ext>`).
    pub file_prefix: String,

    /// Whether to run SQL migrations in a transaction.
    pub use_transactions: bool,

    /// Interpreter used for script migrations.
    pub script_interpreter: String,

    /// Connection timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Per-file execution timeout.
    #[serde(with = "humantime_serde")]
    pub migration_timeout: Duration,

    /// Maximum connection pool size.
    pub max_connections: u32,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_table_name() -> String {
    "_dirmigrate_migrations".to_string()
}

fn default_file_prefix() -> String {
    "V".to_string()
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            database_type: DatabaseType::PostgreSQL,
            schema: default_schema(),
            table_name: default_table_name(),
            directories: Vec::new(),
            ignore_errors: false,
            file_prefix: default_file_prefix(),
            use_transactions: true,
            script_interpreter: "sh".to_string(),
            connect_timeout: Duration::from_secs(30),
            migration_timeout: Duration::from_secs(300),
            max_connections: 5,
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> MigrationConfigBuilder {
        MigrationConfigBuilder::new()
    }

    /// Load a configuration file. The format is chosen by extension:
    /// `.yaml`/`.yml` or `.toml`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::config(format!("cannot read {}: {e}", path.display()))
        })?;

        let mut config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            other => {
                return Err(MigrationError::config(format!(
                    "unsupported configuration format: {}",
                    other.unwrap_or("<none>")
                )))
            }
        };

        if let Some(db_type) = DatabaseType::from_url(&config.database_url) {
            config.database_type = db_type;
        }
        config.validate()?;
        Ok(config)
    }

    /// Replace the database URL, re-detecting the database type.
    pub fn set_database_url(&mut self, url: impl Into<String>) {
        self.database_url = url.into();
        if let Some(db_type) = DatabaseType::from_url(&self.database_url) {
            self.database_type = db_type;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.table_name.is_empty() {
            return Err(MigrationError::config("Table name is required"));
        }

        if self.max_connections == 0 {
            return Err(MigrationError::config(
                "Max connections must be greater than 0",
            ));
        }

        if self.file_prefix.is_empty() || self.file_prefix.contains(['_', '/', '\\']) {
            return Err(MigrationError::config(format!(
                "Invalid file prefix `{}`: must be non-empty and must not contain `_` or path separators",
                self.file_prefix
            )));
        }

        if self.script_interpreter.is_empty() {
            return Err(MigrationError::config("Script interpreter is required"));
        }

        Ok(())
    }

    /// Validate the settings needed to talk to a database.
    pub fn validate_database(&self) -> Result<()> {
        if self.database_url.is_empty() {
            return Err(MigrationError::config(
                "Database URL is required (config file, DATABASE_URL or --database-url)",
            ));
        }
        Ok(())
    }

    /// Validate that there is something to scan.
    pub fn validate_directories(&self) -> Result<()> {
        if self.directories.is_empty() {
            return Err(MigrationError::config("At least one migration directory is required"));
        }
        Ok(())
    }

    /// Get the full table name with schema.
    #[must_use]
    pub fn full_table_name(&self) -> String {
        match self.database_type {
            DatabaseType::PostgreSQL => format!("{}.{}", self.schema, self.table_name),
            DatabaseType::SQLite => self.table_name.clone(),
        }
    }
}

/// Builder for migration configuration.
#[derive(Debug, Default)]
pub struct MigrationConfigBuilder {
    config: MigrationConfig,
}

impl MigrationConfigBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database URL.
    #[must_use]
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.set_database_url(url);
        self
    }

    /// Set the database type.
    #[must_use]
    pub fn database_type(mut self, db_type: DatabaseType) -> Self {
        self.config.database_type = db_type;
        self
    }

    /// Set the schema name.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.config.schema = schema.into();
        self
    }

    /// Set the records table name.
    #[must_use]
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.config.table_name = name.into();
        self
    }

    /// Append a directory to scan.
    #[must_use]
    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.directories.push(dir.into());
        self
    }

    /// Append several directories to scan.
    #[must_use]
    pub fn directories(mut self, dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.config.directories.extend(dirs.into_iter().map(Into::into));
        self
    }

    /// Tolerate per-file failures.
    #[must_use]
    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.config.ignore_errors = ignore;
        self
    }

    /// Set the filename prefix.
    #[must_use]
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    /// Enable or disable transactions.
    #[must_use]
    pub fn use_transactions(mut self, use_tx: bool) -> Self {
        self.config.use_transactions = use_tx;
        self
    }

    /// Set the script interpreter.
    #[must_use]
    pub fn script_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.config.script_interpreter = interpreter.into();
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the per-file migration timeout.
    #[must_use]
    pub fn migration_timeout(mut self, timeout: Duration) -> Self {
        self.config.migration_timeout = timeout;
        self
    }

    /// Set maximum connections.
    #[must_use]
    pub fn max_connections(mut self, max: u32) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<MigrationConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_database_type_from_url() {
        assert_eq!(
            DatabaseType::from_url("postgres://localhost/db"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_url("postgresql://localhost/db"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_url("sqlite://test.db"),
            Some(DatabaseType::SQLite)
        );
        assert_eq!(
            DatabaseType::from_url("sqlite:test.db"),
            Some(DatabaseType::SQLite)
        );
        assert_eq!(DatabaseType::from_url("mysql://localhost/db"), None);
    }

    #[test]
    fn test_config_builder() {
        let config = MigrationConfig::builder()
            .database_url("sqlite://app.db")
            .table_name("migrations")
            .directory("/a")
            .directory("/b")
            .ignore_errors(true)
            .max_connections(2)
            .build()
            .unwrap();

        assert_eq!(config.database_type, DatabaseType::SQLite);
        assert_eq!(config.table_name, "migrations");
        assert_eq!(config.directories, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert!(config.ignore_errors);
        assert_eq!(config.max_connections, 2);
    }

    #[test]
    fn test_config_validation() {
        assert!(MigrationConfig::builder().table_name("").build().is_err());
        assert!(MigrationConfig::builder().max_connections(0).build().is_err());
        assert!(MigrationConfig::builder().file_prefix("").build().is_err());
        assert!(MigrationConfig::builder().file_prefix("V_X").build().is_err());
        assert!(MigrationConfig::builder().file_prefix("R").build().is_ok());

        let config = MigrationConfig::default();
        assert!(config.validate_database().is_err());
        assert!(config.validate_directories().is_err());
    }

    #[test]
    fn test_full_table_name() {
        let config = MigrationConfig {
            database_type: DatabaseType::PostgreSQL,
            schema: "app".to_string(),
            table_name: "migrations".to_string(),
            ..Default::default()
        };
        assert_eq!(config.full_table_name(), "app.migrations");

        let config = MigrationConfig {
            database_type: DatabaseType::SQLite,
            table_name: "migrations".to_string(),
            ..Default::default()
        };
        assert_eq!(config.full_table_name(), "migrations");
    }

    #[test]
    fn test_default_config() {
        let config = MigrationConfig::default();
        assert_eq!(config.schema, "public");
        assert_eq!(config.table_name, "_dirmigrate_migrations");
        assert_eq!(config.file_prefix, "V");
        assert_eq!(config.max_connections, 5);
        assert!(config.use_transactions);
        assert!(!config.ignore_errors);
        assert!(config.directories.is_empty());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "database_url: sqlite://data.db\ndirectories:\n  - /srv/a\n  - /srv/b\nignore_errors: true\nmigration_timeout: 2m"
        )
        .unwrap();

        let config = MigrationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database_type, DatabaseType::SQLite);
        assert_eq!(config.directories.len(), 2);
        assert!(config.ignore_errors);
        assert_eq!(config.migration_timeout, Duration::from_secs(120));
        assert_eq!(config.table_name, "_dirmigrate_migrations");
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "database_url = \"postgres://localhost/app\"\ndirectories = [\"/srv/a\"]\nfile_prefix = \"M\""
        )
        .unwrap();

        let config = MigrationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database_type, DatabaseType::PostgreSQL);
        assert_eq!(config.file_prefix, "M");
        assert_eq!(config.directories, vec![PathBuf::from("/srv/a")]);
    }

    #[test]
    fn test_from_file_rejects_unknown_format() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = MigrationConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }
}
