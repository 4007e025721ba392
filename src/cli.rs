//! CLI argument definitions using clap.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dirmigrate_core::MigrationConfig;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::commands;

/// Configuration files picked up from the working directory when `--config`
/// is not given.
const DEFAULT_CONFIG_FILES: [&str; 3] = ["dirmigrate.yaml", "dirmigrate.yml", "dirmigrate.toml"];

/// dirmigrate - apply versioned migration files from ordered directories
#[derive(Parser, Debug)]
#[command(name = "dirmigrate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Increase output verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (YAML or TOML)
    #[arg(short, long, env = "DIRMIGRATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Database URL
    #[arg(long, env = "DATABASE_URL", hide_env_values = true, global = true)]
    pub database_url: Option<String>,

    /// Migration directory, in application order (repeatable; replaces the
    /// configured directories)
    #[arg(short = 'd', long = "dir", value_name = "PATH", global = true)]
    pub dirs: Vec<PathBuf>,
}

impl GlobalArgs {
    /// Effective configuration: defaults, then the configuration file, then
    /// environment and flags.
    pub fn load_config(&self) -> Result<MigrationConfig> {
        let mut config = match self.config_file() {
            Some(path) => {
                debug!(path = %path.display(), "Loading configuration file");
                MigrationConfig::from_file(&path)
                    .with_context(|| format!("Failed to load {}", path.display()))?
            }
            None => MigrationConfig::default(),
        };

        if let Some(ref url) = self.database_url {
            config.set_database_url(url);
        }
        if !self.dirs.is_empty() {
            config.directories.clone_from(&self.dirs);
        }

        config.validate()?;
        Ok(config)
    }

    fn config_file(&self) -> Option<PathBuf> {
        self.config.clone().or_else(|| {
            DEFAULT_CONFIG_FILES
                .iter()
                .map(Path::new)
                .find(|p| p.is_file())
                .map(Path::to_path_buf)
        })
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the configured directories and settings
    Info(commands::info::InfoArgs),

    /// Apply pending migration files
    Migrate(commands::migrate::MigrateArgs),

    /// Announce a rollback of the latest batch (not supported)
    Rollback(commands::rollback::RollbackArgs),

    /// Show the latest identifier and pending files per directory
    Status(commands::status::StatusArgs),

    /// Create a new migration file with the next identifier
    New(commands::new::NewArgs),

    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        let global = self.global;
        match self.command {
            Commands::Info(args) => commands::info::execute(args, &global).await,
            Commands::Migrate(args) => commands::migrate::execute(args, &global).await,
            Commands::Rollback(args) => commands::rollback::execute(args, &global).await,
            Commands::Status(args) => commands::status::execute(args, &global).await,
            Commands::New(args) => commands::new::execute(args, &global).await,
            Commands::Config(args) => commands::config::execute(args, &global).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "dirmigrate",
            "migrate",
            "--ignore-errors",
            "-d",
            "db/a",
            "--dir",
            "db/b",
            "--database-url",
            "sqlite://x.db",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.global.verbose, 2);
        assert_eq!(cli.global.dirs, vec![PathBuf::from("db/a"), PathBuf::from("db/b")]);
        assert!(matches!(cli.command, Commands::Migrate(ref args) if args.ignore_errors));
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dirmigrate.yaml");
        std::fs::write(
            &path,
            "database_url: postgres://localhost/app\ndirectories: [from_file]\nfile_prefix: M\n",
        )
        .unwrap();

        let global = GlobalArgs {
            verbose: 0,
            json: false,
            config: Some(path),
            database_url: Some("sqlite://override.db".to_string()),
            dirs: vec![PathBuf::from("from_flag")],
        };
        let config = global.load_config().unwrap();

        assert_eq!(config.database_url, "sqlite://override.db");
        assert_eq!(config.database_type, dirmigrate_core::DatabaseType::SQLite);
        assert_eq!(config.directories, vec![PathBuf::from("from_flag")]);
        assert_eq!(config.file_prefix, "M");
    }
}
