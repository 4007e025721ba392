//! Info command - show the configured directories and settings.

use anyhow::Result;
use clap::Args;
use dirmigrate_core::{LexicalPathNormalizer, PathNormalizer};
use serde::Serialize;

use crate::cli::GlobalArgs;
use crate::output::{self, CommandResult, OutputFormat};

/// Arguments for the info command.
#[derive(Args, Debug)]
pub struct InfoArgs {}

/// Info output.
#[derive(Debug, Serialize)]
pub struct InfoOutput {
    pub name: String,
    pub version: String,
    pub database_type: String,
    pub table: String,
    pub file_prefix: String,
    pub ignore_errors: bool,
    pub directories: Vec<DirectoryInfo>,
}

/// A configured directory.
#[derive(Debug, Serialize)]
pub struct DirectoryInfo {
    pub path: String,
    /// Key the directory's records are stored under.
    pub key: String,
    pub exists: bool,
}

/// Execute the info command.
pub async fn execute(_args: InfoArgs, global: &GlobalArgs) -> Result<()> {
    let format = OutputFormat::from_json_flag(global.json);
    let config = match global.load_config() {
        Ok(config) => config,
        Err(err) => return output::fail(format, err),
    };

    let normalizer = LexicalPathNormalizer::new();
    let mut directories = Vec::with_capacity(config.directories.len());
    for dir in &config.directories {
        directories.push(DirectoryInfo {
            path: dir.display().to_string(),
            key: normalizer.normalize(dir),
            exists: tokio::fs::metadata(dir)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
        });
    }

    let info = InfoOutput {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database_type: config.database_type.to_string(),
        table: config.full_table_name(),
        file_prefix: config.file_prefix.clone(),
        ignore_errors: config.ignore_errors,
        directories,
    };

    match format {
        OutputFormat::Json => {
            CommandResult::success(info).print(format)?;
        }
        OutputFormat::Text => {
            output::section(&format!("{} v{}", info.name, info.version));
            output::key_value("Database", &info.database_type);
            output::key_value("Table", &info.table);
            output::key_value("File prefix", &info.file_prefix);
            output::key_value("Ignore errors", &info.ignore_errors.to_string());

            output::section("Directories");
            if info.directories.is_empty() {
                println!("  (none configured)");
            }
            for dir in &info.directories {
                output::status(&format!("{} ({})", dir.path, dir.key), dir.exists);
            }
        }
    }

    Ok(())
}
