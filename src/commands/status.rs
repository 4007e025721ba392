//! Status command - latest identifier and pending files per directory.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use crate::cli::GlobalArgs;
use crate::commands::migrate::PendingFile;
use crate::output::{self, CommandResult, OutputFormat};

/// Arguments for the status command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// List every pending file, not just the counts
    #[arg(long)]
    pub files: bool,
}

/// Status output.
#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub latest_sequence: i64,
    pub pending: usize,
    pub directories: Vec<DirectoryRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PendingFile>,
}

/// One directory in the status table.
#[derive(Debug, Serialize, Tabled)]
pub struct DirectoryRow {
    #[tabled(rename = "Directory")]
    pub directory: String,
    #[tabled(rename = "Latest", display_with = "display_latest")]
    pub latest: Option<i64>,
    #[tabled(rename = "Pending")]
    pub pending: usize,
}

fn display_latest(latest: &Option<i64>) -> String {
    latest.map_or_else(|| "-".to_string(), |id| id.to_string())
}

/// Execute the status command.
pub async fn execute(args: StatusArgs, global: &GlobalArgs) -> Result<()> {
    let format = OutputFormat::from_json_flag(global.json);
    match run(args, global, format).await {
        Ok(()) => Ok(()),
        Err(err) => output::fail(format, err),
    }
}

async fn run(args: StatusArgs, global: &GlobalArgs, format: OutputFormat) -> Result<()> {
    let config = global.load_config()?;
    config.validate_directories()?;
    let manager = super::connect(&config).await?;

    let statuses = manager.status().await?;
    let latest_sequence = manager.latest_sequence().await?;

    let directories: Vec<DirectoryRow> = statuses
        .iter()
        .map(|s| DirectoryRow {
            directory: s.key.clone(),
            latest: s.latest.map(|id| id.value()),
            pending: s.pending.len(),
        })
        .collect();
    let files: Vec<PendingFile> = if args.files {
        statuses
            .iter()
            .flat_map(|s| s.pending.iter().map(PendingFile::from))
            .collect()
    } else {
        Vec::new()
    };

    let status = StatusOutput {
        latest_sequence,
        pending: directories.iter().map(|d| d.pending).sum(),
        directories,
        files,
    };

    match format {
        OutputFormat::Json => {
            CommandResult::success(status).print(format)?;
        }
        OutputFormat::Text => {
            output::section("Migration Status");
            output::key_value("Latest sequence", &status.latest_sequence.to_string());
            output::key_value("Pending", &status.pending.to_string());
            println!();
            output::table(&status.directories);

            if !status.files.is_empty() {
                output::section("Pending Files");
                for f in &status.files {
                    println!("  ○ {} ({})", f.filename, f.directory);
                }
            }
        }
    }

    Ok(())
}
