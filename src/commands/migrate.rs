//! Migrate command - apply pending migration files.

use anyhow::Result;
use clap::Args;
use dirmigrate_core::{
    CandidateFile, ExecutionError, MigrationError, MigrationOutcome, MigrationProgress,
    MigrationReport, Sequence,
};
use indicatif::ProgressBar;
use serde::Serialize;

use crate::cli::GlobalArgs;
use crate::output::{self, CommandResult, OutputFormat};

/// Arguments for the migrate command.
#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Record failing files as skipped and keep going
    #[arg(long)]
    pub ignore_errors: bool,

    /// Dry run - list the files that would be applied
    #[arg(long)]
    pub dry_run: bool,
}

/// A file in a dry-run listing.
#[derive(Debug, Serialize)]
pub struct PendingFile {
    pub directory: String,
    pub identifier: i64,
    pub filename: String,
}

impl From<&CandidateFile> for PendingFile {
    fn from(file: &CandidateFile) -> Self {
        Self {
            directory: file.directory.clone(),
            identifier: file.identifier.value(),
            filename: file.filename.clone(),
        }
    }
}

/// Per-file progress on a terminal progress bar.
struct BarProgress {
    bar: ProgressBar,
}

impl MigrationProgress for BarProgress {
    fn started(&self, total: usize, sequence: Sequence) {
        self.bar.set_length(total as u64);
        self.bar.println(format!("Applying batch {sequence}"));
    }

    fn applying(&self, file: &CandidateFile) {
        self.bar.set_message(file.filename.clone());
    }

    fn finished(&self, file: &CandidateFile, error: Option<&ExecutionError>) {
        if let Some(err) = error {
            self.bar.println(format!("  ✗ {}: {err}", file.filename));
        } else {
            self.bar.println(format!("  ✓ {}", file.filename));
        }
        self.bar.inc(1);
    }

    fn completed(&self, report: &MigrationReport) {
        self.bar.finish_with_message(format!("batch {} done", report.sequence));
    }
}

/// Execute the migrate command.
pub async fn execute(args: MigrateArgs, global: &GlobalArgs) -> Result<()> {
    let format = OutputFormat::from_json_flag(global.json);
    match run(args, global, format).await {
        Ok(()) => Ok(()),
        Err(err) => output::fail(format, err),
    }
}

async fn run(args: MigrateArgs, global: &GlobalArgs, format: OutputFormat) -> Result<()> {
    let mut config = global.load_config()?;
    config.validate_directories()?;
    if args.ignore_errors {
        config.ignore_errors = true;
    }

    let manager = super::connect(&config).await?;

    if args.dry_run {
        let pending = manager.pending().await?;
        let files: Vec<PendingFile> = pending.iter().map(PendingFile::from).collect();

        match format {
            OutputFormat::Json => {
                CommandResult::success(serde_json::json!({
                    "dry_run": true,
                    "pending_count": files.len(),
                    "files": files,
                }))
                .print(format)?;
            }
            OutputFormat::Text => {
                if files.is_empty() {
                    output::success("Everything is up to date.");
                } else {
                    output::info(&format!(
                        "Dry run - {} files would be imported:",
                        files.len()
                    ));
                    for f in &files {
                        output::key_value(&f.directory, &f.filename);
                    }
                }
            }
        }
        return Ok(());
    }

    let result = match format {
        OutputFormat::Json => manager.migrate(&dirmigrate_core::NoProgress).await,
        OutputFormat::Text => {
            let progress = BarProgress {
                bar: output::progress_bar(0),
            };
            let result = manager.migrate(&progress).await;
            progress.bar.finish_and_clear();
            result
        }
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            if format == OutputFormat::Text {
                report_failure(&err);
            }
            return Err(err.into());
        }
    };

    match outcome {
        MigrationOutcome::UpToDate => {
            CommandResult::success(&outcome)
                .with_message("Everything is up to date.")
                .print(format)?;
        }
        MigrationOutcome::Completed(ref report) => {
            let message = format!("Finished, {} files imported.", report.processed());
            match format {
                OutputFormat::Json => {
                    CommandResult::success(&outcome)
                        .with_message(message)
                        .print(format)?;
                }
                OutputFormat::Text => {
                    output::success(&message);
                    output::key_value("Sequence", &report.sequence.to_string());
                    output::key_value("Applied", &report.applied().to_string());
                    output::key_value("Elapsed", &output::format_duration(report.elapsed));
                    if report.skipped() > 0 {
                        output::warning(&format!(
                            "{} files failed and were recorded as skipped:",
                            report.skipped()
                        ));
                        for record in report.records.iter().filter(|r| !r.is_successful()) {
                            output::warning(&format!(
                                "  {}: {}",
                                record.filename,
                                record.error.as_deref().unwrap_or("unknown error")
                            ));
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn report_failure(err: &MigrationError) {
    if err.is_pre_flight() {
        output::warning("No migration files were applied.");
    } else if matches!(err, MigrationError::Failed { .. }) {
        output::warning("Run aborted; files applied before the failure remain recorded.");
    }
}
