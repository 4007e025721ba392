//! Rollback command - announce a rollback of the latest batch.
//!
//! Reversal is not supported. The command prints what the latest batch
//! contains and exits with an error.

use anyhow::Result;
use clap::Args;
use dirmigrate_core::{MigrationProgress, RollbackPlan, Sequence};
use serde::Serialize;

use crate::cli::GlobalArgs;
use crate::output::{self, CommandResult, OutputFormat};

/// Arguments for the rollback command.
#[derive(Args, Debug)]
pub struct RollbackArgs {}

#[derive(Debug, Serialize)]
struct RollbackOutput {
    plan: Option<RollbackPlan>,
}

struct Announcer {
    format: OutputFormat,
}

impl MigrationProgress for Announcer {
    fn rollback_announced(&self, from: Sequence, to: Sequence) {
        if self.format == OutputFormat::Text {
            output::info(&format!("Rollback from sequence {from} to {to}"));
        }
    }
}

/// Execute the rollback command.
pub async fn execute(_args: RollbackArgs, global: &GlobalArgs) -> Result<()> {
    let format = OutputFormat::from_json_flag(global.json);
    let config = match global.load_config() {
        Ok(config) => config,
        Err(err) => return output::fail(format, err),
    };
    let manager = match super::connect(&config).await {
        Ok(manager) => manager,
        Err(err) => return output::fail(format, err),
    };

    let plan = match manager.rollback_plan().await {
        Ok(plan) => plan,
        Err(err) => return output::fail(format, err.into()),
    };

    if format == OutputFormat::Text {
        if let Some(ref plan) = plan {
            output::section(&format!("Batch {}", plan.from));
            for record in &plan.records {
                output::key_value(
                    &record.filename,
                    &format!(
                        "{} ({})",
                        record.directory,
                        output::format_timestamp(&record.created_at)
                    ),
                );
            }
            println!();
        }
    }

    // Always an error: either nothing is recorded or reversal is unsupported.
    let Err(err) = manager.rollback(&Announcer { format }).await else {
        return Ok(());
    };

    if format == OutputFormat::Json {
        CommandResult {
            success: false,
            data: Some(RollbackOutput { plan }),
            error: Some(err.to_string()),
            message: None,
        }
        .print(format)?;
    }

    Err(err.into())
}
