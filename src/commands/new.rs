//! New command - create a correctly named migration file.

use anyhow::{bail, Context, Result};
use clap::Args;
use dirmigrate_core::{Identifier, IdentifierParser};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::cli::GlobalArgs;
use crate::output::{self, CommandResult, OutputFormat};

/// Arguments for the new command.
#[derive(Args, Debug)]
pub struct NewArgs {
    /// Directory to create the file in (created if missing)
    pub directory: PathBuf,

    /// Short description, used in the filename
    pub description: String,

    /// File extension
    #[arg(long, default_value = "sql")]
    pub ext: String,
}

/// Execute the new command.
pub async fn execute(args: NewArgs, global: &GlobalArgs) -> Result<()> {
    let format = OutputFormat::from_json_flag(global.json);
    match run(args, global, format).await {
        Ok(()) => Ok(()),
        Err(err) => output::fail(format, err),
    }
}

async fn run(args: NewArgs, global: &GlobalArgs, format: OutputFormat) -> Result<()> {
    let config = global.load_config()?;
    let parser = IdentifierParser::new(&config.file_prefix)?;

    if args.description.trim().is_empty() {
        bail!("Description must not be empty");
    }

    tokio::fs::create_dir_all(&args.directory)
        .await
        .with_context(|| format!("Failed to create {}", args.directory.display()))?;

    let identifier = next_identifier(&parser, &args.directory).await?;
    let filename = checked_filename(&parser, identifier, &args.description, &args.ext)?;
    let path = args.directory.join(&filename);

    let template = template(&args.ext, &args.description);
    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
    {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            bail!("{} already exists", path.display())
        }
        Err(err) => return Err(err).context(format!("Failed to create {}", path.display())),
    };
    file.write_all(template.as_bytes()).await?;
    file.flush().await?;

    debug!(path = %path.display(), identifier = %identifier, "Migration file created");

    CommandResult::success(serde_json::json!({
        "path": path.display().to_string(),
        "filename": filename,
        "identifier": identifier.value(),
    }))
    .with_message(format!("Created {}", path.display()))
    .print(format)?;

    Ok(())
}

/// One past the highest identifier already present in `dir`.
async fn next_identifier(parser: &IdentifierParser, dir: &Path) -> Result<Identifier> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut highest = 0_i64;

    while let Some(entry) = entries.next_entry().await? {
        if let Some(id) = entry.file_name().to_str().and_then(|n| parser.identifier(n)) {
            highest = highest.max(id.value());
        }
    }

    highest
        .checked_add(1)
        .map(Identifier::new)
        .context("Identifier space exhausted")
}

/// Build the filename and make sure discovery would pick it up again.
fn checked_filename(
    parser: &IdentifierParser,
    identifier: Identifier,
    description: &str,
    ext: &str,
) -> Result<String> {
    let filename = parser.filename(identifier, description, ext);
    if Path::new(&filename).file_name().and_then(|n| n.to_str()) != Some(filename.as_str()) {
        bail!("`{filename}` is not a plain file name; drop path separators from the description");
    }
    if parser.parse(&filename).map(|parsed| parsed.identifier) != Some(identifier) {
        bail!(
            "`{filename}` does not follow the {}_<n>_<description>.<ext> convention",
            parser.prefix()
        );
    }
    Ok(filename)
}

fn template(ext: &str, description: &str) -> String {
    match ext.trim_start_matches('.').to_lowercase().as_str() {
        "sh" => format!("#!/bin/sh\n# {description}\nset -e\n"),
        _ => format!("-- {description}\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_next_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let parser = IdentifierParser::default();
        assert_eq!(next_identifier(&parser, dir.path()).await.unwrap().value(), 1);

        for name in ["V_3_a.sql", "V_12_b.sh", "notes.txt", "X_99_c.sql"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        assert_eq!(next_identifier(&parser, dir.path()).await.unwrap().value(), 13);
    }

    #[test]
    fn test_checked_filename() {
        let parser = IdentifierParser::default();
        let id = Identifier::new(4);
        assert_eq!(
            checked_filename(&parser, id, "Add Users", ".sql").unwrap(),
            "V_4_add_users.sql"
        );

        let err = checked_filename(&parser, id, "x", "").unwrap_err();
        assert!(err.to_string().contains("convention"));

        let err = checked_filename(&parser, id, "a/b", "sql").unwrap_err();
        assert!(err.to_string().contains("path separators"));
    }

    #[test]
    fn test_template() {
        assert_eq!(template("sql", "add users"), "-- add users\n");
        assert!(template(".SH", "seed").starts_with("#!/bin/sh\n"));
    }
}
