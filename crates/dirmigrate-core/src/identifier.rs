//! Migration filename parsing.
//!
//! Migration files follow `<prefix>_<digits>_<description>.<ext>`, for
//! example `V_12_add_users.sql`. The digit run is the file's identifier;
//! anything else in the directory is not a migration.

use crate::error::{MigrationError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Numeric version token of a migration file.
///
/// Identifiers are only ever compared within one directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(i64);

impl Identifier {
    /// Wrap a raw identifier value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Raw value, as persisted.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// Whether a file with this identifier is pending given the directory's
    /// latest recorded identifier.
    #[must_use]
    pub fn is_newer_than(self, latest: Option<Self>) -> bool {
        latest.map_or(true, |latest| self > latest)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// The parts of a conforming migration filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Version token.
    pub identifier: Identifier,
    /// Free-form description between the identifier and the extension.
    pub description: String,
    /// File extension, without the dot.
    pub extension: String,
}

/// Extracts identifiers from filenames for one filename prefix.
#[derive(Debug, Clone)]
pub struct IdentifierParser {
    prefix: String,
    pattern: Regex,
}

impl IdentifierParser {
    /// Create a parser for `<prefix>_<digits>_<description>.<ext>`.
    pub fn new(prefix: &str) -> Result<Self> {
        let pattern = Regex::new(&format!(
            r"^{}_(\d+)_(.*)\.([^.]+)$",
            regex::escape(prefix)
        ))
        .map_err(|e| MigrationError::config(format!("invalid file prefix `{prefix}`: {e}")))?;

        Ok(Self {
            prefix: prefix.to_string(),
            pattern,
        })
    }

    /// The filename prefix this parser accepts.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parse a basename, returning `None` for non-conforming names.
    #[must_use]
    pub fn parse(&self, basename: &str) -> Option<ParsedName> {
        let caps = self.pattern.captures(basename)?;
        let digits = caps.get(1)?.as_str();

        let Ok(value) = i64::from_str(digits) else {
            debug!(file = basename, "Identifier out of range, ignoring file");
            return None;
        };

        Some(ParsedName {
            identifier: Identifier(value),
            description: caps.get(2).map_or_else(String::new, |m| m.as_str().to_string()),
            extension: caps.get(3).map_or_else(String::new, |m| m.as_str().to_string()),
        })
    }

    /// Parse a basename, keeping only the identifier.
    #[must_use]
    pub fn identifier(&self, basename: &str) -> Option<Identifier> {
        self.parse(basename).map(|parsed| parsed.identifier)
    }

    /// Build a conforming filename.
    #[must_use]
    pub fn filename(&self, identifier: Identifier, description: &str, extension: &str) -> String {
        let description: String = description
            .trim()
            .chars()
            .map(|c| if c.is_whitespace() { '_' } else { c })
            .collect();
        format!(
            "{}_{}_{}.{}",
            self.prefix,
            identifier,
            description.to_lowercase(),
            extension.trim_start_matches('.')
        )
    }
}

impl Default for IdentifierParser {
    fn default() -> Self {
        Self {
            prefix: "V".to_string(),
            #[allow(clippy::unwrap_used)]
            pattern: Regex::new(r"^V_(\d+)_(.*)\.([^.]+)$").unwrap(),
        }
    }
}
