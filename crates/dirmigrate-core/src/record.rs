//! Audit records of processed migration files.

use crate::identifier::Identifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Batch counter shared by all files processed in one run.
pub type Sequence = i64;

/// Outcome recorded for a processed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// The file applied successfully.
    Applied,
    /// The file failed and the failure was tolerated. It will not be retried.
    Skipped,
}

impl RecordStatus {
    /// Parse the persisted representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "applied" => Some(Self::Applied),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied => write!(f, "applied"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Record of a processed migration file. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Normalized directory the file belongs to.
    pub directory: String,
    /// Identifier parsed from the filename.
    pub identifier: Identifier,
    /// Basename of the file.
    pub filename: String,
    /// Batch sequence of the run that processed the file.
    pub sequence: Sequence,
    /// Outcome of the application.
    pub status: RecordStatus,
    /// Failure cause for skipped files.
    pub error: Option<String>,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
}

impl MigrationRecord {
    /// Record a successful application.
    #[must_use]
    pub fn applied(
        directory: impl Into<String>,
        identifier: Identifier,
        filename: impl Into<String>,
        sequence: Sequence,
    ) -> Self {
        Self {
            directory: directory.into(),
            identifier,
            filename: filename.into(),
            sequence,
            status: RecordStatus::Applied,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Mark as a tolerated failure.
    #[must_use]
    pub fn skipped(mut self, error: impl Into<String>) -> Self {
        self.status = RecordStatus::Skipped;
        self.error = Some(error.into());
        self
    }

    /// Check if the file applied successfully.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.status == RecordStatus::Applied
    }
}

impl fmt::Display for MigrationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (#{}) [{}] seq {}",
            self.directory, self.filename, self.identifier, self.status, self.sequence
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applied_record() {
        let record = MigrationRecord::applied("/a", Identifier::new(1), "V_1_init.sql", 3);
        assert_eq!(record.directory, "/a");
        assert_eq!(record.sequence, 3);
        assert_eq!(record.status, RecordStatus::Applied);
        assert!(record.error.is_none());
        assert!(record.is_successful());
    }

    #[test]
    fn test_skipped_record() {
        let record = MigrationRecord::applied("/a", Identifier::new(2), "V_2_add.sql", 1)
            .skipped("syntax error");
        assert_eq!(record.status, RecordStatus::Skipped);
        assert_eq!(record.error.as_deref(), Some("syntax error"));
        assert!(!record.is_successful());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [RecordStatus::Applied, RecordStatus::Skipped] {
            assert_eq!(RecordStatus::parse(&status.to_string()), Some(status));
        }
        assert_eq!(RecordStatus::parse("pending"), None);
    }

    #[test]
    fn test_record_display() {
        let record = MigrationRecord::applied("/a", Identifier::new(2), "V_2_add.sql", 4);
        let text = record.to_string();
        assert!(text.contains("/a/V_2_add.sql"));
        assert!(text.contains("seq 4"));
    }
}
