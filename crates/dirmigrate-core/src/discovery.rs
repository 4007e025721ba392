//! Discovery of pending migration files.

use crate::error::{MigrationError, Result};
use crate::identifier::{Identifier, IdentifierParser};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

/// Turns configured directory paths into the stable keys stored in records.
pub trait PathNormalizer: Send + Sync {
    /// Normalize a directory path.
    fn normalize(&self, path: &Path) -> String;
}

/// Purely lexical normalization: relative paths are resolved against a base
/// directory, `.` and `..` are folded and separators become `/`. Symlinks are
/// not resolved.
#[derive(Debug, Clone)]
pub struct LexicalPathNormalizer {
    base: PathBuf,
}

impl LexicalPathNormalizer {
    /// Resolve relative paths against the current working directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: std::env::current_dir().unwrap_or_default(),
        }
    }

    /// Resolve relative paths against `base`.
    #[must_use]
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl Default for LexicalPathNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PathNormalizer for LexicalPathNormalizer {
    fn normalize(&self, path: &Path) -> String {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        };

        let mut parts: Vec<Component<'_>> = Vec::new();
        for component in absolute.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if matches!(parts.last(), Some(Component::Normal(_))) {
                        parts.pop();
                    }
                }
                other => parts.push(other),
            }
        }

        let normalized: PathBuf = parts.iter().collect();
        normalized.to_string_lossy().replace('\\', "/")
    }
}

/// A migration file found during discovery. Lives for one run only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateFile {
    /// Path of the file.
    pub path: PathBuf,
    /// Basename of the file.
    pub filename: String,
    /// Normalized key of the directory the file was found in.
    pub directory: String,
    /// Identifier parsed from the filename.
    pub identifier: Identifier,
    /// Extension, without the dot.
    pub extension: String,
}

/// Lists pending migration files of a single directory.
#[derive(Debug, Clone)]
pub struct Discoverer {
    parser: IdentifierParser,
}

impl Discoverer {
    /// Create a discoverer that recognizes filenames with `parser`.
    #[must_use]
    pub fn new(parser: IdentifierParser) -> Self {
        Self { parser }
    }

    /// The filename parser in use.
    #[must_use]
    pub fn parser(&self) -> &IdentifierParser {
        &self.parser
    }

    /// Files directly under `dir` whose identifier is newer than `latest`,
    /// ordered by identifier then filename.
    pub async fn discover(
        &self,
        dir: &Path,
        directory_key: &str,
        latest: Option<Identifier>,
    ) -> Result<Vec<CandidateFile>> {
        ensure_directory(dir).await?;

        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut candidates = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };

            // Follows symlinks so linked files count as files.
            let is_file = tokio::fs::metadata(&path)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }

            let Some(parsed) = self.parser.parse(&filename) else {
                trace!(file = %filename, "Not a migration file");
                continue;
            };

            if !parsed.identifier.is_newer_than(latest) {
                trace!(file = %filename, identifier = %parsed.identifier, "Already applied");
                continue;
            }

            candidates.push(CandidateFile {
                path,
                filename,
                directory: directory_key.to_string(),
                identifier: parsed.identifier,
                extension: parsed.extension,
            });
        }

        candidates.sort_by(|a, b| {
            a.identifier
                .cmp(&b.identifier)
                .then_with(|| a.filename.cmp(&b.filename))
        });

        debug!(
            directory = directory_key,
            latest = ?latest.map(Identifier::value),
            pending = candidates.len(),
            "Directory scanned"
        );

        Ok(candidates)
    }
}

impl Default for Discoverer {
    fn default() -> Self {
        Self::new(IdentifierParser::default())
    }
}

/// Fail with [`MigrationError::DirectoryNotFound`] unless `dir` is a directory.
pub async fn ensure_directory(dir: &Path) -> Result<()> {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => Ok(()),
        _ => Err(MigrationError::directory_not_found(dir)),
    }
}

/// Drop repeated candidates, keeping the first occurrence of each path.
#[must_use]
pub fn deduplicate(candidates: Vec<CandidateFile>) -> Vec<CandidateFile> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| seen.insert(candidate.path.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "SELECT 1;").unwrap();
    }

    fn names(candidates: &[CandidateFile]) -> Vec<&str> {
        candidates.iter().map(|c| c.filename.as_str()).collect()
    }

    #[test]
    fn test_lexical_normalizer() {
        let normalizer = LexicalPathNormalizer::with_base("/srv/app");
        assert_eq!(normalizer.normalize(Path::new("/a/b/")), "/a/b");
        assert_eq!(normalizer.normalize(Path::new("/a/./b/../c")), "/a/c");
        assert_eq!(normalizer.normalize(Path::new("migrations")), "/srv/app/migrations");
        assert_eq!(normalizer.normalize(Path::new("../shared/sql")), "/srv/shared/sql");
        assert_eq!(normalizer.normalize(Path::new("/")), "/");
    }

    #[tokio::test]
    async fn test_discover_all_conforming_without_baseline() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "V_2_add.sql");
        touch(dir.path(), "V_1_init.sql");
        touch(dir.path(), "README.md");
        touch(dir.path(), "V_x_bad.sql");
        fs::create_dir(dir.path().join("V_3_nested.sql")).unwrap();

        let found = Discoverer::default()
            .discover(dir.path(), "/a", None)
            .await
            .unwrap();

        assert_eq!(names(&found), vec!["V_1_init.sql", "V_2_add.sql"]);
        assert!(found.iter().all(|c| c.directory == "/a"));
        assert_eq!(found[0].extension, "sql");
    }

    #[tokio::test]
    async fn test_discover_filters_by_baseline() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["V_1_a.sql", "V_2_b.sql", "V_3_c.sql", "V_10_d.sql"] {
            touch(dir.path(), name);
        }

        let found = Discoverer::default()
            .discover(dir.path(), "/a", Some(Identifier::new(2)))
            .await
            .unwrap();

        assert_eq!(names(&found), vec!["V_3_c.sql", "V_10_d.sql"]);
    }

    #[tokio::test]
    async fn test_discover_is_not_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        touch(&nested, "V_1_deep.sql");

        let found = Discoverer::default()
            .discover(dir.path(), "/a", None)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_discover_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");

        let err = Discoverer::default()
            .discover(&missing, "/missing", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::DirectoryNotFound { ref path } if *path == missing));
    }

    #[tokio::test]
    async fn test_ensure_directory_rejects_files() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "plain.txt");
        assert!(ensure_directory(&dir.path().join("plain.txt")).await.is_err());
        assert!(ensure_directory(dir.path()).await.is_ok());
    }

    #[test]
    fn test_deduplicate_keeps_first() {
        let candidate = |path: &str, dir: &str| CandidateFile {
            path: PathBuf::from(path),
            filename: "V_1_a.sql".to_string(),
            directory: dir.to_string(),
            identifier: Identifier::new(1),
            extension: "sql".to_string(),
        };

        let deduped = deduplicate(vec![
            candidate("/a/V_1_a.sql", "/a"),
            candidate("/b/V_1_a.sql", "/b"),
            candidate("/a/V_1_a.sql", "/a-again"),
        ]);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].directory, "/a");
        assert_eq!(deduped[1].directory, "/b");
    }
}
