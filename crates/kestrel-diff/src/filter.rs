//! Pre-review noise filtering.
//!
//! Drops deleted files, lock files, and files matching configured
//! exclude globs before the diff reaches the chunker, saving tokens and
//! reducing false positives.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use kestrel_core::ReviewConfig;

use crate::model::{ChangeKind, Diff, FileChange};

/// Why a file was excluded from review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// The file was deleted; there is nothing in the new version to review.
    DeletedFile,
    /// Dependency lock file.
    LockFile,
    /// No reviewable lines (e.g. a pure rename).
    NoContent,
    /// Matched a configured exclude pattern.
    PatternMatch(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DeletedFile => write!(f, "deleted file"),
            SkipReason::LockFile => write!(f, "lock file"),
            SkipReason::NoContent => write!(f, "no reviewable lines"),
            SkipReason::PatternMatch(p) => write!(f, "matched pattern {p}"),
        }
    }
}

/// A file excluded from review, with the reason.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    /// Path of the skipped file.
    pub path: PathBuf,
    /// Why it was skipped.
    pub reason: SkipReason,
}

/// Result of filtering a diff: the reviewable remainder plus the skips.
#[derive(Debug)]
pub struct FilterResult {
    /// Diff containing only reviewable file changes.
    pub kept: Diff,
    /// Files removed before review.
    pub skipped: Vec<SkippedFile>,
}

/// Files and patterns to exclude before chunking.
///
/// # Examples
///
/// ```
/// use kestrel_core::ReviewConfig;
/// use kestrel_diff::filter::DiffFilter;
///
/// let filter = DiffFilter::from_config(&ReviewConfig::default());
/// assert!(filter.should_skip("Cargo.lock"));
/// assert!(!filter.should_skip("src/main.rs"));
/// ```
pub struct DiffFilter {
    exclude_patterns: Vec<glob::Pattern>,
}

const LOCK_FILES: &[&str] = &[
    "Cargo.lock",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "poetry.lock",
    "Gemfile.lock",
    "composer.lock",
    "go.sum",
];

impl DiffFilter {
    /// Build a filter from review configuration; invalid globs are
    /// ignored.
    pub fn from_config(config: &ReviewConfig) -> Self {
        let exclude_patterns = config
            .exclude_patterns
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();
        Self { exclude_patterns }
    }

    /// Check whether a path would be skipped (lock file or pattern match).
    pub fn should_skip(&self, path: &str) -> bool {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        LOCK_FILES.contains(&file_name)
            || self.exclude_patterns.iter().any(|p| p.matches(path))
    }

    /// Filter a diff, returning the reviewable remainder and the skips.
    ///
    /// # Examples
    ///
    /// ```
    /// use kestrel_core::ReviewConfig;
    /// use kestrel_diff::filter::DiffFilter;
    /// use kestrel_diff::parser::parse_unified_diff;
    ///
    /// let text = "diff --git a/src/main.rs b/src/main.rs\n\
    ///             --- a/src/main.rs\n\
    ///             +++ b/src/main.rs\n\
    ///             @@ -1,2 +1,3 @@\n\
    ///              line\n\
    ///             +new\n";
    /// let diff = parse_unified_diff(text).unwrap();
    /// let result = DiffFilter::from_config(&ReviewConfig::default()).filter(diff);
    /// assert_eq!(result.kept.files.len(), 1);
    /// assert!(result.skipped.is_empty());
    /// ```
    pub fn filter(&self, diff: Diff) -> FilterResult {
        let mut kept = Vec::new();
        let mut skipped = Vec::new();

        for file in diff.files {
            if let Some(reason) = self.skip_reason(&file) {
                skipped.push(SkippedFile {
                    path: file.path.clone(),
                    reason,
                });
            } else {
                kept.push(file);
            }
        }

        FilterResult {
            kept: Diff { files: kept },
            skipped,
        }
    }

    fn skip_reason(&self, file: &FileChange) -> Option<SkipReason> {
        if file.kind == ChangeKind::Deleted {
            return Some(SkipReason::DeletedFile);
        }

        let path_str = file.path.to_string_lossy();
        let file_name = file
            .path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();

        if LOCK_FILES.contains(&file_name.as_str()) {
            return Some(SkipReason::LockFile);
        }

        for pat in &self.exclude_patterns {
            if pat.matches(&path_str) {
                return Some(SkipReason::PatternMatch(pat.to_string()));
            }
        }

        if file.hunks.iter().all(|h| h.lines.is_empty()) {
            return Some(SkipReason::NoContent);
        }

        None
    }
}
