use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use kestrel_core::KestrelError;

/// Classification of a changed file.
///
/// # Examples
///
/// ```
/// use kestrel_diff::model::ChangeKind;
///
/// let kind = ChangeKind::Added;
/// assert_eq!(format!("{kind}"), "added");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// New file.
    Added,
    /// Existing file modified in place.
    Modified,
    /// File removed.
    Deleted,
    /// File moved or renamed.
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Modified => write!(f, "modified"),
            ChangeKind::Deleted => write!(f, "deleted"),
            ChangeKind::Renamed => write!(f, "renamed"),
        }
    }
}

/// Kind of a single diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    /// Unchanged line present in both versions.
    Context,
    /// Line added in the new version.
    Added,
    /// Line removed from the old version.
    Removed,
}

/// One line record within a hunk.
///
/// `new_line` is the line number in the new version of the file — the
/// addressing scheme review comments anchor to. Removed lines have no
/// new-file number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffLine {
    /// Whether the line is context, added, or removed.
    pub kind: LineKind,
    /// Line content without the leading diff marker.
    pub content: String,
    /// Line number in the new version, if the line exists there.
    pub new_line: Option<u32>,
}

/// A contiguous block of added/removed/context lines within one file's
/// change.
///
/// # Examples
///
/// ```
/// use kestrel_diff::model::{DiffLine, Hunk, LineKind};
///
/// let hunk = Hunk {
///     old_start: 10,
///     old_lines: 2,
///     new_start: 10,
///     new_lines: 3,
///     lines: vec![
///         DiffLine { kind: LineKind::Context, content: "fn main() {".into(), new_line: Some(10) },
///         DiffLine { kind: LineKind::Added, content: "    init();".into(), new_line: Some(11) },
///         DiffLine { kind: LineKind::Context, content: "}".into(), new_line: Some(12) },
///     ],
/// };
/// assert!(hunk.contains_new_line(11));
/// assert!(!hunk.contains_new_line(13));
/// assert_eq!(hunk.added_count(), 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunk {
    /// Starting line in the old version.
    pub old_start: u32,
    /// Number of lines in the old version.
    pub old_lines: u32,
    /// Starting line in the new version.
    pub new_start: u32,
    /// Number of lines in the new version.
    pub new_lines: u32,
    /// Ordered line records.
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    /// Whether `line` (new-file numbering) is addressable within this hunk.
    pub fn contains_new_line(&self, line: u32) -> bool {
        self.lines.iter().any(|l| l.new_line == Some(line))
    }

    /// Number of added lines.
    pub fn added_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.kind == LineKind::Added)
            .count()
    }

    /// Number of removed lines.
    pub fn removed_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.kind == LineKind::Removed)
            .count()
    }

    /// One past the last new-file line covered by this hunk.
    pub fn new_end(&self) -> u32 {
        self.new_start.saturating_add(self.new_lines)
    }
}

/// All changes to a single file, owning its hunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// Path in the new version (old path for deleted files).
    pub path: PathBuf,
    /// Classification of the change.
    pub kind: ChangeKind,
    /// Ordered hunks.
    pub hunks: Vec<Hunk>,
}

impl FileChange {
    /// Find the hunk containing `line` (new-file numbering).
    pub fn hunk_for_line(&self, line: u32) -> Option<&Hunk> {
        self.hunks.iter().find(|h| h.contains_new_line(line))
    }

    /// Total number of line records across all hunks.
    pub fn line_count(&self) -> usize {
        self.hunks.iter().map(|h| h.lines.len()).sum()
    }
}

impl fmt::Display for FileChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} hunks)", self.path.display(), self.hunks.len())
    }
}

/// Immutable in-memory representation of a pull request's changed lines,
/// independent of host API shapes.
///
/// # Examples
///
/// ```
/// use kestrel_diff::model::Diff;
///
/// let diff = Diff { files: vec![] };
/// assert!(diff.is_empty());
/// assert!(diff.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diff {
    /// Ordered file changes.
    pub files: Vec<FileChange>,
}

impl Diff {
    /// Whether the diff contains no file changes.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Look up a file change by path.
    pub fn file(&self, path: &Path) -> Option<&FileChange> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Find the hunk containing (`path`, `line`) in new-file numbering.
    pub fn hunk_for_line(&self, path: &Path, line: u32) -> Option<&Hunk> {
        self.file(path).and_then(|f| f.hunk_for_line(line))
    }

    /// Validate structural invariants.
    ///
    /// Checked:
    /// - file paths are unique within the diff,
    /// - per file, hunk new-ranges are increasing and non-overlapping,
    /// - within a hunk, new-file line numbers are strictly increasing and
    ///   fall inside the hunk's declared new-range.
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::MalformedDiff`] naming the first violation.
    pub fn validate(&self) -> Result<(), KestrelError> {
        let mut seen = HashSet::new();
        for file in &self.files {
            if !seen.insert(&file.path) {
                return Err(KestrelError::MalformedDiff(format!(
                    "duplicate file path {}",
                    file.path.display()
                )));
            }

            let mut prev_end: u32 = 0;
            for hunk in &file.hunks {
                // Deleted content has no new-range; nothing to order.
                if hunk.new_lines > 0 {
                    if hunk.new_start < prev_end {
                        return Err(KestrelError::MalformedDiff(format!(
                            "overlapping hunks in {} at new line {}",
                            file.path.display(),
                            hunk.new_start
                        )));
                    }
                    prev_end = hunk.new_end();
                }

                let mut prev_line: Option<u32> = None;
                for line in &hunk.lines {
                    let Some(n) = line.new_line else { continue };
                    if n < hunk.new_start || n >= hunk.new_end() {
                        return Err(KestrelError::MalformedDiff(format!(
                            "line {} outside hunk range {}..{} in {}",
                            n,
                            hunk.new_start,
                            hunk.new_end(),
                            file.path.display()
                        )));
                    }
                    if let Some(p) = prev_line {
                        if n <= p {
                            return Err(KestrelError::MalformedDiff(format!(
                                "non-increasing line numbers in {} ({} after {})",
                                file.path.display(),
                                n,
                                p
                            )));
                        }
                    }
                    prev_line = Some(n);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(kind: LineKind, content: &str, new_line: Option<u32>) -> DiffLine {
        DiffLine {
            kind,
            content: content.into(),
            new_line,
        }
    }

    fn simple_hunk(new_start: u32, lines: Vec<DiffLine>) -> Hunk {
        let new_lines = lines.iter().filter(|l| l.new_line.is_some()).count() as u32;
        Hunk {
            old_start: new_start,
            old_lines: new_lines,
            new_start,
            new_lines,
            lines,
        }
    }

    fn one_file_diff(path: &str, hunks: Vec<Hunk>) -> Diff {
        Diff {
            files: vec![FileChange {
                path: PathBuf::from(path),
                kind: ChangeKind::Modified,
                hunks,
            }],
        }
    }

    #[test]
    fn valid_diff_passes() {
        let diff = one_file_diff(
            "a.rs",
            vec![
                simple_hunk(
                    1,
                    vec![
                        line(LineKind::Context, "x", Some(1)),
                        line(LineKind::Added, "y", Some(2)),
                    ],
                ),
                simple_hunk(
                    10,
                    vec![
                        line(LineKind::Added, "z", Some(10)),
                        line(LineKind::Removed, "old", None),
                    ],
                ),
            ],
        );
        assert!(diff.validate().is_ok());
    }

    #[test]
    fn duplicate_paths_rejected() {
        let mut diff = one_file_diff("a.rs", vec![]);
        diff.files.push(FileChange {
            path: PathBuf::from("a.rs"),
            kind: ChangeKind::Modified,
            hunks: vec![],
        });
        let err = diff.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn overlapping_hunks_rejected() {
        let diff = one_file_diff(
            "a.rs",
            vec![
                simple_hunk(
                    5,
                    vec![
                        line(LineKind::Context, "a", Some(5)),
                        line(LineKind::Context, "b", Some(6)),
                    ],
                ),
                simple_hunk(6, vec![line(LineKind::Added, "c", Some(6))]),
            ],
        );
        let err = diff.validate().unwrap_err();
        assert!(err.to_string().contains("overlapping"));
    }

    #[test]
    fn non_increasing_line_numbers_rejected() {
        let hunk = Hunk {
            old_start: 1,
            old_lines: 2,
            new_start: 1,
            new_lines: 2,
            lines: vec![
                line(LineKind::Context, "a", Some(2)),
                line(LineKind::Added, "b", Some(1)),
            ],
        };
        let diff = one_file_diff("a.rs", vec![hunk]);
        let err = diff.validate().unwrap_err();
        assert!(err.to_string().contains("non-increasing"));
    }

    #[test]
    fn line_outside_hunk_range_rejected() {
        let hunk = Hunk {
            old_start: 1,
            old_lines: 1,
            new_start: 1,
            new_lines: 1,
            lines: vec![line(LineKind::Added, "a", Some(99))],
        };
        let diff = one_file_diff("a.rs", vec![hunk]);
        let err = diff.validate().unwrap_err();
        assert!(err.to_string().contains("outside hunk range"));
    }

    #[test]
    fn deleted_file_with_no_new_range_passes() {
        let hunk = Hunk {
            old_start: 1,
            old_lines: 3,
            new_start: 0,
            new_lines: 0,
            lines: vec![
                line(LineKind::Removed, "a", None),
                line(LineKind::Removed, "b", None),
            ],
        };
        let diff = Diff {
            files: vec![FileChange {
                path: PathBuf::from("gone.rs"),
                kind: ChangeKind::Deleted,
                hunks: vec![hunk],
            }],
        };
        assert!(diff.validate().is_ok());
    }

    #[test]
    fn hunk_for_line_resolves_across_files() {
        let diff = Diff {
            files: vec![
                FileChange {
                    path: PathBuf::from("a.rs"),
                    kind: ChangeKind::Modified,
                    hunks: vec![simple_hunk(1, vec![line(LineKind::Added, "x", Some(1))])],
                },
                FileChange {
                    path: PathBuf::from("b.rs"),
                    kind: ChangeKind::Modified,
                    hunks: vec![simple_hunk(7, vec![line(LineKind::Added, "y", Some(7))])],
                },
            ],
        };
        assert!(diff.hunk_for_line(Path::new("b.rs"), 7).is_some());
        assert!(diff.hunk_for_line(Path::new("b.rs"), 8).is_none());
        assert!(diff.hunk_for_line(Path::new("c.rs"), 7).is_none());
    }
}
