use std::path::PathBuf;

use kestrel_core::KestrelError;

use crate::model::{ChangeKind, Diff, DiffLine, FileChange, Hunk, LineKind};

/// Intermediate per-file state while walking the diff text.
struct PendingFile {
    old_path: PathBuf,
    new_path: PathBuf,
    is_new: bool,
    is_deleted: bool,
    is_rename: bool,
    hunks: Vec<Hunk>,
}

impl PendingFile {
    fn empty() -> Self {
        Self {
            old_path: PathBuf::new(),
            new_path: PathBuf::new(),
            is_new: false,
            is_deleted: false,
            is_rename: false,
            hunks: Vec::new(),
        }
    }

    fn into_change(self) -> FileChange {
        let kind = if self.is_deleted {
            ChangeKind::Deleted
        } else if self.is_new {
            ChangeKind::Added
        } else if self.is_rename {
            ChangeKind::Renamed
        } else {
            ChangeKind::Modified
        };
        let path = if self.is_deleted {
            self.old_path
        } else {
            self.new_path
        };
        FileChange {
            path,
            kind,
            hunks: self.hunks,
        }
    }
}

/// Parse a unified diff string (as produced by `git diff` or the GitHub
/// `.diff` media type) into a validated [`Diff`].
///
/// Handles new files, deleted files, renames, quoted paths, and binary
/// files (which are skipped). Each content line is recorded with its
/// computed new-file line number so findings can be anchored later.
///
/// # Errors
///
/// Returns [`KestrelError::Parse`] if a hunk header is malformed, or
/// [`KestrelError::MalformedDiff`] if the parsed structure violates the
/// diff invariants.
///
/// # Examples
///
/// ```
/// use kestrel_diff::parser::parse_unified_diff;
///
/// let diff = parse_unified_diff("").unwrap();
/// assert!(diff.is_empty());
///
/// let text = "--- a/hello.rs\n+++ b/hello.rs\n@@ -1,2 +1,3 @@\n fn main() {\n+    println!(\"hi\");\n }\n";
/// let diff = parse_unified_diff(text).unwrap();
/// assert_eq!(diff.files.len(), 1);
/// assert_eq!(diff.files[0].hunks[0].lines[1].new_line, Some(2));
/// ```
pub fn parse_unified_diff(input: &str) -> Result<Diff, KestrelError> {
    let mut files: Vec<FileChange> = Vec::new();
    let mut current: Option<PendingFile> = None;
    let mut current_hunk: Option<Hunk> = None;
    let mut new_cursor: u32 = 0;
    let mut is_binary = false;

    for line in input.lines() {
        if line.starts_with("diff --git ") {
            flush_hunk(&mut current, &mut current_hunk);
            if let Some(file) = current.take() {
                if !is_binary {
                    files.push(file.into_change());
                }
            }
            is_binary = false;
            current = Some(PendingFile::empty());
            continue;
        }

        // Standard patches may lack the "diff --git" command line; start a
        // file implicitly at the old-path header.
        if line.starts_with("--- ") && current.is_none() {
            current = Some(PendingFile::empty());
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if line.starts_with("Binary files ") && line.ends_with(" differ") {
            is_binary = true;
            continue;
        }

        if line.starts_with("new file mode") {
            file.is_new = true;
            continue;
        }

        if line.starts_with("deleted file mode") {
            file.is_deleted = true;
            continue;
        }

        if line.starts_with("rename from ") || line.starts_with("rename to ") {
            file.is_rename = true;
            if let Some(to) = line.strip_prefix("rename to ") {
                file.new_path = PathBuf::from(to.trim_matches('"'));
            }
            continue;
        }

        if line.starts_with("index ") || line.starts_with("similarity index") {
            continue;
        }

        if let Some(path) = line.strip_prefix("--- ") {
            file.old_path = parse_path(path);
            if path == "/dev/null" {
                file.is_new = true;
            }
            continue;
        }

        if let Some(path) = line.strip_prefix("+++ ") {
            file.new_path = parse_path(path);
            if path == "/dev/null" {
                file.is_deleted = true;
            }
            continue;
        }

        if line.starts_with("@@ ") {
            flush_hunk(&mut current, &mut current_hunk);
            let (old_start, old_lines, new_start, new_lines) = parse_hunk_header(line)?;
            new_cursor = new_start;
            current_hunk = Some(Hunk {
                old_start,
                old_lines,
                new_start,
                new_lines,
                lines: Vec::new(),
            });
            continue;
        }

        if line == "\\ No newline at end of file" {
            continue;
        }

        if let Some(hunk) = current_hunk.as_mut() {
            let record = if let Some(content) = line.strip_prefix('+') {
                let n = new_cursor;
                new_cursor += 1;
                Some(DiffLine {
                    kind: LineKind::Added,
                    content: content.to_string(),
                    new_line: Some(n),
                })
            } else if let Some(content) = line.strip_prefix('-') {
                Some(DiffLine {
                    kind: LineKind::Removed,
                    content: content.to_string(),
                    new_line: None,
                })
            } else if let Some(content) = line.strip_prefix(' ') {
                let n = new_cursor;
                new_cursor += 1;
                Some(DiffLine {
                    kind: LineKind::Context,
                    content: content.to_string(),
                    new_line: Some(n),
                })
            } else {
                None
            };
            if let Some(record) = record {
                hunk.lines.push(record);
            }
        }
    }

    flush_hunk(&mut current, &mut current_hunk);
    if let Some(file) = current.take() {
        if !is_binary {
            files.push(file.into_change());
        }
    }

    let diff = Diff { files };
    diff.validate()?;
    Ok(diff)
}

fn flush_hunk(current: &mut Option<PendingFile>, hunk: &mut Option<Hunk>) {
    if let Some(h) = hunk.take() {
        if let Some(file) = current.as_mut() {
            file.hunks.push(h);
        }
    }
}

fn parse_path(raw: &str) -> PathBuf {
    let normalized = raw.trim_matches('"');

    if normalized == "/dev/null" {
        return PathBuf::from("/dev/null");
    }

    let stripped = normalized
        .strip_prefix("a/")
        .or_else(|| normalized.strip_prefix("b/"))
        .unwrap_or(normalized);

    PathBuf::from(stripped)
}

fn parse_hunk_header(line: &str) -> Result<(u32, u32, u32, u32), KestrelError> {
    let inner = line
        .strip_prefix("@@ ")
        .and_then(|s| {
            let end = s.find(" @@")?;
            Some(&s[..end])
        })
        .ok_or_else(|| KestrelError::Parse(format!("invalid hunk header: {line}")))?;

    let parts: Vec<&str> = inner.split(' ').collect();
    if parts.len() != 2 {
        return Err(KestrelError::Parse(format!("invalid hunk header: {line}")));
    }

    let old = parts[0]
        .strip_prefix('-')
        .ok_or_else(|| KestrelError::Parse(format!("invalid old range in hunk: {line}")))?;
    let new = parts[1]
        .strip_prefix('+')
        .ok_or_else(|| KestrelError::Parse(format!("invalid new range in hunk: {line}")))?;

    let (old_start, old_lines) = parse_range(old, line)?;
    let (new_start, new_lines) = parse_range(new, line)?;

    Ok((old_start, old_lines, new_start, new_lines))
}

fn parse_range(range: &str, context: &str) -> Result<(u32, u32), KestrelError> {
    if let Some((start, count)) = range.split_once(',') {
        let s = start
            .parse()
            .map_err(|_| KestrelError::Parse(format!("invalid range number in: {context}")))?;
        let c = count
            .parse()
            .map_err(|_| KestrelError::Parse(format!("invalid range count in: {context}")))?;
        Ok((s, c))
    } else {
        let s = range
            .parse()
            .map_err(|_| KestrelError::Parse(format!("invalid range number in: {context}")))?;
        Ok((s, 1))
    }
}
