//! Splits a diff into bounded-size review chunks.
//!
//! Whole files are packed greedily in diff order; a file whose own
//! estimate exceeds the budget is split at hunk boundaries, never
//! mid-hunk. A single hunk larger than the budget still becomes one
//! chunk — a hunk is the atomic unit of review context and is never
//! truncated.

use kestrel_diff::model::{Diff, FileChange, Hunk};

/// Pluggable token-size estimation.
///
/// The chunker is parameterized over the estimator, not coupled to it;
/// a provider-supplied tokenizer can be dropped in without touching the
/// packing logic.
pub trait TokenEstimator: Send + Sync {
    /// Estimated token count for `text`.
    fn estimate(&self, text: &str) -> usize;
}

/// Character-count heuristic: roughly four characters per token.
///
/// # Examples
///
/// ```
/// use kestrel_review::chunk::{CharEstimator, TokenEstimator};
///
/// let est = CharEstimator;
/// assert_eq!(est.estimate("12345678"), 2);
/// assert_eq!(est.estimate(""), 0);
/// ```
pub struct CharEstimator;

impl TokenEstimator for CharEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count() / 4
    }
}

/// A review-sized grouping of one or more file changes (or a contiguous
/// hunk-slice of one large file), bounded by a token budget.
///
/// Read-only after creation; discarded once its findings are produced.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Position in the chunk sequence (and in invocation results).
    pub index: usize,
    /// File changes (or partial file changes) in this chunk.
    pub files: Vec<FileChange>,
    /// Estimated token size of the rendered content.
    pub estimated_tokens: usize,
}

impl Chunk {
    /// Paths of the files in this chunk, for reporting.
    pub fn file_names(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|f| f.path.to_string_lossy().to_string())
            .collect()
    }
}

/// Split `diff` into chunks of at most `max_tokens` estimated tokens.
///
/// Deterministic: the same diff and limit always produce the same chunk
/// sequence. An empty diff yields zero chunks.
///
/// # Examples
///
/// ```
/// use kestrel_diff::model::Diff;
/// use kestrel_review::chunk::{chunk_diff, CharEstimator};
///
/// let chunks = chunk_diff(&Diff { files: vec![] }, 4000, &CharEstimator);
/// assert!(chunks.is_empty());
/// ```
pub fn chunk_diff(diff: &Diff, max_tokens: usize, estimator: &dyn TokenEstimator) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut current_files: Vec<FileChange> = Vec::new();
    let mut current_tokens = 0usize;

    let flush = |files: &mut Vec<FileChange>, tokens: &mut usize, chunks: &mut Vec<Chunk>| {
        if !files.is_empty() {
            chunks.push(Chunk {
                index: chunks.len(),
                files: std::mem::take(files),
                estimated_tokens: *tokens,
            });
            *tokens = 0;
        }
    };

    for file in &diff.files {
        let file_tokens = estimate_file(file, estimator);

        if file_tokens > max_tokens {
            // Too big to pack whole: close the open chunk, then split this
            // file at hunk boundaries.
            flush(&mut current_files, &mut current_tokens, &mut chunks);
            split_file(file, max_tokens, estimator, &mut chunks);
            continue;
        }

        if current_tokens + file_tokens > max_tokens {
            flush(&mut current_files, &mut current_tokens, &mut chunks);
        }
        current_files.push(file.clone());
        current_tokens += file_tokens;
    }

    flush(&mut current_files, &mut current_tokens, &mut chunks);
    chunks
}

fn split_file(
    file: &FileChange,
    max_tokens: usize,
    estimator: &dyn TokenEstimator,
    chunks: &mut Vec<Chunk>,
) {
    let mut part_hunks: Vec<Hunk> = Vec::new();
    let mut part_tokens = 0usize;

    for hunk in &file.hunks {
        let hunk_tokens = estimate_hunk(hunk, estimator);
        // An individual hunk may exceed the nominal limit; it still goes
        // into a chunk of its own rather than being truncated.
        if !part_hunks.is_empty() && part_tokens + hunk_tokens > max_tokens {
            push_part(file, &mut part_hunks, &mut part_tokens, chunks);
        }
        part_hunks.push(hunk.clone());
        part_tokens += hunk_tokens;
    }

    push_part(file, &mut part_hunks, &mut part_tokens, chunks);
}

fn push_part(
    file: &FileChange,
    hunks: &mut Vec<Hunk>,
    tokens: &mut usize,
    chunks: &mut Vec<Chunk>,
) {
    if hunks.is_empty() {
        return;
    }
    chunks.push(Chunk {
        index: chunks.len(),
        files: vec![FileChange {
            path: file.path.clone(),
            kind: file.kind,
            hunks: std::mem::take(hunks),
        }],
        estimated_tokens: *tokens,
    });
    *tokens = 0;
}

fn estimate_file(file: &FileChange, estimator: &dyn TokenEstimator) -> usize {
    file.hunks.iter().map(|h| estimate_hunk(h, estimator)).sum()
}

fn estimate_hunk(hunk: &Hunk, estimator: &dyn TokenEstimator) -> usize {
    hunk.lines
        .iter()
        .map(|l| estimator.estimate(&l.content) + 2)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_diff::parser::parse_unified_diff;

    /// An estimator that charges one token per line, making budgets easy
    /// to reason about in tests.
    struct LineEstimator;

    impl TokenEstimator for LineEstimator {
        fn estimate(&self, _text: &str) -> usize {
            0 // estimate_hunk adds 2 per line; each line costs exactly 2
        }
    }

    fn diff_with_files(count: usize, lines_per_file: usize) -> Diff {
        let mut text = String::new();
        for i in 0..count {
            text.push_str(&format!(
                "diff --git a/f{i}.rs b/f{i}.rs\n--- a/f{i}.rs\n+++ b/f{i}.rs\n@@ -1,0 +1,{lines_per_file} @@\n"
            ));
            for n in 0..lines_per_file {
                text.push_str(&format!("+line {n}\n"));
            }
        }
        parse_unified_diff(&text).unwrap()
    }

    fn all_line_contents(chunks: &[Chunk]) -> Vec<String> {
        chunks
            .iter()
            .flat_map(|c| &c.files)
            .flat_map(|f| &f.hunks)
            .flat_map(|h| &h.lines)
            .map(|l| l.content.clone())
            .collect()
    }

    #[test]
    fn empty_diff_yields_zero_chunks() {
        let diff = Diff { files: vec![] };
        assert!(chunk_diff(&diff, 4000, &CharEstimator).is_empty());
    }

    #[test]
    fn small_files_pack_into_one_chunk() {
        let diff = diff_with_files(3, 2);
        // 3 files * 2 lines * 2 tokens = 12 <= 100
        let chunks = chunk_diff(&diff, 100, &LineEstimator);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].files.len(), 3);
    }

    #[test]
    fn budget_forces_multiple_chunks() {
        let diff = diff_with_files(4, 5);
        // each file = 10 tokens, budget 20 => two files per chunk
        let chunks = chunk_diff(&diff, 20, &LineEstimator);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].files.len(), 2);
        assert_eq!(chunks[1].files.len(), 2);
    }

    #[test]
    fn oversized_file_splits_at_hunk_boundaries() {
        let mut text = String::from("diff --git a/big.rs b/big.rs\n--- a/big.rs\n+++ b/big.rs\n");
        for h in 0..4 {
            let start = h * 10 + 1;
            text.push_str(&format!("@@ -{start},0 +{start},3 @@\n"));
            for n in 0..3 {
                text.push_str(&format!("+hunk{h} line{n}\n"));
            }
        }
        let diff = parse_unified_diff(&text).unwrap();
        // each hunk = 6 tokens, file = 24, budget 12 => 2 hunks per chunk
        let chunks = chunk_diff(&diff, 12, &LineEstimator);
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert_eq!(chunk.files.len(), 1);
            assert_eq!(chunk.files[0].hunks.len(), 2);
        }
    }

    #[test]
    fn hunks_are_never_split() {
        let diff = diff_with_files(1, 50);
        // single 100-token hunk, budget 10: one oversized chunk, intact
        let chunks = chunk_diff(&diff, 10, &LineEstimator);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].files[0].hunks[0].lines.len(), 50);
        assert!(chunks[0].estimated_tokens > 10);
    }

    #[test]
    fn chunk_content_covers_diff_exactly_once() {
        let diff = diff_with_files(5, 7);
        let chunks = chunk_diff(&diff, 30, &LineEstimator);

        let original: Vec<String> = diff
            .files
            .iter()
            .flat_map(|f| &f.hunks)
            .flat_map(|h| &h.lines)
            .map(|l| l.content.clone())
            .collect();
        assert_eq!(all_line_contents(&chunks), original);
    }

    #[test]
    fn chunking_is_deterministic() {
        let diff = diff_with_files(6, 4);
        let a = chunk_diff(&diff, 25, &LineEstimator);
        let b = chunk_diff(&diff, 25, &LineEstimator);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.index, y.index);
            assert_eq!(x.file_names(), y.file_names());
            assert_eq!(x.estimated_tokens, y.estimated_tokens);
        }
    }

    #[test]
    fn indexes_are_sequential() {
        let diff = diff_with_files(4, 5);
        let chunks = chunk_diff(&diff, 20, &LineEstimator);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }
}
