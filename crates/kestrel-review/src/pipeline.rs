//! The review orchestrator.
//!
//! One run per pull request: fetch → chunk → review (parallel) →
//! aggregate → publish. Individual chunk failures are recorded and never
//! abort the run; only a fetch failure or a total publish failure
//! produces a failed outcome.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use kestrel_core::{KestrelConfig, KestrelError, LlmConfig, PullRequestRef, ReviewComment,
    ReviewConfig, Severity};
use kestrel_diff::filter::{DiffFilter, SkippedFile};
use kestrel_diff::parser::parse_unified_diff;

use crate::aggregate::{aggregate, AggregateOptions};
use crate::chunk::{chunk_diff, CharEstimator, Chunk};
use crate::github::{GitHubClient, PublishOutcome};
use crate::invoke::{CompletionBackend, InvokeResult, Invoker};
use crate::prompt::{build_request, parse_response, ParseWarning};

/// Pipeline phase, in order. `Failed` is terminal and reachable only
/// from `Fetching` and `Publishing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Retrieving the diff from the host.
    Fetching,
    /// Decomposing the diff into review units.
    Chunking,
    /// Concurrent model invocation.
    Reviewing,
    /// Cross-chunk aggregation and deduplication.
    Aggregating,
    /// Posting comments back to the host.
    Publishing,
    /// Run completed.
    Done,
    /// Run failed.
    Failed,
    /// Run deadline expired.
    Cancelled,
}

/// Final outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunOutcome {
    /// The review completed (possibly with unit-level failures).
    Done,
    /// There was nothing to review; no model calls were made.
    NothingToReview,
    /// Fetching failed, the diff was malformed, or publishing delivered
    /// nothing when comments were expected.
    Failed,
    /// The run deadline expired before all chunks completed.
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Done => write!(f, "done"),
            RunOutcome::NothingToReview => write!(f, "nothing to review"),
            RunOutcome::Failed => write!(f, "failed"),
            RunOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-chunk outcome recorded on the run report.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ChunkStatus {
    /// The model responded and the response was parsed.
    Succeeded {
        /// Valid findings extracted from the response.
        findings: usize,
    },
    /// The request failed permanently or exhausted its retries.
    Failed {
        /// The final error message.
        error: String,
    },
    /// The run deadline expired before this chunk finished.
    Cancelled,
}

/// Report entry for one chunk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReport {
    /// Chunk index.
    pub index: usize,
    /// Files (or file parts) in the chunk.
    pub files: Vec<String>,
    /// Model attempts used, including retries.
    pub attempts: u32,
    /// Outcome.
    pub status: ChunkStatus,
}

/// Everything a caller needs to judge review completeness, produced by
/// every run — including failed and cancelled ones.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Final outcome.
    pub outcome: RunOutcome,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Model identifier used.
    pub model: String,
    /// Chunks sent to the model.
    pub chunks_attempted: usize,
    /// Chunks that produced a parsed response.
    pub chunks_succeeded: usize,
    /// Chunks that failed permanently or exhausted retries.
    pub chunks_failed: usize,
    /// Chunks abandoned at the deadline.
    pub chunks_cancelled: usize,
    /// Valid findings parsed across all chunks.
    pub findings_produced: usize,
    /// Findings the parser discarded (bad anchors, bad fields).
    pub findings_dropped: usize,
    /// Final deduplicated comments.
    pub comments: Vec<ReviewComment>,
    /// Publication outcome, when publishing was attempted.
    pub publish: Option<PublishOutcome>,
    /// Non-fatal parse problems.
    pub parse_warnings: Vec<ParseWarning>,
    /// Files excluded before chunking.
    pub skipped_files: Vec<SkippedFile>,
    /// Per-chunk detail.
    pub chunks: Vec<ChunkReport>,
    /// Reason for a `NothingToReview` outcome.
    pub skipped_reason: Option<String>,
    /// Error message for a `Failed` outcome.
    pub error: Option<String>,
    /// The phase a `Failed` outcome occurred in.
    pub failed_during: Option<RunState>,
}

impl RunReport {
    fn empty(model: &str, outcome: RunOutcome) -> Self {
        let now = Utc::now();
        Self {
            outcome,
            started_at: now,
            finished_at: now,
            model: model.to_string(),
            chunks_attempted: 0,
            chunks_succeeded: 0,
            chunks_failed: 0,
            chunks_cancelled: 0,
            findings_produced: 0,
            findings_dropped: 0,
            comments: Vec::new(),
            publish: None,
            parse_warnings: Vec::new(),
            skipped_files: Vec::new(),
            chunks: Vec::new(),
            skipped_reason: None,
            error: None,
            failed_during: None,
        }
    }

    /// A failed run (fetch error, malformed diff, total publish failure).
    pub fn failed(model: &str, error: &KestrelError, during: RunState) -> Self {
        let mut report = Self::empty(model, RunOutcome::Failed);
        report.error = Some(error.to_string());
        report.failed_during = Some(during);
        report
    }

    /// A run that found nothing to review.
    pub fn nothing_to_review(model: &str, reason: impl Into<String>) -> Self {
        let mut report = Self::empty(model, RunOutcome::NothingToReview);
        report.skipped_reason = Some(reason.into());
        report
    }

    /// Whether any comment meets `threshold` (for CI-style exit codes).
    pub fn has_findings_at(&self, threshold: Severity) -> bool {
        self.comments
            .iter()
            .any(|c| c.severity.is_some_and(|s| s.meets_threshold(threshold)))
    }

    /// The summary comment posted to the PR alongside inline comments.
    pub fn summary_comment(&self) -> String {
        if self.comments.is_empty() {
            return format!(
                "## Kestrel Review: No Issues Found\n\n\
                 Reviewed {} chunk(s); no issues to report.\n\n\
                 ---\n*Reviewed by Kestrel*",
                self.chunks_attempted
            );
        }

        let mut out = String::from("## Kestrel Review Summary\n\n");
        let blocking = self
            .comments
            .iter()
            .filter(|c| c.severity == Some(Severity::Blocking))
            .count();
        out.push_str(&format!(
            "Found **{}** issue(s) ({} blocking) across {}/{} reviewed chunk(s).\n\n",
            self.comments.len(),
            blocking,
            self.chunks_succeeded,
            self.chunks_attempted,
        ));

        out.push_str("| Severity | File | Line |\n|----------|------|------|\n");
        for comment in &self.comments {
            let severity = comment
                .severity
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".into());
            out.push_str(&format!(
                "| {severity} | `{}` | {} |\n",
                comment.file_path.display(),
                comment.line
            ));
        }

        if self.chunks_failed > 0 || self.chunks_cancelled > 0 {
            out.push_str(&format!(
                "\nPartial review: {} chunk(s) failed, {} cancelled.\n",
                self.chunks_failed, self.chunks_cancelled
            ));
        }

        out.push_str("\n---\n*Reviewed by Kestrel*");
        out
    }

    /// Render the report as markdown.
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Kestrel Review\n\n");
        out.push_str(&format!(
            "**Outcome:** {} | **Model:** {} | **Chunks:** {}/{} succeeded | **Comments:** {}\n\n",
            self.outcome,
            self.model,
            self.chunks_succeeded,
            self.chunks_attempted,
            self.comments.len(),
        ));

        if let Some(reason) = &self.skipped_reason {
            out.push_str(&format!("Nothing to review: {reason}\n"));
            return out;
        }
        if let Some(error) = &self.error {
            out.push_str(&format!("Error: {error}\n"));
        }

        if self.comments.is_empty() {
            out.push_str("No issues found.\n");
        } else {
            for comment in &self.comments {
                let label = comment
                    .severity
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "note".into());
                out.push_str(&format!(
                    "## {label} — `{}:{}`\n\n{}\n\n",
                    comment.file_path.display(),
                    comment.line,
                    comment.body,
                ));
            }
        }
        out
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Kestrel Review")?;
        writeln!(f, "==============")?;
        writeln!(
            f,
            "Outcome: {} | Model: {}",
            self.outcome, self.model
        )?;
        writeln!(
            f,
            "Chunks: {} attempted, {} succeeded, {} failed, {} cancelled",
            self.chunks_attempted,
            self.chunks_succeeded,
            self.chunks_failed,
            self.chunks_cancelled,
        )?;
        writeln!(
            f,
            "Findings: {} produced, {} dropped | Comments: {}",
            self.findings_produced,
            self.findings_dropped,
            self.comments.len(),
        )?;
        if let Some(publish) = &self.publish {
            writeln!(
                f,
                "Published: {} posted, {} failed",
                publish.posted, publish.failed
            )?;
        }
        if let Some(reason) = &self.skipped_reason {
            writeln!(f, "\nNothing to review: {reason}")?;
            return Ok(());
        }
        if let Some(error) = &self.error {
            writeln!(f, "\nError: {error}")?;
        }
        writeln!(f)?;

        if self.comments.is_empty() {
            writeln!(f, "No issues found.")?;
        } else {
            for comment in &self.comments {
                let label = comment
                    .severity
                    .map(|s| s.to_string().to_uppercase())
                    .unwrap_or_else(|| "NOTE".into());
                writeln!(
                    f,
                    "[{label}] {}:{}",
                    comment.file_path.display(),
                    comment.line
                )?;
                for line in comment.body.lines() {
                    writeln!(f, "  {line}")?;
                }
                writeln!(f)?;
            }
        }

        Ok(())
    }
}

/// Drives the full review pipeline for one pull request.
pub struct ReviewPipeline<C> {
    invoker: Invoker<C>,
    review: ReviewConfig,
    llm: LlmConfig,
}

impl<C: CompletionBackend> ReviewPipeline<C> {
    /// Create a pipeline from a completion backend and configuration.
    pub fn new(backend: C, config: &KestrelConfig) -> Self {
        Self {
            invoker: Invoker::new(backend, &config.review),
            review: config.review.clone(),
            llm: config.llm.clone(),
        }
    }

    /// Review a diff that is already in hand (local patch file, tests).
    ///
    /// Runs Chunking → Reviewing → Aggregating; publishing is the
    /// caller's concern.
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::Parse`] or [`KestrelError::MalformedDiff`]
    /// if the diff cannot be modeled; these abort before chunking.
    pub async fn run_on_diff(
        &self,
        diff_text: &str,
        timeout: Option<Duration>,
    ) -> Result<RunReport, KestrelError> {
        let started_at = Utc::now();

        // Chunking
        let diff = parse_unified_diff(diff_text)?;
        let filtered = DiffFilter::from_config(&self.review).filter(diff);
        let chunks = chunk_diff(&filtered.kept, self.review.max_chunk_tokens, &CharEstimator);

        if chunks.is_empty() {
            let mut report =
                RunReport::nothing_to_review(&self.llm.model, "no reviewable changes in diff");
            report.started_at = started_at;
            report.skipped_files = filtered.skipped;
            return Ok(report);
        }

        // Reviewing
        let (mut report, findings) = self.review_chunks(&chunks, timeout).await;
        report.started_at = started_at;
        report.skipped_files = filtered.skipped;

        // Aggregating
        report.comments = aggregate(findings, &AggregateOptions::from_config(&self.review));
        report.finished_at = Utc::now();
        Ok(report)
    }

    /// Run the full pipeline against a GitHub pull request.
    ///
    /// Always returns a report; fetch failures and total publish failures
    /// yield a `Failed` outcome rather than an error.
    pub async fn review_pr(
        &self,
        github: &GitHubClient,
        pr: &PullRequestRef,
        post: bool,
        timeout: Option<Duration>,
    ) -> RunReport {
        // Fetching
        let metadata = match github.fetch_metadata(pr).await {
            Ok(m) => m,
            Err(e) => return RunReport::failed(&self.llm.model, &e, RunState::Fetching),
        };
        if metadata.author_is_bot() {
            return RunReport::nothing_to_review(
                &self.llm.model,
                format!("PR author '{}' is a bot", metadata.author),
            );
        }

        let diff_text = match github.fetch_diff(pr).await {
            Ok(d) => d,
            Err(e) => return RunReport::failed(&self.llm.model, &e, RunState::Fetching),
        };

        let mut report = match self.run_on_diff(&diff_text, timeout).await {
            Ok(r) => r,
            Err(e) => return RunReport::failed(&self.llm.model, &e, RunState::Chunking),
        };

        // Publishing
        let may_publish = match report.outcome {
            RunOutcome::Done => true,
            RunOutcome::Cancelled => self.review.publish_on_cancel,
            _ => false,
        };
        if post && may_publish && !report.comments.is_empty() {
            let summary = report.summary_comment();
            let outcome = github
                .publish_review(pr, &report.comments, &metadata.head_sha, &summary)
                .await;
            if outcome.is_total_failure() {
                report.outcome = RunOutcome::Failed;
                report.failed_during = Some(RunState::Publishing);
                report.error = Some(format!(
                    "publishing failed: 0/{} comments delivered",
                    outcome.results.len()
                ));
            }
            report.publish = Some(outcome);
            report.finished_at = Utc::now();
        }

        report
    }

    async fn review_chunks(
        &self,
        chunks: &[Chunk],
        timeout: Option<Duration>,
    ) -> (RunReport, Vec<kestrel_core::Finding>) {
        let requests: Vec<_> = chunks
            .iter()
            .map(|chunk| build_request(chunk, &self.review, &self.llm))
            .collect();
        let anchors: Vec<_> = requests.iter().map(|r| r.anchors.clone()).collect();

        let results = self.invoker.invoke_all(requests, timeout).await;

        let mut report = RunReport::empty(&self.llm.model, RunOutcome::Done);
        report.chunks_attempted = chunks.len();

        let mut findings = Vec::new();
        for (chunk, result) in chunks.iter().zip(results) {
            match result {
                InvokeResult::Success { response, attempts } => {
                    let (chunk_findings, warnings) =
                        parse_response(&response.text, chunk.index, &anchors[chunk.index]);
                    report.chunks_succeeded += 1;
                    report.findings_produced += chunk_findings.len();
                    report.findings_dropped += warnings.len();
                    report.parse_warnings.extend(warnings);
                    report.chunks.push(ChunkReport {
                        index: chunk.index,
                        files: chunk.file_names(),
                        attempts,
                        status: ChunkStatus::Succeeded {
                            findings: chunk_findings.len(),
                        },
                    });
                    findings.extend(chunk_findings);
                }
                InvokeResult::Failure { error, attempts } => {
                    report.chunks_failed += 1;
                    report.chunks.push(ChunkReport {
                        index: chunk.index,
                        files: chunk.file_names(),
                        attempts,
                        status: ChunkStatus::Failed {
                            error: error.message,
                        },
                    });
                }
                InvokeResult::Cancelled => {
                    report.chunks_cancelled += 1;
                    report.chunks.push(ChunkReport {
                        index: chunk.index,
                        files: chunk.file_names(),
                        attempts: 0,
                        status: ChunkStatus::Cancelled,
                    });
                }
            }
        }

        if report.chunks_cancelled > 0 {
            report.outcome = RunOutcome::Cancelled;
        }

        (report, findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::{Completion, InvokeError};
    use std::collections::HashMap;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Script {
        Ok(String),
        Permanent,
        Hang,
    }

    struct MapBackend {
        scripts: HashMap<usize, Script>,
        calls: Arc<AtomicUsize>,
    }

    impl MapBackend {
        fn new(scripts: Vec<(usize, Script)>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let backend = Self {
                scripts: scripts.into_iter().collect(),
                calls: Arc::clone(&calls),
            };
            (backend, calls)
        }
    }

    impl CompletionBackend for MapBackend {
        fn complete(
            &self,
            request: &crate::prompt::ModelRequest,
        ) -> impl Future<Output = Result<Completion, InvokeError>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.scripts.get(&request.chunk_index);
            let response = match step {
                Some(Script::Ok(text)) => Some(Ok(Completion {
                    text: text.clone(),
                    usage: None,
                })),
                Some(Script::Permanent) => Some(Err(InvokeError {
                    class: crate::invoke::ErrorClass::Permanent,
                    message: "provider rejected request (400)".into(),
                    retry_after: None,
                    rate_limited: false,
                })),
                Some(Script::Hang) => None,
                None => Some(Ok(Completion {
                    text: "{\"findings\":[]}".into(),
                    usage: None,
                })),
            };
            async move {
                match response {
                    Some(result) => result,
                    None => {
                        tokio::time::sleep(Duration::from_secs(86_400)).await;
                        Ok(Completion {
                            text: "{\"findings\":[]}".into(),
                            usage: None,
                        })
                    }
                }
            }
        }
    }

    /// Three files, one addressable added line each (line 2).
    fn three_file_diff() -> String {
        let mut text = String::new();
        for name in ["one.rs", "two.rs", "three.rs"] {
            text.push_str(&format!(
                "diff --git a/{name} b/{name}\n--- a/{name}\n+++ b/{name}\n@@ -1,1 +1,2 @@\n ctx\n+new line of code\n"
            ));
        }
        text
    }

    fn finding_json(file: &str) -> String {
        format!(
            "{{\"findings\":[{{\"file\":\"{file}\",\"line\":2,\"severity\":\"warning\",\"title\":\"Issue\",\"body\":\"problem in {file}\"}}]}}"
        )
    }

    fn config_one_chunk_per_file() -> KestrelConfig {
        KestrelConfig {
            review: ReviewConfig {
                max_chunk_tokens: 1,
                retry_base_ms: 1,
                ..ReviewConfig::default()
            },
            ..KestrelConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn partial_chunk_failure_still_completes() {
        let (backend, _calls) = MapBackend::new(vec![
            (0, Script::Ok(finding_json("one.rs"))),
            (1, Script::Permanent),
            (2, Script::Ok(finding_json("three.rs"))),
        ]);
        let pipeline = ReviewPipeline::new(backend, &config_one_chunk_per_file());
        let report = pipeline
            .run_on_diff(&three_file_diff(), None)
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Done);
        assert_eq!(report.chunks_attempted, 3);
        assert_eq!(report.chunks_succeeded, 2);
        assert_eq!(report.chunks_failed, 1);

        let files: Vec<_> = report
            .comments
            .iter()
            .map(|c| c.file_path.to_string_lossy().to_string())
            .collect();
        assert_eq!(files, vec!["one.rs", "three.rs"]);
    }

    #[tokio::test]
    async fn empty_diff_short_circuits_without_model_calls() {
        let (backend, calls) = MapBackend::new(vec![]);
        let pipeline = ReviewPipeline::new(backend, &KestrelConfig::default());
        let report = pipeline.run_on_diff("", None).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::NothingToReview);
        assert!(report.skipped_reason.is_some());
        assert_eq!(report.chunks_attempted, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn filtered_out_diff_short_circuits() {
        let (backend, calls) = MapBackend::new(vec![]);
        let pipeline = ReviewPipeline::new(backend, &KestrelConfig::default());
        let diff = "\
diff --git a/Cargo.lock b/Cargo.lock
--- a/Cargo.lock
+++ b/Cargo.lock
@@ -1,1 +1,2 @@
 ctx
+version = \"2\"
";
        let report = pipeline.run_on_diff(diff, None).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::NothingToReview);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_response_records_warning_and_continues() {
        let (backend, _calls) = MapBackend::new(vec![
            (0, Script::Ok("not json at all".into())),
            (1, Script::Ok(finding_json("two.rs"))),
            (2, Script::Ok("{\"findings\":[]}".into())),
        ]);
        let pipeline = ReviewPipeline::new(backend, &config_one_chunk_per_file());
        let report = pipeline
            .run_on_diff(&three_file_diff(), None)
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Done);
        assert_eq!(report.chunks_succeeded, 3);
        assert_eq!(report.parse_warnings.len(), 1);
        assert_eq!(report.parse_warnings[0].chunk_index, 0);
        assert_eq!(report.comments.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_run_but_keeps_completed_findings() {
        let (backend, _calls) = MapBackend::new(vec![
            (0, Script::Ok(finding_json("one.rs"))),
            (1, Script::Hang),
            (2, Script::Ok(finding_json("three.rs"))),
        ]);
        let pipeline = ReviewPipeline::new(backend, &config_one_chunk_per_file());
        let report = pipeline
            .run_on_diff(&three_file_diff(), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(report.chunks_cancelled, 1);
        assert_eq!(report.chunks_succeeded, 2);
        assert_eq!(report.comments.len(), 2);
    }

    #[tokio::test]
    async fn malformed_diff_aborts_before_chunking() {
        let (backend, calls) = MapBackend::new(vec![]);
        let pipeline = ReviewPipeline::new(backend, &KestrelConfig::default());
        let diff = "\
diff --git a/a.rs b/a.rs
--- a/a.rs
+++ b/a.rs
@@ bogus @@
+x
";
        let result = pipeline.run_on_diff(diff, None).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_findings_across_chunks_deduplicate() {
        // One oversized file split into two chunks; both rediscover the
        // same issue on the shared anchor line.
        let mut diff = String::from("diff --git a/big.rs b/big.rs\n--- a/big.rs\n+++ b/big.rs\n");
        diff.push_str("@@ -1,1 +1,2 @@\n ctx\n+first hunk line of code\n");
        diff.push_str("@@ -10,1 +10,2 @@\n ctx\n+second hunk line of code\n");

        let body = "{\"findings\":[{\"file\":\"big.rs\",\"line\":2,\"severity\":\"warning\",\"title\":\"Dup\",\"body\":\"duplicate issue body\"}]}";
        let (backend, _calls) = MapBackend::new(vec![
            (0, Script::Ok(body.into())),
            (1, Script::Ok(body.into())),
        ]);
        let pipeline = ReviewPipeline::new(backend, &config_one_chunk_per_file());
        let report = pipeline.run_on_diff(&diff, None).await.unwrap();

        assert_eq!(report.chunks_attempted, 2);
        // Chunk 1 does not contain line 2, so its copy is dropped by the
        // anchor guard; either way exactly one comment survives.
        assert_eq!(report.comments.len(), 1);
    }

    #[test]
    fn report_display_includes_summary_counts() {
        let mut report = RunReport::empty("gpt-4o", RunOutcome::Done);
        report.chunks_attempted = 3;
        report.chunks_succeeded = 2;
        report.chunks_failed = 1;
        report.comments.push(ReviewComment {
            file_path: "a.rs".into(),
            line: 4,
            body: "problem".into(),
            severity: Some(Severity::Warning),
        });
        let text = format!("{report}");
        assert!(text.contains("3 attempted, 2 succeeded, 1 failed"));
        assert!(text.contains("[WARNING] a.rs:4"));

        let md = report.to_markdown();
        assert!(md.contains("# Kestrel Review"));
        assert!(md.contains("a.rs:4"));
    }

    #[test]
    fn summary_comment_lists_findings_table() {
        let mut report = RunReport::empty("gpt-4o", RunOutcome::Done);
        report.chunks_attempted = 2;
        report.chunks_succeeded = 2;
        report.comments.push(ReviewComment {
            file_path: "a.rs".into(),
            line: 4,
            body: "problem".into(),
            severity: Some(Severity::Blocking),
        });
        let summary = report.summary_comment();
        assert!(summary.contains("1 blocking"));
        assert!(summary.contains("| blocking | `a.rs` | 4 |"));

        let clean = RunReport::empty("gpt-4o", RunOutcome::Done).summary_comment();
        assert!(clean.contains("No Issues Found"));
    }

    #[test]
    fn fail_on_threshold_checks_comments() {
        let mut report = RunReport::empty("gpt-4o", RunOutcome::Done);
        report.comments.push(ReviewComment {
            file_path: "a.rs".into(),
            line: 1,
            body: "note".into(),
            severity: Some(Severity::Suggestion),
        });
        assert!(!report.has_findings_at(Severity::Warning));
        assert!(report.has_findings_at(Severity::Suggestion));
    }
}
