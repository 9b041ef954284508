//! Prompt construction and response parsing.
//!
//! The instruction preamble and the response grammar live together in
//! this module: [`RawReview`]/[`RawFinding`] are the serde schema the
//! parser deserializes, and [`RESPONSE_CONTRACT`] is the JSON shape shown
//! to the model. A test asserts the contract parses into the schema so
//! the two cannot drift apart.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fmt::Write as _;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use kestrel_core::{Finding, LlmConfig, ReviewConfig, Severity};
use kestrel_diff::model::{Hunk, LineKind};

use crate::chunk::Chunk;

const SYSTEM_PROMPT: &str = "\
You are Kestrel, an expert code reviewer. Your job is to find genuine bugs, \
security issues, and significant problems in pull request changes.

Rules:
- Only report issues you are confident about
- Anchor every finding to a line number shown in the diff (the `L<n>` prefix)
- Do not speculate about code you cannot see
- Do not comment on style, formatting, or naming unless it creates a bug
- Focus on: logic errors, security vulnerabilities, race conditions, resource leaks, broken error handling

Severity levels: \"blocking\" (must fix before merge), \"warning\" (likely \
problem), \"suggestion\" (optional improvement), \"info\" (observation).";

/// The exact response shape requested from the model. Kept in lockstep
/// with [`RawReview`] by `contract_parses_into_schema` below.
pub const RESPONSE_CONTRACT: &str = r#"{
  "findings": [
    {
      "file": "path/to/file.rs",
      "line": 42,
      "severity": "warning",
      "title": "Short summary of the issue",
      "body": "Clear explanation of why this is a problem",
      "suggestion": "Optional fix suggestion"
    }
  ]
}"#;

/// Top-level response schema.
#[derive(Debug, Serialize, Deserialize)]
pub struct RawReview {
    /// One entry per reviewable issue.
    pub findings: Vec<RawFinding>,
}

/// One finding as emitted by the model, before validation.
#[derive(Debug, Serialize, Deserialize)]
pub struct RawFinding {
    /// File path relative to the repository root.
    pub file: String,
    /// New-file line number; accepted as number or numeric string.
    pub line: Option<serde_json::Value>,
    /// Severity keyword.
    pub severity: String,
    /// Short summary.
    #[serde(default)]
    pub title: String,
    /// Detailed explanation.
    #[serde(alias = "description", alias = "message")]
    pub body: String,
    /// Optional fix suggestion.
    pub suggestion: Option<String>,
}

/// Model parameters attached to every request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelParams {
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum output tokens.
    pub max_output_tokens: u32,
}

/// The set of (file, line) pairs a chunk can legitimately anchor a
/// comment to. Built at request time and carried with the request so the
/// parser can drop hallucinated anchors.
#[derive(Debug, Clone, Default)]
pub struct ChunkAnchors {
    lines: HashMap<String, HashSet<u32>>,
}

impl ChunkAnchors {
    /// Collect addressable lines (added and context) from a chunk.
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let mut lines: HashMap<String, HashSet<u32>> = HashMap::new();
        for file in &chunk.files {
            let entry = lines
                .entry(file.path.to_string_lossy().to_string())
                .or_default();
            for hunk in &file.hunks {
                for line in &hunk.lines {
                    if let Some(n) = line.new_line {
                        entry.insert(n);
                    }
                }
            }
        }
        Self { lines }
    }

    /// Whether (`file`, `line`) is addressable in this chunk.
    pub fn contains(&self, file: &str, line: u32) -> bool {
        self.lines.get(file).is_some_and(|s| s.contains(&line))
    }
}

/// A fully rendered model request for one chunk.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Index of the chunk this request reviews.
    pub chunk_index: usize,
    /// System instructions including the response contract.
    pub system_prompt: String,
    /// Rendered diff content.
    pub user_prompt: String,
    /// Model parameters.
    pub params: ModelParams,
    /// Addressable lines for anchor validation.
    pub anchors: ChunkAnchors,
}

/// A non-fatal parsing problem, recorded on the run report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseWarning {
    /// Chunk whose response produced the warning.
    pub chunk_index: usize,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk {}: {}", self.chunk_index, self.message)
    }
}

/// Build the system prompt, including the response contract.
pub fn build_system_prompt() -> String {
    format!("{SYSTEM_PROMPT}\n\nRespond with a JSON object of this exact shape:\n{RESPONSE_CONTRACT}\n\nIf you find no issues, return: {{ \"findings\": [] }}")
}

/// Render a chunk into a [`ModelRequest`].
///
/// Each hunk is rendered with at most `context_lines` unchanged lines on
/// each side of a changed run; every surviving line that exists in the
/// new file carries its `L<n>` line number so the model can anchor
/// findings.
pub fn build_request(chunk: &Chunk, review: &ReviewConfig, llm: &LlmConfig) -> ModelRequest {
    let mut user = String::from("Review the following code changes:\n");
    for file in &chunk.files {
        let _ = writeln!(user, "\nFile: {} ({})", file.path.display(), file.kind);
        for hunk in &file.hunks {
            let _ = writeln!(
                user,
                "@@ -{},{} +{},{} @@",
                hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
            );
            render_hunk(&mut user, hunk, review.context_lines);
        }
    }

    ModelRequest {
        chunk_index: chunk.index,
        system_prompt: build_system_prompt(),
        user_prompt: user,
        params: ModelParams {
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_output_tokens: llm.max_output_tokens,
        },
        anchors: ChunkAnchors::from_chunk(chunk),
    }
}

fn render_hunk(out: &mut String, hunk: &Hunk, context_lines: usize) {
    // Keep a line if it is changed or within `context_lines` of a change.
    let changed: Vec<usize> = hunk
        .lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.kind != LineKind::Context)
        .map(|(i, _)| i)
        .collect();

    let keep = |i: usize| -> bool {
        changed
            .iter()
            .any(|&c| i.abs_diff(c) <= context_lines)
    };

    let mut elided = false;
    for (i, line) in hunk.lines.iter().enumerate() {
        if !changed.is_empty() && !keep(i) {
            if !elided {
                let _ = writeln!(out, "  ...");
                elided = true;
            }
            continue;
        }
        elided = false;
        match (line.kind, line.new_line) {
            (LineKind::Added, Some(n)) => {
                let _ = writeln!(out, "L{n} + {}", line.content);
            }
            (LineKind::Context, Some(n)) => {
                let _ = writeln!(out, "L{n}   {}", line.content);
            }
            _ => {
                let _ = writeln!(out, "     - {}", line.content);
            }
        }
    }
}

/// Parse a raw model response into validated findings.
///
/// Never errors: wholly unparseable text yields zero findings and exactly
/// one warning; individually invalid findings (bad severity, missing
/// line, anchor outside the chunk) are dropped with a warning each.
pub fn parse_response(
    raw: &str,
    chunk_index: usize,
    anchors: &ChunkAnchors,
) -> (Vec<Finding>, Vec<ParseWarning>) {
    let cleaned = strip_code_fences(raw);

    let parsed: RawReview = match serde_json::from_str(cleaned) {
        Ok(review) => review,
        // Some models emit the findings array without the wrapper object.
        Err(_) => match serde_json::from_str::<Vec<RawFinding>>(cleaned) {
            Ok(findings) => RawReview { findings },
            Err(e) => {
                return (
                    Vec::new(),
                    vec![ParseWarning {
                        chunk_index,
                        message: format!("unparseable model response: {e}"),
                    }],
                );
            }
        },
    };

    let mut findings = Vec::new();
    let mut warnings = Vec::new();
    let mut warn = |message: String| {
        warnings.push(ParseWarning {
            chunk_index,
            message,
        });
    };

    for raw_finding in parsed.findings {
        let Some(line) = coerce_line(raw_finding.line.as_ref()) else {
            warn(format!(
                "finding for {} has no usable line number",
                raw_finding.file
            ));
            continue;
        };

        let severity = match parse_severity(&raw_finding.severity) {
            Some(s) => s,
            None => {
                warn(format!(
                    "finding for {}:{line} has unknown severity '{}'",
                    raw_finding.file, raw_finding.severity
                ));
                continue;
            }
        };

        if !anchors.contains(&raw_finding.file, line) {
            warn(format!(
                "finding anchored to {}:{line}, which is not part of this chunk",
                raw_finding.file
            ));
            continue;
        }

        let mut body = raw_finding.body;
        if let Some(suggestion) = raw_finding.suggestion {
            if !suggestion.trim().is_empty() {
                body.push_str("\n\nSuggested fix: ");
                body.push_str(&suggestion);
            }
        }

        findings.push(Finding::new(
            PathBuf::from(&raw_finding.file),
            line,
            severity,
            raw_finding.title,
            body,
        ));
    }

    (findings, warnings)
}

fn coerce_line(value: Option<&serde_json::Value>) -> Option<u32> {
    let line = match value? {
        serde_json::Value::Number(n) => n.as_u64()?,
        serde_json::Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    if line == 0 || line > u32::MAX as u64 {
        return None;
    }
    Some(line as u32)
}

fn parse_severity(raw: &str) -> Option<Severity> {
    match raw.to_lowercase().as_str() {
        "blocking" | "bug" | "critical" => Some(Severity::Blocking),
        "warning" => Some(Severity::Warning),
        "suggestion" => Some(Severity::Suggestion),
        "info" => Some(Severity::Info),
        _ => None,
    }
}

fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}
