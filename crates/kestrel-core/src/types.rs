use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::KestrelError;

/// Reference to a pull request on the source-control host.
///
/// Created once at pipeline start from CLI input and never mutated.
///
/// # Examples
///
/// ```
/// use kestrel_core::PullRequestRef;
///
/// let pr: PullRequestRef = "octocat/hello-world#42".parse().unwrap();
/// assert_eq!(pr.owner, "octocat");
/// assert_eq!(pr.repo, "hello-world");
/// assert_eq!(pr.number, 42);
/// assert_eq!(pr.to_string(), "octocat/hello-world#42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequestRef {
    /// Repository owner (user or organization).
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Pull request number.
    pub number: u64,
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

impl FromStr for PullRequestRef {
    type Err = KestrelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((owner_repo, number_str)) = s.split_once('#') else {
            return Err(KestrelError::Config(format!(
                "invalid PR reference '{s}', expected owner/repo#number"
            )));
        };
        let Some((owner, repo)) = owner_repo.split_once('/') else {
            return Err(KestrelError::Config(format!(
                "invalid PR reference '{s}', expected owner/repo#number"
            )));
        };
        if owner.is_empty() || repo.is_empty() {
            return Err(KestrelError::Config(format!(
                "invalid PR reference '{s}', expected owner/repo#number"
            )));
        }
        let number: u64 = number_str
            .parse()
            .map_err(|_| KestrelError::Config(format!("invalid PR number: {number_str}")))?;
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
        })
    }
}

/// Severity level of a review finding.
///
/// # Examples
///
/// ```
/// use kestrel_core::Severity;
///
/// let s: Severity = serde_json::from_str("\"blocking\"").unwrap();
/// assert_eq!(s, Severity::Blocking);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A defect that should block the merge.
    Blocking,
    /// A potential issue worth investigating.
    Warning,
    /// An optional improvement.
    Suggestion,
    /// Informational observation.
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Blocking => write!(f, "blocking"),
            Severity::Warning => write!(f, "warning"),
            Severity::Suggestion => write!(f, "suggestion"),
            Severity::Info => write!(f, "info"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blocking" => Ok(Severity::Blocking),
            "warning" => Ok(Severity::Warning),
            "suggestion" => Ok(Severity::Suggestion),
            "info" => Ok(Severity::Info),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

impl Severity {
    /// Returns `true` if `self` is at least as severe as `threshold`.
    ///
    /// Severity order: Blocking > Warning > Suggestion > Info.
    ///
    /// # Examples
    ///
    /// ```
    /// use kestrel_core::Severity;
    ///
    /// assert!(Severity::Blocking.meets_threshold(Severity::Warning));
    /// assert!(Severity::Warning.meets_threshold(Severity::Warning));
    /// assert!(!Severity::Suggestion.meets_threshold(Severity::Warning));
    /// ```
    pub fn meets_threshold(self, threshold: Severity) -> bool {
        self.rank() <= threshold.rank()
    }

    pub(crate) fn rank(self) -> u8 {
        match self {
            Severity::Blocking => 0,
            Severity::Warning => 1,
            Severity::Suggestion => 2,
            Severity::Info => 3,
        }
    }

    /// The more severe of two severities.
    pub fn max(self, other: Severity) -> Severity {
        if self.rank() <= other.rank() {
            self
        } else {
            other
        }
    }
}

/// One issue identified by the model for a specific chunk, prior to
/// cross-chunk deduplication.
///
/// Findings are immutable once parsed. The fingerprint is the
/// deduplication key, derived from file, line, and normalized body.
///
/// # Examples
///
/// ```
/// use kestrel_core::{Finding, Severity};
/// use std::path::PathBuf;
///
/// let a = Finding::new(
///     PathBuf::from("src/auth.rs"),
///     42,
///     Severity::Blocking,
///     "Possible null dereference".into(),
///     "`user` may be None here.".into(),
/// );
/// let b = Finding::new(
///     PathBuf::from("src/auth.rs"),
///     42,
///     Severity::Warning,
///     "Different title".into(),
///     "`user`   may be None here!".into(),
/// );
/// // Same location and normalized body => same fingerprint.
/// assert_eq!(a.fingerprint, b.fingerprint);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Path to the file being commented on.
    pub file_path: PathBuf,
    /// Line number in the new version of the file.
    pub line: u32,
    /// Severity of the finding.
    pub severity: Severity,
    /// Short summary of the issue.
    pub title: String,
    /// Detailed explanation.
    pub body: String,
    /// Stable deduplication key (hex SHA-256 of file + line + normalized body).
    pub fingerprint: String,
}

impl Finding {
    /// Construct a finding, computing its fingerprint.
    pub fn new(
        file_path: PathBuf,
        line: u32,
        severity: Severity,
        title: String,
        body: String,
    ) -> Self {
        let fingerprint = compute_fingerprint(&file_path, line, &body);
        Self {
            file_path,
            line,
            severity,
            title,
            body,
            fingerprint,
        }
    }
}

/// Normalize a finding body for fingerprinting and similarity comparison:
/// lowercase, collapse whitespace runs, strip trailing punctuation.
///
/// # Examples
///
/// ```
/// use kestrel_core::normalize_body;
///
/// assert_eq!(
///     normalize_body("This  may  be None."),
///     normalize_body("this may be none"),
/// );
/// ```
pub fn normalize_body(body: &str) -> String {
    let collapsed = body
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(['.', '!', ',', ';', ':'])
        .to_string()
}

fn compute_fingerprint(file_path: &std::path::Path, line: u32, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.to_string_lossy().as_bytes());
    hasher.update(line.to_le_bytes());
    hasher.update(normalize_body(body).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The final, published, deduplicated unit of feedback attached to a
/// file and line. Possibly merged from several [`Finding`]s.
///
/// # Examples
///
/// ```
/// use kestrel_core::{ReviewComment, Severity};
/// use std::path::PathBuf;
///
/// let comment = ReviewComment {
///     file_path: PathBuf::from("src/auth.rs"),
///     line: 42,
///     body: "Possible null dereference".into(),
///     severity: Some(Severity::Blocking),
/// };
/// assert_eq!(comment.severity, Some(Severity::Blocking));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewComment {
    /// Path to the file being commented on.
    pub file_path: PathBuf,
    /// Line number in the new version of the file.
    pub line: u32,
    /// Rendered comment body.
    pub body: String,
    /// Severity label, if the merged findings agree on one.
    pub severity: Option<Severity>,
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument
/// parsing.
///
/// # Examples
///
/// ```
/// use kestrel_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
