use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::KestrelError;
use crate::types::Severity;

/// Top-level configuration loaded from `.kestrel.toml`.
///
/// Resolution order: CLI flags > env vars (credentials) > config file >
/// defaults. All values are read once at run start; the pipeline never
/// re-reads configuration mid-run.
///
/// # Examples
///
/// ```
/// use kestrel_core::KestrelConfig;
///
/// let config = KestrelConfig::default();
/// assert_eq!(config.review.max_chunk_tokens, 4000);
/// assert_eq!(config.review.concurrency, 4);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KestrelConfig {
    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Review pipeline settings.
    #[serde(default)]
    pub review: ReviewConfig,
}

impl KestrelConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::Io`] if the file cannot be read, or
    /// [`KestrelError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use kestrel_core::KestrelConfig;
    /// use std::path::Path;
    ///
    /// let config = KestrelConfig::from_file(Path::new(".kestrel.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, KestrelError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use kestrel_core::KestrelConfig;
    ///
    /// let toml = r#"
    /// [review]
    /// max_chunk_tokens = 8000
    /// "#;
    /// let config = KestrelConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.review.max_chunk_tokens, 8000);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, KestrelError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }
}

/// LLM provider configuration.
///
/// A single OpenAI-compatible chat-completions contract is assumed;
/// swapping providers is a matter of `base_url` + `model`.
///
/// # Examples
///
/// ```
/// use kestrel_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model, "gpt-4o");
/// assert_eq!(config.temperature, 0.1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key for the provider (else `OPENAI_API_KEY`).
    pub api_key: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum output tokens per completion.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_model() -> String {
    "gpt-4o".into()
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_output_tokens() -> u32 {
    2048
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            base_url: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
        }
    }
}

/// Review pipeline configuration.
///
/// # Examples
///
/// ```
/// use kestrel_core::{ReviewConfig, Severity};
///
/// let config = ReviewConfig::default();
/// assert_eq!(config.context_lines, 3);
/// assert_eq!(config.min_severity, Severity::Suggestion);
/// assert!(!config.publish_on_cancel);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Token budget per review chunk (default: 4000).
    #[serde(default = "default_max_chunk_tokens")]
    pub max_chunk_tokens: usize,
    /// Unchanged context lines kept on each side of a change (default: 3).
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
    /// Maximum concurrent model calls (default: 4).
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Maximum retry attempts for transient failures (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay in milliseconds (default: 500).
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Lowest severity to publish (default: suggestion).
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
    /// Similarity threshold for merging near-duplicate findings at the
    /// same file and line (default: 0.6).
    #[serde(default = "default_near_dup_threshold")]
    pub near_dup_threshold: f64,
    /// Maximum number of published comments (default: 50).
    #[serde(default = "default_max_comments")]
    pub max_comments: usize,
    /// Glob patterns skipped before chunking.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Publish findings completed before a run deadline expired
    /// (default: false).
    #[serde(default)]
    pub publish_on_cancel: bool,
}

fn default_max_chunk_tokens() -> usize {
    4000
}

fn default_context_lines() -> usize {
    3
}

fn default_concurrency() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_min_severity() -> Severity {
    Severity::Suggestion
}

fn default_near_dup_threshold() -> f64 {
    0.6
}

fn default_max_comments() -> usize {
    50
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            max_chunk_tokens: default_max_chunk_tokens(),
            context_lines: default_context_lines(),
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            min_severity: default_min_severity(),
            near_dup_threshold: default_near_dup_threshold(),
            max_comments: default_max_comments(),
            exclude_patterns: Vec::new(),
            publish_on_cancel: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = KestrelConfig::default();
        assert_eq!(config.review.max_chunk_tokens, 4000);
        assert_eq!(config.review.context_lines, 3);
        assert_eq!(config.review.concurrency, 4);
        assert_eq!(config.review.max_retries, 3);
        assert_eq!(config.review.retry_base_ms, 500);
        assert_eq!(config.review.min_severity, Severity::Suggestion);
        assert_eq!(config.review.near_dup_threshold, 0.6);
        assert_eq!(config.review.max_comments, 50);
        assert!(config.review.exclude_patterns.is_empty());
        assert!(!config.review.publish_on_cancel);
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_output_tokens, 2048);
    }

    #[test]
    fn parse_minimal_toml() {
        let toml = r#"
[review]
max_chunk_tokens = 8000
concurrency = 8
"#;
        let config = KestrelConfig::from_toml(toml).unwrap();
        assert_eq!(config.review.max_chunk_tokens, 8000);
        assert_eq!(config.review.concurrency, 8);
        // Untouched fields keep defaults
        assert_eq!(config.review.context_lines, 3);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[llm]
model = "gpt-4o-mini"
base_url = "http://localhost:11434"
temperature = 0.0
max_output_tokens = 1024

[review]
max_chunk_tokens = 2000
context_lines = 5
concurrency = 2
max_retries = 5
min_severity = "warning"
near_dup_threshold = 0.8
exclude_patterns = ["*.lock", "vendor/**"]
publish_on_cancel = true
"#;
        let config = KestrelConfig::from_toml(toml).unwrap();
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.base_url.as_deref(), Some("http://localhost:11434"));
        assert_eq!(config.llm.temperature, 0.0);
        assert_eq!(config.review.min_severity, Severity::Warning);
        assert_eq!(config.review.near_dup_threshold, 0.8);
        assert_eq!(config.review.exclude_patterns, vec!["*.lock", "vendor/**"]);
        assert!(config.review.publish_on_cancel);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = KestrelConfig::from_toml("").unwrap();
        assert_eq!(config.review.max_chunk_tokens, 4000);
        assert_eq!(config.llm.model, "gpt-4o");
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = KestrelConfig::from_toml("{{invalid}}");
        assert!(result.is_err());
    }
}
