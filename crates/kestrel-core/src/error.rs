/// Errors that can occur across the Kestrel pipeline.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary crate converts to `miette::Error` at the boundary.
///
/// # Examples
///
/// ```
/// use kestrel_core::KestrelError;
///
/// let err = KestrelError::Config("missing API key".into());
/// assert!(err.to_string().contains("missing API key"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum KestrelError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A diff that violates structural invariants (overlapping hunks,
    /// duplicate file paths, non-increasing line numbers). Fatal: the
    /// pipeline aborts before chunking.
    #[error("malformed diff: {0}")]
    MalformedDiff(String),

    /// Unified diff text that could not be parsed at all.
    #[error("diff parse error: {0}")]
    Parse(String),

    /// GitHub API or network failure.
    #[error("github error: {0}")]
    Github(String),

    /// The pull request does not exist or is not visible with the
    /// provided token.
    #[error("pull request not found: {0}")]
    NotFound(String),

    /// The GitHub token was rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// LLM API or response error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
