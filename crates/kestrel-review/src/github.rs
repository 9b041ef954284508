//! GitHub pull request client: diff retrieval and review publication.

use serde::Serialize;

use kestrel_core::{KestrelError, PullRequestRef, ReviewComment, Severity};

/// Pull request metadata captured at fetch time.
///
/// `head_sha` anchors published comments; if the PR advances mid-run,
/// stale anchors fail individual comments rather than mis-anchoring them.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrMetadata {
    /// PR title.
    pub title: String,
    /// PR description.
    pub body: Option<String>,
    /// Login of the PR author.
    pub author: String,
    /// Head commit SHA at fetch time.
    pub head_sha: String,
    /// Label names on the PR.
    pub labels: Vec<String>,
}

/// Known bot suffixes, used to avoid reviewing machine-authored PRs.
const BOT_MARKERS: &[&str] = &["[bot]", "github-actions", "dependabot"];

impl PrMetadata {
    /// Whether the PR author looks like a bot.
    ///
    /// # Examples
    ///
    /// ```
    /// use kestrel_review::github::PrMetadata;
    ///
    /// let meta = PrMetadata {
    ///     title: "Bump deps".into(),
    ///     body: None,
    ///     author: "dependabot[bot]".into(),
    ///     head_sha: "abc".into(),
    ///     labels: vec![],
    /// };
    /// assert!(meta.author_is_bot());
    /// ```
    pub fn author_is_bot(&self) -> bool {
        let author = self.author.to_lowercase();
        BOT_MARKERS.iter().any(|m| author.contains(m))
    }
}

/// Per-comment publication result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentResult {
    /// The comment that was posted (or attempted).
    pub comment: ReviewComment,
    /// Failure message, if posting this comment failed.
    pub error: Option<String>,
}

/// Result of publishing a review: some comments may post while others
/// fail (stale line anchors, permission changes mid-run).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    /// Comments successfully posted.
    pub posted: usize,
    /// Comments that failed to post.
    pub failed: usize,
    /// Per-comment results in publication order.
    pub results: Vec<CommentResult>,
    /// Whether the summary comment was posted.
    pub summary_posted: bool,
    /// Failure message for the summary comment, if any.
    pub summary_error: Option<String>,
}

impl PublishOutcome {
    /// True when comments were expected but none were delivered — the
    /// only publish condition that escalates to a failed run.
    pub fn is_total_failure(&self) -> bool {
        self.posted == 0 && self.failed > 0
    }

    /// True when some but not all comments posted.
    pub fn is_partial_failure(&self) -> bool {
        self.posted > 0 && self.failed > 0
    }
}

/// GitHub client for fetching PR diffs and posting reviews.
pub struct GitHubClient {
    octocrab: octocrab::Octocrab,
    http: reqwest::Client,
    token: String,
}

impl GitHubClient {
    /// Create a client from an explicit token or the `GITHUB_TOKEN` /
    /// `GH_TOKEN` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::Config`] if no token is available, or
    /// [`KestrelError::Github`] if the client cannot be built.
    pub fn new(token: Option<&str>) -> Result<Self, KestrelError> {
        let token = match token {
            Some(t) => t.to_string(),
            None => std::env::var("GITHUB_TOKEN")
                .or_else(|_| std::env::var("GH_TOKEN"))
                .map_err(|_| {
                    KestrelError::Config(
                        "GITHUB_TOKEN not set. Pass --github-token or set GITHUB_TOKEN".into(),
                    )
                })?,
        };

        let octocrab = octocrab::Octocrab::builder()
            .personal_token(token.clone())
            .build()
            .map_err(|e| KestrelError::Github(format!("failed to create GitHub client: {e}")))?;

        let http = reqwest::Client::new();

        Ok(Self {
            octocrab,
            http,
            token,
        })
    }

    /// Fetch PR metadata (title, author, head SHA, labels).
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::NotFound`], [`KestrelError::Unauthorized`],
    /// or [`KestrelError::Github`] depending on the API response.
    pub async fn fetch_metadata(&self, pr: &PullRequestRef) -> Result<PrMetadata, KestrelError> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/pulls/{}",
            pr.owner, pr.repo, pr.number
        );

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "kestrel")
            .send()
            .await
            .map_err(|e| KestrelError::Github(format!("failed to fetch PR metadata: {e}")))?;

        let response = map_status(response, pr)?;
        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| KestrelError::Github(format!("failed to parse PR metadata: {e}")))?;

        Ok(PrMetadata {
            title: str_field(&value, &["title"]).unwrap_or_default(),
            body: str_field(&value, &["body"]),
            author: str_field(&value, &["user", "login"]).unwrap_or_default(),
            head_sha: str_field(&value, &["head", "sha"]).unwrap_or_default(),
            labels: value
                .get("labels")
                .and_then(|l| l.as_array())
                .map(|labels| {
                    labels
                        .iter()
                        .filter_map(|l| str_field(l, &["name"]))
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// Fetch the unified diff for a pull request.
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::NotFound`], [`KestrelError::Unauthorized`],
    /// or [`KestrelError::Github`] depending on the API response.
    pub async fn fetch_diff(&self, pr: &PullRequestRef) -> Result<String, KestrelError> {
        let url = format!(
            "https://api.github.com/repos/{}/{}/pulls/{}",
            pr.owner, pr.repo, pr.number
        );

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github.v3.diff")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "kestrel")
            .send()
            .await
            .map_err(|e| KestrelError::Github(format!("failed to fetch PR diff: {e}")))?;

        let response = map_status(response, pr)?;
        response
            .text()
            .await
            .map_err(|e| KestrelError::Github(format!("failed to read diff response: {e}")))
    }

    /// Publish review comments, each anchored to `head_sha`, followed by
    /// a summary comment.
    ///
    /// Comments are posted individually so partial success is
    /// representable: a stale anchor fails that comment only. Never
    /// errors; failures are recorded in the returned [`PublishOutcome`].
    pub async fn publish_review(
        &self,
        pr: &PullRequestRef,
        comments: &[ReviewComment],
        head_sha: &str,
        summary: &str,
    ) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();

        let route = format!(
            "/repos/{}/{}/pulls/{}/comments",
            pr.owner, pr.repo, pr.number
        );
        for comment in comments {
            let payload = comment_payload(comment, head_sha);
            let result: Result<serde_json::Value, octocrab::Error> =
                self.octocrab.post(&route, Some(&payload)).await;
            match result {
                Ok(_) => {
                    outcome.posted += 1;
                    outcome.results.push(CommentResult {
                        comment: comment.clone(),
                        error: None,
                    });
                }
                Err(e) => {
                    outcome.failed += 1;
                    outcome.results.push(CommentResult {
                        comment: comment.clone(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let summary_route = format!(
            "/repos/{}/{}/issues/{}/comments",
            pr.owner, pr.repo, pr.number
        );
        let summary_payload = serde_json::json!({ "body": summary });
        let summary_result: Result<serde_json::Value, octocrab::Error> = self
            .octocrab
            .post(&summary_route, Some(&summary_payload))
            .await;
        match summary_result {
            Ok(_) => outcome.summary_posted = true,
            Err(e) => outcome.summary_error = Some(e.to_string()),
        }

        outcome
    }
}

fn map_status(
    response: reqwest::Response,
    pr: &PullRequestRef,
) -> Result<reqwest::Response, KestrelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status.as_u16() {
        404 => Err(KestrelError::NotFound(pr.to_string())),
        401 | 403 => Err(KestrelError::Unauthorized(format!(
            "GitHub rejected the token for {pr}"
        ))),
        _ => Err(KestrelError::Github(format!("GitHub API error {status}"))),
    }
}

fn str_field(value: &serde_json::Value, path: &[&str]) -> Option<String> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(key)?;
    }
    cursor.as_str().map(|s| s.to_string())
}

/// The request body for one inline review comment.
pub fn comment_payload(comment: &ReviewComment, head_sha: &str) -> serde_json::Value {
    serde_json::json!({
        "body": render_comment_body(comment),
        "commit_id": head_sha,
        "path": comment.file_path.to_string_lossy(),
        "line": comment.line,
        "side": "RIGHT",
    })
}

/// Render a comment body with its severity label.
pub fn render_comment_body(comment: &ReviewComment) -> String {
    match comment.severity {
        Some(severity) => {
            let (emoji, label) = severity_badge(severity);
            format!("**{emoji} {label}**\n\n{}", comment.body)
        }
        None => comment.body.clone(),
    }
}

fn severity_badge(severity: Severity) -> (&'static str, &'static str) {
    match severity {
        Severity::Blocking => ("\u{1f6d1}", "Blocking"),
        Severity::Warning => ("\u{26a0}\u{fe0f}", "Warning"),
        Severity::Suggestion => ("\u{1f4a1}", "Suggestion"),
        Severity::Info => ("\u{2139}\u{fe0f}", "Info"),
    }
}
