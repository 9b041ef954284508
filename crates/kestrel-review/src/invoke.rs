//! Model invocation with bounded concurrency, retry, and a shared
//! rate-limit cooldown.
//!
//! Requests fan out onto tokio tasks gated by a semaphore; results come
//! back in request order regardless of completion order. Transient
//! failures retry with exponential backoff plus jitter; a 429 from any
//! request extends a [`RateGate`] cooldown observed by every in-flight
//! and pending request before its next attempt.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use kestrel_core::{KestrelError, LlmConfig, ReviewConfig};

use crate::prompt::ModelRequest;

/// How a provider failure should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeout, connection failure, 429, or 5xx: retried with backoff.
    Transient,
    /// Any other 4xx or a malformed request: fails the unit immediately.
    Permanent,
}

/// A classified provider error.
#[derive(Debug, Clone)]
pub struct InvokeError {
    /// Retry classification.
    pub class: ErrorClass,
    /// Human-readable description.
    pub message: String,
    /// Provider-requested wait, from a `Retry-After` header.
    pub retry_after: Option<Duration>,
    /// Whether this was a rate-limit response (extends the shared gate).
    pub rate_limited: bool,
}

impl InvokeError {
    fn transient(message: String) -> Self {
        Self {
            class: ErrorClass::Transient,
            message,
            retry_after: None,
            rate_limited: false,
        }
    }

    fn permanent(message: String) -> Self {
        Self {
            class: ErrorClass::Permanent,
            message,
            retry_after: None,
            rate_limited: false,
        }
    }
}

/// Token accounting reported by the provider, when available.
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens produced in the completion.
    pub completion_tokens: u32,
}

/// A successful completion, before being tied back to its chunk.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Raw response text.
    pub text: String,
    /// Token usage, if the provider reported it.
    pub usage: Option<TokenUsage>,
}

/// A successful model response for one chunk.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// Index of the chunk this response reviews.
    pub chunk_index: usize,
    /// Raw response text, consumed immediately by the parser.
    pub text: String,
    /// Token usage, if reported.
    pub usage: Option<TokenUsage>,
}

/// Outcome of invoking one request, including retries.
#[derive(Debug, Clone)]
pub enum InvokeResult {
    /// The request completed.
    Success {
        /// The model response.
        response: ModelResponse,
        /// Attempts used, including the successful one.
        attempts: u32,
    },
    /// The request failed permanently or exhausted its retries.
    Failure {
        /// The final error.
        error: InvokeError,
        /// Attempts used.
        attempts: u32,
    },
    /// The run deadline expired before the request finished.
    Cancelled,
}

/// The single model-invocation contract.
///
/// Implemented by [`LlmClient`] for the real provider and by scripted
/// backends in tests.
pub trait CompletionBackend: Send + Sync + 'static {
    /// Send one completion request.
    fn complete(
        &self,
        request: &ModelRequest,
    ) -> impl Future<Output = Result<Completion, InvokeError>> + Send;
}

/// Shared rate-limit cooldown observed by all concurrent invocation
/// tasks.
///
/// An explicit object threaded through the invoker, not ambient global
/// state: a single "cooldown until" instant behind a mutex, extended on
/// every rate-limit response and awaited before every attempt.
#[derive(Debug, Default)]
pub struct RateGate {
    cooldown_until: Mutex<Option<Instant>>,
}

impl RateGate {
    /// A gate with no active cooldown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep until any active cooldown has passed.
    pub async fn wait(&self) {
        let target = *self.cooldown_until.lock().unwrap();
        if let Some(until) = target {
            if until > Instant::now() {
                tokio::time::sleep_until(until).await;
            }
        }
    }

    /// Extend the cooldown to at least `duration` from now. A shorter
    /// existing cooldown is replaced; a longer one is kept.
    pub fn throttle(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut guard = self.cooldown_until.lock().unwrap();
        match *guard {
            Some(existing) if existing >= until => {}
            _ => *guard = Some(until),
        }
    }

    /// Remaining cooldown, if any.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let guard = self.cooldown_until.lock().unwrap();
        guard.and_then(|until| until.checked_duration_since(Instant::now()))
    }
}

/// Dispatches model requests with bounded concurrency and per-request
/// retry.
pub struct Invoker<C> {
    backend: Arc<C>,
    concurrency: usize,
    max_retries: u32,
    retry_base: Duration,
    gate: Arc<RateGate>,
}

impl<C: CompletionBackend> Invoker<C> {
    /// Create an invoker from a backend and review configuration.
    pub fn new(backend: C, config: &ReviewConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(config.retry_base_ms),
            gate: Arc::new(RateGate::new()),
        }
    }

    /// The shared rate gate (exposed for inspection).
    pub fn gate(&self) -> Arc<RateGate> {
        Arc::clone(&self.gate)
    }

    /// Invoke one request, retrying transient failures.
    pub async fn invoke(&self, request: ModelRequest) -> InvokeResult {
        invoke_one(
            Arc::clone(&self.backend),
            Arc::clone(&self.gate),
            request,
            self.max_retries,
            self.retry_base,
        )
        .await
    }

    /// Invoke all requests concurrently, preserving request order in the
    /// output regardless of completion order.
    ///
    /// With a `timeout`, tasks still unfinished at the deadline are
    /// aborted and reported as [`InvokeResult::Cancelled`]; completed
    /// results are kept.
    pub async fn invoke_all(
        &self,
        requests: Vec<ModelRequest>,
        timeout: Option<Duration>,
    ) -> Vec<InvokeResult> {
        let mut results: Vec<InvokeResult> =
            requests.iter().map(|_| InvokeResult::Cancelled).collect();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut tasks = JoinSet::new();
        for (slot, request) in requests.into_iter().enumerate() {
            let backend = Arc::clone(&self.backend);
            let gate = Arc::clone(&self.gate);
            let semaphore = Arc::clone(&semaphore);
            let max_retries = self.max_retries;
            let retry_base = self.retry_base;
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.unwrap();
                let result = invoke_one(backend, gate, request, max_retries, retry_base).await;
                (slot, result)
            });
        }

        loop {
            let joined = match deadline {
                Some(until) => tokio::select! {
                    joined = tasks.join_next() => joined,
                    _ = tokio::time::sleep_until(until) => {
                        tasks.abort_all();
                        break;
                    }
                },
                None => tasks.join_next().await,
            };
            match joined {
                Some(Ok((slot, result))) => results[slot] = result,
                Some(Err(_)) => {} // aborted or panicked task stays Cancelled
                None => break,
            }
        }

        results
    }
}

async fn invoke_one<C: CompletionBackend>(
    backend: Arc<C>,
    gate: Arc<RateGate>,
    request: ModelRequest,
    max_retries: u32,
    retry_base: Duration,
) -> InvokeResult {
    let mut attempt: u32 = 0;
    loop {
        gate.wait().await;

        match backend.complete(&request).await {
            Ok(completion) => {
                return InvokeResult::Success {
                    response: ModelResponse {
                        chunk_index: request.chunk_index,
                        text: completion.text,
                        usage: completion.usage,
                    },
                    attempts: attempt + 1,
                };
            }
            Err(error) => {
                let delay = error
                    .retry_after
                    .unwrap_or_else(|| backoff_delay(retry_base, attempt));
                if error.rate_limited {
                    // One rate-limited chunk reduces pressure on all
                    // pending requests, not just this one.
                    gate.throttle(delay);
                }
                match error.class {
                    ErrorClass::Permanent => {
                        return InvokeResult::Failure {
                            error,
                            attempts: attempt + 1,
                        };
                    }
                    ErrorClass::Transient => {
                        if attempt >= max_retries {
                            return InvokeResult::Failure {
                                error,
                                attempts: attempt + 1,
                            };
                        }
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        }
    }
}

/// Exponential backoff with ±10% jitter, capped at 30 seconds.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = (base.as_millis() as f64) * 2f64.powi(attempt as i32);
    let capped = exp.min(30_000.0);
    let jitter_range = capped * 0.1;
    let jittered = if jitter_range > 0.0 {
        capped + rand::thread_rng().gen_range(-jitter_range..=jitter_range)
    } else {
        capped
    };
    Duration::from_millis(jittered.max(0.0) as u64)
}

/// OpenAI-compatible chat completions client.
///
/// Works with any provider exposing the `/v1/chat/completions` endpoint.
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: Option<String>,
}

impl LlmClient {
    /// Create a client from configuration, falling back to
    /// `OPENAI_API_KEY` for the key.
    ///
    /// # Errors
    ///
    /// Returns [`KestrelError::Llm`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, KestrelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| KestrelError::Llm(format!("failed to create HTTP client: {e}")))?;
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        Ok(Self {
            client,
            config: config.clone(),
            api_key,
        })
    }

    /// The configured model identifier.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    async fn chat(&self, request: &ModelRequest) -> Result<Completion, InvokeError> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com");
        let url = format!("{base_url}/v1/chat/completions");

        let body = serde_json::json!({
            "model": request.params.model,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
            "temperature": request.params.temperature,
            "max_tokens": request.params.max_output_tokens,
            "response_format": { "type": "json_object" },
        });

        let mut http_request = self.client.post(&url);
        if let Some(api_key) = &self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {api_key}"));
        }

        let response = http_request.json(&body).send().await.map_err(|e| {
            // Network-level failures are worth retrying.
            InvokeError::transient(format!("request failed: {e}"))
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body_text = response.text().await.unwrap_or_default();
            return Err(InvokeError {
                class: ErrorClass::Transient,
                message: format!("rate limited: {body_text}"),
                retry_after,
                rate_limited: true,
            });
        }
        if status.is_server_error() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InvokeError::transient(format!(
                "provider error {status}: {body_text}"
            )));
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InvokeError::permanent(format!(
                "provider rejected request ({status}): {body_text}"
            )));
        }

        let response_body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InvokeError::permanent(format!("failed to parse response: {e}")))?;

        let text = response_body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                InvokeError::permanent(format!("unexpected response structure: {response_body}"))
            })?
            .to_string();

        let usage = response_body.get("usage").and_then(|u| {
            Some(TokenUsage {
                prompt_tokens: u.get("prompt_tokens")?.as_u64()? as u32,
                completion_tokens: u.get("completion_tokens")?.as_u64()? as u32,
            })
        });

        Ok(Completion { text, usage })
    }
}

impl CompletionBackend for LlmClient {
    fn complete(
        &self,
        request: &ModelRequest,
    ) -> impl Future<Output = Result<Completion, InvokeError>> + Send {
        self.chat(request)
    }
}
