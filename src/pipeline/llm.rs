//! Model interaction: the [`ModelClient`] seam and the call policy around it.
//!
//! A client performs exactly one network call and reports what happened as a
//! [`ModelError`]. Everything else (the per-call timeout, bounded
//! concurrency, retry with backoff, folding failures into a per-page
//! outcome) lives in [`call_with_policy`] so it applies identically to every
//! backend, including test doubles.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 5xx and connection errors are retried with exponential backoff
//! (`retry_backoff_ms * 2^attempt`). Timeouts are never retried. The
//! concurrency permit is held only for the duration of a single attempt, so
//! a page sleeping in backoff does not starve its siblings.

use crate::config::{ConversionConfig, ModelBackend};
use crate::error::{ModelError, PageError, Sheet2MdError};
use crate::output::{ExtractionResult, PageOutcome};
use crate::pipeline::encode::split_data_uri;
use crate::pipeline::request::{ChatRequest, Role};
use async_trait::async_trait;
use edgequake_llm::{
    ChatMessage, CompletionOptions, ImageData, LLMProvider, LlmError, ProviderFactory,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// Sends one request to a model service and returns the generated text.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Return the first generated message's text content, unparsed.
    async fn complete(&self, request: &ChatRequest) -> Result<String, ModelError>;
}

/// Build the client for a configured backend.
pub fn build_client(
    backend: &ModelBackend,
    config: &ConversionConfig,
) -> Result<Arc<dyn ModelClient>, Sheet2MdError> {
    match backend {
        ModelBackend::OpenAi { api_key, base_url } => Ok(Arc::new(OpenAiClient::new(
            api_key.clone(),
            base_url,
            config.api_timeout,
        )?)),
        ModelBackend::Provider { name } => {
            let client = ProviderClient::from_name(name, &config.model)?
                .with_timeout_secs(config.api_timeout.as_secs());
            Ok(Arc::new(client))
        }
    }
}

// ── OpenAI-compatible HTTP client ─────────────────────────────────────────

/// Direct `POST {base_url}/chat/completions` client.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: &str, timeout: Duration) -> Result<Self, Sheet2MdError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Sheet2MdError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            timeout,
        })
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Pull `choices[0].message.content` out of a completion body.
fn parse_completion(body: &str) -> Result<String, ModelError> {
    let parsed: CompletionResponse =
        serde_json::from_str(body).map_err(|e| ModelError::MalformedResponse(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or_else(|| ModelError::MalformedResponse("missing choices[0].message.content".into()))
}

/// Best-effort error message from a non-success body.
fn parse_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(env) => env.error.message,
        Err(_) => body.chars().take(200).collect(),
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ModelError> {
        let map_send = |e: reqwest::Error| {
            if e.is_timeout() {
                ModelError::Timeout {
                    secs: self.timeout.as_secs(),
                }
            } else {
                ModelError::Transport(e.to_string())
            }
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(map_send)?;

        let status = response.status();
        let body = response.text().await.map_err(map_send)?;

        if !status.is_success() {
            return Err(ModelError::Api {
                status: status.as_u16(),
                message: parse_error_message(&body),
            });
        }

        parse_completion(&body)
    }
}

// ── edgequake-llm provider bridge ─────────────────────────────────────────

/// Routes requests through any edgequake-llm provider.
pub struct ProviderClient {
    provider: Arc<dyn LLMProvider>,
    /// Reported in `ModelError::Timeout` when the provider itself times out.
    timeout_secs: u64,
}

impl ProviderClient {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            timeout_secs: 0,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Instantiate a named provider; it reads its own credential variable.
    pub fn from_name(name: &str, model: &str) -> Result<Self, Sheet2MdError> {
        let provider = ProviderFactory::create_llm_provider(name, model).map_err(|e| {
            Sheet2MdError::ProviderNotConfigured {
                provider: name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(Self::new(provider))
    }

    fn to_messages(request: &ChatRequest) -> Vec<ChatMessage> {
        request
            .messages
            .iter()
            .map(|m| match m.role {
                Role::System => ChatMessage::system(m.text()),
                Role::User => {
                    let images = m
                        .image_urls()
                        .into_iter()
                        .filter_map(split_data_uri)
                        .map(|(mime, payload)| {
                            ImageData::new(payload.to_string(), mime).with_detail("high")
                        })
                        .collect();
                    ChatMessage::user_with_images(&m.text(), images)
                }
            })
            .collect()
    }
}

#[async_trait]
impl ModelClient for ProviderClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ModelError> {
        let messages = Self::to_messages(request);
        let options = CompletionOptions {
            temperature: request.temperature,
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| map_provider_error(e, self.timeout_secs))?;
        debug!(
            "Provider call: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Classify a provider error so the retry policy treats it like the
/// equivalent HTTP failure.
fn map_provider_error(err: LlmError, timeout_secs: u64) -> ModelError {
    let api = |status: u16, message: String| ModelError::Api { status, message };
    match err {
        LlmError::Timeout => ModelError::Timeout { secs: timeout_secs },
        LlmError::RateLimited(m) => api(429, m),
        LlmError::AuthError(m) => api(401, m),
        LlmError::ModelNotFound(m) => api(404, m),
        LlmError::InvalidRequest(m) | LlmError::NotSupported(m) | LlmError::ConfigError(m) => {
            api(400, m)
        }
        e @ LlmError::TokenLimitExceeded { .. } => api(400, e.to_string()),
        LlmError::SerializationError(e) => ModelError::MalformedResponse(e.to_string()),
        other => ModelError::Transport(other.to_string()),
    }
}

// ── Call policy ───────────────────────────────────────────────────────────

/// A call that failed for good.
#[derive(Debug, Clone)]
pub struct CallFailure {
    pub error: ModelError,
    pub retries: u32,
}

/// Run one request under the timeout, concurrency bound, and retry policy.
pub async fn call_with_policy(
    client: &dyn ModelClient,
    permits: &Semaphore,
    request: &ChatRequest,
    config: &ConversionConfig,
    label: &str,
) -> Result<String, CallFailure> {
    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 {
            let backoff = backoff_ms(config.retry_backoff_ms, attempt);
            warn!(
                "{}: retry {}/{} after {}ms",
                label, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }

        let result = {
            let _permit = permits.acquire().await.map_err(|_| CallFailure {
                error: ModelError::Transport("dispatcher shut down".into()),
                retries: attempt,
            })?;
            timeout(config.api_timeout, client.complete(request)).await
        };

        let error = match result {
            Ok(Ok(text)) => return Ok(text),
            Ok(Err(e)) => e,
            Err(_elapsed) => ModelError::Timeout {
                secs: config.api_timeout.as_secs(),
            },
        };

        if error.is_transient() && attempt < config.max_retries {
            warn!("{}: attempt {} failed: {}", label, attempt + 1, error);
            attempt += 1;
            continue;
        }

        warn!("{}: giving up: {}", label, error);
        return Err(CallFailure {
            error,
            retries: attempt,
        });
    }
}

/// Delay before retry number `attempt` (1-based), saturating at `u64::MAX`.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// Extract one page and record the tagged outcome under its key.
///
/// Never propagates a failure: a bad page becomes `PageOutcome::Failed` so
/// sibling pages and files are unaffected.
pub async fn process_page(
    client: &dyn ModelClient,
    permits: &Semaphore,
    file_id: &str,
    page_index: usize,
    request: &ChatRequest,
    config: &ConversionConfig,
) -> ExtractionResult {
    let start = Instant::now();
    let page_num = page_index + 1;
    let label = format!("{file_id} page {page_num}");

    let outcome = match call_with_policy(client, permits, request, config, &label).await {
        Ok(text) => {
            debug!("{}: {} chars in {:?}", label, text.len(), start.elapsed());
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_complete(file_id, page_index, text.len());
            }
            PageOutcome::Extracted(text)
        }
        Err(failure) => {
            let err = PageError::from_model(page_num, failure.retries, &failure.error);
            if let Some(ref cb) = config.progress_callback {
                cb.on_page_error(file_id, page_index, &err.to_string());
            }
            PageOutcome::Failed(err)
        }
    };

    ExtractionResult {
        file_id: file_id.to_string(),
        page_index,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::request::Message;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: AtomicU32,
        fail_first: u32,
        error: ModelError,
    }

    #[async_trait]
    impl ModelClient for Flaky {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, ModelError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(self.error.clone())
            } else {
                Ok("ok".into())
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl ModelClient for Slow {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, ModelError> {
            sleep(Duration::from_secs(30)).await;
            Ok("late".into())
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            max_tokens: 10,
            temperature: None,
        }
    }

    fn config(retries: u32) -> ConversionConfig {
        ConversionConfig::builder()
            .max_retries(retries)
            .retry_backoff_ms(1)
            .api_timeout(Duration::from_millis(50))
            .build()
            .unwrap()
    }

    #[test]
    fn parse_completion_extracts_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"| A | B |"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "| A | B |");
    }

    #[test]
    fn parse_completion_rejects_missing_fields() {
        for body in [r#"{"choices":[]}"#, r#"{"choices":[{"message":{"content":null}}]}"#, "nope"] {
            assert!(matches!(
                parse_completion(body),
                Err(ModelError::MalformedResponse(_))
            ));
        }
    }

    #[test]
    fn provider_errors_keep_their_kind() {
        assert!(matches!(
            map_provider_error(LlmError::Timeout, 2400),
            ModelError::Timeout { secs: 2400 }
        ));
        let auth = map_provider_error(LlmError::AuthError("bad key".into()), 1);
        assert!(matches!(auth, ModelError::Api { status: 401, .. }));
        assert!(!auth.is_transient());
        let invalid = map_provider_error(LlmError::InvalidRequest("no images".into()), 1);
        assert!(!invalid.is_transient());
        let limited = map_provider_error(LlmError::RateLimited("slow down".into()), 1);
        assert!(matches!(limited, ModelError::Api { status: 429, .. }));
        assert!(limited.is_transient());
        assert!(map_provider_error(LlmError::NetworkError("reset".into()), 1).is_transient());
    }

    #[test]
    fn provider_timeout_becomes_sentinel_marker() {
        let err = map_provider_error(LlmError::Timeout, 30);
        let page = PageError::from_model(3, 0, &err);
        assert_eq!(page.marker_message(), crate::error::TIMEOUT_SENTINEL);
    }

    #[test]
    fn parse_error_message_prefers_envelope() {
        assert_eq!(
            parse_error_message(r#"{"error":{"message":"Incorrect API key"}}"#),
            "Incorrect API key"
        );
        assert_eq!(parse_error_message("gateway down"), "gateway down");
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let client = Flaky {
            calls: AtomicU32::new(0),
            fail_first: 2,
            error: ModelError::Api {
                status: 503,
                message: "busy".into(),
            },
        };
        let permits = Semaphore::new(1);
        let text = call_with_policy(&client, &permits, &request(), &config(2), "t")
            .await
            .unwrap();
        assert_eq!(text, "ok");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(0, 70), 0);
        assert_eq!(backoff_ms(1, 80), u64::MAX);
    }

    #[tokio::test]
    async fn long_retry_chain_fails_without_overflow() {
        let client = Flaky {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
            error: ModelError::Api {
                status: 503,
                message: "busy".into(),
            },
        };
        // fields set directly, bypassing the builder's clamp
        let mut config = config(0);
        config.max_retries = 70;
        config.retry_backoff_ms = 0;

        let permits = Semaphore::new(1);
        let failure = call_with_policy(&client, &permits, &request(), &config, "t")
            .await
            .unwrap_err();
        assert_eq!(failure.retries, 70);
        assert_eq!(client.calls.load(Ordering::SeqCst), 71);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let client = Flaky {
            calls: AtomicU32::new(0),
            fail_first: 5,
            error: ModelError::Api {
                status: 401,
                message: "bad key".into(),
            },
        };
        let permits = Semaphore::new(1);
        let failure = call_with_policy(&client, &permits, &request(), &config(3), "t")
            .await
            .unwrap_err();
        assert_eq!(failure.retries, 0);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_becomes_failed_page_outcome() {
        let permits = Semaphore::new(1);
        let result = process_page(&Slow, &permits, "a", 4, &request(), &config(3)).await;
        assert_eq!(result.page_index, 4);
        match result.outcome {
            PageOutcome::Failed(PageError::Timeout { page, .. }) => assert_eq!(page, 5),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // permit released after the timed-out attempt
        assert_eq!(permits.available_permits(), 1);
    }
}
