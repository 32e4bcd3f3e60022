//! LLM backend boundary.
//!
//! The coaching engine needs exactly one call: send a prompt, get raw text
//! back. `OpenAiCompatBackend` speaks the OpenAI-compatible
//! `chat/completions` protocol (Groq by default). `MockBackend` replays
//! scripted replies and records every prompt it receives, for tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use proview_core::config::LlmConfig;
use proview_core::error::{ProviewError, Result};
use proview_core::shared::SharedHandle;

/// Shared, lazily-initialized LLM backend.
pub type LlmHandle = SharedHandle<dyn LlmBackend>;

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Send `prompt` and return the raw completion text.
    ///
    /// Fails with `BackendUnavailable` or `BackendTimeout`.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible HTTP backend
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionContent,
}

#[derive(Deserialize)]
struct CompletionContent {
    content: Option<String>,
}

/// Client for any OpenAI-compatible `chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatBackend {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
    api_key: String,
    timeout: Duration,
}

impl OpenAiCompatBackend {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviewError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key: api_key.into(),
            timeout,
        })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ProviewError {
        if e.is_timeout() {
            ProviewError::BackendTimeout(self.timeout)
        } else {
            ProviewError::BackendUnavailable(e.to_string())
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            messages: vec![CompletionMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviewError::BackendUnavailable(format!(
                "LLM backend returned {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )));
        }

        let data: CompletionResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let content = data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviewError::BackendUnavailable("LLM backend returned no choices".to_string()))?;

        debug!(model = %self.model, chars = content.len(), "LLM completion received");
        Ok(content)
    }
}

// ---------------------------------------------------------------------------
// MockBackend - scripted replies for testing
// ---------------------------------------------------------------------------

/// A question-asking turn that satisfies every output invariant.
pub const MOCK_QUESTION_REPLY: &str = r#"{"interviewer_chat":"Let's begin. Walk me through a backend system you designed and the trade-offs you made.","is_correct":null,"score":null,"refined_explanation":null,"suggested_replies":["I designed a payments service","Can you give me an example first?"]}"#;

/// Test backend that returns queued replies in order.
///
/// Once the queue is empty every call returns [`MOCK_QUESTION_REPLY`].
/// Every prompt is recorded for later assertions.
#[derive(Debug, Default)]
pub struct MockBackend {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: impl IntoIterator<Item = Result<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Sleep before answering, to exercise request timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_reply(&self, reply: Result<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Every prompt received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().ok().and_then(|mut r| r.pop_front());
        next.unwrap_or_else(|| Ok(MOCK_QUESTION_REPLY.to_string()))
    }
}
