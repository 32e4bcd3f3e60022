//! Coaching engine: one LLM exchange per chat turn, with structured-output
//! enforcement.
//!
//! Two bounded retry loops live here:
//! - transient backend failures (unavailable, timeout) are retried with
//!   exponential backoff before the failure kind is surfaced unchanged;
//! - replies that fail to parse or validate are retried with an amended
//!   prompt, and after the last attempt the turn fails with
//!   `SchemaViolation` instead of returning a guessed output.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use proview_core::config::{ChatConfig, LlmConfig};
use proview_core::error::{ProviewError, Result};
use proview_core::types::{ConversationTurn, StructuredCoachOutput};

use crate::context::PromptContext;
use crate::llm::LlmHandle;
use crate::parser::parse_coach_output;
use crate::prompt::{self, RoleContext};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Sends coaching prompts and enforces the output contract.
#[derive(Debug, Clone)]
pub struct CoachingEngine {
    llm: Arc<LlmHandle>,
    request_timeout: Duration,
    max_backend_retries: u32,
    max_schema_retries: u32,
    max_history_length: usize,
    retry_delay: Duration,
}

impl CoachingEngine {
    pub fn new(llm: Arc<LlmHandle>, llm_config: &LlmConfig, chat: &ChatConfig) -> Self {
        Self {
            llm,
            request_timeout: llm_config.request_timeout(),
            max_backend_retries: llm_config.max_backend_retries,
            max_schema_retries: llm_config.max_schema_retries,
            max_history_length: chat.max_history_length,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the base backoff between backend retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Produce the coach's reply for one turn.
    ///
    /// No session state is touched here.
    pub async fn respond(
        &self,
        role: &RoleContext,
        history: &[ConversationTurn],
        context: &PromptContext,
        user_message: &str,
    ) -> Result<StructuredCoachOutput> {
        let base_prompt = prompt::render(role, history, context, user_message, self.max_history_length);
        let attempts = self.max_schema_retries + 1;
        let mut reason = String::new();

        for attempt in 1..=attempts {
            let prompt = if attempt == 1 {
                base_prompt.clone()
            } else {
                prompt::with_schema_correction(&base_prompt, &reason)
            };

            let raw = self.generate_with_retry(&prompt).await?;
            match parse_coach_output(&raw) {
                Ok(output) => {
                    debug!(attempt, evaluation = output.is_evaluation(), "Coach reply accepted");
                    return Ok(output);
                }
                Err(why) => {
                    warn!(attempt, attempts, reason = %why, "Coach reply rejected");
                    reason = why;
                }
            }
        }

        Err(ProviewError::SchemaViolation { attempts, reason })
    }

    /// One backend call with a per-call timeout and bounded retries for
    /// retryable failures.
    async fn generate_with_retry(&self, prompt: &str) -> Result<String> {
        let backend = self.llm.get().await?;
        let mut retry = 0u32;

        loop {
            let outcome = match tokio::time::timeout(self.request_timeout, backend.generate(prompt)).await {
                Ok(result) => result,
                Err(_) => Err(ProviewError::BackendTimeout(self.request_timeout)),
            };

            match outcome {
                Ok(raw) => return Ok(raw),
                Err(e) if e.is_retryable() && retry < self.max_backend_retries => {
                    retry += 1;
                    warn!(
                        backend = backend.name(),
                        retry,
                        max_retries = self.max_backend_retries,
                        error = %e,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay * 2u32.pow(retry - 1)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
