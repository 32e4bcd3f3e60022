use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ProviewError, Result};

/// Top-level configuration for the ProView coaching service.
///
/// Loaded from `~/.proview/config.toml` by default. Each section corresponds
/// to one component of the conversation pipeline or a cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviewConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl ProviewConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ProviewConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.rag.chunk_size == 0 {
            return Err(ProviewError::Config("rag.chunk_size must be positive".into()));
        }
        if self.rag.chunk_overlap >= self.rag.chunk_size {
            return Err(ProviewError::Config(format!(
                "rag.chunk_overlap ({}) must be smaller than rag.chunk_size ({})",
                self.rag.chunk_overlap, self.rag.chunk_size
            )));
        }
        if self.rag.top_k == 0 || self.rag.top_k > self.rag.max_top_k {
            return Err(ProviewError::Config(format!(
                "rag.top_k must be within 1..={}",
                self.rag.max_top_k
            )));
        }
        if self.rag.context_char_budget < self.rag.chunk_size {
            return Err(ProviewError::Config(format!(
                "rag.context_char_budget ({}) must be at least rag.chunk_size ({})",
                self.rag.context_char_budget, self.rag.chunk_size
            )));
        }
        if self.session.timeout_secs == 0 {
            return Err(ProviewError::Config("session.timeout_secs must be positive".into()));
        }
        if self.session.cleanup_interval_secs == 0 {
            return Err(ProviewError::Config(
                "session.cleanup_interval_secs must be positive".into(),
            ));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(ProviewError::Config("llm.request_timeout_secs must be positive".into()));
        }
        if self.embedding.dimensions == 0 {
            return Err(ProviewError::Config("embedding.dimensions must be positive".into()));
        }
        Ok(())
    }
}

/// General service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Address the HTTP server binds to.
    pub host: String,
    /// HTTP server port.
    pub port: u16,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            log_level: "info".to_string(),
        }
    }
}

/// LLM backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completions API.
    pub base_url: String,
    /// Model name sent with every request.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Per-call timeout; an expired call is aborted.
    pub request_timeout_secs: u64,
    /// Retries for unavailable/timed-out calls, per attempt.
    pub max_backend_retries: u32,
    /// Extra LLM calls made when the output violates the response schema.
    pub max_schema_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.3,
            api_key_env: "GROQ_API_KEY".to_string(),
            request_timeout_secs: 30,
            max_backend_retries: 2,
            max_schema_retries: 2,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Sentence-transformer model name (informational).
    pub model: String,
    /// Directory containing `model.onnx` and `tokenizer.json`.
    /// When unset, a deterministic mock embedder is used.
    pub model_dir: Option<String>,
    /// Embedding dimensionality.
    pub dimensions: usize,
    /// Retries for a failed embedding call.
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            model_dir: None,
            dimensions: 384,
            max_retries: 2,
        }
    }
}

/// Chunking and retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per turn.
    pub top_k: usize,
    /// Upper bound accepted for a caller-supplied `k`.
    pub max_top_k: usize,
    /// Maximum characters of retrieved context placed in the prompt.
    pub context_char_budget: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 700,
            chunk_overlap: 100,
            top_k: 3,
            max_top_k: 10,
            context_char_budget: 6000,
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle time after which a session and its documents are evicted.
    pub timeout_secs: u64,
    /// Interval between janitor cycles.
    pub cleanup_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 2 * 60 * 60,
            cleanup_interval_secs: 300,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Chat turn limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Most recent history turns included in the prompt.
    pub max_history_length: usize,
    /// Maximum history entries accepted in one request.
    pub max_history_items: usize,
    /// Maximum characters in a single user message.
    pub max_message_length: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_history_length: 10,
            max_history_items: 50,
            max_message_length: 5000,
        }
    }
}

/// Transport-facing security settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Environment variable holding the API key checked on every request.
    pub api_key_env: String,
    /// Requests allowed per client per window.
    pub rate_limit_requests: usize,
    /// Rate limit window length.
    pub rate_limit_window_secs: u64,
    /// CORS origins allowed to call the API.
    pub allowed_origins: Vec<String>,
    /// Maximum characters of extracted document text per upload.
    pub max_document_chars: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_key_env: "PROVIEW_API_KEY".to_string(),
            rate_limit_requests: 10,
            rate_limit_window_secs: 60,
            allowed_origins: vec![
                "http://localhost:8501".to_string(),
                "http://127.0.0.1:8501".to_string(),
            ],
            max_document_chars: 10 * 1024 * 1024,
        }
    }
}
