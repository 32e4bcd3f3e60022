use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProviewError, Result};

// =============================================================================
// Session identity
// =============================================================================

static SESSION_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{8,100}$").expect("Invalid session id regex"));

/// Opaque tenant identifier scoping documents, retrieval, and statistics.
///
/// Accepted ids are 8 to 100 characters of ASCII letters, digits, `-` and `_`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a caller-supplied id.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if SESSION_ID_RE.is_match(&raw) {
            Ok(Self(raw))
        } else {
            Err(ProviewError::Validation(
                "session_id must be 8-100 characters of letters, digits, '-' or '_'".to_string(),
            ))
        }
    }

    /// Generate a fresh, globally unique id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionId {
    type Error = ProviewError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

// =============================================================================
// Session
// =============================================================================

/// Registry-owned state of one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Documents successfully uploaded.
    pub document_count: u64,
    /// Chunks currently stored for this session.
    pub chunk_count: u64,
    /// Chat turns attempted.
    pub message_count: u64,
    /// Distinct source file names, in upload order.
    pub source_files: Vec<String>,
}

impl Session {
    pub fn new(id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            last_activity: now,
            document_count: 0,
            chunk_count: 0,
            message_count: 0,
            source_files: Vec::new(),
        }
    }

    /// True when the session has been idle for strictly longer than `timeout`.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let idle = now.signed_duration_since(self.last_activity);
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => idle > timeout,
            Err(_) => false,
        }
    }

    pub fn record_upload(&mut self, source_file: &str, chunks: usize) {
        self.document_count += 1;
        self.chunk_count += chunks as u64;
        if !self.source_files.iter().any(|f| f == source_file) {
            self.source_files.push(source_file.to_string());
        }
    }

    pub fn record_message(&mut self) {
        self.message_count += 1;
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            document_count: self.document_count,
            chunk_count: self.chunk_count,
            message_count: self.message_count,
            source_files: self.source_files.clone(),
            has_data: self.chunk_count > 0,
        }
    }
}

/// Snapshot returned by `get_session_stats`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub document_count: u64,
    pub chunk_count: u64,
    pub message_count: u64,
    pub source_files: Vec<String>,
    pub has_data: bool,
}

// =============================================================================
// Documents
// =============================================================================

/// An embedded span of an uploaded document. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub session_id: SessionId,
    pub source_file: String,
    /// Position of this chunk within its source document.
    pub index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
    pub uploaded_at: DateTime<Utc>,
}

// =============================================================================
// Conversation
// =============================================================================

/// Speaker of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Evaluation attached to an assistant turn that graded an answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnEvaluation {
    pub is_correct: Option<bool>,
    pub score: Option<f64>,
    pub refined_explanation: Option<String>,
}

/// One caller-supplied history entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<TurnEvaluation>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            evaluation: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            evaluation: None,
        }
    }
}

// =============================================================================
// Structured coach output
// =============================================================================

/// The response contract of every chat turn.
///
/// The evaluation fields (`is_correct`, `score`, `refined_explanation`) are
/// set only when the turn grades an answer. Construct instances through
/// parsing plus [`StructuredCoachOutput::validate`]; never hand one to a
/// caller without validating it first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredCoachOutput {
    pub interviewer_chat: String,
    #[serde(default)]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub refined_explanation: Option<String>,
    pub suggested_replies: Vec<String>,
}

impl StructuredCoachOutput {
    pub const MIN_SCORE: f64 = 0.0;
    pub const MAX_SCORE: f64 = 10.0;

    /// Check every field-level and cross-field invariant.
    ///
    /// Returns the first violation as a human-readable reason.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.interviewer_chat.trim().is_empty() {
            return Err("interviewer_chat must not be empty".to_string());
        }
        if self.score.is_some() != self.is_correct.is_some() {
            return Err("score and is_correct must be both present or both null".to_string());
        }
        if let Some(score) = self.score {
            if !score.is_finite() || !(Self::MIN_SCORE..=Self::MAX_SCORE).contains(&score) {
                return Err(format!("score {} is outside [0, 10]", score));
            }
        }
        if !(2..=3).contains(&self.suggested_replies.len()) {
            return Err(format!(
                "suggested_replies must contain 2 or 3 entries, got {}",
                self.suggested_replies.len()
            ));
        }
        if self.suggested_replies.iter().any(|r| r.trim().is_empty()) {
            return Err("suggested_replies must not contain empty entries".to_string());
        }
        Ok(())
    }

    /// True when this turn graded an answer.
    pub fn is_evaluation(&self) -> bool {
        self.score.is_some()
    }

    pub fn evaluation(&self) -> Option<TurnEvaluation> {
        self.is_evaluation().then(|| TurnEvaluation {
            is_correct: self.is_correct,
            score: self.score,
            refined_explanation: self.refined_explanation.clone(),
        })
    }
}
