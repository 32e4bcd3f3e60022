//! Conversation orchestrator: the public entry points of the coaching core.
//!
//! Wires the ingest pipeline, session registry, context assembler, coaching
//! engine and janitor together. Callers are assumed to be authenticated and
//! rate-limited already.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use proview_core::config::{ChatConfig, ProviewConfig};
use proview_core::error::{ProviewError, Result};
use proview_core::types::{ConversationTurn, SessionId, SessionStats, StructuredCoachOutput};
use proview_session::{CleanupReport, Janitor, SessionPurge, SessionRegistry};
use proview_vector::index::VectorIndex;
use proview_vector::pipeline::IngestPipeline;
use proview_vector::search::{EmbedderHandle, SearchEngine};

use crate::context::ContextAssembler;
use crate::engine::CoachingEngine;
use crate::llm::LlmHandle;
use crate::prompt::RoleContext;

// =============================================================================
// Turn state machine
// =============================================================================

/// Progress of one chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    Retrieving,
    Generating,
    Done,
    Failed,
}

/// Validate that a turn state transition is allowed.
///
/// Valid transitions:
/// - Idle -> Retrieving
/// - Retrieving -> Generating
/// - Generating -> Done
/// - any non-terminal state -> Failed
pub fn validate_transition(from: TurnState, to: TurnState) -> Result<()> {
    let valid = matches!(
        (from, to),
        (TurnState::Idle, TurnState::Retrieving)
            | (TurnState::Retrieving, TurnState::Generating)
            | (TurnState::Generating, TurnState::Done)
            | (TurnState::Idle, TurnState::Failed)
            | (TurnState::Retrieving, TurnState::Failed)
            | (TurnState::Generating, TurnState::Failed)
    );

    if valid {
        Ok(())
    } else {
        Err(ProviewError::Validation(format!(
            "Invalid turn transition {:?} -> {:?}",
            from, to
        )))
    }
}

struct Turn<'a> {
    session_id: &'a SessionId,
    state: TurnState,
}

impl<'a> Turn<'a> {
    fn new(session_id: &'a SessionId) -> Self {
        Self {
            session_id,
            state: TurnState::Idle,
        }
    }

    fn advance(&mut self, next: TurnState) -> Result<()> {
        validate_transition(self.state, next)?;
        debug!(session_id = %self.session_id.short(), from = ?self.state, to = ?next, "Turn state");
        self.state = next;
        Ok(())
    }

    /// Record a failure and hand the error back unchanged.
    fn fail(&mut self, error: ProviewError) -> ProviewError {
        warn!(
            session_id = %self.session_id.short(),
            state = ?self.state,
            kind = error.kind(),
            error = %error,
            "Chat turn failed"
        );
        self.state = TurnState::Failed;
        error
    }
}

// =============================================================================
// Requests and receipts
// =============================================================================

/// Input for one chat turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    /// Role the candidate is preparing for, if they said so.
    #[serde(default)]
    pub target_role: Option<String>,
    /// Chunks to retrieve; `None` uses the configured default.
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub session_id: SessionId,
    pub source_file: String,
    pub chunks_created: usize,
    /// Whether this upload created the session.
    pub new_session: bool,
    pub stats: SessionStats,
}

/// Result of clearing a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearReceipt {
    pub session_id: SessionId,
    pub chunks_deleted: usize,
    /// False when the session did not exist.
    pub existed: bool,
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct ConversationOrchestrator {
    registry: Arc<SessionRegistry>,
    index: Arc<VectorIndex>,
    pipeline: IngestPipeline,
    assembler: ContextAssembler,
    engine: CoachingEngine,
    janitor: Arc<Janitor>,
    chat: ChatConfig,
    max_document_chars: usize,
}

impl std::fmt::Debug for ConversationOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationOrchestrator")
            .field("sessions", &self.registry.len())
            .field("janitor", &self.janitor)
            .finish()
    }
}

impl ConversationOrchestrator {
    /// Build the full core from configuration and the two shared backends.
    pub fn new(config: &ProviewConfig, embedder: Arc<EmbedderHandle>, llm: Arc<LlmHandle>) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let index = Arc::new(VectorIndex::new());

        let pipeline = IngestPipeline::new(
            Arc::clone(&index),
            Arc::clone(&embedder),
            &config.rag,
            &config.embedding,
        );
        let search = SearchEngine::new(Arc::clone(&index), embedder, config.embedding.max_retries);
        let assembler = ContextAssembler::new(search, &config.rag);
        let engine = CoachingEngine::new(llm, &config.llm, &config.chat);

        let purge: Arc<dyn SessionPurge> = index.clone();
        let janitor = Arc::new(Janitor::new(
            Arc::clone(&registry),
            purge,
            config.session.timeout(),
            config.session.cleanup_interval(),
        ));

        Self {
            registry,
            index,
            pipeline,
            assembler,
            engine,
            janitor,
            chat: config.chat.clone(),
            max_document_chars: config.security.max_document_chars,
        }
    }

    /// Replace the coaching engine, e.g. to shorten retry backoff.
    pub fn with_engine(mut self, engine: CoachingEngine) -> Self {
        self.engine = engine;
        self
    }

    /// A fresh, unused session id.
    pub fn new_session_id(&self) -> SessionId {
        SessionId::generate()
    }

    /// Chunk, embed and store a document for a session.
    ///
    /// Creates the session on first contact. The chunks are inserted and
    /// counted under the session lock, so a concurrent clear or eviction
    /// either sees the whole upload or none of it.
    pub async fn upload_document(&self, session_id: &SessionId, filename: &str, text: &str) -> Result<UploadReceipt> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(ProviewError::Validation("filename must not be empty".to_string()));
        }
        if text.trim().is_empty() {
            return Err(ProviewError::Validation("Document text must not be empty".to_string()));
        }
        let chars = text.chars().count();
        if chars > self.max_document_chars {
            return Err(ProviewError::Validation(format!(
                "Document has {} characters, limit is {}",
                chars, self.max_document_chars
            )));
        }

        let new_session = self.registry.touch(session_id)?;
        let prepared = self.pipeline.prepare(session_id, filename, text).await?;

        let (_, (report, stats)) = self.registry.upsert(session_id, |session| {
            let report = self.pipeline.commit(session_id, prepared)?;
            session.record_upload(&report.source_file, report.chunks_created);
            Ok((report, session.stats()))
        })?;

        info!(
            session_id = %session_id.short(),
            source_file = %report.source_file,
            chunks = report.chunks_created,
            documents = stats.document_count,
            "Document uploaded"
        );

        Ok(UploadReceipt {
            session_id: session_id.clone(),
            source_file: report.source_file,
            chunks_created: report.chunks_created,
            new_session,
            stats,
        })
    }

    /// Run one chat turn with the default retrieval settings.
    pub async fn handle_chat_turn(
        &self,
        session_id: &SessionId,
        message: &str,
        history: Vec<ConversationTurn>,
    ) -> Result<StructuredCoachOutput> {
        self.handle_turn(
            session_id,
            TurnRequest {
                message: message.to_string(),
                history,
                ..TurnRequest::default()
            },
        )
        .await
    }

    /// Run one chat turn.
    ///
    /// Activity is recorded once, at entry, whatever the outcome; every
    /// downstream failure is returned with its original kind.
    pub async fn handle_turn(&self, session_id: &SessionId, request: TurnRequest) -> Result<StructuredCoachOutput> {
        let message = self.validate_turn(&request)?;

        let mut turn = Turn::new(session_id);
        turn.advance(TurnState::Retrieving)?;
        self.registry
            .record_message(session_id)
            .map_err(|e| turn.fail(e))?;

        let role = RoleContext {
            target_role: request.target_role.clone(),
            source_files: self
                .registry
                .stats(session_id)
                .map(|s| s.source_files)
                .unwrap_or_default(),
        };
        let k = request.top_k.unwrap_or_else(|| self.assembler.default_k());
        let context = self
            .assembler
            .build(session_id, message, k)
            .await
            .map_err(|e| turn.fail(e))?;

        turn.advance(TurnState::Generating)?;
        let output = self
            .engine
            .respond(&role, &request.history, &context, message)
            .await
            .map_err(|e| turn.fail(e))?;

        turn.advance(TurnState::Done)?;
        info!(
            session_id = %session_id.short(),
            context_chunks = context.sources.len(),
            evaluation = output.is_evaluation(),
            "Chat turn complete"
        );
        Ok(output)
    }

    /// Delete a session's documents and registry state.
    ///
    /// Idempotent: clearing an unknown session deletes nothing.
    pub fn clear_session(&self, session_id: &SessionId) -> Result<ClearReceipt> {
        // Purge and removal happen under the session lock, serialized with
        // any upload commit on the same id.
        let evicted = self.registry.evict(session_id, self.index.as_ref())?;
        let chunks_deleted = evicted.unwrap_or(0);

        info!(session_id = %session_id.short(), chunks_deleted, "Session cleared");
        Ok(ClearReceipt {
            session_id: session_id.clone(),
            chunks_deleted,
            existed: evicted.is_some(),
        })
    }

    /// Statistics for a session; `NotFound` if unknown.
    pub fn get_session_stats(&self, session_id: &SessionId) -> Result<SessionStats> {
        self.registry.stats(session_id)
    }

    /// Run one janitor cycle synchronously.
    pub fn run_cleanup_cycle(&self) -> CleanupReport {
        self.janitor.run_cycle()
    }

    pub fn janitor(&self) -> &Arc<Janitor> {
        &self.janitor
    }

    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    /// Check message and history limits; returns the trimmed message.
    fn validate_turn<'r>(&self, request: &'r TurnRequest) -> Result<&'r str> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(ProviewError::Validation("message must not be empty".to_string()));
        }
        let chars = message.chars().count();
        if chars > self.chat.max_message_length {
            return Err(ProviewError::Validation(format!(
                "message has {} characters, limit is {}",
                chars, self.chat.max_message_length
            )));
        }
        if request.history.len() > self.chat.max_history_items {
            return Err(ProviewError::Validation(format!(
                "history has {} entries, limit is {}",
                request.history.len(),
                self.chat.max_history_items
            )));
        }
        Ok(message)
    }
}
