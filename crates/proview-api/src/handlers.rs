//! Route handler functions for all API endpoints.
//!
//! Handlers only parse transport input and call the matching
//! [`ConversationOrchestrator`](proview_coach::ConversationOrchestrator)
//! operation; every rule lives in the core.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use proview_coach::{ClearReceipt, TurnRequest, UploadReceipt};
use proview_core::types::{SessionId, SessionStats, StructuredCoachOutput};
use proview_session::CleanupReport;

use crate::error::ApiError;
use crate::state::AppState;

// =============================================================================
// Request and response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NewSessionResponse {
    pub session_id: SessionId,
}

/// Request body for document upload. `text` is already extracted plain text.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    pub text: String,
}

// =============================================================================
// Public endpoints
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "proview-coach".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        active_sessions: state.orchestrator.active_sessions(),
    })
}

// =============================================================================
// Session endpoints
// =============================================================================

/// POST /sessions - allocate a fresh session id.
///
/// Nothing is stored until the first upload or chat on the id.
pub async fn create_session(State(state): State<AppState>) -> Json<NewSessionResponse> {
    Json(NewSessionResponse {
        session_id: state.orchestrator.new_session_id(),
    })
}

/// POST /sessions/{id}/documents
pub async fn upload_document(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<UploadRequest>,
) -> Result<Json<UploadReceipt>, ApiError> {
    let session_id = SessionId::parse(session_id)?;
    let receipt = state
        .orchestrator
        .upload_document(&session_id, &body.filename, &body.text)
        .await?;
    Ok(Json(receipt))
}

/// POST /sessions/{id}/chat
pub async fn chat(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<TurnRequest>,
) -> Result<Json<StructuredCoachOutput>, ApiError> {
    let session_id = SessionId::parse(session_id)?;
    let output = state.orchestrator.handle_turn(&session_id, body).await?;
    Ok(Json(output))
}

/// DELETE /sessions/{id}
pub async fn clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ClearReceipt>, ApiError> {
    let session_id = SessionId::parse(session_id)?;
    Ok(Json(state.orchestrator.clear_session(&session_id)?))
}

/// GET /sessions/{id}/stats
pub async fn session_stats(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionStats>, ApiError> {
    let session_id = SessionId::parse(session_id)?;
    Ok(Json(state.orchestrator.get_session_stats(&session_id)?))
}

// =============================================================================
// Admin
// =============================================================================

/// POST /admin/cleanup - run one janitor cycle now.
pub async fn run_cleanup(State(state): State<AppState>) -> Json<CleanupReport> {
    Json(state.orchestrator.run_cleanup_cycle())
}
