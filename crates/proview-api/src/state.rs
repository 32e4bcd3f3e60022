//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use proview_coach::ConversationOrchestrator;
use proview_core::config::ProviewConfig;

/// Shared application state.
///
/// All fields use `Arc` for cheap cloning across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration; read-only after startup.
    pub config: Arc<ProviewConfig>,
    /// The coaching core.
    pub orchestrator: Arc<ConversationOrchestrator>,
    /// Value expected in the `x-proview-key` header.
    pub api_key: String,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: ProviewConfig, orchestrator: Arc<ConversationOrchestrator>, api_key: impl Into<String>) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
            api_key: api_key.into(),
            start_time: Instant::now(),
        }
    }
}
