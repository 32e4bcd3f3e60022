//! Conversational coaching core for ProView.
//!
//! Turns a candidate's message, their recent history and the session's
//! uploaded documents into one structured coach reply, and exposes the
//! upload, chat, clear and stats operations through
//! [`ConversationOrchestrator`].

pub mod context;
pub mod engine;
pub mod llm;
pub mod orchestrator;
pub mod parser;
pub mod prompt;

pub use context::{ContextAssembler, ContextSource, PromptContext};
pub use engine::CoachingEngine;
pub use llm::{LlmBackend, LlmHandle, MockBackend, OpenAiCompatBackend};
pub use orchestrator::{
    validate_transition, ClearReceipt, ConversationOrchestrator, TurnRequest, TurnState, UploadReceipt,
};
pub use parser::parse_coach_output;
pub use prompt::RoleContext;
