//! Retrieval and assembly of the document context for one chat turn.

use serde::{Deserialize, Serialize};
use tracing::debug;

use proview_core::config::RagConfig;
use proview_core::error::Result;
use proview_core::types::SessionId;
use proview_vector::search::SearchEngine;

/// Separator placed between rendered chunks.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// One retrieved chunk that made it into the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSource {
    pub source_file: String,
    pub chunk_index: usize,
    pub score: f64,
}

/// Rendered document context for a prompt.
///
/// Empty when the session has no documents or nothing fit the budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptContext {
    pub text: String,
    pub sources: Vec<ContextSource>,
}

impl PromptContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Builds a bounded context block from a session's most relevant chunks.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    search: SearchEngine,
    top_k: usize,
    max_top_k: usize,
    char_budget: usize,
}

impl ContextAssembler {
    pub fn new(search: SearchEngine, rag: &RagConfig) -> Self {
        Self {
            search,
            top_k: rag.top_k,
            max_top_k: rag.max_top_k,
            char_budget: rag.context_char_budget,
        }
    }

    /// Retrieve up to `k` chunks for `user_message` and render them in
    /// descending similarity order.
    ///
    /// `k` outside `1..=max_top_k` falls back to the configured default.
    /// Chunks are never cut: assembly stops at the first chunk that would
    /// push the block past the character budget.
    pub async fn build(&self, session_id: &SessionId, user_message: &str, k: usize) -> Result<PromptContext> {
        let k = if (1..=self.max_top_k).contains(&k) { k } else { self.top_k };
        let hits = self.search.query(session_id, user_message, k).await?;

        let mut context = PromptContext::empty();
        let mut used_chars = 0usize;

        for hit in hits {
            let entry = format!(
                "[Source {}: {}]\n{}",
                context.sources.len() + 1,
                hit.chunk.source_file,
                hit.chunk.text
            );
            let separator_chars = if context.sources.is_empty() {
                0
            } else {
                CHUNK_SEPARATOR.len()
            };
            let entry_chars = entry.chars().count();
            if used_chars + separator_chars + entry_chars > self.char_budget {
                break;
            }

            if separator_chars > 0 {
                context.text.push_str(CHUNK_SEPARATOR);
            }
            context.text.push_str(&entry);
            used_chars += separator_chars + entry_chars;
            context.sources.push(ContextSource {
                source_file: hit.chunk.source_file,
                chunk_index: hit.chunk.index,
                score: hit.score,
            });
        }

        debug!(
            session_id = %session_id.short(),
            k,
            chunks = context.sources.len(),
            chars = used_chars,
            "Prompt context assembled"
        );
        Ok(context)
    }

    /// The configured default `k`.
    pub fn default_k(&self) -> usize {
        self.top_k
    }
}
