//! Search engine combining embedding generation with session-scoped vector
//! search.
//!
//! SearchEngine embeds a text query through the shared embedding handle and
//! asks the VectorIndex for the nearest chunks of exactly one session.

use std::sync::Arc;

use tracing::debug;

use proview_core::error::Result;
use proview_core::shared::SharedHandle;
use proview_core::types::SessionId;

use crate::embedding::{embed_with_retry, DynEmbeddingService};
use crate::index::{SearchHit, VectorIndex};

/// Shared, lazily-initialized embedding backend.
pub type EmbedderHandle = SharedHandle<dyn DynEmbeddingService>;

/// Text query over one session's chunks.
///
/// The embedder is reached through a [`SharedHandle`] so production code can
/// supply `OnnxEmbeddingService` while tests use `MockEmbedding`.
#[derive(Debug, Clone)]
pub struct SearchEngine {
    index: Arc<VectorIndex>,
    embedder: Arc<EmbedderHandle>,
    max_retries: u32,
}

impl SearchEngine {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<EmbedderHandle>, max_retries: u32) -> Self {
        Self {
            index,
            embedder,
            max_retries,
        }
    }

    /// Return the `k` chunks of `session_id` most similar to `query_text`,
    /// ordered by descending similarity.
    ///
    /// A session without chunks yields an empty result without calling the
    /// embedding backend.
    pub async fn query(&self, session_id: &SessionId, query_text: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || self.index.chunk_count(session_id)? == 0 {
            debug!(session_id = %session_id.short(), "No documents to search");
            return Ok(Vec::new());
        }

        let embedder = self.embedder.get().await?;
        let query_vec = embed_with_retry(embedder.as_ref(), query_text, self.max_retries).await?;
        let hits = self.index.search(session_id, &query_vec, k)?;

        debug!(
            session_id = %session_id.short(),
            hits = hits.len(),
            k,
            "Session search complete"
        );
        Ok(hits)
    }

    /// Get a reference to the underlying vector index.
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }
}
