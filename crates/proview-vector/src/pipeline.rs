//! Document ingestion pipeline.
//!
//! The IngestPipeline takes already-extracted document text through
//! chunking, embedding, and a single all-or-nothing index insert.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use proview_core::config::{EmbeddingConfig, RagConfig};
use proview_core::error::{ProviewError, Result};
use proview_core::types::SessionId;

use crate::chunker::{self, TextSpan};
use crate::embedding::embed_with_retry;
use crate::index::{ChunkMetadata, VectorIndex};
use crate::search::EmbedderHandle;

/// Outcome of one successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub source_file: String,
    pub chunks_created: usize,
}

/// A chunked and embedded document that has not been stored yet.
#[derive(Debug, Clone)]
pub struct PreparedDocument {
    pub spans: Vec<TextSpan>,
    pub embeddings: Vec<Vec<f32>>,
    pub metadata: ChunkMetadata,
}

impl PreparedDocument {
    pub fn chunk_count(&self) -> usize {
        self.spans.len()
    }
}

/// Chunk, embed, and store one document for a session.
///
/// Nothing reaches the index until every chunk has been embedded, so an
/// embedding failure partway through leaves the session unchanged.
#[derive(Debug, Clone)]
pub struct IngestPipeline {
    index: Arc<VectorIndex>,
    embedder: Arc<EmbedderHandle>,
    chunk_size: usize,
    chunk_overlap: usize,
    max_retries: u32,
}

impl IngestPipeline {
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<EmbedderHandle>,
        rag: &RagConfig,
        embedding: &EmbeddingConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            chunk_size: rag.chunk_size,
            chunk_overlap: rag.chunk_overlap,
            max_retries: embedding.max_retries,
        }
    }

    /// Chunk and embed a document, then store it.
    pub async fn ingest(&self, session_id: &SessionId, source_file: &str, text: &str) -> Result<IngestReport> {
        let prepared = self.prepare(session_id, source_file, text).await?;
        self.commit(session_id, prepared)
    }

    /// Chunk and embed a document without storing anything.
    ///
    /// This is the slow half of an upload and holds no locks.
    pub async fn prepare(&self, session_id: &SessionId, source_file: &str, text: &str) -> Result<PreparedDocument> {
        if text.trim().is_empty() {
            return Err(ProviewError::Validation(
                "Document text must not be empty".to_string(),
            ));
        }

        let spans = chunker::chunk(text, self.chunk_size, self.chunk_overlap)?;
        debug!(
            session_id = %session_id.short(),
            source_file,
            chunks = spans.len(),
            "Document chunked"
        );

        let embedder = self.embedder.get().await?;
        let mut embeddings = Vec::with_capacity(spans.len());
        for span in &spans {
            embeddings.push(embed_with_retry(embedder.as_ref(), &span.text, self.max_retries).await?);
        }

        Ok(PreparedDocument {
            spans,
            embeddings,
            metadata: ChunkMetadata::new(source_file),
        })
    }

    /// Store a prepared document in one all-or-nothing insert.
    pub fn commit(&self, session_id: &SessionId, prepared: PreparedDocument) -> Result<IngestReport> {
        let PreparedDocument {
            spans,
            embeddings,
            metadata,
        } = prepared;
        let stored = self.index.insert(session_id, &spans, embeddings, &metadata)?;

        info!(
            session_id = %session_id.short(),
            source_file = %metadata.source_file,
            chunks = stored,
            "Document ingested"
        );
        Ok(IngestReport {
            source_file: metadata.source_file,
            chunks_created: stored,
        })
    }

    /// Get a reference to the underlying vector index.
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }
}
