//! ProView vector crate - chunking, embedding service, session-partitioned
//! index, search, and the document ingestion pipeline.
//!
//! Provides in-memory vector indexing with cosine similarity search scoped
//! to one session per query, an embedding service trait with ONNX and mock
//! implementations, and the upload path from raw text to stored chunks.

pub mod chunker;
pub mod embedding;
pub mod index;
pub mod pipeline;
pub mod search;

pub use chunker::{chunk, TextSpan};
pub use embedding::{embed_with_retry, DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService};
pub use index::{ChunkMetadata, SearchHit, VectorIndex};
pub use pipeline::{IngestPipeline, IngestReport, PreparedDocument};
pub use search::{EmbedderHandle, SearchEngine};
