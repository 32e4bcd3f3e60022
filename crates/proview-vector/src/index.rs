//! In-memory vector index with brute-force cosine similarity search,
//! partitioned by session.
//!
//! Each session owns a separate partition behind its own lock, so uploads
//! and queries for different sessions never contend on the same data, and
//! a search can only ever see the partition of the session it names.
//! Search is O(n) in the session's chunk count, which is small.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use proview_core::error::{ProviewError, Result};
use proview_core::types::{DocumentChunk, SessionId};

use crate::chunker::TextSpan;

/// A single hit returned from a vector search.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: DocumentChunk,
    /// Cosine similarity score (-1.0 to 1.0).
    pub score: f64,
}

/// Metadata shared by every chunk of one upload.
#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    pub source_file: String,
    pub uploaded_at: DateTime<Utc>,
}

impl ChunkMetadata {
    pub fn new(source_file: impl Into<String>) -> Self {
        Self {
            source_file: source_file.into(),
            uploaded_at: Utc::now(),
        }
    }
}

type Partition = Arc<RwLock<Vec<DocumentChunk>>>;

/// In-memory vector index keyed by session id.
///
/// Thread-safe via interior locks: the outer lock is held only long enough
/// to find or create a partition, never across a similarity scan.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    partitions: Arc<RwLock<HashMap<SessionId, Partition>>>,
}

impl VectorIndex {
    /// Create a new empty vector index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one upload's chunks to a session.
    ///
    /// All-or-nothing: every input is checked before the partition is
    /// touched, and the append happens under a single write lock, so a
    /// concurrent search sees either none or all of the batch.
    /// Returns the number of chunks stored.
    pub fn insert(
        &self,
        session_id: &SessionId,
        spans: &[TextSpan],
        embeddings: Vec<Vec<f32>>,
        metadata: &ChunkMetadata,
    ) -> Result<usize> {
        if spans.len() != embeddings.len() {
            return Err(ProviewError::Validation(format!(
                "{} chunks but {} embeddings",
                spans.len(),
                embeddings.len()
            )));
        }
        if spans.is_empty() {
            return Ok(0);
        }

        let dims = embeddings[0].len();
        if dims == 0 || embeddings.iter().any(|e| e.len() != dims) {
            return Err(ProviewError::Storage(
                "Embeddings in one batch must share a non-zero dimension".to_string(),
            ));
        }

        let batch: Vec<DocumentChunk> = spans
            .iter()
            .zip(embeddings)
            .map(|(span, embedding)| DocumentChunk {
                id: Uuid::new_v4(),
                session_id: session_id.clone(),
                source_file: metadata.source_file.clone(),
                index: span.index,
                text: span.text.clone(),
                embedding,
                uploaded_at: metadata.uploaded_at,
            })
            .collect();

        // The map lock is held through the append so `delete_session`
        // cannot detach the partition mid-insert.
        {
            let partitions = self
                .partitions
                .read()
                .map_err(|e| ProviewError::Storage(format!("Lock poisoned: {}", e)))?;
            if let Some(partition) = partitions.get(session_id) {
                return append(partition, batch, dims);
            }
        }
        let mut partitions = self
            .partitions
            .write()
            .map_err(|e| ProviewError::Storage(format!("Lock poisoned: {}", e)))?;
        append(partitions.entry(session_id.clone()).or_default(), batch, dims)
    }

    /// Search one session's chunks for the k nearest neighbors to `query`.
    ///
    /// Returns results sorted by descending similarity; equal scores keep
    /// insertion order. Unknown sessions yield an empty result.
    pub fn search(&self, session_id: &SessionId, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let Some(partition) = self.partition(session_id)? else {
            return Ok(Vec::new());
        };
        let chunks = partition
            .read()
            .map_err(|e| ProviewError::Storage(format!("Lock poisoned: {}", e)))?;

        let mut scored: Vec<(usize, f64)> = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (i, cosine_similarity(query, &chunk.embedding)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchHit {
                chunk: chunks[i].clone(),
                score,
            })
            .collect())
    }

    /// Remove every chunk of a session. Idempotent.
    ///
    /// Returns the number of chunks removed (0 for an unknown session).
    pub fn delete_session(&self, session_id: &SessionId) -> Result<usize> {
        let removed = self
            .partitions
            .write()
            .map_err(|e| ProviewError::Storage(format!("Lock poisoned: {}", e)))?
            .remove(session_id);

        match removed {
            Some(partition) => {
                let chunks = partition
                    .read()
                    .map_err(|e| ProviewError::Storage(format!("Lock poisoned: {}", e)))?;
                Ok(chunks.len())
            }
            None => Ok(0),
        }
    }

    /// Number of chunks stored for a session.
    pub fn chunk_count(&self, session_id: &SessionId) -> Result<usize> {
        match self.partition(session_id)? {
            Some(partition) => partition
                .read()
                .map(|c| c.len())
                .map_err(|e| ProviewError::Storage(format!("Lock poisoned: {}", e))),
            None => Ok(0),
        }
    }

    /// Number of sessions with at least one stored batch.
    pub fn session_count(&self) -> usize {
        self.partitions.read().map(|p| p.len()).unwrap_or(0)
    }

    /// Return true if no session holds any chunks.
    pub fn is_empty(&self) -> bool {
        self.session_count() == 0
    }

    fn partition(&self, session_id: &SessionId) -> Result<Option<Partition>> {
        let partitions = self
            .partitions
            .read()
            .map_err(|e| ProviewError::Storage(format!("Lock poisoned: {}", e)))?;
        Ok(partitions.get(session_id).cloned())
    }

}

/// Append a validated batch to a partition under its write lock.
fn append(partition: &Partition, batch: Vec<DocumentChunk>, dims: usize) -> Result<usize> {
    let mut chunks = partition
        .write()
        .map_err(|e| ProviewError::Storage(format!("Lock poisoned: {}", e)))?;

    if let Some(existing) = chunks.first() {
        if existing.embedding.len() != dims {
            return Err(ProviewError::Storage(format!(
                "Embedding dimension {} does not match stored dimension {}",
                dims,
                existing.embedding.len()
            )));
        }
    }

    let count = batch.len();
    chunks.extend(batch);
    Ok(count)
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    fn spans(texts: &[&str]) -> Vec<TextSpan> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| TextSpan {
                index: i,
                start: 0,
                end: t.chars().count(),
                text: t.to_string(),
            })
            .collect()
    }

    fn axis(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn test_insert_and_search() {
        let index = VectorIndex::new();
        let s1 = sid("session-one");

        let stored = index
            .insert(
                &s1,
                &spans(&["python", "kafka"]),
                vec![axis(8, 0), axis(8, 1)],
                &ChunkMetadata::new("resume.txt"),
            )
            .unwrap();
        assert_eq!(stored, 2);
        assert_eq!(index.chunk_count(&s1).unwrap(), 2);

        let hits = index.search(&s1, &axis(8, 1), 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.text, "kafka");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[0].chunk.source_file, "resume.txt");
        assert_eq!(hits[0].chunk.session_id, s1);
    }

    #[test]
    fn test_search_never_crosses_sessions() {
        let index = VectorIndex::new();
        let a = sid("session-aaaa");
        let b = sid("session-bbbb");

        index
            .insert(&a, &spans(&["secret of a"]), vec![axis(4, 0)], &ChunkMetadata::new("a.txt"))
            .unwrap();

        for k in [1, 3, 100] {
            assert!(index.search(&b, &axis(4, 0), k).unwrap().is_empty());
        }

        index
            .insert(&b, &spans(&["note of b"]), vec![axis(4, 0)], &ChunkMetadata::new("b.txt"))
            .unwrap();
        let hits = index.search(&b, &axis(4, 0), 100).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits.iter().all(|h| h.chunk.session_id == b));
    }

    #[test]
    fn test_insert_appends_never_overwrites() {
        let index = VectorIndex::new();
        let s = sid("session-append");
        let meta = ChunkMetadata::new("jd.txt");

        index.insert(&s, &spans(&["first"]), vec![axis(4, 0)], &meta).unwrap();
        index.insert(&s, &spans(&["second"]), vec![axis(4, 0)], &meta).unwrap();

        assert_eq!(index.chunk_count(&s).unwrap(), 2);
    }

    #[test]
    fn test_insert_length_mismatch_writes_nothing() {
        let index = VectorIndex::new();
        let s = sid("session-mismatch");

        let err = index
            .insert(&s, &spans(&["a", "b"]), vec![axis(4, 0)], &ChunkMetadata::new("x"))
            .unwrap_err();
        assert!(matches!(err, ProviewError::Validation(_)));
        assert_eq!(index.chunk_count(&s).unwrap(), 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_insert_dimension_mismatch_is_storage_error() {
        let index = VectorIndex::new();
        let s = sid("session-dims");
        let meta = ChunkMetadata::new("x");

        let err = index
            .insert(&s, &spans(&["a", "b"]), vec![axis(4, 0), axis(8, 0)], &meta)
            .unwrap_err();
        assert!(matches!(err, ProviewError::Storage(_)));

        index.insert(&s, &spans(&["a"]), vec![axis(4, 0)], &meta).unwrap();
        let err = index.insert(&s, &spans(&["b"]), vec![axis(8, 0)], &meta).unwrap_err();
        assert!(matches!(err, ProviewError::Storage(_)));
        assert_eq!(index.chunk_count(&s).unwrap(), 1);
    }

    #[test]
    fn test_empty_insert_is_noop() {
        let index = VectorIndex::new();
        let s = sid("session-empty");
        assert_eq!(index.insert(&s, &[], vec![], &ChunkMetadata::new("x")).unwrap(), 0);
        assert_eq!(index.session_count(), 0);
    }

    #[test]
    fn test_delete_session_then_search_is_empty() {
        let index = VectorIndex::new();
        let s = sid("session-delete");
        index
            .insert(&s, &spans(&["a", "b", "c"]), vec![axis(4, 0); 3], &ChunkMetadata::new("x"))
            .unwrap();

        assert_eq!(index.delete_session(&s).unwrap(), 3);
        assert!(index.search(&s, &axis(4, 0), 10).unwrap().is_empty());
        // Second delete is a no-op.
        assert_eq!(index.delete_session(&s).unwrap(), 0);
    }

    #[test]
    fn test_delete_unknown_session() {
        let index = VectorIndex::new();
        assert_eq!(index.delete_session(&sid("never-seen")).unwrap(), 0);
    }

    #[test]
    fn test_search_respects_k_limit() {
        let index = VectorIndex::new();
        let s = sid("session-limit");
        let texts: Vec<String> = (0..10).map(|i| format!("chunk {}", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        index
            .insert(&s, &spans(&refs), vec![vec![1.0f32; 16]; 10], &ChunkMetadata::new("x"))
            .unwrap();

        assert_eq!(index.search(&s, &[1.0f32; 16], 3).unwrap().len(), 3);
    }

    #[test]
    fn test_equal_scores_keep_insertion_order() {
        let index = VectorIndex::new();
        let s = sid("session-ties");
        index
            .insert(&s, &spans(&["a", "b", "c"]), vec![vec![1.0f32; 4]; 3], &ChunkMetadata::new("x"))
            .unwrap();

        let hits = index.search(&s, &[1.0f32; 4], 3).unwrap();
        let order: Vec<&str> = hits.iter().map(|h| h.chunk.text.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_concurrent_insert_and_delete_lose_nothing() {
        let index = VectorIndex::new();
        let id = sid("session-contended");
        let inserted = std::sync::atomic::AtomicUsize::new(0);
        let deleted = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let n = index
                            .insert(
                                &id,
                                &spans(&["a", "b", "c"]),
                                vec![axis(4, 0), axis(4, 1), axis(4, 2)],
                                &ChunkMetadata::new("doc.txt"),
                            )
                            .unwrap();
                        inserted.fetch_add(n, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
            for _ in 0..2 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let n = index.delete_session(&id).unwrap();
                        deleted.fetch_add(n, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });

        // Every acknowledged chunk was either deleted or is still stored.
        let remaining = index.chunk_count(&id).unwrap();
        assert_eq!(
            inserted.load(std::sync::atomic::Ordering::SeqCst),
            deleted.load(std::sync::atomic::Ordering::SeqCst) + remaining
        );
        assert_eq!(remaining % 3, 0);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0f32; 100];
        let b = vec![1.0f32; 100];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&axis(100, 0), &axis(100, 1)).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0f32; 100];
        let b = vec![1.0f32; 100];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_similarity_length_mismatch() {
        let a = vec![1.0f32; 10];
        let b = vec![1.0f32; 20];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
