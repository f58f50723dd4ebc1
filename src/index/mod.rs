//! In-process vector index with cosine top-k search.
//!
//! [`VectorIndex`] owns the dimensionality contract and the ranking; a
//! [`ChunkStore`] only keeps chunks. Stores hand out immutable snapshots, so
//! a search never observes a half-applied upsert or clear.
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

pub use memory::MemoryChunkStore;
pub use sqlite::SqliteChunkStore;

/// Text of the placeholder result returned when the store cannot be read.
pub const DEGRADED_TEXT: &str = "I'm sorry, but I'm currently experiencing issues with my knowledge base. I can still try to help based on my general knowledge.";

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "batch length mismatch: {documents} documents, {embeddings} embeddings, {metadata} metadata"
    )]
    LengthMismatch {
        documents: usize,
        embeddings: usize,
        metadata: usize,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("corrupt chunk record: {0}")]
    Corrupt(String),

    #[error("index unavailable: {0}")]
    Unavailable(String),
}

impl IndexError {
    /// Whether the backing store could not be reached, as opposed to the
    /// caller passing bad input.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, IndexError::Storage(_) | IndexError::Unavailable(_))
    }
}

/// Provenance of a chunk. `degraded` marks the placeholder result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl ChunkMetadata {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: Uuid,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

impl SearchResult {
    /// Low-confidence placeholder standing in for an unreachable store.
    pub fn degraded() -> Self {
        Self {
            text: DEGRADED_TEXT.to_string(),
            metadata: ChunkMetadata {
                degraded: true,
                ..ChunkMetadata::default()
            },
            score: 0.0,
        }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.metadata.degraded
    }
}

/// Backing storage for chunks, in insertion order.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Appends all of `chunks` or none of them.
    async fn insert(&self, chunks: Vec<Chunk>) -> Result<(), IndexError>;

    /// Immutable view of every stored chunk in insertion order.
    async fn snapshot(&self) -> Result<Arc<Vec<Chunk>>, IndexError>;

    /// Drops every chunk, returning how many were removed.
    async fn clear(&self) -> Result<usize, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;
}

/// Cosine similarity of two equal-length vectors; 0 when either norm is 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0)
}

pub struct VectorIndex {
    store: Arc<dyn ChunkStore>,
    dimensions: usize,
}

impl VectorIndex {
    pub fn new(store: Arc<dyn ChunkStore>, dimensions: usize) -> Self {
        Self { store, dimensions }
    }

    /// An index over a fresh in-process store.
    pub fn in_memory(dimensions: usize) -> Self {
        Self::new(Arc::new(MemoryChunkStore::new()), dimensions)
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() == self.dimensions {
            Ok(())
        } else {
            Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            })
        }
    }

    /// Stores one chunk under a fresh id. Chunks with empty text or an empty
    /// embedding are skipped and yield `None`.
    pub async fn upsert(
        &self,
        text: &str,
        embedding: Vec<f32>,
        metadata: ChunkMetadata,
    ) -> Result<Option<Uuid>, IndexError> {
        if text.trim().is_empty() || embedding.is_empty() {
            warn!("Skipping chunk with empty text or embedding");
            return Ok(None);
        }
        self.check_dimensions(&embedding)?;

        let id = Uuid::new_v4();
        self.store
            .insert(vec![Chunk {
                id,
                text: text.to_string(),
                embedding,
                metadata,
            }])
            .await?;
        Ok(Some(id))
    }

    /// Stores parallel document/embedding/metadata slices and returns how
    /// many chunks were inserted. Nothing is inserted if the slices differ in
    /// length or any non-empty embedding has the wrong dimensionality.
    pub async fn upsert_batch(
        &self,
        documents: &[String],
        embeddings: &[Vec<f32>],
        metadata: &[ChunkMetadata],
    ) -> Result<usize, IndexError> {
        if documents.len() != embeddings.len() || documents.len() != metadata.len() {
            return Err(IndexError::LengthMismatch {
                documents: documents.len(),
                embeddings: embeddings.len(),
                metadata: metadata.len(),
            });
        }

        let mut chunks = Vec::with_capacity(documents.len());
        for ((text, embedding), meta) in documents.iter().zip(embeddings).zip(metadata) {
            if text.trim().is_empty() || embedding.is_empty() {
                warn!("Skipping chunk with empty text or embedding");
                continue;
            }
            self.check_dimensions(embedding)?;
            chunks.push(Chunk {
                id: Uuid::new_v4(),
                text: text.clone(),
                embedding: embedding.clone(),
                metadata: meta.clone(),
            });
        }

        let inserted = chunks.len();
        if inserted > 0 {
            self.store.insert(chunks).await?;
        }
        debug!("Upserted {inserted} of {} chunks", documents.len());
        Ok(inserted)
    }

    /// Top-`top_k` chunks by descending cosine similarity, ties in insertion
    /// order.
    ///
    /// Empty when the query is empty or the index holds nothing. If the store
    /// cannot be read the single [`SearchResult::degraded`] placeholder is
    /// returned instead.
    pub async fn search(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if query.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimensions(query)?;

        let chunks = match self.store.snapshot().await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("Chunk store {} unavailable during search: {e}", self.store.name());
                return Ok(vec![SearchResult::degraded()]);
            }
        };

        let mut scored: Vec<(usize, f32)> = chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.embedding.is_empty())
            .map(|(i, c)| (i, cosine_similarity(query, &c.embedding)))
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchResult {
                text: chunks[i].text.clone(),
                metadata: chunks[i].metadata.clone(),
                score,
            })
            .collect())
    }

    pub async fn clear(&self) -> Result<(), IndexError> {
        let removed = self.store.clear().await?;
        debug!("Cleared {removed} chunks");
        Ok(())
    }

    /// Number of stored chunks; 0 if the store cannot be read.
    pub async fn size(&self) -> usize {
        match self.store.count().await {
            Ok(n) => n,
            Err(e) => {
                warn!("Could not count chunks: {e}");
                0
            }
        }
    }
}
