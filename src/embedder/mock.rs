/// Mock embedder for tests and keyless runs.
///
/// Generates deterministic embeddings seeded from the text hash.
use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;

use super::{Embedder, EmbedderError};

/// A mock embedder that produces deterministic unit vectors from text hashes.
pub struct MockEmbedder {
    pub dimensions: usize,
}

impl MockEmbedder {
    /// Create a new `MockEmbedder` with the given dimensionality.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        // splitmix64, one step per component
        let mut embedding = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^= z >> 31;
            embedding.push((z >> 40) as f32 / (1u64 << 23) as f32 - 1.0);
        }

        // L2 normalize
        let norm_sq: f32 = embedding.iter().map(|v| v * v).sum();
        if norm_sq > 0.0 {
            let inv = 1.0 / norm_sq.sqrt();
            for v in &mut embedding {
                *v *= inv;
            }
        }

        embedding
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self { dimensions: 768 }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if text.trim().is_empty() {
            return Err(EmbedderError::EmptyInput);
        }
        Ok(self.vector_for(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_embed_dimensions() {
        let embedder = MockEmbedder::new(384);
        let result = embedder.embed("hello world").await.unwrap();
        assert_eq!(result.len(), 384);
    }

    #[tokio::test]
    async fn test_mock_embed_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("hello").await.unwrap();
        let b = embedder.embed("hello").await.unwrap();
        assert_eq!(a, b, "same input should produce same output");
    }

    #[tokio::test]
    async fn test_mock_embed_different_inputs() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("hello").await.unwrap();
        let b = embedder.embed("world").await.unwrap();
        assert_ne!(a, b, "different inputs should produce different outputs");
    }

    #[tokio::test]
    async fn test_mock_embed_normalized() {
        let embedder = MockEmbedder::new(384);
        let vec = embedder.embed("test normalization").await.unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < 0.01,
            "vector should be approximately unit length, got {norm}"
        );
    }

    #[tokio::test]
    async fn test_mock_embed_batch_keeps_slots() {
        let embedder = MockEmbedder::new(16);
        let results = embedder.embed_batch(&["a", "  ", "c"]).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_some());
        assert!(results[1].is_none(), "blank text gets an empty slot");
        assert_eq!(results[2].as_ref().map(Vec::len), Some(16));
    }

    #[test]
    fn test_mock_default_dimensions() {
        let embedder = MockEmbedder::default();
        assert_eq!(embedder.dimensions(), 768);
    }
}
