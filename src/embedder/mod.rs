/// Embedder trait and shared types for text embedding.
///
/// Production uses [`HttpEmbedder`] against a hosted embeddings API; when no
/// API key is configured the deterministic [`MockEmbedder`] stands in.
pub mod http;
pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::config::{EmbeddingConfig, api_key_from_env};

pub use http::HttpEmbedder;
pub use mock::MockEmbedder;

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("empty input text")]
    EmptyInput,

    #[error("embedding request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("embedding API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple texts. Returns one slot per input, in input order,
    /// with `None` where embedding failed.
    async fn embed_batch(&self, texts: &[&str]) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await.ok());
        }
        out
    }

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Pick the embedder for `config`: the HTTP client when its API key variable
/// is set, the mock otherwise.
pub fn from_config(
    config: &EmbeddingConfig,
    dimensions: usize,
) -> Result<Arc<dyn Embedder>, EmbedderError> {
    match api_key_from_env(&config.api_key_env) {
        Some(key) => Ok(Arc::new(HttpEmbedder::new(config, key, dimensions)?)),
        None => {
            warn!(
                "{} not set, using mock embeddings (not useful for production)",
                config.api_key_env
            );
            Ok(Arc::new(MockEmbedder::new(dimensions)))
        }
    }
}
