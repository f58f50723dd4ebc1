//! Client for an OpenAI/Jina-compatible `/v1/embeddings` endpoint.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{Embedder, EmbedderError};
use crate::config::EmbeddingConfig;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [&'a str],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

pub struct HttpEmbedder {
    client: Client,
    api_url: String,
    model: String,
    api_key: String,
    batch_size: usize,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(
        config: &EmbeddingConfig,
        api_key: String,
        dimensions: usize,
    ) -> Result<Self, EmbedderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        info!("Using embedding API {} ({})", config.api_url, config.model);

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            api_key,
            batch_size: config.batch_size.max(1),
            dimensions,
        })
    }

    async fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                input: inputs,
                model: &self.model,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response.json().await?;
        decode_response(parsed, inputs.len(), self.dimensions)
    }
}

/// Orders the returned vectors by their `index` field when present and
/// checks count and dimensionality.
fn decode_response(
    mut response: EmbeddingResponse,
    expected_len: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    if response.data.len() != expected_len {
        return Err(EmbedderError::InvalidResponse(format!(
            "expected {expected_len} embeddings, got {}",
            response.data.len()
        )));
    }

    if response.data.iter().all(|d| d.index.is_some()) {
        response.data.sort_by_key(|d| d.index);
    }

    response
        .data
        .into_iter()
        .map(|d| {
            if d.embedding.len() == dimensions {
                Ok(d.embedding)
            } else {
                Err(EmbedderError::DimensionMismatch {
                    expected: dimensions,
                    actual: d.embedding.len(),
                })
            }
        })
        .collect()
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        if text.trim().is_empty() {
            return Err(EmbedderError::EmptyInput);
        }

        let mut vectors = self.request(&[text]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbedderError::InvalidResponse("no embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Vec<Option<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

        // Blank texts keep their `None` slot and are never sent
        let positions: Vec<usize> = (0..texts.len())
            .filter(|&i| !texts[i].trim().is_empty())
            .collect();

        for (batch_no, batch) in positions.chunks(self.batch_size).enumerate() {
            let inputs: Vec<&str> = batch.iter().map(|&i| texts[i]).collect();
            match self.request(&inputs).await {
                Ok(vectors) => {
                    for (&slot, vector) in batch.iter().zip(vectors) {
                        out[slot] = Some(vector);
                    }
                    debug!("Embedded batch {} ({} texts)", batch_no + 1, inputs.len());
                }
                Err(e) => error!("Embedding batch {} failed: {e}", batch_no + 1),
            }
        }

        out
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
