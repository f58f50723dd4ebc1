use crate::embedder::Embedder;
use crate::index::{ChunkMetadata, IndexError, VectorIndex};
use crate::indexer::chunker;
use crate::ingest::SourceDocument;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub inserted: usize,
}

pub struct Indexer {
    pub index: Arc<VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub chunk_size: usize,
}

impl Indexer {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>, chunk_size: usize) -> Self {
        Self {
            index,
            embedder,
            chunk_size,
        }
    }

    /// Chunks every document, embeds all chunks in one batch and upserts the
    /// chunks whose embedding succeeded. Existing chunks are kept.
    pub async fn index_documents(
        &self,
        documents: &[SourceDocument],
    ) -> Result<IngestReport, IndexError> {
        let mut report = IngestReport {
            documents: documents.len(),
            ..IngestReport::default()
        };

        let mut texts = Vec::new();
        let mut metadata = Vec::new();
        for doc in documents {
            for chunk in chunker::split_words(&doc.content, self.chunk_size) {
                texts.push(chunk);
                metadata.push(ChunkMetadata {
                    title: Some(doc.title.clone()),
                    url: Some(doc.url.clone()),
                    published_date: doc.published_date.clone(),
                    degraded: false,
                });
            }
        }
        report.chunks = texts.len();
        if texts.is_empty() {
            return Ok(report);
        }
        info!(
            "Created {} chunks from {} documents",
            report.chunks, report.documents
        );

        // Vectorize chunks
        let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let vectors = self.embedder.embed_batch(&text_refs).await;

        let mut valid_texts = Vec::with_capacity(texts.len());
        let mut valid_vectors = Vec::with_capacity(texts.len());
        let mut valid_metadata = Vec::with_capacity(texts.len());
        for ((text, vector), meta) in texts.into_iter().zip(vectors).zip(metadata) {
            if let Some(vector) = vector {
                valid_texts.push(text);
                valid_vectors.push(vector);
                valid_metadata.push(meta);
            }
        }
        report.embedded = valid_texts.len();
        if report.embedded < report.chunks {
            warn!(
                "Embedding failed for {} of {} chunks",
                report.chunks - report.embedded,
                report.chunks
            );
        }

        report.inserted = self
            .index
            .upsert_batch(&valid_texts, &valid_vectors, &valid_metadata)
            .await?;

        Ok(report)
    }
}
