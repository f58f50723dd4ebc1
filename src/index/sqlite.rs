use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex as TokioMutex;
use tracing::info;
use uuid::Uuid;

use super::{Chunk, ChunkMetadata, ChunkStore, IndexError};
use crate::db::Db;
use crate::db::models::ChunkRow;

/// Chunk store persisted in the `chunks` table. The decoded chunk list is
/// cached after the first read and replaced on every write from this
/// process.
pub struct SqliteChunkStore {
    db: Arc<TokioMutex<Db>>,
    cache: RwLock<Option<Arc<Vec<Chunk>>>>,
}

impl SqliteChunkStore {
    pub fn new(db: Arc<TokioMutex<Db>>) -> Self {
        Self {
            db,
            cache: RwLock::new(None),
        }
    }

    fn cached(&self) -> Option<Arc<Vec<Chunk>>> {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_cache(&self, chunks: Option<Arc<Vec<Chunk>>>) {
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = chunks;
    }
}

fn to_row(chunk: &Chunk) -> ChunkRow {
    ChunkRow {
        id: chunk.id.to_string(),
        content: chunk.text.clone(),
        embedding: chunk.embedding.clone(),
        title: chunk.metadata.title.clone(),
        url: chunk.metadata.url.clone(),
        published_date: chunk.metadata.published_date.clone(),
        indexed_at: Utc::now(),
    }
}

fn from_row(row: ChunkRow) -> Result<Chunk, IndexError> {
    let id = Uuid::parse_str(&row.id)
        .map_err(|e| IndexError::Corrupt(format!("chunk id {}: {e}", row.id)))?;
    Ok(Chunk {
        id,
        text: row.content,
        embedding: row.embedding,
        metadata: ChunkMetadata {
            title: row.title,
            url: row.url,
            published_date: row.published_date,
            degraded: false,
        },
    })
}

#[async_trait]
impl ChunkStore for SqliteChunkStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn insert(&self, chunks: Vec<Chunk>) -> Result<(), IndexError> {
        let rows: Vec<ChunkRow> = chunks.iter().map(to_row).collect();
        let mut db = self.db.lock().await;
        db.insert_chunks(&rows)?;

        // Extend under the db lock so concurrent writers cannot interleave
        if let Some(current) = self.cached() {
            let mut next = current.as_ref().clone();
            next.extend(chunks);
            self.set_cache(Some(Arc::new(next)));
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<Arc<Vec<Chunk>>, IndexError> {
        if let Some(chunks) = self.cached() {
            return Ok(chunks);
        }

        let db = self.db.lock().await;
        let chunks = db
            .load_chunks()?
            .into_iter()
            .map(from_row)
            .collect::<Result<Vec<_>, _>>()?;
        info!("Loaded {} persisted chunks", chunks.len());

        let chunks = Arc::new(chunks);
        self.set_cache(Some(Arc::clone(&chunks)));
        Ok(chunks)
    }

    async fn clear(&self) -> Result<usize, IndexError> {
        let db = self.db.lock().await;
        let removed = db.clear_chunks()?;
        self.set_cache(Some(Arc::new(Vec::new())));
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        if let Some(chunks) = self.cached() {
            return Ok(chunks.len());
        }
        Ok(self.db.lock().await.count_chunks()?)
    }
}
