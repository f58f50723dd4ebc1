use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{Chunk, ChunkStore, IndexError};

/// Copy-on-write chunk list. Readers clone the current `Arc`; writers
/// replace it, so outstanding snapshots are never mutated.
#[derive(Default)]
pub struct MemoryChunkStore {
    chunks: RwLock<Arc<Vec<Chunk>>>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Arc<Vec<Chunk>>> {
        self.chunks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arc<Vec<Chunk>>> {
        self.chunks.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, chunks: Vec<Chunk>) -> Result<(), IndexError> {
        let mut guard = self.write();
        Arc::make_mut(&mut guard).extend(chunks);
        Ok(())
    }

    async fn snapshot(&self) -> Result<Arc<Vec<Chunk>>, IndexError> {
        Ok(Arc::clone(&self.read()))
    }

    async fn clear(&self) -> Result<usize, IndexError> {
        let mut guard = self.write();
        let removed = guard.len();
        *guard = Arc::new(Vec::new());
        Ok(removed)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ChunkMetadata;
    use uuid::Uuid;

    fn chunk(text: &str) -> Chunk {
        Chunk {
            id: Uuid::new_v4(),
            text: text.to_string(),
            embedding: vec![1.0],
            metadata: ChunkMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_snapshot_is_isolated_from_writes() {
        let store = MemoryChunkStore::new();
        store.insert(vec![chunk("a")]).await.unwrap();

        let before = store.snapshot().await.unwrap();
        store.insert(vec![chunk("b")]).await.unwrap();
        store.clear().await.unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(before[0].text, "a");
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_insert_and_snapshot() {
        let store = Arc::new(MemoryChunkStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..25 {
                    store.insert(vec![chunk(&format!("{i}-{j}"))]).await.unwrap();
                    let snap = store.snapshot().await.unwrap();
                    assert!(snap.iter().all(|c| c.embedding.len() == 1));
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 200);
    }
}
