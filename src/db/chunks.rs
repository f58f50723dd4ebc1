use super::{Db, deserialize_vector, models::ChunkRow, serialize_vector};
use rusqlite::{Result, params};

impl Db {
    /// Inserts chunk rows in one transaction, preserving slice order.
    pub fn insert_chunks(&mut self, chunks: &[ChunkRow]) -> Result<()> {
        let tx = self.conn.transaction()?;

        for chunk in chunks {
            tx.execute(
                r#"
                INSERT INTO chunks (id, content, embedding, title, url, published_date, indexed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    chunk.id,
                    chunk.content,
                    serialize_vector(&chunk.embedding),
                    chunk.title,
                    chunk.url,
                    chunk.published_date,
                    chunk.indexed_at,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// All chunks in insertion order.
    pub fn load_chunks(&self) -> Result<Vec<ChunkRow>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, content, embedding, title, url, published_date, indexed_at
            FROM chunks
            ORDER BY seq ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            let blob: Vec<u8> = row.get(2)?;
            Ok(ChunkRow {
                id: row.get(0)?,
                content: row.get(1)?,
                embedding: deserialize_vector(&blob),
                title: row.get(3)?,
                url: row.get(4)?,
                published_date: row.get(5)?,
                indexed_at: row.get(6)?,
            })
        })?;

        let mut chunks = Vec::new();
        for row in rows {
            chunks.push(row?);
        }

        Ok(chunks)
    }

    pub fn clear_chunks(&self) -> Result<usize> {
        self.conn.execute("DELETE FROM chunks", [])
    }

    pub fn count_chunks(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
