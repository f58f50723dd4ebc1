use super::{Message, SessionBackend, SessionError};
use crate::db::Db;
use crate::db::models::MessageRow;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;

/// Shared session backend on a SQLite file. Several processes opening the
/// same file see the same sessions. Every session expires `ttl` after its
/// last write.
pub struct SqliteBackend {
    db: Arc<TokioMutex<Db>>,
    ttl: TimeDelta,
}

impl SqliteBackend {
    pub fn open<P: AsRef<Path>>(path: P, ttl: Duration) -> Result<Self, SessionError> {
        let db = Db::open(path)?;
        Ok(Self::new(Arc::new(TokioMutex::new(db)), ttl))
    }

    pub fn new(db: Arc<TokioMutex<Db>>, ttl: Duration) -> Self {
        let ttl = TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::days(36_500));
        Self { db, ttl }
    }
}

fn to_row(message: &Message) -> MessageRow {
    MessageRow {
        role: message.role.as_str().to_string(),
        content: message.content.clone(),
        timestamp: message.timestamp.unwrap_or_else(Utc::now),
    }
}

fn from_row(row: MessageRow) -> Result<Message, SessionError> {
    Ok(Message {
        role: row.role.parse()?,
        content: row.content,
        timestamp: Some(row.timestamp),
    })
}

#[async_trait]
impl SessionBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn ttl(&self) -> Option<Duration> {
        self.ttl.to_std().ok()
    }

    async fn ping(&self) -> Result<(), SessionError> {
        self.db.lock().await.ping()?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.db.lock().await.session_exists(id, Utc::now())?)
    }

    async fn create(&self, id: &str) -> Result<bool, SessionError> {
        let now = Utc::now();
        Ok(self
            .db
            .lock()
            .await
            .create_session(id, now, now + self.ttl)?)
    }

    async fn append(&self, id: &str, message: &Message) -> Result<(), SessionError> {
        let now = Utc::now();
        self.db
            .lock()
            .await
            .append_message(id, &to_row(message), now, now + self.ttl)?;
        Ok(())
    }

    async fn history(&self, id: &str) -> Result<Option<Vec<Message>>, SessionError> {
        let rows = self.db.lock().await.session_messages(id, Utc::now())?;
        match rows {
            Some(rows) => Ok(Some(
                rows.into_iter().map(from_row).collect::<Result<_, _>>()?,
            )),
            None => Ok(None),
        }
    }

    async fn clear(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.db.lock().await.delete_session(id, Utc::now())?)
    }

    async fn list_ids(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.db.lock().await.list_sessions(Utc::now())?)
    }
}
