//! Per-session ordered message log with shared/in-process failover.
//!
//! [`SessionStore`] prefers a shared, TTL-capable [`SessionBackend`] (the
//! SQLite backend in production) and keeps an in-process [`MemoryBackend`]
//! mirror of everything it writes. The first failure of the shared backend
//! flips the store onto the mirror for the rest of the process lifetime;
//! there is no reconnection probing. Because the mirror saw every write,
//! sessions continue with their full history after the switch. The mirror
//! applies the shared backend's TTL, so sessions that expired there stay
//! gone after failover.
pub mod memory;
pub mod sqlite;

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex as TokioMutex;
use tracing::{info, warn};

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Errors raised by a session backend. The store never surfaces these; they
/// trigger failover.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid stored role: {0}")]
    InvalidRole(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(SessionError::InvalidRole(other.to_string())),
        }
    }
}

/// One chat message. Stored messages always carry a timestamp; callers may
/// leave it empty and let the store assign one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn resolved(mut self, now: DateTime<Utc>) -> Self {
        self.timestamp.get_or_insert(now);
        self
    }
}

/// Storage strategy behind [`SessionStore`].
///
/// `create` must be an atomic check-and-set and `append` must create the
/// session when it is missing. Messages handed to `append` already carry a
/// timestamp.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Idle lifetime of a session, `None` if sessions never expire.
    fn ttl(&self) -> Option<Duration> {
        None
    }

    async fn ping(&self) -> Result<(), SessionError>;

    async fn exists(&self, id: &str) -> Result<bool, SessionError>;

    async fn create(&self, id: &str) -> Result<bool, SessionError>;

    async fn append(&self, id: &str, message: &Message) -> Result<(), SessionError>;

    async fn history(&self, id: &str) -> Result<Option<Vec<Message>>, SessionError>;

    async fn clear(&self, id: &str) -> Result<bool, SessionError>;

    async fn list_ids(&self) -> Result<Vec<String>, SessionError>;
}

pub struct SessionStore {
    shared: Option<Arc<dyn SessionBackend>>,
    shared_available: AtomicBool,
    local: MemoryBackend,
    /// Serializes create/append/clear so the mirror sees writes in the same
    /// order as the shared backend.
    write_gate: TokioMutex<()>,
}

impl SessionStore {
    /// A store with no shared backend.
    pub fn in_memory() -> Self {
        Self {
            shared: None,
            shared_available: AtomicBool::new(false),
            local: MemoryBackend::new(),
            write_gate: TokioMutex::new(()),
        }
    }

    /// A store backed by `shared`, or by the in-process map if `shared`
    /// does not answer a ping.
    pub async fn with_shared(shared: Arc<dyn SessionBackend>) -> Self {
        let available = match shared.ping().await {
            Ok(()) => {
                info!("Session store using {} backend", shared.name());
                true
            }
            Err(e) => {
                warn!(
                    "Could not reach {} session backend: {e}. Using in-memory fallback.",
                    shared.name()
                );
                false
            }
        };

        let local = match shared.ttl() {
            Some(ttl) => MemoryBackend::with_ttl(ttl),
            None => MemoryBackend::new(),
        };

        Self {
            shared: Some(shared),
            shared_available: AtomicBool::new(available),
            local,
            write_gate: TokioMutex::new(()),
        }
    }

    /// Name of the backend currently serving requests.
    #[must_use]
    pub fn active_backend(&self) -> &'static str {
        match self.active_shared() {
            Some(shared) => shared.name(),
            None => self.local.name(),
        }
    }

    fn active_shared(&self) -> Option<&Arc<dyn SessionBackend>> {
        if self.shared_available.load(Ordering::Acquire) {
            self.shared.as_ref()
        } else {
            None
        }
    }

    fn mark_unavailable(&self, op: &str, err: &SessionError) {
        if self.shared_available.swap(false, Ordering::AcqRel) {
            warn!("Session backend failed during {op}: {err}. Switching to in-memory fallback.");
        }
    }

    pub async fn exists(&self, id: &str) -> bool {
        if let Some(shared) = self.active_shared() {
            match shared.exists(id).await {
                Ok(true) => return true,
                Ok(false) => return self.drop_stale(shared, id).await,
                Err(e) => self.mark_unavailable("exists", &e),
            }
        }
        self.local.contains(id)
    }

    /// Drops the mirror copy of a session the shared backend no longer
    /// holds. Re-checks under the write gate so a concurrent write that
    /// landed after the first read keeps its mirror entry.
    async fn drop_stale(&self, shared: &Arc<dyn SessionBackend>, id: &str) -> bool {
        let _gate = self.write_gate.lock().await;
        match shared.exists(id).await {
            Ok(true) => true,
            Ok(false) => {
                self.local.remove(id);
                false
            }
            Err(e) => {
                self.mark_unavailable("exists", &e);
                self.local.contains(id)
            }
        }
    }

    /// Creates an empty session. `false` if it already exists.
    pub async fn create(&self, id: &str) -> bool {
        let _gate = self.write_gate.lock().await;

        if let Some(shared) = self.active_shared() {
            match shared.create(id).await {
                Ok(created) => {
                    if created {
                        self.local.reset(id);
                        info!("Created new session in {}: {id}", shared.name());
                    }
                    return created;
                }
                Err(e) => self.mark_unavailable("create", &e),
            }
        }

        let created = self.local.insert_empty(id);
        if created {
            info!("Created new session in memory: {id}");
        }
        created
    }

    /// Appends `message`, creating the session if needed, and returns the
    /// stored copy with its timestamp resolved.
    pub async fn append(&self, id: &str, message: Message) -> Message {
        let message = message.resolved(Utc::now());
        let _gate = self.write_gate.lock().await;

        if let Some(shared) = self.active_shared() {
            match shared.append(id, &message).await {
                Ok(()) => {
                    self.local.push(id, message.clone());
                    return message;
                }
                Err(e) => self.mark_unavailable("append", &e),
            }
        }

        self.local.push(id, message.clone());
        message
    }

    /// Ordered message log, `None` if no backend holds `id`.
    pub async fn history(&self, id: &str) -> Option<Vec<Message>> {
        if let Some(shared) = self.active_shared() {
            match shared.history(id).await {
                Ok(Some(messages)) => {
                    // Keep the mirror in step with writes made by other processes
                    self.local.replace(id, messages.clone());
                    return Some(messages);
                }
                Ok(None) => {
                    if !self.drop_stale(shared, id).await {
                        return None;
                    }
                    // Written concurrently after the first read
                    match shared.history(id).await {
                        Ok(messages) => return messages,
                        Err(e) => self.mark_unavailable("history", &e),
                    }
                }
                Err(e) => self.mark_unavailable("history", &e),
            }
        }
        self.local.get(id)
    }

    /// Deletes the session. `false` if it did not exist.
    pub async fn clear(&self, id: &str) -> bool {
        let _gate = self.write_gate.lock().await;

        if let Some(shared) = self.active_shared() {
            match shared.clear(id).await {
                Ok(removed) => {
                    self.local.remove(id);
                    return removed;
                }
                Err(e) => self.mark_unavailable("clear", &e),
            }
        }
        self.local.remove(id)
    }

    /// Best-effort listing of live session ids.
    pub async fn list_ids(&self) -> BTreeSet<String> {
        if let Some(shared) = self.active_shared() {
            match shared.list_ids().await {
                Ok(ids) => return ids.into_iter().collect(),
                Err(e) => self.mark_unavailable("list_ids", &e),
            }
        }
        self.local.ids().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// Wraps a backend and starts failing every call once `fail` is set.
    /// While `stale_exists` is positive, `exists` answers `false` as if the
    /// read raced a concurrent write.
    struct FlakyBackend {
        inner: Box<dyn SessionBackend>,
        fail: AtomicBool,
        stale_exists: AtomicUsize,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self::over(Box::new(MemoryBackend::new()))
        }

        fn over(inner: Box<dyn SessionBackend>) -> Self {
            Self {
                inner,
                fail: AtomicBool::new(false),
                stale_exists: AtomicUsize::new(0),
            }
        }

        fn check(&self) -> Result<(), SessionError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(SessionError::Unavailable("connection refused".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl SessionBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }
        fn ttl(&self) -> Option<Duration> {
            self.inner.ttl()
        }
        async fn ping(&self) -> Result<(), SessionError> {
            self.check()
        }
        async fn exists(&self, id: &str) -> Result<bool, SessionError> {
            self.check()?;
            let stale = self
                .stale_exists
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if stale {
                return Ok(false);
            }
            self.inner.exists(id).await
        }
        async fn create(&self, id: &str) -> Result<bool, SessionError> {
            self.check()?;
            self.inner.create(id).await
        }
        async fn append(&self, id: &str, message: &Message) -> Result<(), SessionError> {
            self.check()?;
            self.inner.append(id, message).await
        }
        async fn history(&self, id: &str) -> Result<Option<Vec<Message>>, SessionError> {
            self.check()?;
            self.inner.history(id).await
        }
        async fn clear(&self, id: &str) -> Result<bool, SessionError> {
            self.check()?;
            self.inner.clear(id).await
        }
        async fn list_ids(&self) -> Result<Vec<String>, SessionError> {
            self.check()?;
            self.inner.list_ids().await
        }
    }

    #[tokio::test]
    async fn test_create_then_append_hello() {
        let store = SessionStore::in_memory();
        assert!(store.create("abc").await);
        store.append("abc", Message::user("hello")).await;

        let history = store.history("abc").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "hello");
    }

    #[tokio::test]
    async fn test_create_existing_is_rejected_and_keeps_history() {
        let store = SessionStore::in_memory();
        assert!(store.create("s").await);
        store.append("s", Message::user("one")).await;

        assert!(!store.create("s").await);
        assert_eq!(store.history("s").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_keeps_order_and_resolves_timestamps() {
        let store = SessionStore::in_memory();
        for i in 0..10 {
            store.append("s", Message::user(format!("m{i}"))).await;
        }

        let history = store.history("s").await.unwrap();
        assert_eq!(history.len(), 10);
        for (i, m) in history.iter().enumerate() {
            assert_eq!(m.content, format!("m{i}"));
            assert!(m.timestamp.is_some());
        }
    }

    #[tokio::test]
    async fn test_append_keeps_caller_timestamp() {
        let store = SessionStore::in_memory();
        let ts = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let stored = store
            .append("s", Message::user("x").with_timestamp(Some(ts)))
            .await;
        assert_eq!(stored.timestamp, Some(ts));
    }

    #[tokio::test]
    async fn test_history_and_clear_on_absent_session() {
        let store = SessionStore::in_memory();
        assert!(store.history("missing").await.is_none());
        assert!(!store.clear("missing").await);
        assert!(!store.exists("missing").await);
    }

    #[tokio::test]
    async fn test_clear_and_list() {
        let store = SessionStore::in_memory();
        store.create("a").await;
        store.create("b").await;
        assert_eq!(store.list_ids().await.len(), 2);

        assert!(store.clear("a").await);
        assert!(!store.exists("a").await);
        let ids = store.list_ids().await;
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_backend_at_startup() {
        let backend = Arc::new(FlakyBackend::new());
        backend.fail.store(true, Ordering::SeqCst);

        let store = SessionStore::with_shared(backend).await;
        assert_eq!(store.active_backend(), "memory");
        assert!(store.create("s").await);
        store.append("s", Message::user("hi")).await;
        assert_eq!(store.history("s").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failover_mid_session_keeps_full_history() {
        let backend = Arc::new(FlakyBackend::new());
        let store = SessionStore::with_shared(backend.clone()).await;
        assert_eq!(store.active_backend(), "flaky");

        store.append("s", Message::user("before-1")).await;
        store.append("s", Message::assistant("before-2")).await;

        backend.fail.store(true, Ordering::SeqCst);

        store.append("s", Message::user("after-1")).await;
        store.append("s", Message::assistant("after-2")).await;
        assert_eq!(store.active_backend(), "memory");

        let contents: Vec<String> = store
            .history("s")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["before-1", "before-2", "after-1", "after-2"]);
    }

    #[tokio::test]
    async fn test_failover_is_one_way() {
        let backend = Arc::new(FlakyBackend::new());
        let store = SessionStore::with_shared(backend.clone()).await;

        backend.fail.store(true, Ordering::SeqCst);
        store.append("s", Message::user("during outage")).await;

        // Backend recovers but the store stays on the fallback
        backend.fail.store(false, Ordering::SeqCst);
        store.append("s", Message::user("after recovery")).await;

        assert_eq!(store.active_backend(), "memory");
        assert!(backend.inner.history("s").await.unwrap().is_none());
        assert_eq!(store.history("s").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_history_hydrates_from_shared() {
        let backend = Arc::new(FlakyBackend::new());
        let store = SessionStore::with_shared(backend.clone()).await;

        // Written by "another process" straight into the shared backend
        backend
            .inner
            .append("s", &Message::user("remote").resolved(Utc::now()))
            .await
            .unwrap();

        assert_eq!(store.history("s").await.unwrap().len(), 1);

        backend.fail.store(true, Ordering::SeqCst);
        let history = store.history("s").await.unwrap();
        assert_eq!(history[0].content, "remote");
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_land() {
        let store = Arc::new(SessionStore::in_memory());
        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.append("shared", Message::user(format!("{i}"))).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.history("shared").await.unwrap().len(), 20);
    }

    fn sqlite(ttl: Duration) -> Box<dyn SessionBackend> {
        let db = Db::open_in_memory().unwrap();
        Box::new(SqliteBackend::new(Arc::new(TokioMutex::new(db)), ttl))
    }

    #[tokio::test]
    async fn test_expired_sessions_stay_gone_after_failover() {
        let backend = Arc::new(FlakyBackend::over(sqlite(Duration::ZERO)));
        let store = SessionStore::with_shared(backend.clone()).await;

        for i in 0..50 {
            store.append(&format!("s{i}"), Message::user("hi")).await;
        }
        assert!(store.history("s0").await.is_none());
        assert!(store.list_ids().await.is_empty());

        backend.fail.store(true, Ordering::SeqCst);
        assert!(store.history("s0").await.is_none());
        assert!(store.history("s49").await.is_none());
        assert!(!store.exists("s1").await);
        assert!(store.list_ids().await.is_empty());
        assert_eq!(store.active_backend(), "memory");
    }

    #[tokio::test]
    async fn test_live_sessions_survive_failover_with_ttl() {
        let backend = Arc::new(FlakyBackend::over(sqlite(Duration::from_secs(3_600))));
        let store = SessionStore::with_shared(backend.clone()).await;

        store.append("s", Message::user("q")).await;
        store.append("s", Message::assistant("a")).await;

        backend.fail.store(true, Ordering::SeqCst);
        assert_eq!(store.history("s").await.unwrap().len(), 2);
        assert!(store.list_ids().await.contains("s"));
    }

    #[tokio::test]
    async fn test_exists_rechecks_before_dropping_mirror() {
        let backend = Arc::new(FlakyBackend::new());
        let store = SessionStore::with_shared(backend.clone()).await;
        store.append("s", Message::user("hi")).await;

        // First read misses the session, the re-check under the gate sees it
        backend.stale_exists.store(1, Ordering::SeqCst);
        assert!(store.exists("s").await);

        backend.fail.store(true, Ordering::SeqCst);
        assert_eq!(store.history("s").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_of_removed_session_clears_mirror() {
        let backend = Arc::new(FlakyBackend::new());
        let store = SessionStore::with_shared(backend.clone()).await;
        store.append("s", Message::user("hi")).await;

        // Removed by another process
        backend.inner.clear("s").await.unwrap();
        assert!(store.history("s").await.is_none());

        backend.fail.store(true, Ordering::SeqCst);
        assert!(store.history("s").await.is_none());
    }
}
