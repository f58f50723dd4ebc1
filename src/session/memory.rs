use super::{Message, SessionBackend, SessionError};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

struct Entry {
    messages: Vec<Message>,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Process-local session map. Never fails. Without a TTL entries live
/// until removed; with one, every write pushes the entry's deadline out and
/// expired entries read as absent.
#[derive(Default)]
pub struct MemoryBackend {
    sessions: Mutex<HashMap<String, Entry>>,
    ttl: Option<TimeDelta>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::default(),
            ttl: Some(TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::days(36_500))),
        }
    }

    fn deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.ttl.map(|ttl| now + ttl)
    }

    fn with_map<R>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        // A poisoned lock still holds consistent data: every mutation is a
        // single map operation.
        let mut guard = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Live entry for `id`, dropping it first if it has expired.
    fn live<'a>(
        map: &'a mut HashMap<String, Entry>,
        id: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a mut Entry> {
        if map.get(id).is_some_and(|e| !e.is_live(now)) {
            map.remove(id);
        }
        map.get_mut(id)
    }

    /// Writes into `id`, refreshing its deadline. `f` sees whether the
    /// session was live before; returning `false` means nothing was written.
    /// Adding a new id sweeps out every expired entry so the map does not
    /// grow without bound.
    fn write(&self, id: &str, f: impl FnOnce(bool, &mut Vec<Message>) -> bool) -> bool {
        let now = Utc::now();
        let expires_at = self.deadline(now);
        self.with_map(|m| {
            if let Some(entry) = Self::live(m, id, now) {
                let written = f(true, &mut entry.messages);
                if written {
                    entry.expires_at = expires_at;
                }
                return written;
            }

            let mut messages = Vec::new();
            if !f(false, &mut messages) {
                return false;
            }
            m.retain(|_, e| e.is_live(now));
            m.insert(
                id.to_string(),
                Entry {
                    messages,
                    expires_at,
                },
            );
            true
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        let now = Utc::now();
        self.with_map(|m| Self::live(m, id, now).is_some())
    }

    /// Inserts an empty session unless a live one exists.
    pub fn insert_empty(&self, id: &str) -> bool {
        self.write(id, |existed, _| !existed)
    }

    /// Replaces whatever is stored under `id` with an empty session.
    pub fn reset(&self, id: &str) {
        self.write(id, |_, stored| {
            stored.clear();
            true
        });
    }

    /// Overwrites the messages of `id` with a copy read from elsewhere. A
    /// live entry keeps its deadline; reads do not extend a session.
    pub fn replace(&self, id: &str, messages: Vec<Message>) {
        let now = Utc::now();
        let fresh = self.with_map(|m| match Self::live(m, id, now) {
            Some(entry) => {
                entry.messages = messages;
                None
            }
            None => Some(messages),
        });
        if let Some(messages) = fresh {
            self.write(id, |_, stored| {
                *stored = messages;
                true
            });
        }
    }

    pub fn push(&self, id: &str, message: Message) {
        self.write(id, |_, stored| {
            stored.push(message);
            true
        });
    }

    pub fn get(&self, id: &str) -> Option<Vec<Message>> {
        let now = Utc::now();
        self.with_map(|m| Self::live(m, id, now).map(|e| e.messages.clone()))
    }

    pub fn remove(&self, id: &str) -> bool {
        let now = Utc::now();
        self.with_map(|m| m.remove(id).is_some_and(|e| e.is_live(now)))
    }

    pub fn ids(&self) -> Vec<String> {
        let now = Utc::now();
        self.with_map(|m| {
            m.retain(|_, e| e.is_live(now));
            m.keys().cloned().collect()
        })
    }

    pub fn len(&self) -> usize {
        self.with_map(|m| m.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.contains(id))
    }

    async fn create(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.insert_empty(id))
    }

    async fn append(&self, id: &str, message: &Message) -> Result<(), SessionError> {
        self.push(id, message.clone());
        Ok(())
    }

    async fn history(&self, id: &str) -> Result<Option<Vec<Message>>, SessionError> {
        Ok(self.get(id))
    }

    async fn clear(&self, id: &str) -> Result<bool, SessionError> {
        Ok(self.remove(id))
    }

    async fn list_ids(&self) -> Result<Vec<String>, SessionError> {
        Ok(self.ids())
    }
}
