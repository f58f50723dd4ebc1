use super::{Db, models::MessageRow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Result, params};
use tracing::debug;

/// Returns whether `id` has a live record, deleting it first when its TTL
/// has lapsed. Expiry is only ever enforced here, on access.
fn live_session(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<bool> {
    let expires_at: Option<DateTime<Utc>> = conn
        .query_row(
            "SELECT expires_at FROM sessions WHERE id = ?",
            params![id],
            |row| row.get(0),
        )
        .optional()?;

    match expires_at {
        Some(expires_at) if expires_at > now => Ok(true),
        Some(_) => {
            conn.execute("DELETE FROM sessions WHERE id = ?", params![id])?;
            debug!("Expired session removed: {id}");
            Ok(false)
        }
        None => Ok(false),
    }
}

impl Db {
    pub fn session_exists(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        live_session(&self.conn, id, now)
    }

    /// Creates an empty session. Returns `false` if a live one already exists.
    pub fn create_session(
        &mut self,
        id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let tx = self.conn.transaction()?;

        if live_session(&tx, id, now)? {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO sessions (id, created_at, expires_at) VALUES (?, ?, ?)",
            params![id, now, expires_at],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Appends a message, creating the session if needed, and pushes the
    /// session's expiry out to `expires_at`.
    pub fn append_message(
        &mut self,
        id: &str,
        message: &MessageRow,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;

        if live_session(&tx, id, now)? {
            tx.execute(
                "UPDATE sessions SET expires_at = ? WHERE id = ?",
                params![expires_at, id],
            )?;
        } else {
            tx.execute(
                "INSERT INTO sessions (id, created_at, expires_at) VALUES (?, ?, ?)",
                params![id, now, expires_at],
            )?;
        }

        tx.execute(
            "INSERT INTO messages (session_id, role, content, timestamp) VALUES (?, ?, ?, ?)",
            params![id, message.role, message.content, message.timestamp],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Messages of a live session in insertion order, `None` if absent or expired.
    pub fn session_messages(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Vec<MessageRow>>> {
        if !live_session(&self.conn, id, now)? {
            return Ok(None);
        }

        let mut stmt = self.conn.prepare(
            "SELECT role, content, timestamp FROM messages WHERE session_id = ? ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok(MessageRow {
                role: row.get(0)?,
                content: row.get(1)?,
                timestamp: row.get(2)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        Ok(Some(messages))
    }

    /// Deletes a live session and its messages.
    pub fn delete_session(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        if !live_session(&self.conn, id, now)? {
            return Ok(false);
        }

        let rows = self
            .conn
            .execute("DELETE FROM sessions WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }

    /// Ids of all sessions that have not expired yet.
    pub fn list_sessions(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT id, expires_at FROM sessions")?;
        let rows = stmt.query_map([], |row| {
            let id: String = row.get(0)?;
            let expires_at: DateTime<Utc> = row.get(1)?;
            Ok((id, expires_at))
        })?;

        let mut ids = Vec::new();
        for row in rows {
            let (id, expires_at) = row?;
            if expires_at > now {
                ids.push(id);
            }
        }

        Ok(ids)
    }
}
