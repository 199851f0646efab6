//! SQLite store backend.
//!
//! Relational tables instead of JSON blobs for schema evolution
//! resilience. Every write is a single statement — crash consistency
//! comes from SQLite's journal, not from cross-entity transactions.

use parking_lot::Mutex;
use rusqlite::{Connection, params};
use std::path::Path;
use std::str::FromStr;
use undertow_types::{
    Chat, ChatId, ChatMessage, Contact, ContactId, MessageId, UserId,
};

use crate::outbox::{OutboxEntry, OutboxStatus};
use crate::store::{CursorKey, Store, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS contacts (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS chats (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL,
    sender TEXT NOT NULL,
    content TEXT NOT NULL,
    sent_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, sent_at);

CREATE TABLE IF NOT EXISTS outbox (
    local_id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_outbox_chat ON outbox(chat_id, created_at);

CREATE TABLE IF NOT EXISTS sync_cursors (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#;

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Durable [`Store`] over one SQLite database.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Fully in-memory database — durable semantics, no file.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

// ── Row parsing helpers ─────────────────────────────────────────────────────

fn parse_id<T>(raw: &str, what: &str) -> Result<T, StoreError>
where
    T: TryFromHex,
{
    T::from_hex(raw).ok_or_else(|| StoreError::Backend(format!("corrupt {what} id: {raw}")))
}

/// Minimal parse hook so `parse_id` works for every typed ID.
trait TryFromHex: Sized {
    fn from_hex(raw: &str) -> Option<Self>;
}

macro_rules! impl_try_from_hex {
    ($($T:ty),+) => {$(
        impl TryFromHex for $T {
            fn from_hex(raw: &str) -> Option<Self> {
                <$T>::parse(raw).ok()
            }
        }
    )+};
}

impl_try_from_hex!(ContactId, ChatId, MessageId, UserId);

impl Store for SqliteStore {
    fn upsert_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO contacts (id, user_id, display_name, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                display_name = excluded.display_name,
                updated_at = excluded.updated_at",
            params![
                contact.id.to_hex(),
                contact.user_id.to_hex(),
                contact.display_name,
                contact.updated_at
            ],
        )?;
        Ok(())
    }

    fn upsert_chat(&self, chat: &Chat) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO chats (id, title, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                updated_at = excluded.updated_at",
            params![chat.id.to_hex(), chat.title, chat.updated_at],
        )?;
        Ok(())
    }

    fn upsert_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO messages (id, chat_id, sender, content, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                chat_id = excluded.chat_id,
                sender = excluded.sender,
                content = excluded.content,
                sent_at = excluded.sent_at",
            params![
                message.id.to_hex(),
                message.chat_id.to_hex(),
                message.sender.to_hex(),
                message.content,
                message.sent_at
            ],
        )?;
        Ok(())
    }

    fn contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, user_id, display_name, updated_at FROM contacts ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u64>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, user_id, display_name, updated_at) = row?;
            out.push(Contact {
                id: parse_id(&id, "contact")?,
                user_id: parse_id(&user_id, "user")?,
                display_name,
                updated_at,
            });
        }
        Ok(out)
    }

    fn chats(&self) -> Result<Vec<Chat>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, title, updated_at FROM chats ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u64>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, title, updated_at) = row?;
            out.push(Chat { id: parse_id(&id, "chat")?, title, updated_at });
        }
        Ok(out)
    }

    fn messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, sender, content, sent_at FROM messages
             WHERE chat_id = ?1 ORDER BY sent_at, id",
        )?;
        let rows = stmt.query_map(params![chat_id.to_hex()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u64>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, chat, sender, content, sent_at) = row?;
            out.push(ChatMessage {
                id: parse_id(&id, "message")?,
                chat_id: parse_id(&chat, "chat")?,
                sender: parse_id(&sender, "user")?,
                content,
                sent_at,
            });
        }
        Ok(out)
    }

    fn outbox_put(&self, entry: &OutboxEntry) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO outbox (local_id, chat_id, content, created_at, attempts, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(local_id) DO UPDATE SET
                attempts = excluded.attempts,
                status = excluded.status",
            params![
                entry.local_id.to_hex(),
                entry.chat_id.to_hex(),
                entry.content,
                entry.created_at,
                entry.attempts,
                entry.status.as_str()
            ],
        )?;
        Ok(())
    }

    fn outbox_get(&self, local_id: MessageId) -> Result<Option<OutboxEntry>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT local_id, chat_id, content, created_at, attempts, status
             FROM outbox WHERE local_id = ?1",
        )?;
        let mut rows = stmt.query(params![local_id.to_hex()])?;
        match rows.next()? {
            Some(row) => Ok(Some(outbox_row(
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            )?)),
            None => Ok(None),
        }
    }

    fn outbox_remove(&self, local_id: MessageId) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM outbox WHERE local_id = ?1", params![local_id.to_hex()])?;
        Ok(())
    }

    fn outbox_entries(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT local_id, chat_id, content, created_at, attempts, status
             FROM outbox ORDER BY created_at, local_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u64>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (local_id, chat_id, content, created_at, attempts, status) = row?;
            out.push(outbox_row(local_id, chat_id, content, created_at, attempts, status)?);
        }
        Ok(out)
    }

    fn outbox_by_status(
        &self,
        chat_id: ChatId,
        status: OutboxStatus,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT local_id, chat_id, content, created_at, attempts, status
             FROM outbox WHERE chat_id = ?1 AND status = ?2
             ORDER BY created_at, local_id",
        )?;
        let rows = stmt.query_map(params![chat_id.to_hex(), status.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, u64>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (local_id, chat, content, created_at, attempts, status) = row?;
            out.push(outbox_row(local_id, chat, content, created_at, attempts, status)?);
        }
        Ok(out)
    }

    fn cursor(&self, key: CursorKey) -> Result<Option<u64>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT value FROM sync_cursors WHERE key = ?1")?;
        let mut rows = stmt.query(params![key.as_key()])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    fn set_cursor(&self, key: CursorKey, value: u64) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO sync_cursors (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key.as_key(), value],
        )?;
        Ok(())
    }
}

fn outbox_row(
    local_id: String,
    chat_id: String,
    content: String,
    created_at: u64,
    attempts: u32,
    status: String,
) -> Result<OutboxEntry, StoreError> {
    Ok(OutboxEntry {
        local_id: parse_id(&local_id, "message")?,
        chat_id: parse_id(&chat_id, "chat")?,
        content,
        created_at,
        attempts,
        status: OutboxStatus::from_str(&status)
            .map_err(|_| StoreError::Backend(format!("corrupt outbox status: {status}")))?,
    })
}

// ============================================================================
// Tests
// ============================================================================
