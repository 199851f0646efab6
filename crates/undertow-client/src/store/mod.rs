//! Local persistence contract.
//!
//! The core consumes a narrow key/row surface and designs nothing about
//! the engine behind it. Two backends ship here:
//!
//! - [`MemoryStore`] — interior-mutability map store for tests and
//!   ephemeral sessions.
//! - [`SqliteStore`] — durable store for real clients.
//!
//! Writes are single-statement and crash-consistent: a write either fully
//! lands or is absent after a crash. The sync engine deliberately commits
//! entity-by-entity (no cross-entity transactions), so a failure partway
//! through a pass keeps everything already written.

pub mod backends;

use thiserror::Error;
use undertow_types::{Chat, ChatId, ChatMessage, Contact, MessageId};

use crate::outbox::{OutboxEntry, OutboxStatus};

pub use backends::{MemoryStore, SqliteStore};

/// Error from the persistence backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend-specific failure (I/O, corruption, constraint).
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Which sync cursor a read/write addresses.
///
/// Cursors are Unix-milli watermarks: the highest `updated_at` (or
/// `sent_at`) this client has fully reconciled for that entity class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CursorKey {
    Contacts,
    Chats,
    Messages(ChatId),
}

impl CursorKey {
    /// Stable storage key.
    pub fn as_key(&self) -> String {
        match self {
            CursorKey::Contacts => "contacts".to_string(),
            CursorKey::Chats => "chats".to_string(),
            CursorKey::Messages(chat_id) => format!("messages:{}", chat_id.to_hex()),
        }
    }
}

/// The narrow local-store surface the sync core needs.
///
/// All methods take `&self`; backends use interior mutability so a store
/// can be shared behind an `Arc` between the outbox and the sync engine.
pub trait Store: Send + Sync {
    // ── Synced entities ──────────────────────────────────────────────────

    fn upsert_contact(&self, contact: &Contact) -> Result<(), StoreError>;
    fn upsert_chat(&self, chat: &Chat) -> Result<(), StoreError>;
    fn upsert_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    fn contacts(&self) -> Result<Vec<Contact>, StoreError>;
    fn chats(&self) -> Result<Vec<Chat>, StoreError>;
    /// Messages for one chat, ordered by `sent_at`.
    fn messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>, StoreError>;

    // ── Outbox ───────────────────────────────────────────────────────────

    /// Insert or replace one outbox entry.
    fn outbox_put(&self, entry: &OutboxEntry) -> Result<(), StoreError>;
    fn outbox_get(&self, local_id: MessageId) -> Result<Option<OutboxEntry>, StoreError>;
    fn outbox_remove(&self, local_id: MessageId) -> Result<(), StoreError>;
    /// All entries across chats, in creation order.
    fn outbox_entries(&self) -> Result<Vec<OutboxEntry>, StoreError>;
    /// Entries for one chat with the given status, in creation order.
    fn outbox_by_status(
        &self,
        chat_id: ChatId,
        status: OutboxStatus,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    // ── Sync cursors ─────────────────────────────────────────────────────

    fn cursor(&self, key: CursorKey) -> Result<Option<u64>, StoreError>;
    fn set_cursor(&self, key: CursorKey, value: u64) -> Result<(), StoreError>;
}

// ============================================================================
// Tests
// ============================================================================
