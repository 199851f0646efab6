//! In-memory store backend.
//!
//! Map-backed, interior mutability via a mutex. Used by tests and by
//! ephemeral sessions that don't want durability. Also counts writes so
//! tests can assert that an idle sync pass touches nothing.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use undertow_types::{Chat, ChatId, ChatMessage, Contact, ContactId, MessageId};

use crate::outbox::{OutboxEntry, OutboxStatus};
use crate::store::{CursorKey, Store, StoreError};

#[derive(Default)]
struct Inner {
    contacts: HashMap<ContactId, Contact>,
    chats: HashMap<ChatId, Chat>,
    messages: HashMap<MessageId, ChatMessage>,
    /// Insertion order = creation order; upserts replace in place.
    outbox: IndexMap<MessageId, OutboxEntry>,
    cursors: HashMap<String, u64>,
    writes: u64,
}

/// Map-backed [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total mutating calls so far. Test observability only.
    pub fn write_count(&self) -> u64 {
        self.inner.lock().writes
    }
}

impl Store for MemoryStore {
    fn upsert_contact(&self, contact: &Contact) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.contacts.insert(contact.id, contact.clone());
        inner.writes += 1;
        Ok(())
    }

    fn upsert_chat(&self, chat: &Chat) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.chats.insert(chat.id, chat.clone());
        inner.writes += 1;
        Ok(())
    }

    fn upsert_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.messages.insert(message.id, message.clone());
        inner.writes += 1;
        Ok(())
    }

    fn contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let inner = self.inner.lock();
        let mut out: Vec<Contact> = inner.contacts.values().cloned().collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    fn chats(&self) -> Result<Vec<Chat>, StoreError> {
        let inner = self.inner.lock();
        let mut out: Vec<Chat> = inner.chats.values().cloned().collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    fn messages(&self, chat_id: ChatId) -> Result<Vec<ChatMessage>, StoreError> {
        let inner = self.inner.lock();
        let mut out: Vec<ChatMessage> = inner
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        out.sort_by_key(|m| (m.sent_at, m.id));
        Ok(out)
    }

    fn outbox_put(&self, entry: &OutboxEntry) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.outbox.insert(entry.local_id, entry.clone());
        inner.writes += 1;
        Ok(())
    }

    fn outbox_get(&self, local_id: MessageId) -> Result<Option<OutboxEntry>, StoreError> {
        Ok(self.inner.lock().outbox.get(&local_id).cloned())
    }

    fn outbox_remove(&self, local_id: MessageId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        // shift_remove keeps creation order for the rest of the queue.
        inner.outbox.shift_remove(&local_id);
        inner.writes += 1;
        Ok(())
    }

    fn outbox_entries(&self) -> Result<Vec<OutboxEntry>, StoreError> {
        Ok(self.inner.lock().outbox.values().cloned().collect())
    }

    fn outbox_by_status(
        &self,
        chat_id: ChatId,
        status: OutboxStatus,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        Ok(self
            .inner
            .lock()
            .outbox
            .values()
            .filter(|e| e.chat_id == chat_id && e.status == status)
            .cloned()
            .collect())
    }

    fn cursor(&self, key: CursorKey) -> Result<Option<u64>, StoreError> {
        Ok(self.inner.lock().cursors.get(&key.as_key()).copied())
    }

    fn set_cursor(&self, key: CursorKey, value: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.cursors.insert(key.as_key(), value);
        inner.writes += 1;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
