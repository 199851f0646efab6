//! Chat, message, and contact metadata records.
//!
//! These are the entities the sync engine reconciles with the remote
//! authority. Each carries an `updated_at` watermark (Unix millis) that
//! doubles as the per-entity sync cursor: a pull with `since = cursor`
//! returns only rows the remote changed after the watermark.

use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, ContactId, MessageId, UserId};

/// One conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    /// Human-facing title (other participant's name, group name, ...).
    pub title: String,
    /// Remote modification watermark (Unix millis).
    pub updated_at: u64,
}

/// One chat message as known to the remote authority.
///
/// Locally-authored messages start life as outbox entries and become
/// `ChatMessage` rows once the authority acknowledges them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Client-generated identity — the same `local_id` the outbox sent,
    /// so a replayed send maps back onto the same row.
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender: UserId,
    pub content: String,
    /// Authority-assigned timestamp (Unix millis).
    pub sent_at: u64,
}

/// One address-book contact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub user_id: UserId,
    pub display_name: String,
    /// Remote modification watermark (Unix millis).
    pub updated_at: u64,
}

impl Chat {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: ChatId::new(),
            title: title.into(),
            updated_at: crate::now_millis(),
        }
    }
}

impl Contact {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            id: ContactId::new(),
            user_id,
            display_name: display_name.into(),
            updated_at: crate::now_millis(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
