//! Remote authority contract.
//!
//! The sync engine and outbox talk to the server through this trait; the
//! real implementation (HTTP, RPC, whatever the deployment uses) lives
//! outside this crate. `since` parameters are Unix-milli watermarks — the
//! authority returns only entities changed strictly after the watermark.
//!
//! `send_message` carries the client-generated [`MessageId`] on every
//! attempt, including retries. The authority MUST deduplicate on it: a
//! retry after a partial success (send landed, ack lost) returns the
//! already-created message instead of creating a second one.

use async_trait::async_trait;
use thiserror::Error;
use undertow_types::{Chat, ChatId, ChatMessage, Contact, MessageId};

/// Errors from remote calls, split by recoverability.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transient transport-level failure — retry on the next cycle.
    #[error("network failure: {0}")]
    Network(String),

    /// The authority rejected the request. Terminal for that operation.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The response could not be understood. Terminal; likely a version
    /// mismatch between client and server.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ApiError {
    /// True if the next flush/sync cycle should retry the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}

/// REST-like per-entity surface of the remote authority.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Contacts changed after `since` (all of them when `None`).
    async fn list_contacts(&self, since: Option<u64>) -> Result<Vec<Contact>, ApiError>;

    /// Chats changed after `since`.
    async fn list_chats(&self, since: Option<u64>) -> Result<Vec<Chat>, ApiError>;

    /// Messages in one chat sent after `since`.
    async fn list_messages(
        &self,
        chat_id: ChatId,
        since: Option<u64>,
    ) -> Result<Vec<ChatMessage>, ApiError>;

    /// Create a message. Idempotent on `local_id` — a retried send must
    /// return the original message, never a duplicate.
    async fn send_message(
        &self,
        chat_id: ChatId,
        local_id: MessageId,
        content: &str,
    ) -> Result<ChatMessage, ApiError>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ApiError::Network("timeout".into()).is_transient());
        assert!(!ApiError::Rejected("too long".into()).is_transient());
        assert!(!ApiError::Protocol("bad json".into()).is_transient());
    }
}
