//! Durable outbox for unsent chat messages.
//!
//! A message is persisted as a Pending entry — and its `local_id` handed
//! back — before any network attempt, so the author can treat it as sent
//! while the device is offline. [`Outbox::flush_pending`] drains queues
//! when connectivity returns.
//!
//! # Ordering
//!
//! Within one chat, sends happen strictly in creation order, and a
//! transient failure stops that chat's drain until the next flush — the
//! recipient must never observe messages out of order. Different chats'
//! queues are independent; one unreachable chat doesn't dam the rest.
//!
//! # Failure policy
//!
//! - Transient (network): entry returns to Pending, retried next flush.
//! - Permanent (server rejection): entry becomes Failed, leaves the retry
//!   path, and stays in the store for inspection; [`Outbox::retry`]
//!   re-arms it on explicit user request.
//! - Success: the authority now owns the message's durability; the entry
//!   is removed and the acked message lands in local history.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::EnumString;
use thiserror::Error;
use tracing::{debug, info, warn};
use undertow_types::{ChatId, MessageId, now_millis};

use crate::api::RemoteApi;
use crate::store::{Store, StoreError};

/// Lifecycle of one outbox entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum OutboxStatus {
    /// Waiting for the next flush.
    #[default]
    Pending,
    /// A send is in flight right now. Skipped by concurrent flushes.
    Sending,
    /// Permanently rejected. Out of the retry path, kept for inspection.
    Failed,
}

impl OutboxStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sending => "sending",
            OutboxStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One buffered outgoing message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Client-generated, stable across retries — the remote deduplicates
    /// on it.
    pub local_id: MessageId,
    pub chat_id: ChatId,
    pub content: String,
    pub created_at: u64,
    /// Send attempts so far (successful or not).
    pub attempts: u32,
    pub status: OutboxStatus,
}

impl OutboxEntry {
    /// Fresh pending entry, stamped now.
    pub fn new(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self {
            local_id: MessageId::new(),
            chat_id,
            content: content.into(),
            created_at: now_millis(),
            attempts: 0,
            status: OutboxStatus::Pending,
        }
    }
}

/// Error from outbox operations.
///
/// Note what is *not* here: a failed send. Send failures are outcomes
/// recorded on entries, not errors thrown at the caller.
#[derive(Error, Debug)]
pub enum OutboxError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// `retry` was asked about an entry that doesn't exist.
    #[error("unknown outbox entry: {0:?}")]
    UnknownEntry(MessageId),
}

/// Tuning knobs for the outbox.
#[derive(Clone, Copy, Debug)]
pub struct OutboxConfig {
    /// Give up (mark Failed) after this many transient failures.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self { max_attempts: None }
    }
}

/// What one flush pass accomplished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries acknowledged and removed.
    pub sent: usize,
    /// Entries newly marked Failed.
    pub failed: usize,
    /// Entries left Pending because their chat's drain stopped early.
    pub deferred: usize,
}

/// Durable per-chat FIFO of unsent messages.
pub struct Outbox {
    store: Arc<dyn Store>,
    api: Arc<dyn RemoteApi>,
    config: OutboxConfig,
    /// Serializes whole flush passes. Entry-level Sending markers guard
    /// the store besides; the mutex keeps passes from interleaving chats.
    flush_lock: tokio::sync::Mutex<()>,
}

impl Outbox {
    pub fn new(store: Arc<dyn Store>, api: Arc<dyn RemoteApi>) -> Self {
        Self::with_config(store, api, OutboxConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn Store>,
        api: Arc<dyn RemoteApi>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            api,
            config,
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Buffer a message for sending. Returns its stable local id
    /// synchronously — the entry is persisted before this returns, so the
    /// message survives a crash or an offline stretch from this moment on.
    pub fn enqueue(
        &self,
        chat_id: ChatId,
        content: impl Into<String>,
    ) -> Result<MessageId, OutboxError> {
        let entry = OutboxEntry::new(chat_id, content);
        self.store.outbox_put(&entry)?;
        debug!(chat = %chat_id.short(), local_id = %entry.local_id.short(), "message enqueued");
        Ok(entry.local_id)
    }

    /// Number of entries still waiting to be sent for one chat.
    pub fn pending_count(&self, chat_id: ChatId) -> Result<usize, OutboxError> {
        Ok(self.store.outbox_by_status(chat_id, OutboxStatus::Pending)?.len())
    }

    /// Permanently failed entries for one chat, oldest first.
    pub fn failed(&self, chat_id: ChatId) -> Result<Vec<OutboxEntry>, OutboxError> {
        Ok(self.store.outbox_by_status(chat_id, OutboxStatus::Failed)?)
    }

    /// Re-arm a Failed entry as Pending (user-requested resend).
    pub fn retry(&self, local_id: MessageId) -> Result<(), OutboxError> {
        let mut entry = self
            .store
            .outbox_get(local_id)?
            .ok_or(OutboxError::UnknownEntry(local_id))?;
        entry.status = OutboxStatus::Pending;
        self.store.outbox_put(&entry)?;
        Ok(())
    }

    /// Drain every chat's pending queue, in creation order per chat.
    ///
    /// Idempotent and safe to call concurrently with itself: passes are
    /// serialized, and entries already in `Sending` state are never
    /// re-sent. Store errors abort the pass; send failures never do.
    pub async fn flush_pending(&self) -> Result<FlushReport, OutboxError> {
        let _guard = self.flush_lock.lock().await;

        // Group by chat, creation order preserved within each.
        let mut queues: IndexMap<ChatId, Vec<OutboxEntry>> = IndexMap::new();
        for entry in self.store.outbox_entries()? {
            queues.entry(entry.chat_id).or_default().push(entry);
        }

        let mut report = FlushReport::default();
        for (chat_id, entries) in queues {
            self.drain_chat(chat_id, entries, &mut report).await?;
        }

        if report != FlushReport::default() {
            info!(
                sent = report.sent,
                failed = report.failed,
                deferred = report.deferred,
                "outbox flush finished"
            );
        }
        Ok(report)
    }

    /// Send one chat's queue until it empties or a transient failure
    /// stops it.
    async fn drain_chat(
        &self,
        chat_id: ChatId,
        entries: Vec<OutboxEntry>,
        report: &mut FlushReport,
    ) -> Result<(), OutboxError> {
        let total = entries.len();
        for (index, mut entry) in entries.into_iter().enumerate() {
            match entry.status {
                // Out of the retry path.
                OutboxStatus::Failed => continue,
                // Another flush owns this one; later entries must wait for
                // its outcome to keep the chat ordered.
                OutboxStatus::Sending => {
                    report.deferred += total - index;
                    return Ok(());
                }
                OutboxStatus::Pending => {}
            }

            entry.status = OutboxStatus::Sending;
            entry.attempts += 1;
            self.store.outbox_put(&entry)?;

            match self
                .api
                .send_message(entry.chat_id, entry.local_id, &entry.content)
                .await
            {
                Ok(message) => {
                    // Durability ownership passes to the authority; the
                    // acked message becomes local history.
                    self.store.upsert_message(&message)?;
                    self.store.outbox_remove(entry.local_id)?;
                    report.sent += 1;
                }
                Err(e) if e.is_transient() => {
                    let exhausted = self
                        .config
                        .max_attempts
                        .is_some_and(|cap| entry.attempts >= cap);
                    if exhausted {
                        warn!(chat = %chat_id.short(), local_id = %entry.local_id.short(),
                              attempts = entry.attempts, "retry budget exhausted, marking failed");
                        entry.status = OutboxStatus::Failed;
                        self.store.outbox_put(&entry)?;
                        report.failed += 1;
                        continue;
                    }
                    debug!(chat = %chat_id.short(), local_id = %entry.local_id.short(),
                           error = %e, "transient send failure, chat drain stops");
                    entry.status = OutboxStatus::Pending;
                    self.store.outbox_put(&entry)?;
                    report.deferred += total - index;
                    return Ok(());
                }
                Err(e) => {
                    // Terminal rejection: this entry will never send, so
                    // later entries aren't out of order without it.
                    warn!(chat = %chat_id.short(), local_id = %entry.local_id.short(),
                          error = %e, "message permanently rejected");
                    entry.status = OutboxStatus::Failed;
                    self.store.outbox_put(&entry)?;
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use undertow_types::{Chat, ChatMessage, Contact, UserId};

    /// Scripted remote: per-call outcomes keyed by message content.
    #[derive(Default)]
    struct ScriptedApi {
        /// Contents that fail transiently once, then succeed.
        flaky_once: Mutex<HashSet<String>>,
        /// Contents that are always rejected.
        rejected: Mutex<HashSet<String>>,
        /// Contents that always fail transiently.
        dead_network: Mutex<HashSet<String>>,
        sent: Mutex<Vec<(ChatId, MessageId, String)>>,
    }

    impl ScriptedApi {
        fn flaky_once(self, content: &str) -> Self {
            self.flaky_once.lock().insert(content.to_string());
            self
        }

        fn rejecting(self, content: &str) -> Self {
            self.rejected.lock().insert(content.to_string());
            self
        }

        fn dead_network(self, content: &str) -> Self {
            self.dead_network.lock().insert(content.to_string());
            self
        }

        fn sent_contents(&self, chat: ChatId) -> Vec<String> {
            self.sent
                .lock()
                .iter()
                .filter(|(c, _, _)| *c == chat)
                .map(|(_, _, content)| content.clone())
                .collect()
        }
    }

    #[async_trait]
    impl RemoteApi for ScriptedApi {
        async fn list_contacts(&self, _since: Option<u64>) -> Result<Vec<Contact>, ApiError> {
            Ok(Vec::new())
        }

        async fn list_chats(&self, _since: Option<u64>) -> Result<Vec<Chat>, ApiError> {
            Ok(Vec::new())
        }

        async fn list_messages(
            &self,
            _chat_id: ChatId,
            _since: Option<u64>,
        ) -> Result<Vec<ChatMessage>, ApiError> {
            Ok(Vec::new())
        }

        async fn send_message(
            &self,
            chat_id: ChatId,
            local_id: MessageId,
            content: &str,
        ) -> Result<ChatMessage, ApiError> {
            if self.dead_network.lock().contains(content) {
                return Err(ApiError::Network("unreachable".into()));
            }
            if self.flaky_once.lock().remove(content) {
                return Err(ApiError::Network("connection reset".into()));
            }
            if self.rejected.lock().contains(content) {
                return Err(ApiError::Rejected("validation failed".into()));
            }
            // Dedup on local_id like a well-behaved authority.
            let mut sent = self.sent.lock();
            if !sent.iter().any(|(_, id, _)| *id == local_id) {
                sent.push((chat_id, local_id, content.to_string()));
            }
            Ok(ChatMessage {
                id: local_id,
                chat_id,
                sender: UserId::new(),
                content: content.to_string(),
                sent_at: now_millis(),
            })
        }
    }

    fn outbox_with(api: ScriptedApi) -> (Arc<MemoryStore>, Arc<ScriptedApi>, Outbox) {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(api);
        let outbox = Outbox::new(store.clone(), api.clone());
        (store, api, outbox)
    }

    #[test]
    fn test_enqueue_is_synchronous_and_durable() {
        let (store, _api, outbox) = outbox_with(ScriptedApi::default());
        let chat = ChatId::new();

        let id = outbox.enqueue(chat, "hello").unwrap();

        let entry = store.outbox_get(id).unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.content, "hello");
        assert_eq!(entry.attempts, 0);
        assert_eq!(outbox.pending_count(chat).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_flush_sends_in_creation_order() {
        let (store, api, outbox) = outbox_with(ScriptedApi::default());
        let chat = ChatId::new();
        for text in ["one", "two", "three"] {
            outbox.enqueue(chat, text).unwrap();
        }

        let report = outbox.flush_pending().await.unwrap();

        assert_eq!(report, FlushReport { sent: 3, failed: 0, deferred: 0 });
        assert_eq!(api.sent_contents(chat), vec!["one", "two", "three"]);
        assert!(store.outbox_entries().unwrap().is_empty());
        // Acked messages became local history.
        assert_eq!(store.messages(chat).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_preserves_fifo_across_flushes() {
        // Three messages, the second fails transiently on the first flush.
        // After two flushes all three must be delivered, in order, exactly
        // once.
        let (store, api, outbox) = outbox_with(ScriptedApi::default().flaky_once("two"));
        let chat = ChatId::new();
        for text in ["one", "two", "three"] {
            outbox.enqueue(chat, text).unwrap();
        }

        let first = outbox.flush_pending().await.unwrap();
        assert_eq!(first, FlushReport { sent: 1, failed: 0, deferred: 2 });
        assert_eq!(api.sent_contents(chat), vec!["one"]);
        assert_eq!(outbox.pending_count(chat).unwrap(), 2);

        let second = outbox.flush_pending().await.unwrap();
        assert_eq!(second, FlushReport { sent: 2, failed: 0, deferred: 0 });
        assert_eq!(api.sent_contents(chat), vec!["one", "two", "three"]);
        assert!(store.outbox_entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_rejection_marks_failed_and_continues() {
        let (store, api, outbox) = outbox_with(ScriptedApi::default().rejecting("bad"));
        let chat = ChatId::new();
        outbox.enqueue(chat, "bad").unwrap();
        outbox.enqueue(chat, "good").unwrap();

        let report = outbox.flush_pending().await.unwrap();

        assert_eq!(report, FlushReport { sent: 1, failed: 1, deferred: 0 });
        assert_eq!(api.sent_contents(chat), vec!["good"]);

        let failed = outbox.failed(chat).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].content, "bad");

        // Failed entries stay out of subsequent flushes.
        let again = outbox.flush_pending().await.unwrap();
        assert_eq!(again, FlushReport::default());
        assert_eq!(store.outbox_by_status(chat, OutboxStatus::Failed).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_chat_does_not_block_others() {
        let (_store, api, outbox) = outbox_with(ScriptedApi::default().dead_network("stuck"));
        let chat_a = ChatId::new();
        let chat_b = ChatId::new();
        outbox.enqueue(chat_a, "stuck").unwrap();
        outbox.enqueue(chat_a, "behind").unwrap();
        outbox.enqueue(chat_b, "free").unwrap();

        let report = outbox.flush_pending().await.unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.deferred, 2);
        assert!(api.sent_contents(chat_a).is_empty());
        assert_eq!(api.sent_contents(chat_b), vec!["free"]);
    }

    #[tokio::test]
    async fn test_sending_entry_stops_chat_without_resend() {
        let (store, api, outbox) = outbox_with(ScriptedApi::default());
        let chat = ChatId::new();
        let first = outbox.enqueue(chat, "in flight").unwrap();
        outbox.enqueue(chat, "queued").unwrap();

        // Simulate another flush mid-send.
        let mut entry = store.outbox_get(first).unwrap().unwrap();
        entry.status = OutboxStatus::Sending;
        store.outbox_put(&entry).unwrap();

        let report = outbox.flush_pending().await.unwrap();

        assert_eq!(report, FlushReport { sent: 0, failed: 0, deferred: 2 });
        assert!(api.sent_contents(chat).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_flushes_do_not_duplicate() {
        let (store, api, outbox) = outbox_with(ScriptedApi::default());
        let outbox = Arc::new(outbox);
        let chat = ChatId::new();
        for i in 0..5 {
            outbox.enqueue(chat, format!("msg {i}")).unwrap();
        }

        let a = tokio::spawn({
            let outbox = outbox.clone();
            async move { outbox.flush_pending().await.unwrap() }
        });
        let b = tokio::spawn({
            let outbox = outbox.clone();
            async move { outbox.flush_pending().await.unwrap() }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a.sent + b.sent, 5);
        assert_eq!(api.sent_contents(chat).len(), 5);
        assert!(store.outbox_entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_rearms_failed_entry() {
        let (_store, api, outbox) = outbox_with(ScriptedApi::default().rejecting("flaky copy"));
        let chat = ChatId::new();
        let id = outbox.enqueue(chat, "flaky copy").unwrap();

        outbox.flush_pending().await.unwrap();
        assert_eq!(outbox.failed(chat).unwrap().len(), 1);

        // Server-side validation relaxed; user hits resend.
        api.rejected.lock().clear();
        outbox.retry(id).unwrap();
        let report = outbox.flush_pending().await.unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(api.sent_contents(chat), vec!["flaky copy"]);
    }

    #[tokio::test]
    async fn test_retry_unknown_entry_errors() {
        let (_store, _api, outbox) = outbox_with(ScriptedApi::default());
        assert!(matches!(
            outbox.retry(MessageId::new()),
            Err(OutboxError::UnknownEntry(_))
        ));
    }

    #[tokio::test]
    async fn test_max_attempts_gives_up() {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(ScriptedApi::default().dead_network("doomed"));
        let outbox = Outbox::with_config(
            store.clone(),
            api.clone(),
            OutboxConfig { max_attempts: Some(2) },
        );
        let chat = ChatId::new();
        outbox.enqueue(chat, "doomed").unwrap();

        assert_eq!(outbox.flush_pending().await.unwrap().deferred, 1);
        // Second flush exhausts the budget (attempts reaches the cap).
        let report = outbox.flush_pending().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(outbox.failed(chat).unwrap().len(), 1);
        assert_eq!(outbox.pending_count(chat).unwrap(), 0);
    }
}
