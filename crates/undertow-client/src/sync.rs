//! Cursor-based reconciliation against the remote authority.
//!
//! # Sync Protocol
//!
//! One pass reconciles contacts → chats → per-chat message tails, in that
//! order, committing every entity to the store the moment it lands. Each
//! entity class keeps a cursor: the highest remote watermark this client
//! has fully absorbed. A pass pulls `since = cursor`, so an idle second
//! pass transfers nothing and writes nothing.
//!
//! # Failure model
//!
//! A failing step ends the pass: the error is recorded in [`SyncStatus`],
//! `is_syncing` drops, and everything already committed stays committed.
//! Cursors only advance after their page is fully stored, so the next
//! pass re-pulls exactly the unfinished tail — re-pulling an entity that
//! did land is an idempotent upsert.
//!
//! # Exclusivity
//!
//! No two passes run concurrently. A `full_sync()` call that arrives
//! while a pass is in flight waits for that pass and returns without
//! starting another one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use undertow_types::{ChatId, now_millis};

use crate::api::{ApiError, RemoteApi};
use crate::store::{CursorKey, Store, StoreError};

/// Observable state of the engine. One instance per engine; mutated only
/// by the engine, read by any number of watchers.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub is_syncing: bool,
    /// Completion time of the last fully successful pass (Unix millis).
    pub last_synced_at: Option<u64>,
    /// Error that ended the most recent pass, if it failed. Cleared when
    /// the next pass starts.
    pub error: Option<String>,
}

/// Error inside one sync step. Never escapes the engine — it lands in
/// [`SyncStatus::error`].
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reconciles the local store with the remote authority.
pub struct SyncEngine {
    store: Arc<dyn Store>,
    api: Arc<dyn RemoteApi>,
    status_tx: watch::Sender<SyncStatus>,
    /// Serializes passes of any kind.
    pass_lock: tokio::sync::Mutex<()>,
    /// Bumped when a full pass completes; lets a queued caller detect that
    /// the pass it waited behind already did the work.
    generation: AtomicU64,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn Store>, api: Arc<dyn RemoteApi>) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::default());
        Self {
            store,
            api,
            status_tx,
            pass_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Watch status changes. The receiver immediately holds the current
    /// status.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Current status snapshot.
    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    /// Reconcile everything: contacts, chats, then each chat's messages.
    ///
    /// If a pass is already in flight, this waits for it and returns —
    /// it never stacks a second pass.
    pub async fn full_sync(&self) {
        let generation_before = self.generation.load(Ordering::Acquire);
        let _guard = self.pass_lock.lock().await;
        if self.generation.load(Ordering::Acquire) != generation_before {
            // The pass we queued behind already covered this request.
            debug!("full sync coalesced into the pass that just finished");
            return;
        }

        self.begin_pass();
        let result = self.run_full_pass().await;
        self.generation.fetch_add(1, Ordering::Release);
        self.end_pass(result);
    }

    /// Narrow pass: one chat's message tail. Used when a chat screen
    /// opens. Serialized against all other passes.
    pub async fn sync_messages(&self, chat_id: ChatId) {
        let _guard = self.pass_lock.lock().await;
        self.begin_pass();
        let result = self.pull_messages(chat_id).await.map(|pulled| {
            debug!(chat = %chat_id.short(), pulled, "chat messages synced");
        });
        self.end_pass(result);
    }

    // ========================================================================
    // Pass steps
    // ========================================================================

    async fn run_full_pass(&self) -> Result<(), SyncError> {
        let contacts = self.pull_contacts().await?;
        let chats = self.pull_chats().await?;

        let mut messages = 0usize;
        for chat in self.store.chats()? {
            messages += self.pull_messages(chat.id).await?;
        }

        info!(contacts, chats, messages, "full sync pass complete");
        Ok(())
    }

    async fn pull_contacts(&self) -> Result<usize, SyncError> {
        let since = self.store.cursor(CursorKey::Contacts)?;
        let contacts = self.api.list_contacts(since).await?;

        let mut watermark = since.unwrap_or(0);
        for contact in &contacts {
            self.store.upsert_contact(contact)?;
            watermark = watermark.max(contact.updated_at);
        }
        if !contacts.is_empty() {
            self.store.set_cursor(CursorKey::Contacts, watermark)?;
        }
        Ok(contacts.len())
    }

    async fn pull_chats(&self) -> Result<usize, SyncError> {
        let since = self.store.cursor(CursorKey::Chats)?;
        let chats = self.api.list_chats(since).await?;

        let mut watermark = since.unwrap_or(0);
        for chat in &chats {
            self.store.upsert_chat(chat)?;
            watermark = watermark.max(chat.updated_at);
        }
        if !chats.is_empty() {
            self.store.set_cursor(CursorKey::Chats, watermark)?;
        }
        Ok(chats.len())
    }

    async fn pull_messages(&self, chat_id: ChatId) -> Result<usize, SyncError> {
        let key = CursorKey::Messages(chat_id);
        let since = self.store.cursor(key)?;
        let messages = self.api.list_messages(chat_id, since).await?;

        let mut watermark = since.unwrap_or(0);
        for message in &messages {
            self.store.upsert_message(message)?;
            watermark = watermark.max(message.sent_at);
        }
        if !messages.is_empty() {
            self.store.set_cursor(key, watermark)?;
        }
        Ok(messages.len())
    }

    // ========================================================================
    // Status plumbing
    // ========================================================================

    fn begin_pass(&self) {
        self.status_tx.send_modify(|status| {
            status.is_syncing = true;
            status.error = None;
        });
    }

    fn end_pass(&self, result: Result<(), SyncError>) {
        match result {
            Ok(()) => self.status_tx.send_modify(|status| {
                status.is_syncing = false;
                status.last_synced_at = Some(now_millis());
                status.error = None;
            }),
            Err(e) => {
                warn!(error = %e, "sync pass failed, partial progress kept");
                self.status_tx.send_modify(|status| {
                    status.is_syncing = false;
                    status.error = Some(e.to_string());
                });
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
