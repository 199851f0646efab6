//! Collaboration session: one document, one transport subscription.
//!
//! ```text
//!   Closed ──join()──► Joining ──(join sent, task spawned)──► Joined
//!                                                               │
//!                                             leave() / drop ───┘──► Closed
//! ```
//!
//! Join is fire-and-forget: the session does not wait for server
//! confirmation, it is `Joined` as soon as the join frame is on the wire.
//! While joined, the receive task merges remote events into the replica
//! and forwards *accepted* mutations to the editor as [`SessionEvent`]s —
//! the variant itself marks them remote-origin, so the editor applies
//! them without re-broadcasting (the echo loop dies here, and again at
//! the `node_id` filter for our own frames coming back).
//!
//! Teardown is immediate: the liveness flag flips before anything else,
//! so a remote event racing `leave()` finds a dead session and is
//! dropped. No subscription outlives the session — drop aborts the
//! receive task even when `leave()` was never called.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};
use undertow_crdt::{CrdtError, DocUpdate, DocumentReplica, DocumentSnapshot, UpdateAction};
use undertow_types::{BlockId, DocumentId, LockState, NodeId, UserId};

use crate::transport::{DocEvent, PresenceAction, Transport, TransportError};

/// Session lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Joining,
    Joined,
}

/// What the session tells the editor.
///
/// `RemoteUpdate` / `RemoteDelete` are emitted only for merges the replica
/// accepted; stale and duplicate events die silently inside the CRDT.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    /// A peer's field edit won the merge. Apply to the editor state
    /// without re-broadcasting.
    RemoteUpdate {
        block_id: BlockId,
        field: String,
        value: serde_json::Value,
    },
    /// A peer deleted a block.
    RemoteDelete { block_id: BlockId },
    /// Server flipped the document lock. Last message wins.
    LockChanged(LockState),
    /// Another session entered or left the document.
    PresenceChanged {
        node_id: NodeId,
        user_id: UserId,
        action: PresenceAction,
    },
}

/// Error from session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Operation requires a joined session.
    #[error("session is not joined")]
    NotJoined,

    #[error(transparent)]
    Crdt(#[from] CrdtError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Shared state between the session handle and its receive task.
struct Shared {
    document_id: DocumentId,
    node_id: NodeId,
    replica: Mutex<DocumentReplica>,
    lock_state: Mutex<LockState>,
    /// Checked before every merge; flipped first thing on teardown.
    alive: AtomicBool,
    events_tx: broadcast::Sender<SessionEvent>,
}

/// A live editing session on one document.
pub struct CollabSession {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    state: Mutex<SessionState>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CollabSession {
    /// Join `document_id`: generate a fresh node identity, announce
    /// ourselves, and start merging the document's event stream.
    ///
    /// Must be called from within a tokio runtime (the receive task is
    /// spawned here).
    pub fn join(
        document_id: DocumentId,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, SessionError> {
        let node_id = NodeId::generate();
        let (events_tx, _) = broadcast::channel(256);

        let shared = Arc::new(Shared {
            document_id,
            node_id,
            replica: Mutex::new(DocumentReplica::new(document_id, node_id)),
            lock_state: Mutex::new(LockState::default()),
            alive: AtomicBool::new(true),
            events_tx,
        });

        let session = Self {
            shared: shared.clone(),
            transport,
            state: Mutex::new(SessionState::Joining),
            task: Mutex::new(None),
        };

        // Subscribe before announcing so nothing slips between the two.
        let rx = session.transport.subscribe();
        session.transport.send(DocEvent::Join { document_id, node_id })?;

        *session.task.lock() = Some(tokio::spawn(receive_loop(shared, rx)));
        // Join is fire-and-forget: on the wire means joined, no ack awaited.
        *session.state.lock() = SessionState::Joined;
        info!(document = %document_id.short(), node = %node_id.short(), "joined document");

        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn document_id(&self) -> DocumentId {
        self.shared.document_id
    }

    /// This session's ephemeral node identity.
    pub fn node_id(&self) -> NodeId {
        self.shared.node_id
    }

    /// Latest server-announced lock state.
    pub fn lock_state(&self) -> LockState {
        *self.shared.lock_state.lock()
    }

    /// Subscribe to editor-facing session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    // ========================================================================
    // Local edits
    // ========================================================================

    /// Apply a local field edit and broadcast it.
    ///
    /// The replica is updated before the event leaves the device — local
    /// edits are never queued behind the network.
    pub fn update_field(
        &self,
        block_id: BlockId,
        field: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<DocUpdate, SessionError> {
        self.ensure_joined()?;
        let event = self
            .shared
            .replica
            .lock()
            .create_update(block_id, field, value)?;
        self.transport.send(DocEvent::Update(event.clone()))?;
        Ok(event)
    }

    /// Tombstone a block locally and broadcast the delete.
    pub fn delete_block(&self, block_id: BlockId) -> Result<DocUpdate, SessionError> {
        self.ensure_joined()?;
        let event = self.shared.replica.lock().create_delete(block_id)?;
        self.transport.send(DocEvent::Update(event.clone()))?;
        Ok(event)
    }

    // ========================================================================
    // Read surface
    // ========================================================================

    /// Current value of one field (cloned out of the replica).
    pub fn field(&self, block_id: BlockId, name: &str) -> Option<serde_json::Value> {
        self.shared.replica.lock().field(block_id, name).cloned()
    }

    /// Deterministic snapshot of the replica.
    pub fn snapshot(&self) -> DocumentSnapshot {
        self.shared.replica.lock().snapshot()
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Leave the document: notify the server, clear the replica, stop the
    /// receive task. Idempotent; the session is `Closed` afterwards.
    pub fn leave(&self) {
        if !self.shared.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        // Best effort — leaving while offline is fine.
        let _ = self.transport.send(DocEvent::Leave {
            document_id: self.shared.document_id,
            node_id: self.shared.node_id,
        });
        self.shared.replica.lock().clear();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        *self.state.lock() = SessionState::Closed;
        info!(document = %self.shared.document_id.short(), "left document");
    }

    fn ensure_joined(&self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Joined => Ok(()),
            _ => Err(SessionError::NotJoined),
        }
    }
}

impl Drop for CollabSession {
    fn drop(&mut self) {
        self.leave();
    }
}

/// Drain the transport subscription into the replica until the session
/// dies or the transport closes.
async fn receive_loop(shared: Arc<Shared>, mut rx: broadcast::Receiver<DocEvent>) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "session receiver lagged, events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        // Teardown may have raced this receive.
        if !shared.alive.load(Ordering::Acquire) {
            break;
        }
        handle_event(&shared, event);
    }
}

fn handle_event(shared: &Shared, event: DocEvent) {
    // Everything scoped to other documents is noise.
    if event.document_id() != shared.document_id {
        trace!(got = %event.document_id().short(), "event for other document ignored");
        return;
    }

    match event {
        DocEvent::Update(update) => {
            // Echo suppression: never re-merge our own writes.
            if update.node_id == shared.node_id {
                trace!("own event echoed back, suppressed");
                return;
            }
            let accepted = shared.replica.lock().apply_remote(&update);
            if !accepted {
                return;
            }
            let session_event = match update.action {
                UpdateAction::Update { field, value } => SessionEvent::RemoteUpdate {
                    block_id: update.block_id,
                    field,
                    value,
                },
                UpdateAction::Delete => SessionEvent::RemoteDelete {
                    block_id: update.block_id,
                },
            };
            let _ = shared.events_tx.send(session_event);
        }
        DocEvent::Lock { lock, .. } => {
            *shared.lock_state.lock() = lock;
            let _ = shared.events_tx.send(SessionEvent::LockChanged(lock));
        }
        DocEvent::Presence { node_id, user_id, action, .. } => {
            // Our own join/leave reflected back isn't presence news.
            if node_id == shared.node_id {
                return;
            }
            let _ = shared.events_tx.send(SessionEvent::PresenceChanged {
                node_id,
                user_id,
                action,
            });
        }
        // Client → server frames; nothing to merge.
        DocEvent::Join { .. } | DocEvent::Leave { .. } => {}
    }
}

// ============================================================================
// Tests
// ============================================================================
