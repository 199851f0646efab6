//! Client-side sync core: collaboration sessions, message outbox, sync engine.
//!
//! This crate binds the [`undertow_crdt`] replica to the outside world and
//! keeps a device useful while offline:
//!
//! - [`CollabSession`] — joins one document over a [`Transport`], merges
//!   remote events into the replica, broadcasts local edits, suppresses
//!   echoes, and forwards lock/presence changes to the editor.
//! - [`Outbox`] — durable per-chat FIFO of unsent messages; drained in
//!   creation order when connectivity returns.
//! - [`SyncEngine`] — cursor-based reconciliation of contacts, chats, and
//!   message history against the remote authority, with a watchable
//!   [`SyncStatus`].
//! - [`Store`] — the narrow local-persistence contract, with in-memory and
//!   SQLite backends.
//! - [`ClientContext`] — session-scoped wiring for all of the above;
//!   constructed at login, dropped at logout. No process-wide state.
//!
//! ```text
//!   editor ──► CollabSession ──► Transport (send)
//!     ▲              │
//!     │              ▼
//!  SessionEvent   DocumentReplica ──► Store
//!
//!   user send ──► Outbox ──► Store (persist first)
//!                    │
//!      reconnect ────┴──► RemoteApi ──► Store (ack → message row)
//! ```
//!
//! Everything here follows one failure philosophy: merge rejections are
//! silent, transient network failures surface as retryable status, and
//! nothing in this crate may take the host process down.

pub mod api;
pub mod connectivity;
pub mod context;
pub mod outbox;
pub mod session;
pub mod store;
pub mod sync;
pub mod transport;

pub use api::{ApiError, RemoteApi};
pub use connectivity::{Connectivity, spawn_reconnect_driver};
pub use context::ClientContext;
pub use outbox::{FlushReport, Outbox, OutboxConfig, OutboxEntry, OutboxError, OutboxStatus};
pub use session::{CollabSession, SessionError, SessionEvent, SessionState};
pub use store::{CursorKey, MemoryStore, SqliteStore, Store, StoreError};
pub use sync::{SyncEngine, SyncError, SyncStatus};
pub use transport::{ChannelTransport, DocEvent, PresenceAction, Transport, TransportError};
