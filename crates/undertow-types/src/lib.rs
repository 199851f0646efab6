//! Shared identity and entity types for Undertow.
//!
//! This crate is the relational foundation: typed IDs plus the chat,
//! contact, and document metadata records the sync core moves around.
//! It has **no internal undertow dependencies** — a pure leaf crate that
//! other crates build on.
//!
//! # Entity-Relationship Overview
//!
//! ```text
//! Contact (ContactId) ← someone you can chat with
//!     └── belongs to a remote user (UserId)
//!
//! Chat (ChatId) ← one conversation
//!     └── contains ChatMessage (MessageId)
//!
//! Document (DocumentId) ← one collaborative document
//!     └── edited by sessions, each with an ephemeral NodeId
//!     └── carries LockState (server-authoritative, not merged)
//! ```
//!
//! `NodeId` is deliberately different from the other IDs: it identifies
//! one editing session, is generated at session start, and is never
//! persisted — a restarted client is a new node.

pub mod chat;
pub mod document;
pub mod ids;

// Re-export primary types at crate root for convenience.
pub use chat::{Chat, ChatMessage, Contact};
pub use document::{DocumentMeta, LockHolder, LockState};
pub use ids::{BlockId, ChatId, ContactId, DocumentId, MessageId, NodeId, UserId};

/// Current time as Unix milliseconds. Used by constructors throughout the
/// workspace.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
