//! Field-level LWW document CRDT for Undertow.
//!
//! One [`DocumentReplica`] holds the merge state for one collaborative
//! document: a map from block to named fields, each field carrying the
//! [`Version`] that produced its current value. Concurrent edits from any
//! number of replicas converge deterministically without coordination.
//!
//! # Design Philosophy
//!
//! Content is structured as blocks with named fields, not flat text.
//! Merging happens at field granularity: two people editing different
//! fields of the same block both win; two people editing the same field
//! resolve by version, last writer wins. Character-level interleaving is
//! deliberately out of scope — a field's value is replaced whole.
//!
//! # CRDT Semantics
//!
//! - **Fields**: Last-Write-Wins by [`Version`] — logical counter first,
//!   NodeId as the deterministic tie-break (higher node wins).
//! - **Deletes**: tombstones with their own version; a tombstone rejects
//!   every stale update and is never removed for the life of the replica.
//! - **Application order is irrelevant**: apply the same event set in any
//!   order, on any replica, and the converged state is identical
//!   (commutative, associative, idempotent).
//!
//! All operations are synchronous and I/O-free — merge is computable
//! purely from local state, which is what makes rapid local edits and
//! remote event bursts safe to apply back-to-back.

mod clock;
mod document;
mod error;
mod event;

pub use clock::{LogicalClock, Version};
pub use document::{BlockSnapshot, DocumentReplica, DocumentSnapshot, FieldSlot};
pub use error::CrdtError;
pub use event::{DocUpdate, UpdateAction};

/// Result type for CRDT operations.
pub type Result<T> = std::result::Result<T, CrdtError>;
