//! Error types for CRDT operations.

use thiserror::Error;

use undertow_types::BlockId;

/// Errors from local edit operations.
///
/// Remote merges never error — a stale or duplicate event is an expected
/// outcome and is reported as `accepted = false`, not as a failure.
#[derive(Error, Debug)]
pub enum CrdtError {
    /// Local edit against a block this replica has tombstoned.
    ///
    /// Deleted blocks never come back; create a new block instead.
    #[error("block is deleted: {0:?}")]
    BlockDeleted(BlockId),

    /// Edit attempted after `clear()` — the replica is closed.
    #[error("replica is closed")]
    Closed,
}
