//! The replicated update event.
//!
//! [`DocUpdate`] is the unit of replication: produced locally on every
//! edit, broadcast over the transport, applied remotely on receipt. Events
//! are self-contained and replayable — the converged state of a replica is
//! a pure function of the event set it has seen, independent of arrival
//! order.

use serde::{Deserialize, Serialize};
use undertow_types::{BlockId, DocumentId, NodeId};

use crate::clock::Version;

/// What an event does to its block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    /// Set one named field to a new value.
    Update {
        field: String,
        value: serde_json::Value,
    },
    /// Tombstone the whole block.
    Delete,
}

/// One replicated document edit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocUpdate {
    /// Document this event belongs to. Events for other documents are
    /// rejected at every layer that sees them.
    pub document_id: DocumentId,
    /// Originating session — used for echo suppression upstream.
    pub node_id: NodeId,
    pub block_id: BlockId,
    /// Stamp deciding whether this event wins against current state.
    pub version: Version,
    pub action: UpdateAction,
}

impl DocUpdate {
    /// True if this event tombstones its block.
    pub fn is_delete(&self) -> bool {
        matches!(self.action, UpdateAction::Delete)
    }
}

// ============================================================================
// Tests
// ============================================================================
