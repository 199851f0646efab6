//! Per-document replica state and merge rules.
//!
//! # Merge Rules
//!
//! For an incoming remote event against a block:
//!
//! 1. Wrong document or closed replica → rejected.
//! 2. Block tombstoned with version ≥ incoming → rejected. The tombstone
//!    is the delete's high-water mark; everything staler dies against it.
//! 3. Field update: accepted only if the incoming version is strictly
//!    greater than the field's current version. Equal versions are the
//!    same edit (NodeId makes stamps unique), so re-delivery is rejected —
//!    at-least-once transports are safe.
//! 4. Delete: accepted only if strictly greater than any existing
//!    tombstone. A tombstone never goes away; an accepted later update
//!    records its field but the block stays deleted.
//!
//! Rule 4's second half is what keeps delete/update commutative: both
//! orders leave the same (tombstone, fields) pair, and `is_deleted` only
//! consults the tombstone.

use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{trace, warn};
use undertow_types::{BlockId, DocumentId, NodeId};

use crate::clock::{LogicalClock, Version};
use crate::error::CrdtError;
use crate::event::{DocUpdate, UpdateAction};
use crate::Result;

/// One named field's current value and the version that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSlot {
    pub value: serde_json::Value,
    pub version: Version,
}

/// Per-block merge state: named fields plus an optional tombstone.
#[derive(Clone, Debug, Default)]
struct BlockState {
    fields: IndexMap<String, FieldSlot>,
    tombstone: Option<Version>,
}

/// The replica for one collaborative document.
///
/// Owns all block/field version state for the document it was constructed
/// for. Operations never perform I/O; the collaboration session handles
/// transport, this type handles convergence.
pub struct DocumentReplica {
    document_id: DocumentId,
    clock: LogicalClock,
    blocks: HashMap<BlockId, BlockState>,
    /// Set by `clear()`; a closed replica rejects everything.
    closed: bool,
}

impl DocumentReplica {
    /// Create an empty replica for `document_id`, stamping as `node`.
    pub fn new(document_id: DocumentId, node: NodeId) -> Self {
        Self {
            document_id,
            clock: LogicalClock::new(node),
            blocks: HashMap::new(),
            closed: false,
        }
    }

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// The node identity this replica stamps local edits with.
    pub fn node_id(&self) -> NodeId {
        self.clock.node()
    }

    /// True once `clear()` has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ========================================================================
    // Local edits
    // ========================================================================

    /// Record a local field edit and return the event to broadcast.
    ///
    /// Applied optimistically — the local block map is updated before the
    /// event goes anywhere near a network.
    pub fn create_update(
        &mut self,
        block_id: BlockId,
        field: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<DocUpdate> {
        if self.closed {
            return Err(CrdtError::Closed);
        }
        let entry = self.blocks.entry(block_id).or_default();
        if entry.tombstone.is_some() {
            return Err(CrdtError::BlockDeleted(block_id));
        }

        let field = field.into();
        let version = self.clock.tick();
        entry.fields.insert(field.clone(), FieldSlot { value: value.clone(), version });

        Ok(DocUpdate {
            document_id: self.document_id,
            node_id: self.clock.node(),
            block_id,
            version,
            action: UpdateAction::Update { field, value },
        })
    }

    /// Tombstone a block locally and return the delete event to broadcast.
    pub fn create_delete(&mut self, block_id: BlockId) -> Result<DocUpdate> {
        if self.closed {
            return Err(CrdtError::Closed);
        }
        let entry = self.blocks.entry(block_id).or_default();
        if entry.tombstone.is_some() {
            return Err(CrdtError::BlockDeleted(block_id));
        }

        let version = self.clock.tick();
        entry.tombstone = Some(version);

        Ok(DocUpdate {
            document_id: self.document_id,
            node_id: self.clock.node(),
            block_id,
            version,
            action: UpdateAction::Delete,
        })
    }

    // ========================================================================
    // Remote merges
    // ========================================================================

    /// Apply a remote event of either kind. Returns whether it was accepted.
    pub fn apply_remote(&mut self, event: &DocUpdate) -> bool {
        match event.action {
            UpdateAction::Update { .. } => self.apply_remote_update(event),
            UpdateAction::Delete => self.apply_remote_delete(event),
        }
    }

    /// Merge a remote field update. Returns whether it was accepted.
    ///
    /// Rejection is silent and expected: stale versions, duplicates, and
    /// events outranked by a tombstone all land here.
    pub fn apply_remote_update(&mut self, event: &DocUpdate) -> bool {
        if !self.pre_merge_check(event) {
            return false;
        }
        let UpdateAction::Update { ref field, ref value } = event.action else {
            warn!("delete event routed to apply_remote_update, ignoring");
            return false;
        };

        let entry = self.blocks.entry(event.block_id).or_default();
        if let Some(tombstone) = entry.tombstone
            && tombstone >= event.version
        {
            trace!(block = %event.block_id.short(), %tombstone, incoming = %event.version,
                   "update outranked by tombstone");
            return false;
        }
        if let Some(slot) = entry.fields.get(field)
            && slot.version >= event.version
        {
            trace!(block = %event.block_id.short(), field, current = %slot.version,
                   incoming = %event.version, "stale update rejected");
            return false;
        }

        entry.fields.insert(
            field.clone(),
            FieldSlot { value: value.clone(), version: event.version },
        );
        self.clock.observe(&event.version);
        trace!(block = %event.block_id.short(), field, version = %event.version,
               "remote update accepted");
        true
    }

    /// Merge a remote delete. Returns whether it was accepted.
    ///
    /// A delete for a block this replica has never seen still records the
    /// tombstone — late updates for that block must find it.
    pub fn apply_remote_delete(&mut self, event: &DocUpdate) -> bool {
        if !self.pre_merge_check(event) {
            return false;
        }
        if !event.is_delete() {
            warn!("update event routed to apply_remote_delete, ignoring");
            return false;
        }

        let entry = self.blocks.entry(event.block_id).or_default();
        if let Some(tombstone) = entry.tombstone
            && tombstone >= event.version
        {
            trace!(block = %event.block_id.short(), %tombstone, incoming = %event.version,
                   "duplicate or stale delete rejected");
            return false;
        }

        entry.tombstone = Some(event.version);
        self.clock.observe(&event.version);
        trace!(block = %event.block_id.short(), version = %event.version,
               "remote delete accepted");
        true
    }

    fn pre_merge_check(&self, event: &DocUpdate) -> bool {
        if self.closed {
            trace!("event dropped: replica is closed");
            return false;
        }
        if event.document_id != self.document_id {
            warn!(expected = %self.document_id.short(), got = %event.document_id.short(),
                  "event for wrong document rejected");
            return false;
        }
        true
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Release all block state. The replica is closed afterwards: every
    /// subsequent apply is rejected and every local edit errors. Used when
    /// leaving a document; rejoin constructs a fresh replica.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.blocks.shrink_to_fit();
        self.closed = true;
    }

    // ========================================================================
    // Read surface
    // ========================================================================

    /// Number of live (non-tombstoned) blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.values().filter(|b| b.tombstone.is_none()).count()
    }

    /// True if the block exists and is not tombstoned.
    pub fn contains(&self, block_id: BlockId) -> bool {
        self.blocks
            .get(&block_id)
            .is_some_and(|b| b.tombstone.is_none())
    }

    /// True if the block carries a tombstone.
    pub fn is_deleted(&self, block_id: BlockId) -> bool {
        self.blocks
            .get(&block_id)
            .is_some_and(|b| b.tombstone.is_some())
    }

    /// Current value of one field on a live block.
    pub fn field(&self, block_id: BlockId, name: &str) -> Option<&serde_json::Value> {
        let block = self.blocks.get(&block_id)?;
        if block.tombstone.is_some() {
            return None;
        }
        block.fields.get(name).map(|slot| &slot.value)
    }

    /// Deterministic snapshot of the full replica state.
    ///
    /// Blocks and fields are sorted so two converged replicas produce
    /// byte-identical snapshots regardless of event arrival order.
    pub fn snapshot(&self) -> DocumentSnapshot {
        let mut blocks: Vec<BlockSnapshot> = self
            .blocks
            .iter()
            .map(|(id, state)| {
                let mut fields: Vec<(String, FieldSlot)> = state
                    .fields
                    .iter()
                    .map(|(name, slot)| (name.clone(), slot.clone()))
                    .collect();
                fields.sort_by(|a, b| a.0.cmp(&b.0));
                BlockSnapshot { id: *id, fields, tombstone: state.tombstone }
            })
            .collect();
        blocks.sort_by_key(|b| b.id);
        DocumentSnapshot { document_id: self.document_id, blocks }
    }
}

/// Point-in-time copy of one block's merge state.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockSnapshot {
    pub id: BlockId,
    /// Sorted by field name.
    pub fields: Vec<(String, FieldSlot)>,
    pub tombstone: Option<Version>,
}

/// Point-in-time copy of a whole replica, ordered for comparison.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    pub document_id: DocumentId,
    pub blocks: Vec<BlockSnapshot>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    fn fresh() -> DocumentReplica {
        DocumentReplica::new(DocumentId::new(), NodeId::generate())
    }

    fn update(doc: DocumentId, node: NodeId, block: BlockId, counter: u64, field: &str, value: serde_json::Value) -> DocUpdate {
        DocUpdate {
            document_id: doc,
            node_id: node,
            block_id: block,
            version: Version { counter, node },
            action: UpdateAction::Update { field: field.to_string(), value },
        }
    }

    fn delete(doc: DocumentId, node: NodeId, block: BlockId, counter: u64) -> DocUpdate {
        DocUpdate {
            document_id: doc,
            node_id: node,
            block_id: block,
            version: Version { counter, node },
            action: UpdateAction::Delete,
        }
    }

    // ── Idempotence ─────────────────────────────────────────────────────

    #[test]
    fn test_double_apply_update_rejected() {
        let mut replica = fresh();
        let node = NodeId::generate();
        let block = BlockId::new();
        let ev = update(replica.document_id(), node, block, 5, "content", serde_json::json!("x"));

        assert!(replica.apply_remote_update(&ev));
        assert!(!replica.apply_remote_update(&ev));
        assert_eq!(replica.field(block, "content"), Some(&serde_json::json!("x")));
    }

    #[test]
    fn test_double_apply_delete_rejected() {
        let mut replica = fresh();
        let node = NodeId::generate();
        let block = BlockId::new();
        let ev = delete(replica.document_id(), node, block, 5);

        assert!(replica.apply_remote_delete(&ev));
        assert!(!replica.apply_remote_delete(&ev));
        assert!(replica.is_deleted(block));
    }

    // ── Staleness / LWW ─────────────────────────────────────────────────

    #[test]
    fn test_stale_update_rejected() {
        let mut replica = fresh();
        let node = NodeId::generate();
        let block = BlockId::new();

        assert!(replica.apply_remote_update(&update(
            replica.document_id(), node, block, 10, "content", serde_json::json!("new")
        )));
        assert!(!replica.apply_remote_update(&update(
            replica.document_id(), node, block, 3, "content", serde_json::json!("old")
        )));
        assert_eq!(replica.field(block, "content"), Some(&serde_json::json!("new")));
    }

    #[test]
    fn test_independent_fields_merge_independently() {
        let mut replica = fresh();
        let node = NodeId::generate();
        let block = BlockId::new();
        let doc = replica.document_id();

        assert!(replica.apply_remote_update(&update(doc, node, block, 10, "content", serde_json::json!("text"))));
        // Lower version, but a different field — must not be blocked.
        assert!(replica.apply_remote_update(&update(doc, node, block, 4, "checked", serde_json::json!(true))));

        assert_eq!(replica.field(block, "content"), Some(&serde_json::json!("text")));
        assert_eq!(replica.field(block, "checked"), Some(&serde_json::json!(true)));
    }

    // ── Tombstone precedence ────────────────────────────────────────────

    #[test]
    fn test_tombstone_beats_lower_update_either_order() {
        let doc = DocumentId::new();
        let node = NodeId::generate();
        let block = BlockId::new();
        let up = update(doc, node, block, 1, "content", serde_json::json!("v1"));
        let del = delete(doc, node, block, 2);

        let mut forward = DocumentReplica::new(doc, NodeId::generate());
        forward.apply_remote(&up);
        forward.apply_remote(&del);

        let mut reverse = DocumentReplica::new(doc, NodeId::generate());
        reverse.apply_remote(&del);
        reverse.apply_remote(&up);

        assert!(forward.is_deleted(block));
        assert!(reverse.is_deleted(block));
        assert_eq!(forward.snapshot(), reverse.snapshot());
    }

    #[test]
    fn test_update_below_tombstone_rejected_after_delete() {
        let doc = DocumentId::new();
        let node = NodeId::generate();
        let block = BlockId::new();
        let mut replica = DocumentReplica::new(doc, NodeId::generate());

        assert!(replica.apply_remote_delete(&delete(doc, node, block, 10)));
        assert!(!replica.apply_remote_update(&update(doc, node, block, 7, "content", serde_json::json!("late"))));
        assert!(replica.is_deleted(block));
        assert_eq!(replica.field(block, "content"), None);
    }

    #[test]
    fn test_tombstoned_block_stays_deleted_after_higher_update() {
        // An update stamped above the tombstone still converges its field
        // state, but the block never un-tombstones.
        let doc = DocumentId::new();
        let node = NodeId::generate();
        let block = BlockId::new();
        let mut replica = DocumentReplica::new(doc, NodeId::generate());

        assert!(replica.apply_remote_delete(&delete(doc, node, block, 5)));
        assert!(replica.apply_remote_update(&update(doc, node, block, 9, "content", serde_json::json!("late"))));
        assert!(replica.is_deleted(block));
        assert!(!replica.contains(block));
    }

    #[test]
    fn test_delete_for_unknown_block_records_tombstone() {
        let doc = DocumentId::new();
        let node = NodeId::generate();
        let block = BlockId::new();
        let mut replica = DocumentReplica::new(doc, NodeId::generate());

        assert!(replica.apply_remote_delete(&delete(doc, node, block, 8)));
        // The update raced the delete and arrived second, below the tombstone.
        assert!(!replica.apply_remote_update(&update(doc, node, block, 6, "content", serde_json::json!("racy"))));
        assert!(replica.is_deleted(block));
    }

    // ── Commutativity ───────────────────────────────────────────────────

    #[test]
    fn test_permutations_converge() {
        let doc = DocumentId::new();
        let a = NodeId::generate();
        let b = NodeId::generate();
        let b1 = BlockId::new();
        let b2 = BlockId::new();

        let events = vec![
            update(doc, a, b1, 1, "content", serde_json::json!("first")),
            update(doc, b, b1, 2, "content", serde_json::json!("second")),
            update(doc, a, b1, 3, "checked", serde_json::json!(true)),
            update(doc, b, b2, 1, "content", serde_json::json!("other block")),
            delete(doc, a, b2, 4),
            update(doc, b, b2, 2, "content", serde_json::json!("too late")),
        ];

        let mut reference = DocumentReplica::new(doc, NodeId::generate());
        for ev in &events {
            reference.apply_remote(ev);
        }
        let expected = reference.snapshot();

        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let mut shuffled = events.clone();
            shuffled.shuffle(&mut rng);
            let mut replica = DocumentReplica::new(doc, NodeId::generate());
            for ev in &shuffled {
                replica.apply_remote(ev);
            }
            assert_eq!(replica.snapshot(), expected);
        }
    }

    // ── Local edits ─────────────────────────────────────────────────────

    #[test]
    fn test_local_versions_strictly_increase() {
        let mut replica = fresh();
        let block = BlockId::new();
        let e1 = replica.create_update(block, "content", serde_json::json!("a")).unwrap();
        let e2 = replica.create_update(block, "content", serde_json::json!("b")).unwrap();
        assert!(e2.version > e1.version);
    }

    #[test]
    fn test_local_edit_after_merge_outranks_merged_state() {
        let mut replica = fresh();
        let node = NodeId::generate();
        let block = BlockId::new();

        let remote = update(replica.document_id(), node, block, u64::MAX / 2, "content", serde_json::json!("remote"));
        assert!(replica.apply_remote_update(&remote));

        let local = replica.create_update(block, "content", serde_json::json!("local")).unwrap();
        assert!(local.version > remote.version);
        assert_eq!(replica.field(block, "content"), Some(&serde_json::json!("local")));
    }

    #[test]
    fn test_local_edit_on_deleted_block_errors() {
        let mut replica = fresh();
        let block = BlockId::new();
        replica.create_update(block, "content", serde_json::json!("x")).unwrap();
        replica.create_delete(block).unwrap();

        assert!(matches!(
            replica.create_update(block, "content", serde_json::json!("y")),
            Err(CrdtError::BlockDeleted(_))
        ));
        assert!(matches!(replica.create_delete(block), Err(CrdtError::BlockDeleted(_))));
    }

    // ── Wrong document / closed ─────────────────────────────────────────

    #[test]
    fn test_wrong_document_rejected() {
        let mut replica = fresh();
        let node = NodeId::generate();
        let ev = update(DocumentId::new(), node, BlockId::new(), 99, "content", serde_json::json!("stray"));
        assert!(!replica.apply_remote_update(&ev));
        assert_eq!(replica.block_count(), 0);
    }

    #[test]
    fn test_clear_closes_replica() {
        let mut replica = fresh();
        let node = NodeId::generate();
        let block = BlockId::new();
        let doc = replica.document_id();

        replica.apply_remote_update(&update(doc, node, block, 1, "content", serde_json::json!("x")));
        replica.clear();

        assert!(replica.is_closed());
        assert_eq!(replica.block_count(), 0);
        assert!(!replica.apply_remote_update(&update(doc, node, block, 2, "content", serde_json::json!("y"))));
        assert!(!replica.apply_remote_delete(&delete(doc, node, block, 3)));
        assert!(matches!(
            replica.create_update(block, "content", serde_json::json!("z")),
            Err(CrdtError::Closed)
        ));
    }

    // ── Snapshot determinism ────────────────────────────────────────────

    #[test]
    fn test_snapshot_field_order_is_insertion_independent() {
        let doc = DocumentId::new();
        let node = NodeId::generate();
        let block = BlockId::new();
        let ev_content = update(doc, node, block, 1, "content", serde_json::json!("x"));
        let ev_checked = update(doc, node, block, 2, "checked", serde_json::json!(false));

        let mut one = DocumentReplica::new(doc, NodeId::generate());
        one.apply_remote(&ev_content);
        one.apply_remote(&ev_checked);

        let mut two = DocumentReplica::new(doc, NodeId::generate());
        two.apply_remote(&ev_checked);
        two.apply_remote(&ev_content);

        assert_eq!(one.snapshot(), two.snapshot());
    }
}
