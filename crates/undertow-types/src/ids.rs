//! Typed identifiers for chats, messages, contacts, documents, and blocks.
//!
//! Entity ID types wrap UUIDv7 (time-ordered, globally unique). They're
//! opaque on the wire and display as standard UUID text for logging. The
//! `short()` form (first 8 hex chars) is for human-facing output — never
//! used as a lookup key.
//!
//! [`NodeId`] is the exception: it wraps UUIDv4, is generated fresh at
//! session start, and is never written to storage. Its `Ord` impl (byte
//! order) is what makes version tie-breaking deterministic across replicas.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A chat (conversation) identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(uuid::Uuid);

/// An outgoing-message local identifier (UUIDv7).
///
/// Assigned by the client before any network attempt; the remote authority
/// deduplicates retried sends on it.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(uuid::Uuid);

/// A contact identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(uuid::Uuid);

/// A remote user identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(uuid::Uuid);

/// A collaborative document identifier (UUIDv7).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(uuid::Uuid);

/// A document block identifier (UUIDv7).
///
/// Stable from creation, never reused. A deleted block's ID stays
/// tombstoned forever; new content gets a new BlockId.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(uuid::Uuid);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_typed_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new time-ordered ID (UUIDv7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// First 8 hex characters — for human display only, not lookup.
            pub fn short(&self) -> String {
                self.0.as_simple().to_string()[..8].to_string()
            }

            /// Full 32-character hex string (no hyphens).
            pub fn to_hex(&self) -> String {
                self.0.as_simple().to_string()
            }

            /// Parse from a hex string (32 chars, no hyphens) or standard UUID format.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<uuid::Uuid> for $T {
            fn from(u: uuid::Uuid) -> Self {
                Self(u)
            }
        }

        impl From<$T> for uuid::Uuid {
            fn from(id: $T) -> uuid::Uuid {
                id.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Full UUID with hyphens for log readability
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_typed_id!(ChatId, "ChatId");
impl_typed_id!(MessageId, "MessageId");
impl_typed_id!(ContactId, "ContactId");
impl_typed_id!(UserId, "UserId");
impl_typed_id!(DocumentId, "DocumentId");
impl_typed_id!(BlockId, "BlockId");

// ── NodeId ──────────────────────────────────────────────────────────────────

/// Identifier of one editing session (UUIDv4, random).
///
/// Stable for the process lifetime of a session, never persisted — a new
/// session always gets a new NodeId. Total byte order is the deterministic
/// tie-break for version comparisons: when two nodes stamp the same counter
/// value, the higher NodeId wins on every replica.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(uuid::Uuid);

impl NodeId {
    /// Generate a fresh random node identity.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// First 8 hex characters — for human display only.
    pub fn short(&self) -> String {
        self.0.as_simple().to_string()[..8].to_string()
    }

    /// Full 32-character hex string (no hyphens).
    pub fn to_hex(&self) -> String {
        self.0.as_simple().to_string()
    }

    /// Parse from hex or standard UUID text. Only used in tests and logs;
    /// production nodes are always freshly generated.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

impl From<uuid::Uuid> for NodeId {
    fn from(u: uuid::Uuid) -> Self {
        Self(u)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_unique() {
        let a = ChatId::new();
        let b = ChatId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_is_8_chars() {
        assert_eq!(DocumentId::new().short().len(), 8);
        assert_eq!(NodeId::generate().short().len(), 8);
    }

    #[test]
    fn test_hex_is_32_chars() {
        assert_eq!(MessageId::new().to_hex().len(), 32);
    }

    #[test]
    fn test_parse_hex() {
        let id = BlockId::new();
        let parsed = BlockId::parse(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_uuid_format() {
        let id = ContactId::new();
        let parsed = ContactId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_entity_ids_are_time_ordered() {
        let ids: Vec<MessageId> = (0..10).map(|_| MessageId::new()).collect();
        for i in 1..ids.len() {
            assert!(ids[i] >= ids[i - 1]);
        }
    }

    #[test]
    fn test_node_id_generate_is_unique() {
        assert_ne!(NodeId::generate(), NodeId::generate());
    }

    #[test]
    fn test_node_id_order_is_total() {
        let a = NodeId::parse("00000000-0000-4000-8000-000000000001").unwrap();
        let b = NodeId::parse("ffffffff-ffff-4fff-bfff-ffffffffffff").unwrap();
        assert!(a < b);
        assert!(b > a);
        assert_eq!(a.cmp(&a), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_serde_roundtrip() {
        let id = DocumentId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: DocumentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);

        let node = NodeId::generate();
        let json = serde_json::to_string(&node).unwrap();
        let parsed: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(node, parsed);
    }

    #[test]
    fn test_postcard_roundtrip() {
        let id = ChatId::new();
        let bytes = postcard::to_stdvec(&id).unwrap();
        let parsed: ChatId = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(id, parsed);

        let node = NodeId::generate();
        let bytes = postcard::to_stdvec(&node).unwrap();
        let parsed: NodeId = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(node, parsed);
    }

    #[test]
    fn test_debug_shows_type_and_short() {
        let id = ChatId::new();
        let debug = format!("{:?}", id);
        assert!(debug.starts_with("ChatId("));
        assert!(debug.ends_with(')'));
    }

    #[test]
    fn test_display_is_full_uuid_with_hyphens() {
        let displayed = UserId::new().to_string();
        assert_eq!(displayed.len(), 36);
        assert_eq!(displayed.chars().filter(|c| *c == '-').count(), 4);
    }
}
