//! Realtime transport contract and typed document events.
//!
//! The wire protocol is a tagged union, not string-keyed dispatch —
//! a handler that forgets a variant fails to compile. The actual
//! connection (websocket, RPC channel) lives outside this crate;
//! implementations forward incoming frames into a
//! [`tokio::sync::broadcast`] channel that sessions subscribe to.
//!
//! [`ChannelTransport`] is the in-process loopback backend: everything
//! sent is delivered to every subscriber, including the sender. That makes
//! it the harness for echo-suppression and convergence tests, and a
//! serviceable same-process multi-session wiring.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use undertow_crdt::DocUpdate;
use undertow_types::{DocumentId, LockState, NodeId, UserId};

/// Whether a peer entered or left a document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Joined,
    Left,
}

/// Every event that crosses the realtime channel, in both directions.
///
/// Wire names carry the `doc_` prefix the channel multiplexes on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DocEvent {
    /// Session entered a document (client → server, fire-and-forget).
    #[serde(rename = "doc_join")]
    Join {
        document_id: DocumentId,
        node_id: NodeId,
    },
    /// Session left a document (client → server).
    #[serde(rename = "doc_leave")]
    Leave {
        document_id: DocumentId,
        node_id: NodeId,
    },
    /// A replicated CRDT edit (both directions).
    #[serde(rename = "doc_update")]
    Update(DocUpdate),
    /// Server-authoritative lock change. Last message wins.
    #[serde(rename = "doc_lock")]
    Lock {
        document_id: DocumentId,
        lock: LockState,
    },
    /// Another session entered or left (server → client).
    #[serde(rename = "doc_presence")]
    Presence {
        document_id: DocumentId,
        node_id: NodeId,
        user_id: UserId,
        action: PresenceAction,
    },
}

impl DocEvent {
    /// The document this event is scoped to.
    pub fn document_id(&self) -> DocumentId {
        match self {
            DocEvent::Join { document_id, .. }
            | DocEvent::Leave { document_id, .. }
            | DocEvent::Lock { document_id, .. }
            | DocEvent::Presence { document_id, .. } => *document_id,
            DocEvent::Update(update) => update.document_id,
        }
    }
}

/// Error from transport sends.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The underlying connection is gone.
    #[error("transport closed")]
    Closed,

    /// Backend-specific send failure.
    #[error("send failed: {0}")]
    Send(String),
}

/// A realtime connection able to publish and subscribe document events.
pub trait Transport: Send + Sync {
    /// Publish one event. Fire-and-forget — delivery is not acknowledged.
    fn send(&self, event: DocEvent) -> Result<(), TransportError>;

    /// Subscribe to the incoming event stream. Each receiver sees every
    /// event from the moment of subscription onward.
    fn subscribe(&self) -> broadcast::Receiver<DocEvent>;
}

/// In-process loopback transport over a broadcast channel.
pub struct ChannelTransport {
    tx: broadcast::Sender<DocEvent>,
}

impl ChannelTransport {
    /// Create a loopback transport buffering up to `capacity` events per
    /// slow receiver.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for ChannelTransport {
    fn default() -> Self {
        // Enough for any realistic burst of field edits between polls.
        Self::new(1024)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, event: DocEvent) -> Result<(), TransportError> {
        // No subscribers means nobody to deliver to — that's fine for a
        // fire-and-forget channel, not an error.
        let _ = self.tx.send(event);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<DocEvent> {
        self.tx.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_delivers_to_all_subscribers() {
        let transport = ChannelTransport::default();
        let mut rx1 = transport.subscribe();
        let mut rx2 = transport.subscribe();

        let event = DocEvent::Join {
            document_id: DocumentId::new(),
            node_id: NodeId::generate(),
        };
        transport.send(event.clone()).unwrap();

        assert_eq!(rx1.try_recv().unwrap(), event);
        assert_eq!(rx2.try_recv().unwrap(), event);
    }

    #[test]
    fn test_send_without_subscribers_is_ok() {
        let transport = ChannelTransport::default();
        let event = DocEvent::Lock {
            document_id: DocumentId::new(),
            lock: LockState::unlocked(),
        };
        assert!(transport.send(event).is_ok());
    }

    #[test]
    fn test_document_id_accessor() {
        let document_id = DocumentId::new();
        let event = DocEvent::Presence {
            document_id,
            node_id: NodeId::generate(),
            user_id: UserId::new(),
            action: PresenceAction::Joined,
        };
        assert_eq!(event.document_id(), document_id);
    }

    #[test]
    fn test_json_roundtrip_uses_wire_names() {
        let event = DocEvent::Presence {
            document_id: DocumentId::new(),
            node_id: NodeId::generate(),
            user_id: UserId::new(),
            action: PresenceAction::Left,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("doc_presence"));
        let parsed: DocEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }
}
