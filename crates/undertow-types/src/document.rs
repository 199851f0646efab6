//! Document metadata and lock state.
//!
//! Lock state is transport-level metadata, authoritative from the server:
//! the latest `doc_lock` message wins outright. It is deliberately NOT
//! merged through the CRDT — two replicas never negotiate a lock.

use serde::{Deserialize, Serialize};
use strum::EnumString;

use crate::ids::DocumentId;

/// Document metadata as the sync engine sees it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: DocumentId,
    pub title: String,
    /// Remote modification watermark (Unix millis).
    pub updated_at: u64,
}

/// Who holds a document lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum LockHolder {
    /// A user locked it by hand.
    Manual,
    /// Locked while out for signatures.
    Signatures,
    /// Not locked.
    #[default]
    None,
}

impl LockHolder {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockHolder::Manual => "manual",
            LockHolder::Signatures => "signatures",
            LockHolder::None => "none",
        }
    }
}

impl std::fmt::Display for LockHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Server-authoritative lock state for one document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
    pub locked: bool,
    pub locked_by: LockHolder,
}

impl LockState {
    pub fn unlocked() -> Self {
        Self::default()
    }

    pub fn locked_by(holder: LockHolder) -> Self {
        Self { locked: true, locked_by: holder }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_lock_holder_strings() {
        assert_eq!(LockHolder::Manual.as_str(), "manual");
        assert_eq!(LockHolder::from_str("SIGNATURES").unwrap(), LockHolder::Signatures);
        assert_eq!(LockHolder::from_str("none").unwrap(), LockHolder::None);
        assert!(LockHolder::from_str("bogus").is_err());
    }

    #[test]
    fn test_lock_state_constructors() {
        assert!(!LockState::unlocked().locked);
        let s = LockState::locked_by(LockHolder::Manual);
        assert!(s.locked);
        assert_eq!(s.locked_by, LockHolder::Manual);
    }

    #[test]
    fn test_json_roundtrip() {
        let meta = DocumentMeta {
            id: DocumentId::new(),
            title: "Q3 proposal".to_string(),
            updated_at: 99,
        };
        let json = serde_json::to_string(&meta).unwrap();
        let parsed: DocumentMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(meta, parsed);
    }

    #[test]
    fn test_lock_serde_is_lowercase() {
        let json = serde_json::to_string(&LockHolder::Signatures).unwrap();
        assert_eq!(json, "\"signatures\"");
    }
}
