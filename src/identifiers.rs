//! Type-safe identifiers.
//!
//! Newtype wrappers keep client identities from being mixed up with other
//! strings flowing through the hub (port names, message kinds).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ClientId
// ============================================================================

/// Process-unique identity of one subscriber session.
///
/// Generated at accept time. Opaque to callers; only equality and display
/// are meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("client_{}", Uuid::new_v4().simple()))
    }

    /// Returns the identifier as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use rustc_hash::FxHashSet;

    #[test]
    fn test_generate_is_unique() {
        let ids: FxHashSet<ClientId> = (0..1000).map(|_| ClientId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_display_matches_as_str() {
        let id = ClientId::generate();
        assert_eq!(id.to_string(), id.as_str());
        assert!(id.as_str().starts_with("client_"));
    }
}
