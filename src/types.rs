//! Basic type definitions for the chat node
//!
//! Provides the `ConnectionId` newtype used as the handle of a live
//! peer connection.

use uuid::Uuid;

/// Unique connection handle (newtype pattern)
///
/// Wraps a UUID v4. A fresh id is minted for every accepted or initiated
/// connection, so two connections from the same identity never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_connection_id_display() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string(), id.0.to_string());
    }
}
