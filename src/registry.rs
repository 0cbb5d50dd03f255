//! Peer registry
//!
//! Concurrency-safe table of connected peers keyed by connection handle.
//! The lock is never held across an `.await`: network I/O always works on a
//! `snapshot()`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::peer::{Peer, PeerInfo};
use crate::types::ConnectionId;

/// Table of live peers
///
/// Cloning yields another handle to the same table.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    peers: Arc<RwLock<HashMap<ConnectionId, Arc<Peer>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer under its connection handle
    pub fn register(&self, peer: Arc<Peer>) {
        let mut peers = self.peers.write();
        peers.insert(peer.id, peer);
        debug!("Total peers: {}", peers.len());
    }

    /// Remove a peer; no-op if absent
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<Peer>> {
        let mut peers = self.peers.write();
        let removed = peers.remove(&id);
        if removed.is_some() {
            debug!("Total peers: {}", peers.len());
        }
        removed
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Peer>> {
        self.peers.read().get(&id).cloned()
    }

    /// Find a peer by identity
    ///
    /// Identities are not unique; the earliest connected match wins.
    pub fn lookup_by_identity(&self, identity: &str) -> Option<Arc<Peer>> {
        self.peers
            .read()
            .values()
            .filter(|p| p.identity == identity)
            .min_by_key(|p| p.connected_at)
            .cloned()
    }

    /// Point-in-time copy of all peers, oldest connection first
    pub fn snapshot(&self) -> Vec<Arc<Peer>> {
        let mut peers: Vec<_> = self.peers.read().values().cloned().collect();
        peers.sort_by_key(|p| p.connected_at);
        peers
    }

    /// Identity and address of every peer, oldest connection first
    pub fn list(&self) -> Vec<PeerInfo> {
        self.snapshot().iter().map(|p| p.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}
