//! Message and file routing
//!
//! Broadcast to every connected peer or unicast to one peer by identity.
//! Every fan-out works on a registry snapshot and visits peers one at a
//! time; a failing peer is logged, reported and skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::NodeError;
use crate::frame::encode_text;
use crate::node::NodeContext;
use crate::peer::{Peer, PeerInfo};
use crate::transfer::OutgoingFile;

/// Outcome of a broadcast
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Identities that received everything
    pub delivered: Vec<String>,
    /// Identities that failed, with the cause
    pub failed: Vec<(String, NodeError)>,
}

impl BroadcastReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    async fn record<T>(&mut self, peer: &Peer, what: &str, result: Result<T, NodeError>) {
        match result {
            Ok(_) => self.delivered.push(peer.identity.clone()),
            Err(e) => {
                warn!("Sending {} to {} failed: {}", what, peer.identity, e);
                abandon_if_broken(peer, &e).await;
                self.failed.push((peer.identity.clone(), e));
            }
        }
    }
}

/// Routes outgoing text and files to connected peers
#[derive(Debug, Clone)]
pub struct Router {
    ctx: Arc<NodeContext>,
}

impl Router {
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// Send a text frame to every peer
    pub async fn broadcast_text(&self, message: &str) -> Result<BroadcastReport, NodeError> {
        let frame = encode_text(message)?;
        let mut report = BroadcastReport::default();
        for peer in self.ctx.registry.snapshot() {
            let result = peer.send_raw(&frame).await;
            report.record(&peer, "message", result).await;
        }
        Ok(report)
    }

    /// Send one standalone file frame to every peer
    pub async fn broadcast_file(&self, path: &Path) -> Result<BroadcastReport, NodeError> {
        self.ensure_transfer_enabled()?;
        OutgoingFile::open(path).await?;

        let mut report = BroadcastReport::default();
        for peer in self.ctx.registry.snapshot() {
            let result = peer.send_file(path).await;
            report.record(&peer, "file", result).await;
        }
        info!("File {} broadcast to {} peers", path.display(), report.delivered.len());
        Ok(report)
    }

    /// Announce and send `paths` as one batch to every peer, one peer at a time
    ///
    /// Every file is checked before any peer is contacted.
    pub async fn broadcast_files(&self, paths: &[PathBuf]) -> Result<BroadcastReport, NodeError> {
        self.ensure_transfer_enabled()?;
        for path in paths {
            OutgoingFile::open(path).await?;
        }

        let delay = self.ctx.config.batch_announce_delay();
        let mut report = BroadcastReport::default();
        for peer in self.ctx.registry.snapshot() {
            let result = peer.send_batch(paths, delay).await;
            report.record(&peer, "batch", result).await;
        }
        info!(
            "Batch of {} files broadcast to {} peers",
            paths.len(),
            report.delivered.len()
        );
        Ok(report)
    }

    /// Broadcast every regular file in the upload area as one batch
    pub async fn broadcast_upload_dir(&self) -> Result<BroadcastReport, NodeError> {
        self.ensure_transfer_enabled()?;
        let files = list_files(&self.ctx.config.upload_dir).await?;
        self.broadcast_files(&files).await
    }

    /// Send a text frame to the first peer with `identity`
    pub async fn unicast_text(&self, identity: &str, message: &str) -> Result<(), NodeError> {
        let frame = encode_text(message)?;
        let peer = self.resolve(identity)?;
        match peer.send_raw(&frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Sending message to {} failed: {}", identity, e);
                abandon_if_broken(&peer, &e).await;
                Err(e)
            }
        }
    }

    /// Send one file frame to the first peer with `identity`
    pub async fn unicast_file(&self, identity: &str, path: &Path) -> Result<u64, NodeError> {
        self.ensure_transfer_enabled()?;
        let peer = self.resolve(identity)?;
        match peer.send_file(path).await {
            Ok(size) => Ok(size),
            Err(e) => {
                warn!("Sending file {} to {} failed: {}", path.display(), identity, e);
                abandon_if_broken(&peer, &e).await;
                Err(e)
            }
        }
    }

    /// Identity and address of every connected peer
    pub fn list_peers(&self) -> Vec<PeerInfo> {
        self.ctx.registry.list()
    }

    fn resolve(&self, identity: &str) -> Result<Arc<Peer>, NodeError> {
        self.ctx
            .registry
            .lookup_by_identity(identity)
            .ok_or_else(|| NodeError::PeerNotFound(identity.to_string()))
    }

    fn ensure_transfer_enabled(&self) -> Result<(), NodeError> {
        if self.ctx.transfer_enabled() {
            Ok(())
        } else {
            Err(NodeError::TransferDisabled)
        }
    }
}

/// A write that failed mid-frame leaves the peer's stream unusable
async fn abandon_if_broken(peer: &Peer, err: &NodeError) {
    if err.is_connection_fatal() {
        warn!("Abandoning connection to {} ({})", peer.identity, peer.id);
        peer.close().await;
    }
}

/// Regular files directly inside `dir`, sorted by name
async fn list_files(dir: &Path) -> Result<Vec<PathBuf>, NodeError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
