//! Peer struct definition
//!
//! Represents a connected remote node: its identity, address, and the write
//! half of its connection.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::NodeError;
use crate::frame::{encode_batch_announce, encode_text};
use crate::transfer::{self, OutgoingFile};
use crate::types::ConnectionId;

/// Write half of a peer connection
pub type PeerWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connected peer information
///
/// The writer sits behind an async mutex: every send holds it for a whole
/// frame (or a whole batch), so frames from concurrent senders never
/// interleave on the wire.
pub struct Peer {
    /// Connection handle
    pub id: ConnectionId,
    /// Identity received in the handshake (not unique)
    pub identity: String,
    /// Remote socket address
    pub addr: SocketAddr,
    /// Handshake completion time
    pub connected_at: Instant,
    writer: Mutex<PeerWriter>,
    cancel: CancellationToken,
}

/// Identity and address of a connected peer, for listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: ConnectionId,
    pub identity: String,
    pub addr: SocketAddr,
}

impl Peer {
    /// Create a new peer with a fresh connection handle
    pub fn new(identity: String, addr: SocketAddr, writer: PeerWriter) -> Self {
        Self {
            id: ConnectionId::new(),
            identity,
            addr,
            connected_at: Instant::now(),
            writer: Mutex::new(writer),
            cancel: CancellationToken::new(),
        }
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id,
            identity: self.identity.clone(),
            addr: self.addr,
        }
    }

    /// Send a chat message as one text frame
    pub async fn send_text(&self, text: &str) -> Result<(), NodeError> {
        let frame = encode_text(text)?;
        self.send_raw(&frame).await
    }

    /// Write pre-encoded frame bytes
    pub async fn send_raw(&self, frame: &[u8]) -> Result<(), NodeError> {
        self.until_closed(async {
            let mut writer = self.writer.lock().await;
            writer.write_all(frame).await.map_err(NodeError::SendFailure)?;
            writer.flush().await.map_err(NodeError::SendFailure)
        })
        .await
    }

    /// Send one standalone file frame
    pub async fn send_file(&self, path: &Path) -> Result<u64, NodeError> {
        let outgoing = OutgoingFile::open(path).await?;
        self.until_closed(async {
            let mut writer = self.writer.lock().await;
            transfer::send_prepared(&mut *writer, outgoing).await
        })
        .await
    }

    /// Announce and send a batch of files
    ///
    /// Every file is opened before the announcement, so the announced count
    /// always matches the number of file frames that follow. The writer is
    /// held for the whole batch.
    pub async fn send_batch(&self, paths: &[PathBuf], announce_delay: Duration) -> Result<u64, NodeError> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(OutgoingFile::open(path).await?);
        }
        let count = u32::try_from(files.len())
            .map_err(|_| NodeError::InvalidMessage("too many files for one batch"))?;

        self.until_closed(self.write_batch(count, files, announce_delay))
            .await
    }

    async fn write_batch(
        &self,
        count: u32,
        files: Vec<OutgoingFile>,
        announce_delay: Duration,
    ) -> Result<u64, NodeError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&encode_batch_announce(count))
            .await
            .map_err(NodeError::SendFailure)?;
        writer.flush().await.map_err(NodeError::SendFailure)?;
        if !announce_delay.is_zero() {
            tokio::time::sleep(announce_delay).await;
        }

        let mut total = 0;
        let mut first_error = None;
        for file in files {
            match transfer::send_prepared(&mut *writer, file).await {
                Ok(n) => total += n,
                Err(e) if e.is_connection_fatal() => return Err(e),
                // Zero-filled, stream still aligned
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Token cancelled when this peer's session must stop
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Signal the session to stop and close the write half
    ///
    /// A send in progress is aborted mid-frame, so the write half is always
    /// shut down once this returns.
    pub async fn close(&self) {
        self.cancel.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("Shutdown of {} failed: {}", self.identity, e);
        }
    }

    /// Run a send, abandoning it (and the writer lock) once the peer is closed
    async fn until_closed<T, F>(&self, send: F) -> Result<T, NodeError>
    where
        F: Future<Output = Result<T, NodeError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(NodeError::ConnectionClosed),
            result = send => result,
        }
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, FrameReader};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn local_addr() -> SocketAddr {
        "127.0.0.1:9001".parse().unwrap()
    }

    #[tokio::test]
    async fn test_peer_creation() {
        let peer = Peer::new("bob".to_string(), local_addr(), Box::new(tokio::io::sink()));
        let info = peer.info();

        assert_eq!(info.identity, "bob");
        assert_eq!(info.addr, local_addr());
        assert_eq!(info.id, peer.id);
        assert!(!peer.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_send_text_frames() {
        let (tx, rx) = tokio::io::duplex(4096);
        let peer = Peer::new("bob".to_string(), local_addr(), Box::new(tx));

        peer.send_text("hello").await.unwrap();

        let mut reader = FrameReader::new(rx);
        assert_eq!(reader.read_frame().await.unwrap(), Frame::Text("hello".to_string()));
    }

    #[tokio::test]
    async fn test_batch_with_missing_file_sends_nothing() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, b"data").unwrap();
        let missing = dir.path().join("missing.txt");

        let (tx, rx) = tokio::io::duplex(4096);
        let peer = Peer::new("bob".to_string(), local_addr(), Box::new(tx));

        let result = peer.send_batch(&[good, missing], Duration::ZERO).await;
        assert!(matches!(result, Err(NodeError::Io(_))));

        peer.send_text("ping").await.unwrap();
        let mut reader = FrameReader::new(rx);
        assert_eq!(reader.read_frame().await.unwrap(), Frame::Text("ping".to_string()));
    }

    #[tokio::test]
    async fn test_close_aborts_blocked_send() {
        // Nobody reads, so the send stalls holding the writer
        let (tx, mut rx) = tokio::io::duplex(16);
        let peer = Arc::new(Peer::new("bob".to_string(), local_addr(), Box::new(tx)));

        let sender = {
            let peer = Arc::clone(&peer);
            tokio::spawn(async move { peer.send_raw(&[b'x'; 1000]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sender.is_finished());

        tokio::time::timeout(Duration::from_secs(5), peer.close())
            .await
            .unwrap();
        assert!(matches!(sender.await.unwrap(), Err(NodeError::ConnectionClosed)));
        assert!(matches!(peer.send_text("late").await, Err(NodeError::ConnectionClosed)));

        // Write half was shut down: the reader sees end-of-stream
        let mut received = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut rx, &mut received)
            .await
            .unwrap();
        assert_eq!(received.len(), 16);
    }

    #[tokio::test]
    async fn test_close_cancels_session() {
        let (tx, _rx) = tokio::io::duplex(64);
        let peer = Peer::new("bob".to_string(), local_addr(), Box::new(tx));
        peer.close().await;
        assert!(peer.cancel_token().is_cancelled());
    }
}
