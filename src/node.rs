//! Node context and connection lifecycle
//!
//! `NodeContext` holds the process-wide state every component needs: local
//! identity, configuration, the peer registry, the transfer toggle and the
//! display event channel. `Node` owns the accept loop, outbound connects,
//! the identity handshake and deterministic teardown of session tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::event::NodeEvent;
use crate::peer::{Peer, PeerInfo};
use crate::registry::Registry;
use crate::router::Router;
use crate::session;
use crate::types::ConnectionId;

/// Longest identity accepted in a handshake (one read)
pub const MAX_IDENTITY_LEN: usize = 1024;

/// State shared by every component of a node
#[derive(Debug)]
pub struct NodeContext {
    /// Local identity sent in handshakes
    pub identity: String,
    pub config: NodeConfig,
    pub registry: Registry,
    transfer_enabled: AtomicBool,
    events: mpsc::Sender<NodeEvent>,
}

impl NodeContext {
    pub fn new(identity: String, config: NodeConfig, events: mpsc::Sender<NodeEvent>) -> Self {
        Self {
            transfer_enabled: AtomicBool::new(config.transfer_enabled),
            identity,
            config,
            registry: Registry::new(),
            events,
        }
    }

    /// Whether local file sends are allowed and received files are stored
    pub fn transfer_enabled(&self) -> bool {
        self.transfer_enabled.load(Ordering::Relaxed)
    }

    pub fn set_transfer_enabled(&self, enabled: bool) {
        self.transfer_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Hand an event to the display layer; a closed channel is ignored
    pub async fn emit(&self, event: NodeEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event channel closed, dropping event");
        }
    }
}

/// A running chat node
///
/// Cloning yields another handle to the same node.
#[derive(Debug, Clone)]
pub struct Node {
    ctx: Arc<NodeContext>,
    router: Router,
    sessions: Arc<Mutex<HashMap<ConnectionId, JoinHandle<()>>>>,
    shutdown: CancellationToken,
}

impl Node {
    /// Create a node; events for the display layer go to `events`
    pub fn new(
        identity: impl Into<String>,
        config: NodeConfig,
        events: mpsc::Sender<NodeEvent>,
    ) -> Result<Self, NodeError> {
        let identity = identity.into();
        if identity.is_empty() {
            return Err(NodeError::InvalidIdentity("identity is empty"));
        }
        if identity.len() > MAX_IDENTITY_LEN {
            return Err(NodeError::InvalidIdentity("identity is longer than 1024 bytes"));
        }

        let ctx = Arc::new(NodeContext::new(identity, config, events));
        Ok(Self {
            router: Router::new(Arc::clone(&ctx)),
            ctx,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn identity(&self) -> &str {
        &self.ctx.identity
    }

    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Registry {
        &self.ctx.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn transfer_enabled(&self) -> bool {
        self.ctx.transfer_enabled()
    }

    pub fn set_transfer_enabled(&self, enabled: bool) {
        info!(
            "File transfer {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.ctx.set_transfer_enabled(enabled);
    }

    pub fn list_peers(&self) -> Vec<PeerInfo> {
        self.router.list_peers()
    }

    /// Accept peers on `listener` until `shutdown()`
    ///
    /// Each accepted socket gets its own handshake task so a slow peer never
    /// holds up the accept loop.
    pub async fn serve(&self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!("Node {} listening on {}", self.ctx.identity, addr);
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        let node = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = node.accept(stream).await {
                                warn!("Handshake with {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        info!("Accept loop stopped");
    }

    /// Run the accepting side of the handshake and start a session
    ///
    /// The connecting side speaks first; we answer with our own identity.
    pub async fn accept(&self, mut stream: TcpStream) -> Result<Arc<Peer>, NodeError> {
        let identity = self
            .with_handshake_timeout(async {
                let identity = read_identity(&mut stream).await?;
                write_identity(&mut stream, &self.ctx.identity).await?;
                Ok::<_, NodeError>(identity)
            })
            .await?;
        self.start_session(stream, identity).await
    }

    /// Connect to a peer, exchange identities and start a session
    pub async fn connect<A: ToSocketAddrs>(&self, addr: A) -> Result<Arc<Peer>, NodeError> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(NodeError::Connection)?;
        let identity = self
            .with_handshake_timeout(async {
                write_identity(&mut stream, &self.ctx.identity).await?;
                read_identity(&mut stream).await
            })
            .await?;
        let peer = self.start_session(stream, identity).await?;
        info!("Connected to node {} at {}", peer.identity, peer.addr);
        Ok(peer)
    }

    /// Close one peer's connection and wait for its session to end
    ///
    /// Returns `false` if no such peer is registered.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let Some(peer) = self.ctx.registry.get(id) else {
            return false;
        };
        peer.close().await;

        let handle = self.sessions.lock().remove(&id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Session task for {} failed: {}", peer.identity, e);
            }
        }
        true
    }

    /// Stop accepting, close every connection and join every session task
    pub async fn shutdown(&self) {
        info!("Shutting down node {}", self.ctx.identity);
        self.shutdown.cancel();

        for peer in self.ctx.registry.snapshot() {
            peer.close().await;
        }

        let handles: Vec<_> = self.sessions.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Session task failed: {}", e);
            }
        }
    }

    async fn with_handshake_timeout<F, T>(&self, handshake: F) -> Result<T, NodeError>
    where
        F: std::future::Future<Output = Result<T, NodeError>>,
    {
        tokio::time::timeout(self.ctx.config.handshake_timeout(), handshake)
            .await
            .map_err(|_| NodeError::Handshake("timed out".to_string()))?
    }

    /// Register the peer and spawn its receive loop
    async fn start_session(&self, stream: TcpStream, identity: String) -> Result<Arc<Peer>, NodeError> {
        if self.shutdown.is_cancelled() {
            return Err(NodeError::Handshake("node is shutting down".to_string()));
        }

        let addr = stream.peer_addr().map_err(NodeError::Connection)?;
        let (reader, writer) = stream.into_split();
        let peer = Arc::new(Peer::new(identity, addr, Box::new(writer)));

        self.ctx.registry.register(Arc::clone(&peer));
        info!("Peer {} ({}) connected from {}", peer.identity, peer.id, addr);
        self.ctx
            .emit(NodeEvent::PeerConnected {
                id: peer.id,
                identity: peer.identity.clone(),
                addr,
            })
            .await;

        {
            let mut sessions = self.sessions.lock();
            let ctx = Arc::clone(&self.ctx);
            let session_peer = Arc::clone(&peer);
            let finished = Arc::clone(&self.sessions);
            let handle = tokio::spawn(async move {
                let id = session_peer.id;
                session::run_session(ctx, session_peer, reader).await;
                finished.lock().remove(&id);
            });
            sessions.insert(peer.id, handle);
        }

        // Lost the race with shutdown(): tear down what we just started
        if self.shutdown.is_cancelled() {
            self.disconnect(peer.id).await;
        }

        Ok(peer)
    }
}

/// Read the peer's identity: one unframed read of at most 1024 bytes
///
/// The identity has no terminator. Whatever the peer wrote before this read
/// runs is taken as its identity, so a frame sent by an accepting side that
/// has already registered us can arrive glued to its identity.
async fn read_identity(stream: &mut TcpStream) -> Result<String, NodeError> {
    let mut buf = [0u8; MAX_IDENTITY_LEN];
    let n = stream.read(&mut buf).await.map_err(NodeError::from_read)?;
    if n == 0 {
        return Err(NodeError::Handshake(
            "peer closed before sending its identity".to_string(),
        ));
    }
    String::from_utf8(buf[..n].to_vec())
        .map_err(|_| NodeError::Handshake("identity is not valid UTF-8".to_string()))
}

async fn write_identity(stream: &mut TcpStream, identity: &str) -> Result<(), NodeError> {
    stream
        .write_all(identity.as_bytes())
        .await
        .map_err(NodeError::SendFailure)
}
