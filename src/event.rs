//! Display events
//!
//! Everything a session wants shown to the local user is sent as a
//! `NodeEvent` over the node's event channel.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::types::ConnectionId;

/// Node → display layer event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// Handshake completed, peer registered
    PeerConnected {
        id: ConnectionId,
        identity: String,
        addr: SocketAddr,
    },
    /// Session ended, peer unregistered
    PeerDisconnected {
        id: ConnectionId,
        identity: String,
        reason: DisconnectReason,
    },
    /// Chat text received
    Text { from: String, text: String },
    /// Peer announced a batch of files
    BatchStarted { from: String, count: u32 },
    /// File stored in the download area
    FileReceived {
        from: String,
        name: String,
        size: u64,
        path: PathBuf,
    },
    /// File payload read and thrown away
    FileDiscarded {
        from: String,
        name: String,
        size: u64,
        reason: String,
    },
    /// Storing a received file failed
    TransferFailed {
        from: String,
        name: String,
        error: String,
    },
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed the stream
    Closed,
    /// Peer vanished abruptly
    Reset,
    /// Local shutdown or disconnect request
    Shutdown,
    /// Any other failure
    Error(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed => write!(f, "closed by peer"),
            DisconnectReason::Reset => write!(f, "connection reset"),
            DisconnectReason::Shutdown => write!(f, "local shutdown"),
            DisconnectReason::Error(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEvent::PeerConnected { identity, addr, .. } => {
                write!(f, "{} connected from {}", identity, addr)
            }
            NodeEvent::PeerDisconnected {
                identity, reason, ..
            } => write!(f, "{} disconnected ({})", identity, reason),
            NodeEvent::Text { from, text } => write!(f, "{}: {}", from, text),
            NodeEvent::BatchStarted { from, count } => {
                write!(f, "{} is sending {} files", from, count)
            }
            NodeEvent::FileReceived { from, name, size, .. } => {
                write!(f, "received {} ({} bytes) from {}", name, size, from)
            }
            NodeEvent::FileDiscarded {
                from, name, reason, ..
            } => write!(f, "discarded {} from {}: {}", name, from, reason),
            NodeEvent::TransferFailed { from, name, error } => {
                write!(f, "receiving {} from {} failed: {}", name, from, error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_event_display() {
        let event = NodeEvent::Text {
            from: "alice".to_string(),
            text: "hello".to_string(),
        };
        assert_eq!(event.to_string(), "alice: hello");
    }

    #[test]
    fn test_disconnect_display() {
        let event = NodeEvent::PeerDisconnected {
            id: ConnectionId::new(),
            identity: "bob".to_string(),
            reason: DisconnectReason::Reset,
        };
        assert_eq!(event.to_string(), "bob disconnected (connection reset)");
    }
}
