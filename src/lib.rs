//! Serverless peer-to-peer chat and file transfer
//!
//! Every node both accepts and initiates raw TCP connections. After a
//! one-line identity handshake, peers exchange self-delimiting frames over
//! the stream: chat text, batch announcements and file payloads.
//!
//! # Features
//! - Identity handshake on connect and accept
//! - Broadcast and direct chat messages
//! - Single-file and batch file transfer
//! - Local transfer toggle that never desynchronizes the stream
//! - Deterministic shutdown of every session task
//!
//! # Architecture
//! - `frame`: wire codec, the only place bytes become frames
//! - `registry`: synchronized table of connected peers
//! - `transfer`: streams file payloads out and in
//! - `session`: one receive loop task per connection
//! - `router`: broadcast and unicast of text and files
//! - `node`: shared context, accept loop, connect, handshake, teardown
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use peer_chat::{Node, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (events_tx, mut events) = mpsc::channel(256);
//!     let node = Node::new("alice", NodeConfig::default(), events_tx).unwrap();
//!
//!     let listener = TcpListener::bind("127.0.0.1:9001").await.unwrap();
//!     tokio::spawn({
//!         let node = node.clone();
//!         async move { node.serve(listener).await }
//!     });
//!
//!     node.router().broadcast_text("hello").await.unwrap();
//!     while let Some(event) = events.recv().await {
//!         println!("{}", event);
//!     }
//! }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod node;
pub mod peer;
pub mod registry;
pub mod router;
pub mod session;
pub mod transfer;
pub mod types;

// Re-export main types for convenience
pub use command::Command;
pub use config::NodeConfig;
pub use error::{ConfigError, NodeError};
pub use event::{DisconnectReason, NodeEvent};
pub use frame::{FileHeader, Frame, FrameReader};
pub use node::{Node, NodeContext};
pub use peer::{Peer, PeerInfo};
pub use registry::Registry;
pub use router::{BroadcastReport, Router};
pub use types::ConnectionId;
