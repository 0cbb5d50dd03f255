//! Peer-to-peer chat node - Entry Point
//!
//! Loads configuration, starts the node (listener and startup connects),
//! prints display events and dispatches commands read from stdin.

use std::env;
use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use peer_chat::command::{self, Command};
use peer_chat::{BroadcastReport, Node, NodeConfig, NodeError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=peer_chat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("peer_chat=info")),
        )
        .init();

    // Optional config file path as first argument
    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = NodeConfig::load(config_path.as_deref())?;
    let identity = config
        .identity
        .clone()
        .ok_or("no identity configured (set `identity` in the config file or PEER_CHAT_IDENTITY)")?;

    tokio::fs::create_dir_all(&config.upload_dir).await?;
    tokio::fs::create_dir_all(&config.download_dir).await?;

    let (event_tx, mut event_rx) = mpsc::channel(config.event_buffer.max(1));
    let node = Node::new(identity, config.clone(), event_tx)?;

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("{}", event);
        }
    });

    if let Some(addr) = config.listen {
        let listener = TcpListener::bind(addr).await?;
        let server = node.clone();
        tokio::spawn(async move { server.serve(listener).await });
    }

    for addr in &config.connect {
        connect(&node, addr).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(cmd) = command::parse(&line) else {
            continue;
        };
        if cmd == Command::Quit {
            break;
        }
        dispatch(&node, cmd).await;
    }

    node.shutdown().await;
    info!("Chat ended");
    Ok(())
}

async fn dispatch(node: &Node, cmd: Command) {
    let router = node.router();
    match cmd {
        Command::Broadcast(text) => report("message", router.broadcast_text(&text).await),
        Command::SendTo { peer, text } => {
            let text = command::direct_message(node.identity(), &text);
            if let Err(e) = router.unicast_text(&peer, &text).await {
                println!("Could not send to {}: {}", peer, e);
            }
        }
        Command::SendFileTo { peer, path } => match router.unicast_file(&peer, &path).await {
            Ok(size) => println!("Sent {} ({} bytes) to {}", path.display(), size, peer),
            Err(e) => println!("Could not send {} to {}: {}", path.display(), peer, e),
        },
        Command::SendFileAll(path) => report("file", router.broadcast_file(&path).await),
        Command::SendAll => report("batch", router.broadcast_upload_dir().await),
        Command::ListPeers => {
            println!("Online peers:");
            for peer in node.list_peers() {
                println!("{} - {}", peer.identity, peer.addr);
            }
        }
        Command::EnableTransfer => {
            node.set_transfer_enabled(true);
            println!("File transfer enabled");
        }
        Command::DisableTransfer => {
            node.set_transfer_enabled(false);
            println!("File transfer disabled");
        }
        Command::Connect(addr) => connect(node, &addr).await,
        Command::Quit => {}
    }
}

fn report(what: &str, result: Result<BroadcastReport, NodeError>) {
    match result {
        Ok(report) => {
            for (peer, e) in &report.failed {
                println!("Sending {} to {} failed: {}", what, peer, e);
            }
        }
        Err(NodeError::TransferDisabled) => {
            println!("File transfer is off, enable it with :transfer on");
        }
        Err(e) => println!("Sending {} failed: {}", what, e),
    }
}

async fn connect(node: &Node, addr: &str) {
    match node.connect(addr).await {
        Ok(peer) => println!("Connected to {} at {}", peer.identity, peer.addr),
        Err(e) => {
            warn!("Could not connect to {}: {}", addr, e);
            println!("Could not connect to {}: {}", addr, e);
        }
    }
}
