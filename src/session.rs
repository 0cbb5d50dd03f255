//! Per-connection session handler
//!
//! Runs the receive loop for one peer: decodes frames, dispatches text to the
//! display layer and file frames to the transfer engine, and unregisters the
//! peer when the connection ends.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tracing::{debug, error, info, warn};

use crate::error::NodeError;
use crate::event::{DisconnectReason, NodeEvent};
use crate::frame::{FileHeader, Frame, FrameReader};
use crate::node::NodeContext;
use crate::peer::Peer;
use crate::transfer;

/// Run the session for `peer` until the connection ends or is cancelled
///
/// The peer is removed from the registry before this returns, whatever the
/// reason. Errors never propagate beyond this session.
pub async fn run_session<R>(ctx: Arc<NodeContext>, peer: Arc<Peer>, reader: R) -> DisconnectReason
where
    R: AsyncRead + Unpin + Send,
{
    let mut frames = FrameReader::new(reader);
    debug!("Session started for {} ({})", peer.identity, peer.id);

    let ended = tokio::select! {
        _ = peer.cancel_token().cancelled() => None,
        err = receive_loop(&ctx, &peer, &mut frames) => Some(err),
    };

    ctx.registry.unregister(peer.id);

    let reason = match ended {
        None => {
            info!("Session with {} ({}) stopped", peer.identity, peer.id);
            DisconnectReason::Shutdown
        }
        Some(NodeError::ConnectionClosed) => {
            info!("Peer {} ({}) disconnected", peer.identity, peer.id);
            DisconnectReason::Closed
        }
        Some(NodeError::ConnectionReset(e)) => {
            warn!("Peer {} ({}) disconnected abnormally: {}", peer.identity, peer.id, e);
            DisconnectReason::Reset
        }
        Some(e) => {
            error!("Session with {} ({}) failed: {}", peer.identity, peer.id, e);
            DisconnectReason::Error(e.to_string())
        }
    };

    ctx.emit(NodeEvent::PeerDisconnected {
        id: peer.id,
        identity: peer.identity.clone(),
        reason: reason.clone(),
    })
    .await;

    reason
}

/// Decode and dispatch frames until a connection-fatal error
async fn receive_loop<R>(ctx: &NodeContext, peer: &Peer, frames: &mut FrameReader<R>) -> NodeError
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match frames.read_frame().await {
            Ok(frame) => frame,
            Err(e) => return e,
        };
        if let Err(e) = handle_frame(ctx, peer, frames, frame).await {
            return e;
        }
    }
}

async fn handle_frame<R>(
    ctx: &NodeContext,
    peer: &Peer,
    frames: &mut FrameReader<R>,
    frame: Frame,
) -> Result<(), NodeError>
where
    R: AsyncRead + Unpin,
{
    match frame {
        Frame::Text(text) => {
            debug!("Text from {}: {} bytes", peer.identity, text.len());
            ctx.emit(NodeEvent::Text {
                from: peer.identity.clone(),
                text,
            })
            .await;
        }
        Frame::BatchAnnounce(count) => {
            info!("{} announced a batch of {} files", peer.identity, count);
            ctx.emit(NodeEvent::BatchStarted {
                from: peer.identity.clone(),
                count,
            })
            .await;

            for index in 0..count {
                match frames.read_frame().await? {
                    Frame::File(header) => store_file(ctx, peer, frames, header).await?,
                    other => {
                        return Err(NodeError::ProtocolDesync(format!(
                            "expected file {} of {} in batch, got {:?}",
                            index + 1,
                            count,
                            other
                        )));
                    }
                }
            }
        }
        Frame::File(header) => store_file(ctx, peer, frames, header).await?,
    }
    Ok(())
}

/// Drain one file payload, persisting it when allowed
///
/// Only connection-fatal errors are returned; local failures are reported as
/// events and leave the session running.
async fn store_file<R>(
    ctx: &NodeContext,
    peer: &Peer,
    frames: &mut FrameReader<R>,
    header: FileHeader,
) -> Result<(), NodeError>
where
    R: AsyncRead + Unpin,
{
    let dest = if ctx.transfer_enabled() {
        transfer::download_path(&ctx.config.download_dir, &header.name).map_err(|e| e.to_string())
    } else {
        Err("file transfer is disabled".to_string())
    };

    let path = match dest {
        Ok(path) => path,
        Err(reason) => {
            transfer::receive_file(frames, &header, None).await?;
            warn!(
                "Discarded file {} ({} bytes) from {}: {}",
                header.name, header.size, peer.identity, reason
            );
            ctx.emit(NodeEvent::FileDiscarded {
                from: peer.identity.clone(),
                name: header.name,
                size: header.size,
                reason,
            })
            .await;
            return Ok(());
        }
    };

    match transfer::receive_file(frames, &header, Some(&path)).await {
        Ok(size) => {
            info!("File {} received from {} ({} bytes)", header.name, peer.identity, size);
            ctx.emit(NodeEvent::FileReceived {
                from: peer.identity.clone(),
                name: header.name,
                size,
                path,
            })
            .await;
        }
        Err(e) if e.is_connection_fatal() => return Err(e),
        Err(e) => {
            error!("Receiving file {} from {} failed: {}", header.name, peer.identity, e);
            ctx.emit(NodeEvent::TransferFailed {
                from: peer.identity.clone(),
                name: header.name,
                error: e.to_string(),
            })
            .await;
        }
    }
    Ok(())
}
