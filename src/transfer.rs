//! File transfer engine
//!
//! Streams a file out as one file frame, or drains an announced file frame's
//! payload from a connection into the download area.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info};

use crate::error::NodeError;
use crate::frame::{encode_file_header, FileHeader, FrameReader, CHUNK_SIZE};

/// A local file opened and sized for sending
///
/// Opening happens before any header byte is written, so a file that cannot
/// be read never touches the stream.
#[derive(Debug)]
pub struct OutgoingFile {
    header: FileHeader,
    file: File,
}

impl OutgoingFile {
    /// Open `path` and stat it for its size
    pub async fn open(path: &Path) -> Result<Self, NodeError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| NodeError::InvalidFileName(path.display().to_string()))?
            .to_string();

        let file = File::open(path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(NodeError::InvalidFileName(path.display().to_string()));
        }

        Ok(Self {
            header: FileHeader {
                name,
                size: metadata.len(),
            },
            file,
        })
    }
}

/// Send the file at `path` as one file frame
///
/// Returns the number of payload bytes written.
pub async fn send_file<W>(writer: &mut W, path: &Path) -> Result<u64, NodeError>
where
    W: AsyncWrite + Unpin,
{
    let outgoing = OutgoingFile::open(path).await?;
    send_prepared(writer, outgoing).await
}

/// Send an already opened file as one file frame
///
/// Exactly `size` payload bytes are written. If the local file fails or
/// shrinks mid-transfer the rest is zero-filled and the local error returned.
pub async fn send_prepared<W>(writer: &mut W, outgoing: OutgoingFile) -> Result<u64, NodeError>
where
    W: AsyncWrite + Unpin,
{
    let OutgoingFile { header, mut file } = outgoing;
    let header_bytes = encode_file_header(&header)?;
    writer
        .write_all(&header_bytes)
        .await
        .map_err(NodeError::SendFailure)?;

    let mut buf = [0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    let mut local_error = None;

    while sent < header.size {
        let want = chunk_len(header.size - sent);
        let n = match file.read(&mut buf[..want]).await {
            Ok(0) => {
                local_error = Some(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "file shrank during transfer",
                ));
                break;
            }
            Ok(n) => n,
            Err(e) => {
                local_error = Some(e);
                break;
            }
        };
        writer
            .write_all(&buf[..n])
            .await
            .map_err(NodeError::SendFailure)?;
        sent += n as u64;
    }

    if let Some(e) = local_error {
        error!(
            "Reading {} failed after {} of {} bytes: {}",
            header.name, sent, header.size, e
        );
        let zeros = [0u8; CHUNK_SIZE];
        while sent < header.size {
            let n = chunk_len(header.size - sent);
            writer
                .write_all(&zeros[..n])
                .await
                .map_err(NodeError::SendFailure)?;
            sent += n as u64;
        }
        writer.flush().await.map_err(NodeError::SendFailure)?;
        return Err(NodeError::Io(e));
    }

    writer.flush().await.map_err(NodeError::SendFailure)?;
    info!("File {} sent ({} bytes)", header.name, header.size);
    Ok(header.size)
}

/// Drain the payload announced by `header`
///
/// When `dest` is `Some` the bytes are written there (overwriting any existing
/// file), otherwise they are discarded. Exactly `header.size` bytes are always
/// consumed from the stream, even if the destination fails, so the next frame
/// stays aligned. Connection errors are returned immediately; a local write
/// failure is returned once the payload is fully drained and leaves the
/// partial file on disk.
pub async fn receive_file<R>(
    reader: &mut FrameReader<R>,
    header: &FileHeader,
    dest: Option<&Path>,
) -> Result<u64, NodeError>
where
    R: AsyncRead + Unpin,
{
    let mut local_error = None;
    let mut file = match dest {
        Some(path) => match File::create(path).await {
            Ok(f) => Some(f),
            Err(e) => {
                local_error = Some(e);
                None
            }
        },
        None => None,
    };

    let mut buf = [0u8; CHUNK_SIZE];
    let mut received: u64 = 0;
    while received < header.size {
        let want = chunk_len(header.size - received);
        let n = reader.read_chunk(&mut buf[..want]).await?;
        received += n as u64;

        if let Some(f) = file.as_mut() {
            if let Err(e) = f.write_all(&buf[..n]).await {
                local_error = Some(e);
                file = None;
            }
        }
    }

    if let Some(mut f) = file {
        if let Err(e) = f.flush().await {
            local_error = Some(e);
        }
    }

    match local_error {
        Some(e) => Err(NodeError::Io(e)),
        None => {
            debug!("Drained {} bytes for {}", received, header.name);
            Ok(received)
        }
    }
}

/// Resolve a received file name inside the download area
///
/// Only plain file names are accepted.
pub fn download_path(dir: &Path, name: &str) -> Result<PathBuf, NodeError> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| matches!(c, '/' | '\\' | '\0'));
    if !plain {
        return Err(NodeError::InvalidFileName(name.to_string()));
    }
    Ok(dir.join(name))
}

fn chunk_len(remaining: u64) -> usize {
    remaining.min(CHUNK_SIZE as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_text, Frame};
    use tempfile::TempDir;

    fn pattern(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i % 251) as u8).collect()
    }

    async fn transfer_once(size: usize) {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join(format!("src-{}.bin", size));
        let dst = dir.path().join("dst.bin");
        let data = pattern(size);
        std::fs::write(&src, &data).unwrap();

        let (mut tx, rx) = tokio::io::duplex(256);
        let sender = async {
            let n = send_file(&mut tx, &src).await.unwrap();
            tx.write_all(&encode_text("next").unwrap()).await.unwrap();
            n
        };
        let receiver = async {
            let mut reader = FrameReader::new(rx);
            let header = match reader.read_frame().await.unwrap() {
                Frame::File(h) => h,
                other => panic!("expected file frame, got {:?}", other),
            };
            let n = receive_file(&mut reader, &header, Some(dst.as_path())).await.unwrap();
            let next = reader.read_frame().await.unwrap();
            (header, n, next)
        };

        let (sent, (header, received, next)) = tokio::join!(sender, receiver);
        assert_eq!(sent, size as u64);
        assert_eq!(received, size as u64);
        assert_eq!(header.size, size as u64);
        assert_eq!(std::fs::read(&dst).unwrap(), data);
        // The payload never swallows the following frame
        assert_eq!(next, Frame::Text("next".to_string()));
    }

    #[tokio::test]
    async fn test_transfer_sizes() {
        for size in [0, 1, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1, 10 * CHUNK_SIZE + 17] {
            transfer_once(size).await;
        }
    }

    #[tokio::test]
    async fn test_receive_without_destination_discards() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, pattern(3000)).unwrap();

        let (mut tx, rx) = tokio::io::duplex(8192);
        send_file(&mut tx, &src).await.unwrap();
        tx.write_all(&encode_text("still in sync").unwrap()).await.unwrap();

        let mut reader = FrameReader::new(rx);
        let Frame::File(header) = reader.read_frame().await.unwrap() else {
            panic!("expected file frame");
        };
        assert_eq!(receive_file(&mut reader, &header, None).await.unwrap(), 3000);
        assert_eq!(
            reader.read_frame().await.unwrap(),
            Frame::Text("still in sync".to_string())
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_unwritable_destination_still_drains() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a.bin");
        std::fs::write(&src, pattern(1500)).unwrap();
        let missing = dir.path().join("no-such-dir").join("a.bin");

        let (mut tx, rx) = tokio::io::duplex(8192);
        send_file(&mut tx, &src).await.unwrap();
        tx.write_all(&encode_text("after").unwrap()).await.unwrap();

        let mut reader = FrameReader::new(rx);
        let Frame::File(header) = reader.read_frame().await.unwrap() else {
            panic!("expected file frame");
        };
        let result = receive_file(&mut reader, &header, Some(missing.as_path())).await;
        assert!(matches!(result, Err(NodeError::Io(_))));
        assert_eq!(reader.read_frame().await.unwrap(), Frame::Text("after".to_string()));
    }

    #[tokio::test]
    async fn test_missing_source_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        let result = send_file(&mut out, &dir.path().join("missing.txt")).await;
        assert!(matches!(result, Err(NodeError::Io(_))));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_directory_is_not_sendable() {
        let dir = TempDir::new().unwrap();
        let mut out = Vec::new();
        let result = send_file(&mut out, dir.path()).await;
        assert!(result.is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_download_path_rejects_traversal() {
        let dir = Path::new("/downloads");
        assert_eq!(
            download_path(dir, "report.bin").unwrap(),
            PathBuf::from("/downloads/report.bin")
        );
        for bad in ["", ".", "..", "../etc/passwd", "a/b", "a\\b"] {
            assert!(
                matches!(download_path(dir, bad), Err(NodeError::InvalidFileName(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }
}
