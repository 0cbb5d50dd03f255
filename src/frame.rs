//! Wire protocol definitions
//!
//! Three frame kinds share one raw byte stream:
//!
//! ```text
//! Text:           <first byte != 0x01><up to 1023 more bytes of UTF-8>
//! BatchAnnounce:  a Text frame reading "BATCH_FILES:<n>"
//! File:           0x01 <name_len u32 BE> <name> <size u64 BE> <size raw bytes>
//! ```
//!
//! There is no length prefix around a text frame. A text frame is whatever a
//! single read returns, so a message only round-trips when it fits into one
//! 1024-byte read and is not coalesced with a following text frame.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::NodeError;

/// Tag byte that starts every file frame
pub const FILE_TAG: u8 = 0x01;

/// Size of a single socket read or write
pub const CHUNK_SIZE: usize = 1024;

/// Longest text payload that survives a round trip
pub const MAX_TEXT_LEN: usize = CHUNK_SIZE - 1;

/// Longest accepted file name on the wire
pub const MAX_NAME_LEN: u32 = 4096;

/// Prefix of a batch announcement
pub const BATCH_PREFIX: &str = "BATCH_FILES:";

/// Decoded frame
///
/// `File` carries only the header: the payload stays on the stream and must
/// be consumed by `transfer::receive_file` before the next frame is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Chat text
    Text(String),
    /// Exactly this many file frames follow
    BatchAnnounce(u32),
    /// File header, payload follows
    File(FileHeader),
}

/// Header of a file frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub name: String,
    pub size: u64,
}

impl Frame {
    /// Classify decoded text as chat or batch announcement
    pub fn from_text(text: String) -> Self {
        match parse_batch_count(&text) {
            Some(count) => Frame::BatchAnnounce(count),
            None => Frame::Text(text),
        }
    }
}

/// Parse `BATCH_FILES:<n>`, returning `n`
pub fn parse_batch_count(text: &str) -> Option<u32> {
    text.strip_prefix(BATCH_PREFIX)?.trim().parse().ok()
}

/// Encode a chat message as a text frame
pub fn encode_text(text: &str) -> Result<Vec<u8>, NodeError> {
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return Err(NodeError::InvalidMessage("empty message"));
    }
    if bytes.len() > MAX_TEXT_LEN {
        return Err(NodeError::MessageTooLong(bytes.len()));
    }
    if bytes.contains(&FILE_TAG) {
        return Err(NodeError::InvalidMessage("message contains the file tag byte"));
    }
    if parse_batch_count(text).is_some() {
        return Err(NodeError::InvalidMessage("message looks like a batch announcement"));
    }
    Ok(bytes.to_vec())
}

/// Encode a batch announcement for `count` files
pub fn encode_batch_announce(count: u32) -> Vec<u8> {
    format!("{}{}", BATCH_PREFIX, count).into_bytes()
}

/// Encode a file frame header (tag, name length, name, size)
pub fn encode_file_header(header: &FileHeader) -> Result<Vec<u8>, NodeError> {
    let name = header.name.as_bytes();
    if name.is_empty() || name.len() > MAX_NAME_LEN as usize {
        return Err(NodeError::InvalidFileName(header.name.clone()));
    }

    let mut out = Vec::with_capacity(1 + 4 + name.len() + 8);
    out.push(FILE_TAG);
    out.extend_from_slice(&(name.len() as u32).to_be_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(&header.size.to_be_bytes());
    Ok(out)
}

/// Frame decoder over a raw byte stream
///
/// Keeps a push-back buffer for bytes that one read returned beyond the end
/// of a text frame.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
        }
    }

    /// Decode the next frame
    ///
    /// For `Frame::File` the payload is left unread.
    pub async fn read_frame(&mut self) -> Result<Frame, NodeError> {
        let mut buf = [0u8; CHUNK_SIZE];
        let n = self.read_some(&mut buf).await?;

        if buf[0] == FILE_TAG {
            self.unread(&buf[1..n]);
            return self.read_file_header().await.map(Frame::File);
        }

        // A file frame may follow a text frame inside the same read
        let end = buf[..n].iter().position(|&b| b == FILE_TAG).unwrap_or(n);
        self.unread(&buf[end..n]);

        let text = String::from_utf8_lossy(&buf[..end]).into_owned();
        Ok(Frame::from_text(text))
    }

    /// Read up to `buf.len()` payload bytes
    ///
    /// Never returns zero; end-of-stream is `ConnectionClosed`.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, NodeError> {
        self.read_some(buf).await
    }

    async fn read_file_header(&mut self) -> Result<FileHeader, NodeError> {
        let mut len_buf = [0u8; 4];
        self.read_field(&mut len_buf).await?;
        let name_len = u32::from_be_bytes(len_buf);
        if name_len == 0 || name_len > MAX_NAME_LEN {
            return Err(NodeError::ProtocolDesync(format!(
                "file name length {} out of range",
                name_len
            )));
        }

        let mut name = vec![0u8; name_len as usize];
        self.read_field(&mut name).await?;
        let name = String::from_utf8(name)
            .map_err(|_| NodeError::ProtocolDesync("file name is not valid UTF-8".to_string()))?;

        let mut size_buf = [0u8; 8];
        self.read_field(&mut size_buf).await?;

        Ok(FileHeader {
            name,
            size: u64::from_be_bytes(size_buf),
        })
    }

    /// Fill `buf` completely, looping over short reads
    async fn read_field(&mut self, buf: &mut [u8]) -> Result<(), NodeError> {
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read_some(&mut buf[filled..]).await?;
        }
        Ok(())
    }

    /// One read, served from the push-back buffer first
    async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, NodeError> {
        if !self.pending.is_empty() {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Ok(n);
        }

        match self.inner.read(buf).await {
            Ok(0) => Err(NodeError::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(e) => Err(NodeError::from_read(e)),
        }
    }

    fn unread(&mut self, bytes: &[u8]) {
        if !bytes.is_empty() {
            let mut restored = bytes.to_vec();
            restored.extend_from_slice(&self.pending);
            self.pending = restored;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn file_frame(name: &str, payload: &[u8]) -> Vec<u8> {
        let mut out = encode_file_header(&FileHeader {
            name: name.to_string(),
            size: payload.len() as u64,
        })
        .unwrap();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_batch_pattern() {
        assert_eq!(parse_batch_count("BATCH_FILES:3"), Some(3));
        assert_eq!(parse_batch_count("BATCH_FILES: 12 "), Some(12));
        assert_eq!(parse_batch_count("BATCH_FILES:x"), None);
        assert_eq!(parse_batch_count("hello"), None);
        assert_eq!(Frame::from_text("BATCH_FILES:0".into()), Frame::BatchAnnounce(0));
    }

    #[test]
    fn test_encode_text_rejects_unframeable() {
        assert!(matches!(encode_text(""), Err(NodeError::InvalidMessage(_))));
        assert!(matches!(
            encode_text(&"a".repeat(MAX_TEXT_LEN + 1)),
            Err(NodeError::MessageTooLong(1024))
        ));
        assert!(matches!(encode_text("\u{1}hi"), Err(NodeError::InvalidMessage(_))));
        assert!(matches!(
            encode_text("BATCH_FILES:2"),
            Err(NodeError::InvalidMessage(_))
        ));
        assert!(encode_text(&"a".repeat(MAX_TEXT_LEN)).is_ok());
    }

    #[test]
    fn test_file_header_layout() {
        let bytes = encode_file_header(&FileHeader {
            name: "ab".to_string(),
            size: 258,
        })
        .unwrap();
        assert_eq!(
            bytes,
            vec![0x01, 0, 0, 0, 2, b'a', b'b', 0, 0, 0, 0, 0, 0, 1, 2]
        );
    }

    #[tokio::test]
    async fn test_text_round_trip() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let mut reader = FrameReader::new(rx);

        let longest = "z".repeat(MAX_TEXT_LEN);
        for text in ["hello", "你好，世界", longest.as_str()] {
            tx.write_all(&encode_text(text).unwrap()).await.unwrap();
            assert_eq!(reader.read_frame().await.unwrap(), Frame::Text(text.to_string()));
        }
    }

    #[tokio::test]
    async fn test_text_followed_by_file_in_one_read() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let mut reader = FrameReader::new(rx);

        let mut bytes = encode_batch_announce(1);
        bytes.extend(file_frame("a.txt", b"abc"));
        bytes.extend(encode_text("after").unwrap());
        tx.write_all(&bytes).await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap(), Frame::BatchAnnounce(1));
        let header = match reader.read_frame().await.unwrap() {
            Frame::File(h) => h,
            other => panic!("expected file frame, got {:?}", other),
        };
        assert_eq!(header.name, "a.txt");
        assert_eq!(header.size, 3);

        let mut payload = [0u8; 3];
        let n = reader.read_chunk(&mut payload).await.unwrap();
        assert_eq!(&payload[..n], &b"abc"[..n]);
        assert_eq!(n, 3);

        assert_eq!(reader.read_frame().await.unwrap(), Frame::Text("after".to_string()));
    }

    #[tokio::test]
    async fn test_file_header_split_across_reads() {
        // A 3-byte pipe forces every field to arrive in pieces
        let (mut tx, rx) = tokio::io::duplex(3);
        let bytes = file_frame("report.bin", b"");
        let writer = tokio::spawn(async move {
            tx.write_all(&bytes).await.unwrap();
        });

        let mut reader = FrameReader::new(rx);
        let frame = reader.read_frame().await.unwrap();
        writer.await.unwrap();

        assert_eq!(
            frame,
            Frame::File(FileHeader {
                name: "report.bin".to_string(),
                size: 0,
            })
        );
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let (tx, rx) = tokio::io::duplex(64);
        drop(tx);
        let mut reader = FrameReader::new(rx);
        assert!(matches!(reader.read_frame().await, Err(NodeError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_truncated_header_is_end_of_stream() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tx.write_all(&[FILE_TAG, 0, 0]).await.unwrap();
        drop(tx);
        let mut reader = FrameReader::new(rx);
        assert!(matches!(reader.read_frame().await, Err(NodeError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_absurd_name_length_is_desync() {
        let (mut tx, rx) = tokio::io::duplex(64);
        tx.write_all(&[FILE_TAG, 0xff, 0xff, 0xff, 0xff]).await.unwrap();
        let mut reader = FrameReader::new(rx);
        assert!(matches!(
            reader.read_frame().await,
            Err(NodeError::ProtocolDesync(_))
        ));
    }
}
