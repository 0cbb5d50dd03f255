//! Error types for the chat node
//!
//! Defines connection, transfer and configuration errors.
//! Uses thiserror for ergonomic error definitions.

use std::io;

use thiserror::Error;

/// Node-level errors
///
/// Covers both fatal errors (the session for that peer ends) and
/// local errors that abort a single transfer or a single user request.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Peer closed the stream (zero-length read)
    #[error("connection closed")]
    ConnectionClosed,

    /// Peer vanished abruptly
    #[error("connection reset: {0}")]
    ConnectionReset(#[source] io::Error),

    /// Any other socket read failure
    #[error("connection error: {0}")]
    Connection(#[source] io::Error),

    /// Writing to a peer socket failed
    #[error("send failed: {0}")]
    SendFailure(#[source] io::Error),

    /// Local file read/write failure during a transfer
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The byte stream no longer lines up with the framing
    #[error("protocol desync: {0}")]
    ProtocolDesync(String),

    /// No connected peer has the given identity
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// The local file transfer toggle is off
    #[error("file transfer is disabled")]
    TransferDisabled,

    /// Text payload does not fit into a single text frame
    #[error("message too long: {0} bytes")]
    MessageTooLong(usize),

    /// Text payload cannot be framed as text
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    /// File name is not a plain file name
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    /// Local identity cannot be sent in a handshake
    #[error("invalid identity: {0}")]
    InvalidIdentity(&'static str),

    /// Identity exchange failed
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl NodeError {
    /// Classify an error returned by a socket read
    pub fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => NodeError::ConnectionClosed,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => NodeError::ConnectionReset(err),
            _ => NodeError::Connection(err),
        }
    }

    /// Whether the connection that produced this error must be abandoned
    ///
    /// Local file errors and request validation errors leave the stream intact.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            NodeError::ConnectionClosed
                | NodeError::ConnectionReset(_)
                | NodeError::Connection(_)
                | NodeError::SendFailure(_)
                | NodeError::ProtocolDesync(_)
        )
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Config file is not valid TOML for `NodeConfig`
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment override has an unusable value
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_error_classification() {
        let reset = NodeError::from_read(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(matches!(reset, NodeError::ConnectionReset(_)));

        let eof = NodeError::from_read(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(matches!(eof, NodeError::ConnectionClosed));

        let other = NodeError::from_read(io::Error::from(io::ErrorKind::Other));
        assert!(matches!(other, NodeError::Connection(_)));
    }

    #[test]
    fn test_fatal_errors() {
        assert!(NodeError::ConnectionClosed.is_connection_fatal());
        assert!(NodeError::ProtocolDesync("x".to_string()).is_connection_fatal());
        assert!(!NodeError::Io(io::Error::from(io::ErrorKind::NotFound)).is_connection_fatal());
        assert!(!NodeError::TransferDisabled.is_connection_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = NodeError::PeerNotFound("bob".to_string());
        assert_eq!(err.to_string(), "Peer not found: bob");
    }
}
