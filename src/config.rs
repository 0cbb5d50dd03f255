//! Node configuration
//!
//! Defaults, then an optional TOML file, then `PEER_CHAT_*` environment
//! overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Node configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Local identity sent in handshakes
    pub identity: Option<String>,
    /// Address to accept peers on; no listener when unset
    pub listen: Option<SocketAddr>,
    /// Peers to connect to at startup
    pub connect: Vec<String>,
    /// Directory of files eligible for batch send
    pub upload_dir: PathBuf,
    /// Directory received files are written into
    pub download_dir: PathBuf,
    /// Pause after a batch announcement before the first file frame
    pub batch_announce_delay_ms: u64,
    /// Upper bound on the identity exchange
    pub handshake_timeout_secs: u64,
    /// Capacity of the display event channel
    pub event_buffer: usize,
    /// Initial value of the file transfer toggle
    pub transfer_enabled: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: None,
            listen: None,
            connect: Vec::new(),
            upload_dir: PathBuf::from("uploads"),
            download_dir: PathBuf::from("downloads"),
            batch_announce_delay_ms: 100,
            handshake_timeout_secs: 10,
            event_buffer: 256,
            transfer_enabled: false,
        }
    }
}

impl NodeConfig {
    /// Load config: defaults, then `path` (if given), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `PEER_CHAT_*` overrides using `lookup` to read variables
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PEER_CHAT_IDENTITY") {
            self.identity = Some(v);
        }
        if let Some(v) = lookup("PEER_CHAT_LISTEN") {
            self.listen = Some(parse_env("PEER_CHAT_LISTEN", v)?);
        }
        if let Some(v) = lookup("PEER_CHAT_CONNECT") {
            self.connect = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("PEER_CHAT_UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PEER_CHAT_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PEER_CHAT_BATCH_DELAY_MS") {
            self.batch_announce_delay_ms = parse_env("PEER_CHAT_BATCH_DELAY_MS", v)?;
        }
        if let Some(v) = lookup("PEER_CHAT_HANDSHAKE_TIMEOUT_SECS") {
            self.handshake_timeout_secs = parse_env("PEER_CHAT_HANDSHAKE_TIMEOUT_SECS", v)?;
        }
        Ok(())
    }

    pub fn batch_announce_delay(&self) -> Duration {
        Duration::from_millis(self.batch_announce_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { var, value })
}
