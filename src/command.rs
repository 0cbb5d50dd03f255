//! Interactive command parsing
//!
//! Turns one line of user input into a `Command`. Both the Chinese
//! commands and English aliases are accepted.

use std::path::PathBuf;

/// A user request read from the terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text to every peer
    Broadcast(String),
    /// `:<peer> <text>`
    SendTo { peer: String, text: String },
    /// `:<peer> sendfile:<path>`
    SendFileTo { peer: String, path: PathBuf },
    /// `sendfile:<path>`
    SendFileAll(PathBuf),
    /// `sendall`: the whole upload area as one batch
    SendAll,
    /// `:列表` / `:list`
    ListPeers,
    /// `:开启文件传输` / `:transfer on`
    EnableTransfer,
    /// `:停止文件传输` / `:transfer off`
    DisableTransfer,
    /// `:connect <addr>`
    Connect(String),
    /// `退出` / `:quit`
    Quit,
}

const SENDFILE_PREFIX: &str = "sendfile:";

/// Text sent for a direct message, so the receiver can tell it from a
/// broadcast
pub fn direct_message(from: &str, text: &str) -> String {
    format!("{} 对你说: {}", from, text)
}

/// Parse one input line; blank lines yield `None`
pub fn parse(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.eq_ignore_ascii_case("sendall") {
        return Some(Command::SendAll);
    }
    if let Some(path) = strip_sendfile(line) {
        return Some(Command::SendFileAll(path));
    }

    match line {
        "退出" | ":quit" => return Some(Command::Quit),
        ":列表" | ":list" => return Some(Command::ListPeers),
        ":开启文件传输" | ":transfer on" => return Some(Command::EnableTransfer),
        ":停止文件传输" | ":transfer off" => return Some(Command::DisableTransfer),
        _ => {}
    }

    if let Some(addr) = line.strip_prefix(":connect ") {
        return Some(Command::Connect(addr.trim().to_string()));
    }

    if let Some(rest) = line.strip_prefix(':') {
        if let Some((peer, content)) = rest.split_once(' ') {
            let content = content.trim();
            if !peer.is_empty() && !content.is_empty() {
                let peer = peer.to_string();
                return Some(match strip_sendfile(content) {
                    Some(path) => Command::SendFileTo { peer, path },
                    None => Command::SendTo {
                        peer,
                        text: content.to_string(),
                    },
                });
            }
        }
    }

    Some(Command::Broadcast(line.to_string()))
}

/// `sendfile:<path>`, prefix matched case-insensitively
fn strip_sendfile(text: &str) -> Option<PathBuf> {
    let prefix = text.get(..SENDFILE_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(SENDFILE_PREFIX) {
        return None;
    }
    let path = text[SENDFILE_PREFIX.len()..].trim();
    (!path.is_empty()).then(|| PathBuf::from(path))
}
