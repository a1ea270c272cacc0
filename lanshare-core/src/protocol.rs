//! Wire protocol: JSON line headers for discovery, handshake and transfer.

use serde::{Deserialize, Serialize};

/// Magic token carried by every discovery datagram. Datagrams without it are
/// not ours and are ignored.
pub const BROADCAST_MAGIC: &str = "c0d3-p2p-share-v1";

/// Default UDP port for presence announcements.
pub const DISCOVERY_PORT: u16 = 65431;

/// Default TCP port for transfers and handshakes (disambiguated by header).
pub const TRANSFER_PORT: u16 = 65432;

/// Max receive size for one discovery datagram.
pub const DISCOVERY_BUFFER: usize = 1024;

/// Upper bound for a single header line; longer lines are malformed.
pub const MAX_HEADER_LEN: usize = 4096;

/// Control response accepting an offered transfer.
pub const ACCEPT: &str = "ACCEPT";

/// Control response declining an offered transfer.
pub const REJECT: &str = "REJECT";

/// Presence announcement broadcast over UDP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub magic: String,
    pub nickname: String,
    pub ip: String,
    #[serde(default)]
    pub device_type: String,
}

impl Announcement {
    pub fn new(nickname: &str, ip: &str) -> Self {
        Self {
            magic: BROADCAST_MAGIC.to_string(),
            nickname: nickname.to_string(),
            ip: ip.to_string(),
            device_type: "desktop".to_string(),
        }
    }

    /// A datagram is accepted only with the right magic and a foreign nickname.
    pub fn accepted_by(&self, self_nickname: &str) -> bool {
        self.magic == BROADCAST_MAGIC && self.nickname != self_nickname
    }
}

/// What a transfer carries: a single file, or a packed directory archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Directory,
}

/// First line of a transfer connection. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub filename: String,
    pub filesize: u64,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub sender_nickname: String,
}

/// One-shot identity exchange messages (QR connect flow).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HandshakeMessage {
    #[serde(rename = "qr_handshake")]
    Hello {
        nickname: String,
        ip: String,
        #[serde(default)]
        device_type: String,
    },
    #[serde(rename = "qr_handshake_response")]
    Reply {
        nickname: String,
        ip: String,
        #[serde(default)]
        device_type: String,
        #[serde(default)]
        status: String,
    },
}

/// Classified first line of an inbound TCP connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    Handshake { nickname: String, device_type: String },
    Transfer(TransferMetadata),
    Malformed,
}

/// Classify a header line. One explicit step so the server dispatches on a
/// tagged variant instead of probing fields inline.
pub fn classify_header(line: &str) -> Header {
    let line = line.trim();
    if line.is_empty() || line.len() > MAX_HEADER_LEN {
        return Header::Malformed;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
        return Header::Malformed;
    };
    if value.get("type").and_then(|t| t.as_str()) == Some("qr_handshake") {
        return match serde_json::from_value::<HandshakeMessage>(value) {
            Ok(HandshakeMessage::Hello {
                nickname,
                device_type,
                ..
            }) => Header::Handshake {
                nickname,
                device_type,
            },
            _ => Header::Malformed,
        };
    }
    match serde_json::from_value::<TransferMetadata>(value) {
        Ok(meta) => Header::Transfer(meta),
        Err(_) => Header::Malformed,
    }
}

/// Encode a header as one newline-terminated JSON line.
pub fn encode_line<T: Serialize>(msg: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Error encoding or decoding a wire header.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("malformed header")]
    Malformed,
}
