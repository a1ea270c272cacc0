//! One-shot identity exchange with a peer reached via a scanned connection
//! code (a string payload carrying an IP address). Both sides treat any
//! failure as a silently abandoned attempt.

use std::net::IpAddr;

use lanshare_core::protocol::{self, HandshakeMessage};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::discovery::{register_peer, SharedPeers};
use crate::events::EventSender;
use crate::server::read_header_line;
use crate::session::TransferError;

/// Connect to a scanned IP, introduce ourselves, read the peer's identity
/// and register it. One exchange, then the connection closes.
pub async fn initiate(
    target_ip: &str,
    transfer_port: u16,
    nickname: &str,
    local_ip: &str,
    peers: &SharedPeers,
    events: &EventSender,
) -> Result<(), TransferError> {
    let stream = TcpStream::connect((target_ip, transfer_port)).await?;
    let mut conn = BufReader::new(stream);
    let hello = HandshakeMessage::Hello {
        nickname: nickname.to_string(),
        ip: local_ip.to_string(),
        device_type: "desktop".to_string(),
    };
    conn.write_all(protocol::encode_line(&hello)?.as_bytes())
        .await?;
    let line = read_header_line(&mut conn).await?.unwrap_or_default();
    match serde_json::from_str::<HandshakeMessage>(line.trim()) {
        Ok(HandshakeMessage::Reply { nickname, ip, .. }) => {
            let peer_ip = if ip.is_empty() {
                target_ip.to_string()
            } else {
                ip
            };
            register_peer(peers, events, &nickname, &peer_ip).await;
            Ok(())
        }
        _ => Err(protocol::ProtocolError::Malformed.into()),
    }
}

/// Answer a hello that arrived on the transfer port: register the peer under
/// its socket address and send back our identity.
pub async fn respond(
    mut conn: BufReader<TcpStream>,
    remote_ip: IpAddr,
    peer_nickname: String,
    peer_device_type: String,
    nickname: &str,
    local_ip: &str,
    peers: &SharedPeers,
    events: &EventSender,
) {
    debug!(nickname = %peer_nickname, device = %peer_device_type, ip = %remote_ip, "handshake hello");
    register_peer(peers, events, &peer_nickname, &remote_ip.to_string()).await;
    let reply = HandshakeMessage::Reply {
        nickname: nickname.to_string(),
        ip: local_ip.to_string(),
        device_type: "desktop".to_string(),
        status: "connected".to_string(),
    };
    match protocol::encode_line(&reply) {
        Ok(line) => {
            if let Err(err) = conn.write_all(line.as_bytes()).await {
                debug!(error = %err, "handshake reply not delivered");
            }
            let _ = conn.shutdown().await;
        }
        Err(err) => debug!(error = %err, "handshake reply not encoded"),
    }
}
