//! LAN discovery: periodic UDP broadcast of our presence, and a listener
//! feeding the peer registry.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use lanshare_core::protocol::{self, Announcement};
use lanshare_core::PeerRegistry;
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::events::{EventSender, NodeEvent};

pub type SharedPeers = Arc<Mutex<PeerRegistry>>;

/// Gap between two presence announcements.
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(3000);

/// Announce our presence every [`BROADCAST_INTERVAL`] until shutdown. Send
/// failures are ignored; the timer keeps running. Callers skip this loop
/// entirely when no local IP could be resolved.
pub async fn broadcast_loop(
    nickname: String,
    local_ip: String,
    discovery_port: u16,
    mut shutdown: watch::Receiver<bool>,
) {
    let socket = match UdpSocket::bind(("0.0.0.0", 0)).await {
        Ok(s) => s,
        Err(err) => {
            warn!(error = %err, "cannot open broadcast socket");
            return;
        }
    };
    if let Err(err) = socket.set_broadcast(true) {
        warn!(error = %err, "cannot enable broadcast");
        return;
    }
    let line = match protocol::encode_line(&Announcement::new(&nickname, &local_ip)) {
        Ok(line) => line,
        Err(err) => {
            warn!(error = %err, "cannot encode announcement");
            return;
        }
    };
    info!(ip = %local_ip, port = discovery_port, "broadcasting presence");
    let mut timer = tokio::time::interval(BROADCAST_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = timer.tick() => {
                let _ = socket
                    .send_to(line.as_bytes(), (Ipv4Addr::BROADCAST, discovery_port))
                    .await;
            }
        }
    }
}

/// Receive announcements until shutdown. Malformed datagrams, foreign magic
/// and our own nickname are dropped without error.
pub async fn listen_loop(
    nickname: String,
    discovery_port: u16,
    peers: SharedPeers,
    events: EventSender,
    mut shutdown: watch::Receiver<bool>,
) {
    let socket = match UdpSocket::bind(("0.0.0.0", discovery_port)).await {
        Ok(s) => s,
        Err(err) => {
            warn!(port = discovery_port, error = %err, "cannot bind discovery port");
            return;
        }
    };
    info!(port = discovery_port, "listening for peers");
    let mut buf = vec![0u8; protocol::DISCOVERY_BUFFER];
    loop {
        let recv = tokio::select! {
            _ = shutdown.changed() => return,
            r = socket.recv_from(&mut buf) => r,
        };
        match recv {
            Ok((n, from)) => {
                let Ok(text) = std::str::from_utf8(&buf[..n]) else {
                    continue;
                };
                let Ok(announcement) = serde_json::from_str::<Announcement>(text.trim()) else {
                    continue;
                };
                if !announcement.accepted_by(&nickname) {
                    continue;
                }
                debug!(from = %from, nickname = %announcement.nickname, "announcement");
                register_peer(&peers, &events, &announcement.nickname, &announcement.ip).await;
            }
            Err(err) => {
                debug!(error = %err, "discovery recv error");
            }
        }
    }
}

/// Record a peer and report it upward. The registry keeps the first record
/// for a nickname; the event fires for every accepted sighting so the host
/// can refresh its own list.
pub(crate) async fn register_peer(
    peers: &SharedPeers,
    events: &EventSender,
    nickname: &str,
    ip: &str,
) {
    let is_new = peers.lock().await.insert(nickname, ip);
    if is_new {
        info!(nickname, ip, "discovered peer");
    }
    let _ = events.send(NodeEvent::PeerDiscovered {
        nickname: nickname.to_string(),
        ip: ip.to_string(),
    });
}
