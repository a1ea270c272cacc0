//! Transfer server: accept loop, one task per connection, explicit header
//! classification, and the pending-transfer registry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use lanshare_core::protocol::{self, classify_header, Header, TransferMetadata};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use crate::discovery::SharedPeers;
use crate::events::{EventSender, NodeEvent};
use crate::handshake;

/// An inbound transfer parked until the host accepts or rejects it. The
/// connection stays open with the body unread (any bytes that arrived with
/// the header wait in the reader's buffer).
pub struct PendingTransfer {
    pub conn: BufReader<TcpStream>,
    pub metadata: TransferMetadata,
    pub raw_header: String,
}

/// Registry of pending transfers. Inserted by the accept loop, removed
/// exactly once by the decision handler.
pub type PendingMap = Arc<Mutex<HashMap<Uuid, PendingTransfer>>>;

/// Read one newline-terminated line, capped at
/// [`protocol::MAX_HEADER_LEN`] bytes so a peer cannot grow the buffer
/// without bound. `None` means the peer closed before sending anything; an
/// overlong, unterminated or non-UTF-8 line comes back empty so the caller's
/// parser treats it as malformed.
pub(crate) async fn read_header_line(
    conn: &mut BufReader<TcpStream>,
) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    let n = (&mut *conn)
        .take(protocol::MAX_HEADER_LEN as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.len() > protocol::MAX_HEADER_LEN || buf.last() != Some(&b'\n') {
        return Ok(Some(String::new()));
    }
    Ok(Some(String::from_utf8(buf).unwrap_or_default()))
}

/// Accept connections until shutdown, spawning one classification task each.
pub async fn run_server(
    listener: TcpListener,
    nickname: String,
    local_ip: String,
    peers: SharedPeers,
    pending: PendingMap,
    events: EventSender,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => return,
            r = listener.accept() => r,
        };
        match accepted {
            Ok((stream, addr)) => {
                let nickname = nickname.clone();
                let local_ip = local_ip.clone();
                let peers = peers.clone();
                let pending = pending.clone();
                let events = events.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    handle_connection(
                        stream, addr, nickname, local_ip, peers, pending, events, shutdown,
                    )
                    .await;
                });
            }
            Err(err) => {
                debug!(error = %err, "accept error");
            }
        }
    }
}

/// Read one header line and dispatch on its classification. Closed-before-
/// data and malformed headers drop the connection without an error surface.
#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    nickname: String,
    local_ip: String,
    peers: SharedPeers,
    pending: PendingMap,
    events: EventSender,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut conn = BufReader::new(stream);
    let read = tokio::select! {
        _ = shutdown.changed() => return,
        r = read_header_line(&mut conn) => r,
    };
    let line = match read {
        Ok(Some(line)) => line,
        Ok(None) => {
            debug!(peer = %addr, "connection closed before header");
            return;
        }
        Err(err) => {
            debug!(peer = %addr, error = %err, "header read failed");
            return;
        }
    };
    match classify_header(&line) {
        Header::Handshake {
            nickname: peer_nickname,
            device_type,
        } => {
            handshake::respond(
                conn,
                addr.ip(),
                peer_nickname,
                device_type,
                &nickname,
                &local_ip,
                &peers,
                &events,
            )
            .await;
        }
        Header::Transfer(metadata) => {
            let transfer_id = Uuid::new_v4();
            let raw_header = line.trim_end().to_string();
            info!(
                %transfer_id,
                file = %metadata.filename,
                size = metadata.filesize,
                sender = %metadata.sender_nickname,
                "incoming transfer request"
            );
            let request = NodeEvent::IncomingTransferRequest {
                transfer_id,
                filename: metadata.filename.clone(),
                sender_nickname: metadata.sender_nickname.clone(),
                raw_header: raw_header.clone(),
            };
            pending.lock().await.insert(
                transfer_id,
                PendingTransfer {
                    conn,
                    metadata,
                    raw_header,
                },
            );
            let _ = events.send(request);
        }
        Header::Malformed => {
            debug!(peer = %addr, "malformed header, dropping connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanshare_core::PeerRegistry;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    struct Harness {
        port: u16,
        pending: PendingMap,
        peers: SharedPeers,
        rx: mpsc::UnboundedReceiver<NodeEvent>,
        _stop: watch::Sender<bool>,
    }

    async fn start_server(nickname: &str) -> Harness {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let peers: SharedPeers = Arc::new(Mutex::new(PeerRegistry::new()));
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = watch::channel(false);
        tokio::spawn(run_server(
            listener,
            nickname.to_string(),
            "127.0.0.1".to_string(),
            peers.clone(),
            pending.clone(),
            tx,
            stop_rx,
        ));
        Harness {
            port,
            pending,
            peers,
            rx,
            _stop: stop,
        }
    }

    #[tokio::test]
    async fn transfer_header_parks_a_pending_transfer() {
        let mut h = start_server("bob").await;
        let mut client = TcpStream::connect(("127.0.0.1", h.port)).await.unwrap();
        client
            .write_all(
                b"{\"filename\":\"report.pdf\",\"filesize\":1500000,\"type\":\"file\",\"sender_nickname\":\"alice\"}\n",
            )
            .await
            .unwrap();
        let ev = tokio::time::timeout(Duration::from_secs(2), h.rx.recv())
            .await
            .unwrap()
            .unwrap();
        let NodeEvent::IncomingTransferRequest {
            transfer_id,
            filename,
            sender_nickname,
            raw_header,
        } = ev
        else {
            panic!("expected IncomingTransferRequest");
        };
        assert_eq!(filename, "report.pdf");
        assert_eq!(sender_nickname, "alice");
        assert!(raw_header.contains("1500000"));
        let reg = h.pending.lock().await;
        let parked = reg.get(&transfer_id).unwrap();
        assert_eq!(parked.metadata.filesize, 1_500_000);
    }

    #[tokio::test]
    async fn malformed_header_closes_connection_without_event() {
        let mut h = start_server("bob").await;
        let mut client = TcpStream::connect(("127.0.0.1", h.port)).await.unwrap();
        client.write_all(b"{\"filename\":\"x\"}\n").await.unwrap();
        // The server drops the connection; the client sees EOF.
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(
            Duration::from_secs(2),
            tokio::io::AsyncReadExt::read(&mut client, &mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(n, 0);
        assert!(h.rx.try_recv().is_err());
        assert!(h.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn overlong_header_without_newline_is_dropped() {
        let mut h = start_server("bob").await;
        let mut client = TcpStream::connect(("127.0.0.1", h.port)).await.unwrap();
        // Never send a newline: the server must give up at the cap instead
        // of buffering forever.
        let blob = vec![b'a'; protocol::MAX_HEADER_LEN + 1000];
        let _ = client.write_all(&blob).await;
        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(
            Duration::from_secs(2),
            tokio::io::AsyncReadExt::read(&mut client, &mut buf),
        )
        .await
        .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
        assert!(h.rx.try_recv().is_err());
        assert!(h.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn header_line_is_capped() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let mut conn = BufReader::new(server_side);
        let writer = tokio::spawn(async move {
            let _ = client
                .write_all(&vec![b'x'; protocol::MAX_HEADER_LEN + 1])
                .await;
            client
        });
        let line = read_header_line(&mut conn).await.unwrap().unwrap();
        assert!(line.is_empty());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn unterminated_header_line_reads_as_malformed() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let mut conn = BufReader::new(server_side);
        client.write_all(b"{\"truncated\":").await.unwrap();
        client.shutdown().await.unwrap();
        let line = read_header_line(&mut conn).await.unwrap().unwrap();
        assert!(line.is_empty());
    }

    #[tokio::test]
    async fn connection_closed_before_header_is_dropped() {
        let mut h = start_server("bob").await;
        let client = TcpStream::connect(("127.0.0.1", h.port)).await.unwrap();
        drop(client);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.rx.try_recv().is_err());
        assert!(h.pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn handshake_header_registers_peer_and_replies() {
        let mut h = start_server("bob").await;
        let stream = TcpStream::connect(("127.0.0.1", h.port)).await.unwrap();
        let mut conn = BufReader::new(stream);
        conn.write_all(
            b"{\"type\":\"qr_handshake\",\"nickname\":\"phone\",\"ip\":\"10.0.0.9\",\"device_type\":\"android\"}\n",
        )
        .await
        .unwrap();
        let mut reply = String::new();
        tokio::time::timeout(Duration::from_secs(2), conn.read_line(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.contains("qr_handshake_response"));
        assert!(reply.contains("\"nickname\":\"bob\""));

        let ev = tokio::time::timeout(Duration::from_secs(2), h.rx.recv())
            .await
            .unwrap()
            .unwrap();
        let NodeEvent::PeerDiscovered { nickname, ip } = ev else {
            panic!("expected PeerDiscovered");
        };
        assert_eq!(nickname, "phone");
        // Registered under the live socket address, not the advertised one.
        assert_eq!(ip, "127.0.0.1");
        assert_eq!(h.peers.lock().await.get("phone").unwrap().ip, "127.0.0.1");
        assert!(h.pending.lock().await.is_empty());
    }
}
