//! Transfer sessions: outbound send and inbound receive state machines.
//! Failures collapse to one terminal progress event on the outward surface;
//! the typed error stays available for logs and tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lanshare_core::archive::{self, archive_folder_name, mime_for_name};
use lanshare_core::protocol::{self, ItemKind, ProtocolError, TransferMetadata};
use lanshare_core::{
    Direction, OutboundItem, PackagingError, ProgressReporter, Storage, StorageError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{EventSender, NodeEvent};
use crate::server::{read_header_line, PendingMap, PendingTransfer};

/// Read/write granularity for streaming a transfer body.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Why a transfer ended early. Never sent to the peer; the wire only ever
/// sees the connection close.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("rejected by peer")]
    Rejected,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("packaging error: {0}")]
    Packaging(#[from] PackagingError),
    #[error("short transfer: {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },
}

/// Send one resolved item to a peer. Emits the terminal progress event on
/// every outcome except a pre-connect resolution failure (the caller aborts
/// those before any network activity).
pub async fn send_item(
    target_ip: &str,
    transfer_port: u16,
    sender_nickname: &str,
    item: &OutboundItem,
    events: &EventSender,
) -> Result<(), TransferError> {
    let mut reporter = ProgressReporter::new(Direction::Sending, &item.display_name, item.size);
    let result = drive_send(
        target_ip,
        transfer_port,
        sender_nickname,
        item,
        &mut reporter,
        events,
    )
    .await;
    if let Err(err) = &result {
        warn!(target = target_ip, file = %item.display_name, error = %err, "send failed");
        let _ = events.send(NodeEvent::Progress(reporter.aborted()));
    }
    result
}

async fn drive_send(
    target_ip: &str,
    transfer_port: u16,
    sender_nickname: &str,
    item: &OutboundItem,
    reporter: &mut ProgressReporter,
    events: &EventSender,
) -> Result<(), TransferError> {
    let metadata = TransferMetadata {
        filename: item.display_name.clone(),
        filesize: item.size,
        kind: item.kind,
        sender_nickname: sender_nickname.to_string(),
    };
    let stream = TcpStream::connect((target_ip, transfer_port)).await?;
    let mut conn = BufReader::new(stream);
    conn.write_all(protocol::encode_line(&metadata)?.as_bytes())
        .await?;

    let response = read_header_line(&mut conn).await?.unwrap_or_default();
    if response.trim() != protocol::ACCEPT {
        return Err(TransferError::Rejected);
    }

    let _ = events.send(NodeEvent::Progress(reporter.start()));
    let mut file = tokio::fs::File::open(&item.reference).await?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut sent: u64 = 0;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        conn.write_all(&buf[..n]).await?;
        sent += n as u64;
        if let Some(ev) = reporter.update(sent) {
            let _ = events.send(NodeEvent::Progress(ev));
        }
    }
    conn.flush().await?;
    let _ = conn.shutdown().await;
    info!(target = target_ip, file = %item.display_name, bytes = sent, "sent");
    let _ = events.send(NodeEvent::Progress(reporter.finish(sent)));
    Ok(())
}

/// Resolve a parked inbound transfer. An unknown id is a no-op; the registry
/// entry is removed exactly once whichever way the decision goes.
pub async fn resolve_transfer(
    pending: &PendingMap,
    transfer_id: Uuid,
    accepted: bool,
    storage: Arc<dyn Storage>,
    events: &EventSender,
) -> Result<(), TransferError> {
    let Some(parked) = pending.lock().await.remove(&transfer_id) else {
        debug!(%transfer_id, "unknown or already resolved transfer id");
        return Ok(());
    };
    let PendingTransfer {
        mut conn,
        metadata,
        raw_header,
    } = parked;
    debug!(%transfer_id, accepted, header = %raw_header, "resolving transfer");

    if !accepted {
        if let Err(err) = conn
            .write_all(format!("{}\n", protocol::REJECT).as_bytes())
            .await
        {
            debug!(error = %err, "reject not delivered");
        }
        let _ = conn.shutdown().await;
        info!(file = %metadata.filename, sender = %metadata.sender_nickname, "transfer rejected");
        return Ok(());
    }

    let mut reporter =
        ProgressReporter::new(Direction::Receiving, &metadata.filename, metadata.filesize);
    match receive_bytes(&mut conn, &metadata, &mut reporter, events).await {
        Ok(spool) => {
            let _ = conn.shutdown().await;
            let _ = events.send(NodeEvent::Progress(reporter.finish(metadata.filesize)));
            finalize(spool, &metadata, storage).await
        }
        Err(err) => {
            warn!(file = %metadata.filename, error = %err, "receive failed");
            let _ = conn.shutdown().await;
            let _ = events.send(NodeEvent::Progress(reporter.aborted()));
            Err(err)
        }
    }
}

async fn receive_bytes(
    conn: &mut BufReader<TcpStream>,
    metadata: &TransferMetadata,
    reporter: &mut ProgressReporter,
    events: &EventSender,
) -> Result<TempSpool, TransferError> {
    let spool = TempSpool::new();
    let mut file = tokio::fs::File::create(&spool.path).await?;
    conn.write_all(format!("{}\n", protocol::ACCEPT).as_bytes())
        .await?;
    let _ = events.send(NodeEvent::Progress(reporter.start()));

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut received: u64 = 0;
    while received < metadata.filesize {
        let want = std::cmp::min(CHUNK_SIZE as u64, metadata.filesize - received) as usize;
        let n = conn.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(TransferError::Incomplete {
                received,
                expected: metadata.filesize,
            });
        }
        file.write_all(&buf[..n]).await?;
        received += n as u64;
        if let Some(ev) = reporter.update(received) {
            let _ = events.send(NodeEvent::Progress(ev));
        }
    }
    file.flush().await?;
    Ok(spool)
}

/// Hand the spooled bytes to storage: unpack directory archives, copy plain
/// files. Runs after the terminal event; failures here are log-and-return
/// only, and already-extracted entries stay in place.
async fn finalize(
    spool: TempSpool,
    metadata: &TransferMetadata,
    storage: Arc<dyn Storage>,
) -> Result<(), TransferError> {
    let meta = metadata.clone();
    let joined = tokio::task::spawn_blocking(move || -> Result<(), TransferError> {
        match meta.kind {
            ItemKind::Directory => {
                let folder = archive_folder_name(&meta.filename);
                archive::unpack_archive(&spool.path, folder, storage.as_ref())?;
            }
            ItemKind::File => {
                let mut input = std::fs::File::open(&spool.path)?;
                let mut out = storage.open_write(
                    &meta.filename,
                    mime_for_name(&meta.filename),
                    Path::new(""),
                )?;
                std::io::copy(&mut input, &mut out)?;
            }
        }
        // Spool drops here, on the blocking thread, removing the temp file.
        Ok(())
    })
    .await;
    match joined {
        Ok(Ok(())) => {
            info!(file = %metadata.filename, "transfer stored");
            Ok(())
        }
        Ok(Err(err)) => {
            warn!(file = %metadata.filename, error = %err, "finalize failed");
            Err(err)
        }
        Err(err) => Err(TransferError::Connection(std::io::Error::new(
            std::io::ErrorKind::Other,
            err,
        ))),
    }
}

/// Temporary receive artifact, deleted on every exit path.
struct TempSpool {
    path: PathBuf,
}

impl TempSpool {
    fn new() -> Self {
        Self {
            path: std::env::temp_dir().join(format!("lanshare-recv-{}", Uuid::new_v4())),
        }
    }
}

impl Drop for TempSpool {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %err, "temp spool not removed");
        }
    }
}
