//! Node lifecycle: owns the shared registries, supervises every spawned
//! task, and exposes the downward calls (send, respond, handshake).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use lanshare_core::protocol::ItemKind;
use lanshare_core::{OutboundItem, PeerRecord, PeerRegistry, Storage, TempArchive};
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::discovery::{self, SharedPeers};
use crate::events::EventSender;
use crate::handshake;
use crate::server::{self, PendingMap};
use crate::session::{self, TransferError};
use crate::storage::FsStorage;

/// One running share node. Every loop and session it spawns lives in its
/// `JoinSet`, so [`Node::stop`] can cancel and join the lot deterministically.
pub struct Node {
    cfg: Config,
    local_ip: Option<String>,
    peers: SharedPeers,
    pending: PendingMap,
    storage: Arc<FsStorage>,
    events: EventSender,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<JoinSet<()>>,
}

impl Node {
    pub fn new(cfg: Config, events: EventSender) -> Self {
        let local_ip = local_ip_address::local_ip().ok().map(|ip| ip.to_string());
        let storage = Arc::new(FsStorage::new(cfg.download_dir.clone()));
        let (shutdown, _) = watch::channel(false);
        Self {
            cfg,
            local_ip,
            peers: Arc::new(Mutex::new(PeerRegistry::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            storage,
            events,
            shutdown,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Bind the transfer listener and spawn the passive loops. Returns the
    /// bound transfer port (useful when configured as 0).
    pub async fn start(&mut self) -> std::io::Result<u16> {
        let listener = TcpListener::bind(("0.0.0.0", self.cfg.transfer_port)).await?;
        let port = listener.local_addr()?.port();

        let mut tasks = self.tasks.lock().await;
        match &self.local_ip {
            Some(ip) => {
                tasks.spawn(discovery::broadcast_loop(
                    self.cfg.nickname.clone(),
                    ip.clone(),
                    self.cfg.discovery_port,
                    self.shutdown.subscribe(),
                ));
            }
            None => warn!("local IP unresolved; presence broadcast disabled"),
        }
        tasks.spawn(discovery::listen_loop(
            self.cfg.nickname.clone(),
            self.cfg.discovery_port,
            self.peers.clone(),
            self.events.clone(),
            self.shutdown.subscribe(),
        ));
        tasks.spawn(server::run_server(
            listener,
            self.cfg.nickname.clone(),
            self.local_ip.clone().unwrap_or_default(),
            self.peers.clone(),
            self.pending.clone(),
            self.events.clone(),
            self.shutdown.subscribe(),
        ));
        info!(nickname = %self.cfg.nickname, transfer_port = port, "node started");
        Ok(port)
    }

    /// Cancel and join every child task, then drop parked connections.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        self.pending.lock().await.clear();
        info!("node stopped");
    }

    /// Send a file or directory to a peer. Resolution and packing failures
    /// abort here, before any network activity; the session itself runs as
    /// its own supervised task.
    pub async fn start_send(&self, target_ip: &str, path: &Path) -> Result<(), TransferError> {
        let (item, archive) = self.resolve_outbound(path).await?;
        let target = target_ip.to_string();
        let port = self.cfg.transfer_port;
        let nickname = self.cfg.nickname.clone();
        let events = self.events.clone();
        self.tasks.lock().await.spawn(async move {
            // Keeps a packed temp archive alive for the whole session.
            let _archive = archive;
            let _ = session::send_item(&target, port, &nickname, &item, &events).await;
        });
        Ok(())
    }

    async fn resolve_outbound(
        &self,
        path: &Path,
    ) -> Result<(OutboundItem, Option<TempArchive>), TransferError> {
        if path.is_dir() {
            let dir = path.to_path_buf();
            let archive = tokio::task::spawn_blocking(move || lanshare_core::pack_directory(&dir))
                .await
                .map_err(|err| {
                    TransferError::Connection(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        err,
                    ))
                })??;
            let item = OutboundItem {
                reference: archive.path().to_path_buf(),
                display_name: archive.display_name().to_string(),
                size: archive.size(),
                kind: ItemKind::Directory,
            };
            Ok((item, Some(archive)))
        } else {
            let (display_name, size) = self.storage.resolve(path)?;
            let item = OutboundItem {
                reference: path.to_path_buf(),
                display_name,
                size,
                kind: ItemKind::File,
            };
            Ok((item, None))
        }
    }

    /// Accept or reject a parked inbound transfer. Unknown ids are no-ops.
    pub async fn respond_to_transfer(&self, transfer_id: Uuid, accepted: bool) {
        let pending = self.pending.clone();
        let storage: Arc<dyn Storage> = self.storage.clone();
        let events = self.events.clone();
        self.tasks.lock().await.spawn(async move {
            let _ = session::resolve_transfer(&pending, transfer_id, accepted, storage, &events)
                .await;
        });
    }

    /// One-shot identity exchange with a scanned IP. Best effort.
    pub async fn start_handshake(&self, target_ip: &str) {
        let target = target_ip.to_string();
        let port = self.cfg.transfer_port;
        let nickname = self.cfg.nickname.clone();
        let local_ip = self.local_ip.clone().unwrap_or_default();
        let peers = self.peers.clone();
        let events = self.events.clone();
        self.tasks.lock().await.spawn(async move {
            if let Err(err) =
                handshake::initiate(&target, port, &nickname, &local_ip, &peers, &events).await
            {
                debug!(target = %target, error = %err, "handshake abandoned");
            }
        });
    }

    /// Snapshot of the peer registry.
    pub async fn peers(&self) -> Vec<PeerRecord> {
        self.peers.lock().await.iter().cloned().collect()
    }
}
