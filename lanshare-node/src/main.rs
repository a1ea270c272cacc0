// LAN share daemon: discovery, transfer server, auto-accepting receive loop.

mod config;
mod discovery;
mod events;
mod handshake;
mod node;
mod server;
mod session;
mod storage;

use std::path::PathBuf;

use events::NodeEvent;
use tracing::{debug, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut connect: Option<String> = None;
    let mut send: Option<(String, PathBuf)> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("lanshare-node {VERSION}");
                return Ok(());
            }
            "--connect" => match args.next() {
                Some(ip) => connect = Some(ip),
                None => anyhow::bail!("--connect requires <ip>"),
            },
            "--send" => match (args.next(), args.next()) {
                (Some(ip), Some(path)) => send = Some((ip, PathBuf::from(path))),
                _ => anyhow::bail!("--send requires <ip> <path>"),
            },
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg, connect, send))
}

async fn run(
    cfg: config::Config,
    connect: Option<String>,
    send: Option<(String, PathBuf)>,
) -> anyhow::Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut node = node::Node::new(cfg, tx);
    node.start().await?;

    if let Some(ip) = connect {
        node.start_handshake(&ip).await;
    }
    if let Some((ip, path)) = send {
        node.start_send(&ip, &path).await?;
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                break;
            }
            ev = rx.recv() => match ev {
                Some(NodeEvent::PeerDiscovered { nickname, ip }) => {
                    let known = node.peers().await.len();
                    debug!(%nickname, %ip, known, "peer seen");
                }
                Some(NodeEvent::IncomingTransferRequest { transfer_id, filename, sender_nickname, .. }) => {
                    // No UI attached: accept everything into the download dir.
                    info!(%transfer_id, %filename, sender = %sender_nickname, "accepting transfer");
                    node.respond_to_transfer(transfer_id, true).await;
                }
                Some(NodeEvent::Progress(p)) => {
                    if p.is_complete {
                        info!(file = %p.filename, bytes = p.bytes_transferred, "transfer finished");
                    } else {
                        info!(file = %p.filename, percent = p.percent(), "transfer progress");
                    }
                }
                None => break,
            }
        }
    }
    node.stop().await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
