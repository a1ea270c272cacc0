//! Events the engine reports upward to its host (UI, daemon log, tests).

use lanshare_core::ProgressEvent;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// A peer announced itself (discovery datagram or handshake).
    PeerDiscovered { nickname: String, ip: String },
    /// An inbound transfer waits for an accept/reject decision.
    IncomingTransferRequest {
        transfer_id: Uuid,
        filename: String,
        sender_nickname: String,
        raw_header: String,
    },
    /// Throttled transfer progress, including the terminal event.
    Progress(ProgressEvent),
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<NodeEvent>;
