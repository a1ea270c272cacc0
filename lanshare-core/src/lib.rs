//! LAN share protocol reference implementation.
//! No sockets here: the node crate drives I/O and feeds these types.

pub mod archive;
pub mod peers;
pub mod progress;
pub mod protocol;
pub mod storage;

pub use archive::{pack_directory, unpack_archive, PackagingError, TempArchive};
pub use peers::{PeerRecord, PeerRegistry};
pub use progress::{Direction, ProgressEvent, ProgressReporter};
pub use protocol::{
    classify_header, encode_line, Announcement, Header, HandshakeMessage, ItemKind,
    ProtocolError, TransferMetadata,
};
pub use storage::{OutboundItem, Storage, StorageError};
