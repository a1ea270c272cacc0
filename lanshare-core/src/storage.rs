//! Storage collaborator seam. The engine never touches final destinations
//! directly; the host supplies an implementation (filesystem, scoped storage).

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::protocol::ItemKind;

/// A resolved outbound payload: what to send and how to describe it.
/// Directories are packed to an archive before one of these exists.
#[derive(Debug, Clone)]
pub struct OutboundItem {
    pub reference: PathBuf,
    pub display_name: String,
    pub size: u64,
    pub kind: ItemKind,
}

/// Host-provided storage access.
pub trait Storage: Send + Sync {
    /// Resolve a reference to its display name and byte length.
    fn resolve(&self, reference: &Path) -> Result<(String, u64), StorageError>;

    /// Open a reference for reading.
    fn open_read(&self, reference: &Path) -> Result<Box<dyn Read + Send>, StorageError>;

    /// Open a write destination. `relative_path` is the parent path inside
    /// the destination root (empty for top-level files).
    fn open_write(
        &self,
        display_name: &str,
        mime_type: &str,
        relative_path: &Path,
    ) -> Result<Box<dyn Write + Send>, StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("cannot resolve {0}")]
    Unresolvable(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
