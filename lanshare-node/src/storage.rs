//! Filesystem storage collaborator: resolves outbound references and writes
//! accepted transfers under the download directory.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use lanshare_core::{Storage, StorageError};

#[derive(Debug)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Storage for FsStorage {
    fn resolve(&self, reference: &Path) -> Result<(String, u64), StorageError> {
        let meta = fs::metadata(reference)?;
        let name = reference
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| StorageError::Unresolvable(reference.to_path_buf()))?;
        Ok((name, meta.len()))
    }

    fn open_read(&self, reference: &Path) -> Result<Box<dyn Read + Send>, StorageError> {
        Ok(Box::new(File::open(reference)?))
    }

    fn open_write(
        &self,
        display_name: &str,
        mime_type: &str,
        relative_path: &Path,
    ) -> Result<Box<dyn Write + Send>, StorageError> {
        let dir = self.root.join(relative_path);
        fs::create_dir_all(&dir)?;
        let dest = dir.join(display_name);
        tracing::debug!(dest = %dest.display(), mime = mime_type, "opening write destination");
        Ok(Box::new(File::create(dest)?))
    }
}
