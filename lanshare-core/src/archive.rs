//! Directory packaging: build a zip of a directory tree before sending, and
//! unpack a received archive through the storage collaborator.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::FileOptions;

use crate::storage::{Storage, StorageError};

/// Archive suffix appended to the directory name of a packed transfer.
pub const ARCHIVE_EXTENSION: &str = "zip";

const GENERIC_MIME: &str = "application/octet-stream";

/// A packed archive at a temporary location. The file is removed when the
/// value is dropped, so every exit path of a send releases it.
#[derive(Debug)]
pub struct TempArchive {
    path: PathBuf,
    display_name: String,
    size: u64,
}

impl TempArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `<directory-name>.zip`
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for TempArchive {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %err, "temp archive not removed");
        }
    }
}

/// Pack `dir` into a zip at a temp location. Every regular file is stored
/// under its path relative to `dir`; directories are never standalone
/// entries. Any walk or write failure aborts the whole pack and removes the
/// partial archive.
pub fn pack_directory(dir: &Path) -> Result<TempArchive, PackagingError> {
    let dir_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PackagingError::NotADirectory(dir.to_path_buf()))?;
    if !dir.is_dir() {
        return Err(PackagingError::NotADirectory(dir.to_path_buf()));
    }
    let mut archive = TempArchive {
        path: std::env::temp_dir().join(format!("lanshare-{}.{}", Uuid::new_v4(), ARCHIVE_EXTENSION)),
        display_name: format!("{dir_name}.{ARCHIVE_EXTENSION}"),
        size: 0,
    };
    // On error the partial file is dropped with `archive`.
    write_zip(dir, &archive.path)?;
    archive.size = std::fs::metadata(&archive.path)?.len();
    Ok(archive)
}

fn write_zip(dir: &Path, out: &Path) -> Result<(), PackagingError> {
    let mut zip = zip::ZipWriter::new(File::create(out)?);
    let options = FileOptions::default();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| PackagingError::BadEntry(entry.path().display().to_string()))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        zip.start_file(name, options)?;
        let mut input = File::open(entry.path())?;
        io::copy(&mut input, &mut zip)?;
    }
    zip.finish()?;
    Ok(())
}

/// Destination folder for a received archive: the filename minus the suffix.
pub fn archive_folder_name(filename: &str) -> &str {
    filename
        .strip_suffix(&format!(".{ARCHIVE_EXTENSION}"))
        .unwrap_or(filename)
}

/// Unpack a received archive through `storage`, rooted at `dest_folder`.
/// Entries are written in archive order; a failure partway leaves the
/// already-extracted entries in place. Returns the number of files written.
pub fn unpack_archive(
    archive: &Path,
    dest_folder: &str,
    storage: &dyn Storage,
) -> Result<usize, PackagingError> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    let mut extracted = 0;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let rel = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| PackagingError::BadEntry(entry.name().to_string()))?;
        let file_name = rel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PackagingError::BadEntry(entry.name().to_string()))?;
        let parent = Path::new(dest_folder).join(rel.parent().unwrap_or_else(|| Path::new("")));
        let mut out = storage.open_write(&file_name, mime_for_name(&file_name), &parent)?;
        io::copy(&mut entry, &mut out)?;
        extracted += 1;
    }
    Ok(extracted)
}

/// MIME type from the filename extension; generic binary when unknown.
pub fn mime_for_name(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "txt" | "log" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => GENERIC_MIME,
    }
}

/// Error building or extracting an archive.
#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("bad archive entry: {0}")]
    BadEntry(String),
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use std::io::{Read, Write};

    /// Minimal storage collaborator writing under a root directory.
    struct DirStorage {
        root: PathBuf,
    }

    impl Storage for DirStorage {
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
            _mime_type: &str,
            relative_path: &Path,
        ) -> Result<Box<dyn Write + Send>, StorageError> {
            let dir = self.root.join(relative_path);
            fs::create_dir_all(&dir)?;
            Ok(Box::new(File::create(dir.join(display_name))?))
        }
    }

    fn sample_tree(root: &Path) -> PathBuf {
        let dir = root.join("photos");
        fs::create_dir_all(dir.join("trip/day1")).unwrap();
        fs::create_dir_all(dir.join("empty")).unwrap();
        fs::write(dir.join("readme.txt"), b"hello").unwrap();
        fs::write(dir.join("trip/day1/a.bin"), vec![7u8; 4096]).unwrap();
        fs::write(dir.join("trip/b.txt"), b"second").unwrap();
        dir
    }

    fn read_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut out = BTreeMap::new();
        for entry in WalkDir::new(root) {
            let entry = entry.unwrap();
            if entry.file_type().is_file() {
                let rel = entry.path().strip_prefix(root).unwrap();
                out.insert(
                    rel.to_string_lossy().replace('\\', "/"),
                    fs::read(entry.path()).unwrap(),
                );
            }
        }
        out
    }

    #[test]
    fn pack_unpack_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = sample_tree(tmp.path());
        let archive = pack_directory(&dir).unwrap();
        assert_eq!(archive.display_name(), "photos.zip");
        assert!(archive.size() > 0);

        let dest = tmp.path().join("out");
        let storage = DirStorage { root: dest.clone() };
        let n = unpack_archive(archive.path(), "photos", &storage).unwrap();
        assert_eq!(n, 3);

        let original = read_tree(&dir);
        let restored = read_tree(&dest.join("photos"));
        // Empty directory is not reproduced; every regular file is.
        assert_eq!(original, restored);
        assert!(!dest.join("photos/empty").exists());
    }

    #[test]
    fn pack_rejects_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let err = pack_directory(&tmp.path().join("nope")).unwrap_err();
        assert!(matches!(err, PackagingError::NotADirectory(_)));
    }

    #[test]
    fn temp_archive_removed_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = sample_tree(tmp.path());
        let archive = pack_directory(&dir).unwrap();
        let path = archive.path().to_path_buf();
        assert!(path.exists());
        drop(archive);
        assert!(!path.exists());
    }

    #[test]
    fn folder_name_strips_suffix() {
        assert_eq!(archive_folder_name("photos.zip"), "photos");
        assert_eq!(archive_folder_name("report.pdf"), "report.pdf");
    }

    #[test]
    fn mime_inference() {
        assert_eq!(mime_for_name("report.pdf"), "application/pdf");
        assert_eq!(mime_for_name("a.TXT"), "text/plain");
        assert_eq!(mime_for_name("blob"), "application/octet-stream");
        assert_eq!(mime_for_name("weird.xyz"), "application/octet-stream");
    }
}
