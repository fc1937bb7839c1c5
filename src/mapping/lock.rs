//! Advisory lock on a mapping document
//!
//! Concurrent runs against the same document are serialized through an
//! exclusive lock on a `.lock` sidecar file next to it.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{IngestError, IngestResult};

/// Held for the lifetime of a run; released on drop
#[derive(Debug)]
pub struct MappingLock {
    file: File,
    path: PathBuf,
}

impl MappingLock {
    /// Sidecar path for a mapping document
    pub fn lock_path(mapping_path: &Path) -> PathBuf {
        let mut name = mapping_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        mapping_path.with_file_name(name)
    }

    /// Take the lock without waiting; fails if another run holds it
    pub fn try_acquire(mapping_path: &Path) -> IngestResult<Self> {
        let path = Self::lock_path(mapping_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| IngestError::io(&path, e))?;

        file.try_lock_exclusive()
            .map_err(|_| IngestError::Locked(mapping_path.to_path_buf()))?;

        tracing::debug!(lock = %path.display(), "Acquired mapping lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MappingLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
