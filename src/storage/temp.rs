//! Local staging files for in-flight transfers.

use crate::core::StorageError;

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::task::{spawn_blocking, JoinError};

const SLOT_PREFIX: &str = "scan-";

/// Hands out uniquely named staging files under one directory.
#[derive(Debug, Clone)]
pub struct TempStorage {
    dir: PathBuf,
}

impl TempStorage {
    /// Creates a manager rooted at `dir`. The directory is created lazily.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the staging directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates a new, empty staging file owned by the returned slot.
    ///
    /// Names are random and created with `O_EXCL`, so concurrent transfers
    /// never share a slot.
    pub async fn acquire(&self) -> Result<TempSlot, StorageError> {
        let to_err = |source| StorageError::Acquire {
            dir: self.dir.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.dir).await.map_err(to_err)?;
        let dir = self.dir.clone();
        let path = spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(SLOT_PREFIX)
                .tempfile_in(dir)
                .map(|file| file.into_temp_path())
        })
        .await
        .map_err(join_failure)
        .and_then(|created| created)
        .map_err(to_err)?;

        let slot = TempSlot { path };
        tracing::debug!(path = %slot.path().display(), "Acquired staging file");
        Ok(slot)
    }

    /// Removes the slot's file, reporting failures.
    pub async fn release(&self, slot: TempSlot) -> Result<(), StorageError> {
        slot.release().await
    }
}

fn join_failure(e: JoinError) -> io::Error {
    io::Error::other(e.to_string())
}

/// One staging file.
///
/// Dropping the slot deletes the file best-effort, so every exit path of a
/// transfer frees its staging space. Use [`TempSlot::release`] where the
/// deletion result matters.
#[derive(Debug)]
pub struct TempSlot {
    path: TempPath,
}

impl TempSlot {
    /// Location of the staging file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the file and reports the outcome.
    pub async fn release(self) -> Result<(), StorageError> {
        let path = self.path.to_path_buf();
        let temp_path = self.path;
        spawn_blocking(move || temp_path.close())
            .await
            .map_err(join_failure)
            .and_then(|closed| closed)
            .map_err(|source| StorageError::Release {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(path = %path.display(), "Released staging file");
        Ok(())
    }
}
