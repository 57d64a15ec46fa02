//! Cross-process locking of cache-key directories.
//!
//! Every store access takes an exclusive advisory lock on a `.lock` file
//! inside the key directory. Locks are taken on demand per call and released
//! when the guard drops, so no lock is held between cache operations.

use crate::{Error, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// File name of the lock file within a cache-key directory.
pub const LOCK_FILE_NAME: &str = ".lock";

/// Guard holding an exclusive lock on a cache-key directory.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
}

impl StoreLock {
    /// Block until the exclusive lock on `dir` is acquired.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the lock file cannot be created or locked.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(e, &path, "open"))?;
        file.lock_exclusive()
            .map_err(|e| Error::io(e, &path, "lock"))?;
        Ok(Self { file })
    }

    /// Try to acquire the lock without blocking; `None` when another
    /// process holds it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the lock file cannot be created.
    pub fn try_acquire(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::io(e, &path, "open"))?;
        let locked = file
            .try_lock_exclusive()
            .map_err(|e| Error::io(e, &path, "lock"))?;
        Ok(locked.then_some(Self { file }))
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
