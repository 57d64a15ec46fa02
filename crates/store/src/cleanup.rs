//! Least-recently-used cleanup of cache entries.
//!
//! Entry directories have their modification time refreshed on every store,
//! so age since last store approximates last use. Entries held by another
//! process are skipped.

use crate::lock::StoreLock;
use crate::store::CacheRepository;
use crate::{Error, Result};
use std::fs;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// Default retention for unused entries.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

impl CacheRepository {
    /// Delete entries not stored to within `retention`.
    ///
    /// Returns the number of entries removed. Entries locked by another
    /// process are left alone.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the repository root cannot be listed or an
    /// expired entry cannot be removed.
    pub fn cleanup(&self, retention: Duration) -> Result<usize> {
        let root = self.cache_root();
        if !root.exists() {
            return Ok(0);
        }
        let now = SystemTime::now();
        let mut removed = 0;
        let entries = fs::read_dir(root).map_err(|e| Error::io(e, root, "read_dir"))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, root, "read_dir"))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .map_err(|e| Error::io(e, &path, "metadata"))?;
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= retention {
                continue;
            }
            let Some(_lock) = StoreLock::try_acquire(&path)? else {
                debug!(entry = %path.display(), "skipping locked entry");
                continue;
            };
            fs::remove_dir_all(&path).map_err(|e| Error::io(e, &path, "remove_dir_all"))?;
            removed += 1;
        }
        if removed > 0 {
            info!(removed, "cleaned up expired configuration cache entries");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn expired_entries_are_removed_and_fresh_ones_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = CacheRepository::new(tmp.path());
        let old = tmp.path().join("old");
        let fresh = tmp.path().join("fresh");
        fs::create_dir(&old).unwrap();
        fs::create_dir(&fresh).unwrap();
        File::open(&old)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();

        let removed = repo.cleanup(Duration::from_secs(30)).unwrap();
        assert_eq!(removed, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[test]
    fn locked_entries_survive_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = CacheRepository::new(tmp.path());
        let held = tmp.path().join("held");
        fs::create_dir(&held).unwrap();
        File::open(&held)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();
        let _guard = StoreLock::acquire(&held).unwrap();

        let removed = repo.cleanup(Duration::from_secs(30)).unwrap();
        assert_eq!(removed, 0);
        assert!(held.exists());
    }
}
