//! Per-key cache entry storage.
//!
//! Each cache key owns one directory under the repository root holding the
//! typed state files of the entry. Access always goes through
//! [`Store::use_for_store`] or [`Store::use_for_state_load`], which take the
//! cross-process lock for the duration of the call. Writers produce spool
//! files first and move them in atomically, so a crashed store never leaves
//! a partially written state file behind.

use crate::lock::StoreLock;
use crate::{Error, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;
use tracing::debug;
use trellis_model::StateType;

/// Repository of cache entries, one directory per cache key.
#[derive(Debug, Clone)]
pub struct CacheRepository {
    cache_root: PathBuf,
}

impl CacheRepository {
    /// Open a repository rooted at an explicit directory.
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    /// Open the repository at the environment-resolved cache root.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no candidate root is writable.
    pub fn from_environment() -> Result<Self> {
        Ok(Self::new(crate::layout::cache_root()?))
    }

    /// The repository root directory.
    #[must_use]
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// The store for one cache key.
    #[must_use]
    pub fn for_key(&self, key: &str) -> Store {
        Store {
            dir: self.cache_root.join(key),
        }
    }
}

/// The on-disk entry for one cache key.
#[derive(Debug, Clone)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Directory holding this entry's state files.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a state file exists, without taking the lock.
    #[must_use]
    pub fn has_state_file(&self, state: StateType) -> bool {
        self.dir.join(state.file_name()).exists()
    }

    /// Run `f` with read-only access to this entry's state files.
    ///
    /// The exclusive lock is held for the duration of the call; handles
    /// obtained from the layout reject [`StateFile::output`].
    ///
    /// # Errors
    ///
    /// Propagates lock and I/O failures, and whatever `f` returns.
    pub fn use_for_state_load<T>(
        &self,
        f: impl FnOnce(&EntryLayout<'_>) -> Result<T>,
    ) -> Result<T> {
        self.ensure_dir()?;
        let _lock = StoreLock::acquire(&self.dir)?;
        f(&EntryLayout {
            dir: &self.dir,
            writable: false,
        })
    }

    /// Run `f` with read-write access to this entry's state files.
    ///
    /// The directory is created private to the user, the exclusive lock is
    /// held for the duration of the call, written files are narrowed to
    /// owner-only permissions afterwards, and the directory's modification
    /// time is refreshed for LRU cleanup.
    ///
    /// # Errors
    ///
    /// Propagates lock and I/O failures, and whatever `f` returns.
    pub fn use_for_store<T>(&self, f: impl FnOnce(&EntryLayout<'_>) -> Result<T>) -> Result<T> {
        self.ensure_dir()?;
        let _lock = StoreLock::acquire(&self.dir)?;
        let result = f(&EntryLayout {
            dir: &self.dir,
            writable: true,
        })?;
        self.narrow_file_permissions()?;
        self.touch()?;
        Ok(result)
    }

    /// Create a spool file on the same filesystem as the entry, to be
    /// moved in atomically via [`EntryLayout::move_in`].
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the spool file cannot be created.
    pub fn assign_spool_file(&self, state: StateType) -> Result<SpoolFile> {
        self.ensure_dir()?;
        let temp = tempfile::Builder::new()
            .prefix(state.file_name())
            .suffix(".spool")
            .tempfile_in(&self.dir)
            .map_err(|e| Error::io(e, &self.dir, "create spool"))?;
        Ok(SpoolFile { temp, state })
    }

    fn ensure_dir(&self) -> Result<()> {
        if self.dir.exists() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir).map_err(|e| Error::io(e, &self.dir, "create_dir_all"))?;
        restrict_dir(&self.dir)?;
        Ok(())
    }

    fn narrow_file_permissions(&self) -> Result<()> {
        let entries = fs::read_dir(&self.dir).map_err(|e| Error::io(e, &self.dir, "read_dir"))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, &self.dir, "read_dir"))?;
            let path = entry.path();
            if path.is_file() {
                restrict_file(&path)?;
            }
        }
        Ok(())
    }

    fn touch(&self) -> Result<()> {
        let dir = File::open(&self.dir).map_err(|e| Error::io(e, &self.dir, "open"))?;
        dir.set_modified(SystemTime::now())
            .map_err(|e| Error::io(e, &self.dir, "touch"))?;
        Ok(())
    }
}

/// Locked view of an entry directory handed to store/load closures.
#[derive(Debug)]
pub struct EntryLayout<'a> {
    dir: &'a Path,
    writable: bool,
}

impl EntryLayout<'_> {
    /// Handle for one typed state file.
    #[must_use]
    pub fn file_for(&self, state: StateType) -> StateFile {
        StateFile {
            path: self.dir.join(state.file_name()),
            state,
            writable: self.writable,
        }
    }

    /// Handle for an included build's sibling state file, named by
    /// suffixing the parent file with the build name.
    #[must_use]
    pub fn sibling_file_for(&self, state: StateType, build_name: &str) -> StateFile {
        StateFile {
            path: self
                .dir
                .join(format!("{}.{build_name}", state.file_name())),
            state,
            writable: self.writable,
        }
    }

    /// Move a finished spool file into place as a state file.
    ///
    /// # Errors
    ///
    /// Rejected on read-only layouts; otherwise propagates the rename error.
    pub fn move_in(&self, spool: SpoolFile, build_name: Option<&str>) -> Result<PathBuf> {
        if !self.writable {
            return Err(Error::unsupported("move_in on a load-only layout"));
        }
        let target = match build_name {
            Some(name) => self.sibling_file_for(spool.state, name).path,
            None => self.file_for(spool.state).path,
        };
        spool
            .temp
            .persist(&target)
            .map_err(|e| Error::io(e.error, &target, "persist"))?;
        restrict_file(&target)?;
        debug!(file = %target.display(), "state file committed");
        Ok(target)
    }

    /// Delete a state file if present.
    ///
    /// # Errors
    ///
    /// Rejected on read-only layouts; otherwise propagates the remove error.
    pub fn remove(&self, state: StateType) -> Result<()> {
        if !self.writable {
            return Err(Error::unsupported("remove on a load-only layout"));
        }
        let path = self.file_for(state).path;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(e, &path, "remove")),
        }
    }
}

/// Handle for one typed state file within a locked entry.
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    state: StateType,
    writable: bool,
}

impl StateFile {
    /// Path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The state type this file holds.
    #[must_use]
    pub fn state_type(&self) -> StateType {
        self.state
    }

    /// Whether the file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Open the file for reading.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be opened.
    pub fn input(&self) -> Result<File> {
        File::open(&self.path).map_err(|e| Error::io(e, &self.path, "open"))
    }

    /// Open the file for writing, truncating existing content.
    ///
    /// # Errors
    ///
    /// Rejected on handles obtained for loading; otherwise propagates
    /// the create error.
    pub fn output(&self) -> Result<File> {
        if !self.writable {
            return Err(Error::unsupported(format!(
                "output for {} on a load-only handle",
                self.state
            )));
        }
        File::create(&self.path).map_err(|e| Error::io(e, &self.path, "create"))
    }
}

/// Spool file written outside the final layout and moved in atomically.
#[derive(Debug)]
pub struct SpoolFile {
    temp: NamedTempFile,
    state: StateType,
}

impl SpoolFile {
    /// The state type this spool will become.
    #[must_use]
    pub fn state_type(&self) -> StateType {
        self.state
    }

    /// Path of the spool file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Writable handle to the spool contents.
    pub fn file_mut(&mut self) -> &mut File {
        self.temp.as_file_mut()
    }

    /// Take the writable file, keeping the temp-path guard.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be reopened.
    pub fn reopen(&self) -> Result<File> {
        self.temp
            .reopen()
            .map_err(|e| Error::io(e, self.temp.path(), "reopen"))
    }
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
        .map_err(|e| Error::io(e, path, "chmod"))
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn restrict_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| Error::io(e, path, "chmod"))
}

#[cfg(not(unix))]
fn restrict_file(_path: &Path) -> Result<()> {
    Ok(())
}
