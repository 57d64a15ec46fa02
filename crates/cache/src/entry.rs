//! Entry metadata: written last, read first.
//!
//! The entry file is the commit marker of a cache entry. It is a small JSON
//! document (never encrypted) describing what the sibling state files
//! contain; its absence means the entry does not exist, whatever else is in
//! the directory.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::PathBuf;
use trellis_model::{ProjectPath, StateType};
use trellis_store::EntryLayout;

/// Contents of the entry metadata file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntryDetails {
    /// Version of the tool that wrote the entry.
    pub tool_version: String,
    /// When the entry was committed.
    pub created_at: DateTime<Utc>,
    /// Root directories of all builds in the entry, for file-watching
    /// registration before the fingerprint check.
    pub root_build_dirs: Vec<PathBuf>,
    /// Keys of the cached intermediate models in the sibling file.
    pub intermediate_model_keys: Vec<String>,
    /// Projects with cached dependency-resolution metadata.
    pub project_metadata_paths: Vec<ProjectPath>,
}

impl EntryDetails {
    /// Read the entry details, or `None` when no entry exists.
    ///
    /// # Errors
    ///
    /// Returns an error for an unreadable or malformed document; a missing
    /// file is not an error.
    pub fn read(layout: &EntryLayout<'_>) -> Result<Option<Self>> {
        let file = layout.file_for(StateType::Entry);
        if !file.exists() {
            return Ok(None);
        }
        let mut content = String::new();
        file.input()?
            .read_to_string(&mut content)
            .map_err(|e| Error::entry_metadata(format!("read failed: {e}")))?;
        let details = serde_json::from_str(&content)
            .map_err(|e| Error::entry_metadata(format!("malformed entry document: {e}")))?;
        Ok(Some(details))
    }

    /// Write the entry details, committing the entry.
    ///
    /// # Errors
    ///
    /// Propagates store and encoding failures.
    pub fn write(&self, layout: &EntryLayout<'_>) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::entry_metadata(format!("serialize failed: {e}")))?;
        let mut out = layout.file_for(StateType::Entry).output()?;
        out.write_all(&json)
            .map_err(|e| Error::entry_metadata(format!("write failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_store::CacheRepository;

    #[test]
    fn entry_round_trips_and_absence_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheRepository::new(tmp.path()).for_key("k");
        let details = EntryDetails {
            tool_version: "0.9.2".to_string(),
            created_at: Utc::now(),
            root_build_dirs: vec![PathBuf::from("/work/main")],
            intermediate_model_keys: vec!["ide-model".to_string()],
            project_metadata_paths: vec![ProjectPath::new(":app").unwrap()],
        };
        let missing = store
            .use_for_state_load(|layout| {
                Ok(EntryDetails::read(layout).map_err(|e| {
                    trellis_store::Error::configuration(e.to_string())
                })?)
            })
            .unwrap();
        assert!(missing.is_none());

        store
            .use_for_store(|layout| {
                details
                    .write(layout)
                    .map_err(|e| trellis_store::Error::configuration(e.to_string()))
            })
            .unwrap();
        let read = store
            .use_for_state_load(|layout| {
                EntryDetails::read(layout)
                    .map_err(|e| trellis_store::Error::configuration(e.to_string()))
            })
            .unwrap()
            .unwrap();
        assert_eq!(read, details);
    }
}
