//! Cache-root resolution.
//!
//! The root holding all cache-key directories resolves from, in order: the
//! `TRELLIS_CACHE_DIR` override, the platform cache directory (honoring
//! `XDG_CACHE_HOME`), and the system temp directory as a last resort. A
//! candidate only wins if a file can actually be written under it.

use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const ROOT_SUFFIX: &str = "trellis/configuration";

/// Resolve the configuration-cache root from the environment.
///
/// # Errors
///
/// Returns a configuration error when no candidate directory is writable.
pub fn cache_root() -> Result<PathBuf> {
    let platform = env_path("XDG_CACHE_HOME")
        .or_else(dirs::cache_dir)
        .map(|base| base.join(ROOT_SUFFIX));
    resolve(
        env_path("TRELLIS_CACHE_DIR"),
        platform,
        std::env::temp_dir().join(ROOT_SUFFIX),
    )
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

pub(crate) fn resolve(
    override_dir: Option<PathBuf>,
    platform_dir: Option<PathBuf>,
    temp_dir: PathBuf,
) -> Result<PathBuf> {
    let candidates = override_dir
        .into_iter()
        .chain(platform_dir)
        .chain(Some(temp_dir));
    for candidate in candidates {
        match claim(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) => {
                debug!(dir = %candidate.display(), error = %e, "cache root candidate rejected");
            }
        }
    }
    Err(Error::configuration("no writable cache root available"))
}

// Existence is not enough: a read-only directory passes every metadata
// check and then fails on the first store.
fn claim(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let marker = dir.join(".writable");
    fs::write(&marker, b"")?;
    fs::remove_file(&marker)
}
