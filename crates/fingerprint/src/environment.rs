//! Access to the current build environment during fingerprint checking.

use std::path::{Path, PathBuf};
use trellis_serialize::Value;

/// What the fingerprint checker can observe about the world.
///
/// The embedding tool implements this; the checker compares recorded inputs
/// against these observations. Hashes are opaque strings and only compared
/// for equality, so implementations may use any stable digest.
pub trait BuildEnvironment {
    /// Content hash of a file, or `None` when it does not exist.
    fn hash_file(&self, path: &Path) -> Option<String>;

    /// Hash over a directory's entry names, or `None` when it does not exist.
    fn hash_directory_content(&self, path: &Path) -> Option<String>;

    /// Current value of an environment variable.
    fn env_var(&self, name: &str) -> Option<String>;

    /// Current value of a build property.
    fn build_property(&self, name: &str) -> Option<String>;

    /// Re-obtain the value of a value source.
    fn obtain_value_source(&self, description: &str) -> Value;

    /// The init scripts currently applied, in order, with content hashes.
    fn init_script_hashes(&self) -> Vec<(PathBuf, Option<String>)>;

    /// Version of the running tool.
    fn tool_version(&self) -> String;

    /// Hash over the start-parameter properties in effect.
    fn tool_properties_hash(&self) -> String;
}
