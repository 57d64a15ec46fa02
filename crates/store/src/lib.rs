//! On-disk state store for the trellis configuration cache.
//!
//! A [`CacheRepository`] maps cache keys to per-key entry directories. All
//! access to an entry happens inside [`Store::use_for_store`] or
//! [`Store::use_for_state_load`], under a cross-process exclusive lock taken
//! on demand. Heavyweight state files are written as spool files and moved
//! into place atomically; entry directories are private to the user and
//! reclaimed by LRU cleanup.

pub mod cleanup;
mod error;
pub mod layout;
pub mod lock;
mod store;

pub use cleanup::DEFAULT_RETENTION;
pub use error::{Error, Result};
pub use layout::cache_root;
pub use lock::StoreLock;
pub use store::{CacheRepository, EntryLayout, SpoolFile, StateFile, Store};
