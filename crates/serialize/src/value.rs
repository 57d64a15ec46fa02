//! Dynamically typed values carried through isolate-scoped contexts.
//!
//! Build services, listener payloads and cleanup registrations are opaque to
//! the cache protocol: they are captured as [`Value`] trees and restored as
//! written. Which kinds are legal depends on the active codec set.

use std::path::PathBuf;

/// Discriminant for a [`Value`], used for codec-set restriction checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Absent value.
    Null,
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// UTF-8 string.
    String,
    /// File system path.
    File,
    /// Ordered list of values.
    List,
    /// Ordered string-keyed entries.
    Map,
    /// Reference to a scheduled work node by id (internal graphs only).
    NodeRef,
}

impl ValueKind {
    /// Stable display name, used in diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::String => "string",
            Self::File => "file",
            Self::List => "list",
            Self::Map => "map",
            Self::NodeRef => "node reference",
        }
    }

    /// Wire tag for this kind.
    #[must_use]
    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool => 1,
            Self::Int => 2,
            Self::String => 3,
            Self::File => 4,
            Self::List => 5,
            Self::Map => 6,
            Self::NodeRef => 7,
        }
    }

    /// Kind for a wire tag.
    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Null,
            1 => Self::Bool,
            2 => Self::Int,
            3 => Self::String,
            4 => Self::File,
            5 => Self::List,
            6 => Self::Map,
            7 => Self::NodeRef,
            _ => return None,
        })
    }
}

/// A dynamically typed value captured in a state file.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// UTF-8 string.
    String(String),
    /// File system path, stored as a UTF-8 lossless string.
    File(PathBuf),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Ordered string-keyed entries.
    Map(Vec<(String, Value)>),
    /// Reference to a scheduled work node by id.
    NodeRef(u64),
}

impl Value {
    /// The kind of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::String(_) => ValueKind::String,
            Self::File(_) => ValueKind::File,
            Self::List(_) => ValueKind::List,
            Self::Map(_) => ValueKind::Map,
            Self::NodeRef(_) => ValueKind::NodeRef,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}
