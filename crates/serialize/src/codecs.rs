//! Codec sets restricting which value kinds are legal per object-graph kind.
//!
//! Three codec sets share the same wire format but restrict which [`Value`]
//! kinds may appear: user-facing state must never carry internal-only values,
//! and fingerprint streams carry only scalar observations. The restriction is
//! checked at write time so an illegal value fails the store instead of
//! leaking into a cache entry.

use crate::value::ValueKind;

/// The kind of object graph a context is currently serializing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    /// User-provided values: build service parameters, listener payloads.
    UserTypes,
    /// Internal build-tree state: work nodes, cleanup registrations.
    InternalTypes,
    /// Recorded configuration inputs.
    FingerprintTypes,
}

impl CodecKind {
    /// Stable display name, used in diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::UserTypes => "user types",
            Self::InternalTypes => "internal types",
            Self::FingerprintTypes => "fingerprint types",
        }
    }
}

/// A restriction over value kinds for one graph kind.
#[derive(Debug, Clone, Copy)]
pub struct CodecSet {
    kind: CodecKind,
    allowed: &'static [ValueKind],
}

impl CodecSet {
    /// The graph kind this set serves.
    #[must_use]
    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Whether the given value kind is legal in this set.
    #[must_use]
    pub fn permits(&self, kind: ValueKind) -> bool {
        self.allowed.contains(&kind)
    }
}

const USER_TYPES: CodecSet = CodecSet {
    kind: CodecKind::UserTypes,
    allowed: &[
        ValueKind::Null,
        ValueKind::Bool,
        ValueKind::Int,
        ValueKind::String,
        ValueKind::File,
        ValueKind::List,
        ValueKind::Map,
    ],
};

const INTERNAL_TYPES: CodecSet = CodecSet {
    kind: CodecKind::InternalTypes,
    allowed: &[
        ValueKind::Null,
        ValueKind::Bool,
        ValueKind::Int,
        ValueKind::String,
        ValueKind::File,
        ValueKind::List,
        ValueKind::Map,
        ValueKind::NodeRef,
    ],
};

const FINGERPRINT_TYPES: CodecSet = CodecSet {
    kind: CodecKind::FingerprintTypes,
    allowed: &[
        ValueKind::Null,
        ValueKind::Bool,
        ValueKind::Int,
        ValueKind::String,
        ValueKind::File,
        ValueKind::List,
    ],
};

/// Registry of the codec sets shared by all contexts of one invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codecs;

impl Codecs {
    /// Create the registry.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Codec set for user-provided values.
    #[must_use]
    pub fn user_types(&self) -> CodecSet {
        USER_TYPES
    }

    /// Codec set for internal build-tree state.
    #[must_use]
    pub fn internal_types(&self) -> CodecSet {
        INTERNAL_TYPES
    }

    /// Codec set for fingerprint records.
    #[must_use]
    pub fn fingerprint_types(&self) -> CodecSet {
        FINGERPRINT_TYPES
    }

    /// Codec set for a given kind.
    #[must_use]
    pub fn for_kind(&self, kind: CodecKind) -> CodecSet {
        match kind {
            CodecKind::UserTypes => self.user_types(),
            CodecKind::InternalTypes => self.internal_types(),
            CodecKind::FingerprintTypes => self.fingerprint_types(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_refs_are_internal_only() {
        let codecs = Codecs::new();
        assert!(codecs.internal_types().permits(ValueKind::NodeRef));
        assert!(!codecs.user_types().permits(ValueKind::NodeRef));
        assert!(!codecs.fingerprint_types().permits(ValueKind::NodeRef));
    }

    #[test]
    fn fingerprints_reject_maps() {
        let codecs = Codecs::new();
        assert!(!codecs.fingerprint_types().permits(ValueKind::Map));
        assert!(codecs.fingerprint_types().permits(ValueKind::File));
    }
}
