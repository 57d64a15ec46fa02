//! Pluggable byte-stream transform applied to encryptable state files.
//!
//! The cache treats encryption as a transform over the serialized byte
//! stream. Implementations supply the key material; the default is a
//! pass-through. The key fingerprint is recorded as a build-scoped input so
//! switching keys invalidates existing entries.

use std::io::{Read, Write};

/// Transform over state-file byte streams.
///
/// Implementations typically source their key from the
/// `TRELLIS_ENCRYPTION_KEY` environment variable or a keystore file.
pub trait StreamTransform: Send + Sync {
    /// Fingerprint of the key material, or `None` when no transform is
    /// applied.
    fn key_hash(&self) -> Option<String>;

    /// Wrap a writer so bytes are transformed on the way out.
    fn wrap_write<'a>(&self, inner: Box<dyn Write + Send + 'a>) -> Box<dyn Write + Send + 'a>;

    /// Wrap a reader so bytes are restored on the way in.
    fn wrap_read<'a>(&self, inner: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a>;
}

/// The identity transform: state files are stored as plain bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl StreamTransform for Passthrough {
    fn key_hash(&self) -> Option<String> {
        None
    }

    fn wrap_write<'a>(&self, inner: Box<dyn Write + Send + 'a>) -> Box<dyn Write + Send + 'a> {
        inner
    }

    fn wrap_read<'a>(&self, inner: Box<dyn Read + Send + 'a>) -> Box<dyn Read + Send + 'a> {
        inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn passthrough_leaves_bytes_alone() {
        let transform = Passthrough;
        let mut out: Vec<u8> = Vec::new();
        {
            let mut w = transform.wrap_write(Box::new(&mut out));
            w.write_all(b"state").unwrap();
            w.flush().unwrap();
        }
        assert_eq!(out, b"state");
        let mut r = transform.wrap_read(Box::new(Cursor::new(out)));
        let mut buf = String::new();
        r.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "state");
        assert!(transform.key_hash().is_none());
    }
}
