//! Low-level binary primitives for state streams.
//!
//! All multi-byte integers are little-endian and fixed-width so that writing
//! the same object graph twice produces byte-identical output. Strings and
//! byte slices are length-prefixed; nothing relies on stream EOF.

use crate::{Error, Result};
use std::io::{Read, Write};

/// Writes binary primitives to an output stream, tracking the byte offset.
pub struct Encoder<W: Write> {
    out: W,
    position: u64,
}

impl<W: Write> Encoder<W> {
    /// Create an encoder over the given output stream.
    pub fn new(out: W) -> Self {
        Self { out, position: 0 }
    }

    /// Current byte offset from the start of the stream.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Write raw bytes without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.out
            .write_all(bytes)
            .map_err(|e| Error::io(e, "write", self.position))?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_raw(&[value])
    }

    /// Write a boolean as a single byte.
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    /// Write a fixed-width little-endian u32.
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a fixed-width little-endian u64.
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a fixed-width little-endian i64.
    pub fn write_i64(&mut self, value: i64) -> Result<()> {
        self.write_raw(&value.to_le_bytes())
    }

    /// Write a collection length as a u64.
    pub fn write_len(&mut self, len: usize) -> Result<()> {
        self.write_u64(len as u64)
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_len(value.len())?;
        self.write_raw(value.as_bytes())
    }

    /// Write length-prefixed bytes.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_len(value.len())?;
        self.write_raw(value)
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        self.out
            .flush()
            .map_err(|e| Error::io(e, "flush", self.position))
    }

    /// Consume the encoder, returning the underlying stream.
    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Reads binary primitives from an input stream, tracking the byte offset.
pub struct Decoder<R: Read> {
    input: R,
    position: u64,
}

/// Upper bound for a single length prefix, guarding against reading a
/// corrupted length as an allocation size.
const MAX_LEN: u64 = 1 << 32;

impl<R: Read> Decoder<R> {
    /// Create a decoder over the given input stream.
    pub fn new(input: R) -> Self {
        Self { input, position: 0 }
    }

    /// Current byte offset from the start of the stream.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.input.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::corrupt(format!("unexpected end of stream at offset {}", self.position))
            } else {
                Error::io(e, "read", self.position)
            }
        })?;
        self.position += buf.len() as u64;
        Ok(())
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Read a boolean.
    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::corrupt(format!(
                "invalid boolean byte {other:#04x} at offset {}",
                self.position
            ))),
        }
    }

    /// Read a fixed-width little-endian u32.
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a fixed-width little-endian u64.
    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a fixed-width little-endian i64.
    pub fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    /// Read a collection length.
    pub fn read_len(&mut self) -> Result<usize> {
        let len = self.read_u64()?;
        if len > MAX_LEN {
            return Err(Error::corrupt(format!(
                "implausible length {len} at offset {}",
                self.position
            )));
        }
        Ok(usize::try_from(len)
            .map_err(|_| Error::corrupt(format!("length {len} exceeds platform usize")))?)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| {
            Error::corrupt(format!(
                "invalid UTF-8 in string at offset {}: {e}",
                self.position
            ))
        })
    }

    /// Read length-prefixed bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_len()?;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}
