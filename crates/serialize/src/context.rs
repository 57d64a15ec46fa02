//! Isolate-scoped write and read contexts.
//!
//! A context wraps the raw encoder or decoder with a stack of isolate frames.
//! Each frame names the build that owns the sub-graph being serialized and
//! selects the codec set that is legal inside it. Value-sharing tables (string
//! deduplication) are scoped to the frame, so object identity never leaks
//! between builds. Every `with_isolate` on the write side must be mirrored by
//! an identical `with_isolate` on the read side.

use crate::codecs::{CodecKind, CodecSet, Codecs};
use crate::encoder::{Decoder, Encoder};
use crate::value::{Value, ValueKind};
use crate::{Error, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use tracing::trace;

/// Identifies the build that owns the object sub-graph being serialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IsolateOwner {
    /// State shared by the whole build tree.
    BuildTree,
    /// State owned by one build, identified by its identity path.
    Build(String),
}

impl std::fmt::Display for IsolateOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BuildTree => f.write_str("build tree"),
            Self::Build(path) => write!(f, "build {path}"),
        }
    }
}

/// Observer for debug frames: labeled byte ranges in a state stream.
///
/// Frames have no semantic effect on the stream; they exist so a diagnostic
/// listener can attribute byte ranges to protocol sections.
pub trait FrameTracer {
    /// Called when a labeled region has been fully written or read.
    fn frame(&mut self, label: &str, start: u64, end: u64);
}

struct WriteIsolate {
    owner: IsolateOwner,
    codec: CodecSet,
    shared_strings: HashMap<String, u32>,
}

/// Writes an object graph to a state stream.
pub struct WriteContext<W: Write> {
    encoder: Encoder<W>,
    codecs: Codecs,
    isolates: Vec<WriteIsolate>,
    tracer: Option<Box<dyn FrameTracer>>,
}

impl<W: Write> WriteContext<W> {
    /// Create a context with a root isolate owned by the build tree, using
    /// the internal-types codec.
    pub fn new(out: W, codecs: Codecs) -> Self {
        Self {
            encoder: Encoder::new(out),
            codecs,
            isolates: vec![WriteIsolate {
                owner: IsolateOwner::BuildTree,
                codec: codecs.internal_types(),
                shared_strings: HashMap::new(),
            }],
            tracer: None,
        }
    }

    /// Attach a debug-frame tracer.
    pub fn set_tracer(&mut self, tracer: Box<dyn FrameTracer>) {
        self.tracer = Some(tracer);
    }

    /// Run `f` inside a nested isolate owned by `owner` using the given codec
    /// set. The frame is popped when `f` returns, success or failure.
    pub fn with_isolate<T>(
        &mut self,
        owner: IsolateOwner,
        codec: CodecKind,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.isolates.push(WriteIsolate {
            owner,
            codec: self.codecs.for_kind(codec),
            shared_strings: HashMap::new(),
        });
        let result = f(self);
        self.isolates.pop();
        result
    }

    /// Run `f` as a labeled diagnostic region.
    pub fn with_debug_frame<T>(
        &mut self,
        label: &str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let start = self.encoder.position();
        let result = f(self)?;
        let end = self.encoder.position();
        trace!(label, start, end, "wrote state frame");
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.frame(label, start, end);
        }
        Ok(result)
    }

    // The root frame is pushed in `new` and never popped.
    #[allow(clippy::unwrap_used)]
    fn current(&mut self) -> &mut WriteIsolate {
        self.isolates.last_mut().unwrap()
    }

    /// Owner of the innermost isolate.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn current_owner(&self) -> &IsolateOwner {
        &self.isolates.last().unwrap().owner
    }

    /// Write a string through the per-isolate sharing table. Repeated strings
    /// within one isolate are written once and referenced by id afterwards.
    pub fn write_shared_string(&mut self, value: &str) -> Result<()> {
        if let Some(&id) = self.current().shared_strings.get(value) {
            self.encoder.write_u8(1)?;
            return self.encoder.write_u32(id);
        }
        let id = u32::try_from(self.current().shared_strings.len())
            .map_err(|_| Error::corrupt("shared string table overflow"))?;
        self.current().shared_strings.insert(value.to_string(), id);
        self.encoder.write_u8(0)?;
        self.encoder.write_string(value)
    }

    /// Write a size-prefixed collection.
    pub fn write_collection<T>(
        &mut self,
        items: &[T],
        mut f: impl FnMut(&mut Self, &T) -> Result<()>,
    ) -> Result<()> {
        self.encoder.write_len(items.len())?;
        for item in items {
            f(self, item)?;
        }
        Ok(())
    }

    /// Write a list of strings (count-prefixed, order-preserving).
    pub fn write_strings(&mut self, values: &[String]) -> Result<()> {
        self.write_collection(values, |ctx, v| ctx.write_string(v))
    }

    /// Write a file system path.
    pub fn write_file(&mut self, path: &std::path::Path) -> Result<()> {
        self.encoder.write_string(&path.to_string_lossy())
    }

    /// Write a dynamically typed value, enforcing the active codec set.
    pub fn write_value(&mut self, value: &Value) -> Result<()> {
        let codec = self.current().codec;
        self.write_value_in(value, codec)
    }

    fn write_value_in(&mut self, value: &Value, codec: CodecSet) -> Result<()> {
        let kind = value.kind();
        if !codec.permits(kind) {
            return Err(Error::UnsupportedValue {
                kind: kind.name(),
                codec: codec.kind().name(),
            });
        }
        self.encoder.write_u8(kind.tag())?;
        match value {
            Value::Null => Ok(()),
            Value::Bool(b) => self.encoder.write_bool(*b),
            Value::Int(i) => self.encoder.write_i64(*i),
            Value::String(s) => self.encoder.write_string(s),
            Value::File(p) => self.write_file(p),
            Value::List(items) => {
                self.encoder.write_len(items.len())?;
                for item in items {
                    self.write_value_in(item, codec)?;
                }
                Ok(())
            }
            Value::Map(entries) => {
                self.encoder.write_len(entries.len())?;
                for (key, item) in entries {
                    self.encoder.write_string(key)?;
                    self.write_value_in(item, codec)?;
                }
                Ok(())
            }
            Value::NodeRef(id) => self.encoder.write_u64(*id),
        }
    }

    /// Flush and return the underlying stream.
    pub fn finish(mut self) -> Result<W> {
        self.encoder.flush()?;
        Ok(self.encoder.into_inner())
    }
}

impl<W: Write> Deref for WriteContext<W> {
    type Target = Encoder<W>;

    fn deref(&self) -> &Self::Target {
        &self.encoder
    }
}

impl<W: Write> DerefMut for WriteContext<W> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.encoder
    }
}

struct ReadIsolate {
    owner: IsolateOwner,
    codec: CodecSet,
    shared_strings: Vec<String>,
}

/// Reads an object graph from a state stream, mirroring [`WriteContext`].
pub struct ReadContext<R: Read> {
    decoder: Decoder<R>,
    codecs: Codecs,
    isolates: Vec<ReadIsolate>,
    tracer: Option<Box<dyn FrameTracer>>,
}

impl<R: Read> ReadContext<R> {
    /// Create a context with a root isolate owned by the build tree.
    pub fn new(input: R, codecs: Codecs) -> Self {
        Self {
            decoder: Decoder::new(input),
            codecs,
            isolates: vec![ReadIsolate {
                owner: IsolateOwner::BuildTree,
                codec: codecs.internal_types(),
                shared_strings: Vec::new(),
            }],
            tracer: None,
        }
    }

    /// Attach a debug-frame tracer.
    pub fn set_tracer(&mut self, tracer: Box<dyn FrameTracer>) {
        self.tracer = Some(tracer);
    }

    /// Mirror of [`WriteContext::with_isolate`].
    pub fn with_isolate<T>(
        &mut self,
        owner: IsolateOwner,
        codec: CodecKind,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.isolates.push(ReadIsolate {
            owner,
            codec: self.codecs.for_kind(codec),
            shared_strings: Vec::new(),
        });
        let result = f(self);
        self.isolates.pop();
        result
    }

    /// Mirror of [`WriteContext::with_debug_frame`].
    pub fn with_debug_frame<T>(
        &mut self,
        label: &str,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let start = self.decoder.position();
        let result = f(self)?;
        let end = self.decoder.position();
        trace!(label, start, end, "read state frame");
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.frame(label, start, end);
        }
        Ok(result)
    }

    // The root frame is pushed in `new` and never popped.
    #[allow(clippy::unwrap_used)]
    fn current(&mut self) -> &mut ReadIsolate {
        self.isolates.last_mut().unwrap()
    }

    /// Owner of the innermost isolate.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn current_owner(&self) -> &IsolateOwner {
        &self.isolates.last().unwrap().owner
    }

    /// Read a string written through the per-isolate sharing table.
    pub fn read_shared_string(&mut self) -> Result<String> {
        match self.decoder.read_u8()? {
            0 => {
                let value = self.decoder.read_string()?;
                self.current().shared_strings.push(value.clone());
                Ok(value)
            }
            1 => {
                let id = self.decoder.read_u32()?;
                self.current()
                    .shared_strings
                    .get(id as usize)
                    .cloned()
                    .ok_or(Error::DanglingReference { id })
            }
            other => Err(Error::corrupt(format!(
                "invalid shared string marker {other:#04x}"
            ))),
        }
    }

    /// Read a size-prefixed collection, applying `f` once per element.
    pub fn read_collection(&mut self, mut f: impl FnMut(&mut Self) -> Result<()>) -> Result<()> {
        let len = self.decoder.read_len()?;
        for _ in 0..len {
            f(self)?;
        }
        Ok(())
    }

    /// Read a size-prefixed collection into a list.
    pub fn read_list<T>(&mut self, mut f: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let len = self.decoder.read_len()?;
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            items.push(f(self)?);
        }
        Ok(items)
    }

    /// Read a list of strings.
    pub fn read_strings(&mut self) -> Result<Vec<String>> {
        self.read_list(Self::read_string_item)
    }

    fn read_string_item(&mut self) -> Result<String> {
        self.decoder.read_string()
    }

    /// Read a file system path.
    pub fn read_file(&mut self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.decoder.read_string()?))
    }

    /// Read a dynamically typed value, enforcing the active codec set.
    pub fn read_value(&mut self) -> Result<Value> {
        let codec = self.current().codec;
        self.read_value_in(codec)
    }

    fn read_value_in(&mut self, codec: CodecSet) -> Result<Value> {
        let tag = self.decoder.read_u8()?;
        let kind = ValueKind::from_tag(tag)
            .ok_or_else(|| Error::corrupt(format!("unknown value tag {tag:#04x}")))?;
        if !codec.permits(kind) {
            return Err(Error::UnsupportedValue {
                kind: kind.name(),
                codec: codec.kind().name(),
            });
        }
        Ok(match kind {
            ValueKind::Null => Value::Null,
            ValueKind::Bool => Value::Bool(self.decoder.read_bool()?),
            ValueKind::Int => Value::Int(self.decoder.read_i64()?),
            ValueKind::String => Value::String(self.decoder.read_string()?),
            ValueKind::File => Value::File(self.read_file()?),
            ValueKind::List => {
                let len = self.decoder.read_len()?;
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(self.read_value_in(codec)?);
                }
                Value::List(items)
            }
            ValueKind::Map => {
                let len = self.decoder.read_len()?;
                let mut entries = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    let key = self.decoder.read_string()?;
                    entries.push((key, self.read_value_in(codec)?));
                }
                Value::Map(entries)
            }
            ValueKind::NodeRef => Value::NodeRef(self.decoder.read_u64()?),
        })
    }
}

impl<R: Read> Deref for ReadContext<R> {
    type Target = Decoder<R>;

    fn deref(&self) -> &Self::Target {
        &self.decoder
    }
}

impl<R: Read> DerefMut for ReadContext<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.decoder
    }
}
