//! Cached intermediate models and project metadata.
//!
//! Both are value stores living in their own state files next to the work
//! state: tooling models keyed by project and model name, and per-project
//! dependency-resolution metadata. On a partial update the values of
//! invalidated projects are dropped and recomputed; everything else is
//! carried over.

use crate::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::io::{Read, Write};
use std::sync::Mutex;
use tracing::debug;
use trellis_model::ProjectPath;
use trellis_serialize::{
    CodecKind, Codecs, Error as SerializeError, IsolateOwner, ReadContext, Value, WriteContext,
};

const VALUES_SENTINEL: u32 = 0x1ec_ac8e;

/// Key of a cached tooling model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    /// Owning project, or `None` for build-level models.
    pub project: Option<ProjectPath>,
    /// Name of the model.
    pub model_name: String,
}

impl ModelKey {
    /// Rendered form used in entry metadata.
    #[must_use]
    pub fn render(&self) -> String {
        match &self.project {
            Some(project) => format!("{project}/{}", self.model_name),
            None => self.model_name.clone(),
        }
    }
}

/// A key that can be written to and read from a values state file.
pub trait ValueKey: Clone + Eq + Hash {
    /// Encode the key.
    ///
    /// # Errors
    ///
    /// Propagates encoding failures.
    fn encode<W: Write>(&self, ctx: &mut WriteContext<W>) -> trellis_serialize::Result<()>;

    /// Decode a key.
    ///
    /// # Errors
    ///
    /// Propagates decoding failures.
    fn decode<R: Read>(ctx: &mut ReadContext<R>) -> trellis_serialize::Result<Self>;

    /// The project this key belongs to, if any.
    fn project(&self) -> Option<&ProjectPath>;
}

impl ValueKey for ModelKey {
    fn encode<W: Write>(&self, ctx: &mut WriteContext<W>) -> trellis_serialize::Result<()> {
        match &self.project {
            Some(project) => {
                ctx.write_bool(true)?;
                ctx.write_string(project.as_str())?;
            }
            None => ctx.write_bool(false)?,
        }
        ctx.write_string(&self.model_name)
    }

    fn decode<R: Read>(ctx: &mut ReadContext<R>) -> trellis_serialize::Result<Self> {
        let project = if ctx.read_bool()? {
            Some(decode_project_path(ctx)?)
        } else {
            None
        };
        Ok(Self {
            project,
            model_name: ctx.read_string()?,
        })
    }

    fn project(&self) -> Option<&ProjectPath> {
        self.project.as_ref()
    }
}

impl ValueKey for ProjectPath {
    fn encode<W: Write>(&self, ctx: &mut WriteContext<W>) -> trellis_serialize::Result<()> {
        ctx.write_string(self.as_str())
    }

    fn decode<R: Read>(ctx: &mut ReadContext<R>) -> trellis_serialize::Result<Self> {
        decode_project_path(ctx)
    }

    fn project(&self) -> Option<&ProjectPath> {
        Some(self)
    }
}

fn decode_project_path<R: Read>(ctx: &mut ReadContext<R>) -> trellis_serialize::Result<ProjectPath> {
    let raw = ctx.read_string()?;
    ProjectPath::new(raw.clone())
        .map_err(|_| SerializeError::corrupt(format!("invalid project path {raw:?}")))
}

/// Load-or-create store of cached values backing one state file.
pub struct ValuesController<K> {
    codecs: Codecs,
    values: Mutex<HashMap<K, Value>>,
}

/// Cached tooling models, keyed by project and model name.
pub type IntermediateModelController = ValuesController<ModelKey>;

/// Cached per-project dependency-resolution metadata.
pub type ProjectMetadataController = ValuesController<ProjectPath>;

impl<K: ValueKey> ValuesController<K> {
    /// Create an empty controller.
    #[must_use]
    pub fn new() -> Self {
        Self {
            codecs: Codecs::new(),
            values: Mutex::new(HashMap::new()),
        }
    }

    fn values(&self) -> Result<std::sync::MutexGuard<'_, HashMap<K, Value>>> {
        self.values
            .lock()
            .map_err(|_| Error::invalid_state("values lock poisoned"))
    }

    /// Return the cached value for `key`, creating and recording it when
    /// absent.
    ///
    /// # Errors
    ///
    /// Propagates the creation failure.
    pub fn load_or_create(
        &self,
        key: K,
        create: impl FnOnce() -> Result<Value>,
    ) -> Result<Value> {
        if let Some(value) = self.values()?.get(&key) {
            return Ok(value.clone());
        }
        // Created outside the lock: creation may itself consult the cache.
        let value = create()?;
        self.values()?.insert(key, value.clone());
        Ok(value)
    }

    /// All keys currently held, for entry metadata.
    ///
    /// # Errors
    ///
    /// Fails only when the values lock is poisoned.
    pub fn keys(&self) -> Result<Vec<K>> {
        Ok(self.values()?.keys().cloned().collect())
    }

    /// Whether any value has been loaded or created.
    ///
    /// # Errors
    ///
    /// Fails only when the values lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.values()?.is_empty())
    }

    /// Restore values from a state stream, dropping entries owned by
    /// `invalid` projects so they are recomputed.
    ///
    /// # Errors
    ///
    /// Returns a corruption error for a malformed stream.
    pub fn restore<R: Read>(
        &self,
        input: R,
        invalid: &BTreeSet<ProjectPath>,
    ) -> Result<usize> {
        let mut ctx = ReadContext::new(input, self.codecs);
        let restored = ctx.with_isolate(IsolateOwner::BuildTree, CodecKind::UserTypes, |ctx| {
            let count = ctx.read_len()?;
            let mut entries = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let key = K::decode(ctx)?;
                let value = ctx.read_value()?;
                entries.push((key, value));
            }
            Ok(entries)
        })?;
        if ctx.read_u32()? != VALUES_SENTINEL {
            return Err(SerializeError::corrupt("corrupt state file").into());
        }
        let mut values = self.values()?;
        let mut kept = 0;
        for (key, value) in restored {
            let dropped = key.project().is_some_and(|p| invalid.contains(p));
            if dropped {
                continue;
            }
            values.insert(key, value);
            kept += 1;
        }
        debug!(kept, "restored cached values");
        Ok(kept)
    }

    /// Write all held values to a state stream.
    ///
    /// # Errors
    ///
    /// Propagates encoding and I/O failures.
    pub fn write<W: Write>(&self, out: W) -> Result<()> {
        let entries: Vec<(K, Value)> = self
            .values()?
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut ctx = WriteContext::new(out, self.codecs);
        ctx.with_isolate(IsolateOwner::BuildTree, CodecKind::UserTypes, |ctx| {
            ctx.write_len(entries.len())?;
            for (key, value) in &entries {
                key.encode(ctx)?;
                ctx.write_value(value)?;
            }
            Ok(())
        })?;
        ctx.write_u32(VALUES_SENTINEL)?;
        ctx.finish()?;
        Ok(())
    }
}

impl<K: ValueKey> Default for ValuesController<K> {
    fn default() -> Self {
        Self::new()
    }
}
