//! Isolate-scoped binary serialization engine for trellis configuration state.
//!
//! State files are written and read through paired contexts: every `write_*`
//! call in the protocol has a byte-exact `read_*` counterpart in the same
//! relative order. The engine provides:
//!
//! - [`Encoder`]/[`Decoder`]: deterministic little-endian primitives with
//!   length-prefixed strings, bytes and collections
//! - [`WriteContext`]/[`ReadContext`]: an isolate stack scoping value-sharing
//!   tables to the build that owns a sub-graph, plus diagnostic debug frames
//! - [`Codecs`]: three codec sets (user, internal, fingerprint) sharing one
//!   wire format while restricting which [`Value`] kinds are legal in each
//!
//! There is no reflection and no schema: the protocol order *is* the schema,
//! and any divergence between writer and reader surfaces as a corruption
//! error rather than silently misread data.

mod codecs;
mod context;
mod encoder;
mod error;
mod transform;
mod value;

pub use codecs::{CodecKind, CodecSet, Codecs};
pub use context::{FrameTracer, IsolateOwner, ReadContext, WriteContext};
pub use encoder::{Decoder, Encoder};
pub use error::{Error, Result};
pub use transform::{Passthrough, StreamTransform};
pub use value::{Value, ValueKind};
