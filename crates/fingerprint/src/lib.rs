//! Configuration input fingerprinting for the trellis configuration cache.
//!
//! While configuration runs, the [`FingerprintController`] records every
//! input the build logic reads (files, environment variables, build
//! properties, value sources, init scripts) into two streams: build-scoped
//! inputs that invalidate the whole entry when stale, and project-scoped
//! inputs that invalidate only the affected projects plus everything that
//! consumed their configured state. Before a later invocation reuses the
//! entry, the same controller checks the recorded streams against the
//! current environment.

mod checker;
mod controller;
mod environment;
mod error;
mod inputs;
mod writer;

pub use controller::FingerprintController;
pub use environment::BuildEnvironment;
pub use error::{Error, Result};
pub use inputs::{BuildInput, ProjectInput};
pub use writer::FingerprintWriter;
