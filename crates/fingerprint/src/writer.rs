//! Streaming writer for the build- and project-scoped fingerprint files.

use crate::inputs::{write_end, BuildInput, ProjectInput};
use crate::Result;
use std::io::Write;
use trellis_model::ProjectPath;
use trellis_serialize::{CodecKind, Codecs, IsolateOwner, WriteContext};

/// Writes recorded inputs to the two fingerprint spool streams as they are
/// observed.
pub struct FingerprintWriter {
    build: WriteContext<Box<dyn Write + Send>>,
    project: WriteContext<Box<dyn Write + Send>>,
}

impl FingerprintWriter {
    /// Create a writer over the two spool streams.
    #[must_use]
    pub fn new(
        build: Box<dyn Write + Send>,
        project: Box<dyn Write + Send>,
        codecs: Codecs,
    ) -> Self {
        Self {
            build: WriteContext::new(build, codecs),
            project: WriteContext::new(project, codecs),
        }
    }

    /// Append a build-scoped input.
    ///
    /// # Errors
    ///
    /// Propagates encoding and I/O failures.
    pub fn write_build_input(&mut self, input: &BuildInput) -> Result<()> {
        self.build
            .with_isolate(
                IsolateOwner::BuildTree,
                CodecKind::FingerprintTypes,
                |ctx| input.encode(ctx),
            )
            .map_err(Into::into)
    }

    /// Append a project-scoped input.
    ///
    /// # Errors
    ///
    /// Propagates encoding and I/O failures.
    pub fn write_project_input(&mut self, project: &ProjectPath, input: &BuildInput) -> Result<()> {
        self.write_project_entry(&ProjectInput::Input {
            project: project.clone(),
            input: input.clone(),
        })
    }

    /// Record that `consumer` consumed the configured state of `target`.
    ///
    /// # Errors
    ///
    /// Propagates encoding and I/O failures.
    pub fn write_project_dependency(
        &mut self,
        consumer: &ProjectPath,
        target: &ProjectPath,
    ) -> Result<()> {
        self.write_project_entry(&ProjectInput::ProjectDependency {
            consumer: consumer.clone(),
            target: target.clone(),
        })
    }

    /// Append a pre-decoded project entry (used when merging reused
    /// projects' inputs into a fresh stream).
    ///
    /// # Errors
    ///
    /// Propagates encoding and I/O failures.
    pub fn write_project_entry(&mut self, entry: &ProjectInput) -> Result<()> {
        self.project
            .with_isolate(
                IsolateOwner::BuildTree,
                CodecKind::FingerprintTypes,
                |ctx| entry.encode(ctx),
            )
            .map_err(Into::into)
    }

    /// Terminate both streams and flush.
    ///
    /// # Errors
    ///
    /// Propagates encoding and I/O failures.
    pub fn finish(mut self) -> Result<()> {
        write_end(&mut self.build)?;
        write_end(&mut self.project)?;
        self.build.finish()?;
        self.project.finish()?;
        Ok(())
    }
}
