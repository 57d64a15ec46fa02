//! Recorded configuration inputs and their wire encoding.
//!
//! Each fingerprint file is a flat stream of tagged entries terminated by an
//! end marker. The encoding uses the fingerprint codec set, which permits
//! plain values but no node references.

use std::io::{Read, Write};
use std::path::PathBuf;
use trellis_model::ProjectPath;
use trellis_serialize::{Error as SerializeError, ReadContext, Result, Value, WriteContext};

const END: u8 = 0;

/// A build-scoped configuration input.
///
/// Any mismatch between the recorded value and the current environment
/// invalidates the whole entry.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildInput {
    /// A file read during configuration, recorded by content hash.
    /// `None` means the file did not exist.
    InputFile {
        /// Path of the file.
        path: PathBuf,
        /// Content hash, or `None` for a missing file.
        hash: Option<String>,
    },
    /// A directory whose entry listing was read during configuration.
    DirectoryContent {
        /// Path of the directory.
        path: PathBuf,
        /// Hash over the directory's entry names.
        hash: Option<String>,
    },
    /// An environment variable read during configuration.
    EnvVar {
        /// Variable name.
        name: String,
        /// Recorded value, or `None` when unset.
        value: Option<String>,
    },
    /// A build property read during configuration.
    BuildProperty {
        /// Property name.
        name: String,
        /// Recorded value, or `None` when unset.
        value: Option<String>,
    },
    /// A user value source; the obtained value is re-obtained on check.
    ValueSource {
        /// Human-readable description of the source.
        description: String,
        /// The value obtained at configuration time.
        obtained: Value,
    },
    /// The init scripts applied to the build, in order.
    InitScripts {
        /// Path and content hash per script.
        hashes: Vec<(PathBuf, Option<String>)>,
    },
    /// The tool itself as an input: its version and start-parameter
    /// properties.
    ToolEnvironment {
        /// Tool version that wrote the entry.
        version: String,
        /// Hash over the start-parameter properties.
        properties_hash: String,
    },
    /// Fingerprint of the encryption key the entry was written with.
    EncryptionKeyHash {
        /// Key hash, or `None` when encryption is off.
        hash: Option<String>,
    },
}

impl BuildInput {
    fn tag(&self) -> u8 {
        match self {
            Self::InputFile { .. } => 1,
            Self::DirectoryContent { .. } => 2,
            Self::EnvVar { .. } => 3,
            Self::BuildProperty { .. } => 4,
            Self::ValueSource { .. } => 5,
            Self::InitScripts { .. } => 6,
            Self::ToolEnvironment { .. } => 7,
            Self::EncryptionKeyHash { .. } => 8,
        }
    }

    pub(crate) fn encode<W: Write>(&self, ctx: &mut WriteContext<W>) -> Result<()> {
        ctx.write_u8(self.tag())?;
        match self {
            Self::InputFile { path, hash } | Self::DirectoryContent { path, hash } => {
                ctx.write_file(path)?;
                write_opt_string(ctx, hash.as_deref())?;
            }
            Self::EnvVar { name, value } | Self::BuildProperty { name, value } => {
                ctx.write_string(name)?;
                write_opt_string(ctx, value.as_deref())?;
            }
            Self::ValueSource {
                description,
                obtained,
            } => {
                ctx.write_string(description)?;
                ctx.write_value(obtained)?;
            }
            Self::InitScripts { hashes } => {
                ctx.write_len(hashes.len())?;
                for (path, hash) in hashes {
                    ctx.write_file(path)?;
                    write_opt_string(ctx, hash.as_deref())?;
                }
            }
            Self::ToolEnvironment {
                version,
                properties_hash,
            } => {
                ctx.write_string(version)?;
                ctx.write_string(properties_hash)?;
            }
            Self::EncryptionKeyHash { hash } => {
                write_opt_string(ctx, hash.as_deref())?;
            }
        }
        Ok(())
    }

    pub(crate) fn decode_tagged<R: Read>(
        ctx: &mut ReadContext<R>,
        tag: u8,
    ) -> Result<Self> {
        Ok(match tag {
            1 => Self::InputFile {
                path: ctx.read_file()?,
                hash: read_opt_string(ctx)?,
            },
            2 => Self::DirectoryContent {
                path: ctx.read_file()?,
                hash: read_opt_string(ctx)?,
            },
            3 => Self::EnvVar {
                name: ctx.read_string()?,
                value: read_opt_string(ctx)?,
            },
            4 => Self::BuildProperty {
                name: ctx.read_string()?,
                value: read_opt_string(ctx)?,
            },
            5 => Self::ValueSource {
                description: ctx.read_string()?,
                obtained: ctx.read_value()?,
            },
            6 => {
                let len = ctx.read_len()?;
                let mut hashes = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    let path = ctx.read_file()?;
                    let hash = read_opt_string(ctx)?;
                    hashes.push((path, hash));
                }
                Self::InitScripts { hashes }
            }
            7 => Self::ToolEnvironment {
                version: ctx.read_string()?,
                properties_hash: ctx.read_string()?,
            },
            8 => Self::EncryptionKeyHash {
                hash: read_opt_string(ctx)?,
            },
            other => {
                return Err(SerializeError::corrupt(format!(
                    "unknown build input tag {other:#04x}"
                )))
            }
        })
    }
}

/// A project-scoped fingerprint entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectInput {
    /// An input recorded while configuring one project.
    Input {
        /// The project whose configuration read the input.
        project: ProjectPath,
        /// The input itself.
        input: BuildInput,
    },
    /// One project consuming the configured state of another; invalidating
    /// the target invalidates the consumer.
    ProjectDependency {
        /// The consuming project.
        consumer: ProjectPath,
        /// The consumed project.
        target: ProjectPath,
    },
}

impl ProjectInput {
    pub(crate) fn encode<W: Write>(&self, ctx: &mut WriteContext<W>) -> Result<()> {
        match self {
            Self::Input { project, input } => {
                ctx.write_u8(1)?;
                ctx.write_string(project.as_str())?;
                input.encode(ctx)?;
            }
            Self::ProjectDependency { consumer, target } => {
                ctx.write_u8(2)?;
                ctx.write_string(consumer.as_str())?;
                ctx.write_string(target.as_str())?;
            }
        }
        Ok(())
    }
}

/// Write the end-of-stream marker.
pub(crate) fn write_end<W: Write>(ctx: &mut WriteContext<W>) -> Result<()> {
    ctx.write_u8(END)?;
    Ok(())
}

/// Read the next build input, or `None` at the end marker.
pub(crate) fn read_build_input<R: Read>(ctx: &mut ReadContext<R>) -> Result<Option<BuildInput>> {
    let tag = ctx.read_u8()?;
    if tag == END {
        return Ok(None);
    }
    BuildInput::decode_tagged(ctx, tag).map(Some)
}

/// Read the next project entry, or `None` at the end marker.
pub(crate) fn read_project_input<R: Read>(
    ctx: &mut ReadContext<R>,
) -> Result<Option<ProjectInput>> {
    let tag = ctx.read_u8()?;
    match tag {
        END => Ok(None),
        1 => {
            let project = read_project_path(ctx)?;
            let input_tag = ctx.read_u8()?;
            let input = BuildInput::decode_tagged(ctx, input_tag)?;
            Ok(Some(ProjectInput::Input { project, input }))
        }
        2 => {
            let consumer = read_project_path(ctx)?;
            let target = read_project_path(ctx)?;
            Ok(Some(ProjectInput::ProjectDependency { consumer, target }))
        }
        other => Err(SerializeError::corrupt(format!(
            "unknown project input tag {other:#04x}"
        ))),
    }
}

fn read_project_path<R: Read>(ctx: &mut ReadContext<R>) -> Result<ProjectPath> {
    let raw = ctx.read_string()?;
    ProjectPath::new(raw.clone())
        .map_err(|_| SerializeError::corrupt(format!("invalid project path {raw:?}")))
}

fn write_opt_string<W: Write>(ctx: &mut WriteContext<W>, value: Option<&str>) -> Result<()> {
    match value {
        Some(s) => {
            ctx.write_bool(true)?;
            ctx.write_string(s)?;
        }
        None => ctx.write_bool(false)?,
    }
    Ok(())
}

fn read_opt_string<R: Read>(ctx: &mut ReadContext<R>) -> Result<Option<String>> {
    if ctx.read_bool()? {
        Ok(Some(ctx.read_string()?))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_serialize::Codecs;

    fn round_trip_build(input: &BuildInput) -> BuildInput {
        let codecs = Codecs::new();
        let mut ctx = WriteContext::new(Vec::new(), codecs);
        input.encode(&mut ctx).unwrap();
        write_end(&mut ctx).unwrap();
        let buf = ctx.finish().unwrap();
        let mut ctx = ReadContext::new(buf.as_slice(), codecs);
        let restored = read_build_input(&mut ctx).unwrap().unwrap();
        assert!(read_build_input(&mut ctx).unwrap().is_none());
        restored
    }

    #[test]
    fn build_inputs_round_trip() {
        for input in [
            BuildInput::InputFile {
                path: PathBuf::from("settings.trellis"),
                hash: Some("ab12".to_string()),
            },
            BuildInput::EnvVar {
                name: "CC".to_string(),
                value: None,
            },
            BuildInput::ValueSource {
                description: "system property 'os.name'".to_string(),
                obtained: Value::String("linux".to_string()),
            },
            BuildInput::InitScripts {
                hashes: vec![(PathBuf::from("init.trellis"), Some("ff".to_string()))],
            },
            BuildInput::EncryptionKeyHash { hash: None },
        ] {
            assert_eq!(round_trip_build(&input), input);
        }
    }

    #[test]
    fn project_entries_round_trip() {
        let codecs = Codecs::new();
        let entries = vec![
            ProjectInput::Input {
                project: ProjectPath::new(":app").unwrap(),
                input: BuildInput::BuildProperty {
                    name: "flavor".to_string(),
                    value: Some("release".to_string()),
                },
            },
            ProjectInput::ProjectDependency {
                consumer: ProjectPath::new(":app").unwrap(),
                target: ProjectPath::new(":lib").unwrap(),
            },
        ];
        let mut ctx = WriteContext::new(Vec::new(), codecs);
        for e in &entries {
            e.encode(&mut ctx).unwrap();
        }
        write_end(&mut ctx).unwrap();
        let buf = ctx.finish().unwrap();

        let mut ctx = ReadContext::new(buf.as_slice(), codecs);
        let mut restored = Vec::new();
        while let Some(e) = read_project_input(&mut ctx).unwrap() {
            restored.push(e);
        }
        assert_eq!(restored, entries);
    }
}
