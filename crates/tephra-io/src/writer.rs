//! Per-step particle output.
//!
//! The writer picks the best backend compiled into this build and writes
//! one artifact per step. Every write is collective over the world
//! communicator and ends with an all-reduce of the local outcome, so a
//! failure on any participant fails the write everywhere and no
//! participant runs ahead into the next step.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use tephra_comm::NodeTopology;
use tephra_core::comm::decode_u64;
use tephra_core::{Communicator, ParticleFields, ReduceOp};

use crate::codec::{
    self, align_up, ArtifactHeader, ArtifactKind, SubfileHeader, ARTIFACT_HEADER_LEN,
    SUBFILE_HEADER_LEN,
};
use crate::config::OutputConfig;
use crate::error::OutputError;
use crate::manifest::SubfileManifest;
use crate::naming::{file_inode, write_atomically, ArtifactName};
use crate::subfiling::SubfilingConfig;

/// Serialization backends, in preference order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Binary records; supports subfiling.
    Binary,
    /// One CSV row per particle.
    Csv,
}

impl OutputFormat {
    /// Every format, most preferred first.
    pub const ALL: [OutputFormat; 2] = [OutputFormat::Binary, OutputFormat::Csv];

    /// Whether this build includes the backend.
    pub const fn is_available(self) -> bool {
        match self {
            Self::Binary => cfg!(feature = "binary-output"),
            Self::Csv => cfg!(feature = "csv-output"),
        }
    }

    /// Most preferred available backend, if any.
    pub fn preferred() -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.is_available())
    }

    /// Artifact file extension.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Binary => "bin",
            Self::Csv => "csv",
        }
    }

    /// Whether the backend can write one subfile per node.
    pub fn supports_partitioning(self) -> bool {
        matches!(self, Self::Binary)
    }
}

/// Writes particle state once per output step.
#[derive(Debug)]
pub struct OutputWriter {
    config: OutputConfig,
    format: Option<OutputFormat>,
    warned: bool,
}

impl OutputWriter {
    /// Writer using the preferred available backend.
    pub fn new(config: OutputConfig) -> Self {
        Self::with_format(config, OutputFormat::preferred())
    }

    /// Writer with an explicit backend; `None` disables output.
    pub fn with_format(config: OutputConfig, format: Option<OutputFormat>) -> Self {
        Self {
            config,
            format,
            warned: false,
        }
    }

    /// Backend in use.
    pub fn format(&self) -> Option<OutputFormat> {
        self.format
    }

    /// Configuration in use.
    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Whether writes produce subfiles.
    pub fn partitioned(&self) -> bool {
        self.config.partitioned && self.format.is_some_and(OutputFormat::supports_partitioning)
    }

    /// Name of the artifact written at `step`, if output is enabled.
    pub fn artifact_name(&self, step: u64) -> Option<ArtifactName> {
        self.format.map(|f| {
            ArtifactName::new(
                self.config.dir.clone(),
                self.config.base_name.clone(),
                step,
                f.extension(),
            )
        })
    }

    /// Write this participant's particles for `step`. Collective over
    /// `world`.
    ///
    /// Returns the subfiles this participant produced: one name on node
    /// leaders in partitioned mode, empty otherwise.
    pub fn write(
        &mut self,
        world: &dyn Communicator,
        topology: &NodeTopology,
        step: u64,
        time: f64,
        fields: ParticleFields<'_>,
    ) -> Result<SubfileManifest, OutputError> {
        let (Some(format), Some(name)) = (self.format, self.artifact_name(step)) else {
            if !self.warned {
                self.warned = true;
                if world.rank() == 0 {
                    tracing::warn!("no particle output backend enabled in this build; output skipped");
                }
            }
            return Ok(SubfileManifest::new());
        };

        match format {
            OutputFormat::Binary if self.partitioned() => {
                self.write_partitioned(world, topology, &name, time, fields)
            }
            OutputFormat::Binary => {
                self.write_gathered(world, &name, time, fields, write_binary)?;
                Ok(SubfileManifest::new())
            }
            OutputFormat::Csv => {
                self.write_gathered(world, &name, time, fields, write_csv)?;
                Ok(SubfileManifest::new())
            }
        }
    }

    /// Gather every participant's records to world rank 0 and let it write
    /// one complete artifact.
    fn write_gathered(
        &self,
        world: &dyn Communicator,
        name: &ArtifactName,
        time: f64,
        fields: ParticleFields<'_>,
        emit: fn(&Path, u64, f64, &[Vec<u8>]) -> Result<(), OutputError>,
    ) -> Result<(), OutputError> {
        let payload = codec::encode_records(fields.records());
        let local = match world.gather_bytes(&payload, 0)? {
            Some(parts) => {
                let path = name.path();
                create_parent(&path)
                    .and_then(|()| emit(&path, name.step(), time, &parts))
                    .inspect(|()| {
                        tracing::debug!(step = name.step(), path = %path.display(), "wrote particle artifact");
                    })
            }
            None => Ok(()),
        };
        settle(world, local)
    }

    fn write_partitioned(
        &self,
        world: &dyn Communicator,
        topology: &NodeTopology,
        name: &ArtifactName,
        time: f64,
        fields: ParticleFields<'_>,
    ) -> Result<SubfileManifest, OutputError> {
        let participant = *topology.participant();
        let total = world.all_reduce_f64(fields.len() as f64, ReduceOp::Sum)? as u64;

        let stub = (world.rank() == 0).then(|| {
            write_stub(name, time, total, participant.node_count).and_then(|()| {
                file_inode(&name.path()).map_err(OutputError::from)
            })
        });
        let inode = share_from_root(world, stub)?;

        let payload = codec::encode_records(fields.records());
        let gathered = topology.node_comm().gather_bytes(&payload, 0)?;

        let mut manifest = SubfileManifest::new();
        let mut local = Ok(());
        if let Some(parts) = gathered {
            let index = participant.node_group_id + 1;
            let subfile = name.subfile_name(inode, index, participant.node_count);
            let header = SubfileHeader {
                step: name.step(),
                time,
                index: index as u32,
                count: participant.node_count as u32,
                particle_count: parts.iter().map(|p| codec::record_count(p)).sum(),
                data_offset: align_up(SUBFILE_HEADER_LEN, self.config.stripe_size),
            };
            local = write_with_header(
                &name.dir().join(&subfile),
                |w| codec::encode_subfile(w, &header, &[]),
                &parts,
            );
            if local.is_ok() {
                tracing::debug!(step = name.step(), %subfile, particles = header.particle_count, "wrote subfile");
                manifest.push(subfile);
            }
        }
        if local.is_ok() && world.rank() == 0 {
            local = self.write_subfiling_config(name, inode, participant.node_count);
        }
        settle(world, local)?;
        Ok(manifest)
    }

    fn write_subfiling_config(
        &self,
        name: &ArtifactName,
        inode: u64,
        count: usize,
    ) -> Result<(), OutputError> {
        let config = SubfilingConfig {
            stripe_size: self.config.stripe_size.unwrap_or(0),
            step: name.step(),
            subfile_dir: name.dir().to_path_buf(),
            main_file: name.path(),
            subfiles: (1..=count)
                .map(|k| name.subfile_name(inode, k, count))
                .collect(),
        };
        let path = name.config_path(&self.config.config_dir, inode);
        create_parent(&path)?;
        config.write_to(&path)?;
        Ok(())
    }
}

fn create_parent(path: &Path) -> Result<(), OutputError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Rank 0 creates (or truncates) the main artifact as a stub.
fn write_stub(
    name: &ArtifactName,
    time: f64,
    particle_count: u64,
    subfile_count: usize,
) -> Result<(), OutputError> {
    let header = ArtifactHeader {
        kind: ArtifactKind::Stub,
        step: name.step(),
        time,
        particle_count,
        subfile_count: subfile_count as u32,
        data_offset: ARTIFACT_HEADER_LEN,
    };
    let path = name.path();
    create_parent(&path)?;
    write_with_header(&path, |w| codec::encode_artifact(w, &header, &[]), &[])
}

/// Encode a header into memory, then stream it and the gathered payload
/// parts into `path` atomically.
fn write_with_header(
    path: &Path,
    header: impl FnOnce(&mut dyn std::io::Write) -> Result<(), OutputError>,
    parts: &[Vec<u8>],
) -> Result<(), OutputError> {
    let mut head: Vec<u8> = Vec::new();
    header(&mut head as &mut dyn std::io::Write)?;
    write_atomically(path, |w| {
        w.write_all(&head)?;
        for part in parts {
            w.write_all(part)?;
        }
        Ok(())
    })?;
    Ok(())
}

fn write_binary(path: &Path, step: u64, time: f64, parts: &[Vec<u8>]) -> Result<(), OutputError> {
    let header = ArtifactHeader {
        kind: ArtifactKind::Complete,
        step,
        time,
        particle_count: parts.iter().map(|p| codec::record_count(p)).sum(),
        subfile_count: 0,
        data_offset: ARTIFACT_HEADER_LEN,
    };
    write_with_header(path, |w| codec::encode_artifact(w, &header, &[]), parts)
}

fn write_csv(path: &Path, _step: u64, _time: f64, parts: &[Vec<u8>]) -> Result<(), OutputError> {
    let mut text = String::from("rank,x,y,z,vx,vy,vz,j\n");
    for (rank, part) in parts.iter().enumerate() {
        for record in codec::decode_records(part)? {
            let [x, y, z, vx, vy, vz, j] = record.to_array();
            // Writing to a String cannot fail.
            let _ = writeln!(text, "{rank},{x},{y},{z},{vx},{vy},{vz},{j}");
        }
    }
    write_atomically(path, |w| w.write_all(text.as_bytes()))?;
    Ok(())
}

/// Broadcast rank 0's outcome. Rank 0 gets its own result back; the
/// others get the value or [`OutputError::PeerFailed`].
fn share_from_root(
    world: &dyn Communicator,
    local: Option<Result<u64, OutputError>>,
) -> Result<u64, OutputError> {
    match local {
        Some(result) => {
            let msg = match &result {
                Ok(value) => {
                    let mut msg = vec![1u8];
                    msg.extend_from_slice(&value.to_le_bytes());
                    msg
                }
                Err(_) => vec![0u8],
            };
            world.broadcast_bytes(&msg, 0)?;
            result
        }
        None => {
            let msg = world.broadcast_bytes(&[], 0)?;
            match msg.split_first() {
                Some((&1, value)) => Ok(decode_u64(value)?),
                _ => Err(OutputError::PeerFailed),
            }
        }
    }
}

/// All-reduce the local outcome so every participant fails together.
fn settle(world: &dyn Communicator, local: Result<(), OutputError>) -> Result<(), OutputError> {
    let flag = if local.is_err() { 1.0 } else { 0.0 };
    let any_failed = world.all_reduce_f64(flag, ReduceOp::Max)? > 0.0;
    match local {
        Ok(()) if any_failed => Err(OutputError::PeerFailed),
        other => other,
    }
}
