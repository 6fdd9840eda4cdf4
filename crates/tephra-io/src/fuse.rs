//! Subfile fusion, as run by the `tephra-fuse` utility.
//!
//! Global mode merges every subfile of a step into the main artifact,
//! replacing the stub, then removes the subfiles and the config file.
//! Node-local mode merges one node's subfiles into
//! `<main>.node_<k>_of_<n>` and removes only those subfiles.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tephra_core::ParticleRecord;

use crate::codec::{self, align_up, ArtifactHeader, ArtifactKind, SubfileHeader, ARTIFACT_HEADER_LEN};
use crate::config::FusionTopology;
use crate::error::FuseError;
use crate::naming::{node_artifact_path, write_atomically};
use crate::subfiling::SubfilingConfig;

/// What to fuse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuseRequest {
    /// Global or node-local fusion.
    pub topology: FusionTopology,
    /// Subfile names to merge; empty means every subfile in the config.
    pub subfiles: Vec<String>,
    /// The subfiling config file.
    pub config: PathBuf,
}

/// Result of a successful fusion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuseOutcome {
    /// The artifact written.
    pub output: PathBuf,
    /// Particles it holds.
    pub particles: u64,
    /// Files removed afterwards.
    pub removed: Vec<PathBuf>,
}

/// Merge subfiles as described by `request`.
pub fn fuse(request: &FuseRequest) -> Result<FuseOutcome, FuseError> {
    let config = SubfilingConfig::read_from(&request.config)?;
    let names = if request.subfiles.is_empty() {
        config.subfiles.clone()
    } else {
        for name in &request.subfiles {
            if !config.subfiles.contains(name) {
                return Err(FuseError::UnknownSubfile { name: name.clone() });
            }
        }
        request.subfiles.clone()
    };
    if names.is_empty() {
        return Err(FuseError::NoSubfiles);
    }

    let mut pieces = Vec::with_capacity(names.len());
    for name in &names {
        let path = config.subfile_dir.join(name);
        let (header, records) = read_subfile(&path)?;
        if header.step != config.step {
            return Err(FuseError::Inconsistent {
                detail: format!(
                    "{name} is step {} but the config is step {}",
                    header.step, config.step
                ),
            });
        }
        pieces.push((path, header, records));
    }
    pieces.sort_by_key(|(_, header, _)| header.index);

    let first = pieces[0].1;
    if let Some((path, header, _)) = pieces.iter().find(|(_, h, _)| h.count != first.count) {
        return Err(FuseError::Inconsistent {
            detail: format!(
                "{} reports {} subfiles, expected {}",
                path.display(),
                header.count,
                first.count
            ),
        });
    }

    let output = match request.topology {
        FusionTopology::Global => config.main_file.clone(),
        FusionTopology::NodeLocal => {
            node_artifact_path(&config.main_file, first.index as usize, first.count as usize)
        }
    };
    let records: Vec<ParticleRecord> = pieces
        .iter()
        .flat_map(|(_, _, records)| records.iter().copied())
        .collect();
    let header = ArtifactHeader {
        kind: ArtifactKind::Complete,
        step: config.step,
        time: first.time,
        particle_count: records.len() as u64,
        subfile_count: 0,
        data_offset: align_up(ARTIFACT_HEADER_LEN, Some(config.stripe_size)),
    };
    let payload = codec::encode_records(records);
    let mut bytes: Vec<u8> = Vec::new();
    codec::encode_artifact(&mut bytes, &header, &payload).map_err(|source| FuseError::Subfile {
        path: output.clone(),
        source,
    })?;
    write_atomically(&output, |w| w.write_all(&bytes)).map_err(|source| FuseError::Io {
        path: output.clone(),
        source,
    })?;
    tracing::info!(output = %output.display(), particles = header.particle_count, "fused subfiles");

    let mut removed: Vec<PathBuf> = pieces.into_iter().map(|(path, _, _)| path).collect();
    if request.topology == FusionTopology::Global {
        removed.push(request.config.clone());
    }
    for path in &removed {
        remove(path)?;
    }

    Ok(FuseOutcome {
        output,
        particles: header.particle_count,
        removed,
    })
}

fn read_subfile(path: &Path) -> Result<(SubfileHeader, Vec<ParticleRecord>), FuseError> {
    let file = File::open(path).map_err(|source| FuseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    codec::decode_subfile(&mut BufReader::new(file)).map_err(|source| FuseError::Subfile {
        path: path.to_path_buf(),
        source,
    })
}

fn remove(path: &Path) -> Result<(), FuseError> {
    std::fs::remove_file(path).map_err(|source| FuseError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_artifact, encode_subfile, SUBFILE_HEADER_LEN};
    use crate::naming::ArtifactName;

    fn record(x: f64) -> ParticleRecord {
        ParticleRecord {
            position: [x, 0.0, 0.0],
            velocity: [0.0; 3],
            j: 1.0,
        }
    }

    /// Two subfiles of step 4 plus a stub and a config file in `dir`.
    fn fixture(dir: &Path) -> (ArtifactName, PathBuf) {
        let name = ArtifactName::new(dir, "particles", 4, "bin");
        std::fs::write(name.path(), b"stub").unwrap();
        let subfiles: Vec<String> = (1..=2).map(|k| name.subfile_name(9, k, 2)).collect();
        for (k, sub) in subfiles.iter().enumerate() {
            let xs = [10.0 * k as f64, 10.0 * k as f64 + 1.0];
            let header = SubfileHeader {
                step: 4,
                time: 1.2,
                index: k as u32 + 1,
                count: 2,
                particle_count: 2,
                data_offset: SUBFILE_HEADER_LEN,
            };
            let mut bytes: Vec<u8> = Vec::new();
            encode_subfile(&mut bytes, &header, &codec::encode_records(xs.map(record))).unwrap();
            std::fs::write(dir.join(sub), bytes).unwrap();
        }
        let config_path = name.config_path(dir, 9);
        SubfilingConfig {
            stripe_size: 0,
            step: 4,
            subfile_dir: dir.to_path_buf(),
            main_file: name.path(),
            subfiles,
        }
        .write_to(&config_path)
        .unwrap();
        (name, config_path)
    }

    #[test]
    fn global_fusion_replaces_stub_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let (name, config) = fixture(dir.path());
        let outcome = fuse(&FuseRequest {
            topology: FusionTopology::Global,
            subfiles: Vec::new(),
            config: config.clone(),
        })
        .unwrap();
        assert_eq!(outcome.output, name.path());
        assert_eq!(outcome.particles, 4);

        let bytes = std::fs::read(name.path()).unwrap();
        let (header, records) = decode_artifact(&mut &bytes[..]).unwrap();
        assert_eq!(header.kind, ArtifactKind::Complete);
        assert_eq!((header.step, header.time), (4, 1.2));
        let xs: Vec<f64> = records.iter().map(|r| r.position[0]).collect();
        assert_eq!(xs, vec![0.0, 1.0, 10.0, 11.0]);

        assert!(!config.exists());
        assert!(!dir.path().join(name.subfile_name(9, 1, 2)).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn node_fusion_writes_node_artifact_and_keeps_config() {
        let dir = tempfile::tempdir().unwrap();
        let (name, config) = fixture(dir.path());
        let outcome = fuse(&FuseRequest {
            topology: FusionTopology::NodeLocal,
            subfiles: vec![name.subfile_name(9, 2, 2)],
            config: config.clone(),
        })
        .unwrap();
        assert_eq!(outcome.output, name.node_artifact_path(2, 2));
        assert_eq!(outcome.particles, 2);
        assert!(config.exists());
        assert!(dir.path().join(name.subfile_name(9, 1, 2)).exists());
        assert!(!dir.path().join(name.subfile_name(9, 2, 2)).exists());
        assert_eq!(std::fs::read(name.path()).unwrap(), b"stub");
    }

    #[test]
    fn unlisted_subfile_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (_, config) = fixture(dir.path());
        let err = fuse(&FuseRequest {
            topology: FusionTopology::NodeLocal,
            subfiles: vec!["other.subfile_1_1_of_1".into()],
            config,
        })
        .unwrap_err();
        assert!(matches!(err, FuseError::UnknownSubfile { .. }));
    }

    #[test]
    fn missing_subfile_is_an_io_error_and_nothing_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let (name, config) = fixture(dir.path());
        std::fs::remove_file(dir.path().join(name.subfile_name(9, 2, 2))).unwrap();
        let err = fuse(&FuseRequest {
            topology: FusionTopology::Global,
            subfiles: Vec::new(),
            config: config.clone(),
        })
        .unwrap_err();
        assert!(matches!(err, FuseError::Io { .. }));
        assert!(config.exists());
        assert_eq!(std::fs::read(name.path()).unwrap(), b"stub");
    }

    #[test]
    fn missing_config_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = fuse(&FuseRequest {
            topology: FusionTopology::Global,
            subfiles: Vec::new(),
            config: dir.path().join("nope.config"),
        })
        .unwrap_err();
        assert!(matches!(err, FuseError::Io { .. }));
    }
}
