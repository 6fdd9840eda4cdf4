//! Background subfile fusion.
//!
//! After a partitioned write, the [`FusionCoordinator`] gathers the
//! step's subfile manifests and, on the launching rank, spawns one fuse
//! process without waiting for it. Launched processes live in an
//! insertion-ordered registry with an owned outstanding counter; they are
//! reaped once, in launch order, at shutdown.
//!
//! Launch and exit failures are deliberately not returned from
//! [`fuse`](FusionCoordinator::fuse): a rank that bailed out mid-run would
//! leave its peers blocked in the next collective. They are collected and
//! surfaced by [`reap`](FusionCoordinator::reap) instead.

use std::fmt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};

use indexmap::IndexMap;
use tephra_comm::{DomainParticipant, NodeTopology};
use tephra_core::Communicator;

use crate::config::{FusionTopology, OutputConfig};
use crate::error::FusionError;
use crate::manifest::SubfileManifest;
use crate::naming::{file_inode, ArtifactName};

/// Identifier of one fuse launch, unique per coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a fuse job failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitKind {
    /// Exited with a non-zero code.
    Exited(i32),
    /// Killed by a signal (the signal number, where the host reports one).
    Terminated {
        /// Terminating signal.
        signal: Option<i32>,
    },
    /// The process could not be started.
    LaunchFailed {
        /// Why the launch failed.
        reason: String,
    },
    /// Waiting on the process failed.
    WaitFailed {
        /// Why the wait failed.
        reason: String,
    },
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Terminated { signal: Some(sig) } => write!(f, "killed by signal {sig}"),
            Self::Terminated { signal: None } => write!(f, "terminated abnormally"),
            Self::LaunchFailed { reason } => write!(f, "failed to launch: {reason}"),
            Self::WaitFailed { reason } => write!(f, "failed to wait: {reason}"),
        }
    }
}

/// One fuse job that did not succeed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FusionFailure {
    /// The job.
    pub job: JobId,
    /// Step whose subfiles it was fusing.
    pub step: u64,
    /// Command line, for the operator.
    pub command: String,
    /// What went wrong.
    pub exit: ExitKind,
}

impl fmt::Display for FusionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fuse job {} (step {}) {}: {}",
            self.job, self.step, self.exit, self.command
        )
    }
}

/// Outcome of [`FusionCoordinator::reap`] on one participant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Exit statuses checked.
    pub reaped: usize,
    /// Jobs that failed to launch or did not exit 0.
    pub failures: Vec<FusionFailure>,
}

impl ReapReport {
    /// Whether every job launched and exited 0.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

struct FusionJob {
    step: u64,
    command: String,
    child: Child,
}

/// Launches fuse processes and reaps them at shutdown.
pub struct FusionCoordinator {
    topology: NodeTopology,
    mode: Option<FusionTopology>,
    program: PathBuf,
    config_dir: PathBuf,
    jobs: IndexMap<JobId, FusionJob>,
    launch_failures: Vec<FusionFailure>,
    next_id: u64,
    outstanding: usize,
}

impl FusionCoordinator {
    /// Elect node leaders and set up an empty registry. Collective over
    /// `world`.
    ///
    /// Fusion is active only when `config` enables both subfiling and a
    /// fusion topology; otherwise [`fuse`](Self::fuse) is a no-op.
    pub fn new(world: &dyn Communicator, config: &OutputConfig) -> Result<Self, FusionError> {
        let topology = NodeTopology::elect(world)?;
        let mode = if config.fusion_active() {
            config.fusion
        } else {
            None
        };
        Ok(Self {
            topology,
            mode,
            program: config.fuse_program.clone(),
            config_dir: config.config_dir.clone(),
            jobs: IndexMap::new(),
            launch_failures: Vec::new(),
            next_id: 0,
            outstanding: 0,
        })
    }

    /// This rank's node topology.
    pub fn topology(&self) -> &NodeTopology {
        &self.topology
    }

    /// This rank's placement.
    pub fn participant(&self) -> &DomainParticipant {
        self.topology.participant()
    }

    /// Active fusion topology, if any.
    pub fn mode(&self) -> Option<FusionTopology> {
        self.mode
    }

    /// Launched fuse processes not yet reaped.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Hand one step's manifest to the coordinator.
    ///
    /// Collective over `world` (global mode) or the node communicator
    /// (node-local mode). Returns the id of the job this rank launched,
    /// if it launched one.
    pub fn fuse(
        &mut self,
        world: &dyn Communicator,
        artifact: &ArtifactName,
        manifest: &SubfileManifest,
    ) -> Result<Option<JobId>, FusionError> {
        let Some(mode) = self.mode else {
            return Ok(None);
        };
        let encoded = manifest.encode();
        let gathered = match mode {
            FusionTopology::Global => world.gather_bytes(&encoded, 0)?,
            FusionTopology::NodeLocal => self.topology.node_comm().gather_bytes(&encoded, 0)?,
        };
        let Some(parts) = gathered else {
            return Ok(None);
        };
        let merged = SubfileManifest::merge(
            parts
                .iter()
                .map(|p| SubfileManifest::decode(p))
                .collect::<Result<Vec<_>, _>>()?,
        );
        if merged.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.launch(mode, artifact, &merged)))
    }

    fn launch(&mut self, mode: FusionTopology, artifact: &ArtifactName, subfiles: &SubfileManifest) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        let step = artifact.step();
        let list = subfiles.names().join(",");

        let (command, spawned) = match file_inode(&artifact.path()) {
            Ok(inode) => {
                let config = artifact.config_path(&self.config_dir, inode);
                let command = format!(
                    "{} {} -l {list} -f {}",
                    self.program.display(),
                    mode.flag(),
                    config.display()
                );
                let spawned = Command::new(&self.program)
                    .arg(mode.flag())
                    .arg("-l")
                    .arg(&list)
                    .arg("-f")
                    .arg(&config)
                    .stdin(Stdio::null())
                    .spawn();
                (command, spawned)
            }
            Err(e) => {
                let command = format!("{} {} -l {list}", self.program.display(), mode.flag());
                (command, Err(e))
            }
        };

        match spawned {
            Ok(child) => {
                tracing::debug!(job = %id, step, pid = child.id(), %command, "launched fuser");
                self.jobs.insert(id, FusionJob { step, command, child });
                self.outstanding += 1;
            }
            Err(e) => {
                tracing::error!(job = %id, step, %command, error = %e, "failed to launch fuser");
                self.launch_failures.push(FusionFailure {
                    job: id,
                    step,
                    command,
                    exit: ExitKind::LaunchFailed {
                        reason: e.to_string(),
                    },
                });
            }
        }
        id
    }

    /// Wait for every launched job, in launch order, and drain the
    /// registry. Local to this rank; no timeout, so a hung fuser blocks
    /// here indefinitely.
    ///
    /// Every job is waited on even after a failure is seen.
    pub fn reap(&mut self) -> Result<ReapReport, FusionError> {
        let outstanding = self.outstanding;
        let mut report = ReapReport {
            reaped: 0,
            failures: std::mem::take(&mut self.launch_failures),
        };

        for (id, mut job) in self.jobs.drain(..) {
            let exit = match job.child.wait() {
                Ok(status) => classify(status),
                Err(e) => Some(ExitKind::WaitFailed {
                    reason: e.to_string(),
                }),
            };
            report.reaped += 1;
            self.outstanding = self.outstanding.saturating_sub(1);
            match exit {
                None => tracing::debug!(job = %id, step = job.step, "fuser finished"),
                Some(exit) => {
                    let failure = FusionFailure {
                        job: id,
                        step: job.step,
                        command: job.command,
                        exit,
                    };
                    tracing::error!("{failure}");
                    report.failures.push(failure);
                }
            }
        }

        if report.reaped != outstanding || self.outstanding != 0 {
            return Err(FusionError::CounterMismatch {
                outstanding,
                reaped: report.reaped,
            });
        }
        Ok(report)
    }
}

impl Drop for FusionCoordinator {
    fn drop(&mut self) {
        if !self.jobs.is_empty() {
            tracing::warn!(
                outstanding = self.jobs.len(),
                "fusion coordinator dropped with unreaped fusers"
            );
        }
    }
}

impl fmt::Debug for FusionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FusionCoordinator")
            .field("participant", self.topology.participant())
            .field("mode", &self.mode)
            .field("outstanding", &self.outstanding)
            .finish()
    }
}

/// `None` for success.
fn classify(status: ExitStatus) -> Option<ExitKind> {
    if status.success() {
        return None;
    }
    Some(match status.code() {
        Some(code) => ExitKind::Exited(code),
        None => ExitKind::Terminated {
            signal: signal_of(status),
        },
    })
}

#[cfg(unix)]
fn signal_of(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tephra_comm::LocalUniverse;

    #[cfg(unix)]
    #[test]
    fn classify_exit_codes_and_signals() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(classify(ExitStatus::from_raw(0)), None);
        assert_eq!(classify(ExitStatus::from_raw(1 << 8)), Some(ExitKind::Exited(1)));
        assert_eq!(
            classify(ExitStatus::from_raw(9)),
            Some(ExitKind::Terminated { signal: Some(9) })
        );
    }

    #[test]
    fn inactive_without_subfiling() {
        let config = OutputConfig {
            fusion: Some(FusionTopology::Global),
            ..OutputConfig::default()
        };
        let out = LocalUniverse::new(2).run(|comm| {
            let mut fc = FusionCoordinator::new(&comm, &config).unwrap();
            let mut manifest = SubfileManifest::new();
            manifest.push("x");
            let name = ArtifactName::new(".", "p", 0, "bin");
            let job = fc.fuse(&comm, &name, &manifest).unwrap();
            (fc.mode(), job, fc.reap().unwrap())
        });
        for (mode, job, report) in out {
            assert_eq!(mode, None);
            assert_eq!(job, None);
            assert_eq!(report, ReapReport::default());
        }
    }

    #[test]
    fn empty_manifests_launch_nothing() {
        let config = OutputConfig {
            partitioned: true,
            fusion: Some(FusionTopology::Global),
            fuse_program: PathBuf::from("/nonexistent/tephra-fuse"),
            ..OutputConfig::default()
        };
        let out = LocalUniverse::new(3).run(|comm| {
            let mut fc = FusionCoordinator::new(&comm, &config).unwrap();
            let name = ArtifactName::new(".", "p", 0, "bin");
            let job = fc.fuse(&comm, &name, &SubfileManifest::new()).unwrap();
            (job, fc.outstanding())
        });
        assert!(out.iter().all(|&(job, n)| job.is_none() && n == 0));
    }

    #[test]
    fn launch_failure_surfaces_at_reap() {
        let dir = tempfile::tempdir().unwrap();
        let name = ArtifactName::new(dir.path(), "p", 3, "bin");
        std::fs::write(name.path(), b"stub").unwrap();
        let config = OutputConfig {
            partitioned: true,
            fusion: Some(FusionTopology::Global),
            fuse_program: dir.path().join("missing-fuser"),
            ..OutputConfig::default()
        };
        let out = LocalUniverse::new(2).run(|comm| {
            let mut fc = FusionCoordinator::new(&comm, &config).unwrap();
            let mut manifest = SubfileManifest::new();
            if comm.rank() == 0 {
                manifest.push("p_3.bin.subfile_1_1_of_1");
            }
            let job = fc.fuse(&comm, &name, &manifest).unwrap();
            assert_eq!(fc.outstanding(), 0);
            (job, fc.reap().unwrap())
        });
        assert_eq!(out[0].0, Some(JobId(0)));
        let report = &out[0].1;
        assert_eq!(report.reaped, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].step, 3);
        assert!(matches!(report.failures[0].exit, ExitKind::LaunchFailed { .. }));
        assert_eq!(out[1].1, ReapReport::default());
    }
}
