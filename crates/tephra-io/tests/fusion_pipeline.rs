//! Integration test: partitioned write followed by background fusion.
//!
//! Eight participants packed four per node write one partitioned step and
//! hand their manifests to the fusion coordinator. The fuse program is a
//! shell stub that records its arguments, so the tests observe exactly
//! which ranks launched what.

#![cfg(unix)]

use std::path::Path;

use tephra_comm::LocalUniverse;
use tephra_core::ProblemManager;
use tephra_io::{ExitKind, FusionCoordinator, FusionTopology, OutputConfig, OutputWriter, ReapReport};
use tephra_test_utils::fixtures::{fuser_calls, write_fuser_stub};
use tephra_test_utils::MockProblem;

fn config(dir: &Path, topology: FusionTopology, exit_code: i32) -> OutputConfig {
    OutputConfig {
        dir: dir.to_path_buf(),
        partitioned: true,
        fusion: Some(topology),
        config_dir: dir.to_path_buf(),
        fuse_program: write_fuser_stub(dir, exit_code),
        ..OutputConfig::default()
    }
}

/// Write step 2 on 8 ranks (2 nodes), fuse, reap.
fn run_step(config: &OutputConfig) -> Vec<(bool, ReapReport)> {
    LocalUniverse::new(8).with_ranks_per_node(4).run(|comm| {
        let mut fusion = FusionCoordinator::new(&comm, config).unwrap();
        let mut writer = OutputWriter::new(config.clone());
        let problem = MockProblem::new(3);
        let manifest = writer
            .write(&comm, fusion.topology(), 2, 0.6, problem.particle_fields())
            .unwrap();
        let name = writer.artifact_name(2).unwrap();
        let launched = fusion.fuse(&comm, &name, &manifest).unwrap().is_some();
        (launched, fusion.reap().unwrap())
    })
}

#[test]
fn local_fusion_launches_one_job_per_node() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_step(&config(dir.path(), FusionTopology::NodeLocal, 0));

    let launchers: Vec<usize> = out
        .iter()
        .enumerate()
        .filter(|(_, (launched, _))| *launched)
        .map(|(rank, _)| rank)
        .collect();
    assert_eq!(launchers, vec![0, 4]);
    assert_eq!(out[0].1.reaped, 1);
    assert_eq!(out[4].1.reaped, 1);
    assert!(out.iter().all(|(_, r)| r.is_success()));

    let calls = fuser_calls(dir.path());
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert!(call.starts_with("-n -l particles_2.bin.subfile_"), "{call}");
        assert!(call.contains(".config"), "{call}");
    }
    assert!(calls.iter().any(|c| c.contains("_1_of_2 ")));
    assert!(calls.iter().any(|c| c.contains("_2_of_2 ")));
}

#[test]
fn global_fusion_launches_exactly_one_job() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_step(&config(dir.path(), FusionTopology::Global, 0));

    assert!(out[0].0);
    assert!(out[1..].iter().all(|(launched, r)| !launched && r.reaped == 0));
    assert_eq!(out[0].1.reaped, 1);

    let calls = fuser_calls(dir.path());
    assert_eq!(calls.len(), 1);
    let args: Vec<&str> = calls[0].split(' ').collect();
    assert_eq!(args[0], "-g");
    assert_eq!(args[1], "-l");
    let subfiles: Vec<&str> = args[2].split(',').collect();
    assert_eq!(subfiles.len(), 2);
    assert!(subfiles[0].ends_with("_1_of_2"));
    assert!(subfiles[1].ends_with("_2_of_2"));
    assert_eq!(args[3], "-f");
    assert!(Path::new(args[4]).exists(), "config file named on the command line exists");
}

#[test]
fn failing_fuser_is_reported_by_its_launcher() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_step(&config(dir.path(), FusionTopology::NodeLocal, 1));

    for rank in [0, 4] {
        let report = &out[rank].1;
        assert_eq!(report.reaped, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].exit, ExitKind::Exited(1));
        assert_eq!(report.failures[0].step, 2);
    }
    assert!(out
        .iter()
        .enumerate()
        .filter(|(rank, _)| rank % 4 != 0)
        .all(|(_, (_, r))| r.reaped == 0 && r.is_success()));
}
