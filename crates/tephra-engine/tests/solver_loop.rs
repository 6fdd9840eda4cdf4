//! Integration test: the time-stepping loop.
//!
//! Runs the solver on small in-process universes with recording mocks
//! and checks the clock, the dt contract, the per-step call order, and
//! the output schedule.

use std::path::Path;

use proptest::prelude::*;
use tephra_comm::LocalUniverse;
use tephra_core::{Communicator, TimeStepControl};
use tephra_engine::{ConfigError, SolveError, Solver, SolverConfig, SolverParts};
use tephra_io::OutputConfig;
use tephra_test_utils::fixtures::{
    ConstantDtControl, FailingDtControl, RecordingIntegrator, ScriptedDtControl,
};
use tephra_test_utils::{Event, EventLog, MockMesh, MockProblem};

fn config(dir: &Path, max_dt: f64) -> SolverConfig {
    SolverConfig {
        max_dt,
        output: OutputConfig {
            dir: dir.to_path_buf(),
            config_dir: dir.to_path_buf(),
            ..OutputConfig::default()
        },
        ..SolverConfig::default()
    }
}

fn solver(
    comm: impl Communicator + 'static,
    config: SolverConfig,
    log: &EventLog,
    dt_control: impl TimeStepControl + 'static,
) -> Solver {
    let parts = SolverParts {
        mesh: Box::new(MockMesh::uniform(0.1)),
        problem: Box::new(MockProblem::new(4).with_log(log.clone())),
        integrator: Box::new(RecordingIntegrator::new(log.clone())),
        dt_control: Box::new(dt_control),
    };
    Solver::new(Box::new(comm), parts, config).unwrap()
}

#[test]
fn reference_scenario_steps_and_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 0.3);
    let out = LocalUniverse::new(2).run(|comm| {
        let log = EventLog::new();
        let mut s = solver(comm, cfg.clone(), &log, ConstantDtControl::new(0.3));
        let summary = s.solve(1.0, 2).unwrap();
        (summary, log.integrated_dts())
    });

    for (summary, dts) in &out {
        assert_eq!(summary.steps, 4);
        assert!((summary.final_time - 1.2).abs() < 1e-12);
        assert_eq!(dts, &vec![0.3; 4]);
        let steps: Vec<u64> = summary.outputs.iter().map(|o| o.step).collect();
        assert_eq!(steps, vec![0, 2, 4]);
        let times: Vec<f64> = summary.outputs.iter().map(|o| o.time).collect();
        assert_eq!(times[0], 0.0);
        assert!((times[1] - 0.6).abs() < 1e-12);
        assert!((times[2] - 1.2).abs() < 1e-12);
    }
    assert!(out[0].0.outputs.iter().all(|o| o.write_stats.is_some()));
    assert!(out[1].0.outputs.iter().all(|o| o.write_stats.is_none()));

    for step in [0, 2, 4] {
        assert!(dir.path().join(format!("particles_{step}.bin")).exists());
    }
    for step in [1, 3] {
        assert!(!dir.path().join(format!("particles_{step}.bin")).exists());
    }
}

#[test]
fn redistribution_follows_every_integration() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 0.25);
    let out = LocalUniverse::new(1).run(|comm| {
        let log = EventLog::new();
        let mut s = solver(comm, cfg.clone(), &log, ConstantDtControl::new(0.25));
        s.solve(1.0, 10).unwrap();
        log.events()
    });
    let events = &out[0];
    assert_eq!(events.len(), 8);
    for pair in events.chunks(2) {
        assert_eq!(pair[0], Event::Integrate { dt: 0.25 });
        assert_eq!(pair[1], Event::Redistribute { halo_min: 3 });
    }
}

#[test]
fn non_positive_final_time_writes_initial_state_only() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 0.1);
    for t_final in [0.0, -1.0] {
        let out = LocalUniverse::new(2).run(|comm| {
            let log = EventLog::new();
            let mut s = solver(comm, cfg.clone(), &log, ConstantDtControl::new(0.1));
            (s.solve(t_final, 1).unwrap(), log.events().len())
        });
        for (summary, calls) in out {
            assert_eq!(summary.steps, 0);
            assert_eq!(summary.outputs.len(), 1);
            assert_eq!(summary.outputs[0].step, 0);
            assert_eq!(calls, 0);
        }
    }
}

#[test]
fn invalid_write_interval_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 0.1);
    let out = LocalUniverse::new(2).run(|comm| {
        let log = EventLog::new();
        let mut s = solver(comm, cfg.clone(), &log, ConstantDtControl::new(0.1));
        [0, -3].map(|interval| s.solve(1.0, interval))
    });
    for results in out {
        for r in results {
            assert!(matches!(
                r,
                Err(SolveError::Config(ConfigError::InvalidWriteInterval { .. }))
            ));
        }
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn nan_final_time_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 0.1);
    let out = LocalUniverse::new(1).run(|comm| {
        let mut s = solver(comm, cfg.clone(), &EventLog::new(), ConstantDtControl::new(0.1));
        s.solve(f64::NAN, 1)
    });
    assert!(matches!(
        out[0],
        Err(SolveError::Config(ConfigError::InvalidFinalTime { .. }))
    ));
}

#[test]
fn invalid_config_fails_before_any_collective() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = SolverConfig {
        report_rank: 5,
        ..config(dir.path(), 0.1)
    };
    // Only rank 0 constructs; a collective call would block forever.
    let out = LocalUniverse::new(2).run(|comm| {
        if comm.rank() != 0 {
            return true;
        }
        let parts = SolverParts {
            mesh: Box::new(MockMesh::default()),
            problem: Box::new(MockProblem::new(1)),
            integrator: Box::new(RecordingIntegrator::default()),
            dt_control: Box::new(ConstantDtControl::new(0.1)),
        };
        matches!(
            Solver::new(Box::new(comm), parts, cfg.clone()),
            Err(SolveError::Config(ConfigError::ReportRankOutOfRange { rank: 5, size: 2 }))
        )
    });
    assert!(out.iter().all(|&ok| ok));
}

#[test]
fn zero_dt_is_fatal_on_every_rank() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 0.1);
    let out = LocalUniverse::new(2).run(|comm| {
        let dt = ScriptedDtControl::new(vec![0.1, 0.0]);
        let mut s = solver(comm, cfg.clone(), &EventLog::new(), dt);
        s.solve(1.0, 1)
    });
    for r in out {
        assert!(matches!(
            r,
            Err(SolveError::NonPositiveTimestep { step: 1, dt }) if dt == 0.0
        ));
    }
}

#[test]
fn dt_above_ceiling_is_a_contract_violation() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 0.1);
    let out = LocalUniverse::new(1).run(|comm| {
        let dt = ScriptedDtControl::new(vec![0.2]);
        let mut s = solver(comm, cfg.clone(), &EventLog::new(), dt);
        s.solve(1.0, 1)
    });
    assert!(matches!(
        out[0],
        Err(SolveError::TimestepAboveCeiling { step: 0, .. })
    ));
}

#[test]
fn stability_control_failure_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 0.1);
    let out = LocalUniverse::new(1).run(|comm| {
        let mut s = solver(comm, cfg.clone(), &EventLog::new(), FailingDtControl::new(2));
        let r = s.solve(1.0, 1);
        (r, s.clock().step())
    });
    assert!(matches!(out[0].0, Err(SolveError::Collaborator(_))));
    assert_eq!(out[0].1, 2);
}

#[test]
fn mesh_bounds_reach_the_boundary_condition() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path(), 0.1);
    let out = LocalUniverse::new(1).run(|comm| {
        let parts = SolverParts {
            mesh: Box::new(MockMesh {
                cell_size: 0.5,
                min: [-2, 0, 1],
                max: [8, 9, 10],
            }),
            problem: Box::new(MockProblem::new(1)),
            integrator: Box::new(RecordingIntegrator::default()),
            dt_control: Box::new(ConstantDtControl::new(0.1)),
        };
        let s = Solver::new(Box::new(comm), parts, cfg.clone()).unwrap();
        (s.boundary().min, s.boundary().max)
    });
    assert_eq!(out[0], ([-2, 0, 1], [8, 9, 10]));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn clock_tracks_every_accepted_dt(
        max_dt in 0.1f64..0.5,
        fractions in prop::collection::vec(0.2f64..=1.0, 1..12),
        interval in 1i64..4,
    ) {
        let script: Vec<f64> = fractions.iter().map(|f| f * max_dt).collect();
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), max_dt);
        let t_final = 1.0;
        let out = LocalUniverse::new(1).run(|comm| {
            let log = EventLog::new();
            let mut s = solver(comm, cfg.clone(), &log, ScriptedDtControl::new(script.clone()));
            (s.solve(t_final, interval).unwrap(), log.integrated_dts())
        });
        let (summary, dts) = &out[0];

        prop_assert_eq!(dts.len() as u64, summary.steps);
        prop_assert!(dts.iter().all(|&dt| dt > 0.0 && dt <= max_dt));
        let total: f64 = dts.iter().sum();
        prop_assert!((summary.final_time - total).abs() < 1e-9);
        prop_assert!(summary.final_time >= t_final);
        prop_assert!(summary.final_time - dts.last().copied().unwrap_or(0.0) < t_final + 1e-12);

        let expected: Vec<u64> = (0..=summary.steps)
            .filter(|s| s % interval as u64 == 0)
            .collect();
        let written: Vec<u64> = summary.outputs.iter().map(|o| o.step).collect();
        prop_assert_eq!(written, expected);
    }
}
