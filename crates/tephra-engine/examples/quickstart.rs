//! Tephra quickstart: a falling particle column on four in-process ranks.
//!
//! Demonstrates:
//!   1. Implementing the collaborator traits (mesh, problem, integrator)
//!   2. Running a 2-node, 4-rank job with `LocalUniverse`
//!   3. CFL-limited adaptive timesteps
//!   4. Gathered binary output at a fixed step interval
//!
//! Run with:
//!   cargo run --example quickstart

use tephra_comm::LocalUniverse;
use tephra_core::{
    BoundaryCondition, BoundaryType, CollaboratorError, Communicator, ComputeBackend, Material, Mesh,
    ParticleFields, ParticleFieldsMut, ProblemManager, TimeIntegrator,
};
use tephra_engine::{CflTimeStepControl, Solver, SolverConfig, SolverParts};
use tephra_io::OutputConfig;
use tracing_subscriber::EnvFilter;

// ─── Parameters ─────────────────────────────────────────────────

const RANKS: usize = 4;
const PARTICLES_PER_RANK: usize = 16;
const CELL: f64 = 0.05;
const NODES_PER_SIDE: i64 = 40;
const T_FINAL: f64 = 0.25;
const WRITE_INTERVAL: i64 = 10;

const WATER: Material = Material {
    bulk_modulus: 2.0e4,
    density: 1000.0,
    gamma: 7.0,
    kappa: 0.0,
};

// ─── Mesh: a fixed cube of nodes ────────────────────────────────

struct Cube;

impl Mesh for Cube {
    fn cell_size(&self) -> f64 {
        CELL
    }

    fn min_domain_global_node_index(&self) -> [i64; 3] {
        [0; 3]
    }

    fn max_domain_global_node_index(&self) -> [i64; 3] {
        [NODES_PER_SIDE; 3]
    }
}

// ─── Problem: one vertical column per rank ──────────────────────
//
// Columns never cross rank boundaries here, so redistribution has
// nothing to move.

struct Column {
    positions: Vec<[f64; 3]>,
    velocities: Vec<[f64; 3]>,
    j: Vec<f64>,
}

impl Column {
    fn new(rank: usize) -> Self {
        let x = 0.2 + 0.4 * rank as f64;
        let positions = (0..PARTICLES_PER_RANK)
            .map(|i| [x, 1.0, 0.5 + i as f64 * CELL * 0.5])
            .collect();
        Self {
            positions,
            velocities: vec![[0.0; 3]; PARTICLES_PER_RANK],
            j: vec![1.0; PARTICLES_PER_RANK],
        }
    }
}

impl ProblemManager for Column {
    fn num_particles(&self) -> usize {
        self.positions.len()
    }

    fn particle_fields(&self) -> ParticleFields<'_> {
        ParticleFields {
            positions: &self.positions,
            velocities: &self.velocities,
            j: &self.j,
        }
    }

    fn particle_fields_mut(&mut self) -> ParticleFieldsMut<'_> {
        ParticleFieldsMut {
            positions: &mut self.positions,
            velocities: &mut self.velocities,
            j: &mut self.j,
        }
    }

    fn material(&self) -> Material {
        WATER
    }

    fn communicate_particles(&mut self, _halo_min: usize) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

// ─── Integrator: ballistic motion with a no-slip floor ──────────

struct Ballistic;

impl TimeIntegrator for Ballistic {
    fn step(
        &mut self,
        _backend: ComputeBackend,
        problem: &mut dyn ProblemManager,
        dt: f64,
        gravity: f64,
        bc: &BoundaryCondition,
    ) -> Result<(), CollaboratorError> {
        let ParticleFieldsMut {
            positions,
            velocities,
            ..
        } = problem.particle_fields_mut();
        for (x, v) in positions.iter_mut().zip(velocities.iter_mut()) {
            v[2] -= gravity * dt;
            for d in 0..3 {
                x[d] += v[d] * dt;
            }
            let node = x.map(|c| (c / CELL).floor() as i64);
            if bc.is_no_slip(node) {
                *v = [0.0; 3];
                x[2] = x[2].max(0.0);
            }
        }
        Ok(())
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let out_dir = tempfile::tempdir().expect("create output directory");
    let config = SolverConfig {
        max_dt: 5.0e-3,
        gravity: 9.81,
        boundary: BoundaryCondition::uniform(BoundaryType::NoSlip),
        output: OutputConfig {
            dir: out_dir.path().to_path_buf(),
            base_name: "column".into(),
            ..OutputConfig::default()
        },
        ..SolverConfig::default()
    };

    let summaries = LocalUniverse::new(RANKS)
        .with_ranks_per_node(2)
        .run(|comm| {
            let rank = comm.rank();
            let parts = SolverParts {
                mesh: Box::new(Cube),
                problem: Box::new(Column::new(rank)),
                integrator: Box::new(Ballistic),
                dt_control: Box::new(CflTimeStepControl::default()),
            };
            let mut solver = Solver::new(Box::new(comm), parts, config.clone())
                .expect("valid solver configuration");
            solver.solve_or_abort(T_FINAL, WRITE_INTERVAL)
        });

    let summary = &summaries[0];
    println!(
        "{} steps to t = {:.4}, {} outputs",
        summary.steps,
        summary.final_time,
        summary.outputs.len()
    );
    for event in &summary.outputs {
        match event.write_stats {
            Some(io) => println!(
                "  step {:>4}  t = {:.4}  write {:.2e}s mean, {:.2e}s max",
                event.step, event.time, io.mean, io.max
            ),
            None => println!("  step {:>4}  t = {:.4}", event.step, event.time),
        }
    }

    let mut files: Vec<_> = std::fs::read_dir(out_dir.path())
        .expect("read output directory")
        .filter_map(|e| e.ok().map(|e| e.file_name()))
        .collect();
    files.sort();
    println!("wrote {files:?}");
}
