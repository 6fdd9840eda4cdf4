//! The time-stepping loop.
//!
//! Each iteration negotiates a stable dt, integrates, redistributes
//! particles across halos, advances the clock, and writes output every
//! `write_interval` steps. Every participant runs the same sequence of
//! collective calls, so the loop condition (global time) and the output
//! condition (global step) agree everywhere without extra messages.

use std::time::Instant;

use tephra_comm::{DomainParticipant, StatsAggregator, TimerStats};
use tephra_core::{
    BoundaryCondition, Communicator, DtContext, Mesh, ProblemManager, ReduceOp,
    SimulationClock, TimeIntegrator, TimeStepControl,
};
use tephra_io::{FusionCoordinator, OutputWriter, ReapReport};

use crate::config::{ConfigError, SolverConfig};
use crate::error::SolveError;

/// The solver's external collaborators.
pub struct SolverParts {
    /// Background grid.
    pub mesh: Box<dyn Mesh>,
    /// Particle and grid storage.
    pub problem: Box<dyn ProblemManager>,
    /// One explicit physics step.
    pub integrator: Box<dyn TimeIntegrator>,
    /// Stable timestep bound.
    pub dt_control: Box<dyn TimeStepControl>,
}

/// One output step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OutputEvent {
    /// Step written.
    pub step: u64,
    /// Simulation time written.
    pub time: f64,
    /// Write timings across participants; `Some` on the report rank only.
    pub write_stats: Option<TimerStats>,
}

/// Result of a completed [`Solver::solve`].
#[derive(Clone, Debug, PartialEq)]
pub struct SolveSummary {
    /// Steps taken by this call.
    pub steps: u64,
    /// Simulation time at exit (at or past `t_final`).
    pub final_time: f64,
    /// Every output this call wrote, initial state first.
    pub outputs: Vec<OutputEvent>,
    /// Fuse jobs this participant launched and reaped.
    pub reap: ReapReport,
}

/// Drives one participant's share of the simulation.
pub struct Solver {
    world: Box<dyn Communicator>,
    parts: SolverParts,
    config: SolverConfig,
    boundary: BoundaryCondition,
    clock: SimulationClock,
    writer: OutputWriter,
    fusion: FusionCoordinator,
    stats: StatsAggregator,
}

impl Solver {
    /// Validate `config`, then elect node leaders and set up output.
    ///
    /// Validation happens before the first collective call. Collective over
    /// `world` after that.
    pub fn new(
        world: Box<dyn Communicator>,
        parts: SolverParts,
        config: SolverConfig,
    ) -> Result<Self, SolveError> {
        config.validate_for(world.size())?;

        let boundary = config.boundary.clone().with_domain(
            parts.mesh.min_domain_global_node_index(),
            parts.mesh.max_domain_global_node_index(),
        );
        let clock = SimulationClock::new(config.max_dt).map_err(|_| ConfigError::InvalidMaxDt {
            value: config.max_dt,
        })?;
        let fusion = FusionCoordinator::new(&*world, &config.output)?;
        let writer = OutputWriter::new(config.output.clone());
        let stats = StatsAggregator::new(config.report_rank);

        tracing::debug!(
            rank = world.rank(),
            backend = %config.backend,
            format = ?writer.format(),
            partitioned = writer.partitioned(),
            fusion = ?fusion.mode(),
            "solver ready"
        );

        Ok(Self {
            world,
            parts,
            config,
            boundary,
            clock,
            writer,
            fusion,
            stats,
        })
    }

    /// The simulation clock.
    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    /// This rank's placement in the node topology.
    pub fn participant(&self) -> &DomainParticipant {
        self.fusion.participant()
    }

    /// Boundary conditions with the mesh's domain bounds applied.
    pub fn boundary(&self) -> &BoundaryCondition {
        &self.boundary
    }

    /// Fuse jobs launched and not yet reaped.
    pub fn outstanding_fusion_jobs(&self) -> usize {
        self.fusion.outstanding()
    }

    /// Run until simulation time reaches `t_final`, writing output at the
    /// initial state and every `write_interval` steps.
    ///
    /// Returns only after every fuse job this participant launched has
    /// exited and all participants agree none failed. The last step may
    /// overshoot `t_final` by up to one dt.
    pub fn solve(&mut self, t_final: f64, write_interval: i64) -> Result<SolveSummary, SolveError> {
        if write_interval < 1 {
            return Err(ConfigError::InvalidWriteInterval {
                value: write_interval,
            }
            .into());
        }
        if t_final.is_nan() {
            return Err(ConfigError::InvalidFinalTime { value: t_final }.into());
        }
        let interval = write_interval as u64;
        let first_step = self.clock.step();
        let mut outputs = vec![self.output_particles()?];

        while self.clock.time() < t_final {
            if self.clock.on_interval(interval) && self.world.rank() == self.config.report_rank {
                self.report_progress(t_final);
            }

            let dt = self.stable_dt()?;
            self.parts.integrator.step(
                self.config.backend,
                &mut *self.parts.problem,
                dt,
                self.config.gravity,
                &self.boundary,
            )?;
            self.parts
                .problem
                .communicate_particles(self.config.halo_min)?;
            self.clock
                .advance(dt)
                .map_err(|_| SolveError::NonPositiveTimestep {
                    step: self.clock.step(),
                    dt,
                })?;
            tracing::debug!(step = self.clock.step(), time = self.clock.time(), dt, "step complete");

            if self.clock.on_interval(interval) {
                outputs.push(self.output_particles()?);
            }
        }

        let reap = self.shutdown()?;
        Ok(SolveSummary {
            steps: self.clock.step() - first_step,
            final_time: self.clock.time(),
            outputs,
            reap,
        })
    }

    /// [`solve`](Self::solve), aborting the whole job on any error.
    pub fn solve_or_abort(&mut self, t_final: f64, write_interval: i64) -> SolveSummary {
        match self.solve(t_final, write_interval) {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(rank = self.world.rank(), error = %e, "fatal solver error, aborting job");
                self.world.abort(1)
            }
        }
    }

    fn report_progress(&self, t_final: f64) {
        match self.stats.latest() {
            Some(io) => tracing::info!(
                step = self.clock.step(),
                time = self.clock.time(),
                t_final,
                io_min = io.min,
                io_max = io.max,
                io_mean = io.mean,
                io_std = io.std,
                "progress"
            ),
            None => tracing::info!(
                step = self.clock.step(),
                time = self.clock.time(),
                t_final,
                "progress"
            ),
        }
    }

    /// Ask the stability control for this step's dt and hold it to the
    /// contract: finite, positive, at most `max_dt`.
    fn stable_dt(&mut self) -> Result<f64, SolveError> {
        let max_dt = self.config.max_dt;
        let ctx = DtContext {
            comm: &*self.world,
            problem: &*self.parts.problem,
            mesh: &*self.parts.mesh,
            previous_dt: self.clock.dt(),
            max_dt,
        };
        let dt = self.parts.dt_control.compute_dt(ctx)?;
        let step = self.clock.step();
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SolveError::NonPositiveTimestep { step, dt });
        }
        if dt > max_dt {
            return Err(SolveError::TimestepAboveCeiling { step, dt, max_dt });
        }
        Ok(dt)
    }

    /// Write the current state, reduce the write time to the report rank,
    /// and hand the subfiles to the fusion coordinator.
    fn output_particles(&mut self) -> Result<OutputEvent, SolveError> {
        let step = self.clock.step();
        let time = self.clock.time();

        let start = Instant::now();
        let manifest = self.writer.write(
            &*self.world,
            self.fusion.topology(),
            step,
            time,
            self.parts.problem.particle_fields(),
        )?;
        let elapsed = start.elapsed().as_secs_f64();
        let write_stats = self.stats.record(&*self.world, elapsed)?;

        if self.writer.partitioned() {
            if let Some(name) = self.writer.artifact_name(step) {
                self.fusion.fuse(&*self.world, &name, &manifest)?;
            }
        }
        Ok(OutputEvent {
            step,
            time,
            write_stats,
        })
    }

    /// Reap local fuse jobs, then agree on the outcome job-wide.
    fn shutdown(&mut self) -> Result<ReapReport, SolveError> {
        let local = self.fusion.reap();
        let local_failures = match &local {
            Ok(report) => report.failures.len(),
            Err(_) => 1,
        };
        let failed_jobs =
            self.world
                .all_reduce_f64(local_failures as f64, ReduceOp::Sum)? as usize;
        let report = local?;
        if failed_jobs > 0 {
            return Err(SolveError::FusionFailed {
                failed_jobs,
                local: report.failures,
            });
        }
        Ok(report)
    }
}

impl std::fmt::Debug for Solver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Solver")
            .field("rank", &self.world.rank())
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish()
    }
}
