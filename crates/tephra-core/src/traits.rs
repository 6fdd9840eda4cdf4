//! Collaborator traits driven by the solver loop.
//!
//! The solver owns one instance of each and calls them in a fixed order
//! every step: [`TimeStepControl`] → [`TimeIntegrator`] →
//! [`ProblemManager::communicate_particles`]. Implementations own the
//! numerics; the solver only owns the clock and the output pipeline.

use crate::backend::ComputeBackend;
use crate::boundary::BoundaryCondition;
use crate::comm::Communicator;
use crate::error::CollaboratorError;
use crate::field::{Material, ParticleFields, ParticleFieldsMut};

/// The decomposed background grid, as seen by one rank.
pub trait Mesh {
    /// Uniform cell edge length.
    fn cell_size(&self) -> f64;

    /// Lowest global node index owned by the global domain, per dimension.
    fn min_domain_global_node_index(&self) -> [i64; 3];

    /// One past the highest global node index of the global domain.
    fn max_domain_global_node_index(&self) -> [i64; 3];
}

/// Owner of particle and grid field storage on one rank.
pub trait ProblemManager {
    /// Number of particles currently owned by this rank.
    fn num_particles(&self) -> usize;

    /// Read-only view of the output particle fields.
    fn particle_fields(&self) -> ParticleFields<'_>;

    /// Mutable view of the particle fields, for the integrator.
    fn particle_fields_mut(&mut self) -> ParticleFieldsMut<'_>;

    /// Equation-of-state parameters.
    fn material(&self) -> Material;

    /// Move particles that left this rank's domain to their new owners.
    ///
    /// Collective over the decomposition. `halo_min` is the minimum halo
    /// width, in cells, the exchange must preserve.
    fn communicate_particles(&mut self, halo_min: usize) -> Result<(), CollaboratorError>;
}

/// One explicit material point step: grid reset, P2G, grid update, G2P.
pub trait TimeIntegrator {
    /// Advance particle and grid state by `dt`.
    fn step(
        &mut self,
        backend: ComputeBackend,
        problem: &mut dyn ProblemManager,
        dt: f64,
        gravity: f64,
        bc: &BoundaryCondition,
    ) -> Result<(), CollaboratorError>;
}

/// Inputs to a timestep negotiation.
pub struct DtContext<'a> {
    /// World communicator; the bound is a reduction over every rank.
    pub comm: &'a dyn Communicator,
    /// Current particle state.
    pub problem: &'a dyn ProblemManager,
    /// Background grid.
    pub mesh: &'a dyn Mesh,
    /// Timestep used by the previous step.
    pub previous_dt: f64,
    /// Configured upper bound. The result must never exceed it.
    pub max_dt: f64,
}

/// Stability-bounded timestep negotiation.
///
/// # Contract
///
/// - Collective: every rank calls `compute_dt` once per step, in lockstep,
///   and receives the same value.
/// - The result is in `(0, max_dt]`. It may shrink below `max_dt` to honour
///   the CFL condition and relax back toward it when the bound loosens.
pub trait TimeStepControl {
    /// Compute the timestep for the next step.
    fn compute_dt(&mut self, ctx: DtContext<'_>) -> Result<f64, CollaboratorError>;
}
