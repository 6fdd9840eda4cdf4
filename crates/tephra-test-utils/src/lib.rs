//! Test utilities and mock collaborators for Tephra development.
//!
//! Provides mock implementations of the solver's collaborator traits
//! ([`Mesh`], [`ProblemManager`]) plus the shared [`EventLog`] they record
//! into, so tests can inspect call order after the solver has taken
//! ownership of the mocks. Stepping fixtures live in [`fixtures`].

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::sync::{Arc, Mutex};

use tephra_core::{
    CollaboratorError, Material, Mesh, ParticleFields, ParticleFieldsMut, ProblemManager,
};

/// One collaborator call observed during a run.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// `TimeIntegrator::step` with this dt.
    Integrate { dt: f64 },
    /// `ProblemManager::communicate_particles` with this halo width.
    Redistribute { halo_min: usize },
    /// `TimeStepControl::compute_dt` returned this dt.
    ComputeDt { dt: f64 },
}

/// Shared, cloneable log of [`Event`]s.
#[derive(Clone, Debug, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    /// dt of every integration, in order.
    pub fn integrated_dts(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Integrate { dt } => Some(dt),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

/// Uniform mesh with fixed global node bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct MockMesh {
    pub cell_size: f64,
    pub min: [i64; 3],
    pub max: [i64; 3],
}

impl MockMesh {
    pub fn uniform(cell_size: f64) -> Self {
        Self {
            cell_size,
            min: [0, 0, 0],
            max: [10, 10, 10],
        }
    }
}

impl Default for MockMesh {
    fn default() -> Self {
        Self::uniform(0.1)
    }
}

impl Mesh for MockMesh {
    fn cell_size(&self) -> f64 {
        self.cell_size
    }

    fn min_domain_global_node_index(&self) -> [i64; 3] {
        self.min
    }

    fn max_domain_global_node_index(&self) -> [i64; 3] {
        self.max
    }
}

/// Material used by [`MockProblem`] unless overridden: sound speed at
/// rest is `sqrt(700)`.
pub const MOCK_MATERIAL: Material = Material {
    bulk_modulus: 1.0e5,
    density: 1000.0,
    gamma: 7.0,
    kappa: 50.0,
};

/// Particle store with deterministic contents.
///
/// Particle `i` sits at `[offset + i, 0, 0]` with the configured velocity
/// and `J = 1`.
#[derive(Clone, Debug)]
pub struct MockProblem {
    positions: Vec<[f64; 3]>,
    velocities: Vec<[f64; 3]>,
    j: Vec<f64>,
    material: Material,
    log: EventLog,
    fail_redistribution: bool,
}

impl MockProblem {
    pub fn new(count: usize) -> Self {
        Self {
            positions: (0..count).map(|i| [i as f64, 0.0, 0.0]).collect(),
            velocities: vec![[0.0; 3]; count],
            j: vec![1.0; count],
            material: MOCK_MATERIAL,
            log: EventLog::new(),
            fail_redistribution: false,
        }
    }

    /// Shift every position along x.
    pub fn with_offset(mut self, offset: f64) -> Self {
        for p in &mut self.positions {
            p[0] += offset;
        }
        self
    }

    /// Give every particle the same velocity.
    pub fn with_velocity(mut self, velocity: [f64; 3]) -> Self {
        self.velocities.fill(velocity);
        self
    }

    /// Give every particle the same deformation gradient determinant.
    pub fn with_j(mut self, j: f64) -> Self {
        self.j.fill(j);
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Make `communicate_particles` fail.
    pub fn failing_redistribution(mut self) -> Self {
        self.fail_redistribution = true;
        self
    }
}

impl ProblemManager for MockProblem {
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
        self.material
    }

    fn communicate_particles(&mut self, halo_min: usize) -> Result<(), CollaboratorError> {
        self.log.push(Event::Redistribute { halo_min });
        if self.fail_redistribution {
            return Err(CollaboratorError::Redistribution {
                reason: "mock redistribution failure".into(),
            });
        }
        Ok(())
    }
}
