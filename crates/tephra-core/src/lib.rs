//! Core types and traits for the Tephra material point solver.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the simulation clock, compute backend selection, boundary conditions,
//! particle field views, the collective [`Communicator`] abstraction, and
//! the collaborator traits the solver loop drives each step.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod boundary;
pub mod clock;
pub mod comm;
pub mod error;
pub mod field;
pub mod traits;

pub use backend::ComputeBackend;
pub use boundary::{BoundaryCondition, BoundaryType};
pub use clock::SimulationClock;
pub use comm::{Communicator, ReduceOp};
pub use error::{BackendError, ClockError, CollaboratorError, CommError};
pub use field::{Material, ParticleFields, ParticleFieldsMut, ParticleRecord};
pub use traits::{DtContext, Mesh, ProblemManager, TimeIntegrator, TimeStepControl};
