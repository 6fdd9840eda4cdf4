//! Tephra: the time-stepping driver of a distributed material point solver.
//!
//! This is the top-level facade crate that re-exports the public API from all
//! Tephra sub-crates. For most users, adding `tephra` as a single dependency
//! is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use tephra::prelude::*;
//! use tephra::comm::LocalUniverse;
//! use tephra_test_utils::fixtures::{ConstantDtControl, RecordingIntegrator};
//! use tephra_test_utils::{MockMesh, MockProblem};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = SolverConfig {
//!     max_dt: 0.25,
//!     output: OutputConfig {
//!         dir: dir.path().to_path_buf(),
//!         ..OutputConfig::default()
//!     },
//!     ..SolverConfig::default()
//! };
//!
//! // Two ranks, each owning four particles; output every two steps.
//! let summaries = LocalUniverse::new(2).run(|comm| {
//!     let parts = SolverParts {
//!         mesh: Box::new(MockMesh::default()),
//!         problem: Box::new(MockProblem::new(4)),
//!         integrator: Box::new(RecordingIntegrator::default()),
//!         dt_control: Box::new(ConstantDtControl::new(0.25)),
//!     };
//!     let mut solver = Solver::new(Box::new(comm), parts, config.clone()).unwrap();
//!     solver.solve(1.0, 2).unwrap()
//! });
//! assert_eq!(summaries[0].steps, 4);
//! assert_eq!(summaries[0].outputs.len(), 3);
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tephra-core` | Clock, backends, boundaries, field views, collaborator traits |
//! | [`comm`] | `tephra-comm` | Communicators, node-leader election, timer statistics |
//! | [`io`] | `tephra-io` | Output writer, subfiling, fusion coordinator, offline fuser |
//! | [`engine`] | `tephra-engine` | Solver loop, configuration, CFL timestep control |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types and traits (`tephra-core`).
///
/// Contains the [`types::SimulationClock`], [`types::ComputeBackend`],
/// [`types::BoundaryCondition`], particle field views, the
/// [`types::Communicator`] abstraction, and the collaborator traits
/// ([`types::Mesh`], [`types::ProblemManager`], [`types::TimeIntegrator`],
/// [`types::TimeStepControl`]).
pub use tephra_core as types;

/// Collective communication (`tephra-comm`).
///
/// [`comm::LocalUniverse`] runs ranks as threads of one process;
/// [`comm::NodeTopology`] elects one leader per shared-memory node.
pub use tephra_comm as comm;

/// Particle output and fusion (`tephra-io`).
///
/// [`io::OutputWriter`] writes one artifact per output step, partitioned
/// into per-node subfiles when subfiling is on; [`io::FusionCoordinator`]
/// launches and reaps the background fusers that merge them.
pub use tephra_io as io;

/// The solver loop (`tephra-engine`).
///
/// [`engine::Solver`] drives the collaborators to a final time and owns
/// output scheduling and fusion shutdown.
pub use tephra_engine as engine;

/// Common imports for typical Tephra usage.
///
/// ```rust
/// use tephra::prelude::*;
/// ```
///
/// This imports the solver, its configuration, the collaborator traits,
/// and the error types a driver program handles.
pub mod prelude {
    // Core types and traits
    pub use tephra_core::{
        BoundaryCondition, BoundaryType, Communicator, ComputeBackend, DtContext, Material,
        Mesh, ParticleFields, ParticleFieldsMut, ProblemManager, ReduceOp, SimulationClock,
        TimeIntegrator, TimeStepControl,
    };

    // Errors
    pub use tephra_core::{CollaboratorError, CommError};
    pub use tephra_engine::{ConfigError, SolveError};

    // Output
    pub use tephra_io::{FusionTopology, OutputConfig, OutputFormat};

    // Engine
    pub use tephra_engine::{
        CflTimeStepControl, OutputEvent, SolveSummary, Solver, SolverConfig, SolverParts,
    };
}
