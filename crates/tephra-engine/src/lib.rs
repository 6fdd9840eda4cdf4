//! The Tephra solver loop.
//!
//! [`Solver`] owns the simulation clock and drives the external
//! collaborators in a fixed order every step: stable-timestep negotiation,
//! explicit integration, halo redistribution, and periodic output with
//! background subfile fusion. All background work it launched is reaped
//! and agreed on collectively before [`Solver::solve`] returns.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod cfl;
pub mod config;
pub mod error;
pub mod solver;

pub use cfl::CflTimeStepControl;
pub use config::{ConfigError, SolverConfig};
pub use error::SolveError;
pub use solver::{OutputEvent, SolveSummary, Solver, SolverParts};
