//! Errors from running the solver loop.

use std::error::Error;
use std::fmt;

use tephra_core::{CollaboratorError, CommError};
use tephra_io::{FusionError, FusionFailure, OutputError};

use crate::config::ConfigError;

/// Fatal errors from [`Solver`](crate::Solver).
///
/// Every variant is fatal for the whole job; the collective-agreed ones
/// (`NonPositiveTimestep`, `TimestepAboveCeiling`, `FusionFailed`) are
/// raised on every participant at the same step.
#[derive(Debug)]
pub enum SolveError {
    /// Invalid configuration or `solve` arguments.
    Config(ConfigError),
    /// The stability control returned a zero, negative, or non-finite dt.
    NonPositiveTimestep {
        /// Step the dt was requested for.
        step: u64,
        /// The returned dt.
        dt: f64,
    },
    /// The stability control returned a dt above the configured ceiling.
    TimestepAboveCeiling {
        /// Step the dt was requested for.
        step: u64,
        /// The returned dt.
        dt: f64,
        /// The ceiling.
        max_dt: f64,
    },
    /// An external collaborator failed.
    Collaborator(CollaboratorError),
    /// A collective call failed.
    Comm(CommError),
    /// Writing particle output failed.
    Output(OutputError),
    /// The fusion coordinator failed.
    Fusion(FusionError),
    /// At least one background fuser on some participant failed.
    FusionFailed {
        /// Failed jobs across all participants.
        failed_jobs: usize,
        /// Failures of the jobs this participant launched.
        local: Vec<FusionFailure>,
    },
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration: {e}"),
            Self::NonPositiveTimestep { step, dt } => {
                write!(f, "non-positive stable timestep {dt} at step {step}")
            }
            Self::TimestepAboveCeiling { step, dt, max_dt } => write!(
                f,
                "timestep {dt} at step {step} exceeds the ceiling {max_dt}"
            ),
            Self::Collaborator(e) => write!(f, "{e}"),
            Self::Comm(e) => write!(f, "communication: {e}"),
            Self::Output(e) => write!(f, "output: {e}"),
            Self::Fusion(e) => write!(f, "fusion: {e}"),
            Self::FusionFailed { failed_jobs, .. } => {
                write!(f, "{failed_jobs} background fusion job(s) failed")
            }
        }
    }
}

impl Error for SolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Collaborator(e) => Some(e),
            Self::Comm(e) => Some(e),
            Self::Output(e) => Some(e),
            Self::Fusion(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for SolveError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<CollaboratorError> for SolveError {
    fn from(e: CollaboratorError) -> Self {
        Self::Collaborator(e)
    }
}

impl From<CommError> for SolveError {
    fn from(e: CommError) -> Self {
        Self::Comm(e)
    }
}

impl From<OutputError> for SolveError {
    fn from(e: OutputError) -> Self {
        Self::Output(e)
    }
}

impl From<FusionError> for SolveError {
    fn from(e: FusionError) -> Self {
        Self::Fusion(e)
    }
}
