//! Error types shared across the Tephra workspace.
//!
//! Organized by subsystem: compute backend selection, the simulation
//! clock, the collective communication layer, and the external
//! collaborators (integrator, halo exchange, stability control).

use std::error::Error;
use std::fmt;

use crate::backend::ComputeBackend;

/// Errors from resolving a compute backend name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendError {
    /// The name does not match any known backend.
    Unknown {
        /// The unrecognized name as given.
        name: String,
    },
    /// The backend exists but was disabled when this build was compiled.
    Unavailable {
        /// The disabled backend.
        backend: ComputeBackend,
    },
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown { name } => write!(f, "invalid backend '{name}'"),
            Self::Unavailable { backend } => {
                write!(f, "{backend} backend not enabled in this build")
            }
        }
    }
}

impl Error for BackendError {}

/// Errors from advancing the [`SimulationClock`](crate::SimulationClock).
#[derive(Clone, Debug, PartialEq)]
pub enum ClockError {
    /// The requested timestep is zero, negative, or not finite.
    NonPositiveDt {
        /// The rejected timestep.
        dt: f64,
    },
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonPositiveDt { dt } => {
                write!(f, "timestep must be finite and positive, got {dt}")
            }
        }
    }
}

impl Error for ClockError {}

/// Errors from the collective communication layer.
///
/// Any of these breaks collective lockstep, so callers treat them as
/// fatal for the whole job rather than recovering locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommError {
    /// A peer's channel closed before the collective completed.
    Disconnected {
        /// Rank (within the communicator) of the unreachable peer.
        rank: usize,
    },
    /// A root or collector rank is outside the communicator.
    InvalidRank {
        /// The requested rank.
        rank: usize,
        /// Size of the communicator.
        size: usize,
    },
    /// A collective payload could not be decoded.
    Malformed {
        /// Description of the decoding failure.
        detail: String,
    },
    /// Another rank aborted the job while this rank was waiting on it.
    Aborted,
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected { rank } => write!(f, "rank {rank} disconnected mid-collective"),
            Self::InvalidRank { rank, size } => {
                write!(f, "rank {rank} out of range for communicator of size {size}")
            }
            Self::Malformed { detail } => write!(f, "malformed collective payload: {detail}"),
            Self::Aborted => write!(f, "job aborted by another rank"),
        }
    }
}

impl Error for CommError {}

/// Errors reported by the external collaborators driven by the solver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollaboratorError {
    /// The time integrator failed to advance the state.
    Integration {
        /// Human-readable description of the failure.
        reason: String,
    },
    /// Halo redistribution of particles failed.
    Redistribution {
        /// Human-readable description of the failure.
        reason: String,
    },
    /// The stability control could not produce a timestep.
    StabilityControl {
        /// Human-readable description of the failure.
        reason: String,
    },
    /// A collective call inside a collaborator failed.
    Comm(CommError),
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integration { reason } => write!(f, "time integration failed: {reason}"),
            Self::Redistribution { reason } => {
                write!(f, "particle redistribution failed: {reason}")
            }
            Self::StabilityControl { reason } => {
                write!(f, "timestep control failed: {reason}")
            }
            Self::Comm(e) => write!(f, "communication: {e}"),
        }
    }
}

impl Error for CollaboratorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Comm(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CommError> for CollaboratorError {
    fn from(e: CommError) -> Self {
        Self::Comm(e)
    }
}
