//! Solver configuration and validation.
//!
//! [`SolverConfig`] is checked in full before the solver makes any
//! collective call, so a bad value fails every participant identically
//! without leaving peers blocked.

use std::error::Error;
use std::fmt;

use tephra_core::{BackendError, BoundaryCondition, ComputeBackend};
use tephra_io::{OutputConfig, OutputConfigError};

// ── Error type ─────────────────────────────────────────────────

/// Errors detected during configuration validation.
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigError {
    /// The compute backend is unknown or not compiled in.
    Backend(BackendError),
    /// `max_dt` is NaN, infinite, zero, or negative.
    InvalidMaxDt {
        /// The invalid value.
        value: f64,
    },
    /// `gravity` is NaN or infinite.
    InvalidGravity {
        /// The invalid value.
        value: f64,
    },
    /// `halo_min` is zero.
    HaloTooSmall {
        /// The configured width.
        configured: usize,
    },
    /// The progress-reporting rank is outside the world communicator.
    ReportRankOutOfRange {
        /// The configured rank.
        rank: usize,
        /// World size.
        size: usize,
    },
    /// The output configuration is invalid.
    Output(OutputConfigError),
    /// The output interval passed to `solve` is below 1.
    InvalidWriteInterval {
        /// The rejected interval.
        value: i64,
    },
    /// The final time passed to `solve` is NaN.
    InvalidFinalTime {
        /// The rejected time.
        value: f64,
    },
    /// A CFL number outside `(0, 1]`.
    InvalidCfl {
        /// The rejected value.
        value: f64,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(e) => write!(f, "backend: {e}"),
            Self::InvalidMaxDt { value } => {
                write!(f, "max_dt must be finite and positive, got {value}")
            }
            Self::InvalidGravity { value } => write!(f, "gravity must be finite, got {value}"),
            Self::HaloTooSmall { configured } => {
                write!(f, "halo_min must be at least 1, got {configured}")
            }
            Self::ReportRankOutOfRange { rank, size } => {
                write!(f, "report rank {rank} out of range for {size} participants")
            }
            Self::Output(e) => write!(f, "output: {e}"),
            Self::InvalidWriteInterval { value } => {
                write!(f, "write interval must be at least 1, got {value}")
            }
            Self::InvalidFinalTime { value } => write!(f, "invalid final time {value}"),
            Self::InvalidCfl { value } => write!(f, "CFL number must be in (0, 1], got {value}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend(e) => Some(e),
            Self::Output(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackendError> for ConfigError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

impl From<OutputConfigError> for ConfigError {
    fn from(e: OutputConfigError) -> Self {
        Self::Output(e)
    }
}

// ── SolverConfig ───────────────────────────────────────────────

/// Everything the solver needs besides its collaborators.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverConfig {
    /// Compute backend handed to the integrator. Default: serial.
    pub backend: ComputeBackend,
    /// Timestep ceiling; the stability control may only go below it.
    pub max_dt: f64,
    /// Gravitational acceleration handed to the integrator.
    pub gravity: f64,
    /// Boundary conditions; domain bounds are filled in from the mesh.
    pub boundary: BoundaryCondition,
    /// Minimum halo width for particle redistribution. Default: 3.
    pub halo_min: usize,
    /// Rank that logs progress and collects I/O timings. Default: 0.
    pub report_rank: usize,
    /// Particle output and fusion.
    pub output: OutputConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backend: ComputeBackend::Serial,
            max_dt: 1.0e-3,
            gravity: 0.0,
            boundary: BoundaryCondition::default(),
            halo_min: 3,
            report_rank: 0,
            output: OutputConfig::default(),
        }
    }
}

impl SolverConfig {
    /// Select the backend by name (`"serial"`, `"openmp"`, `"cuda"`,
    /// `"hip"`, any case).
    pub fn with_backend_name(mut self, name: &str) -> Result<Self, ConfigError> {
        self.backend = ComputeBackend::select(name)?;
        Ok(self)
    }

    /// Check every value that does not depend on the communicator.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend.ensure_available()?;
        if !(self.max_dt.is_finite() && self.max_dt > 0.0) {
            return Err(ConfigError::InvalidMaxDt { value: self.max_dt });
        }
        if !self.gravity.is_finite() {
            return Err(ConfigError::InvalidGravity {
                value: self.gravity,
            });
        }
        if self.halo_min == 0 {
            return Err(ConfigError::HaloTooSmall {
                configured: self.halo_min,
            });
        }
        self.output.validate()?;
        Ok(())
    }

    /// [`validate`](Self::validate) plus the checks against the world size.
    pub fn validate_for(&self, world_size: usize) -> Result<(), ConfigError> {
        self.validate()?;
        if self.report_rank >= world_size {
            return Err(ConfigError::ReportRankOutOfRange {
                rank: self.report_rank,
                size: world_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(SolverConfig::default().validate_for(1).is_ok());
    }

    #[test]
    fn bad_max_dt() {
        for value in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let cfg = SolverConfig {
                max_dt: value,
                ..SolverConfig::default()
            };
            match cfg.validate() {
                Err(ConfigError::InvalidMaxDt { .. }) => {}
                other => panic!("expected InvalidMaxDt for {value}, got {other:?}"),
            }
        }
    }

    #[test]
    fn bad_gravity_and_halo() {
        let cfg = SolverConfig {
            gravity: f64::NAN,
            ..SolverConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidGravity { .. })));
        let cfg = SolverConfig {
            halo_min: 0,
            ..SolverConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::HaloTooSmall { configured: 0 })
        );
    }

    #[test]
    fn report_rank_checked_against_world() {
        let cfg = SolverConfig {
            report_rank: 4,
            ..SolverConfig::default()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(
            cfg.validate_for(4),
            Err(ConfigError::ReportRankOutOfRange { rank: 4, size: 4 })
        );
    }

    #[test]
    fn backend_by_name() {
        let cfg = SolverConfig::default().with_backend_name("SERIAL").unwrap();
        assert_eq!(cfg.backend, ComputeBackend::Serial);
        assert!(matches!(
            SolverConfig::default().with_backend_name("fortran"),
            Err(ConfigError::Backend(BackendError::Unknown { .. }))
        ));
    }

    #[test]
    fn disabled_backend_fails_validation() {
        let Some(&disabled) = ComputeBackend::ALL.iter().find(|b| !b.is_available()) else {
            return;
        };
        let cfg = SolverConfig {
            backend: disabled,
            ..SolverConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Backend(BackendError::Unavailable { .. }))
        ));
    }
}
