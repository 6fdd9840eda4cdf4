//! CFL-bounded stable timestep.
//!
//! The fastest signal in the domain is a particle's speed plus the local
//! sound speed of the fluid. The stable dt is `cfl * dx / max_speed`, taken
//! over every participant and capped at the configured ceiling.

use tephra_core::{CollaboratorError, DtContext, ReduceOp, TimeStepControl};

use crate::config::ConfigError;

/// Default CFL number.
pub const DEFAULT_CFL: f64 = 0.5;

/// [`TimeStepControl`] from the global maximum wave speed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CflTimeStepControl {
    cfl: f64,
}

impl CflTimeStepControl {
    /// Control with CFL number `cfl`, which must lie in `(0, 1]`.
    pub fn new(cfl: f64) -> Result<Self, ConfigError> {
        if cfl > 0.0 && cfl <= 1.0 {
            Ok(Self { cfl })
        } else {
            Err(ConfigError::InvalidCfl { value: cfl })
        }
    }

    /// The CFL number.
    pub fn cfl(&self) -> f64 {
        self.cfl
    }
}

impl Default for CflTimeStepControl {
    fn default() -> Self {
        Self { cfl: DEFAULT_CFL }
    }
}

impl TimeStepControl for CflTimeStepControl {
    fn compute_dt(&mut self, ctx: DtContext<'_>) -> Result<f64, CollaboratorError> {
        let material = ctx.problem.material();
        // A non-finite wave speed anywhere drives the bound to zero on
        // every participant instead of being dropped by the max.
        let local = ctx
            .problem
            .particle_fields()
            .records()
            .map(|p| {
                let speed = p.speed() + material.sound_speed(p.j);
                if speed.is_finite() {
                    speed
                } else {
                    f64::INFINITY
                }
            })
            .fold(0.0, f64::max);
        let max_speed = ctx.comm.all_reduce_f64(local, ReduceOp::Max)?;
        if max_speed <= 0.0 {
            return Ok(ctx.max_dt);
        }
        let bound = self.cfl * ctx.mesh.cell_size() / max_speed;
        Ok(bound.min(ctx.max_dt))
    }
}
