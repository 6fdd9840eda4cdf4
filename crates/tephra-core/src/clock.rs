//! Simulation time and step counters.

use crate::error::ClockError;

/// Time, step index, and current timestep of a running simulation.
///
/// The solver owns the clock exclusively and mutates it only through
/// [`advance()`](SimulationClock::advance), which enforces the
/// invariants: `dt > 0`, `time` never decreases, and `step` grows by
/// exactly one per completed integration.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationClock {
    time: f64,
    step: u64,
    dt: f64,
}

impl SimulationClock {
    /// Create a clock at `time = 0`, `step = 0` with an initial timestep.
    pub fn new(dt: f64) -> Result<Self, ClockError> {
        check_dt(dt)?;
        Ok(Self {
            time: 0.0,
            step: 0,
            dt,
        })
    }

    /// Current simulation time.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Number of completed integration steps.
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Timestep used for the most recent step (or the initial one).
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Record one completed step of size `dt`.
    ///
    /// On error the clock is left untouched.
    pub fn advance(&mut self, dt: f64) -> Result<(), ClockError> {
        check_dt(dt)?;
        self.dt = dt;
        self.time += dt;
        self.step += 1;
        Ok(())
    }

    /// Whether `step` lands on an output boundary for `interval`.
    ///
    /// `interval` must be non-zero; the solver validates it before the
    /// loop starts.
    pub fn on_interval(&self, interval: u64) -> bool {
        self.step % interval == 0
    }
}

fn check_dt(dt: f64) -> Result<(), ClockError> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(ClockError::NonPositiveDt { dt })
    }
}
