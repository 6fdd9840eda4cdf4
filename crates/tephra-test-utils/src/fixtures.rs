//! Stepping fixtures and the fuser stub.
//!
//! - [`RecordingIntegrator`] logs every step and otherwise does nothing.
//! - [`ConstantDtControl`] always proposes the same dt, clamped to the
//!   ceiling.
//! - [`ScriptedDtControl`] replays a fixed dt sequence, unclamped, so
//!   tests can feed the solver contract-violating values.
//! - [`FailingDtControl`] fails deterministically after N calls.
//! - [`write_fuser_stub`] writes an executable standing in for
//!   `tephra-fuse`.

use std::path::{Path, PathBuf};

use tephra_core::{
    BoundaryCondition, CollaboratorError, ComputeBackend, DtContext, ProblemManager,
    TimeIntegrator, TimeStepControl,
};

use crate::{Event, EventLog};

/// Integrator that records each call and leaves the state untouched.
#[derive(Clone, Debug, Default)]
pub struct RecordingIntegrator {
    pub log: EventLog,
}

impl RecordingIntegrator {
    pub fn new(log: EventLog) -> Self {
        Self { log }
    }
}

impl TimeIntegrator for RecordingIntegrator {
    fn step(
        &mut self,
        _backend: ComputeBackend,
        _problem: &mut dyn ProblemManager,
        dt: f64,
        _gravity: f64,
        _bc: &BoundaryCondition,
    ) -> Result<(), CollaboratorError> {
        self.log.push(Event::Integrate { dt });
        Ok(())
    }
}

/// Always proposes `dt`, never above the ceiling.
#[derive(Clone, Debug)]
pub struct ConstantDtControl {
    pub dt: f64,
}

impl ConstantDtControl {
    pub fn new(dt: f64) -> Self {
        Self { dt }
    }
}

impl TimeStepControl for ConstantDtControl {
    fn compute_dt(&mut self, ctx: DtContext<'_>) -> Result<f64, CollaboratorError> {
        Ok(self.dt.min(ctx.max_dt))
    }
}

/// Replays `script` in order, repeating the last value once exhausted.
#[derive(Clone, Debug)]
pub struct ScriptedDtControl {
    script: Vec<f64>,
    calls: usize,
    log: EventLog,
}

impl ScriptedDtControl {
    pub fn new(script: Vec<f64>) -> Self {
        Self {
            script,
            calls: 0,
            log: EventLog::new(),
        }
    }

    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }
}

impl TimeStepControl for ScriptedDtControl {
    fn compute_dt(&mut self, _ctx: DtContext<'_>) -> Result<f64, CollaboratorError> {
        let dt = self
            .script
            .get(self.calls)
            .or(self.script.last())
            .copied()
            .ok_or_else(|| CollaboratorError::StabilityControl {
                reason: "empty dt script".into(),
            })?;
        self.calls += 1;
        self.log.push(Event::ComputeDt { dt });
        Ok(dt)
    }
}

/// Succeeds with the ceiling `succeed_count` times, then fails.
#[derive(Clone, Debug)]
pub struct FailingDtControl {
    pub succeed_count: usize,
    calls: usize,
}

impl FailingDtControl {
    pub fn new(succeed_count: usize) -> Self {
        Self {
            succeed_count,
            calls: 0,
        }
    }
}

impl TimeStepControl for FailingDtControl {
    fn compute_dt(&mut self, ctx: DtContext<'_>) -> Result<f64, CollaboratorError> {
        self.calls += 1;
        if self.calls > self.succeed_count {
            return Err(CollaboratorError::StabilityControl {
                reason: format!("deliberate failure at call {}", self.calls),
            });
        }
        Ok(ctx.max_dt)
    }
}

/// Name of the file the fuser stub appends its arguments to.
pub const FUSER_LOG: &str = "fuser_calls.log";

/// Write an executable shell script into `dir` that appends its argument
/// list as one line to `dir/fuser_calls.log` and exits with `exit_code`.
///
/// Returns the script path.
#[cfg(unix)]
pub fn write_fuser_stub(dir: &Path, exit_code: i32) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(format!("fuser-stub-{exit_code}.sh"));
    let log = dir.join(FUSER_LOG);
    let script = format!(
        "#!/bin/sh\necho \"$@\" >> '{}'\nexit {exit_code}\n",
        log.display()
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Argument lines recorded by every stub invocation so far.
pub fn fuser_calls(dir: &Path) -> Vec<String> {
    std::fs::read_to_string(dir.join(FUSER_LOG))
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
