//! Compute backend selection.
//!
//! The physics kernels live in the external integrator, which may be
//! built with any subset of the execution backends. [`ComputeBackend`]
//! is the closed set the solver knows about; each variant carries a
//! static availability flag fixed at compile time by cargo features.

use std::fmt;
use std::str::FromStr;

use crate::error::BackendError;

/// Execution backend for particle and grid kernels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComputeBackend {
    /// Sequential host execution. Always available.
    Serial,
    /// Multi-threaded host execution (`host-parallel` feature).
    HostParallel,
    /// CUDA accelerator execution (`cuda` feature).
    Cuda,
    /// HIP accelerator execution (`hip` feature).
    Hip,
}

impl ComputeBackend {
    /// All variants, in preference order for diagnostics.
    pub const ALL: [ComputeBackend; 4] = [Self::Serial, Self::HostParallel, Self::Cuda, Self::Hip];

    /// Whether this backend was enabled when the crate was compiled.
    pub const fn is_available(self) -> bool {
        match self {
            Self::Serial => true,
            Self::HostParallel => cfg!(feature = "host-parallel"),
            Self::Cuda => cfg!(feature = "cuda"),
            Self::Hip => cfg!(feature = "hip"),
        }
    }

    /// Return `self` if it is available in this build.
    pub fn ensure_available(self) -> Result<Self, BackendError> {
        if self.is_available() {
            Ok(self)
        } else {
            Err(BackendError::Unavailable { backend: self })
        }
    }

    /// Resolve a configuration string to an available backend.
    ///
    /// Unknown names and backends disabled at build time are both
    /// errors; there is no silent fallback to [`Serial`](Self::Serial).
    pub fn select(name: &str) -> Result<Self, BackendError> {
        name.parse::<Self>()?.ensure_available()
    }

    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::HostParallel => "openmp",
            Self::Cuda => "cuda",
            Self::Hip => "hip",
        }
    }
}

impl FromStr for ComputeBackend {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let candidates: [(&str, Self); 5] = [
            ("serial", Self::Serial),
            ("openmp", Self::HostParallel),
            ("host-parallel", Self::HostParallel),
            ("cuda", Self::Cuda),
            ("hip", Self::Hip),
        ];
        candidates
            .iter()
            .find(|(name, _)| s.eq_ignore_ascii_case(name))
            .map(|&(_, backend)| backend)
            .ok_or_else(|| BackendError::Unknown {
                name: s.to_string(),
            })
    }
}

impl fmt::Display for ComputeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_any_case() {
        for s in ["serial", "Serial", "SERIAL"] {
            assert_eq!(s.parse::<ComputeBackend>(), Ok(ComputeBackend::Serial));
        }
        for s in ["openmp", "OpenMP", "OPENMP", "host-parallel"] {
            assert_eq!(s.parse::<ComputeBackend>(), Ok(ComputeBackend::HostParallel));
        }
        assert_eq!("Cuda".parse::<ComputeBackend>(), Ok(ComputeBackend::Cuda));
        assert_eq!("HIP".parse::<ComputeBackend>(), Ok(ComputeBackend::Hip));
    }

    #[test]
    fn unknown_name_is_descriptive() {
        let err = "vulkan".parse::<ComputeBackend>().unwrap_err();
        assert_eq!(
            err,
            BackendError::Unknown {
                name: "vulkan".into()
            }
        );
        assert!(err.to_string().contains("vulkan"));
    }

    #[test]
    fn serial_always_selectable() {
        assert_eq!(ComputeBackend::select("serial"), Ok(ComputeBackend::Serial));
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn disabled_backend_rejected_not_substituted() {
        assert_eq!(
            ComputeBackend::select("cuda"),
            Err(BackendError::Unavailable {
                backend: ComputeBackend::Cuda
            })
        );
    }

    #[test]
    fn display_round_trips_through_parse() {
        for backend in ComputeBackend::ALL {
            assert_eq!(backend.to_string().parse::<ComputeBackend>(), Ok(backend));
        }
    }
}
