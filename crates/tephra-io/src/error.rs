//! Error types for particle output, fusion, and the fuse utility.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

use tephra_core::CommError;

/// Errors from building an [`OutputConfig`](crate::OutputConfig).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputConfigError {
    /// The stripe size switch is not a positive integer.
    InvalidStripeSize {
        /// The value as read.
        value: String,
    },
    /// The artifact base name is empty or contains a path separator.
    InvalidBaseName {
        /// The rejected name.
        name: String,
    },
}

impl fmt::Display for OutputConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidStripeSize { value } => {
                write!(f, "stripe size must be a positive integer, got '{value}'")
            }
            Self::InvalidBaseName { name } => {
                write!(f, "invalid artifact base name '{name}'")
            }
        }
    }
}

impl Error for OutputConfigError {}

/// Errors from writing or decoding particle artifacts.
#[derive(Debug)]
pub enum OutputError {
    /// Filesystem I/O failed.
    Io(io::Error),
    /// A collective call during the write failed.
    Comm(CommError),
    /// The data does not start with the expected magic bytes.
    InvalidMagic,
    /// The format version is not supported by this build.
    UnsupportedVersion {
        /// The version found in the data.
        found: u8,
    },
    /// An artifact or payload could not be decoded.
    Malformed {
        /// Description of what went wrong.
        detail: String,
    },
    /// Another participant failed its part of a collective write.
    PeerFailed,
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Comm(e) => write!(f, "communication: {e}"),
            Self::InvalidMagic => write!(f, "invalid magic bytes"),
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported format version {found}")
            }
            Self::Malformed { detail } => write!(f, "malformed artifact: {detail}"),
            Self::PeerFailed => write!(f, "another participant failed the collective write"),
        }
    }
}

impl Error for OutputError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Comm(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OutputError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CommError> for OutputError {
    fn from(e: CommError) -> Self {
        Self::Comm(e)
    }
}

/// Errors from the fusion coordinator.
///
/// Launch failures and non-zero fuser exits are not errors here; they are
/// reported as [`FusionFailure`](crate::FusionFailure)s at reap time so
/// that every participant stays in collective lockstep.
#[derive(Debug)]
pub enum FusionError {
    /// A collective call (election or manifest gather) failed.
    Comm(CommError),
    /// A gathered manifest could not be decoded.
    Manifest {
        /// Description of the decoding failure.
        detail: String,
    },
    /// The outstanding-job counter disagrees with the jobs reaped.
    CounterMismatch {
        /// Counter value before the reap.
        outstanding: usize,
        /// Exit statuses actually checked.
        reaped: usize,
    },
}

impl fmt::Display for FusionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comm(e) => write!(f, "communication: {e}"),
            Self::Manifest { detail } => write!(f, "malformed subfile manifest: {detail}"),
            Self::CounterMismatch {
                outstanding,
                reaped,
            } => write!(
                f,
                "fusion job counter mismatch: {outstanding} outstanding, {reaped} reaped"
            ),
        }
    }
}

impl Error for FusionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Comm(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CommError> for FusionError {
    fn from(e: CommError) -> Self {
        Self::Comm(e)
    }
}

/// Errors from the fuse utility.
#[derive(Debug)]
pub enum FuseError {
    /// Reading or writing a file failed.
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        source: io::Error,
    },
    /// The subfiling config file is missing a key or has a bad value.
    Config {
        /// The config file.
        path: PathBuf,
        /// Description of the problem.
        detail: String,
    },
    /// A subfile could not be decoded.
    Subfile {
        /// The subfile.
        path: PathBuf,
        /// The decoding error.
        source: OutputError,
    },
    /// A requested subfile is not listed in the config file.
    UnknownSubfile {
        /// The unlisted name.
        name: String,
    },
    /// The subfiles disagree on step or node count.
    Inconsistent {
        /// Description of the disagreement.
        detail: String,
    },
    /// There is nothing to fuse.
    NoSubfiles,
}

impl fmt::Display for FuseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Config { path, detail } => {
                write!(f, "subfiling config {}: {detail}", path.display())
            }
            Self::Subfile { path, source } => write!(f, "subfile {}: {source}", path.display()),
            Self::UnknownSubfile { name } => {
                write!(f, "subfile '{name}' is not listed in the config file")
            }
            Self::Inconsistent { detail } => write!(f, "inconsistent subfiles: {detail}"),
            Self::NoSubfiles => write!(f, "no subfiles to fuse"),
        }
    }
}

impl Error for FuseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Subfile { source, .. } => Some(source),
            _ => None,
        }
    }
}

