//! Particle output and asynchronous subfile fusion.
//!
//! # Architecture
//!
//! - [`OutputWriter`] serializes one timestep of particle state through the
//!   best available [`OutputFormat`], optionally partitioned into one
//!   subfile per node, and reports the subfiles it created in a
//!   [`SubfileManifest`].
//! - [`FusionCoordinator`] elects node leaders, launches a background
//!   `tephra-fuse` process per manifest, and reaps every process it
//!   launched at shutdown.
//! - [`fuse`](fuse::fuse) is the merge itself, run by the `tephra-fuse`
//!   binary.
//!
//! # Format
//!
//! ```text
//! main:    [MAGIC "TPHR"] [VERSION u8] [kind u8] [step u64] [time f64]
//!          [particles u64] [subfiles u32] [data_offset u64] [pad] [records]
//! subfile: [MAGIC "TPSF"] [VERSION u8] [step u64] [time f64] [index u32]
//!          [count u32] [particles u64] [data_offset u64] [pad] [records]
//! record:  x y z vx vy vz j  (7 × f64, little-endian)
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
pub mod error;
pub mod fuse;
pub mod fusion;
pub mod manifest;
pub mod naming;
pub mod subfiling;
pub mod writer;

pub use config::{FusionTopology, OutputConfig};
pub use error::{FuseError, FusionError, OutputConfigError, OutputError};
pub use fusion::{ExitKind, FusionCoordinator, FusionFailure, JobId, ReapReport};
pub use manifest::SubfileManifest;
pub use naming::ArtifactName;
pub use writer::{OutputFormat, OutputWriter};

/// Magic bytes at the start of every main artifact.
pub const MAGIC: [u8; 4] = *b"TPHR";

/// Magic bytes at the start of every subfile.
pub const SUBFILE_MAGIC: [u8; 4] = *b"TPSF";

/// Current binary format version.
pub const FORMAT_VERSION: u8 = 1;
