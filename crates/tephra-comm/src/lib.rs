//! Collective communication, node-leader election, and timer statistics.
//!
//! - [`LocalUniverse`] runs N ranks as scoped threads of one process and
//!   hands each a [`LocalComm`] implementing
//!   [`Communicator`](tephra_core::Communicator) over crossbeam channels.
//! - `MpiComm` (feature `mpi`) implements the same trait over MPI.
//! - [`NodeTopology::elect`] splits a communicator by shared-memory node
//!   and picks one leader per node.
//! - [`StatsAggregator`] reduces per-rank timings to min/max/mean/std.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod local;
#[cfg(feature = "mpi")]
pub mod mpi_comm;
pub mod participant;
pub mod stats;

pub use local::{LocalComm, LocalUniverse};
#[cfg(feature = "mpi")]
pub use mpi_comm::MpiComm;
pub use participant::{DomainParticipant, NodeTopology};
pub use stats::{StatsAggregator, TimerStats};
