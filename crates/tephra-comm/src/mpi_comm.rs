//! MPI-backed communicator (feature `mpi`).
//!
//! Thin adapter from the rsmpi collectives to
//! [`Communicator`](tephra_core::Communicator). Byte gathers go through
//! `gather_varcount`, preceded by a fixed-size gather of the lengths.

use ::mpi::datatype::PartitionMut;
use ::mpi::collective::SystemOperation;
use ::mpi::environment::Universe;
use ::mpi::topology::SimpleCommunicator;
use ::mpi::traits::{Communicator as _, CommunicatorCollectives as _, Root as _};
use ::mpi::Count;

use tephra_core::comm::{Communicator, ReduceOp};
use tephra_core::error::CommError;

/// A [`Communicator`] over an MPI communicator handle.
pub struct MpiComm {
    comm: SimpleCommunicator,
}

impl MpiComm {
    /// Wrap an existing MPI communicator.
    pub fn new(comm: SimpleCommunicator) -> Self {
        Self { comm }
    }

    /// The world communicator of an initialized MPI universe.
    pub fn world(universe: &Universe) -> Self {
        Self::new(universe.world())
    }

    fn root(&self, root: usize) -> Result<i32, CommError> {
        let size = self.comm.size() as usize;
        if root < size {
            Ok(root as i32)
        } else {
            Err(CommError::InvalidRank { rank: root, size })
        }
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.comm.barrier();
        Ok(())
    }

    fn gather_bytes(&self, bytes: &[u8], root: usize) -> Result<Option<Vec<Vec<u8>>>, CommError> {
        let root_process = self.comm.process_at_rank(self.root(root)?);
        let len = Count::try_from(bytes.len()).map_err(|_| CommError::Malformed {
            detail: format!("payload of {} bytes exceeds MPI count range", bytes.len()),
        })?;

        if self.rank() != root {
            root_process.gather_into(&len);
            root_process.gather_varcount_into(bytes);
            return Ok(None);
        }

        let mut counts = vec![0 as Count; self.size()];
        root_process.gather_into_root(&len, &mut counts[..]);
        let displs: Vec<Count> = counts
            .iter()
            .scan(0, |offset, &c| {
                let start = *offset;
                *offset += c;
                Some(start)
            })
            .collect();
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        let mut buf = vec![0u8; total];
        {
            let mut partition = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
            root_process.gather_varcount_into_root(bytes, &mut partition);
        }

        let mut out = Vec::with_capacity(counts.len());
        let mut rest = &buf[..];
        for &c in &counts {
            let (head, tail) = rest.split_at(c as usize);
            out.push(head.to_vec());
            rest = tail;
        }
        Ok(Some(out))
    }

    fn broadcast_bytes(&self, bytes: &[u8], root: usize) -> Result<Vec<u8>, CommError> {
        let root_process = self.comm.process_at_rank(self.root(root)?);
        let mut len = bytes.len() as u64;
        root_process.broadcast_into(&mut len);
        let mut buf = if self.rank() == root {
            bytes.to_vec()
        } else {
            vec![0u8; len as usize]
        };
        root_process.broadcast_into(&mut buf[..]);
        Ok(buf)
    }

    fn all_reduce_f64(&self, value: f64, op: ReduceOp) -> Result<f64, CommError> {
        let mut out = 0.0f64;
        let op = match op {
            ReduceOp::Min => SystemOperation::min(),
            ReduceOp::Max => SystemOperation::max(),
            ReduceOp::Sum => SystemOperation::sum(),
        };
        self.comm.all_reduce_into(&value, &mut out, op);
        Ok(out)
    }

    fn split_shared(&self) -> Result<Box<dyn Communicator>, CommError> {
        Ok(Box::new(MpiComm::new(self.comm.split_shared(0))))
    }

    fn abort(&self, code: i32) -> ! {
        self.comm.abort(code)
    }
}
