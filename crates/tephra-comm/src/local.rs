//! In-process communicator: N ranks as N threads of one process.
//!
//! Each rank owns one unbounded crossbeam inbox. Collectives are built
//! from point-to-point sends tagged with `(context, sequence, source)`:
//! the context identifies the communicator, the sequence number the
//! collective call within it. A rank that races ahead to its next
//! collective may deliver a message before the receiver has finished the
//! previous one; such early arrivals are stashed until their call comes up.
//!
//! Node affinity is fixed at universe construction (`ranks_per_node`), so
//! [`split_shared`](Communicator::split_shared) needs no messages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use tephra_core::comm::Communicator;
use tephra_core::error::CommError;

/// How often a blocked receive re-checks the abort flag.
const ABORT_POLL: Duration = Duration::from_millis(10);

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001B3;

fn fnv1a_u64(mut hash: u64, v: u64) -> u64 {
    for &b in &v.to_le_bytes() {
        hash = (hash ^ b as u64).wrapping_mul(FNV_PRIME);
    }
    hash
}

// ── Envelope / Mailbox ──────────────────────────────────────────

struct Envelope {
    context: u64,
    seq: u64,
    /// World rank of the sender.
    source: usize,
    payload: Vec<u8>,
}

struct Mailbox {
    inbox: Receiver<Envelope>,
    stash: Vec<Envelope>,
}

// ── LocalUniverse ───────────────────────────────────────────────

/// A fixed set of ranks sharing one process, grouped into nodes.
///
/// # Example
///
/// ```
/// use tephra_comm::LocalUniverse;
/// use tephra_core::{Communicator, ReduceOp};
///
/// let sums = LocalUniverse::new(4).run(|comm| {
///     comm.all_reduce_f64(comm.rank() as f64, ReduceOp::Sum).unwrap()
/// });
/// assert_eq!(sums, vec![6.0; 4]);
/// ```
#[derive(Clone, Debug)]
pub struct LocalUniverse {
    size: usize,
    ranks_per_node: usize,
}

impl LocalUniverse {
    /// A universe of `size` ranks on a single node. `size` is clamped to 1.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            ranks_per_node: size,
        }
    }

    /// Group consecutive ranks into nodes of `ranks_per_node` (clamped to 1).
    pub fn with_ranks_per_node(mut self, ranks_per_node: usize) -> Self {
        self.ranks_per_node = ranks_per_node.max(1);
        self
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of shared-memory nodes.
    pub fn node_count(&self) -> usize {
        self.size.div_ceil(self.ranks_per_node)
    }

    /// Build one world communicator per rank, indexed by rank.
    pub fn communicators(&self) -> Vec<LocalComm> {
        let (senders, receivers): (Vec<Sender<Envelope>>, Vec<Receiver<Envelope>>) =
            (0..self.size).map(|_| crossbeam_channel::unbounded()).unzip();
        let outboxes: Arc<[Sender<Envelope>]> = senders.into();
        let node_of: Arc<[usize]> = (0..self.size).map(|r| r / self.ranks_per_node).collect();
        let members: Arc<[usize]> = (0..self.size).collect();
        let aborted = Arc::new(AtomicBool::new(false));

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalComm {
                context: FNV_OFFSET,
                rank,
                members: Arc::clone(&members),
                node_of: Arc::clone(&node_of),
                outboxes: Arc::clone(&outboxes),
                mailbox: Arc::new(Mutex::new(Mailbox {
                    inbox,
                    stash: Vec::new(),
                })),
                aborted: Arc::clone(&aborted),
                seq: 0.into(),
                splits: 0.into(),
            })
            .collect()
    }

    /// Run `f` once per rank on its own thread and collect results by rank.
    ///
    /// If any rank panics (including through [`Communicator::abort`]),
    /// ranks blocked in collectives are released with
    /// [`CommError::Aborted`] and the first panic is re-raised here.
    pub fn run<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(LocalComm) -> R + Sync,
        R: Send,
    {
        let comms = self.communicators();
        std::thread::scope(|scope| {
            let f = &f;
            let handles: Vec<_> = comms
                .into_iter()
                .map(|comm| {
                    let guard = AbortOnPanic(Arc::clone(&comm.aborted));
                    scope.spawn(move || {
                        let result = f(comm);
                        drop(guard);
                        result
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(r) => r,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

/// Raises the universe abort flag if dropped during a panic.
struct AbortOnPanic(Arc<AtomicBool>);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(true, Ordering::SeqCst);
        }
    }
}

// ── LocalComm ───────────────────────────────────────────────────

/// One rank's endpoint of a [`LocalUniverse`] communicator.
///
/// `Send` so it can be moved into the rank's thread, but not `Sync`: a
/// communicator belongs to exactly one control thread.
pub struct LocalComm {
    context: u64,
    /// Rank within this communicator.
    rank: usize,
    /// World rank of each member, indexed by communicator rank.
    members: Arc<[usize]>,
    /// Node id of each world rank.
    node_of: Arc<[usize]>,
    /// Inbox sender of each world rank.
    outboxes: Arc<[Sender<Envelope>]>,
    mailbox: Arc<Mutex<Mailbox>>,
    aborted: Arc<AtomicBool>,
    seq: std::cell::Cell<u64>,
    splits: std::cell::Cell<u64>,
}

impl LocalComm {
    /// World rank of this endpoint.
    pub fn world_rank(&self) -> usize {
        self.members[self.rank]
    }

    fn next_seq(&self) -> u64 {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        seq
    }

    fn check_rank(&self, rank: usize) -> Result<(), CommError> {
        if rank < self.members.len() {
            Ok(())
        } else {
            Err(CommError::InvalidRank {
                rank,
                size: self.members.len(),
            })
        }
    }

    fn send(&self, dest: usize, seq: u64, payload: Vec<u8>) -> Result<(), CommError> {
        let envelope = Envelope {
            context: self.context,
            seq,
            source: self.world_rank(),
            payload,
        };
        self.outboxes[self.members[dest]]
            .send(envelope)
            .map_err(|_| CommError::Disconnected { rank: dest })
    }

    fn recv(&self, source: usize, seq: u64) -> Result<Vec<u8>, CommError> {
        let source_world = self.members[source];
        let matches =
            |e: &Envelope| e.context == self.context && e.seq == seq && e.source == source_world;

        let mut mailbox = self.mailbox.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = mailbox.stash.iter().position(matches) {
            return Ok(mailbox.stash.swap_remove(pos).payload);
        }
        loop {
            match mailbox.inbox.recv_timeout(ABORT_POLL) {
                Ok(envelope) if matches(&envelope) => return Ok(envelope.payload),
                Ok(envelope) => mailbox.stash.push(envelope),
                Err(RecvTimeoutError::Timeout) => {
                    if self.aborted.load(Ordering::SeqCst) {
                        return Err(CommError::Aborted);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CommError::Disconnected { rank: source })
                }
            }
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.gather_bytes(&[], 0)?;
        self.broadcast_bytes(&[], 0)?;
        Ok(())
    }

    fn gather_bytes(&self, bytes: &[u8], root: usize) -> Result<Option<Vec<Vec<u8>>>, CommError> {
        self.check_rank(root)?;
        let seq = self.next_seq();
        if self.rank != root {
            self.send(root, seq, bytes.to_vec())?;
            return Ok(None);
        }
        (0..self.size())
            .map(|src| {
                if src == root {
                    Ok(bytes.to_vec())
                } else {
                    self.recv(src, seq)
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    fn broadcast_bytes(&self, bytes: &[u8], root: usize) -> Result<Vec<u8>, CommError> {
        self.check_rank(root)?;
        let seq = self.next_seq();
        if self.rank == root {
            for dest in (0..self.size()).filter(|&d| d != root) {
                self.send(dest, seq, bytes.to_vec())?;
            }
            Ok(bytes.to_vec())
        } else {
            self.recv(root, seq)
        }
    }

    fn split_shared(&self) -> Result<Box<dyn Communicator>, CommError> {
        let split = self.splits.get();
        self.splits.set(split + 1);

        let my_node = self.node_of[self.world_rank()];
        let members: Arc<[usize]> = self
            .members
            .iter()
            .copied()
            .filter(|&w| self.node_of[w] == my_node)
            .collect();
        let rank = members
            .iter()
            .position(|&w| w == self.world_rank())
            .ok_or_else(|| CommError::Malformed {
                detail: "rank missing from its own node group".to_string(),
            })?;
        let context = fnv1a_u64(fnv1a_u64(fnv1a_u64(self.context, split), my_node as u64), 1);

        tracing::trace!(
            world_rank = self.world_rank(),
            node = my_node,
            node_rank = rank,
            node_size = members.len(),
            "split shared communicator"
        );

        Ok(Box::new(LocalComm {
            context,
            rank,
            members,
            node_of: Arc::clone(&self.node_of),
            outboxes: Arc::clone(&self.outboxes),
            mailbox: Arc::clone(&self.mailbox),
            aborted: Arc::clone(&self.aborted),
            seq: 0.into(),
            splits: 0.into(),
        }))
    }

    fn abort(&self, code: i32) -> ! {
        self.aborted.store(true, Ordering::SeqCst);
        panic!("rank {} aborted the job with error code {code}", self.world_rank());
    }
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.members.len())
            .field("world_rank", &self.world_rank())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tephra_core::ReduceOp;

    #[test]
    fn ranks_and_sizes() {
        let ids = LocalUniverse::new(3).run(|comm| (comm.rank(), comm.size()));
        assert_eq!(ids, vec![(0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn gather_orders_by_rank() {
        let out = LocalUniverse::new(4).run(|comm| {
            comm.gather_bytes(&[comm.rank() as u8 * 10], 2).unwrap()
        });
        assert_eq!(out[2], Some(vec![vec![0], vec![10], vec![20], vec![30]]));
        assert!(out[0].is_none() && out[1].is_none() && out[3].is_none());
    }

    #[test]
    fn back_to_back_collectives_do_not_mix() {
        // Non-root ranks race ahead through many gathers; the root must
        // still match each payload to its own call.
        let out = LocalUniverse::new(4).run(|comm| {
            let mut seen = Vec::new();
            for round in 0..50u8 {
                if let Some(all) = comm.gather_bytes(&[round, comm.rank() as u8], 0).unwrap() {
                    seen.push(all);
                }
            }
            seen
        });
        for (round, all) in out[0].iter().enumerate() {
            for (rank, payload) in all.iter().enumerate() {
                assert_eq!(payload, &vec![round as u8, rank as u8]);
            }
        }
    }

    #[test]
    fn all_reduce_ops() {
        let out = LocalUniverse::new(5).run(|comm| {
            let x = comm.rank() as f64 + 1.0;
            (
                comm.all_reduce_f64(x, ReduceOp::Min).unwrap(),
                comm.all_reduce_f64(x, ReduceOp::Max).unwrap(),
                comm.all_reduce_f64(x, ReduceOp::Sum).unwrap(),
            )
        });
        assert!(out.iter().all(|&r| r == (1.0, 5.0, 15.0)));
    }

    #[test]
    fn split_shared_groups_by_node() {
        let out = LocalUniverse::new(6).with_ranks_per_node(4).run(|comm| {
            let node = comm.split_shared().unwrap();
            let sum = node.all_reduce_f64(comm.rank() as f64, ReduceOp::Sum).unwrap();
            (node.rank(), node.size(), sum)
        });
        assert_eq!(out[0], (0, 4, 6.0));
        assert_eq!(out[3], (3, 4, 6.0));
        assert_eq!(out[4], (0, 2, 9.0));
        assert_eq!(out[5], (1, 2, 9.0));
    }

    #[test]
    fn node_and_world_collectives_interleave() {
        let out = LocalUniverse::new(4).with_ranks_per_node(2).run(|comm| {
            let node = comm.split_shared().unwrap();
            let a = node.all_reduce_f64(1.0, ReduceOp::Sum).unwrap();
            let b = comm.all_reduce_f64(1.0, ReduceOp::Sum).unwrap();
            let c = node.all_reduce_f64(2.0, ReduceOp::Sum).unwrap();
            (a, b, c)
        });
        assert!(out.iter().all(|&r| r == (2.0, 4.0, 4.0)));
    }

    #[test]
    fn invalid_root_rejected() {
        let out = LocalUniverse::new(2).run(|comm| comm.gather_bytes(&[], 7));
        assert!(out
            .iter()
            .all(|r| r == &Err(CommError::InvalidRank { rank: 7, size: 2 })));
    }

    #[test]
    fn abort_tears_down_every_rank() {
        let result = std::panic::catch_unwind(|| {
            LocalUniverse::new(3).run(|comm| {
                if comm.rank() == 1 {
                    comm.abort(3);
                }
                // Ranks 0 and 2 block until the abort flag releases them.
                comm.barrier()
            })
        });
        assert!(result.is_err());
    }

    #[test]
    fn node_count_rounds_up() {
        assert_eq!(LocalUniverse::new(8).with_ranks_per_node(4).node_count(), 2);
        assert_eq!(LocalUniverse::new(9).with_ranks_per_node(4).node_count(), 3);
        assert_eq!(LocalUniverse::new(3).node_count(), 1);
    }
}
