//! Node-leader election.
//!
//! A job's ranks are grouped by shared-memory node. Exactly one rank per
//! node, the one with node-local rank zero, is the node leader and does
//! host-local coordination (subfile writing, fusion) for its node.

use tephra_core::comm::{decode_u64, Communicator};
use tephra_core::error::CommError;

/// Where one rank sits in the job's node topology.
///
/// Derived once by [`NodeTopology::elect`] and immutable afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DomainParticipant {
    /// Rank in the world communicator.
    pub global_rank: usize,
    /// Whether this rank leads its node.
    pub node_leader: bool,
    /// Index of this rank's node among all nodes, ordered by leader rank.
    pub node_group_id: usize,
    /// Rank within the node.
    pub node_rank: usize,
    /// Number of ranks on the node.
    pub node_size: usize,
    /// Number of nodes in the job.
    pub node_count: usize,
}

/// A rank's [`DomainParticipant`] plus its node-local communicator.
pub struct NodeTopology {
    participant: DomainParticipant,
    node_comm: Box<dyn Communicator>,
}

impl NodeTopology {
    /// Split `world` by shared-memory node and elect one leader per node.
    ///
    /// Collective over `world`.
    pub fn elect(world: &dyn Communicator) -> Result<Self, CommError> {
        let node_comm = world.split_shared()?;
        let node_leader = node_comm.rank() == 0;

        let flags = world.all_gather_bytes(&[u8::from(node_leader)])?;
        let leaders: Vec<usize> = flags
            .iter()
            .enumerate()
            .filter(|(_, flag)| flag.first() == Some(&1))
            .map(|(rank, _)| rank)
            .collect();

        let my_rank = (world.rank() as u64).to_le_bytes();
        let leader_rank = decode_u64(&node_comm.broadcast_bytes(&my_rank, 0)?)? as usize;
        let node_group_id = leaders
            .iter()
            .position(|&r| r == leader_rank)
            .ok_or_else(|| CommError::Malformed {
                detail: format!("node leader {leader_rank} missing from leader set"),
            })?;

        let participant = DomainParticipant {
            global_rank: world.rank(),
            node_leader,
            node_group_id,
            node_rank: node_comm.rank(),
            node_size: node_comm.size(),
            node_count: leaders.len(),
        };
        tracing::debug!(?participant, "node topology elected");

        Ok(Self {
            participant,
            node_comm,
        })
    }

    /// This rank's placement.
    pub fn participant(&self) -> &DomainParticipant {
        &self.participant
    }

    /// Communicator over the ranks of this node.
    pub fn node_comm(&self) -> &dyn Communicator {
        &*self.node_comm
    }
}

impl std::fmt::Debug for NodeTopology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTopology")
            .field("participant", &self.participant)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalUniverse;

    #[test]
    fn single_node_has_one_leader() {
        let out = LocalUniverse::new(3).run(|comm| *NodeTopology::elect(&comm).unwrap().participant());
        assert!(out[0].node_leader);
        assert!(!out[1].node_leader && !out[2].node_leader);
        assert!(out.iter().all(|p| p.node_count == 1 && p.node_group_id == 0));
        assert_eq!(out[2].node_rank, 2);
        assert_eq!(out[2].node_size, 3);
    }

    #[test]
    fn uneven_nodes() {
        let out = LocalUniverse::new(5)
            .with_ranks_per_node(2)
            .run(|comm| *NodeTopology::elect(&comm).unwrap().participant());
        let leaders: Vec<usize> = out
            .iter()
            .filter(|p| p.node_leader)
            .map(|p| p.global_rank)
            .collect();
        assert_eq!(leaders, vec![0, 2, 4]);
        let groups: Vec<usize> = out.iter().map(|p| p.node_group_id).collect();
        assert_eq!(groups, vec![0, 0, 1, 1, 2]);
        assert!(out.iter().all(|p| p.node_count == 3));
        assert_eq!(out[4].node_size, 1);
    }
}
