//! Integration test: node-leader election across a multi-node universe.
//!
//! Eight ranks packed four per node must produce exactly two leaders,
//! one per node, and every rank must agree on its node's group id.

use tephra_comm::{LocalUniverse, NodeTopology, StatsAggregator};
use tephra_core::{Communicator, ReduceOp};

#[test]
fn eight_ranks_two_nodes_two_leaders() {
    let universe = LocalUniverse::new(8).with_ranks_per_node(4);
    let participants =
        universe.run(|comm| *NodeTopology::elect(&comm).unwrap().participant());

    let leaders: Vec<_> = participants.iter().filter(|p| p.node_leader).collect();
    assert_eq!(leaders.len(), 2);
    assert_eq!(leaders[0].global_rank, 0);
    assert_eq!(leaders[1].global_rank, 4);

    for p in &participants {
        assert_eq!(p.node_count, 2);
        assert_eq!(p.node_size, 4);
        assert_eq!(p.node_group_id, p.global_rank / 4);
        assert_eq!(p.node_rank, p.global_rank % 4);
    }
}

#[test]
fn leaders_can_reduce_over_their_node() {
    let universe = LocalUniverse::new(8).with_ranks_per_node(4);
    let sums = universe.run(|comm| {
        let topo = NodeTopology::elect(&comm).unwrap();
        let node_sum = topo
            .node_comm()
            .all_reduce_f64(comm.rank() as f64, ReduceOp::Sum)
            .unwrap();
        (topo.participant().node_leader, node_sum)
    });
    assert_eq!(sums[0], (true, 6.0));
    assert_eq!(sums[4], (true, 22.0));
    assert_eq!(sums[7], (false, 22.0));
}

#[test]
fn election_then_stats_share_the_world_communicator() {
    let universe = LocalUniverse::new(4).with_ranks_per_node(2);
    let out = universe.run(|comm| {
        let _topo = NodeTopology::elect(&comm).unwrap();
        let mut stats = StatsAggregator::new(0);
        stats.record(&comm, comm.rank() as f64).unwrap();
        stats.latest().copied()
    });
    let s = out[0].unwrap();
    assert_eq!((s.min, s.max, s.mean), (0.0, 3.0, 1.5));
}
