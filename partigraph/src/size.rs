//! Counting live nodes without walking the global chain.
//!
//! Each worker of each host counts the partitions of the container that live
//! in its own arena and adds the count into one shared accumulator. The pass
//! runs outside any conflict tracking, so it must not be started from a
//! worker thread: doing so is a caller error and is asserted against.

use tracing::debug;

use crate::error::Result;
use crate::graph::Graph;
use crate::partition::LocalIter;
use crate::wire::{DeserializeBuffer, Serializable, SerializeBuffer};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeAccumulator {
    i: u64,
}

impl SizeAccumulator {
    pub fn add(&mut self, v: u64) {
        self.i += v;
    }

    pub fn get(&self) -> u64 {
        self.i
    }

    pub fn reset(&mut self) {
        self.i = 0;
    }
}

impl Serializable for SizeAccumulator {
    fn serialize(&self, s: &mut SerializeBuffer) {
        s.push(&self.i);
    }

    fn deserialize(s: &mut DeserializeBuffer) -> Result<Self> {
        Ok(Self { i: s.pull()? })
    }
}

/// Total number of active nodes in `graph` across every host its chain
/// reaches. Agrees with [`Graph::size`] on a quiescent container, whether or
/// not the replicas on other hosts are still alive.
///
/// Each `Graph` instance owns one accumulator, reset at the start of every
/// reduction; concurrent calls on the same instance take turns.
pub fn graph_size<N, E>(graph: &Graph<N, E>) -> u64
where
    N: Send + 'static,
    E: Clone + Send + 'static,
{
    let cluster = graph.cluster();
    assert!(
        cluster.hosts().iter().all(|host| !host.in_worker()),
        "graph_size called from inside a parallel loop"
    );

    let _reduction = graph.reduction.lock();
    let accumulator = graph.accumulator;
    accumulator.transient_acquire(cluster).reset();
    let chain = graph.partition_chain();

    cluster.on_each(|host, worker| {
        let local: usize = chain
            .iter()
            .filter(|partition| {
                partition
                    .addr()
                    .map_or(false, |a| a.host == host.id() && a.worker as usize == worker)
            })
            .map(|&partition| LocalIter::new(cluster, partition).count())
            .sum();
        accumulator.transient_acquire(cluster).add(local as u64);
    });

    let total = accumulator.transient_acquire(cluster).get();
    debug!(
        host = graph.host().id(),
        partitions = chain.len(),
        total,
        "graph size reduced"
    );
    total
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::graph::GraphConfig;
    use crate::runtime::{Cluster, HostConfig};

    #[test]
    fn accumulator_adds_and_encodes_its_count() {
        let mut r = SizeAccumulator::default();
        r.add(3);
        r.add(4);
        assert_eq!(r.get(), 7);
        let mut s = SerializeBuffer::new();
        s.push(&r);
        assert_eq!(s.len(), 8);
        assert_eq!(DeserializeBuffer::from(s).pull::<SizeAccumulator>().unwrap(), r);
    }

    #[test]
    fn counts_every_worker_partition() {
        let cluster = Cluster::new();
        let host = cluster.add_host(&HostConfig::with_workers(3)).unwrap();
        let graph: Arc<Graph<usize, ()>> = Graph::new(cluster, Arc::clone(&host), GraphConfig::default());
        host.on_each(|worker| {
            for i in 0..=worker {
                let n = graph.create_node(i);
                graph.add_node(n);
            }
            graph.create_node(99);
        });
        assert_eq!(graph_size(&graph), 6);
        assert_eq!(graph.size(), 6);
    }

    #[test]
    #[should_panic]
    fn refuses_to_run_inside_a_worker() {
        let cluster = Cluster::new();
        let host = cluster.add_host(&HostConfig::with_workers(1)).unwrap();
        let graph: Arc<Graph<(), ()>> = Graph::new(cluster, Arc::clone(&host), GraphConfig::default());
        host.install(|| graph_size(&graph));
    }

    #[test]
    fn repeated_reductions_reuse_one_accumulator() {
        let cluster = Cluster::new();
        let host = cluster.add_host(&HostConfig::with_workers(2)).unwrap();
        let graph: Arc<Graph<u32, ()>> = Graph::new(cluster, Arc::clone(&host), GraphConfig::default());
        let n = graph.create_node(0);
        graph.add_node(n);

        assert_eq!(graph_size(&graph), 1);
        let allocated = host.directory().len();
        for _ in 0..5 {
            assert_eq!(graph_size(&graph), 1);
        }
        assert_eq!(host.directory().len(), allocated);
    }

    #[test]
    fn counts_partitions_of_dropped_replicas() {
        let cluster = Cluster::new();
        let a = cluster.add_host(&HostConfig::with_workers(1)).unwrap();
        let b = cluster.add_host(&HostConfig::with_workers(2)).unwrap();
        let origin: Arc<Graph<u32, ()>> =
            Graph::new(Arc::clone(&cluster), a, GraphConfig::default());
        let n = origin.create_node(0);
        origin.add_node(n);

        let mut s = SerializeBuffer::new();
        origin.serialize(&mut s);
        let replica = Graph::<u32, ()>::deserialize(
            Arc::clone(&cluster),
            Arc::clone(&b),
            GraphConfig::default(),
            &mut DeserializeBuffer::from(s),
        )
        .unwrap();
        b.on_each(|_| {
            let n = replica.create_node(1);
            replica.add_node(n);
        });
        drop(replica);
        assert_eq!(b.num_persistent(), 0);

        assert_eq!(origin.size(), 3);
        assert_eq!(graph_size(&origin), 3);
    }
}
