//! The partitioned graph container.
//!
//! A `Graph` owns one partition per worker of its host. Nodes are prepended
//! to the partition of the worker that creates them and are never freed:
//! removal only clears the active bit and drops the node's edges. The wire
//! form of a container is a single handle, its master partition; receiving
//! it on another host splices that host's partitions into the chain right
//! after the master.

use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::directory::Addr;
use crate::error::{GraphError, Result};
use crate::gptr::Gptr;
use crate::node::{Edge, GraphNode, NodeGuard, NodeHandle};
use crate::partition::{self, LocalIter, NodeIter, PartitionHandle, PartitionState};
use crate::runtime::{Cluster, Host};
use crate::size::SizeAccumulator;
use crate::wire::{DeserializeBuffer, SerializeBuffer};
use crate::SummaryStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeDirection {
    /// Edges are stored on their source only.
    Out,
    /// Every edge is stored on both endpoints.
    Un,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    pub direction: EdgeDirection,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            direction: EdgeDirection::Out,
        }
    }
}

pub struct Graph<N, E> {
    cluster: Arc<Cluster>,
    host: Arc<Host>,
    config: GraphConfig,
    /// One slot per worker, indexed by worker id.
    partitions: Vec<PartitionHandle<N, E>>,
    /// Reused by every size reduction started from this instance.
    pub(crate) accumulator: Gptr<Mutex<SizeAccumulator>>,
    /// Held for the duration of a size reduction.
    pub(crate) reduction: Mutex<()>,
}

impl<N: Send + 'static, E: Clone + Send + 'static> Graph<N, E> {
    /// Builds an empty container on `host`, to be called from outside the
    /// host's workers. The partition of worker 0 is the master.
    pub fn new(cluster: Arc<Cluster>, host: Arc<Host>, config: GraphConfig) -> Arc<Self> {
        let graph = Arc::new(Self::allocate(cluster, host, config));
        let master = graph.partitions[0];
        for partition in &graph.partitions {
            partition.transient_acquire(&graph.cluster).master = master;
        }
        graph.host.register_persistent(graph.master_addr(), &graph);
        debug!(
            host = graph.host.id(),
            partitions = graph.partitions.len(),
            "graph created"
        );
        graph
    }

    /// Allocates one partition per worker, in that worker's arena, and chains
    /// them in worker order. Masters are left null.
    fn allocate(cluster: Arc<Cluster>, host: Arc<Host>, config: GraphConfig) -> Self {
        let partitions: Vec<PartitionHandle<N, E>> = (0..host.num_workers())
            .map(|worker| {
                let state = Arc::new(Mutex::new(PartitionState::<N, E>::new()));
                Gptr::from_addr(host.directory().insert(worker, state))
            })
            .collect();
        for window in partitions.windows(2) {
            window[0].transient_acquire(&cluster).next = window[1];
        }
        let accumulator = Gptr::from_addr(host.directory().insert(
            host.worker_id(),
            Arc::new(Mutex::new(SizeAccumulator::default())),
        ));
        Self {
            cluster,
            host,
            config,
            partitions,
            accumulator,
            reduction: Mutex::new(()),
        }
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    fn local_partition(&self) -> PartitionHandle<N, E> {
        self.partitions[self.host.worker_id()]
    }

    /// The master partition as seen by the calling worker.
    pub fn master(&self) -> PartitionHandle<N, E> {
        self.local_partition().transient_acquire(&self.cluster).master
    }

    pub(crate) fn master_addr(&self) -> Addr {
        self.master()
            .addr()
            .unwrap_or_else(|| panic!("graph on host {} has no master", self.host.id()))
    }

    /// Allocates an inactive node at the head of the calling worker's
    /// partition. Only that partition is locked.
    pub fn create_node(&self, data: N) -> NodeHandle<N, E> {
        let worker = self.host.worker_id();
        let mut partition = self.partitions[worker].transient_acquire(&self.cluster);
        let node = Arc::new(GraphNode::new(partition.head, data));
        let handle = Gptr::from_addr(self.host.directory().insert(worker, node));
        partition.head = handle;
        handle
    }

    pub fn create_default_node(&self) -> NodeHandle<N, E>
    where
        N: Default,
    {
        self.create_node(N::default())
    }

    fn node(&self, handle: NodeHandle<N, E>) -> Arc<GraphNode<N, E>> {
        assert!(!handle.is_null(), "null node handle");
        handle.resolve(&self.cluster)
    }

    /// Makes the node visible to iteration; a no-op if it already is.
    pub fn add_node(&self, handle: NodeHandle<N, E>) {
        self.node(handle).activate();
    }

    /// Hides the node and drops its edges; a no-op if already hidden. The
    /// caller may hold the node.
    pub fn remove_node(&self, handle: NodeHandle<N, E>) {
        self.node(handle).deactivate();
    }

    pub fn contains_node(&self, handle: NodeHandle<N, E>) -> bool {
        self.node(handle).is_active()
    }

    /// Blocks until the caller holds the node, then exposes its payload.
    pub fn get_data(&self, handle: NodeHandle<N, E>) -> NodeGuard<N, E> {
        self.node(handle).acquire()
    }

    pub fn acquire(&self, handle: NodeHandle<N, E>) -> NodeGuard<N, E> {
        self.node(handle).acquire()
    }

    /// Conflict-tracked acquisition for schedulers: `None` if the node is
    /// held elsewhere, in which case the caller backs off and retries.
    pub fn try_acquire(&self, handle: NodeHandle<N, E>) -> Option<NodeGuard<N, E>> {
        self.node(handle).try_acquire()
    }

    pub fn add_edge(&self, src: NodeHandle<N, E>, dst: NodeHandle<N, E>)
    where
        E: Default,
    {
        self.add_edge_with(src, dst, E::default())
    }

    /// Appends `src -> dst` without checking that `dst` is active; stale
    /// destinations are filtered out when edges are walked. Undirected
    /// graphs also append `dst -> src`. Schedulers acquire `src` first;
    /// holding either endpoint does not block the append.
    pub fn add_edge_with(&self, src: NodeHandle<N, E>, dst: NodeHandle<N, E>, value: E) {
        let src_node = self.node(src);
        let dst_node = self.node(dst);
        if self.config.direction == EdgeDirection::Un {
            dst_node.push_edge(Edge::new(src, value.clone()));
        }
        src_node.push_edge(Edge::new(dst, value));
    }

    /// Walks the node's edges, skipping those whose destination is inactive
    /// at the moment the step is taken. Works whether or not the caller
    /// holds the node.
    pub fn edges(&self, handle: NodeHandle<N, E>) -> EdgeIter<'_, N, E> {
        let edges = self.node(handle).snapshot_edges();
        EdgeIter {
            cluster: &self.cluster,
            edges: edges.into_iter(),
        }
    }

    /// The destination of an edge yielded by [`Graph::edges`]. Panics if the
    /// destination is no longer active.
    pub fn get_edge_dst(&self, edge: &Edge<N, E>) -> NodeHandle<N, E> {
        let dst = edge.dst();
        assert!(
            self.node(dst).is_active(),
            "edge destination {:?} is inactive",
            dst
        );
        dst
    }

    /// Every active node on the chain, starting at the master.
    pub fn begin(&self) -> NodeIter<'_, N, E> {
        NodeIter::new(&self.cluster, self.master())
    }

    pub fn end(&self) -> NodeIter<'_, N, E> {
        NodeIter::end(&self.cluster)
    }

    pub fn iter(&self) -> NodeIter<'_, N, E> {
        self.begin()
    }

    /// Active nodes of the calling worker's own partition.
    pub fn local_iter(&self) -> LocalIter<'_, N, E> {
        LocalIter::new(&self.cluster, self.local_partition())
    }

    /// Number of active nodes reachable from the master. Linear; meant for
    /// diagnostics.
    pub fn size(&self) -> usize {
        self.begin().count()
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition(&self, worker: usize) -> PartitionHandle<N, E> {
        self.partitions[worker]
    }

    pub fn partition_head(&self, worker: usize) -> NodeHandle<N, E> {
        self.partitions[worker].transient_acquire(&self.cluster).head
    }

    /// The partitions visited by global iteration, in order.
    pub fn partition_chain(&self) -> Vec<PartitionHandle<N, E>> {
        partition::chain(&self.cluster, self.master())
    }

    /// Node count and out-degree summary as one JSON object.
    pub fn stats(&self) -> serde_json::Value {
        let degrees: Vec<f64> = self
            .begin()
            .map(|node| self.edges(node).count() as f64)
            .collect();
        if degrees.is_empty() {
            return json!({ "nnodes": 0 });
        }
        json!({
            "nnodes": degrees.len(),
            "nedges": degrees.iter().sum::<f64>(),
            "out_degree": SummaryStats::from(degrees.into_iter()).to_map(),
        })
    }

    /// Writes the calling worker's view of the master partition.
    pub fn serialize(&self, s: &mut SerializeBuffer) {
        let partition = self.local_partition().transient_acquire(&self.cluster);
        s.push(&partition.master);
    }

    /// Reconstructs a container on `host` from a serialized master handle.
    ///
    /// The new partitions all point at the incoming master and are spliced
    /// in right after it: `master -> host's partitions -> old master.next`.
    /// The master stays locked from reading its `next` until rewriting it,
    /// so replications arriving from several hosts serialize on it. If
    /// `host` already holds a replica of this container, that replica is
    /// returned unchanged.
    pub fn deserialize(
        cluster: Arc<Cluster>,
        host: Arc<Host>,
        config: GraphConfig,
        s: &mut DeserializeBuffer,
    ) -> Result<Arc<Self>> {
        let master: PartitionHandle<N, E> = s.pull()?;
        let key = master
            .addr()
            .ok_or_else(|| GraphError::Parse("container with a null master".to_string()))?;
        if let Some(existing) = host.persistent::<Self>(key) {
            warn!(host = host.id(), master = %key, "container already replicated here");
            return Ok(existing);
        }

        let graph = Self::allocate(cluster, host, config);
        {
            let cluster = &graph.cluster;
            let me = graph.host.worker_id();
            let last = graph.partitions.len() - 1;

            let mut local = graph.partitions[me].transient_acquire(cluster);
            local.master = master;
            for (worker, partition) in graph.partitions.iter().enumerate() {
                if worker != me {
                    partition.transient_acquire(cluster).master = master;
                }
            }

            let mut remote = master.transient_acquire(cluster);
            if last == me {
                local.next = remote.next;
            } else {
                graph.partitions[last].transient_acquire(cluster).next = remote.next;
            }
            remote.next = graph.partitions[0];
        }

        let graph = Arc::new(graph);
        graph.host.register_persistent(key, &graph);
        info!(
            host = graph.host.id(),
            master = %key,
            partitions = graph.partitions.len(),
            "spliced replica into partition chain"
        );
        Ok(graph)
    }
}

impl<N, E> Graph<N, E>
where
    N: fmt::Debug + Send + 'static,
    E: fmt::Debug + Clone + Send + 'static,
{
    /// Human-readable dump of one node, including whether each edge's
    /// destination is still active. A payload held elsewhere, including by
    /// the caller, prints as `<held>`.
    pub fn dump(&self, handle: NodeHandle<N, E>) -> String {
        let node = self.node(handle);
        let edges = node.snapshot_edges();
        let data = match node.try_acquire() {
            Some(guard) => format!("{:?}", *guard),
            None => "<held>".to_string(),
        };
        let rendered = edges
            .iter()
            .map(|edge| {
                format!(
                    " <{{Edge: dst: {:?} dst active: {} val: {:?}}}>",
                    edge.dst(),
                    self.node(edge.dst()).is_active(),
                    edge.value()
                )
            })
            .join("");
        format!(
            "{:?} <{{GN: next: {:?} active: {} data: {} numedges: {}{}}}>",
            handle,
            node.next(),
            node.is_active(),
            data,
            edges.len(),
            rendered
        )
    }
}

/// Edges of one node whose destination is active, checked step by step.
pub struct EdgeIter<'a, N, E> {
    cluster: &'a Cluster,
    edges: std::vec::IntoIter<Edge<N, E>>,
}

impl<'a, N: Send + 'static, E: Send + 'static> Iterator for EdgeIter<'a, N, E> {
    type Item = Edge<N, E>;

    fn next(&mut self) -> Option<Self::Item> {
        let cluster = self.cluster;
        self.edges
            .find(|edge| edge.dst().resolve(cluster).is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::HostConfig;

    fn setup(workers: usize, direction: EdgeDirection) -> Arc<Graph<u32, u32>> {
        let cluster = Cluster::new();
        let host = cluster.add_host(&HostConfig::with_workers(workers)).unwrap();
        Graph::new(cluster, host, GraphConfig { direction })
    }

    #[test]
    fn fresh_graph_chains_workers_in_order() {
        let graph = setup(3, EdgeDirection::Out);
        let chain = graph.partition_chain();
        assert_eq!(chain, (0..3).map(|w| graph.partition(w)).collect::<Vec<_>>());
        for w in 0..3 {
            let state = graph.partition(w).transient_acquire(graph.cluster());
            assert_eq!(state.master(), graph.partition(0));
        }
        assert_eq!(graph.size(), 0);
        assert!(graph.begin() == graph.end());
    }

    #[test]
    fn created_nodes_are_invisible_until_added() {
        let graph = setup(1, EdgeDirection::Out);
        let n = graph.create_node(3);
        assert!(!graph.contains_node(n));
        assert_eq!(graph.size(), 0);
        graph.add_node(n);
        assert!(graph.contains_node(n));
        assert_eq!(graph.iter().collect::<Vec<_>>(), vec![n]);
        assert_eq!(*graph.get_data(n), 3);
    }

    #[test]
    fn undirected_edges_land_on_both_endpoints() {
        let graph = setup(1, EdgeDirection::Un);
        let a = graph.create_node(0);
        let b = graph.create_node(1);
        graph.add_node(a);
        graph.add_node(b);
        graph.add_edge_with(a, b, 7);
        let from_a: Vec<_> = graph.edges(a).map(|e| (graph.get_edge_dst(&e), *e.value())).collect();
        let from_b: Vec<_> = graph.edges(b).map(|e| (graph.get_edge_dst(&e), *e.value())).collect();
        assert_eq!(from_a, vec![(b, 7)]);
        assert_eq!(from_b, vec![(a, 7)]);
    }

    #[test]
    #[should_panic(expected = "inactive")]
    fn edge_dst_of_removed_node_is_fatal() {
        let graph = setup(1, EdgeDirection::Out);
        let a = graph.create_node(0);
        let b = graph.create_node(1);
        graph.add_node(a);
        graph.add_node(b);
        graph.add_edge(a, b);
        let edge = graph.edges(a).next().unwrap();
        graph.remove_node(b);
        graph.get_edge_dst(&edge);
    }

    #[test]
    #[should_panic(expected = "null node handle")]
    fn null_handles_are_fatal() {
        let graph = setup(1, EdgeDirection::Out);
        graph.get_data(Gptr::null());
    }

    #[test]
    fn try_acquire_reports_conflicts() {
        let graph = setup(1, EdgeDirection::Out);
        let n = graph.create_node(0);
        let held = graph.acquire(n);
        assert!(graph.try_acquire(n).is_none());
        drop(held);
        assert!(graph.try_acquire(n).is_some());
    }

    #[test]
    fn holder_adds_walks_and_removes_edges() {
        let graph = setup(1, EdgeDirection::Un);
        let a = graph.create_node(1);
        let b = graph.create_node(2);
        graph.add_node(a);
        graph.add_node(b);

        let mut held = graph.try_acquire(a).expect("nobody else holds a");
        graph.add_edge_with(a, b, 3);
        held.push_edge(Edge::new(a, 4));
        *held += 10;
        let walked: Vec<_> = graph.edges(a).map(|e| (graph.get_edge_dst(&e), *e.value())).collect();
        assert_eq!(walked, vec![(b, 3), (a, 4)]);
        assert!(graph.dump(a).contains("data: <held>"));

        graph.remove_node(a);
        assert_eq!(held.num_edges(), 0);
        assert_eq!(graph.edges(b).count(), 0);
        drop(held);
        assert_eq!(*graph.get_data(a), 11);
    }

    #[test]
    fn dump_shows_destination_activity() {
        let graph = setup(1, EdgeDirection::Out);
        let a = graph.create_node(10);
        let b = graph.create_node(20);
        graph.add_node(a);
        graph.add_edge_with(a, b, 5);
        let dump = graph.dump(a);
        assert!(dump.contains("data: 10"));
        assert!(dump.contains("dst active: false"));
        assert!(dump.contains("val: 5"));
    }

    #[test]
    fn stats_summarize_out_degree() {
        let graph = setup(2, EdgeDirection::Out);
        assert_eq!(graph.stats()["nnodes"], 0);
        let a = graph.create_node(0);
        let b = graph.create_node(1);
        graph.add_node(a);
        graph.add_node(b);
        graph.add_edge(a, b);
        let stats = graph.stats();
        assert_eq!(stats["nnodes"], 2);
        assert_eq!(stats["nedges"], 1.0);
        assert_eq!(stats["out_degree"]["mean"], 0.5);
    }

    #[test]
    fn null_master_on_the_wire_is_rejected() {
        let graph = setup(1, EdgeDirection::Out);
        let mut s = SerializeBuffer::new();
        s.push(&PartitionHandle::<u32, u32>::null());
        let other = graph.cluster().add_host(&HostConfig::with_workers(1)).unwrap();
        let result = Graph::<u32, u32>::deserialize(
            Arc::clone(graph.cluster()),
            other,
            GraphConfig::default(),
            &mut DeserializeBuffer::from(s),
        );
        assert!(matches!(result, Err(GraphError::Parse(_))));
    }
}
