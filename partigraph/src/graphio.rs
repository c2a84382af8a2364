//! Loads adjacency-list files into a container.
//!
//! Each line is `<src> <dst> <dst>...` in simsvm layout. Node ids must be
//! dense: one node is created for every id up to the largest one seen.

use std::sync::Arc;
use std::time::Instant;

use rayon::iter::ParallelIterator;
use tracing::info;

use crate::error::{GraphError, Result};
use crate::gptr::Gptr;
use crate::graph::{Graph, GraphConfig};
use crate::node::NodeHandle;
use crate::runtime::{Cluster, Host};
use crate::{simsvm, Scanner};

pub struct LoadedGraph<N, E> {
    pub graph: Arc<Graph<N, E>>,
    /// Node handles indexed by the ids used in the input files.
    pub nodes: Vec<NodeHandle<N, E>>,
}

/// Reads every file behind `scanner` into a new container on `host`.
///
/// Nodes are created active with default payloads, spread round-robin over
/// the host's workers by id; edges carry default payloads.
pub fn load<N, E>(
    cluster: Arc<Cluster>,
    host: Arc<Host>,
    config: GraphConfig,
    scanner: &Scanner,
) -> Result<LoadedGraph<N, E>>
where
    N: Default + Send + 'static,
    E: Default + Clone + Send + 'static,
{
    let nnodes = scanner
        .fold(
            |_| None,
            |m: Option<u32>, line| {
                let line = simsvm::parse(line)?;
                let mut m = m.max(Some(line.target()));
                for neighbor in line {
                    m = m.max(Some(neighbor?));
                }
                Ok(m)
            },
        )
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .max()
        .flatten()
        .map_or(0, |m| m as usize + 1);

    let graph: Arc<Graph<N, E>> = Graph::new(cluster, Arc::clone(&host), config);

    let node_start = Instant::now();
    let nworkers = host.num_workers();
    let mut nodes = vec![Gptr::null(); nnodes];
    let created = host.on_each(|worker| {
        (worker..nnodes)
            .step_by(nworkers)
            .map(|id| {
                let node = graph.create_default_node();
                graph.add_node(node);
                (id, node)
            })
            .collect::<Vec<_>>()
    });
    for (id, node) in created.into_iter().flatten() {
        nodes[id] = node;
    }
    let node_time = format!("{:.0?}", Instant::now().duration_since(node_start));

    let edge_start = Instant::now();
    let nedges = host.install(|| {
        scanner
            .fold(
                |_| 0usize,
                |count, line| {
                    let line = simsvm::parse(line)?;
                    let src = lookup(&nodes, line.target())?;
                    let mut count = count;
                    for neighbor in line {
                        let dst = lookup(&nodes, neighbor?)?;
                        graph.add_edge(src, dst);
                        count += 1;
                    }
                    Ok(count)
                },
            )
            .collect::<Result<Vec<_>>>()
    })?
    .into_iter()
    .sum::<usize>();
    let edge_time = format!("{:.0?}", Instant::now().duration_since(edge_start));

    info!(
        host = host.id(),
        nnodes,
        nedges,
        node_time = %node_time,
        edge_time = %edge_time,
        "graph loaded"
    );

    Ok(LoadedGraph { graph, nodes })
}

fn lookup<N, E>(nodes: &[NodeHandle<N, E>], id: u32) -> Result<NodeHandle<N, E>> {
    nodes
        .get(id as usize)
        .copied()
        .ok_or_else(|| GraphError::Parse(format!("node id {} out of range", id)))
}
