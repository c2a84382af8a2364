//! Runs pull PageRank over a graph stored in simple graph format across
//! sharded input files, loaded into a partitioned container on one host and
//! replicated to the others.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use itertools::Itertools;
use serde_json::json;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use partigraph::graphio::{self, LoadedGraph};
use partigraph::{
    graph_size, Cluster, DeserializeBuffer, Graph, GraphConfig, HostConfig, NodeHandle, Scanner,
    SerializeBuffer,
};

const ALPHA: f32 = 1.0 - 0.85;

/// Reads simplified graph format files and ranks their nodes.
#[derive(Debug, StructOpt)]
#[structopt(name = "pagerank", about = "Pull PageRank over a partitioned graph.")]
struct Opt {
    /// Simple graph format files: `<node> <neighbor> <neighbor>...` per line.
    #[structopt(long)]
    graph: Vec<PathBuf>,

    /// Number of in-process hosts to replicate the graph onto.
    #[structopt(long, default_value = "2")]
    hosts: usize,

    /// Worker threads per host.
    #[structopt(long, default_value = "4")]
    workers: usize,

    /// A node whose rank moves less than this is considered settled.
    #[structopt(long, default_value = "0.01")]
    tolerance: f32,

    /// Upper bound on PageRank rounds.
    #[structopt(long, default_value = "100")]
    max_iterations: usize,

    /// Print every node's rank at the end.
    #[structopt(long)]
    verify: bool,
}

#[derive(Debug, Default)]
struct Rank {
    value: f32,
    nout: u32,
}

type G = Graph<Rank, ()>;
type Node = NodeHandle<Rank, ()>;

fn main() -> partigraph::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let opt = Opt::from_args();
    let tolerance = opt.tolerance;

    let cluster = Cluster::new();
    let config = HostConfig::with_workers(opt.workers);
    let hosts = (0..opt.hosts.max(1))
        .map(|_| cluster.add_host(&config))
        .collect::<partigraph::Result<Vec<_>>>()?;

    let load_graph_start = Instant::now();
    let scanner = Scanner::new(opt.graph, b' ');
    let LoadedGraph { graph, .. } = graphio::load::<Rank, ()>(
        Arc::clone(&cluster),
        Arc::clone(&hosts[0]),
        GraphConfig::default(),
        &scanner,
    )?;
    println!(
        "{}",
        json!({
            "load_graph_duration":
                format!("{:.0?}", Instant::now().duration_since(load_graph_start))
        })
    );

    let replicate_start = Instant::now();
    let mut replicas = vec![Arc::clone(&graph)];
    for host in &hosts[1..] {
        let mut s = SerializeBuffer::new();
        graph.serialize(&mut s);
        replicas.push(G::deserialize(
            Arc::clone(&cluster),
            Arc::clone(host),
            GraphConfig::default(),
            &mut DeserializeBuffer::from(s),
        )?);
    }
    println!(
        "{}",
        json!({
            "nhosts": hosts.len(),
            "partitions": graph.partition_chain().len(),
            "replicate_duration":
                format!("{:.0?}", Instant::now().duration_since(replicate_start)),
            "graph": graph.stats(),
        })
    );

    let init_start = Instant::now();
    for_each_node(&cluster, &replicas, |g, n| {
        let dsts: Vec<Node> = g.edges(n).map(|e| g.get_edge_dst(&e)).collect();
        g.get_data(n).value = 1.0 - ALPHA;
        for dst in dsts {
            g.get_data(dst).nout += 1;
        }
    });
    let init_time = Instant::now().duration_since(init_start);

    let pagerank_start = Instant::now();
    let conflicts = AtomicUsize::new(0);
    let mut iterations = 0;
    loop {
        let changed = AtomicUsize::new(0);
        for_each_node(&cluster, &replicas, |g, n| loop {
            match try_pull(g, n, tolerance) {
                Some(true) => {
                    changed.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                Some(false) => break,
                None => {
                    conflicts.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
        iterations += 1;
        if changed.into_inner() == 0 || iterations >= opt.max_iterations {
            break;
        }
    }
    let pagerank_time = Instant::now().duration_since(pagerank_start);

    if opt.verify {
        for node in graph.iter() {
            println!(
                "{}",
                json!({ "node": format!("{:?}", node), "rank": graph.get_data(node).value })
            );
        }
    }

    println!(
        "{}",
        json!({
            "nnodes": graph_size(&graph),
            "iterations": iterations,
            "conflicts": conflicts.into_inner(),
            "init_time": format!("{:.0?}", init_time),
            "pagerank_time": format!("{:.0?}", pagerank_time),
        })
    );
    Ok(())
}

/// Runs `op` over every active node, each worker of each host walking only
/// its own partition of its host's replica.
fn for_each_node<F>(cluster: &Cluster, replicas: &[Arc<G>], op: F)
where
    F: Fn(&G, Node) + Sync,
{
    cluster.on_each(|host, _| {
        let graph = &replicas[host.id() as usize];
        for node in graph.local_iter() {
            op(graph, node);
        }
    });
}

/// One pull update of `src`. Returns `None` if any node involved is held by
/// another worker; everything acquired so far is released before returning.
///
/// Each distinct neighbor is acquired once, however many edges lead to it,
/// and neighbor guards are only dropped after `src` is updated.
fn try_pull(graph: &G, src: Node, tolerance: f32) -> Option<bool> {
    let mut sdata = graph.try_acquire(src)?;
    let dsts: Vec<Node> = graph.edges(src).map(|e| e.dst()).collect();

    let mut pulled = HashMap::with_capacity(dsts.len());
    let mut neighbor_guards = Vec::with_capacity(dsts.len());
    for &dst in dsts.iter().unique() {
        if dst == src {
            pulled.insert(dst, (sdata.value, sdata.nout));
            continue;
        }
        let ddata = graph.try_acquire(dst)?;
        pulled.insert(dst, (ddata.value, ddata.nout));
        neighbor_guards.push(ddata);
    }

    let sum: f32 = dsts
        .iter()
        .map(|dst| pulled[dst])
        .filter(|&(_, nout)| nout > 0)
        .map(|(value, nout)| value / nout as f32)
        .sum();
    let pr_value = sum * (1.0 - ALPHA) + ALPHA;
    let diff = (pr_value - sdata.value).abs();
    if diff > tolerance {
        sdata.value = pr_value;
        return Some(true);
    }
    Some(false)
}
