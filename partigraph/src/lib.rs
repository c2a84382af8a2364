//! # `partigraph` - a partitioned graph container for parallel graph algorithms
//!
//! Nodes live in per-worker partitions chained across hosts; any node is
//! named by a distributed handle regardless of where it lives, and a whole
//! container replicates to another host by sending a single handle.
//!
//! Includes utilities for reading newline/space delimited
//! plaintext adjacency lists into a container.

use std::collections::HashMap;

use ordered_float::NotNan;

pub mod directory;
pub mod error;
pub mod gptr;
pub mod graph;
pub mod graphio;
pub mod node;
pub mod partition;
pub mod runtime;
mod scanner;
pub mod simsvm;
pub mod size;
pub mod wire;

pub use directory::Addr;
pub use error::{GraphError, Result};
pub use gptr::Gptr;
pub use graph::{EdgeDirection, EdgeIter, Graph, GraphConfig};
pub use node::{Edge, GraphNode, NodeGuard, NodeHandle};
pub use partition::{LocalIter, NodeIter, PartitionHandle, PartitionState};
pub use runtime::{Cluster, Host, HostConfig};
pub use scanner::{DelimIter, Scanner};
pub use size::{graph_size, SizeAccumulator};
pub use wire::{DeserializeBuffer, Serializable, SerializeBuffer};

const NSTAT_PERCENTILES: usize = 11;
const STAT_PERCENTILES: [f64; NSTAT_PERCENTILES] = [
    0.0, 0.001, 0.01, 0.05, 0.10, 0.50, 0.90, 0.95, 0.99, 0.999, 1.0,
];

/// Mean and fixed percentiles of a sample.
pub struct SummaryStats {
    mean: f64,
    percentiles: [f64; NSTAT_PERCENTILES],
}

impl SummaryStats {
    /// Panics if `it` is empty or yields a NaN.
    pub fn from(it: impl Iterator<Item = f64>) -> Self {
        let mut v: Vec<NotNan<f64>> = it.map(|f| NotNan::new(f).expect("NaN statistic")).collect();
        assert!(!v.is_empty(), "summary of an empty sample");
        v.sort_unstable();
        let mut stats = SummaryStats {
            mean: v.iter().map(|f| f.into_inner()).sum::<f64>() / v.len() as f64,
            percentiles: Default::default(),
        };
        STAT_PERCENTILES
            .iter()
            .copied()
            .map(|f| v[((v.len() - 1) as f64 * f) as usize].into_inner())
            .zip(stats.percentiles.iter_mut())
            .for_each(|(val, p)| *p = val);
        stats
    }

    pub fn to_map(&self) -> HashMap<String, f64> {
        let mut map: HashMap<_, _> = STAT_PERCENTILES
            .iter()
            .map(|f| format!("p{:.3}", f))
            .zip(self.percentiles.iter().copied())
            .collect();
        map.insert("mean".to_string(), self.mean);
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_reports_mean_and_extremes() {
        let stats = SummaryStats::from(vec![3.0, 1.0, 2.0].into_iter()).to_map();
        assert_eq!(stats["mean"], 2.0);
        assert_eq!(stats["p0.000"], 1.0);
        assert_eq!(stats["p0.500"], 2.0);
        assert_eq!(stats["p1.000"], 3.0);
    }
}
