//! Per-worker partitions and the iterators that walk them.
//!
//! Each worker owns one `PartitionState`: the head of an intrusive list of
//! the nodes it created. Partitions are chained through `next`, starting at
//! the master partition, so following the chain from the master visits every
//! partition of every host the container has been replicated to.

use std::fmt;

use parking_lot::Mutex;

use crate::error::Result;
use crate::gptr::Gptr;
use crate::node::NodeHandle;
use crate::runtime::Cluster;
use crate::wire::{DeserializeBuffer, Serializable, SerializeBuffer};

pub type PartitionHandle<N, E> = Gptr<Mutex<PartitionState<N, E>>>;

pub struct PartitionState<N, E> {
    pub(crate) head: NodeHandle<N, E>,
    pub(crate) next: PartitionHandle<N, E>,
    pub(crate) master: PartitionHandle<N, E>,
}

impl<N, E> PartitionState<N, E> {
    pub(crate) fn new() -> Self {
        Self {
            head: Gptr::null(),
            next: Gptr::null(),
            master: Gptr::null(),
        }
    }

    pub fn head(&self) -> NodeHandle<N, E> {
        self.head
    }

    pub fn next(&self) -> PartitionHandle<N, E> {
        self.next
    }

    pub fn master(&self) -> PartitionHandle<N, E> {
        self.master
    }
}

impl<N, E> Serializable for PartitionState<N, E> {
    fn serialize(&self, s: &mut SerializeBuffer) {
        s.push(&self.head);
        s.push(&self.next);
        s.push(&self.master);
    }

    fn deserialize(s: &mut DeserializeBuffer) -> Result<Self> {
        let head = s.pull()?;
        let next = s.pull()?;
        let master = s.pull()?;
        Ok(Self { head, next, master })
    }
}

impl<N, E> fmt::Debug for PartitionState<N, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionState")
            .field("head", &self.head)
            .field("next", &self.next)
            .field("master", &self.master)
            .finish()
    }
}

fn head_of<N: Send + 'static, E: Send + 'static>(
    cluster: &Cluster,
    partition: PartitionHandle<N, E>,
) -> NodeHandle<N, E> {
    partition.transient_acquire(cluster).head
}

fn next_of<N: Send + 'static, E: Send + 'static>(
    cluster: &Cluster,
    partition: PartitionHandle<N, E>,
) -> PartitionHandle<N, E> {
    partition.transient_acquire(cluster).next
}

/// Partitions reachable from `start` by following `next`, `start` included.
pub(crate) fn chain<N: Send + 'static, E: Send + 'static>(
    cluster: &Cluster,
    start: PartitionHandle<N, E>,
) -> Vec<PartitionHandle<N, E>> {
    let mut partitions = Vec::new();
    let mut current = start;
    while !current.is_null() {
        partitions.push(current);
        current = next_of(cluster, current);
    }
    partitions
}

/// Visits every active node of every partition chained after a master.
///
/// Nodes created or deactivated while the walk is in progress may or may
/// not be observed; a missed node is the only consequence.
pub struct NodeIter<'a, N, E> {
    cluster: &'a Cluster,
    node: NodeHandle<N, E>,
    partition: PartitionHandle<N, E>,
}

impl<'a, N: Send + 'static, E: Send + 'static> NodeIter<'a, N, E> {
    pub(crate) fn new(cluster: &'a Cluster, master: PartitionHandle<N, E>) -> Self {
        let mut iter = Self::end(cluster);
        if !master.is_null() {
            iter.partition = master;
            iter.node = head_of(cluster, master);
            iter.settle();
        }
        iter
    }

    pub(crate) fn end(cluster: &'a Cluster) -> Self {
        Self {
            cluster,
            node: Gptr::null(),
            partition: Gptr::null(),
        }
    }

    /// The node the iterator is positioned at, `None` once exhausted.
    pub fn current(&self) -> Option<NodeHandle<N, E>> {
        if self.node.is_null() {
            None
        } else {
            Some(self.node)
        }
    }

    pub fn is_end(&self) -> bool {
        self.node.is_null()
    }

    /// Moves forward until positioned on an active node or past the end of
    /// the chain.
    fn settle(&mut self) {
        loop {
            while self.node.is_null() {
                let next = next_of(self.cluster, self.partition);
                if next.is_null() {
                    self.partition = Gptr::null();
                    return;
                }
                self.partition = next;
                self.node = head_of(self.cluster, next);
            }
            let node = self.node.resolve(self.cluster);
            if node.is_active() {
                return;
            }
            self.node = node.next();
        }
    }
}

impl<'a, N: Send + 'static, E: Send + 'static> Iterator for NodeIter<'a, N, E> {
    type Item = NodeHandle<N, E>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current()?;
        self.node = current.resolve(self.cluster).next();
        self.settle();
        Some(current)
    }
}

impl<'a, N, E> PartialEq for NodeIter<'a, N, E> {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

/// Visits the active nodes of a single partition, never leaving it.
pub struct LocalIter<'a, N, E> {
    cluster: &'a Cluster,
    node: NodeHandle<N, E>,
}

impl<'a, N: Send + 'static, E: Send + 'static> LocalIter<'a, N, E> {
    pub(crate) fn new(cluster: &'a Cluster, partition: PartitionHandle<N, E>) -> Self {
        let node = head_of(cluster, partition);
        Self { cluster, node }
    }
}

impl<'a, N: Send + 'static, E: Send + 'static> Iterator for LocalIter<'a, N, E> {
    type Item = NodeHandle<N, E>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.node.is_null() {
            let current = self.node;
            let node = current.resolve(self.cluster);
            self.node = node.next();
            if node.is_active() {
                return Some(current);
            }
        }
        None
    }
}
