//! Graph nodes and the edges they own.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::gptr::{Acquired, Gptr};
use crate::wire::{DeserializeBuffer, Serializable, SerializeBuffer};

pub type NodeHandle<N, E> = Gptr<GraphNode<N, E>>;

/// An outgoing edge, owned by its source node.
pub struct Edge<N, E> {
    dst: NodeHandle<N, E>,
    value: E,
}

impl<N, E> Edge<N, E> {
    pub fn new(dst: NodeHandle<N, E>, value: E) -> Self {
        Self { dst, value }
    }

    /// The destination, whether or not it is still active.
    pub fn dst(&self) -> NodeHandle<N, E> {
        self.dst
    }

    pub fn value(&self) -> &E {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut E {
        &mut self.value
    }
}

impl<N, E: Clone> Clone for Edge<N, E> {
    fn clone(&self) -> Self {
        Self {
            dst: self.dst,
            value: self.value.clone(),
        }
    }
}

impl<N, E: fmt::Debug> fmt::Debug for Edge<N, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{{Edge: dst: {:?} val: {:?}}}>", self.dst, self.value)
    }
}

impl<N, E: Serializable> Serializable for Edge<N, E> {
    fn serialize(&self, s: &mut SerializeBuffer) {
        s.push(&self.dst);
        s.push(&self.value);
    }

    fn deserialize(s: &mut DeserializeBuffer) -> Result<Self> {
        let dst = s.pull()?;
        let value = s.pull()?;
        Ok(Self { dst, value })
    }
}

/// A node record.
///
/// `next` threads the node into the partition of the worker that created
/// it and is fixed before the node is published. `active` is the logical
/// visibility bit. Both are readable without acquiring the node, which is
/// what lets iteration and edge filtering run lock-free over nodes.
///
/// Acquiring a node grants exclusive use of its payload. The edge list sits
/// behind its own lock, taken only for the duration of a single edge
/// operation, so edges can be added, walked and dropped by the holder of
/// the node as well as by anyone else.
pub struct GraphNode<N, E> {
    next: NodeHandle<N, E>,
    active: AtomicBool,
    data: Arc<Mutex<N>>,
    edges: Arc<Mutex<Vec<Edge<N, E>>>>,
}

impl<N, E> GraphNode<N, E> {
    pub(crate) fn new(next: NodeHandle<N, E>, data: N) -> Self {
        Self::from_parts(next, false, data, Vec::new())
    }

    fn from_parts(next: NodeHandle<N, E>, active: bool, data: N, edges: Vec<Edge<N, E>>) -> Self {
        Self {
            next,
            active: AtomicBool::new(active),
            data: Arc::new(Mutex::new(data)),
            edges: Arc::new(Mutex::new(edges)),
        }
    }

    pub fn next(&self) -> NodeHandle<N, E> {
        self.next
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns whether the flag changed.
    pub(crate) fn activate(&self) -> bool {
        !self.active.swap(true, Ordering::AcqRel)
    }

    /// Clears the flag and drops every edge; a no-op on inactive nodes.
    pub(crate) fn deactivate(&self) -> bool {
        if self
            .active
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.edges.lock().clear();
        true
    }

    pub(crate) fn push_edge(&self, edge: Edge<N, E>) {
        self.edges.lock().push(edge);
    }

    pub fn num_edges(&self) -> usize {
        self.edges.lock().len()
    }
}

impl<N: Send + 'static, E: Send + 'static> GraphNode<N, E> {
    /// Blocks until the caller exclusively holds the node.
    pub fn acquire(&self) -> NodeGuard<N, E> {
        NodeGuard {
            data: self.data.lock_arc(),
            edges: Arc::clone(&self.edges),
        }
    }

    /// Conflict-tracked acquisition: `None` if another holder owns the node.
    pub fn try_acquire(&self) -> Option<NodeGuard<N, E>> {
        let data = self.data.try_lock_arc()?;
        Some(NodeGuard {
            data,
            edges: Arc::clone(&self.edges),
        })
    }
}

impl<N, E: Clone> GraphNode<N, E> {
    pub(crate) fn snapshot_edges(&self) -> Vec<Edge<N, E>> {
        self.edges.lock().clone()
    }
}

impl<N: Serializable, E: Serializable> Serializable for GraphNode<N, E> {
    fn serialize(&self, s: &mut SerializeBuffer) {
        let data = self.data.lock();
        s.push(&self.next);
        s.push(&self.is_active());
        s.push(&*data);
        s.push(&*self.edges.lock());
    }

    fn deserialize(s: &mut DeserializeBuffer) -> Result<Self> {
        let next = s.pull()?;
        let active = s.pull()?;
        let data = s.pull()?;
        let edges = s.pull()?;
        Ok(Self::from_parts(next, active, data, edges))
    }
}

impl<N: fmt::Debug, E: fmt::Debug> fmt::Debug for GraphNode<N, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{{GN: next: {:?} active: {}", self.next, self.is_active())?;
        match self.data.try_lock() {
            Some(data) => write!(f, " data: {:?}", *data)?,
            None => f.write_str(" data: <held>")?,
        }
        let edges = self.edges.lock();
        write!(f, " numedges: {}", edges.len())?;
        for edge in edges.iter() {
            write!(f, " {:?}", edge)?;
        }
        f.write_str("}>")
    }
}

/// Exclusive access to a node's payload, released on drop. The holder may
/// also edit the node's edges through the guard.
pub struct NodeGuard<N, E> {
    data: Acquired<N>,
    edges: Arc<Mutex<Vec<Edge<N, E>>>>,
}

impl<N, E> NodeGuard<N, E> {
    pub fn num_edges(&self) -> usize {
        self.edges.lock().len()
    }

    /// Appends an edge without checking its destination.
    pub fn push_edge(&mut self, edge: Edge<N, E>) {
        self.edges.lock().push(edge);
    }

    pub fn clear_edges(&mut self) {
        self.edges.lock().clear();
    }

    /// Runs `f` over the edge list. Edge payloads are mutable in place; the
    /// list's shape is not. `f` must not reach this node's edges again.
    pub fn with_edges_mut<R>(&mut self, f: impl FnOnce(&mut [Edge<N, E>]) -> R) -> R {
        f(&mut self.edges.lock())
    }
}

impl<N, E: Clone> NodeGuard<N, E> {
    /// Every edge, including those to inactive destinations.
    pub fn edges(&self) -> Vec<Edge<N, E>> {
        self.edges.lock().clone()
    }
}

impl<N, E> Deref for NodeGuard<N, E> {
    type Target = N;

    fn deref(&self) -> &N {
        &self.data
    }
}

impl<N, E> DerefMut for NodeGuard<N, E> {
    fn deref_mut(&mut self) -> &mut N {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Addr;

    fn handle(slot: u32) -> NodeHandle<u32, f32> {
        Gptr::from_addr(Addr {
            host: 0,
            worker: 1,
            slot,
        })
    }

    #[test]
    fn activation_flags_report_changes() {
        let node: GraphNode<u32, f32> = GraphNode::new(Gptr::null(), 7);
        assert!(!node.is_active());
        assert!(node.activate());
        assert!(!node.activate());
        node.push_edge(Edge::new(handle(3), 0.5));
        assert!(node.deactivate());
        assert_eq!(node.num_edges(), 0);
        assert!(!node.deactivate());
    }

    #[test]
    fn guard_exposes_payload_and_edges() {
        let node: GraphNode<u32, f32> = GraphNode::new(Gptr::null(), 1);
        node.push_edge(Edge::new(handle(9), 2.0));
        {
            let mut guard = node.acquire();
            *guard += 41;
            guard.with_edges_mut(|edges| *edges[0].value_mut() = 3.0);
            assert!(node.try_acquire().is_none());
            // edges stay editable by others while the payload is held
            node.push_edge(Edge::new(handle(10), 4.0));
            assert_eq!(node.num_edges(), 2);
        }
        let guard = node.try_acquire().expect("guard dropped");
        assert_eq!(*guard, 42);
        assert_eq!(*guard.edges()[0].value(), 3.0);
        assert_eq!(guard.edges()[0].dst(), handle(9));
        assert_eq!(guard.num_edges(), 2);
    }

    #[test]
    fn holder_edits_edges_through_the_guard() {
        let node: GraphNode<u32, f32> = GraphNode::new(Gptr::null(), 0);
        let mut guard = node.acquire();
        guard.push_edge(Edge::new(handle(1), 1.0));
        guard.push_edge(Edge::new(handle(2), 2.0));
        assert_eq!(node.num_edges(), 2);
        assert!(format!("{:?}", node).contains("data: <held>"));
        guard.clear_edges();
        assert_eq!(guard.num_edges(), 0);
    }

    #[test]
    fn wire_order_is_next_active_data_edges() {
        let node: GraphNode<u32, f32> = GraphNode::new(handle(4), 11);
        node.activate();
        node.push_edge(Edge::new(handle(5), 1.25));

        let mut s = SerializeBuffer::new();
        s.push(&node);
        let mut d = DeserializeBuffer::from(s);
        assert_eq!(d.pull::<NodeHandle<u32, f32>>().unwrap(), handle(4));
        assert!(d.pull::<bool>().unwrap());
        assert_eq!(d.pull::<u32>().unwrap(), 11);
        let edges: Vec<Edge<u32, f32>> = d.pull().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].dst(), handle(5));
        assert_eq!(*edges[0].value(), 1.25);
    }

    #[test]
    fn deserialized_node_is_a_copy() {
        let node: GraphNode<(), ()> = GraphNode::new(Gptr::null(), ());
        node.activate();
        let mut s = SerializeBuffer::new();
        s.push(&node);
        let copy: GraphNode<(), ()> = DeserializeBuffer::from(s).pull().unwrap();
        assert!(copy.is_active());
        assert!(copy.next().is_null());
        assert_eq!(copy.num_edges(), 0);
    }

    #[test]
    fn debug_output_lists_edges() {
        let node: GraphNode<u32, f32> = GraphNode::new(Gptr::null(), 2);
        node.push_edge(Edge::new(handle(6), 0.0));
        let dump = format!("{:?}", node);
        assert!(dump.contains("active: false"));
        assert!(dump.contains("numedges: 1"));
        assert!(dump.contains("<0:1:6>"));
    }
}
