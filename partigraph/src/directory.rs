//! Per-host object directory.
//!
//! Every object a distributed handle can name lives in exactly one slot of
//! one worker's arena on one host. Arenas are append-only: slots are never
//! freed or reused, so an address, once handed out, resolves to the same
//! object for the lifetime of the host.

use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub(crate) type Object = Arc<dyn Any + Send + Sync>;

/// The location of an object: owning host, owning worker arena, slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Addr {
    pub host: u32,
    pub worker: u32,
    pub slot: u32,
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.worker, self.slot)
    }
}

pub struct Directory {
    host: u32,
    arenas: Vec<RwLock<Vec<Object>>>,
}

impl Directory {
    pub(crate) fn new(host: u32, nworkers: usize) -> Self {
        let arenas = (0..nworkers).map(|_| RwLock::new(Vec::new())).collect();
        Self { host, arenas }
    }

    /// Appends `object` to `worker`'s arena.
    pub(crate) fn insert<T: Any + Send + Sync>(&self, worker: usize, object: Arc<T>) -> Addr {
        let mut arena = self.arenas[worker].write();
        let slot = arena.len();
        assert!(
            slot < u32::MAX as usize,
            "arena for worker {} on host {} is full",
            worker,
            self.host
        );
        arena.push(object);
        Addr {
            host: self.host,
            worker: worker as u32,
            slot: slot as u32,
        }
    }

    /// Panics if `addr` was never handed out by this directory or names an
    /// object of another type.
    pub(crate) fn get<T: Any + Send + Sync>(&self, addr: Addr) -> Arc<T> {
        debug_assert_eq!(addr.host, self.host);
        let object = self
            .arenas
            .get(addr.worker as usize)
            .and_then(|arena| arena.read().get(addr.slot as usize).cloned())
            .unwrap_or_else(|| panic!("dangling handle {}", addr));
        object.downcast::<T>().unwrap_or_else(|_| {
            panic!("handle {} does not refer to a {}", addr, any::type_name::<T>())
        })
    }

    /// Number of objects ever allocated in `worker`'s arena.
    pub fn arena_len(&self, worker: usize) -> usize {
        self.arenas[worker].read().len()
    }

    pub fn len(&self) -> usize {
        self.arenas.iter().map(|arena| arena.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_append_only_per_worker() {
        let dir = Directory::new(3, 2);
        let a = dir.insert(0, Arc::new(1u32));
        let b = dir.insert(1, Arc::new(2u32));
        let c = dir.insert(0, Arc::new(3u32));
        assert_eq!(a, Addr { host: 3, worker: 0, slot: 0 });
        assert_eq!(b, Addr { host: 3, worker: 1, slot: 0 });
        assert_eq!(c, Addr { host: 3, worker: 0, slot: 1 });
        assert_eq!(*dir.get::<u32>(c), 3);
        assert_eq!(dir.arena_len(0), 2);
        assert_eq!(dir.len(), 3);
    }

    #[test]
    #[should_panic(expected = "does not refer to a")]
    fn wrong_type_is_fatal() {
        let dir = Directory::new(0, 1);
        let a = dir.insert(0, Arc::new(1u32));
        let _ = dir.get::<String>(a);
    }

    #[test]
    #[should_panic(expected = "dangling handle")]
    fn unknown_slot_is_fatal() {
        let dir = Directory::new(0, 1);
        let _ = dir.get::<u32>(Addr { host: 0, worker: 0, slot: 7 });
    }
}
