//! Hosts, their workers, and the cluster that connects them.
//!
//! A `Host` stands in for one machine: it owns a fixed pool of worker
//! threads and a `Directory` of objects allocated by those workers. The
//! `Cluster` is the host-membership layer: it assigns host ids and lets any
//! host resolve an address that lives on another host.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::directory::{Addr, Directory, Object};
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Number of worker threads, and thus of graph partitions, on the host.
    pub workers: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            workers: rayon::current_num_threads(),
        }
    }
}

impl HostConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self { workers }
    }
}

pub struct Host {
    id: u32,
    pool: ThreadPool,
    directory: Directory,
    /// Replicated containers on this host, keyed by their master partition.
    persistent: RwLock<HashMap<Addr, Weak<dyn Any + Send + Sync>>>,
}

impl Host {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// The calling thread's worker index on this host. Threads that do not
    /// belong to the host's pool act as worker 0.
    pub fn worker_id(&self) -> usize {
        self.pool.current_thread_index().unwrap_or(0)
    }

    /// Whether the calling thread is one of this host's workers.
    pub fn in_worker(&self) -> bool {
        self.pool.current_thread_index().is_some()
    }

    /// Runs `f` exactly once on every worker of this host and collects the
    /// results in worker order. Nothing here is conflict-tracked.
    pub fn on_each<R, F>(&self, f: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync,
    {
        self.pool.broadcast(|ctx| f(ctx.index()))
    }

    /// Runs `f` on one of this host's workers.
    pub fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(f)
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// The live replica registered under `key`, if any.
    pub(crate) fn persistent<T: Any + Send + Sync>(&self, key: Addr) -> Option<Arc<T>> {
        let object = self.persistent.read().get(&key)?.upgrade()?;
        object.downcast::<T>().ok()
    }

    /// Registers `object` under `key`, forgetting entries whose object has
    /// since been dropped.
    pub(crate) fn register_persistent<T: Any + Send + Sync>(&self, key: Addr, object: &Arc<T>) {
        debug!(host = self.id, master = %key, "registering persistent object");
        let object: Object = Arc::<T>::clone(object);
        let mut persistent = self.persistent.write();
        persistent.retain(|_, entry| entry.strong_count() > 0);
        persistent.insert(key, Arc::downgrade(&object));
    }

    /// Number of live entries in the persistent registry.
    pub fn num_persistent(&self) -> usize {
        self.persistent
            .read()
            .values()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }
}

/// The set of hosts taking part in a computation.
#[derive(Default)]
pub struct Cluster {
    hosts: RwLock<Vec<Arc<Host>>>,
}

impl Cluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Starts a new host; host ids are handed out in creation order.
    pub fn add_host(&self, config: &HostConfig) -> Result<Arc<Host>> {
        assert!(config.workers > 0, "a host needs at least one worker");
        let mut hosts = self.hosts.write();
        let id = hosts.len() as u32;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(move |i| format!("host{}-worker{}", id, i))
            .build()?;
        let host = Arc::new(Host {
            id,
            pool,
            directory: Directory::new(id, config.workers),
            persistent: RwLock::new(HashMap::new()),
        });
        debug!(host = id, workers = config.workers, "host started");
        hosts.push(Arc::clone(&host));
        Ok(host)
    }

    pub fn num_hosts(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn host(&self, id: u32) -> Arc<Host> {
        self.hosts
            .read()
            .get(id as usize)
            .cloned()
            .unwrap_or_else(|| panic!("unknown host {}", id))
    }

    pub fn hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.read().clone()
    }

    /// Runs `f(host, worker)` once on every worker of every host.
    pub fn on_each<F>(&self, f: F)
    where
        F: Fn(&Host, usize) + Sync,
    {
        for host in self.hosts() {
            host.on_each(|worker| f(&*host, worker));
        }
    }

    pub(crate) fn resolve<T: Any + Send + Sync>(&self, addr: Addr) -> Arc<T> {
        let hosts = self.hosts.read();
        let host = hosts
            .get(addr.host as usize)
            .unwrap_or_else(|| panic!("handle {} names unknown host", addr));
        host.directory.get(addr)
    }
}
