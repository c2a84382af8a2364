//! Distributed handles.
//!
//! A `Gptr<T>` names an object that may live on the current worker, on
//! another worker of the same host, or on another host. Handles compare by
//! the identity of their referent, never by value. Direct access goes
//! through a scoped acquisition whose guard releases the object on drop.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::directory::Addr;
use crate::runtime::Cluster;

/// A scoped grant of direct access to a lockable object.
pub type Acquired<T> = ArcMutexGuard<RawMutex, T>;

pub struct Gptr<T> {
    addr: Option<Addr>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Gptr<T> {
    pub const fn null() -> Self {
        Self {
            addr: None,
            _marker: PhantomData,
        }
    }

    pub(crate) fn from_addr(addr: Addr) -> Self {
        Self {
            addr: Some(addr),
            _marker: PhantomData,
        }
    }

    pub(crate) fn from_option(addr: Option<Addr>) -> Self {
        Self {
            addr,
            _marker: PhantomData,
        }
    }

    pub fn addr(&self) -> Option<Addr> {
        self.addr
    }

    pub fn is_null(&self) -> bool {
        self.addr.is_none()
    }

    /// Whether the referent lives on `host`. Null handles are not local.
    pub fn is_local_to(&self, host: u32) -> bool {
        self.addr.map_or(false, |a| a.host == host)
    }

    fn expect_addr(&self) -> Addr {
        match self.addr {
            Some(addr) => addr,
            None => panic!("dereferenced a null {} handle", std::any::type_name::<T>()),
        }
    }
}

impl<T: Any + Send + Sync> Gptr<T> {
    /// Looks the referent up through the directory of its owning host.
    /// Panics on a null handle.
    pub fn resolve(&self, cluster: &Cluster) -> Arc<T> {
        cluster.resolve(self.expect_addr())
    }
}

impl<T: Send + 'static> Gptr<Mutex<T>> {
    /// Blocks until the referent is exclusively held by the caller.
    pub fn transient_acquire(&self, cluster: &Cluster) -> Acquired<T> {
        self.resolve(cluster).lock_arc()
    }

    /// Acquires the referent only if nobody else holds it.
    pub fn try_acquire(&self, cluster: &Cluster) -> Option<Acquired<T>> {
        self.resolve(cluster).try_lock_arc()
    }
}

impl<T> Clone for Gptr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Gptr<T> {}

impl<T> Default for Gptr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> PartialEq for Gptr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl<T> Eq for Gptr<T> {}

impl<T> Hash for Gptr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state)
    }
}

impl<T> fmt::Debug for Gptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "<{}>", addr),
            None => f.write_str("<null>"),
        }
    }
}
