//! Reusable scratch containers for the planning hot path.
//!
//! A lease hands out a cleared container and puts it back when dropped, so
//! early `?` returns never leak or dirty a pooled object.
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::DEFAULT_SCRATCH_POOL_CAPACITY;
use crate::expr::CoverMap;

/// Containers that can be emptied for reuse.
pub trait Scratch: Default + Send {
    /// Removes every element while keeping the allocation.
    fn reset(&mut self);
}

impl<K: Hash + Eq + Send, V: Send> Scratch for FxHashMap<K, V> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<K: Hash + Eq + Send> Scratch for FxHashSet<K> {
    fn reset(&mut self) {
        self.clear();
    }
}

impl<T: Send> Scratch for Vec<T> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// Snapshot of a pool's occupancy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    /// Maximum number of idle containers retained.
    pub capacity: usize,
    /// Idle containers currently held.
    pub available: usize,
}

/// Pool of idle scratch containers.
pub struct ScratchPool<T: Scratch> {
    inner: Mutex<Vec<T>>,
    capacity: AtomicUsize,
}

impl<T: Scratch> ScratchPool<T> {
    /// Creates a pool retaining at most `capacity` idle containers.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            capacity: AtomicUsize::new(capacity.max(1)),
        }
    }

    /// Borrows a cleared container.
    pub fn lease(&self) -> ScratchLease<'_, T> {
        let item = self.inner.lock().pop().unwrap_or_default();
        ScratchLease {
            pool: self,
            item: Some(item),
        }
    }

    /// Changes the retention bound; surplus idle containers are released.
    pub fn set_capacity(&self, capacity: usize) {
        let capacity = capacity.max(1);
        self.capacity.store(capacity, Ordering::Relaxed);
        self.inner.lock().truncate(capacity);
    }

    /// Current occupancy.
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            capacity: self.capacity.load(Ordering::Relaxed),
            available: self.inner.lock().len(),
        }
    }

    fn give_back(&self, mut item: T) {
        item.reset();
        let mut pool = self.inner.lock();
        if pool.len() >= self.capacity.load(Ordering::Relaxed) {
            return;
        }
        pool.push(item);
    }
}

/// Scoped borrow of a pooled container.
pub struct ScratchLease<'a, T: Scratch> {
    pool: &'a ScratchPool<T>,
    item: Option<T>,
}

impl<T: Scratch> Deref for ScratchLease<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("scratch lease emptied before drop"),
        }
    }
}

impl<T: Scratch> DerefMut for ScratchLease<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("scratch lease emptied before drop"),
        }
    }
}

impl<T: Scratch> Drop for ScratchLease<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(item);
        }
    }
}

/// Filter-cover maps shared by every planner in the process.
pub fn filter_covers_pool() -> &'static ScratchPool<CoverMap> {
    static POOL: OnceLock<ScratchPool<CoverMap>> = OnceLock::new();
    POOL.get_or_init(|| ScratchPool::new(DEFAULT_SCRATCH_POOL_CAPACITY))
}

/// Index-name sets shared by every planner in the process.
pub fn index_set_pool() -> &'static ScratchPool<FxHashSet<String>> {
    static POOL: OnceLock<ScratchPool<FxHashSet<String>>> = OnceLock::new();
    POOL.get_or_init(|| ScratchPool::new(DEFAULT_SCRATCH_POOL_CAPACITY))
}

/// Applies a retention bound to the global pools.
pub fn configure_global_pools(capacity: usize) {
    filter_covers_pool().set_capacity(capacity);
    index_set_pool().set_capacity(capacity);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_returns_cleared_container() {
        let pool: ScratchPool<Vec<u32>> = ScratchPool::new(2);
        {
            let mut lease = pool.lease();
            lease.extend([1, 2, 3]);
        }
        assert_eq!(pool.status().available, 1);
        let lease = pool.lease();
        assert!(lease.is_empty());
        assert!(lease.capacity() >= 3);
    }

    #[test]
    fn early_return_still_releases() {
        fn fails(pool: &ScratchPool<FxHashSet<String>>) -> Result<(), &'static str> {
            let mut set = pool.lease();
            set.insert("ix".into());
            Err("bail")
        }
        let pool = ScratchPool::new(4);
        assert!(fails(&pool).is_err());
        assert_eq!(pool.status().available, 1);
        assert!(pool.lease().is_empty());
    }

    #[test]
    fn capacity_bounds_idle_containers() {
        let pool: ScratchPool<Vec<u8>> = ScratchPool::new(1);
        let a = pool.lease();
        let b = pool.lease();
        drop(a);
        drop(b);
        assert_eq!(pool.status(), PoolStatus { capacity: 1, available: 1 });
    }

    #[test]
    fn concurrent_leases_are_independent() {
        let pool: ScratchPool<Vec<usize>> = ScratchPool::new(8);
        std::thread::scope(|s| {
            for t in 0..4 {
                let pool = &pool;
                s.spawn(move || {
                    for i in 0..100 {
                        let mut lease = pool.lease();
                        assert!(lease.is_empty());
                        lease.push(t * 1000 + i);
                    }
                });
            }
        });
        assert!(pool.status().available <= 8);
    }
}
