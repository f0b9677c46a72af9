//! Process-wide pool registry
//!
//! Shared pools register here so that memory pressure handling can walk
//! every live pool and reclaim spare chunks in one traversal, and so that
//! shutdown can enforce the chosen reclamation mode.

use std::sync::{Arc, OnceLock, RwLock};

use log::info;

use crate::pool::ThreadSafePool;

/// Registry of every live shared pool.
pub struct PoolRegistry {
    pools: RwLock<Vec<Arc<ThreadSafePool>>>,
}

impl PoolRegistry {
    fn new() -> Self {
        PoolRegistry {
            pools: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, pool: Arc<ThreadSafePool>) {
        self.pools
            .write()
            .expect("pool registry poisoned")
            .push(pool);
    }

    pub fn unregister(&self, pool: &Arc<ThreadSafePool>) {
        self.pools
            .write()
            .expect("pool registry poisoned")
            .retain(|p| !Arc::ptr_eq(p, pool));
    }

    pub fn len(&self) -> usize {
        self.pools.read().expect("pool registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reclaims spare chunks from every registered pool; called under
    /// memory pressure.
    pub fn clear_all_unused(&self) {
        let pools = self.pools.read().expect("pool registry poisoned");
        info!("reclaiming unused chunks from {} pool(s)", pools.len());
        for pool in pools.iter() {
            pool.clear_unused_memory();
        }
    }

    /// Shutdown path: every pool must be completely free.
    pub fn clear_all_assert_completely_free(&self) {
        let mut pools = self.pools.write().expect("pool registry poisoned");
        for pool in pools.drain(..) {
            pool.clear_assert_completely_free();
        }
    }

    /// Shutdown path: leaks are logged and ignored.
    pub fn clear_all_ignore_leaks(&self) {
        let mut pools = self.pools.write().expect("pool registry poisoned");
        for pool in pools.drain(..) {
            pool.clear_ignore_leaks();
        }
    }
}

/// The process-wide registry.
pub fn pool_registry() -> &'static PoolRegistry {
    static REGISTRY: OnceLock<PoolRegistry> = OnceLock::new();
    REGISTRY.get_or_init(PoolRegistry::new)
}
