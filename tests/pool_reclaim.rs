//! Pool reclamation scenario: allocate, free everything, reclaim spares.

use std::ptr::NonNull;
use std::sync::Arc;

use specular::alloc::{pool_registry, MemoryPool, ThreadSafePool};

#[test]
fn test_pool_reclamation() {
    specular::startup();

    let mut pool = MemoryPool::new(64, 1 << 10, 16 << 10);

    let mut blocks = Vec::with_capacity(100);
    for _ in 0..100 {
        let block = pool.allocate();
        unsafe { block.as_ptr().write_bytes(0xA5, 64) };
        blocks.push(block.as_ptr() as usize);
    }
    assert_eq!(pool.used_size(), 100 * pool.block_size());

    for addr in blocks {
        unsafe { pool.deallocate(NonNull::new(addr as *mut u8).unwrap()) };
    }

    assert_eq!(pool.used_size(), 0);
    // Spares may be kept warm after the frees.
    let warm_chunks = pool.chunk_count();

    pool.clear_unused_memory();
    assert_eq!(pool.chunk_count(), 0);
    assert_eq!(pool.total_size(), 0);
    assert!(warm_chunks >= pool.chunk_count());
}

#[test]
fn test_registry_wide_reclamation() {
    specular::startup();

    let pool = ThreadSafePool::new(MemoryPool::new(32, 1 << 10, 8 << 10));
    pool_registry().register(Arc::clone(&pool));

    let mut blocks = Vec::new();
    for _ in 0..50 {
        blocks.push(pool.allocate().as_ptr() as usize);
    }
    for addr in blocks {
        unsafe { pool.deallocate(NonNull::new(addr as *mut u8).unwrap()) };
    }

    pool_registry().clear_all_unused();
    assert_eq!(pool.chunk_count(), 0);
    assert_eq!(pool.used_size(), 0);

    pool_registry().unregister(&pool);
}
