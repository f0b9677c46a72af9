//! Fixed-block memory pools
//!
//! A pool hands out equal-sized blocks carved from large chunks. Chunks in
//! use live on the front list; chunks that drain completely move to a spare
//! list (sorted by size) where they stay warm for revival. Chunk size
//! doubles on growth up to a ceiling, and a size heuristic releases spares
//! once the pool is mostly empty.

use std::alloc::{self, handle_alloc_error, Layout};
use std::cell::RefCell;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use log::{debug, info, warn};

use crate::allocator::{AllocatorKind, DomainAllocator};
use crate::domain::{Domain, PoolStorageDomain};

/// Chunk storage boundary; blocks are carved at multiples of the block size
/// from a boundary-aligned base.
pub(crate) const ALLOCATION_BOUNDARY: usize = 16;

/// Chunks must hold more than this many blocks to be worth the bookkeeping.
const MIN_BLOCKS_PER_CHUNK: usize = 10;

struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

struct PoolChunk {
    storage: NonNull<u8>,
    layout: Layout,
    block_size: usize,
    block_count: u32,
    block_used: u32,
    block_added: u32,
    free_head: Option<NonNull<FreeBlock>>,
}

// The chunk owns its storage exclusively; handed-out blocks are tracked by
// the pool, which is itself single-threaded or wrapped.
unsafe impl Send for PoolChunk {}

impl PoolChunk {
    fn new(chunk_size: usize, block_size: usize) -> Box<PoolChunk> {
        let block_count = chunk_size / block_size;
        assert!(block_count > MIN_BLOCKS_PER_CHUNK);

        let layout = Layout::from_size_align(chunk_size, ALLOCATION_BOUNDARY)
            .expect("chunk layout overflow");
        let ptr = unsafe { alloc::alloc(layout) };
        let Some(storage) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        PoolStorageDomain::tracker().on_allocate(chunk_size);

        Box::new(PoolChunk {
            storage,
            layout,
            block_size,
            block_count: block_count as u32,
            block_used: 0,
            block_added: 0,
            free_head: None,
        })
    }

    fn chunk_size(&self) -> usize {
        self.layout.size()
    }

    fn block_available(&self) -> bool {
        self.block_used < self.block_count
    }

    fn completely_free(&self) -> bool {
        self.block_used == 0
    }

    fn contains(&self, ptr: NonNull<u8>) -> bool {
        let base = self.storage.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        addr >= base && addr < base + self.block_size * self.block_count as usize
    }

    fn allocate_block(&mut self) -> NonNull<u8> {
        debug_assert!(self.block_available());

        let block = if let Some(head) = self.free_head {
            self.free_head = unsafe { head.as_ref().next };
            head.cast::<u8>()
        } else {
            debug_assert!(self.block_added < self.block_count);
            let offset = self.block_added as usize * self.block_size;
            self.block_added += 1;
            // In range: block_added < block_count.
            unsafe { NonNull::new_unchecked(self.storage.as_ptr().add(offset)) }
        };

        self.block_used += 1;
        debug_assert!(self.contains(block));
        block
    }

    fn release_block(&mut self, ptr: NonNull<u8>) {
        debug_assert!(self.contains(ptr));
        debug_assert!(self.block_used > 0);

        let block = ptr.cast::<FreeBlock>();
        unsafe {
            block.as_ptr().write(FreeBlock {
                next: self.free_head,
            });
        }
        self.free_head = Some(block);
        self.block_used -= 1;
    }
}

impl Drop for PoolChunk {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.storage.as_ptr(), self.layout) };
        PoolStorageDomain::tracker().on_deallocate(self.layout.size());
    }
}

/// Single-threaded fixed-block pool. Wrap in [`ThreadSafePool`] or
/// [`ThreadLocalPool`] to pick a thread-safety policy at construction.
pub struct MemoryPool {
    block_size: usize,
    min_chunk_size: usize,
    max_chunk_size: usize,
    current_chunk_size: usize,
    used_size: usize,
    total_size: usize,
    /// Chunks currently serving blocks; front is the most recently touched.
    chunks: Vec<Box<PoolChunk>>,
    /// Completely free chunks kept warm, sorted ascending by chunk size.
    spares: Vec<Box<PoolChunk>>,
}

impl MemoryPool {
    pub const DEFAULT_MIN_CHUNK_SIZE: usize = 4 << 10;
    pub const DEFAULT_MAX_CHUNK_SIZE: usize = 64 << 10;

    pub fn new(block_size: usize, min_chunk_size: usize, max_chunk_size: usize) -> Self {
        assert!(block_size > 0);
        assert!(max_chunk_size >= min_chunk_size);

        // Blocks double as free-list nodes and must keep every block aligned.
        let block_size = block_size
            .max(mem::size_of::<FreeBlock>())
            .next_multiple_of(ALLOCATION_BOUNDARY);

        let mut current_chunk_size = min_chunk_size;
        while (MIN_BLOCKS_PER_CHUNK + 1) * block_size > current_chunk_size {
            current_chunk_size *= 2;
        }
        assert!(
            current_chunk_size <= max_chunk_size,
            "block size {} too large for max chunk size {}",
            block_size,
            max_chunk_size
        );

        info!(
            "new memory pool: block size = {}, {} bytes = {} blocks per chunk",
            block_size,
            current_chunk_size,
            current_chunk_size / block_size
        );

        MemoryPool {
            block_size,
            min_chunk_size,
            max_chunk_size,
            current_chunk_size,
            used_size: 0,
            total_size: 0,
            chunks: Vec::new(),
            spares: Vec::new(),
        }
    }

    pub fn with_default_chunks(block_size: usize) -> Self {
        Self::new(
            block_size,
            Self::DEFAULT_MIN_CHUNK_SIZE,
            Self::DEFAULT_MAX_CHUNK_SIZE,
        )
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn used_size(&self) -> usize {
        self.used_size
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len() + self.spares.len()
    }

    pub fn current_chunk_size(&self) -> usize {
        self.current_chunk_size
    }

    /// Hands out one block. First fit among live chunks, then the largest
    /// spare, then a freshly grown chunk. Amortized O(1).
    pub fn allocate(&mut self) -> NonNull<u8> {
        if let Some(block) = self.try_allocate() {
            return block;
        }

        if !self.chunks.is_empty() {
            self.grow_chunk_size();
        }
        let chunk = PoolChunk::new(self.current_chunk_size, self.block_size);
        self.total_size += chunk.chunk_size();
        self.chunks.insert(0, chunk);

        self.try_allocate().expect("fresh chunk must serve a block")
    }

    fn try_allocate(&mut self) -> Option<NonNull<u8>> {
        let index = self.chunks.iter().position(|c| c.block_available());

        let index = match index {
            Some(index) => index,
            None => {
                // Revive the largest spare before allocating a new chunk.
                let revived = self.spares.pop()?;
                self.chunks.insert(0, revived);
                0
            }
        };

        if index != 0 {
            let chunk = self.chunks.remove(index);
            self.chunks.insert(0, chunk);
        }

        self.used_size += self.block_size;
        debug_assert!(self.used_size <= self.total_size);
        Some(self.chunks[0].allocate_block())
    }

    /// Returns a block. Locating the owning chunk is linear over the chunk
    /// list; the chunk count stays small by construction.
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on this pool and must not be used
    /// afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        let index = self
            .chunks
            .iter()
            .position(|c| c.contains(ptr))
            .unwrap_or_else(|| panic!("pointer does not belong to this pool"));

        debug_assert!(self.used_size >= self.block_size);
        self.used_size -= self.block_size;
        self.chunks[index].release_block(ptr);

        if self.chunks[index].completely_free() {
            let chunk = self.chunks.remove(index);
            self.spare_chunk(chunk);
        }

        // Give one spare back once the pool is mostly empty; always keep at
        // least one chunk around.
        if self.chunk_count() > 1
            && !self.spares.is_empty()
            && self.total_size - self.spares[0].chunk_size() >= 2 * self.used_size
        {
            let released = self.spares.remove(0);
            self.release_chunk(released);
        }
    }

    fn grow_chunk_size(&mut self) {
        let next = self.current_chunk_size * 2;
        if next <= self.max_chunk_size {
            self.current_chunk_size = next;
            debug!(
                "grow memory pool: block size = {}, {} chunks, {} bytes per chunk ({}/{})",
                self.block_size,
                self.chunk_count(),
                self.current_chunk_size,
                self.used_size,
                self.total_size
            );
        }
    }

    fn spare_chunk(&mut self, chunk: Box<PoolChunk>) {
        debug_assert!(chunk.completely_free());
        let at = self
            .spares
            .partition_point(|c| c.chunk_size() < chunk.chunk_size());
        self.spares.insert(at, chunk);
    }

    fn release_chunk(&mut self, chunk: Box<PoolChunk>) {
        debug_assert!(self.total_size >= chunk.chunk_size());
        self.total_size -= chunk.chunk_size();
        debug!(
            "release memory chunk: block size = {}, chunk size = {}, {} chunks remaining",
            self.block_size,
            chunk.chunk_size(),
            self.chunk_count()
        );
        drop(chunk);
    }

    /// Releases every chunk; panics if any block is still allocated.
    pub fn clear_assert_completely_free(&mut self) {
        for chunk in &self.chunks {
            assert!(
                chunk.completely_free(),
                "memory pool leak: {} block(s) of {} bytes still allocated",
                chunk.block_used,
                self.block_size
            );
        }
        self.force_clear();
    }

    /// Releases every chunk even if blocks are still allocated.
    pub fn clear_ignore_leaks(&mut self) {
        if self.used_size > 0 {
            warn!(
                "memory pool leaking {} bytes in blocks of {}",
                self.used_size, self.block_size
            );
        }
        self.used_size = 0;
        self.force_clear();
    }

    /// Releases spares and drained chunks; chunks still serving blocks stay.
    pub fn clear_unused_memory(&mut self) {
        let mut index = 0;
        while index < self.chunks.len() {
            if self.chunks[index].completely_free() {
                let chunk = self.chunks.remove(index);
                self.release_chunk(chunk);
            } else {
                index += 1;
            }
        }
        while let Some(chunk) = self.spares.pop() {
            self.release_chunk(chunk);
        }
    }

    fn force_clear(&mut self) {
        while let Some(chunk) = self.chunks.pop() {
            // A forced clear drops live free-list bookkeeping with the chunk.
            let mut chunk = chunk;
            chunk.block_used = 0;
            self.release_chunk(chunk);
        }
        while let Some(chunk) = self.spares.pop() {
            self.release_chunk(chunk);
        }
        self.current_chunk_size = {
            let mut size = self.min_chunk_size;
            while (MIN_BLOCKS_PER_CHUNK + 1) * self.block_size > size {
                size *= 2;
            }
            size
        };
        debug_assert_eq!(self.total_size, 0);
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        if thread::panicking() {
            self.clear_ignore_leaks();
        } else {
            self.clear_assert_completely_free();
        }
    }
}

/// Mutex-serialized pool wrapper; the thread-safety policy is chosen at
/// construction and never changes.
pub struct ThreadSafePool {
    inner: Mutex<MemoryPool>,
}

impl ThreadSafePool {
    pub fn new(pool: MemoryPool) -> Arc<Self> {
        Arc::new(ThreadSafePool {
            inner: Mutex::new(pool),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryPool> {
        self.inner.lock().expect("memory pool poisoned")
    }

    pub fn allocate(&self) -> NonNull<u8> {
        self.lock().allocate()
    }

    /// # Safety
    /// Same contract as [`MemoryPool::deallocate`].
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        self.lock().deallocate(ptr)
    }

    pub fn clear_assert_completely_free(&self) {
        self.lock().clear_assert_completely_free()
    }

    pub fn clear_ignore_leaks(&self) {
        self.lock().clear_ignore_leaks()
    }

    pub fn clear_unused_memory(&self) {
        self.lock().clear_unused_memory()
    }

    pub fn block_size(&self) -> usize {
        self.lock().block_size()
    }

    pub fn used_size(&self) -> usize {
        self.lock().used_size()
    }

    pub fn total_size(&self) -> usize {
        self.lock().total_size()
    }

    pub fn chunk_count(&self) -> usize {
        self.lock().chunk_count()
    }
}

/// Pool wrapper that asserts the calling thread matches its creation
/// thread on every operation.
pub struct ThreadLocalPool {
    owner: ThreadId,
    inner: RefCell<MemoryPool>,
}

impl ThreadLocalPool {
    pub fn new(pool: MemoryPool) -> Self {
        ThreadLocalPool {
            owner: thread::current().id(),
            inner: RefCell::new(pool),
        }
    }

    fn check_thread(&self) {
        assert_eq!(
            thread::current().id(),
            self.owner,
            "thread-local pool accessed from a foreign thread"
        );
    }

    pub fn allocate(&self) -> NonNull<u8> {
        self.check_thread();
        self.inner.borrow_mut().allocate()
    }

    /// # Safety
    /// Same contract as [`MemoryPool::deallocate`].
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        self.check_thread();
        self.inner.borrow_mut().deallocate(ptr)
    }

    pub fn clear_assert_completely_free(&self) {
        self.check_thread();
        self.inner.borrow_mut().clear_assert_completely_free()
    }

    pub fn clear_ignore_leaks(&self) {
        self.check_thread();
        self.inner.borrow_mut().clear_ignore_leaks()
    }

    pub fn clear_unused_memory(&self) {
        self.check_thread();
        self.inner.borrow_mut().clear_unused_memory()
    }

    pub fn used_size(&self) -> usize {
        self.check_thread();
        self.inner.borrow().used_size()
    }

    pub fn chunk_count(&self) -> usize {
        self.check_thread();
        self.inner.borrow().chunk_count()
    }
}

/// Pool-backed [`DomainAllocator`] for node-sized requests.
pub struct PoolAllocator {
    pool: Arc<ThreadSafePool>,
}

impl PoolAllocator {
    pub fn new(pool: Arc<ThreadSafePool>) -> Self {
        PoolAllocator { pool }
    }
}

impl DomainAllocator for PoolAllocator {
    fn domain_name(&self) -> &'static str {
        PoolStorageDomain::NAME
    }

    fn kind(&self) -> AllocatorKind {
        AllocatorKind::Pool
    }

    fn allocate(&self, layout: Layout) -> NonNull<u8> {
        assert!(
            layout.size() <= self.pool.block_size() && layout.align() <= ALLOCATION_BOUNDARY,
            "layout {}x{} exceeds pool block size {}",
            layout.size(),
            layout.align(),
            self.pool.block_size()
        );
        self.pool.allocate()
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, _layout: Layout) {
        self.pool.deallocate(ptr)
    }

    fn snap(&self, layout: Layout) -> Layout {
        Layout::from_size_align(self.pool.block_size(), layout.align())
            .expect("pool layout overflow")
    }

    fn can_steal(&self, other: &dyn DomainAllocator) -> bool {
        // Blocks may only return to the very pool that served them.
        other.kind() == AllocatorKind::Pool
            && std::ptr::eq(
                self as *const Self as *const u8,
                other as *const dyn DomainAllocator as *const u8,
            )
    }
}

/// Typed facade over a single-threaded pool: `allocate(value)` places the
/// value in a pool block and returns an owning [`PoolBox`].
pub struct TypedPool<T> {
    inner: RefCell<MemoryPool>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> TypedPool<T> {
    pub fn new() -> Self {
        let block_size = mem::size_of::<T>().max(mem::size_of::<FreeBlock>());
        assert!(mem::align_of::<T>() <= ALLOCATION_BOUNDARY);
        TypedPool {
            inner: RefCell::new(MemoryPool::with_default_chunks(block_size)),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn allocate(&self, value: T) -> PoolBox<'_, T> {
        let block = self.inner.borrow_mut().allocate().cast::<T>();
        unsafe { block.as_ptr().write(value) };
        PoolBox { ptr: block, pool: self }
    }

    pub fn used_size(&self) -> usize {
        self.inner.borrow().used_size()
    }

    pub fn chunk_count(&self) -> usize {
        self.inner.borrow().chunk_count()
    }

    pub fn clear_unused_memory(&self) {
        self.inner.borrow_mut().clear_unused_memory()
    }
}

impl<T> Default for TypedPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Owning handle to a pool block; drops the value and returns the block.
pub struct PoolBox<'a, T> {
    ptr: NonNull<T>,
    pool: &'a TypedPool<T>,
}

impl<T> Deref for PoolBox<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for PoolBox<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for PoolBox<'_, T> {
    fn drop(&mut self) {
        unsafe {
            self.ptr.as_ptr().drop_in_place();
            self.pool.inner.borrow_mut().deallocate(self.ptr.cast());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_do_not_overlap() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut pool = MemoryPool::new(64, 1 << 10, 8 << 10);
        let mut blocks = Vec::new();
        for _ in 0..50 {
            let ptr = pool.allocate();
            unsafe { ptr.as_ptr().write_bytes(0xCD, 64) };
            blocks.push(ptr);
        }

        blocks.sort_by_key(|p| p.as_ptr() as usize);
        for pair in blocks.windows(2) {
            assert!(pair[0].as_ptr() as usize + 64 <= pair[1].as_ptr() as usize);
        }

        for ptr in blocks {
            unsafe { pool.deallocate(ptr) };
        }
        assert_eq!(pool.used_size(), 0);
    }

    #[test]
    fn test_freed_blocks_are_reallocatable() {
        let mut pool = MemoryPool::new(32, 1 << 10, 8 << 10);
        let first = pool.allocate();
        unsafe { pool.deallocate(first) };
        let second = pool.allocate();
        // LIFO free list hands the same block back.
        assert_eq!(first, second);
        unsafe { pool.deallocate(second) };
    }

    #[test]
    fn test_chunk_growth_doubles_up_to_max() {
        let mut pool = MemoryPool::new(64, 1 << 10, 4 << 10);
        let initial = pool.current_chunk_size();

        let mut blocks = Vec::new();
        // Exhaust enough chunks to force growth past the ceiling.
        for _ in 0..500 {
            blocks.push(pool.allocate());
        }
        assert!(pool.current_chunk_size() >= initial);
        assert!(pool.current_chunk_size() <= 4 << 10);
        assert!(pool.chunk_count() > 1);

        for ptr in blocks {
            unsafe { pool.deallocate(ptr) };
        }
        pool.clear_ignore_leaks();
    }

    #[test]
    fn test_reclamation_modes() {
        let mut pool = MemoryPool::new(64, 1 << 10, 8 << 10);
        let mut blocks = Vec::new();
        for _ in 0..100 {
            blocks.push(pool.allocate());
        }
        for ptr in blocks {
            unsafe { pool.deallocate(ptr) };
        }

        assert_eq!(pool.used_size(), 0);
        pool.clear_unused_memory();
        assert_eq!(pool.chunk_count(), 0);
        assert_eq!(pool.total_size(), 0);
    }

    #[test]
    fn test_clear_unused_keeps_active_chunks() {
        let mut pool = MemoryPool::new(64, 1 << 10, 8 << 10);
        let keep = pool.allocate();
        let mut blocks = Vec::new();
        for _ in 0..200 {
            blocks.push(pool.allocate());
        }
        for ptr in blocks {
            unsafe { pool.deallocate(ptr) };
        }

        pool.clear_unused_memory();
        assert!(pool.chunk_count() >= 1);
        assert_eq!(pool.used_size(), pool.block_size());

        unsafe { pool.deallocate(keep) };
        pool.clear_unused_memory();
        assert_eq!(pool.chunk_count(), 0);
    }

    #[test]
    #[should_panic(expected = "memory pool leak")]
    fn test_clear_asserts_on_leak() {
        let mut pool = MemoryPool::new(64, 1 << 10, 8 << 10);
        let leaked = pool.allocate();
        let _ = leaked;
        pool.clear_assert_completely_free();
    }

    #[test]
    fn test_thread_safe_wrapper() {
        let pool = ThreadSafePool::new(MemoryPool::new(64, 1 << 10, 8 << 10));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                let mut blocks = Vec::new();
                for _ in 0..25 {
                    blocks.push(pool.allocate().as_ptr() as usize);
                }
                for addr in blocks {
                    unsafe { pool.deallocate(NonNull::new(addr as *mut u8).unwrap()) };
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.used_size(), 0);
    }

    #[test]
    fn test_typed_pool_box() {
        let pool = TypedPool::<[u64; 4]>::new();
        {
            let mut boxed = pool.allocate([1, 2, 3, 4]);
            boxed[0] = 42;
            assert_eq!(*boxed, [42, 2, 3, 4]);
            assert_eq!(pool.used_size(), pool.inner.borrow().block_size());
        }
        assert_eq!(pool.used_size(), 0);
        pool.clear_unused_memory();
        assert_eq!(pool.chunk_count(), 0);
    }
}
