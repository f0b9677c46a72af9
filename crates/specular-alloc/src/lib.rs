//! specular-alloc: domain-tagged allocation and fixed-block pools
//!
//! Every allocation in the reflection core carries a symbolic owner (its
//! [`Domain`]), tracked by process-wide counters. On top of that sit the
//! allocator policies ([`DefaultAllocator`], [`PoolAllocator`],
//! [`ThreadLocalArena`], [`InSituBuffer`]) and the fixed-block
//! [`MemoryPool`] engine with chunk growth/shrink, spare-list recycling and
//! a [`PoolRegistry`] for bulk reclamation under memory pressure.

mod allocator;
mod domain;
mod pool;
mod registry;

pub use allocator::{
    snap_size, AllocatorKind, DefaultAllocator, DomainAllocator, InSituBuffer, ThreadLocalArena,
};
pub use domain::{
    domain_snapshots, ContainerDomain, Domain, DomainSnapshot, DomainTracker, PoolStorageDomain,
    RttiDomain,
};
pub use pool::{MemoryPool, PoolAllocator, PoolBox, ThreadLocalPool, ThreadSafePool, TypedPool};
pub use registry::{pool_registry, PoolRegistry};
