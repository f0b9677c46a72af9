//! Allocation domains
//!
//! A domain is a compile-time tag attaching a symbolic owner to
//! allocations. Each domain owns a set of atomic counters; the process-wide
//! table supports snapshot reporting for memory diagnostics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{OnceLock, RwLock};

/// Compile-time allocation domain tag.
pub trait Domain: 'static {
    const NAME: &'static str;

    fn tracker() -> &'static DomainTracker;
}

/// Atomic allocation counters for one domain.
#[derive(Debug)]
pub struct DomainTracker {
    name: &'static str,
    live_allocations: AtomicUsize,
    live_bytes: AtomicUsize,
    total_allocations: AtomicUsize,
    peak_bytes: AtomicUsize,
}

/// Point-in-time copy of a domain's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainSnapshot {
    pub name: &'static str,
    pub live_allocations: usize,
    pub live_bytes: usize,
    pub total_allocations: usize,
    pub peak_bytes: usize,
}

impl DomainTracker {
    const fn new(name: &'static str) -> Self {
        DomainTracker {
            name,
            live_allocations: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            total_allocations: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn on_allocate(&self, bytes: usize) {
        self.live_allocations.fetch_add(1, Ordering::Relaxed);
        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        let live = self.live_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        self.peak_bytes.fetch_max(live, Ordering::Relaxed);
    }

    pub fn on_deallocate(&self, bytes: usize) {
        debug_assert!(self.live_allocations.load(Ordering::Relaxed) > 0);
        self.live_allocations.fetch_sub(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub fn live_allocations(&self) -> usize {
        self.live_allocations.load(Ordering::Relaxed)
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> DomainSnapshot {
        DomainSnapshot {
            name: self.name,
            live_allocations: self.live_allocations.load(Ordering::Relaxed),
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
            total_allocations: self.total_allocations.load(Ordering::Relaxed),
            peak_bytes: self.peak_bytes.load(Ordering::Relaxed),
        }
    }
}

fn tracker_table() -> &'static RwLock<Vec<&'static DomainTracker>> {
    static TABLE: OnceLock<RwLock<Vec<&'static DomainTracker>>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(Vec::new()))
}

fn register_tracker(tracker: &'static DomainTracker) -> &'static DomainTracker {
    tracker_table()
        .write()
        .expect("domain tracker table poisoned")
        .push(tracker);
    tracker
}

/// Snapshot every domain that allocated at least once this process.
pub fn domain_snapshots() -> Vec<DomainSnapshot> {
    tracker_table()
        .read()
        .expect("domain tracker table poisoned")
        .iter()
        .map(|t| t.snapshot())
        .collect()
}

macro_rules! declare_domain {
    ($(#[$doc:meta])* $vis:vis struct $tag:ident, $name:literal) => {
        $(#[$doc])*
        $vis struct $tag;

        impl Domain for $tag {
            const NAME: &'static str = $name;

            fn tracker() -> &'static DomainTracker {
                static TRACKER: DomainTracker = DomainTracker::new($name);
                static REGISTERED: OnceLock<()> = OnceLock::new();
                REGISTERED.get_or_init(|| {
                    register_tracker(&TRACKER);
                });
                &TRACKER
            }
        }
    };
}

declare_domain! {
    /// Generic container storage.
    pub struct ContainerDomain, "Container"
}
declare_domain! {
    /// Reflection-internal storage (traits registry, `Any` heap values).
    pub struct RttiDomain, "RTTI"
}
declare_domain! {
    /// Chunk storage owned by memory pools.
    pub struct PoolStorageDomain, "PoolStorage"
}
