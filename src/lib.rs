//! Specular - a reflection and transaction core
//!
//! This is the root workspace crate: it re-exports the member crates and
//! owns the process-wide lifecycle. The actual implementation lives in
//! `crates/specular-types` (structural identity), `crates/specular-alloc`
//! (domains and pools) and `crates/specular-rtti` (traits, atoms, objects,
//! transactions, database).

pub use specular_alloc as alloc;
pub use specular_rtti as rtti;
pub use specular_types as types;

use log::info;
use specular_alloc::{pool_registry, ContainerDomain, Domain, PoolStorageDomain, RttiDomain};
use specular_rtti::{database, traits_of, Any, Atom, Describable, ObjRef};
use specular_types::Name;

/// How [`shutdown`] reclaims the pool registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaim {
    /// Every pool must be completely free; leaks abort.
    AssertCompletelyFree,
    /// Leaks are logged and ignored.
    IgnoreLeaks,
}

/// Initializes process-wide state in dependency order: domain trackers,
/// native type registry, meta database, pool registry. Idempotent.
pub fn startup() {
    let _ = ContainerDomain::tracker();
    let _ = RttiDomain::tracker();
    let _ = PoolStorageDomain::tracker();

    register_native_types();

    let _ = database();
    let _ = pool_registry();

    info!("specular core started");
}

/// Tears process-wide state down in reverse creation order.
pub fn shutdown(reclaim: Reclaim) {
    match reclaim {
        Reclaim::AssertCompletelyFree => pool_registry().clear_all_assert_completely_free(),
        Reclaim::IgnoreLeaks => pool_registry().clear_all_ignore_leaks(),
    }

    for snapshot in specular_alloc::domain_snapshots() {
        info!(
            "domain '{}': {} live allocations, {} live bytes (peak {})",
            snapshot.name, snapshot.live_allocations, snapshot.live_bytes, snapshot.peak_bytes
        );
    }

    info!("specular core stopped");
}

/// Pre-interns the traits of every native scalar and a few common
/// composites so lookups by structural id work from the first frame.
fn register_native_types() {
    let _ = traits_of::<bool>();
    let _ = traits_of::<i8>();
    let _ = traits_of::<i16>();
    let _ = traits_of::<i32>();
    let _ = traits_of::<i64>();
    let _ = traits_of::<u8>();
    let _ = traits_of::<u16>();
    let _ = traits_of::<u32>();
    let _ = traits_of::<u64>();
    let _ = traits_of::<f32>();
    let _ = traits_of::<f64>();
    let _ = traits_of::<String>();
    let _ = traits_of::<Name>();
    let _ = traits_of::<std::path::PathBuf>();
    let _ = traits_of::<specular_rtti::Blob>();
    let _ = traits_of::<Any>();
}

/// Resolves `"namespace/name"` through the database.
pub fn find_object_by_path(path: &str) -> Option<ObjRef> {
    database().find_object_by_path(path)
}

/// Builds an [`Any`] out of any described value.
pub fn make_any<T: Describable>(value: T) -> Any {
    Any::new(value)
}

/// Builds an [`Atom`] view over any described value.
pub fn make_atom<T: Describable>(value: &mut T) -> Atom<'_> {
    Atom::new(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_is_idempotent() {
        startup();
        startup();
        assert!(find_object_by_path("nowhere/nothing").is_none());
    }

    #[test]
    fn test_ad_hoc_construction() {
        startup();
        let mut value = 5_i64;
        let atom = make_atom(&mut value);
        assert_eq!(*atom.typed_data::<i64>(), 5);

        let mut any = make_any("hi".to_string());
        assert_eq!(any.downcast_mut::<String>().unwrap(), "hi");
    }
}
