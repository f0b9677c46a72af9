//! The erased type-descriptor interface
//!
//! [`TypeTraits`] is the single point of erasure of the reflection core:
//! every described type has one process-global, immutable traits instance
//! implementing creation, comparison, promotion and visitation over raw
//! storage. Clients hold traits by `&'static dyn` handle and manipulate
//! values through [`Atom`](crate::Atom) views.

use std::any::TypeId as RustTypeId;
use std::collections::HashMap;
use std::hash::Hasher;
use std::ptr::NonNull;
use std::sync::{OnceLock, RwLock};

use specular_types::{TypeId, TypeInfos};

use crate::atom::Atom;
use crate::visitor::AtomVisitor;

/// Ties a Rust type to its process-global traits instance.
pub trait Describable: Send + Sync + 'static {
    fn traits() -> &'static dyn TypeTraits;
}

/// Shorthand for `T::traits()`.
pub fn traits_of<T: Describable>() -> &'static dyn TypeTraits {
    T::traits()
}

/// Instance identity of two traits handles.
///
/// Two distinct container types may share one *structural* id (`Vec<i32>`
/// and `VecDeque<i32>` are both `List<I32>`); typed operations gate on the
/// interned instance instead, which is unique per Rust type.
pub fn same_traits(a: &dyn TypeTraits, b: &dyn TypeTraits) -> bool {
    std::ptr::eq(
        a as *const dyn TypeTraits as *const u8,
        b as *const dyn TypeTraits as *const u8,
    )
}

/// Erased descriptor of one described type.
///
/// The raw-pointer methods all share the same contract: the pointer(s) must
/// address a live, correctly aligned value of the described type, unaliased
/// for the duration of the call. [`Atom`] upholds this for its borrow.
pub trait TypeTraits: Send + Sync {
    fn type_infos(&self) -> &TypeInfos;

    fn id(&self) -> TypeId {
        self.type_infos().id()
    }

    /// The interned `'static` handle of this very instance.
    fn static_handle(&self) -> &'static dyn TypeTraits;

    /// # Safety
    /// `dst` must point at uninitialized storage fitting the described type.
    unsafe fn create(&self, dst: *mut u8);

    /// # Safety
    /// `dst` uninitialized storage, `src` a live value of the same type.
    unsafe fn create_copy(&self, dst: *mut u8, src: *const u8);

    /// Move-constructs into `dst`, leaving `src` reset to the default value.
    ///
    /// # Safety
    /// `dst` uninitialized storage, `src` a live value of the same type.
    unsafe fn create_move(&self, dst: *mut u8, src: *mut u8);

    /// # Safety
    /// `data` must be a live value of the described type; it is dead after.
    unsafe fn destroy(&self, data: *mut u8);

    /// # Safety
    /// `data` must be a live value of the described type.
    unsafe fn is_default_value(&self, data: *const u8) -> bool;

    /// # Safety
    /// `data` must be a live value of the described type.
    unsafe fn reset_to_default(&self, data: *mut u8);

    /// Shallow, stable equality.
    ///
    /// # Safety
    /// Both pointers must be live values of the described type.
    unsafe fn equals(&self, lhs: *const u8, rhs: *const u8) -> bool;

    /// # Safety
    /// `data` must be a live value of the described type.
    unsafe fn hash_value(&self, data: *const u8, state: &mut dyn Hasher);

    /// Recursive comparison through composites and reference edges.
    ///
    /// # Safety
    /// Both pointers must be live values of the described type.
    unsafe fn deep_equals(&self, lhs: *const u8, rhs: *const u8) -> bool;

    /// Recursive copy into an already-constructed value of the same type.
    ///
    /// # Safety
    /// Both pointers must be live values of the described type.
    unsafe fn deep_copy(&self, src: *const u8, dst: *mut u8);

    /// Views `data` as a value described by `dst_traits` iff it actually
    /// is one. For every leaf category that means the exact same traits
    /// instance; object references additionally walk the class tree
    /// (upcasts are statically sound, downcasts check the live object).
    ///
    /// # Safety
    /// `data` must be a live value of the described type; the returned
    /// pointer aliases it and shares its borrow.
    unsafe fn cast(
        &self,
        data: NonNull<u8>,
        dst_traits: &'static dyn TypeTraits,
    ) -> Option<NonNull<u8>> {
        if same_traits(self.static_handle(), dst_traits) {
            Some(data)
        } else {
            None
        }
    }

    /// Lossless conversion into a value of a *different* compatible type.
    /// Returns false when impossible; `dst` is unchanged in that case.
    ///
    /// # Safety
    /// `src` must be a live value of the described type.
    unsafe fn promote_copy(&self, src: *const u8, dst: Atom<'_>) -> bool;

    /// As [`promote_copy`](Self::promote_copy), but leaves `src` reset to
    /// the default value on success.
    ///
    /// # Safety
    /// `src` must be a live value of the described type.
    unsafe fn promote_move(&self, src: *mut u8, dst: Atom<'_>) -> bool;

    /// Least traits both self and `other` can promote to.
    fn common_type(
        &self,
        other: &'static dyn TypeTraits,
    ) -> Option<&'static dyn TypeTraits>;

    fn as_scalar(&self) -> Option<&dyn crate::scalar::ScalarTraits> {
        None
    }

    fn as_pair(&self) -> Option<&dyn crate::pair::PairTraits> {
        None
    }

    fn as_list(&self) -> Option<&dyn crate::list::ListTraits> {
        None
    }

    fn as_dico(&self) -> Option<&dyn crate::dico::DicoTraits> {
        None
    }

    fn as_object(&self) -> Option<&dyn crate::object::ObjectTraits> {
        None
    }

    /// Dispatches to the visitor method of this type's category.
    fn accept(&self, atom: Atom<'_>, visitor: &mut dyn AtomVisitor) -> bool;
}

struct TraitsRegistry {
    by_rust_type: RwLock<HashMap<RustTypeId, &'static dyn TypeTraits>>,
    by_structural_id: RwLock<HashMap<TypeId, &'static dyn TypeTraits>>,
}

fn registry() -> &'static TraitsRegistry {
    static REGISTRY: OnceLock<TraitsRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| TraitsRegistry {
        by_rust_type: RwLock::new(HashMap::new()),
        by_structural_id: RwLock::new(HashMap::new()),
    })
}

/// Interns the traits instance for Rust type `T`, building it on first use.
///
/// The builder runs without any registry lock held, so traits of component
/// types may be interned recursively.
pub(crate) fn intern<T: 'static>(
    make: impl FnOnce() -> Box<dyn TypeTraits>,
) -> &'static dyn TypeTraits {
    let key = RustTypeId::of::<T>();
    {
        let map = registry()
            .by_rust_type
            .read()
            .expect("traits registry poisoned");
        if let Some(existing) = map.get(&key) {
            return *existing;
        }
    }

    let built: &'static dyn TypeTraits = Box::leak(make());

    let mut map = registry()
        .by_rust_type
        .write()
        .expect("traits registry poisoned");
    if let Some(existing) = map.get(&key) {
        return *existing;
    }
    map.insert(key, built);
    registry()
        .by_structural_id
        .write()
        .expect("traits registry poisoned")
        .entry(built.id())
        .or_insert(built);
    built
}

/// Looks a traits instance up by structural id. Only types that were
/// registered (described at least once) can be found.
pub fn find_traits(id: TypeId) -> Option<&'static dyn TypeTraits> {
    registry()
        .by_structural_id
        .read()
        .expect("traits registry poisoned")
        .get(&id)
        .copied()
}
