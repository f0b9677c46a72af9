//! Any: a self-contained described value
//!
//! An [`Any`] owns a value together with its traits. Small values (one
//! cache line, alignment up to 16) are stored inline; larger ones are
//! heap-allocated through the RTTI domain allocator. An empty `Any` has no
//! traits.

use std::alloc::Layout;
use std::fmt;
use std::hash::Hasher;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use specular_alloc::{DefaultAllocator, DomainAllocator, RttiDomain};
use specular_types::{NativeType, TypeInfos};

use crate::atom::Atom;
use crate::scalar::ScalarTraits;
use crate::traits::{intern, same_traits, traits_of, Describable, TypeTraits};
use crate::visitor::AtomVisitor;

/// Values at most this large (and at most 16-aligned) live inline.
pub const ANY_INLINE_CAP: usize = 64;

const ANY_INLINE_ALIGN: usize = 16;

#[repr(C, align(16))]
struct InlineStorage([MaybeUninit<u8>; ANY_INLINE_CAP]);

enum AnyStorage {
    Empty,
    Inline(InlineStorage),
    Heap(NonNull<u8>, Layout),
}

// The wrapped value is Send + Sync by the `Describable` contract.
unsafe impl Send for AnyStorage {}
unsafe impl Sync for AnyStorage {}

fn heap_allocator() -> DefaultAllocator<RttiDomain> {
    DefaultAllocator::new()
}

fn fits_inline(infos: &TypeInfos) -> bool {
    infos.size() <= ANY_INLINE_CAP && infos.align() <= ANY_INLINE_ALIGN
}

/// Self-owning `(value, traits)`; the storage-owning counterpart of
/// [`Atom`].
pub struct Any {
    traits: Option<&'static dyn TypeTraits>,
    storage: AnyStorage,
}

impl Any {
    pub fn empty() -> Self {
        Any {
            traits: None,
            storage: AnyStorage::Empty,
        }
    }

    pub fn new<T: Describable>(value: T) -> Self {
        let mut out = Any::empty();
        out.assign(value);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.traits.is_none()
    }

    pub fn traits(&self) -> Option<&'static dyn TypeTraits> {
        self.traits
    }

    fn data_ptr(&mut self) -> Option<NonNull<u8>> {
        match &mut self.storage {
            AnyStorage::Empty => None,
            AnyStorage::Inline(buffer) => {
                Some(unsafe { NonNull::new_unchecked(buffer.0.as_mut_ptr().cast::<u8>()) })
            }
            AnyStorage::Heap(ptr, _) => Some(*ptr),
        }
    }

    fn data_ptr_const(&self) -> Option<NonNull<u8>> {
        match &self.storage {
            AnyStorage::Empty => None,
            AnyStorage::Inline(buffer) => Some(unsafe {
                NonNull::new_unchecked(buffer.0.as_ptr().cast::<u8>().cast_mut())
            }),
            AnyStorage::Heap(ptr, _) => Some(*ptr),
        }
    }

    /// Allocates storage fitting `infos` without constructing a value.
    fn prepare_storage(&mut self, infos: &TypeInfos) -> NonNull<u8> {
        debug_assert!(matches!(self.storage, AnyStorage::Empty));
        if fits_inline(infos) {
            self.storage = AnyStorage::Inline(InlineStorage([MaybeUninit::uninit(); ANY_INLINE_CAP]));
        } else {
            let layout = Layout::from_size_align(infos.size().max(1), infos.align())
                .expect("described layout overflow");
            let ptr = heap_allocator().allocate(layout);
            self.storage = AnyStorage::Heap(ptr, layout);
        }
        self.data_ptr().expect("storage just prepared")
    }

    /// Destroys the wrapped value and returns to the empty state.
    pub fn clear(&mut self) {
        if let Some(traits) = self.traits.take() {
            if let Some(ptr) = self.data_ptr() {
                unsafe { traits.destroy(ptr.as_ptr()) };
            }
        }
        if let AnyStorage::Heap(ptr, layout) = self.storage {
            unsafe { heap_allocator().deallocate(ptr, layout) };
        }
        self.storage = AnyStorage::Empty;
    }

    /// Replaces the wrapped value, capturing the traits of `T`.
    pub fn assign<T: Describable>(&mut self, value: T) {
        self.clear();
        let traits = T::traits();
        let ptr = self.prepare_storage(traits.type_infos());
        unsafe { ptr.cast::<T>().as_ptr().write(value) };
        self.traits = Some(traits);
    }

    /// Default-constructs a value of the given type in place and returns
    /// its atom.
    pub fn reset(&mut self, traits: &'static dyn TypeTraits) -> Atom<'_> {
        self.clear();
        let ptr = self.prepare_storage(traits.type_infos());
        unsafe { traits.create(ptr.as_ptr()) };
        self.traits = Some(traits);
        unsafe { Atom::from_raw_parts(ptr, traits) }
    }

    /// Copy-constructs a described value out of raw parts.
    pub(crate) fn from_raw_copy(traits: &'static dyn TypeTraits, src: *const u8) -> Self {
        let mut out = Any::empty();
        let ptr = out.prepare_storage(traits.type_infos());
        unsafe { traits.create_copy(ptr.as_ptr(), src) };
        out.traits = Some(traits);
        out
    }

    /// View of the wrapped value, if any.
    pub fn inner_atom(&mut self) -> Option<Atom<'_>> {
        let traits = self.traits?;
        let ptr = self.data_ptr()?;
        Some(unsafe { Atom::from_raw_parts(ptr, traits) })
    }

    /// Typed view of the wrapped value.
    pub fn downcast_mut<T: Describable>(&mut self) -> Option<&mut T> {
        let traits = self.traits?;
        if !same_traits(traits, T::traits()) {
            return None;
        }
        let ptr = self.data_ptr()?;
        Some(unsafe { &mut *ptr.cast::<T>().as_ptr() })
    }
}

impl Default for Any {
    fn default() -> Self {
        Any::empty()
    }
}

impl Drop for Any {
    fn drop(&mut self) {
        self.clear();
    }
}

impl Clone for Any {
    fn clone(&self) -> Self {
        match (self.traits, self.data_ptr_const()) {
            (Some(traits), Some(ptr)) => Any::from_raw_copy(traits, ptr.as_ptr()),
            _ => Any::empty(),
        }
    }
}

impl PartialEq for Any {
    fn eq(&self, other: &Self) -> bool {
        match (
            self.traits,
            other.traits,
            self.data_ptr_const(),
            other.data_ptr_const(),
        ) {
            (None, None, _, _) => true,
            (Some(a), Some(b), Some(pa), Some(pb)) => {
                same_traits(a, b) && unsafe { a.equals(pa.as_ptr(), pb.as_ptr()) }
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.traits {
            Some(traits) => write!(f, "Any({})", traits.type_infos().name()),
            None => f.write_str("Any(empty)"),
        }
    }
}

/// Same-type and into-`Any` promotion cases shared by every traits impl.
///
/// # Safety
/// `src` must be a live value described by `traits`.
pub(crate) unsafe fn promote_prologue(
    traits: &dyn TypeTraits,
    src: *const u8,
    dst: &Atom<'_>,
) -> Option<bool> {
    if same_traits(traits, dst.traits()) {
        traits.deep_copy(src, dst.data().as_ptr());
        return Some(true);
    }
    if same_traits(dst.traits(), traits_of::<Any>()) {
        *dst.typed_data_unchecked::<Any>() = Any::from_raw_copy(traits.static_handle(), src);
        return Some(true);
    }
    None
}

struct AnyTraitsImpl {
    infos: TypeInfos,
}

impl AnyTraitsImpl {
    fn new() -> Self {
        AnyTraitsImpl {
            infos: TypeInfos::scalar(
                NativeType::Any,
                std::mem::size_of::<Any>(),
                std::mem::align_of::<Any>(),
            ),
        }
    }
}

impl Describable for Any {
    fn traits() -> &'static dyn TypeTraits {
        intern::<Any>(|| Box::new(AnyTraitsImpl::new()))
    }
}

impl TypeTraits for AnyTraitsImpl {
    fn type_infos(&self) -> &TypeInfos {
        &self.infos
    }

    fn static_handle(&self) -> &'static dyn TypeTraits {
        traits_of::<Any>()
    }

    unsafe fn create(&self, dst: *mut u8) {
        dst.cast::<Any>().write(Any::empty());
    }

    unsafe fn create_copy(&self, dst: *mut u8, src: *const u8) {
        dst.cast::<Any>().write((*src.cast::<Any>()).clone());
    }

    unsafe fn create_move(&self, dst: *mut u8, src: *mut u8) {
        dst.cast::<Any>()
            .write(std::mem::take(&mut *src.cast::<Any>()));
    }

    unsafe fn destroy(&self, data: *mut u8) {
        data.cast::<Any>().drop_in_place();
    }

    unsafe fn is_default_value(&self, data: *const u8) -> bool {
        (*data.cast::<Any>()).is_empty()
    }

    unsafe fn reset_to_default(&self, data: *mut u8) {
        (*data.cast::<Any>()).clear();
    }

    unsafe fn equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        *lhs.cast::<Any>() == *rhs.cast::<Any>()
    }

    unsafe fn hash_value(&self, data: *const u8, state: &mut dyn Hasher) {
        let any = &mut *(data as *mut Any);
        match any.inner_atom() {
            Some(inner) => inner.hash_into(state),
            None => state.write_u8(0),
        }
    }

    unsafe fn deep_equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        let l = &mut *(lhs as *mut Any);
        let r = &mut *(rhs as *mut Any);
        match (l.inner_atom(), r.inner_atom()) {
            (None, None) => true,
            (Some(a), Some(b)) => a.deep_equals(&b),
            _ => false,
        }
    }

    unsafe fn deep_copy(&self, src: *const u8, dst: *mut u8) {
        let s = &mut *(src as *mut Any);
        let d = &mut *dst.cast::<Any>();
        match s.inner_atom() {
            Some(inner) => {
                let slot = d.reset(inner.traits());
                inner.deep_copy_to(&slot);
            }
            None => d.clear(),
        }
    }

    unsafe fn promote_copy(&self, src: *const u8, dst: Atom<'_>) -> bool {
        if same_traits(dst.traits(), traits_of::<Any>()) {
            self.deep_copy(src, dst.data().as_ptr());
            return true;
        }
        // Unwrap: the inner value promotes on its own.
        let any = &mut *(src as *mut Any);
        match any.inner_atom() {
            Some(inner) => inner.promote_copy_to(&dst),
            None => false,
        }
    }

    unsafe fn promote_move(&self, src: *mut u8, dst: Atom<'_>) -> bool {
        if self.promote_copy(src, dst) {
            (*src.cast::<Any>()).clear();
            true
        } else {
            false
        }
    }

    fn common_type(&self, other: &'static dyn TypeTraits) -> Option<&'static dyn TypeTraits> {
        if same_traits(self, other) {
            Some(other)
        } else {
            None
        }
    }

    fn as_scalar(&self) -> Option<&dyn ScalarTraits> {
        Some(self)
    }

    fn accept(&self, atom: Atom<'_>, visitor: &mut dyn AtomVisitor) -> bool {
        // A non-empty Any is visited as its wrapped value.
        let any = atom.typed_data::<Any>();
        match any.inner_atom() {
            Some(inner) => inner.accept(visitor),
            None => true,
        }
    }
}

impl ScalarTraits for AnyTraitsImpl {
    fn native_type(&self) -> NativeType {
        NativeType::Any
    }

    fn visit_typed(&self, atom: Atom<'_>, visitor: &mut dyn AtomVisitor) -> bool {
        self.accept(atom, visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_and_heap_storage() {
        let small = Any::new(42_i32);
        assert!(matches!(small.storage, AnyStorage::Inline(_)));

        let big = Any::new((
            ("a".to_string(), "b".to_string()),
            ("c".to_string(), "d".to_string()),
        ));
        assert!(matches!(big.storage, AnyStorage::Heap(..)));
    }

    #[test]
    fn test_roundtrip() {
        let mut any = Any::new("hello".to_string());
        assert_eq!(any.downcast_mut::<String>().unwrap(), "hello");
        assert!(any.downcast_mut::<i32>().is_none());
    }

    #[test]
    fn test_clone_recurses_through_traits() {
        let original = Any::new(vec![1_i32, 2, 3]);
        let mut copy = original.clone();
        assert_eq!(copy.downcast_mut::<Vec<i32>>().unwrap(), &vec![1, 2, 3]);
        assert_eq!(original, copy);
    }

    #[test]
    fn test_reset_builds_default_value() {
        let mut any = Any::empty();
        let atom = any.reset(traits_of::<u64>());
        assert!(atom.is_default());
        *atom.typed_data::<u64>() = 9;
        assert_eq!(*any.downcast_mut::<u64>().unwrap(), 9);
    }

    #[test]
    fn test_promotion_into_any() {
        let mut value = 13_i32;
        let mut slot = Any::empty();
        // Promoting into an Any captures the source type.
        let slot_atom = Atom::new(&mut slot);
        assert!(Atom::new(&mut value).promote_copy_to(&slot_atom));
        assert_eq!(*slot.downcast_mut::<i32>().unwrap(), 13);
    }

    #[test]
    fn test_promotion_out_of_any() {
        let mut any = Any::new(5_i32);
        let mut wide = 0_i64;
        let dst = Atom::new(&mut wide);
        let inner = any.inner_atom().unwrap();
        assert!(inner.promote_copy_to(&dst));
        assert_eq!(wide, 5);
    }

    #[test]
    fn test_empty_any_equality() {
        assert_eq!(Any::empty(), Any::empty());
        assert_ne!(Any::empty(), Any::new(1_u8));
    }
}
