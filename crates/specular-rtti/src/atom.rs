//! Atoms: type-erased views over live values
//!
//! An [`Atom`] pairs a pointer with the traits describing what it points
//! at. It does not own its storage; the underlying value must outlive it.
//! Atoms are the universal medium through which visitors, serializers and
//! property accessors manipulate values without generics crossing module
//! boundaries.

use std::fmt;
use std::hash::Hasher;
use std::marker::PhantomData;
use std::ptr::NonNull;

use specular_types::TypeInfos;

use crate::traits::{same_traits, Describable, TypeTraits};
use crate::visitor::AtomVisitor;

/// Non-owning `(pointer, traits)` view of a described value.
///
/// Copies of an atom alias the same value; like the raw pointer it wraps,
/// an atom performs no borrow tracking beyond its lifetime parameter.
#[derive(Clone, Copy)]
pub struct Atom<'a> {
    data: NonNull<u8>,
    traits: &'static dyn TypeTraits,
    _borrow: PhantomData<&'a ()>,
}

impl<'a> Atom<'a> {
    pub fn new<T: Describable>(value: &'a mut T) -> Atom<'a> {
        Atom {
            data: NonNull::from(value).cast(),
            traits: T::traits(),
            _borrow: PhantomData,
        }
    }

    /// # Safety
    /// `data` must point at a live value described by `traits`, valid and
    /// exclusively borrowed for `'a`.
    pub unsafe fn from_raw_parts(data: NonNull<u8>, traits: &'static dyn TypeTraits) -> Atom<'a> {
        Atom {
            data,
            traits,
            _borrow: PhantomData,
        }
    }

    pub fn traits(&self) -> &'static dyn TypeTraits {
        self.traits
    }

    pub fn type_infos(&self) -> &'static TypeInfos {
        self.traits.type_infos()
    }

    pub fn data(&self) -> NonNull<u8> {
        self.data
    }

    /// Typed access; panics if the atom's traits do not describe `T`.
    pub fn typed_data<T: Describable>(&self) -> &'a mut T {
        let expected = T::traits();
        assert!(
            same_traits(self.traits, expected),
            "traits mismatch: atom holds '{}', requested '{}'",
            self.type_infos().name(),
            expected.type_infos().name()
        );
        unsafe { &mut *self.data.cast::<T>().as_ptr() }
    }

    /// Typed access without the traits check.
    ///
    /// # Safety
    /// The atom must actually describe a value of type `T`.
    pub unsafe fn typed_data_unchecked<T>(&self) -> &'a mut T {
        &mut *self.data.cast::<T>().as_ptr()
    }

    /// Typed access through [`TypeTraits::cast`]: succeeds on the exact
    /// type, or on a compatible object-reference up-/downcast.
    pub fn cast<T: Describable>(&self) -> Option<&'a mut T> {
        let data = unsafe { self.traits.cast(self.data, T::traits())? };
        Some(unsafe { &mut *data.cast::<T>().as_ptr() })
    }

    /// Erased form of [`cast`](Self::cast): a view of the same value
    /// described by `dst_traits`, when the value actually is of that type.
    pub fn cast_to(&self, dst_traits: &'static dyn TypeTraits) -> Option<Atom<'a>> {
        let data = unsafe { self.traits.cast(self.data, dst_traits)? };
        Some(unsafe { Atom::from_raw_parts(data, dst_traits) })
    }

    /// Shallow equality; false when the traits differ.
    pub fn equals(&self, other: &Atom<'_>) -> bool {
        same_traits(self.traits, other.traits)
            && unsafe { self.traits.equals(self.data.as_ptr(), other.data.as_ptr()) }
    }

    pub fn hash_into(&self, state: &mut dyn Hasher) {
        unsafe { self.traits.hash_value(self.data.as_ptr(), state) }
    }

    /// Recursive equality through composites and reference edges.
    pub fn deep_equals(&self, other: &Atom<'_>) -> bool {
        same_traits(self.traits, other.traits)
            && unsafe { self.traits.deep_equals(self.data.as_ptr(), other.data.as_ptr()) }
    }

    /// Recursive copy into `dst`; panics if the traits differ.
    pub fn deep_copy_to(&self, dst: &Atom<'_>) {
        assert!(
            same_traits(self.traits, dst.traits),
            "deep copy between '{}' and '{}'",
            self.type_infos().name(),
            dst.type_infos().name()
        );
        unsafe { self.traits.deep_copy(self.data.as_ptr(), dst.data.as_ptr()) };
    }

    /// Lossless conversion into a different compatible type.
    pub fn promote_copy_to(&self, dst: &Atom<'_>) -> bool {
        unsafe { self.traits.promote_copy(self.data.as_ptr(), *dst) }
    }

    /// As [`promote_copy_to`](Self::promote_copy_to); resets the source on
    /// success.
    pub fn promote_move_to(&self, dst: &Atom<'_>) -> bool {
        unsafe { self.traits.promote_move(self.data.as_ptr(), *dst) }
    }

    pub fn is_default(&self) -> bool {
        unsafe { self.traits.is_default_value(self.data.as_ptr()) }
    }

    pub fn reset_to_default(&self) {
        unsafe { self.traits.reset_to_default(self.data.as_ptr()) }
    }

    /// Dispatches this value to the visitor method of its category.
    pub fn accept(&self, visitor: &mut dyn AtomVisitor) -> bool {
        self.traits.accept(*self, visitor)
    }
}

impl fmt::Debug for Atom<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Atom({} @ {:p})",
            self.type_infos().name(),
            self.data.as_ptr()
        )
    }
}

// Atoms only travel with their borrow; the pointee's own Send/Sync bounds
// are enforced by `Describable`.
unsafe impl Send for Atom<'_> {}
unsafe impl Sync for Atom<'_> {}
