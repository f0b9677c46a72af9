//! Pair traits
//!
//! `(A, B)` tuples are described as pairs; visitation, deep comparison and
//! promotion recurse into the two sub-atoms.

use std::hash::Hasher;
use std::marker::PhantomData;

use specular_types::TypeInfos;

use crate::any::promote_prologue;
use crate::atom::Atom;
use crate::traits::{intern, Describable, TypeTraits};
use crate::value::DescribableValue;
use crate::visitor::AtomVisitor;

/// Category view over pair traits.
pub trait PairTraits: TypeTraits {
    fn first_traits(&self) -> &'static dyn TypeTraits;

    fn second_traits(&self) -> &'static dyn TypeTraits;

    fn first<'a>(&self, atom: Atom<'a>) -> Atom<'a>;

    fn second<'a>(&self, atom: Atom<'a>) -> Atom<'a>;
}

pub(crate) struct PairTraitsImpl<A, B> {
    infos: TypeInfos,
    _marker: PhantomData<fn() -> (A, B)>,
}

impl<A: DescribableValue, B: DescribableValue> PairTraitsImpl<A, B> {
    fn new() -> Self {
        PairTraitsImpl {
            infos: TypeInfos::pair(
                A::traits().type_infos(),
                B::traits().type_infos(),
                std::mem::size_of::<(A, B)>(),
                std::mem::align_of::<(A, B)>(),
            ),
            _marker: PhantomData,
        }
    }
}

impl<A: DescribableValue, B: DescribableValue> Describable for (A, B) {
    fn traits() -> &'static dyn TypeTraits {
        intern::<(A, B)>(|| Box::new(PairTraitsImpl::<A, B>::new()))
    }
}

impl<A: DescribableValue, B: DescribableValue> TypeTraits for PairTraitsImpl<A, B> {
    fn type_infos(&self) -> &TypeInfos {
        &self.infos
    }

    fn static_handle(&self) -> &'static dyn TypeTraits {
        <(A, B)>::traits()
    }

    unsafe fn create(&self, dst: *mut u8) {
        dst.cast::<(A, B)>().write((A::default(), B::default()));
    }

    unsafe fn create_copy(&self, dst: *mut u8, src: *const u8) {
        dst.cast::<(A, B)>().write((*src.cast::<(A, B)>()).clone());
    }

    unsafe fn create_move(&self, dst: *mut u8, src: *mut u8) {
        dst.cast::<(A, B)>()
            .write(std::mem::take(&mut *src.cast::<(A, B)>()));
    }

    unsafe fn destroy(&self, data: *mut u8) {
        data.cast::<(A, B)>().drop_in_place();
    }

    unsafe fn is_default_value(&self, data: *const u8) -> bool {
        *data.cast::<(A, B)>() == (A::default(), B::default())
    }

    unsafe fn reset_to_default(&self, data: *mut u8) {
        *data.cast::<(A, B)>() = (A::default(), B::default());
    }

    unsafe fn equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        *lhs.cast::<(A, B)>() == *rhs.cast::<(A, B)>()
    }

    unsafe fn hash_value(&self, data: *const u8, state: &mut dyn Hasher) {
        let pair = &mut *(data as *mut (A, B));
        Atom::new(&mut pair.0).hash_into(state);
        Atom::new(&mut pair.1).hash_into(state);
    }

    unsafe fn deep_equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        let l = &mut *(lhs as *mut (A, B));
        let r = &mut *(rhs as *mut (A, B));
        Atom::new(&mut l.0).deep_equals(&Atom::new(&mut r.0))
            && Atom::new(&mut l.1).deep_equals(&Atom::new(&mut r.1))
    }

    unsafe fn deep_copy(&self, src: *const u8, dst: *mut u8) {
        let s = &mut *(src as *mut (A, B));
        let d = &mut *dst.cast::<(A, B)>();
        Atom::new(&mut s.0).deep_copy_to(&Atom::new(&mut d.0));
        Atom::new(&mut s.1).deep_copy_to(&Atom::new(&mut d.1));
    }

    unsafe fn promote_copy(&self, src: *const u8, dst: Atom<'_>) -> bool {
        if let Some(done) = promote_prologue(self, src, &dst) {
            return done;
        }
        let Some(dst_pair) = dst.traits().as_pair() else {
            return false;
        };
        let s = &mut *(src as *mut (A, B));
        Atom::new(&mut s.0).promote_copy_to(&dst_pair.first(dst))
            && Atom::new(&mut s.1).promote_copy_to(&dst_pair.second(dst))
    }

    unsafe fn promote_move(&self, src: *mut u8, dst: Atom<'_>) -> bool {
        if self.promote_copy(src, dst) {
            self.reset_to_default(src);
            true
        } else {
            false
        }
    }

    fn common_type(&self, other: &'static dyn TypeTraits) -> Option<&'static dyn TypeTraits> {
        if crate::traits::same_traits(self, other) {
            return Some(other);
        }
        let other_pair = other.as_pair()?;
        let first = A::traits().common_type(other_pair.first_traits())?;
        let second = B::traits().common_type(other_pair.second_traits())?;
        crate::traits::find_traits(specular_types::TypeId::combine(
            specular_types::TypeFlags::PAIR,
            &[first.id(), second.id()],
        ))
    }

    fn as_pair(&self) -> Option<&dyn PairTraits> {
        Some(self)
    }

    fn accept(&self, atom: Atom<'_>, visitor: &mut dyn AtomVisitor) -> bool {
        visitor.visit_pair(self, atom)
    }
}

impl<A: DescribableValue, B: DescribableValue> PairTraits for PairTraitsImpl<A, B> {
    fn first_traits(&self) -> &'static dyn TypeTraits {
        A::traits()
    }

    fn second_traits(&self) -> &'static dyn TypeTraits {
        B::traits()
    }

    fn first<'a>(&self, atom: Atom<'a>) -> Atom<'a> {
        let pair = atom.typed_data::<(A, B)>();
        Atom::new(&mut pair.0)
    }

    fn second<'a>(&self, atom: Atom<'a>) -> Atom<'a> {
        let pair = atom.typed_data::<(A, B)>();
        Atom::new(&mut pair.1)
    }
}
