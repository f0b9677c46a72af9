//! List traits
//!
//! Ordered sequences with stable insertion-order iteration. `Vec<T>` and
//! `VecDeque<T>` are both described as `List<T>` and share one structural
//! id, which makes them promotable into each other element-wise.

use std::collections::VecDeque;
use std::hash::Hasher;
use std::marker::PhantomData;

use specular_types::{TypeFlags, TypeId, TypeInfos};

use crate::any::promote_prologue;
use crate::atom::Atom;
use crate::traits::{find_traits, intern, same_traits, Describable, TypeTraits};
use crate::value::DescribableValue;
use crate::visitor::AtomVisitor;

/// Category view over list traits.
pub trait ListTraits: TypeTraits {
    fn value_traits(&self) -> &'static dyn TypeTraits;

    fn count(&self, atom: Atom<'_>) -> usize;

    fn is_empty(&self, atom: Atom<'_>) -> bool {
        self.count(atom) == 0
    }

    /// View of element `index`; panics when out of bounds.
    fn at<'a>(&self, atom: Atom<'a>, index: usize) -> Atom<'a>;

    /// Appends a default element and returns its view. Like any atom into a
    /// growable container, the view is invalidated by the next mutation.
    fn add_default<'a>(&self, atom: Atom<'a>) -> Atom<'a>;

    fn reserve(&self, atom: Atom<'_>, capacity: usize);

    fn clear(&self, atom: Atom<'_>);

    /// Clear then reserve.
    fn empty(&self, atom: Atom<'_>, capacity: usize) {
        self.clear(atom);
        self.reserve(atom, capacity);
    }

    fn remove_at(&self, atom: Atom<'_>, index: usize);

    /// Removes the first element equal to `value` under the element traits.
    fn remove_value(&self, atom: Atom<'_>, value: &Atom<'_>) -> bool;

    /// Stable iteration in insertion order.
    fn for_each(&self, atom: Atom<'_>, f: &mut dyn FnMut(Atom<'_>) -> bool) -> bool;
}

/// Storage operations a concrete list container plugs into the generic
/// descriptor.
pub(crate) trait ListStorage: Default + Clone + PartialEq + Send + Sync + 'static {
    type Item: DescribableValue;

    const CONTAINER_NAME: &'static str;

    fn len(&self) -> usize;
    fn get_mut(&mut self, index: usize) -> &mut Self::Item;
    fn push_default(&mut self) -> &mut Self::Item;
    fn reserve(&mut self, additional: usize);
    fn clear(&mut self);
    fn remove(&mut self, index: usize);
    fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut Self::Item) -> bool) -> bool;
}

impl<T: DescribableValue> ListStorage for Vec<T> {
    type Item = T;

    const CONTAINER_NAME: &'static str = "Vec";

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn get_mut(&mut self, index: usize) -> &mut T {
        &mut self[index]
    }

    fn push_default(&mut self) -> &mut T {
        self.push(T::default());
        self.last_mut().expect("just pushed")
    }

    fn reserve(&mut self, additional: usize) {
        Vec::reserve(self, additional);
    }

    fn clear(&mut self) {
        Vec::clear(self);
    }

    fn remove(&mut self, index: usize) {
        Vec::remove(self, index);
    }

    fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut T) -> bool) -> bool {
        for item in self.iter_mut() {
            if !f(item) {
                return false;
            }
        }
        true
    }
}

impl<T: DescribableValue> ListStorage for VecDeque<T> {
    type Item = T;

    const CONTAINER_NAME: &'static str = "List";

    fn len(&self) -> usize {
        VecDeque::len(self)
    }

    fn get_mut(&mut self, index: usize) -> &mut T {
        &mut self[index]
    }

    fn push_default(&mut self) -> &mut T {
        self.push_back(T::default());
        self.back_mut().expect("just pushed")
    }

    fn reserve(&mut self, additional: usize) {
        VecDeque::reserve(self, additional);
    }

    fn clear(&mut self) {
        VecDeque::clear(self);
    }

    fn remove(&mut self, index: usize) {
        let _ = VecDeque::remove(self, index);
    }

    fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut T) -> bool) -> bool {
        for item in self.iter_mut() {
            if !f(item) {
                return false;
            }
        }
        true
    }
}

pub(crate) struct ListTraitsImpl<L: ListStorage> {
    infos: TypeInfos,
    _marker: PhantomData<fn() -> L>,
}

impl<L: ListStorage + Describable> ListTraitsImpl<L> {
    fn new() -> Self {
        ListTraitsImpl {
            infos: TypeInfos::list(
                L::CONTAINER_NAME,
                L::Item::traits().type_infos(),
                std::mem::size_of::<L>(),
                std::mem::align_of::<L>(),
            ),
            _marker: PhantomData,
        }
    }

    unsafe fn storage<'a>(&self, atom: &Atom<'a>) -> &'a mut L {
        debug_assert!(same_traits(atom.traits(), self as &dyn TypeTraits));
        atom.typed_data_unchecked::<L>()
    }
}

impl<T: DescribableValue> Describable for Vec<T> {
    fn traits() -> &'static dyn TypeTraits {
        intern::<Vec<T>>(|| Box::new(ListTraitsImpl::<Vec<T>>::new()))
    }
}

impl<T: DescribableValue> Describable for VecDeque<T> {
    fn traits() -> &'static dyn TypeTraits {
        intern::<VecDeque<T>>(|| Box::new(ListTraitsImpl::<VecDeque<T>>::new()))
    }
}

impl<L: ListStorage + Describable> TypeTraits for ListTraitsImpl<L> {
    fn type_infos(&self) -> &TypeInfos {
        &self.infos
    }

    fn static_handle(&self) -> &'static dyn TypeTraits {
        L::traits()
    }

    unsafe fn create(&self, dst: *mut u8) {
        dst.cast::<L>().write(L::default());
    }

    unsafe fn create_copy(&self, dst: *mut u8, src: *const u8) {
        dst.cast::<L>().write((*src.cast::<L>()).clone());
    }

    unsafe fn create_move(&self, dst: *mut u8, src: *mut u8) {
        dst.cast::<L>().write(std::mem::take(&mut *src.cast::<L>()));
    }

    unsafe fn destroy(&self, data: *mut u8) {
        data.cast::<L>().drop_in_place();
    }

    unsafe fn is_default_value(&self, data: *const u8) -> bool {
        (*data.cast::<L>()).len() == 0
    }

    unsafe fn reset_to_default(&self, data: *mut u8) {
        (*data.cast::<L>()).clear();
    }

    unsafe fn equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        *lhs.cast::<L>() == *rhs.cast::<L>()
    }

    unsafe fn hash_value(&self, data: *const u8, state: &mut dyn Hasher) {
        let storage = &mut *(data as *mut L);
        state.write_usize(storage.len());
        storage.for_each_mut(&mut |item| {
            Atom::new(item).hash_into(state);
            true
        });
    }

    unsafe fn deep_equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        let l = &mut *(lhs as *mut L);
        let r = &mut *(rhs as *mut L);
        if l.len() != r.len() {
            return false;
        }
        for index in 0..l.len() {
            let a = Atom::new(l.get_mut(index));
            let b = Atom::new(r.get_mut(index));
            if !a.deep_equals(&b) {
                return false;
            }
        }
        true
    }

    unsafe fn deep_copy(&self, src: *const u8, dst: *mut u8) {
        let s = &mut *(src as *mut L);
        let d = &mut *dst.cast::<L>();
        d.clear();
        d.reserve(s.len());
        for index in 0..s.len() {
            let slot = Atom::new(d.push_default());
            Atom::new(s.get_mut(index)).deep_copy_to(&slot);
        }
    }

    unsafe fn promote_copy(&self, src: *const u8, dst: Atom<'_>) -> bool {
        if let Some(done) = promote_prologue(self, src, &dst) {
            return done;
        }
        let Some(dst_list) = dst.traits().as_list() else {
            return false;
        };
        let s = &mut *(src as *mut L);
        dst_list.empty(dst, s.len());
        for index in 0..s.len() {
            let slot = dst_list.add_default(dst);
            if !Atom::new(s.get_mut(index)).promote_copy_to(&slot) {
                dst_list.clear(dst);
                return false;
            }
        }
        true
    }

    unsafe fn promote_move(&self, src: *mut u8, dst: Atom<'_>) -> bool {
        if self.promote_copy(src, dst) {
            (*src.cast::<L>()).clear();
            true
        } else {
            false
        }
    }

    fn common_type(&self, other: &'static dyn TypeTraits) -> Option<&'static dyn TypeTraits> {
        if same_traits(self, other) {
            return Some(other);
        }
        let other_list = other.as_list()?;
        let item = L::Item::traits().common_type(other_list.value_traits())?;
        find_traits(TypeId::combine(TypeFlags::LIST, &[item.id()]))
    }

    fn as_list(&self) -> Option<&dyn ListTraits> {
        Some(self)
    }

    fn accept(&self, atom: Atom<'_>, visitor: &mut dyn AtomVisitor) -> bool {
        visitor.visit_list(self, atom)
    }
}

impl<L: ListStorage + Describable> ListTraits for ListTraitsImpl<L> {
    fn value_traits(&self) -> &'static dyn TypeTraits {
        L::Item::traits()
    }

    fn count(&self, atom: Atom<'_>) -> usize {
        unsafe { self.storage(&atom) }.len()
    }

    fn at<'a>(&self, atom: Atom<'a>, index: usize) -> Atom<'a> {
        Atom::new(unsafe { self.storage(&atom) }.get_mut(index))
    }

    fn add_default<'a>(&self, atom: Atom<'a>) -> Atom<'a> {
        Atom::new(unsafe { self.storage(&atom) }.push_default())
    }

    fn reserve(&self, atom: Atom<'_>, capacity: usize) {
        let storage = unsafe { self.storage(&atom) };
        let len = storage.len();
        storage.reserve(capacity.saturating_sub(len));
    }

    fn clear(&self, atom: Atom<'_>) {
        unsafe { self.storage(&atom) }.clear();
    }

    fn remove_at(&self, atom: Atom<'_>, index: usize) {
        unsafe { self.storage(&atom) }.remove(index);
    }

    fn remove_value(&self, atom: Atom<'_>, value: &Atom<'_>) -> bool {
        let storage = unsafe { self.storage(&atom) };
        for index in 0..storage.len() {
            if Atom::new(storage.get_mut(index)).equals(value) {
                storage.remove(index);
                return true;
            }
        }
        false
    }

    fn for_each(&self, atom: Atom<'_>, f: &mut dyn FnMut(Atom<'_>) -> bool) -> bool {
        unsafe { self.storage(&atom) }.for_each_mut(&mut |item| f(Atom::new(item)))
    }
}
