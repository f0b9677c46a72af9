//! Dictionary traits
//!
//! Associative containers over described key/value types. `HashMap<K, V>`
//! is the hashed dico (unspecified iteration order); [`AssocVec<K, V>`] is
//! the associative vector (linear find, stable insertion order). Both share
//! one structural `Dico<K, V>` id and promote into each other.
//!
//! Deep equality is order-independent, and so is hashing: entry hashes are
//! combined commutatively.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use specular_types::{TypeFlags, TypeId, TypeInfos};

use crate::any::{promote_prologue, Any};
use crate::atom::Atom;
use crate::traits::{find_traits, intern, same_traits, Describable, TypeTraits};
use crate::value::DescribableValue;
use crate::visitor::AtomVisitor;

/// Category view over dico traits.
pub trait DicoTraits: TypeTraits {
    fn key_traits(&self) -> &'static dyn TypeTraits;

    fn value_traits(&self) -> &'static dyn TypeTraits;

    fn count(&self, atom: Atom<'_>) -> usize;

    fn is_empty(&self, atom: Atom<'_>) -> bool {
        self.count(atom) == 0
    }

    /// View of the value stored under `key`, if any.
    fn find<'a>(&self, atom: Atom<'a>, key: &Atom<'_>) -> Option<Atom<'a>>;

    /// Inserts `(copy of key, default value)` and returns the value view.
    /// The key must not be present; callers check with [`find`](Self::find).
    fn add_default_copy<'a>(&self, atom: Atom<'a>, key: &Atom<'_>) -> Atom<'a>;

    /// As [`add_default_copy`](Self::add_default_copy), but moves the key
    /// out of its atom, leaving it reset.
    fn add_default_move<'a>(&self, atom: Atom<'a>, key: &Atom<'_>) -> Atom<'a>;

    fn add_copy(&self, atom: Atom<'_>, key: &Atom<'_>, value: &Atom<'_>);

    fn add_move(&self, atom: Atom<'_>, key: &Atom<'_>, value: &Atom<'_>);

    fn remove(&self, atom: Atom<'_>, key: &Atom<'_>) -> bool;

    fn reserve(&self, atom: Atom<'_>, capacity: usize);

    fn clear(&self, atom: Atom<'_>);

    /// Clear then reserve.
    fn empty(&self, atom: Atom<'_>, capacity: usize) {
        self.clear(atom);
        self.reserve(atom, capacity);
    }

    /// Iterates `(key, value)` views. Hashed dicos iterate in unspecified
    /// order; associative vectors in insertion order. Keys must not be
    /// mutated through their views.
    fn for_each(&self, atom: Atom<'_>, f: &mut dyn FnMut(Atom<'_>, Atom<'_>) -> bool) -> bool;
}

/// Insertion-ordered associative vector (linear find over `Vec<(K, V)>`).
#[derive(Debug, Clone, PartialEq)]
pub struct AssocVec<K, V> {
    entries: Vec<(K, V)>,
}

impl<K: PartialEq, V> AssocVec<K, V> {
    pub fn new() -> Self {
        AssocVec {
            entries: Vec::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        AssocVec {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Inserts or replaces; returns the previous value when replacing.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn reserve(&mut self, additional: usize) {
        self.entries.reserve(additional);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.entries.iter_mut().map(|(k, v)| (&*k, v))
    }
}

impl<K: PartialEq, V> Default for AssocVec<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PartialEq, V> FromIterator<(K, V)> for AssocVec<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut out = AssocVec::new();
        for (k, v) in iter {
            out.insert(k, v);
        }
        out
    }
}

/// Storage operations a concrete dico container plugs into the generic
/// descriptor.
pub(crate) trait DicoStorage: Default + Clone + PartialEq + Send + Sync + 'static {
    type Key: DescribableValue;
    type Value: DescribableValue;

    const CONTAINER_NAME: &'static str;

    fn len(&self) -> usize;
    fn get_mut(&mut self, key: &Self::Key) -> Option<&mut Self::Value>;
    /// Precondition: `key` absent.
    fn insert_default(&mut self, key: Self::Key) -> &mut Self::Value;
    fn insert(&mut self, key: Self::Key, value: Self::Value);
    fn remove(&mut self, key: &Self::Key) -> bool;
    fn reserve(&mut self, additional: usize);
    fn clear(&mut self);
    /// Key pointers are handed out read-only; mutating a key would corrupt
    /// the container's lookup structure.
    fn for_each_mut(
        &mut self,
        f: &mut dyn FnMut(*mut Self::Key, &mut Self::Value) -> bool,
    ) -> bool;
}

impl<K, V> DicoStorage for HashMap<K, V>
where
    K: DescribableValue + Eq + Hash,
    V: DescribableValue,
{
    type Key = K;
    type Value = V;

    const CONTAINER_NAME: &'static str = "HashMap";

    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        HashMap::get_mut(self, key)
    }

    fn insert_default(&mut self, key: K) -> &mut V {
        debug_assert!(!self.contains_key(&key));
        self.entry(key).or_default()
    }

    fn insert(&mut self, key: K, value: V) {
        let _ = HashMap::insert(self, key, value);
    }

    fn remove(&mut self, key: &K) -> bool {
        HashMap::remove(self, key).is_some()
    }

    fn reserve(&mut self, additional: usize) {
        HashMap::reserve(self, additional);
    }

    fn clear(&mut self) {
        HashMap::clear(self);
    }

    fn for_each_mut(&mut self, f: &mut dyn FnMut(*mut K, &mut V) -> bool) -> bool {
        for (key, value) in self.iter_mut() {
            if !f(key as *const K as *mut K, value) {
                return false;
            }
        }
        true
    }
}

impl<K, V> DicoStorage for AssocVec<K, V>
where
    K: DescribableValue,
    V: DescribableValue,
{
    type Key = K;
    type Value = V;

    const CONTAINER_NAME: &'static str = "AssocVec";

    fn len(&self) -> usize {
        AssocVec::len(self)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        AssocVec::get_mut(self, key)
    }

    fn insert_default(&mut self, key: K) -> &mut V {
        debug_assert!(self.get(&key).is_none());
        self.entries.push((key, V::default()));
        &mut self.entries.last_mut().expect("just pushed").1
    }

    fn insert(&mut self, key: K, value: V) {
        let _ = AssocVec::insert(self, key, value);
    }

    fn remove(&mut self, key: &K) -> bool {
        AssocVec::remove(self, key).is_some()
    }

    fn reserve(&mut self, additional: usize) {
        AssocVec::reserve(self, additional);
    }

    fn clear(&mut self) {
        AssocVec::clear(self);
    }

    fn for_each_mut(&mut self, f: &mut dyn FnMut(*mut K, &mut V) -> bool) -> bool {
        for (key, value) in self.entries.iter_mut() {
            if !f(key as *mut K, value) {
                return false;
            }
        }
        true
    }
}

pub(crate) struct DicoTraitsImpl<D: DicoStorage> {
    infos: TypeInfos,
    _marker: PhantomData<fn() -> D>,
}

impl<D: DicoStorage + Describable> DicoTraitsImpl<D> {
    fn new() -> Self {
        DicoTraitsImpl {
            infos: TypeInfos::dico(
                D::CONTAINER_NAME,
                D::Key::traits().type_infos(),
                D::Value::traits().type_infos(),
                std::mem::size_of::<D>(),
                std::mem::align_of::<D>(),
            ),
            _marker: PhantomData,
        }
    }

    unsafe fn storage<'a>(&self, atom: &Atom<'a>) -> &'a mut D {
        debug_assert!(same_traits(atom.traits(), self as &dyn TypeTraits));
        atom.typed_data_unchecked::<D>()
    }

    fn typed_key<'k>(&self, key: &'k Atom<'_>) -> &'k mut D::Key {
        key.typed_data::<D::Key>()
    }
}

impl<K, V> Describable for HashMap<K, V>
where
    K: DescribableValue + Eq + Hash,
    V: DescribableValue,
{
    fn traits() -> &'static dyn TypeTraits {
        intern::<HashMap<K, V>>(|| Box::new(DicoTraitsImpl::<HashMap<K, V>>::new()))
    }
}

impl<K, V> Describable for AssocVec<K, V>
where
    K: DescribableValue,
    V: DescribableValue,
{
    fn traits() -> &'static dyn TypeTraits {
        intern::<AssocVec<K, V>>(|| Box::new(DicoTraitsImpl::<AssocVec<K, V>>::new()))
    }
}

impl<D: DicoStorage + Describable> TypeTraits for DicoTraitsImpl<D> {
    fn type_infos(&self) -> &TypeInfos {
        &self.infos
    }

    fn static_handle(&self) -> &'static dyn TypeTraits {
        D::traits()
    }

    unsafe fn create(&self, dst: *mut u8) {
        dst.cast::<D>().write(D::default());
    }

    unsafe fn create_copy(&self, dst: *mut u8, src: *const u8) {
        dst.cast::<D>().write((*src.cast::<D>()).clone());
    }

    unsafe fn create_move(&self, dst: *mut u8, src: *mut u8) {
        dst.cast::<D>().write(std::mem::take(&mut *src.cast::<D>()));
    }

    unsafe fn destroy(&self, data: *mut u8) {
        data.cast::<D>().drop_in_place();
    }

    unsafe fn is_default_value(&self, data: *const u8) -> bool {
        (*data.cast::<D>()).len() == 0
    }

    unsafe fn reset_to_default(&self, data: *mut u8) {
        (*data.cast::<D>()).clear();
    }

    unsafe fn equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        *lhs.cast::<D>() == *rhs.cast::<D>()
    }

    unsafe fn hash_value(&self, data: *const u8, state: &mut dyn Hasher) {
        let storage = &mut *(data as *mut D);
        state.write_usize(storage.len());
        // Commutative combination keeps the hash order-independent.
        let mut combined: u64 = 0;
        storage.for_each_mut(&mut |key, value| {
            let mut entry = DefaultHasher::new();
            Atom::new(unsafe { &mut *key }).hash_into(&mut entry);
            Atom::new(value).hash_into(&mut entry);
            combined = combined.wrapping_add(entry.finish());
            true
        });
        state.write_u64(combined);
    }

    unsafe fn deep_equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        let l = &mut *(lhs as *mut D);
        let r = &mut *(rhs as *mut D);
        if l.len() != r.len() {
            return false;
        }
        l.for_each_mut(&mut |key, value| {
            match r.get_mut(unsafe { &*key }) {
                Some(other) => Atom::new(value).deep_equals(&Atom::new(other)),
                None => false,
            }
        })
    }

    unsafe fn deep_copy(&self, src: *const u8, dst: *mut u8) {
        let s = &mut *(src as *mut D);
        let d = &mut *dst.cast::<D>();
        d.clear();
        d.reserve(s.len());
        s.for_each_mut(&mut |key, value| {
            let slot = d.insert_default(unsafe { &*key }.clone());
            Atom::new(value).deep_copy_to(&Atom::new(slot));
            true
        });
    }

    unsafe fn promote_copy(&self, src: *const u8, dst: Atom<'_>) -> bool {
        if let Some(done) = promote_prologue(self, src, &dst) {
            return done;
        }
        let Some(dst_dico) = dst.traits().as_dico() else {
            return false;
        };
        let s = &mut *(src as *mut D);
        dst_dico.empty(dst, s.len());

        let mut promoted_key = Any::default();
        let ok = s.for_each_mut(&mut |key, value| {
            let key_slot = promoted_key.reset(dst_dico.key_traits());
            if !Atom::new(unsafe { &mut *key }).promote_copy_to(&key_slot) {
                return false;
            }
            if dst_dico.find(dst, &key_slot).is_some() {
                return false;
            }
            let value_slot = dst_dico.add_default_move(dst, &key_slot);
            Atom::new(value).promote_copy_to(&value_slot)
        });
        if !ok {
            dst_dico.clear(dst);
        }
        ok
    }

    unsafe fn promote_move(&self, src: *mut u8, dst: Atom<'_>) -> bool {
        if self.promote_copy(src, dst) {
            (*src.cast::<D>()).clear();
            true
        } else {
            false
        }
    }

    fn common_type(&self, other: &'static dyn TypeTraits) -> Option<&'static dyn TypeTraits> {
        if same_traits(self, other) {
            return Some(other);
        }
        let other_dico = other.as_dico()?;
        let key = D::Key::traits().common_type(other_dico.key_traits())?;
        let value = D::Value::traits().common_type(other_dico.value_traits())?;
        find_traits(TypeId::combine(TypeFlags::DICO, &[key.id(), value.id()]))
    }

    fn as_dico(&self) -> Option<&dyn DicoTraits> {
        Some(self)
    }

    fn accept(&self, atom: Atom<'_>, visitor: &mut dyn AtomVisitor) -> bool {
        visitor.visit_dico(self, atom)
    }
}

impl<D: DicoStorage + Describable> DicoTraits for DicoTraitsImpl<D> {
    fn key_traits(&self) -> &'static dyn TypeTraits {
        D::Key::traits()
    }

    fn value_traits(&self) -> &'static dyn TypeTraits {
        D::Value::traits()
    }

    fn count(&self, atom: Atom<'_>) -> usize {
        unsafe { self.storage(&atom) }.len()
    }

    fn find<'a>(&self, atom: Atom<'a>, key: &Atom<'_>) -> Option<Atom<'a>> {
        let storage = unsafe { self.storage(&atom) };
        storage.get_mut(self.typed_key(key)).map(Atom::new)
    }

    fn add_default_copy<'a>(&self, atom: Atom<'a>, key: &Atom<'_>) -> Atom<'a> {
        let storage = unsafe { self.storage(&atom) };
        Atom::new(storage.insert_default(self.typed_key(key).clone()))
    }

    fn add_default_move<'a>(&self, atom: Atom<'a>, key: &Atom<'_>) -> Atom<'a> {
        let storage = unsafe { self.storage(&atom) };
        let key = std::mem::take(self.typed_key(key));
        Atom::new(storage.insert_default(key))
    }

    fn add_copy(&self, atom: Atom<'_>, key: &Atom<'_>, value: &Atom<'_>) {
        let storage = unsafe { self.storage(&atom) };
        storage.insert(
            self.typed_key(key).clone(),
            value.typed_data::<D::Value>().clone(),
        );
    }

    fn add_move(&self, atom: Atom<'_>, key: &Atom<'_>, value: &Atom<'_>) {
        let storage = unsafe { self.storage(&atom) };
        storage.insert(
            std::mem::take(self.typed_key(key)),
            std::mem::take(value.typed_data::<D::Value>()),
        );
    }

    fn remove(&self, atom: Atom<'_>, key: &Atom<'_>) -> bool {
        let storage = unsafe { self.storage(&atom) };
        storage.remove(self.typed_key(key))
    }

    fn reserve(&self, atom: Atom<'_>, capacity: usize) {
        let storage = unsafe { self.storage(&atom) };
        let len = storage.len();
        storage.reserve(capacity.saturating_sub(len));
    }

    fn clear(&self, atom: Atom<'_>) {
        unsafe { self.storage(&atom) }.clear();
    }

    fn for_each(&self, atom: Atom<'_>, f: &mut dyn FnMut(Atom<'_>, Atom<'_>) -> bool) -> bool {
        let storage = unsafe { self.storage(&atom) };
        storage.for_each_mut(&mut |key, value| {
            let key_atom = Atom::new(unsafe { &mut *key });
            f(key_atom, Atom::new(value))
        })
    }
}
