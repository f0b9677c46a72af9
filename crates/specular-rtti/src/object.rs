//! Reflected objects and reference kinds
//!
//! A [`MetaObject`] is the shared header of every reflected, graph-bearing
//! instance: class metadata, lifecycle flags, optional export name, the
//! owning transaction backpointer, and the user payload. References come in
//! three kinds: strong ([`ObjRef`]), weak ([`WeakPtr`]) and liveness-
//! asserting ([`SafeRef`]); reflected fields hold class-typed [`ObjPtr`]s.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hasher;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, Weak};

use bitflags::bitflags;
use specular_types::{Name, TypeInfos};

use crate::any::promote_prologue;
use crate::atom::Atom;
use crate::class::MetaClass;
use crate::error::RttiError;
use crate::traits::{find_traits, intern, same_traits, Describable, TypeTraits};
use crate::transaction::{LoadContext, MetaTransaction, UnloadContext};
use crate::visitor::AtomVisitor;

bitflags! {
    /// Lifecycle flag bag of a reflected object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u32 {
        /// User-added root of a transaction.
        const TOP_OBJECT = 1 << 0;
        /// Named and publishable to the database.
        const EXPORTED   = 1 << 1;
        const LOADED     = 1 << 2;
        const UNLOADED   = 1 << 3;
        /// A property setter ran since the last load.
        const DIRTY      = 1 << 4;
        /// Traversal path marker; breaks reference cycles.
        const VISITED    = 1 << 5;
    }
}

/// User payload of a reflected object: concrete fields plus the lifecycle
/// callbacks invoked by transactions.
pub trait ObjectPayload: std::any::Any + Send + Sync {
    fn class(&self) -> &'static MetaClass;

    fn on_load(&mut self, ctx: &mut LoadContext<'_>) -> Result<(), RttiError> {
        let _ = ctx;
        Ok(())
    }

    fn on_unload(&mut self, ctx: &mut UnloadContext<'_>) {
        let _ = ctx;
    }

    fn as_any(&self) -> &dyn std::any::Any;

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;

    /// The embedded parent-class part, for payloads of derived classes.
    /// Property projection walks this chain to reach inherited fields.
    fn parent_payload_mut(&mut self) -> Option<&mut dyn ObjectPayload> {
        None
    }
}

/// Statically-known reflected class; what [`ObjPtr`] fields and the class
/// registrar key on.
pub trait ReflectedObject: ObjectPayload + Default + Sized {
    fn meta_class() -> &'static MetaClass;

    /// A fresh instance wrapped in its object header.
    fn new_object() -> ObjRef {
        MetaObject::create(Box::new(Self::default()))
    }
}

/// Strong shared reference; destroys the object when the count reaches
/// zero and no transaction owns it.
pub type ObjRef = Arc<MetaObject>;

/// Non-owning observer of an object's liveness.
pub type WeakObj = Weak<MetaObject>;

/// Reflected object header.
pub struct MetaObject {
    class: &'static MetaClass,
    flags: AtomicU32,
    name: RwLock<Option<Name>>,
    outer: RwLock<Option<Weak<MetaTransaction>>>,
    payload: RwLock<Box<dyn ObjectPayload>>,
}

impl MetaObject {
    pub fn create(payload: Box<dyn ObjectPayload>) -> ObjRef {
        Arc::new(MetaObject {
            class: payload.class(),
            flags: AtomicU32::new(ObjectFlags::UNLOADED.bits()),
            name: RwLock::new(None),
            outer: RwLock::new(None),
            payload: RwLock::new(payload),
        })
    }

    pub fn class(&self) -> &'static MetaClass {
        self.class
    }

    pub fn flags(&self) -> ObjectFlags {
        ObjectFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    fn set_flags(&self, flags: ObjectFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    fn clear_flags(&self, flags: ObjectFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn is_loaded(&self) -> bool {
        self.flags().contains(ObjectFlags::LOADED)
    }

    pub fn is_unloaded(&self) -> bool {
        self.flags().contains(ObjectFlags::UNLOADED)
    }

    pub fn is_exported(&self) -> bool {
        self.flags().contains(ObjectFlags::EXPORTED)
    }

    pub fn is_top_object(&self) -> bool {
        self.flags().contains(ObjectFlags::TOP_OBJECT)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags().contains(ObjectFlags::DIRTY)
    }

    pub(crate) fn mark_loaded(&self) {
        debug_assert!(self.is_unloaded());
        self.clear_flags(ObjectFlags::UNLOADED);
        self.set_flags(ObjectFlags::LOADED);
    }

    pub(crate) fn mark_unloaded(&self) {
        debug_assert!(self.is_loaded());
        self.clear_flags(ObjectFlags::LOADED | ObjectFlags::DIRTY);
        self.set_flags(ObjectFlags::UNLOADED);
    }

    pub(crate) fn mark_top_object(&self) {
        self.set_flags(ObjectFlags::TOP_OBJECT);
    }

    pub(crate) fn unmark_top_object(&self) {
        self.clear_flags(ObjectFlags::TOP_OBJECT);
    }

    pub(crate) fn mark_dirty(&self) {
        self.set_flags(ObjectFlags::DIRTY);
    }

    /// Returns whether the flag was already set; used as a path marker by
    /// traversals.
    pub(crate) fn test_and_set_visited(&self) -> bool {
        let prior = self
            .flags
            .fetch_or(ObjectFlags::VISITED.bits(), Ordering::AcqRel);
        ObjectFlags::from_bits_truncate(prior).contains(ObjectFlags::VISITED)
    }

    pub(crate) fn clear_visited(&self) {
        self.clear_flags(ObjectFlags::VISITED);
    }

    pub fn exported_name(&self) -> Option<Name> {
        self.name.read().expect("object name poisoned").clone()
    }

    /// Names the object and marks it exported. Only unloaded objects may
    /// change their export identity.
    pub fn set_exported(&self, name: Name) {
        assert!(
            self.is_unloaded(),
            "cannot export '{}' while it is loaded",
            self.class.name()
        );
        assert!(!name.is_empty(), "exported objects need a non-empty name");
        *self.name.write().expect("object name poisoned") = Some(name);
        self.set_flags(ObjectFlags::EXPORTED);
    }

    /// The transaction owning this object while loaded.
    pub fn outer(&self) -> Option<Arc<MetaTransaction>> {
        self.outer
            .read()
            .expect("object outer poisoned")
            .as_ref()
            .and_then(Weak::upgrade)
    }

    pub(crate) fn set_outer(&self, transaction: Option<&Arc<MetaTransaction>>) {
        *self.outer.write().expect("object outer poisoned") = transaction.map(Arc::downgrade);
    }

    /// `"namespace/name"` when exported and owned; undefined otherwise.
    pub fn path_name(&self) -> Option<String> {
        let name = self.exported_name()?;
        let outer = self.outer()?;
        Some(format!("{}/{}", outer.namespace(), name))
    }

    pub fn with_payload<R>(&self, f: impl FnOnce(&dyn ObjectPayload) -> R) -> R {
        let guard = self.payload.read().expect("object payload poisoned");
        f(guard.as_ref())
    }

    pub fn with_payload_mut<R>(&self, f: impl FnOnce(&mut dyn ObjectPayload) -> R) -> R {
        let mut guard = self.payload.write().expect("object payload poisoned");
        f(guard.as_mut())
    }

    /// Runs `f` over the payload downcast to its concrete type.
    pub fn with_downcast_mut<T: ReflectedObject, R>(
        &self,
        f: impl FnOnce(&mut T) -> R,
    ) -> Option<R> {
        let mut guard = self.payload.write().expect("object payload poisoned");
        guard.as_any_mut().downcast_mut::<T>().map(f)
    }
}

impl fmt::Debug for MetaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MetaObject({}", self.class.name())?;
        if let Some(name) = self.exported_name() {
            write!(f, " '{}'", name)?;
        }
        write!(f, ", {:?})", self.flags())
    }
}

/// Non-owning handle that asserts the pointee is still alive when
/// observed.
#[derive(Clone)]
pub struct SafeRef {
    inner: WeakObj,
}

impl SafeRef {
    pub fn new(obj: &ObjRef) -> Self {
        SafeRef {
            inner: Arc::downgrade(obj),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn try_get(&self) -> Option<ObjRef> {
        self.inner.upgrade()
    }

    /// Panics when the pointee was destroyed.
    pub fn get(&self) -> ObjRef {
        self.inner
            .upgrade()
            .expect("safe reference observed after object destruction")
    }
}

impl fmt::Debug for SafeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SafeRef(alive: {})", self.is_alive())
    }
}

/// Class-typed nullable strong reference; the property-field form of
/// object references.
pub struct ObjPtr<C: ReflectedObject> {
    inner: Option<ObjRef>,
    _class: PhantomData<fn() -> C>,
}

impl<C: ReflectedObject> ObjPtr<C> {
    pub fn null() -> Self {
        ObjPtr {
            inner: None,
            _class: PhantomData,
        }
    }

    /// Wraps `obj`; fails when its runtime class is not `C` or a child of
    /// it.
    pub fn new(obj: ObjRef) -> Result<Self, RttiError> {
        if obj.class().is_child_of(C::meta_class()) {
            Ok(ObjPtr {
                inner: Some(obj),
                _class: PhantomData,
            })
        } else {
            Err(RttiError::IncompatibleTraits {
                from: obj.class().name().to_string(),
                to: C::meta_class().name().to_string(),
            })
        }
    }

    pub fn is_null(&self) -> bool {
        self.inner.is_none()
    }

    pub fn get(&self) -> Option<&ObjRef> {
        self.inner.as_ref()
    }

    pub fn take(&mut self) -> Option<ObjRef> {
        self.inner.take()
    }

    pub fn clear(&mut self) {
        self.inner = None;
    }
}

impl<C: ReflectedObject> Default for ObjPtr<C> {
    fn default() -> Self {
        ObjPtr::null()
    }
}

impl<C: ReflectedObject> Clone for ObjPtr<C> {
    fn clone(&self) -> Self {
        ObjPtr {
            inner: self.inner.clone(),
            _class: PhantomData,
        }
    }
}

impl<C: ReflectedObject> PartialEq for ObjPtr<C> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<C: ReflectedObject> fmt::Debug for ObjPtr<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(obj) => write!(f, "ObjPtr({:?})", obj),
            None => f.write_str("ObjPtr(null)"),
        }
    }
}

/// Class-typed weak reference; never keeps the pointee alive and never
/// followed by graph loads.
pub struct WeakPtr<C: ReflectedObject> {
    inner: Option<WeakObj>,
    _class: PhantomData<fn() -> C>,
}

impl<C: ReflectedObject> WeakPtr<C> {
    pub fn null() -> Self {
        WeakPtr {
            inner: None,
            _class: PhantomData,
        }
    }

    pub fn observe(obj: &ObjRef) -> Self {
        WeakPtr {
            inner: Some(Arc::downgrade(obj)),
            _class: PhantomData,
        }
    }

    /// `None` when never set or after the pointee was destroyed.
    pub fn get(&self) -> Option<ObjRef> {
        self.inner.as_ref().and_then(Weak::upgrade)
    }
}

impl<C: ReflectedObject> Default for WeakPtr<C> {
    fn default() -> Self {
        WeakPtr::null()
    }
}

impl<C: ReflectedObject> Clone for WeakPtr<C> {
    fn clone(&self) -> Self {
        WeakPtr {
            inner: self.inner.clone(),
            _class: PhantomData,
        }
    }
}

impl<C: ReflectedObject> PartialEq for WeakPtr<C> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (None, None) => true,
            (Some(a), Some(b)) => Weak::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<C: ReflectedObject> fmt::Debug for WeakPtr<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakPtr(alive: {})", self.get().is_some())
    }
}

thread_local! {
    static EQUALS_VISITED: RefCell<HashSet<(usize, usize)>> = RefCell::new(HashSet::new());
    static COPY_STATE: RefCell<(usize, HashMap<usize, ObjRef>)> =
        RefCell::new((0, HashMap::new()));
}

/// Structural equality of two object graphs: equal classes and equal
/// property values under deep traits equality, with an identity-keyed
/// visited set breaking cycles.
pub fn deep_equals_objects(a: &ObjRef, b: &ObjRef) -> bool {
    if Arc::ptr_eq(a, b) {
        return true;
    }
    if !std::ptr::eq(a.class(), b.class()) {
        return false;
    }

    let key = (Arc::as_ptr(a) as usize, Arc::as_ptr(b) as usize);
    let first_visit = EQUALS_VISITED.with(|v| v.borrow_mut().insert(key));
    if !first_visit {
        // Already being compared higher up the path.
        return true;
    }

    let class = a.class();
    let equal = a.with_payload_mut(|pa| {
        b.with_payload_mut(|pb| {
            for property in class.all_properties() {
                let (Some(x), Some(y)) = (property.project(&mut *pa), property.project(&mut *pb))
                else {
                    return false;
                };
                if !x.deep_equals(&y) {
                    return false;
                }
            }
            true
        })
    });

    EQUALS_VISITED.with(|v| v.borrow_mut().remove(&key));
    equal
}

struct CopyScope;

impl CopyScope {
    fn enter() -> Self {
        COPY_STATE.with(|s| s.borrow_mut().0 += 1);
        CopyScope
    }
}

impl Drop for CopyScope {
    fn drop(&mut self) {
        COPY_STATE.with(|s| {
            let mut state = s.borrow_mut();
            state.0 -= 1;
            if state.0 == 0 {
                state.1.clear();
            }
        });
    }
}

/// Duplicates an object graph. Shared references and cycles are preserved
/// through an identity map, so the copy has the same shape as the source.
pub fn deep_copy_object(src: &ObjRef) -> Result<ObjRef, RttiError> {
    let scope = CopyScope::enter();
    let key = Arc::as_ptr(src) as usize;
    if let Some(existing) = COPY_STATE.with(|s| s.borrow().1.get(&key).cloned()) {
        return Ok(existing);
    }

    let class = src.class();
    let copy = class.create_instance()?;
    COPY_STATE.with(|s| s.borrow_mut().1.insert(key, copy.clone()));

    src.with_payload_mut(|ps| {
        copy.with_payload_mut(|pc| {
            for property in class.all_properties() {
                if let (Some(from), Some(to)) =
                    (property.project(&mut *ps), property.project(&mut *pc))
                {
                    from.deep_copy_to(&to);
                }
            }
        })
    });

    drop(scope);
    Ok(copy)
}

/// Category view over object-reference traits.
pub trait ObjectTraits: TypeTraits {
    /// The statically declared class of the reference.
    fn class(&self) -> &'static MetaClass;

    fn is_weak(&self) -> bool;

    fn get_ref(&self, atom: Atom<'_>) -> Option<ObjRef>;

    /// Stores `value`; false when its runtime class is incompatible.
    fn set_ref(&self, atom: Atom<'_>, value: Option<ObjRef>) -> bool;
}

pub(crate) struct StrongRefTraits<C: ReflectedObject> {
    infos: TypeInfos,
    _class: PhantomData<fn() -> C>,
}

impl<C: ReflectedObject> StrongRefTraits<C> {
    fn new() -> Self {
        StrongRefTraits {
            infos: TypeInfos::object(
                C::meta_class().name().as_str(),
                false,
                std::mem::size_of::<ObjPtr<C>>(),
                std::mem::align_of::<ObjPtr<C>>(),
            ),
            _class: PhantomData,
        }
    }
}

impl<C: ReflectedObject> Describable for ObjPtr<C> {
    fn traits() -> &'static dyn TypeTraits {
        intern::<ObjPtr<C>>(|| Box::new(StrongRefTraits::<C>::new()))
    }
}

impl<C: ReflectedObject> TypeTraits for StrongRefTraits<C> {
    fn type_infos(&self) -> &TypeInfos {
        &self.infos
    }

    fn static_handle(&self) -> &'static dyn TypeTraits {
        ObjPtr::<C>::traits()
    }

    unsafe fn create(&self, dst: *mut u8) {
        dst.cast::<ObjPtr<C>>().write(ObjPtr::null());
    }

    unsafe fn create_copy(&self, dst: *mut u8, src: *const u8) {
        dst.cast::<ObjPtr<C>>()
            .write((*src.cast::<ObjPtr<C>>()).clone());
    }

    unsafe fn create_move(&self, dst: *mut u8, src: *mut u8) {
        dst.cast::<ObjPtr<C>>()
            .write(std::mem::take(&mut *src.cast::<ObjPtr<C>>()));
    }

    unsafe fn destroy(&self, data: *mut u8) {
        data.cast::<ObjPtr<C>>().drop_in_place();
    }

    unsafe fn is_default_value(&self, data: *const u8) -> bool {
        (*data.cast::<ObjPtr<C>>()).is_null()
    }

    unsafe fn reset_to_default(&self, data: *mut u8) {
        (*data.cast::<ObjPtr<C>>()).clear();
    }

    unsafe fn equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        *lhs.cast::<ObjPtr<C>>() == *rhs.cast::<ObjPtr<C>>()
    }

    unsafe fn hash_value(&self, data: *const u8, state: &mut dyn Hasher) {
        match (*data.cast::<ObjPtr<C>>()).get() {
            Some(obj) => state.write_usize(Arc::as_ptr(obj) as usize),
            None => state.write_usize(0),
        }
    }

    unsafe fn deep_equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        match ((*lhs.cast::<ObjPtr<C>>()).get(), (*rhs.cast::<ObjPtr<C>>()).get()) {
            (None, None) => true,
            (Some(a), Some(b)) => deep_equals_objects(a, b),
            _ => false,
        }
    }

    unsafe fn deep_copy(&self, src: *const u8, dst: *mut u8) {
        let out = match (*src.cast::<ObjPtr<C>>()).get() {
            Some(obj) => {
                let copy = deep_copy_object(obj).expect("copied class is concrete");
                Some(copy)
            }
            None => None,
        };
        let slot = &mut *dst.cast::<ObjPtr<C>>();
        slot.inner = out;
    }

    unsafe fn cast(
        &self,
        data: NonNull<u8>,
        dst_traits: &'static dyn TypeTraits,
    ) -> Option<NonNull<u8>> {
        if same_traits(self.static_handle(), dst_traits) {
            return Some(data);
        }
        let dst_object = dst_traits.as_object()?;
        if dst_object.is_weak() {
            return None;
        }
        // `ObjPtr<_>` shares one layout for every class parameter, so a
        // compatible reference is the same storage under the other traits.
        let src_class = C::meta_class();
        let dst_class = dst_object.class();
        if src_class.is_child_of(dst_class) {
            return Some(data);
        }
        if dst_class.is_child_of(src_class) {
            // Downcast: the live object decides.
            return match (*data.cast::<ObjPtr<C>>().as_ptr()).get() {
                Some(obj) if obj.class().is_child_of(dst_class) => Some(data),
                Some(_) => None,
                // A null reference is a valid value of the narrower type.
                None => Some(data),
            };
        }
        None
    }

    unsafe fn promote_copy(&self, src: *const u8, dst: Atom<'_>) -> bool {
        if let Some(done) = promote_prologue(self, src, &dst) {
            return done;
        }
        let Some(dst_object) = dst.traits().as_object() else {
            return false;
        };
        if dst_object.is_weak() {
            return false;
        }
        let value = (*src.cast::<ObjPtr<C>>()).get().cloned();
        dst_object.set_ref(dst, value)
    }

    unsafe fn promote_move(&self, src: *mut u8, dst: Atom<'_>) -> bool {
        if self.promote_copy(src, dst) {
            (*src.cast::<ObjPtr<C>>()).clear();
            true
        } else {
            false
        }
    }

    fn common_type(&self, other: &'static dyn TypeTraits) -> Option<&'static dyn TypeTraits> {
        if same_traits(self, other) {
            return Some(other);
        }
        let other_object = other.as_object()?;
        if other_object.is_weak() {
            return None;
        }
        let ancestor = C::meta_class().common_ancestor(other_object.class())?;
        find_traits(
            TypeInfos::object(ancestor.name().as_str(), false, 0, 0)
                .id(),
        )
    }

    fn as_object(&self) -> Option<&dyn ObjectTraits> {
        Some(self)
    }

    fn accept(&self, atom: Atom<'_>, visitor: &mut dyn AtomVisitor) -> bool {
        visitor.visit_object(self, atom)
    }
}

impl<C: ReflectedObject> ObjectTraits for StrongRefTraits<C> {
    fn class(&self) -> &'static MetaClass {
        C::meta_class()
    }

    fn is_weak(&self) -> bool {
        false
    }

    fn get_ref(&self, atom: Atom<'_>) -> Option<ObjRef> {
        atom.typed_data::<ObjPtr<C>>().get().cloned()
    }

    fn set_ref(&self, atom: Atom<'_>, value: Option<ObjRef>) -> bool {
        let slot = atom.typed_data::<ObjPtr<C>>();
        match value {
            None => {
                slot.clear();
                true
            }
            Some(obj) => match ObjPtr::<C>::new(obj) {
                Ok(ptr) => {
                    *slot = ptr;
                    true
                }
                Err(_) => false,
            },
        }
    }
}

pub(crate) struct WeakRefTraits<C: ReflectedObject> {
    infos: TypeInfos,
    _class: PhantomData<fn() -> C>,
}

impl<C: ReflectedObject> WeakRefTraits<C> {
    fn new() -> Self {
        WeakRefTraits {
            infos: TypeInfos::object(
                C::meta_class().name().as_str(),
                true,
                std::mem::size_of::<WeakPtr<C>>(),
                std::mem::align_of::<WeakPtr<C>>(),
            ),
            _class: PhantomData,
        }
    }
}

impl<C: ReflectedObject> Describable for WeakPtr<C> {
    fn traits() -> &'static dyn TypeTraits {
        intern::<WeakPtr<C>>(|| Box::new(WeakRefTraits::<C>::new()))
    }
}

impl<C: ReflectedObject> TypeTraits for WeakRefTraits<C> {
    fn type_infos(&self) -> &TypeInfos {
        &self.infos
    }

    fn static_handle(&self) -> &'static dyn TypeTraits {
        WeakPtr::<C>::traits()
    }

    unsafe fn create(&self, dst: *mut u8) {
        dst.cast::<WeakPtr<C>>().write(WeakPtr::null());
    }

    unsafe fn create_copy(&self, dst: *mut u8, src: *const u8) {
        dst.cast::<WeakPtr<C>>()
            .write((*src.cast::<WeakPtr<C>>()).clone());
    }

    unsafe fn create_move(&self, dst: *mut u8, src: *mut u8) {
        dst.cast::<WeakPtr<C>>()
            .write(std::mem::take(&mut *src.cast::<WeakPtr<C>>()));
    }

    unsafe fn destroy(&self, data: *mut u8) {
        data.cast::<WeakPtr<C>>().drop_in_place();
    }

    unsafe fn is_default_value(&self, data: *const u8) -> bool {
        (*data.cast::<WeakPtr<C>>()).inner.is_none()
    }

    unsafe fn reset_to_default(&self, data: *mut u8) {
        *data.cast::<WeakPtr<C>>() = WeakPtr::null();
    }

    unsafe fn equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        *lhs.cast::<WeakPtr<C>>() == *rhs.cast::<WeakPtr<C>>()
    }

    unsafe fn hash_value(&self, data: *const u8, state: &mut dyn Hasher) {
        match (*data.cast::<WeakPtr<C>>()).get() {
            Some(obj) => state.write_usize(Arc::as_ptr(&obj) as usize),
            None => state.write_usize(0),
        }
    }

    unsafe fn deep_equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        // Weak edges compare by identity only; they are not graph edges.
        self.equals(lhs, rhs)
    }

    unsafe fn deep_copy(&self, src: *const u8, dst: *mut u8) {
        *dst.cast::<WeakPtr<C>>() = (*src.cast::<WeakPtr<C>>()).clone();
    }

    unsafe fn cast(
        &self,
        data: NonNull<u8>,
        dst_traits: &'static dyn TypeTraits,
    ) -> Option<NonNull<u8>> {
        if same_traits(self.static_handle(), dst_traits) {
            return Some(data);
        }
        let dst_object = dst_traits.as_object()?;
        if !dst_object.is_weak() {
            return None;
        }
        let src_class = C::meta_class();
        let dst_class = dst_object.class();
        if src_class.is_child_of(dst_class) {
            return Some(data);
        }
        if dst_class.is_child_of(src_class) {
            // Downcast checks the pointee while it is observable; a dead
            // or null weak reference is a valid value of any narrower
            // compatible type.
            return match (*data.cast::<WeakPtr<C>>().as_ptr()).get() {
                Some(obj) if obj.class().is_child_of(dst_class) => Some(data),
                Some(_) => None,
                None => Some(data),
            };
        }
        None
    }

    unsafe fn promote_copy(&self, src: *const u8, dst: Atom<'_>) -> bool {
        if let Some(done) = promote_prologue(self, src, &dst) {
            return done;
        }
        false
    }

    unsafe fn promote_move(&self, src: *mut u8, dst: Atom<'_>) -> bool {
        if self.promote_copy(src, dst) {
            *src.cast::<WeakPtr<C>>() = WeakPtr::null();
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

    fn as_object(&self) -> Option<&dyn ObjectTraits> {
        Some(self)
    }

    fn accept(&self, atom: Atom<'_>, visitor: &mut dyn AtomVisitor) -> bool {
        visitor.visit_object(self, atom)
    }
}

impl<C: ReflectedObject> ObjectTraits for WeakRefTraits<C> {
    fn class(&self) -> &'static MetaClass {
        C::meta_class()
    }

    fn is_weak(&self) -> bool {
        true
    }

    fn get_ref(&self, atom: Atom<'_>) -> Option<ObjRef> {
        atom.typed_data::<WeakPtr<C>>().get()
    }

    fn set_ref(&self, atom: Atom<'_>, value: Option<ObjRef>) -> bool {
        let slot = atom.typed_data::<WeakPtr<C>>();
        match value {
            None => {
                *slot = WeakPtr::null();
                true
            }
            Some(obj) => {
                if obj.class().is_child_of(C::meta_class()) {
                    *slot = WeakPtr::observe(&obj);
                    true
                } else {
                    false
                }
            }
        }
    }
}
