//! Meta transactions
//!
//! A transaction is a namespace-scoped unit owning a linearized object
//! graph. Loading walks every top object's reference graph depth-first and
//! records three disjoint vectors: `loaded` (every local object, postfix
//! order, so dependencies precede dependents), `exported` (the named
//! subset) and `imported` (references into other transactions, never
//! followed). Mounting publishes the exported objects to the process-wide
//! database.
//!
//! State machine:
//!
//! ```text
//! Unloaded --load()--> Loading --(postfix visit done)--> Loaded
//! Loaded   --mount()--> Mounting --(db register done)--> Mounted
//! Mounted  --unmount()--> Unmounting --(db unregister)--> Loaded
//! Loaded   --unload()--> Unloading --(reverse visit)--> Unloaded
//! ```
//!
//! Any transition requested in another state is a hard error. A single
//! transaction is owned by one thread at a time; callers serialize its
//! transitions.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use bitflags::bitflags;
use log::{debug, info};
use specular_types::Name;

use crate::database::database;
use crate::error::TransactionError;
use crate::object::{deep_equals_objects, ObjRef};
use crate::visitor::{collect_references, VisitorFlags};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransactionFlags: u32 {
        /// Walk deprecated properties during linearization.
        const KEEP_DEPRECATED = 1 << 0;
        /// Walk transient properties during linearization.
        const KEEP_TRANSIENT  = 1 << 1;
        /// The transaction's objects must not survive it.
        const KEEP_ISOLATED   = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Unloaded,
    Loading,
    Loaded,
    Mounting,
    Mounted,
    Unmounting,
    Unloading,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TransactionState::Unloaded => "Unloaded",
            TransactionState::Loading => "Loading",
            TransactionState::Loaded => "Loaded",
            TransactionState::Mounting => "Mounting",
            TransactionState::Mounted => "Mounted",
            TransactionState::Unmounting => "Unmounting",
            TransactionState::Unloading => "Unloading",
        };
        f.write_str(text)
    }
}

/// The three disjoint reference vectors produced by linearization.
#[derive(Default)]
pub struct LinearizedRefs {
    /// Every reachable local object, dependencies first.
    pub loaded: Vec<ObjRef>,
    /// Subset of `loaded` that is exported.
    pub exported: Vec<ObjRef>,
    /// References into other transactions; never followed.
    pub imported: Vec<ObjRef>,
}

impl LinearizedRefs {
    fn reset(&mut self) {
        self.loaded = Vec::new();
        self.exported = Vec::new();
        self.imported = Vec::new();
    }

    /// Whether any import resolves into `other`.
    pub fn has_import(&self, other: &MetaTransaction) -> bool {
        self.imported.iter().any(|obj| match obj.outer() {
            Some(outer) => std::ptr::eq(Arc::as_ptr(&outer), other as *const MetaTransaction),
            None => false,
        })
    }
}

/// Chained callback observing per-object load/unload.
pub trait LoadObserver {
    fn on_load_object(&mut self, obj: &ObjRef) {
        let _ = obj;
    }

    fn on_unload_object(&mut self, obj: &ObjRef) {
        let _ = obj;
    }
}

impl LoadObserver for () {}

/// Context handed to every payload `on_load` callback.
pub struct LoadContext<'a> {
    transaction: &'a Arc<MetaTransaction>,
}

impl LoadContext<'_> {
    pub fn transaction(&self) -> &Arc<MetaTransaction> {
        self.transaction
    }

    pub fn namespace(&self) -> &Name {
        self.transaction.namespace()
    }
}

/// Context handed to every payload `on_unload` callback.
pub struct UnloadContext<'a> {
    transaction: &'a Arc<MetaTransaction>,
}

impl UnloadContext<'_> {
    pub fn transaction(&self) -> &Arc<MetaTransaction> {
        self.transaction
    }

    pub fn namespace(&self) -> &Name {
        self.transaction.namespace()
    }
}

struct TransactionInner {
    state: TransactionState,
    top_objects: Vec<ObjRef>,
    linearized: LinearizedRefs,
}

/// Namespace-scoped container of a linearized object graph.
pub struct MetaTransaction {
    namespace: Name,
    flags: TransactionFlags,
    inner: RwLock<TransactionInner>,
}

impl MetaTransaction {
    pub fn new(namespace: Name, flags: TransactionFlags) -> Arc<Self> {
        Arc::new(MetaTransaction {
            namespace,
            flags,
            inner: RwLock::new(TransactionInner {
                state: TransactionState::Unloaded,
                top_objects: Vec::new(),
                linearized: LinearizedRefs::default(),
            }),
        })
    }

    pub fn namespace(&self) -> &Name {
        &self.namespace
    }

    pub fn flags(&self) -> TransactionFlags {
        self.flags
    }

    pub fn keep_deprecated(&self) -> bool {
        self.flags.contains(TransactionFlags::KEEP_DEPRECATED)
    }

    pub fn keep_transient(&self) -> bool {
        self.flags.contains(TransactionFlags::KEEP_TRANSIENT)
    }

    pub fn state(&self) -> TransactionState {
        self.inner.read().expect("transaction poisoned").state
    }

    pub fn is_unloaded(&self) -> bool {
        self.state() == TransactionState::Unloaded
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == TransactionState::Loaded
    }

    pub fn is_mounted(&self) -> bool {
        self.state() == TransactionState::Mounted
    }

    /// Registers a root object. Only unloaded transactions accept roots,
    /// and only unloaded objects can become one.
    pub fn add(&self, obj: ObjRef) {
        let mut inner = self.inner.write().expect("transaction poisoned");
        assert!(
            inner.state == TransactionState::Unloaded,
            "cannot add to transaction '{}' while {}",
            self.namespace,
            inner.state
        );
        assert!(obj.is_unloaded(), "top objects must be unloaded");
        assert!(
            !inner.top_objects.iter().any(|o| Arc::ptr_eq(o, &obj)),
            "object added twice to transaction '{}'",
            self.namespace
        );
        obj.mark_top_object();
        inner.top_objects.push(obj);
    }

    pub fn remove(&self, obj: &ObjRef) {
        let mut inner = self.inner.write().expect("transaction poisoned");
        assert!(
            inner.state == TransactionState::Unloaded,
            "cannot remove from transaction '{}' while {}",
            self.namespace,
            inner.state
        );
        let index = inner
            .top_objects
            .iter()
            .position(|o| Arc::ptr_eq(o, obj))
            .expect("object is not a top object of this transaction");
        obj.unmark_top_object();
        inner.top_objects.remove(index);
    }

    pub fn reserve(&self, capacity: usize) {
        let mut inner = self.inner.write().expect("transaction poisoned");
        assert!(inner.state == TransactionState::Unloaded);
        inner.top_objects.reserve(capacity);
    }

    pub fn top_objects(&self) -> Vec<ObjRef> {
        self.inner
            .read()
            .expect("transaction poisoned")
            .top_objects
            .clone()
    }

    pub fn loaded_refs(&self) -> Vec<ObjRef> {
        self.inner
            .read()
            .expect("transaction poisoned")
            .linearized
            .loaded
            .clone()
    }

    pub fn exported_refs(&self) -> Vec<ObjRef> {
        self.inner
            .read()
            .expect("transaction poisoned")
            .linearized
            .exported
            .clone()
    }

    pub fn imported_refs(&self) -> Vec<ObjRef> {
        self.inner
            .read()
            .expect("transaction poisoned")
            .linearized
            .imported
            .clone()
    }

    /// Whether this transaction imports from `other`; drives the circular
    /// import guard.
    pub fn has_import(&self, other: &MetaTransaction) -> bool {
        self.inner
            .read()
            .expect("transaction poisoned")
            .linearized
            .has_import(other)
    }

    fn expect_state(
        &self,
        inner: &TransactionInner,
        operation: &'static str,
        expected: TransactionState,
    ) -> Result<(), TransactionError> {
        if inner.state == expected {
            Ok(())
        } else {
            Err(TransactionError::InvalidState {
                namespace: self.namespace.clone(),
                operation,
                state: inner.state,
            })
        }
    }

    pub fn load(self: &Arc<Self>) -> Result<(), TransactionError> {
        self.load_with(&mut ())
    }

    /// Linearizes the graph, then calls every object's load callback in
    /// dependencies-first order. On a callback failure the partial graph
    /// is unloaded in reverse and the transaction returns to `Unloaded`.
    pub fn load_with(self: &Arc<Self>, observer: &mut dyn LoadObserver) -> Result<(), TransactionError> {
        let tops = {
            let mut inner = self.inner.write().expect("transaction poisoned");
            self.expect_state(&inner, "load", TransactionState::Unloaded)?;
            inner.state = TransactionState::Loading;
            inner.top_objects.clone()
        };

        let linearized = match self.linearize(&tops) {
            Ok(refs) => refs,
            Err(error) => {
                self.inner.write().expect("transaction poisoned").state =
                    TransactionState::Unloaded;
                return Err(error);
            }
        };

        for (index, obj) in linearized.loaded.iter().enumerate() {
            debug_assert!(obj.is_unloaded());
            let mut ctx = LoadContext { transaction: self };
            let outcome = obj.with_payload_mut(|payload| payload.on_load(&mut ctx));
            match outcome {
                Ok(()) => {
                    obj.mark_loaded();
                    obj.set_outer(Some(self));
                    observer.on_load_object(obj);
                }
                Err(error) => {
                    for loaded in linearized.loaded[..index].iter().rev() {
                        let mut ctx = UnloadContext { transaction: self };
                        loaded.with_payload_mut(|payload| payload.on_unload(&mut ctx));
                        observer.on_unload_object(loaded);
                        loaded.set_outer(None);
                        loaded.mark_unloaded();
                    }
                    self.inner.write().expect("transaction poisoned").state =
                        TransactionState::Unloaded;
                    return Err(TransactionError::LoadFailed {
                        namespace: self.namespace.clone(),
                        source: error,
                    });
                }
            }
        }

        self.report_loaded(&linearized);

        let mut inner = self.inner.write().expect("transaction poisoned");
        debug_assert!(inner.state == TransactionState::Loading);
        inner.linearized = linearized;
        inner.state = TransactionState::Loaded;
        Ok(())
    }

    /// Depth-first postfix walk over the top objects' reference graphs.
    fn linearize(self: &Arc<Self>, tops: &[ObjRef]) -> Result<LinearizedRefs, TransactionError> {
        let mut refs = LinearizedRefs::default();
        let mut visited: HashSet<usize> = HashSet::with_capacity(tops.len());
        let top_ptrs: HashSet<usize> = tops.iter().map(|o| Arc::as_ptr(o) as usize).collect();
        let mut error: Option<TransactionError> = None;

        let walk_flags = {
            let mut flags = VisitorFlags::empty();
            if self.keep_deprecated() {
                flags |= VisitorFlags::KEEP_DEPRECATED;
            }
            if self.keep_transient() {
                flags |= VisitorFlags::KEEP_TRANSIENT;
            }
            flags
        };

        collect_references(
            tops,
            &mut |obj| {
                if error.is_some() {
                    return false;
                }
                if !visited.insert(Arc::as_ptr(obj) as usize) {
                    return false;
                }
                match obj.outer() {
                    Some(outer) if !std::ptr::eq(Arc::as_ptr(&outer), Arc::as_ptr(self)) => {
                        // The other transaction already imports one of our
                        // objects: a circular transaction import.
                        let circular = outer.has_import(self)
                            || outer.imported_refs().iter().any(|import| {
                                let ptr = Arc::as_ptr(import) as usize;
                                visited.contains(&ptr) || top_ptrs.contains(&ptr)
                            });
                        if !obj.is_exported() {
                            error = Some(TransactionError::ForeignObject {
                                class: obj.class().name().clone(),
                            });
                        } else if circular {
                            error = Some(TransactionError::CircularImport {
                                namespace: self.namespace.clone(),
                                other: outer.namespace().clone(),
                            });
                        } else {
                            debug_assert!(obj.is_loaded());
                            refs.imported.push(obj.clone());
                        }
                        false
                    }
                    _ => {
                        if obj.is_exported() {
                            refs.exported.push(obj.clone());
                        }
                        true
                    }
                }
            },
            &mut |obj| {
                refs.loaded.push(obj.clone());
            },
            walk_flags,
        );

        match error {
            Some(error) => Err(error),
            None => {
                debug_assert!(refs.loaded.len() >= tops.len());
                debug_assert!(refs.exported.len() <= refs.loaded.len());
                Ok(refs)
            }
        }
    }

    fn report_loaded(&self, linearized: &LinearizedRefs) {
        info!(
            "loaded transaction '{}': {} loaded, {} exported, {} imported",
            self.namespace,
            linearized.loaded.len(),
            linearized.exported.len(),
            linearized.imported.len()
        );
        for (index, obj) in linearized.loaded.iter().enumerate() {
            debug!(
                "  [{:03}] {} ({:?})",
                index,
                obj.class().name(),
                obj.flags()
            );
        }
    }

    /// Publishes the namespace and every exported object to the database.
    pub fn mount(self: &Arc<Self>) -> Result<(), TransactionError> {
        let exported = {
            let mut inner = self.inner.write().expect("transaction poisoned");
            self.expect_state(&inner, "mount", TransactionState::Loaded)?;
            inner.state = TransactionState::Mounting;
            inner.linearized.exported.clone()
        };

        info!("mount transaction '{}'", self.namespace);

        if let Err(error) = database().mount_transaction(self, &exported) {
            self.inner.write().expect("transaction poisoned").state = TransactionState::Loaded;
            return Err(error);
        }

        self.inner.write().expect("transaction poisoned").state = TransactionState::Mounted;
        Ok(())
    }

    /// Withdraws the namespace and its exports from the database.
    pub fn unmount(self: &Arc<Self>) -> Result<(), TransactionError> {
        let exported = {
            let mut inner = self.inner.write().expect("transaction poisoned");
            self.expect_state(&inner, "unmount", TransactionState::Mounted)?;
            inner.state = TransactionState::Unmounting;
            inner.linearized.exported.clone()
        };

        info!("unmount transaction '{}'", self.namespace);

        database().unmount_transaction(self, &exported);

        self.inner.write().expect("transaction poisoned").state = TransactionState::Loaded;
        Ok(())
    }

    pub fn unload(self: &Arc<Self>) -> Result<(), TransactionError> {
        self.unload_with(&mut ())
    }

    /// Calls every unload callback in exact reverse load order, clears the
    /// linearization, and keeps the top objects for a later reload.
    pub fn unload_with(
        self: &Arc<Self>,
        observer: &mut dyn LoadObserver,
    ) -> Result<(), TransactionError> {
        let loaded = {
            let mut inner = self.inner.write().expect("transaction poisoned");
            self.expect_state(&inner, "unload", TransactionState::Loaded)?;
            debug_assert!(inner.linearized.loaded.len() >= inner.top_objects.len());
            inner.state = TransactionState::Unloading;
            std::mem::take(&mut inner.linearized.loaded)
        };

        info!("unload transaction '{}'", self.namespace);

        for obj in loaded.iter().rev() {
            debug_assert!(obj.is_loaded());
            let mut ctx = UnloadContext { transaction: self };
            obj.with_payload_mut(|payload| payload.on_unload(&mut ctx));
            observer.on_unload_object(obj);
            obj.set_outer(None);
            obj.mark_unloaded();
        }

        let mut inner = self.inner.write().expect("transaction poisoned");
        inner.linearized.reset();
        inner.state = TransactionState::Unloaded;
        Ok(())
    }

    /// Unload and load again; remounts when the transaction was mounted.
    pub fn reload(self: &Arc<Self>) -> Result<(), TransactionError> {
        info!(
            "reloading transaction '{}' ({} top objects)",
            self.namespace,
            self.inner
                .read()
                .expect("transaction poisoned")
                .top_objects
                .len()
        );

        let was_mounted = self.is_mounted();
        if was_mounted {
            self.unmount()?;
        }
        self.unload()?;
        self.load()?;
        if was_mounted {
            self.mount()?;
        }
        Ok(())
    }

    pub fn load_and_mount(self: &Arc<Self>) -> Result<(), TransactionError> {
        self.load()?;
        self.mount()
    }

    pub fn unmount_and_unload(self: &Arc<Self>) -> Result<(), TransactionError> {
        self.unmount()?;
        self.unload()
    }

    /// Structural equality of the top-object lists.
    pub fn deep_equals(&self, other: &MetaTransaction) -> bool {
        let mine = self.top_objects();
        let theirs = other.top_objects();
        mine.len() == theirs.len()
            && mine
                .iter()
                .zip(theirs.iter())
                .all(|(a, b)| deep_equals_objects(a, b))
    }
}

impl Drop for MetaTransaction {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().expect("transaction poisoned");
        debug_assert!(
            inner.state == TransactionState::Unloaded,
            "transaction '{}' dropped while {}",
            self.namespace,
            inner.state
        );
        if self.flags.contains(TransactionFlags::KEEP_ISOLATED) {
            for obj in &inner.top_objects {
                debug_assert!(
                    obj.outer().is_none(),
                    "isolated transaction '{}' dropped while owning objects",
                    self.namespace
                );
            }
        }
    }
}

impl std::fmt::Debug for MetaTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MetaTransaction('{}', {}, {} top objects)",
            self.namespace,
            self.state(),
            self.inner
                .read()
                .expect("transaction poisoned")
                .top_objects
                .len()
        )
    }
}
