//! The meta database
//!
//! Process-wide, read-mostly registry of mounted transactions and their
//! exported objects. Readers share the lock; mount/unmount hold it
//! exclusively for the whole register/unregister window, so lookups
//! observe either none or all of a transaction's exports.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use log::debug;
use specular_types::Name;

use crate::error::TransactionError;
use crate::object::ObjRef;
use crate::transaction::MetaTransaction;

#[derive(Default)]
struct DatabaseInner {
    transactions: HashMap<Name, Arc<MetaTransaction>>,
    objects: HashMap<(Name, Name), ObjRef>,
}

/// Registry of mounted transactions and `(namespace, name)` exports.
pub struct MetaDatabase {
    inner: RwLock<DatabaseInner>,
}

impl MetaDatabase {
    fn new() -> Self {
        MetaDatabase {
            inner: RwLock::new(DatabaseInner::default()),
        }
    }

    /// Registers a transaction and all its exports under one exclusive
    /// lock. Any collision rolls the registration back.
    pub(crate) fn mount_transaction(
        &self,
        transaction: &Arc<MetaTransaction>,
        exported: &[ObjRef],
    ) -> Result<(), TransactionError> {
        let namespace = transaction.namespace().clone();
        let mut inner = self.inner.write().expect("meta database poisoned");

        if inner.transactions.contains_key(&namespace) {
            return Err(TransactionError::NamespaceCollision { namespace });
        }

        let mut registered: Vec<(Name, Name)> = Vec::with_capacity(exported.len());
        for obj in exported {
            let Some(name) = obj.exported_name() else {
                // Exported objects are named by construction; an unnamed
                // one would be unpublishable.
                for key in registered {
                    inner.objects.remove(&key);
                }
                return Err(TransactionError::NameCollision {
                    namespace,
                    name: Name::default(),
                });
            };
            let key = (namespace.clone(), name.clone());
            if inner.objects.contains_key(&key) {
                for key in registered {
                    inner.objects.remove(&key);
                }
                return Err(TransactionError::NameCollision { namespace, name });
            }
            debug!("register object '{}/{}'", key.0, key.1);
            inner.objects.insert(key.clone(), obj.clone());
            registered.push(key);
        }

        inner
            .transactions
            .insert(namespace, Arc::clone(transaction));
        Ok(())
    }

    /// Withdraws a transaction and its exports under one exclusive lock.
    pub(crate) fn unmount_transaction(
        &self,
        transaction: &Arc<MetaTransaction>,
        exported: &[ObjRef],
    ) {
        let namespace = transaction.namespace();
        let mut inner = self.inner.write().expect("meta database poisoned");

        for obj in exported {
            if let Some(name) = obj.exported_name() {
                debug!("unregister object '{}/{}'", namespace, name);
                inner.objects.remove(&(namespace.clone(), name));
            }
        }
        inner.transactions.remove(namespace);
    }

    pub fn find_transaction(&self, namespace: &Name) -> Option<Arc<MetaTransaction>> {
        self.inner
            .read()
            .expect("meta database poisoned")
            .transactions
            .get(namespace)
            .cloned()
    }

    pub fn find_object(&self, namespace: &Name, name: &Name) -> Option<ObjRef> {
        self.inner
            .read()
            .expect("meta database poisoned")
            .objects
            .get(&(namespace.clone(), name.clone()))
            .cloned()
    }

    /// Resolves `"namespace/name"`.
    pub fn find_object_by_path(&self, path: &str) -> Option<ObjRef> {
        let (namespace, name) = path.split_once('/')?;
        self.find_object(&Name::new(namespace), &Name::new(name))
    }

    /// Snapshot of the mounted namespaces.
    pub fn namespaces(&self) -> Vec<Name> {
        let mut out: Vec<Name> = self
            .inner
            .read()
            .expect("meta database poisoned")
            .transactions
            .keys()
            .cloned()
            .collect();
        out.sort();
        out
    }

    /// Snapshot of every exported path.
    pub fn exported_paths(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .inner
            .read()
            .expect("meta database poisoned")
            .objects
            .keys()
            .map(|(namespace, name)| format!("{}/{}", namespace, name))
            .collect();
        out.sort();
        out
    }

    pub fn transaction_count(&self) -> usize {
        self.inner
            .read()
            .expect("meta database poisoned")
            .transactions
            .len()
    }

    pub fn object_count(&self) -> usize {
        self.inner
            .read()
            .expect("meta database poisoned")
            .objects
            .len()
    }
}

/// The process-wide database.
pub fn database() -> &'static MetaDatabase {
    static DATABASE: OnceLock<MetaDatabase> = OnceLock::new();
    DATABASE.get_or_init(MetaDatabase::new)
}
