//! Error types for the reflection core

use specular_types::Name;
use thiserror::Error;

use crate::transaction::TransactionState;

/// Errors from reflected-object and property operations.
#[derive(Debug, Clone, Error)]
pub enum RttiError {
    /// E-RTTI-001: instantiating an abstract class
    #[error("class '{class}' is abstract and cannot be instantiated")]
    AbstractClass { class: Name },

    /// E-RTTI-002: property lookup failed
    #[error("class '{class}' has no property named '{property}'")]
    UnknownProperty { class: Name, property: Name },

    /// E-RTTI-003: a value could not be promoted into a property slot
    #[error("cannot convert '{from}' into '{to}'")]
    IncompatibleTraits { from: String, to: String },

    /// E-RTTI-004: a property validator rejected the value
    #[error("property '{property}' rejected value: {reason}")]
    ValidationFailed { property: Name, reason: String },

    /// E-RTTI-005: writing through a read-only property
    #[error("property '{property}' is read-only")]
    ReadOnlyProperty { property: Name },

    /// E-RTTI-006: a user load callback failed
    #[error("load callback of class '{class}' failed: {reason}")]
    LoadCallback { class: Name, reason: String },
}

impl RttiError {
    pub fn code(&self) -> &'static str {
        match self {
            RttiError::AbstractClass { .. } => "E-RTTI-001",
            RttiError::UnknownProperty { .. } => "E-RTTI-002",
            RttiError::IncompatibleTraits { .. } => "E-RTTI-003",
            RttiError::ValidationFailed { .. } => "E-RTTI-004",
            RttiError::ReadOnlyProperty { .. } => "E-RTTI-005",
            RttiError::LoadCallback { .. } => "E-RTTI-006",
        }
    }
}

/// Errors from the transaction state machine and database publication.
#[derive(Debug, Clone, Error)]
pub enum TransactionError {
    /// E-TXN-001: a transition was requested from the wrong state
    #[error("transaction '{namespace}' cannot {operation} while {state:?}")]
    InvalidState {
        namespace: Name,
        operation: &'static str,
        state: TransactionState,
    },

    /// E-TXN-002: two transactions import each other
    #[error("found a circular transaction import: {namespace} <=> {other}")]
    CircularImport { namespace: Name, other: Name },

    /// E-TXN-003: namespace already registered in the database
    #[error("namespace '{namespace}' is already mounted")]
    NamespaceCollision { namespace: Name },

    /// E-TXN-004: exported path already registered in the database
    #[error("object '{namespace}/{name}' is already exported")]
    NameCollision { namespace: Name, name: Name },

    /// E-TXN-005: referencing a foreign object that is not exported
    #[error("object of class '{class}' belongs to another transaction and is not exported")]
    ForeignObject { class: Name },

    /// E-TXN-006: a load callback failed; the partial graph was reclaimed
    #[error("loading transaction '{namespace}' failed: {source}")]
    LoadFailed {
        namespace: Name,
        #[source]
        source: RttiError,
    },
}

impl TransactionError {
    pub fn code(&self) -> &'static str {
        match self {
            TransactionError::InvalidState { .. } => "E-TXN-001",
            TransactionError::CircularImport { .. } => "E-TXN-002",
            TransactionError::NamespaceCollision { .. } => "E-TXN-003",
            TransactionError::NameCollision { .. } => "E-TXN-004",
            TransactionError::ForeignObject { .. } => "E-TXN-005",
            TransactionError::LoadFailed { .. } => "E-TXN-006",
        }
    }

    /// Hard errors are programming errors; `LoadFailed` carries a user
    /// callback failure and is left to the caller.
    pub fn is_hard_error(&self) -> bool {
        !matches!(self, TransactionError::LoadFailed { .. })
    }
}
