//! specular-types: structural type identity
//!
//! Every type the reflection core can describe carries a stable structural
//! identity, independent of which module observed it first:
//! - [`TypeId`] - 32-bit structural id (constants for native scalars,
//!   deterministic combination for composites)
//! - [`TypeFlags`] - category bitmap driving visitor dispatch
//! - [`TypeInfos`] - `{name, id, flags, size, align}` descriptor bundle
//! - [`Name`] - process-interned token used for object, class, property
//!   and namespace names

mod flags;
mod infos;
mod name;
mod type_id;

pub use flags::TypeFlags;
pub use infos::TypeInfos;
pub use name::Name;
pub use type_id::{NativeType, TypeId};
