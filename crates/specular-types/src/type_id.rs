//! Structural type ids
//!
//! Native scalars take constants from a closed enumeration; composite types
//! fold their category tag and component ids through FNV-1a. Two types with
//! identical structure hash to the same id in any registration order.

use serde::{Deserialize, Serialize};

use crate::TypeFlags;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit value uniquely identifying the *structure* of a described type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeId(u32);

impl TypeId {
    /// Reserved id for the empty/unknown type.
    pub const UNKNOWN: TypeId = TypeId(0);

    pub const fn from_raw(raw: u32) -> Self {
        TypeId(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Combine a category tag with component ids.
    ///
    /// Deterministic and order-sensitive: `Pair(A, B)` and `Pair(B, A)` get
    /// distinct ids, while two independently constructed `List<Pair<String,
    /// I32>>` get the same one.
    pub fn combine(category: TypeFlags, components: &[TypeId]) -> TypeId {
        let mut h = fnv_u32(FNV_OFFSET, category.bits());
        for component in components {
            h = fnv_u32(h, component.raw());
        }
        TypeId(h)
    }

    /// Id for a named type (enums and object classes): the category tag
    /// combined with the hash of the declaration name.
    pub fn named(category: TypeFlags, name: &str) -> TypeId {
        let mut h = fnv_u32(FNV_OFFSET, category.bits());
        for b in name.as_bytes() {
            h = (h ^ u32::from(*b)).wrapping_mul(FNV_PRIME);
        }
        TypeId(h)
    }
}

fn fnv_u32(mut h: u32, value: u32) -> u32 {
    for b in value.to_le_bytes() {
        h = (h ^ u32::from(b)).wrapping_mul(FNV_PRIME);
    }
    h
}

/// Closed enumeration of the native scalar types.
///
/// The discriminants are the reserved [`TypeId`] constants; they are part of
/// the structural identity contract and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum NativeType {
    Bool = 1,
    I8 = 2,
    I16 = 3,
    I32 = 4,
    I64 = 5,
    U8 = 6,
    U16 = 7,
    U32 = 8,
    U64 = 9,
    F32 = 10,
    F64 = 11,
    Str = 12,
    Name = 13,
    Path = 14,
    Blob = 15,
    Any = 16,
    ObjectRef = 17,
}

impl NativeType {
    pub const fn type_id(self) -> TypeId {
        TypeId(self as u32)
    }

    pub const fn name(self) -> &'static str {
        match self {
            NativeType::Bool => "Bool",
            NativeType::I8 => "I8",
            NativeType::I16 => "I16",
            NativeType::I32 => "I32",
            NativeType::I64 => "I64",
            NativeType::U8 => "U8",
            NativeType::U16 => "U16",
            NativeType::U32 => "U32",
            NativeType::U64 => "U64",
            NativeType::F32 => "F32",
            NativeType::F64 => "F64",
            NativeType::Str => "String",
            NativeType::Name => "Name",
            NativeType::Path => "Path",
            NativeType::Blob => "Blob",
            NativeType::Any => "Any",
            NativeType::ObjectRef => "ObjectRef",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_ids_are_distinct() {
        let all = [
            NativeType::Bool,
            NativeType::I8,
            NativeType::I16,
            NativeType::I32,
            NativeType::I64,
            NativeType::U8,
            NativeType::U16,
            NativeType::U32,
            NativeType::U64,
            NativeType::F32,
            NativeType::F64,
            NativeType::Str,
            NativeType::Name,
            NativeType::Path,
            NativeType::Blob,
            NativeType::Any,
            NativeType::ObjectRef,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.type_id(), b.type_id());
            }
        }
    }

    #[test]
    fn test_combination_is_deterministic() {
        let elem = TypeId::combine(
            TypeFlags::PAIR,
            &[NativeType::Str.type_id(), NativeType::I32.type_id()],
        );
        let a = TypeId::combine(TypeFlags::LIST, &[elem]);
        let b = TypeId::combine(
            TypeFlags::LIST,
            &[TypeId::combine(
                TypeFlags::PAIR,
                &[NativeType::Str.type_id(), NativeType::I32.type_id()],
            )],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_combination_is_order_sensitive() {
        let ab = TypeId::combine(
            TypeFlags::PAIR,
            &[NativeType::Str.type_id(), NativeType::I32.type_id()],
        );
        let ba = TypeId::combine(
            TypeFlags::PAIR,
            &[NativeType::I32.type_id(), NativeType::Str.type_id()],
        );
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_category_distinguishes_composites() {
        let list = TypeId::combine(TypeFlags::LIST, &[NativeType::I32.type_id()]);
        let scalar_like = TypeId::combine(TypeFlags::SCALAR, &[NativeType::I32.type_id()]);
        assert_ne!(list, scalar_like);
    }

    #[test]
    fn test_named_ids() {
        let a = TypeId::named(TypeFlags::ENUM, "TestEnum32");
        let b = TypeId::named(TypeFlags::ENUM, "TestEnum32");
        let c = TypeId::named(TypeFlags::ENUM, "TestEnum64");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
