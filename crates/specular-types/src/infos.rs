//! Type descriptor bundles

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{NativeType, TypeFlags, TypeId};

/// Packaged identity of a described type: human-readable structural name,
/// structural id, category flags and storage requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfos {
    name: String,
    id: TypeId,
    flags: TypeFlags,
    size: usize,
    align: usize,
}

impl TypeInfos {
    pub fn scalar(native: NativeType, size: usize, align: usize) -> Self {
        let mut flags = TypeFlags::SCALAR | TypeFlags::NATIVE;
        if native == NativeType::ObjectRef {
            flags |= TypeFlags::OBJECT;
        }
        TypeInfos {
            name: native.name().to_string(),
            id: native.type_id(),
            flags,
            size,
            align,
        }
    }

    /// A user enum reflected through its underlying scalar.
    pub fn enumeration(name: &str, underlying: NativeType, size: usize, align: usize) -> Self {
        TypeInfos {
            name: name.to_string(),
            id: TypeId::named(TypeFlags::ENUM, name),
            flags: TypeFlags::SCALAR | TypeFlags::ENUM,
            size,
            align,
        }
        .with_underlying_marker(underlying)
    }

    pub fn pair(first: &TypeInfos, second: &TypeInfos, size: usize, align: usize) -> Self {
        TypeInfos {
            name: format!("Pair<{}, {}>", first.name, second.name),
            id: TypeId::combine(TypeFlags::PAIR, &[first.id, second.id]),
            flags: TypeFlags::PAIR,
            size,
            align,
        }
    }

    pub fn list(container: &str, value: &TypeInfos, size: usize, align: usize) -> Self {
        TypeInfos {
            name: format!("{}<{}>", container, value.name),
            id: TypeId::combine(TypeFlags::LIST, &[value.id]),
            flags: TypeFlags::LIST,
            size,
            align,
        }
    }

    pub fn dico(
        container: &str,
        key: &TypeInfos,
        value: &TypeInfos,
        size: usize,
        align: usize,
    ) -> Self {
        TypeInfos {
            name: format!("{}<{}, {}>", container, key.name, value.name),
            id: TypeId::combine(TypeFlags::DICO, &[key.id, value.id]),
            flags: TypeFlags::DICO,
            size,
            align,
        }
    }

    /// A strong or weak reference to a reflected object class.
    pub fn object(class_name: &str, weak: bool, size: usize, align: usize) -> Self {
        let mut flags = TypeFlags::SCALAR | TypeFlags::OBJECT;
        if weak {
            flags |= TypeFlags::WEAK_REF;
        }
        TypeInfos {
            name: if weak {
                format!("WeakPtr<{}>", class_name)
            } else {
                format!("Ptr<{}>", class_name)
            },
            id: TypeId::combine(
                flags & (TypeFlags::OBJECT | TypeFlags::WEAK_REF),
                &[TypeId::named(TypeFlags::OBJECT, class_name)],
            ),
            flags,
            size,
            align,
        }
    }

    fn with_underlying_marker(mut self, underlying: NativeType) -> Self {
        // The underlying scalar participates in the id so that two enums with
        // the same name but different widths stay distinct.
        self.id = TypeId::combine(TypeFlags::ENUM, &[self.id, underlying.type_id()]);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn align(&self) -> usize {
        self.align
    }
}

impl fmt::Display for TypeInfos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{:08x})", self.name, self.id.raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_names() {
        let s = TypeInfos::scalar(NativeType::Str, 24, 8);
        let i = TypeInfos::scalar(NativeType::I32, 4, 4);
        let p = TypeInfos::pair(&s, &i, 32, 8);
        let l = TypeInfos::list("Vec", &p, 24, 8);
        assert_eq!(l.name(), "Vec<Pair<String, I32>>");
        assert!(l.flags().is_list());
    }

    #[test]
    fn test_structural_ids_match_independently_built() {
        let s = TypeInfos::scalar(NativeType::Str, 24, 8);
        let i = TypeInfos::scalar(NativeType::I32, 4, 4);
        let a = TypeInfos::list("Vec", &TypeInfos::pair(&s, &i, 32, 8), 24, 8);
        let b = TypeInfos::list("List", &TypeInfos::pair(&s, &i, 32, 8), 32, 8);
        // Same structure, same id - the container name and sizes are not part
        // of the structural identity.
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_enum_ids_carry_underlying() {
        let e32 = TypeInfos::enumeration("TestEnum", NativeType::U32, 4, 4);
        let e64 = TypeInfos::enumeration("TestEnum", NativeType::U64, 8, 8);
        assert_ne!(e32.id(), e64.id());
    }

    #[test]
    fn test_weak_and_strong_refs_differ() {
        let strong = TypeInfos::object("TestObject", false, 8, 8);
        let weak = TypeInfos::object("TestObject", true, 8, 8);
        assert_ne!(strong.id(), weak.id());
        assert!(weak.flags().contains(TypeFlags::WEAK_REF));
    }
}
