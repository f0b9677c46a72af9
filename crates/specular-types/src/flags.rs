//! Type category flags

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Category bitmap over a described type.
    ///
    /// Exactly one of the category bits (`SCALAR`, `PAIR`, `LIST`, `DICO`,
    /// `OBJECT`) is set per type; `ENUM`, `NATIVE` and `WEAK_REF` are
    /// markers layered on top. Serde support comes with the `bitflags`
    /// serde feature.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TypeFlags: u32 {
        const SCALAR   = 1 << 0;
        const ENUM     = 1 << 1;
        const PAIR     = 1 << 2;
        const LIST     = 1 << 3;
        const DICO     = 1 << 4;
        const OBJECT   = 1 << 5;
        /// Built-in native type (as opposed to a user-declared one).
        const NATIVE   = 1 << 6;
        /// Non-owning object reference; never traversed by load.
        const WEAK_REF = 1 << 7;
    }
}

impl TypeFlags {
    pub fn is_scalar(self) -> bool {
        self.contains(TypeFlags::SCALAR)
    }

    pub fn is_pair(self) -> bool {
        self.contains(TypeFlags::PAIR)
    }

    pub fn is_list(self) -> bool {
        self.contains(TypeFlags::LIST)
    }

    pub fn is_dico(self) -> bool {
        self.contains(TypeFlags::DICO)
    }

    pub fn is_object(self) -> bool {
        self.contains(TypeFlags::OBJECT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_accessors() {
        let flags = TypeFlags::LIST | TypeFlags::NATIVE;
        assert!(flags.is_list());
        assert!(!flags.is_scalar());
        assert!(!flags.is_object());
    }
}
