//! Class metadata and the registrar
//!
//! A [`MetaClass`] carries per-concrete-type metadata: name, parent chain,
//! flags and the ordered property list. Classes are built once during
//! module initialization through [`ClassBuilder`] and interned in a
//! process-wide registry; generated and hand-written declarations share
//! the same builder.

use std::collections::HashMap;
use std::fmt;
use std::sync::{OnceLock, RwLock};

use bitflags::bitflags;
use specular_types::Name;

use crate::atom::Atom;
use crate::error::RttiError;
use crate::object::{ObjRef, ReflectedObject};
use crate::property::{MetaProperty, PropertyFlags};
use crate::traits::Describable;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassFlags: u32 {
        const CONCRETE   = 1 << 0;
        const ABSTRACT   = 1 << 1;
        const DEPRECATED = 1 << 2;
    }
}

/// Per-type class metadata plus the ordered property list.
pub struct MetaClass {
    name: Name,
    flags: ClassFlags,
    parent: Option<&'static MetaClass>,
    properties: Vec<MetaProperty>,
    instantiate: Option<fn() -> ObjRef>,
}

impl MetaClass {
    pub fn builder(name: &str, flags: ClassFlags) -> ClassBuilder {
        assert!(
            flags.contains(ClassFlags::CONCRETE) != flags.contains(ClassFlags::ABSTRACT),
            "class '{}' must be either concrete or abstract",
            name
        );
        ClassBuilder {
            name: Name::new(name),
            flags,
            parent: None,
            properties: Vec::new(),
            instantiate: None,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn flags(&self) -> ClassFlags {
        self.flags
    }

    pub fn parent(&self) -> Option<&'static MetaClass> {
        self.parent
    }

    pub fn is_concrete(&self) -> bool {
        self.flags.contains(ClassFlags::CONCRETE)
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(ClassFlags::ABSTRACT)
    }

    pub fn is_deprecated(&self) -> bool {
        self.flags.contains(ClassFlags::DEPRECATED)
    }

    /// Properties declared on this class only.
    pub fn properties(&self) -> &[MetaProperty] {
        &self.properties
    }

    /// Properties of this class and all ancestors, ancestors first, each
    /// in declaration order.
    pub fn all_properties(&self) -> Vec<&MetaProperty> {
        let mut chain = Vec::new();
        let mut class: Option<&MetaClass> = Some(self);
        while let Some(current) = class {
            chain.push(current);
            class = current.parent;
        }
        chain
            .iter()
            .rev()
            .flat_map(|class| class.properties.iter())
            .collect()
    }

    /// Searches this class then its ancestors.
    pub fn find_property(&self, name: &str) -> Option<&MetaProperty> {
        let wanted = Name::new(name);
        let mut class: Option<&MetaClass> = Some(self);
        while let Some(current) = class {
            if let Some(found) = current.properties.iter().find(|p| *p.name() == wanted) {
                return Some(found);
            }
            class = current.parent;
        }
        None
    }

    /// Whether `self` is `other` or one of its descendants.
    pub fn is_child_of(&self, other: &MetaClass) -> bool {
        let mut class: Option<&MetaClass> = Some(self);
        while let Some(current) = class {
            if std::ptr::eq(current, other) {
                return true;
            }
            class = current.parent;
        }
        false
    }

    /// Deepest class both chains share.
    pub fn common_ancestor(
        &'static self,
        other: &'static MetaClass,
    ) -> Option<&'static MetaClass> {
        let mut class: Option<&'static MetaClass> = Some(self);
        while let Some(current) = class {
            if other.is_child_of(current) {
                return Some(current);
            }
            class = current.parent;
        }
        None
    }

    /// Builds a fresh default instance; abstract classes fail.
    pub fn create_instance(&self) -> Result<ObjRef, RttiError> {
        match self.instantiate {
            Some(make) => Ok(make()),
            None => Err(RttiError::AbstractClass {
                class: self.name.clone(),
            }),
        }
    }
}

impl fmt::Debug for MetaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MetaClass('{}', {:?}, {} properties)",
            self.name,
            self.flags,
            self.properties.len()
        )
    }
}

/// Records a class declaration: parent, flags, properties, factory.
pub struct ClassBuilder {
    name: Name,
    flags: ClassFlags,
    parent: Option<&'static MetaClass>,
    properties: Vec<MetaProperty>,
    instantiate: Option<fn() -> ObjRef>,
}

impl ClassBuilder {
    pub fn parent(mut self, parent: &'static MetaClass) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Installs the default-constructing factory for a concrete class.
    pub fn instantiate<C: ReflectedObject>(mut self) -> Self {
        self.instantiate = Some(<C as ReflectedObject>::new_object);
        self
    }

    pub fn field<C: ReflectedObject, F: Describable>(
        self,
        name: &str,
        project: fn(&mut C) -> &mut F,
    ) -> Self {
        self.field_with_flags(name, PropertyFlags::empty(), project)
    }

    pub fn field_with_flags<C: ReflectedObject, F: Describable>(
        mut self,
        name: &str,
        flags: PropertyFlags,
        project: fn(&mut C) -> &mut F,
    ) -> Self {
        debug_assert!(
            !self.properties.iter().any(|p| p.name().as_str() == name),
            "duplicate property '{}' on class '{}'",
            name,
            self.name
        );
        self.properties
            .push(MetaProperty::new::<C, F>(name, flags, project));
        self
    }

    pub fn validated_field<C: ReflectedObject, F: Describable>(
        mut self,
        name: &str,
        project: fn(&mut C) -> &mut F,
        validator: impl Fn(&Atom<'_>) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.properties.push(
            MetaProperty::new::<C, F>(name, PropertyFlags::empty(), project)
                .with_validator(validator),
        );
        self
    }

    /// Finalizes and registers the class. Registering two classes under
    /// one name is a programming error.
    pub fn build(self) -> &'static MetaClass {
        if self.flags.contains(ClassFlags::CONCRETE) {
            assert!(
                self.instantiate.is_some(),
                "concrete class '{}' needs an instantiate factory",
                self.name
            );
        }
        let class: &'static MetaClass = Box::leak(Box::new(MetaClass {
            name: self.name,
            flags: self.flags,
            parent: self.parent,
            properties: self.properties,
            instantiate: self.instantiate,
        }));

        let mut registry = class_registry().write().expect("class registry poisoned");
        let previous = registry.insert(class.name.clone(), class);
        assert!(
            previous.is_none(),
            "class '{}' registered twice",
            class.name
        );
        class
    }
}

fn class_registry() -> &'static RwLock<HashMap<Name, &'static MetaClass>> {
    static REGISTRY: OnceLock<RwLock<HashMap<Name, &'static MetaClass>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Looks a registered class up by name.
pub fn find_class(name: &str) -> Option<&'static MetaClass> {
    class_registry()
        .read()
        .expect("class registry poisoned")
        .get(&Name::new(name))
        .copied()
}
