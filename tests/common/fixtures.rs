//! Reflected test classes
//!
//! `Resource` is the base class; `Prefab` derives from it by embedding it
//! and declaring `Resource` as its parent class. Together they cover every
//! described category: scalars, enums, pairs, lists, dicos, strong/weak
//! object references, plus a transient property.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use specular::rtti::{
    AssocVec, ClassFlags, MetaClass, ObjPtr, ObjRef, ObjectPayload, PropertyFlags,
    ReflectedObject, WeakPtr,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Quality {
    #[default]
    Low = 0,
    Medium = 1,
    High = 2,
}

specular::rtti::impl_reflected_enum!(Quality : u32 { Low, Medium, High });

#[derive(Default)]
pub struct Resource {
    pub source_path: PathBuf,
    pub quality: Quality,
    pub revision: u32,
}

impl ObjectPayload for Resource {
    fn class(&self) -> &'static MetaClass {
        Resource::meta_class()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl ReflectedObject for Resource {
    fn meta_class() -> &'static MetaClass {
        static CLASS: OnceLock<&'static MetaClass> = OnceLock::new();
        CLASS.get_or_init(|| {
            MetaClass::builder("Resource", ClassFlags::CONCRETE)
                .instantiate::<Resource>()
                .field("source_path", |r: &mut Resource| &mut r.source_path)
                .field("quality", |r: &mut Resource| &mut r.quality)
                .field("revision", |r: &mut Resource| &mut r.revision)
                .build()
        })
    }
}

#[derive(Default)]
pub struct Prefab {
    pub base: Resource,
    pub label: String,
    pub weight: i32,
    pub ratio: f64,
    pub scales: Vec<f32>,
    pub bounds: (f32, f32),
    pub lookup: AssocVec<String, i32>,
    pub counters: HashMap<String, u32>,
    pub next: ObjPtr<Prefab>,
    pub observed: WeakPtr<Prefab>,
    pub cache_hits: u32,
}

impl ObjectPayload for Prefab {
    fn class(&self) -> &'static MetaClass {
        Prefab::meta_class()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn parent_payload_mut(&mut self) -> Option<&mut dyn ObjectPayload> {
        Some(&mut self.base)
    }
}

impl ReflectedObject for Prefab {
    fn meta_class() -> &'static MetaClass {
        static CLASS: OnceLock<&'static MetaClass> = OnceLock::new();
        CLASS.get_or_init(|| {
            MetaClass::builder("Prefab", ClassFlags::CONCRETE)
                .parent(Resource::meta_class())
                .instantiate::<Prefab>()
                .field("label", |p: &mut Prefab| &mut p.label)
                .field("weight", |p: &mut Prefab| &mut p.weight)
                .field("ratio", |p: &mut Prefab| &mut p.ratio)
                .field("scales", |p: &mut Prefab| &mut p.scales)
                .field("bounds", |p: &mut Prefab| &mut p.bounds)
                .field("lookup", |p: &mut Prefab| &mut p.lookup)
                .field("counters", |p: &mut Prefab| &mut p.counters)
                .field("next", |p: &mut Prefab| &mut p.next)
                .field("observed", |p: &mut Prefab| &mut p.observed)
                .field_with_flags(
                    "cache_hits",
                    PropertyFlags::TRANSIENT,
                    |p: &mut Prefab| &mut p.cache_hits,
                )
                .build()
        })
    }
}

pub fn new_prefab() -> ObjRef {
    Prefab::new_object()
}
