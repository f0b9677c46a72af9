//! specular-rtti: the reflection and transaction core
//!
//! This crate implements the dynamic type system and the object-graph
//! lifecycle on top of it:
//! - [`TypeTraits`] + [`Atom`] - erased descriptors and non-owning views
//!   over any described value
//! - scalar/pair/list/dico category traits with uniform visitation,
//!   promotion and deep copy/compare semantics
//! - [`Any`] - self-owning described value with inline storage
//! - [`MetaObject`]/[`MetaClass`]/[`MetaProperty`] - the reflected-object
//!   model with strong/weak/safe references
//! - [`MetaTransaction`] - namespaced graph container with the
//!   load/mount/unmount/unload state machine
//! - [`MetaDatabase`] - process-wide publication registry
//! - [`AtomVisitor`] - traits-dispatched traversal driving serialization,
//!   randomization, reference collection and pretty-printing

mod any;
mod atom;
mod class;
mod database;
pub mod dico;
mod error;
pub mod list;
mod object;
pub mod pair;
mod property;
pub mod scalar;
mod traits;
mod transaction;
mod value;
pub mod visitor;

pub use any::{Any, ANY_INLINE_CAP};
pub use atom::Atom;
pub use class::{find_class, ClassBuilder, ClassFlags, MetaClass};
pub use database::{database, MetaDatabase};
pub use dico::{AssocVec, DicoTraits};
pub use error::{RttiError, TransactionError};
pub use list::ListTraits;
pub use object::{
    deep_copy_object, deep_equals_objects, MetaObject, ObjPtr, ObjRef, ObjectFlags, ObjectPayload,
    ObjectTraits, ReflectedObject, SafeRef, WeakObj, WeakPtr,
};
pub use pair::PairTraits;
pub use property::{MetaProperty, PropertyFlags};
pub use scalar::{Blob, ReflectedEnum, ScalarTraits};
pub use traits::{find_traits, same_traits, traits_of, Describable, TypeTraits};
pub use transaction::{
    LinearizedRefs, LoadContext, LoadObserver, MetaTransaction, TransactionFlags, TransactionState,
    UnloadContext,
};
pub use value::DescribableValue;
pub use visitor::{AtomVisitor, PrettyPrinter, VisitorFlags};

/// Builds an [`Any`] out of any described value.
pub fn make_any<T: Describable>(value: T) -> Any {
    Any::new(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    struct Widget {
        label: String,
        weight: i32,
        tags: Vec<String>,
        peer: ObjPtr<Widget>,
    }

    impl ObjectPayload for Widget {
        fn class(&self) -> &'static MetaClass {
            Widget::meta_class()
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    impl ReflectedObject for Widget {
        fn meta_class() -> &'static MetaClass {
            static CLASS: std::sync::OnceLock<&'static MetaClass> = std::sync::OnceLock::new();
            CLASS.get_or_init(|| {
                MetaClass::builder("Widget", ClassFlags::CONCRETE)
                    .instantiate::<Widget>()
                    .field("label", |w: &mut Widget| &mut w.label)
                    .field("weight", |w: &mut Widget| &mut w.weight)
                    .field("tags", |w: &mut Widget| &mut w.tags)
                    .field("peer", |w: &mut Widget| &mut w.peer)
                    .build()
            })
        }
    }

    #[test]
    fn test_class_metadata() {
        let _ = env_logger::builder().is_test(true).try_init();
        let class = Widget::meta_class();
        assert_eq!(class.name().as_str(), "Widget");
        assert!(class.is_concrete());
        assert_eq!(class.all_properties().len(), 4);
        assert!(class.find_property("weight").is_some());
        assert!(class.find_property("missing").is_none());
        assert!(std::ptr::eq(find_class("Widget").unwrap(), class));
    }

    #[test]
    fn test_property_get_set() {
        let obj = Widget::new_object();
        let class = obj.class();
        let weight = class.find_property("weight").unwrap();

        let mut value = 17_i32;
        weight.set(&obj, &Atom::new(&mut value)).unwrap();
        assert!(obj.is_dirty());

        let mut read_back = weight.get(&obj).unwrap();
        assert_eq!(*read_back.downcast_mut::<i32>().unwrap(), 17);
    }

    #[test]
    fn test_property_set_promotes() {
        let obj = Widget::new_object();
        let weight = obj.class().find_property("weight").unwrap();

        let mut narrow = 5_i8;
        weight.set(&obj, &Atom::new(&mut narrow)).unwrap();
        let mut read_back = weight.get(&obj).unwrap();
        assert_eq!(*read_back.downcast_mut::<i32>().unwrap(), 5);

        let mut incompatible = 1.5_f64;
        assert!(weight.set(&obj, &Atom::new(&mut incompatible)).is_err());
    }

    #[derive(Default)]
    struct FancyWidget {
        base: Widget,
        sparkle: u8,
    }

    impl ObjectPayload for FancyWidget {
        fn class(&self) -> &'static MetaClass {
            FancyWidget::meta_class()
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

    impl ReflectedObject for FancyWidget {
        fn meta_class() -> &'static MetaClass {
            static CLASS: std::sync::OnceLock<&'static MetaClass> = std::sync::OnceLock::new();
            CLASS.get_or_init(|| {
                MetaClass::builder("FancyWidget", ClassFlags::CONCRETE)
                    .parent(Widget::meta_class())
                    .instantiate::<FancyWidget>()
                    .field("sparkle", |w: &mut FancyWidget| &mut w.sparkle)
                    .build()
            })
        }
    }

    #[test]
    fn test_object_reference_casts_walk_the_class_tree() {
        let fancy = FancyWidget::new_object();

        // The slot is declared against the base class but holds a derived
        // object: the downcast sees through it.
        let mut slot: ObjPtr<Widget> = ObjPtr::new(fancy.clone()).unwrap();
        let atom = Atom::new(&mut slot);
        let down = atom
            .cast_to(traits_of::<ObjPtr<FancyWidget>>())
            .expect("live object is a FancyWidget");
        assert!(down.typed_data::<ObjPtr<FancyWidget>>().get().is_some());

        // A plain base instance does not downcast.
        let mut plain: ObjPtr<Widget> = ObjPtr::new(Widget::new_object()).unwrap();
        let atom = Atom::new(&mut plain);
        assert!(atom.cast_to(traits_of::<ObjPtr<FancyWidget>>()).is_none());

        // Upcasts are statically sound.
        let mut derived: ObjPtr<FancyWidget> = ObjPtr::new(fancy).unwrap();
        let atom = Atom::new(&mut derived);
        assert!(atom.cast::<ObjPtr<Widget>>().is_some());

        // A null reference is a valid value of the narrower type.
        let mut null_slot: ObjPtr<Widget> = ObjPtr::null();
        let atom = Atom::new(&mut null_slot);
        assert!(atom.cast_to(traits_of::<ObjPtr<FancyWidget>>()).is_some());
    }

    #[test]
    fn test_leaf_casts_require_the_exact_type() {
        let mut value = 3_i32;
        let atom = Atom::new(&mut value);
        assert!(atom.cast_to(traits_of::<i32>()).is_some());
        assert!(atom.cast_to(traits_of::<i64>()).is_none());

        let mut list = vec![1_i32];
        let atom = Atom::new(&mut list);
        assert!(atom
            .cast_to(traits_of::<std::collections::VecDeque<i32>>())
            .is_none());
    }

    #[derive(Default)]
    struct Gauge {
        percent: i32,
    }

    impl ObjectPayload for Gauge {
        fn class(&self) -> &'static MetaClass {
            Gauge::meta_class()
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
    }

    impl ReflectedObject for Gauge {
        fn meta_class() -> &'static MetaClass {
            static CLASS: std::sync::OnceLock<&'static MetaClass> = std::sync::OnceLock::new();
            CLASS.get_or_init(|| {
                MetaClass::builder("Gauge", ClassFlags::CONCRETE)
                    .instantiate::<Gauge>()
                    .validated_field(
                        "percent",
                        |g: &mut Gauge| &mut g.percent,
                        |atom| match atom.cast::<i32>() {
                            Some(v) if (0..=100).contains(v) => Ok(()),
                            Some(v) => Err(format!("{} is out of range", v)),
                            None => Ok(()),
                        },
                    )
                    .build()
            })
        }
    }

    #[test]
    fn test_property_validator_rejects_bad_values() {
        let obj = Gauge::new_object();
        let percent = obj.class().find_property("percent").unwrap();

        let mut ok = 50_i32;
        percent.set(&obj, &Atom::new(&mut ok)).unwrap();

        let mut bad = 150_i32;
        let err = percent.set(&obj, &Atom::new(&mut bad)).unwrap_err();
        assert!(matches!(err, RttiError::ValidationFailed { .. }));
        assert_eq!(err.code(), "E-RTTI-004");

        // The stored value is untouched by the rejected write.
        let mut current = percent.get(&obj).unwrap();
        assert_eq!(*current.downcast_mut::<i32>().unwrap(), 50);
    }

    #[test]
    fn test_deep_equals_and_copy_of_object_graphs() {
        let a = Widget::new_object();
        let b = Widget::new_object();
        a.with_downcast_mut::<Widget, _>(|w| {
            w.label = "root".into();
            w.tags = vec!["x".into()];
        })
        .unwrap();
        b.with_downcast_mut::<Widget, _>(|w| {
            w.label = "root".into();
            w.tags = vec!["x".into()];
        })
        .unwrap();
        assert!(deep_equals_objects(&a, &b));

        // Distinct structure must be detected.
        b.with_downcast_mut::<Widget, _>(|w| w.weight = 1).unwrap();
        assert!(!deep_equals_objects(&a, &b));

        let copy = deep_copy_object(&a).unwrap();
        assert!(!Arc::ptr_eq(&a, &copy));
        assert!(deep_equals_objects(&a, &copy));
    }

    #[test]
    fn test_cyclic_graph_deep_equals_terminates() {
        let a1 = Widget::new_object();
        let a2 = Widget::new_object();
        a1.with_downcast_mut::<Widget, _>(|w| w.peer = ObjPtr::new(a2.clone()).unwrap())
            .unwrap();
        a2.with_downcast_mut::<Widget, _>(|w| w.peer = ObjPtr::new(a1.clone()).unwrap())
            .unwrap();

        let b1 = Widget::new_object();
        let b2 = Widget::new_object();
        b1.with_downcast_mut::<Widget, _>(|w| w.peer = ObjPtr::new(b2.clone()).unwrap())
            .unwrap();
        b2.with_downcast_mut::<Widget, _>(|w| w.peer = ObjPtr::new(b1.clone()).unwrap())
            .unwrap();

        // Structurally equal cycles compare equal even at different
        // addresses.
        assert!(deep_equals_objects(&a1, &b1));

        // Break the cycle so the graphs can drop.
        a1.with_downcast_mut::<Widget, _>(|w| w.peer.clear()).unwrap();
        b1.with_downcast_mut::<Widget, _>(|w| w.peer.clear()).unwrap();
    }

    #[test]
    fn test_deep_copy_preserves_sharing() {
        let root = Widget::new_object();
        let shared = Widget::new_object();
        root.with_downcast_mut::<Widget, _>(|w| {
            w.peer = ObjPtr::new(shared.clone()).unwrap();
        })
        .unwrap();

        let copy = deep_copy_object(&root).unwrap();
        let copied_peer = copy
            .with_downcast_mut::<Widget, _>(|w| w.peer.get().cloned())
            .unwrap()
            .unwrap();
        assert!(!Arc::ptr_eq(&copied_peer, &shared));
    }

    #[test]
    fn test_safe_ref_observes_liveness() {
        let obj = Widget::new_object();
        let safe = SafeRef::new(&obj);
        assert!(safe.is_alive());
        assert!(Arc::ptr_eq(&safe.get(), &obj));

        drop(obj);
        assert!(!safe.is_alive());
        assert!(safe.try_get().is_none());
    }

    #[test]
    fn test_weak_ptr_goes_null() {
        let obj = Widget::new_object();
        let weak = WeakPtr::<Widget>::observe(&obj);
        assert!(weak.get().is_some());
        drop(obj);
        assert!(weak.get().is_none());
    }

    #[test]
    fn test_make_any() {
        let mut any = make_any(3_u16);
        assert_eq!(*any.downcast_mut::<u16>().unwrap(), 3);
    }
}
