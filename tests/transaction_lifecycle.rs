//! Transaction lifecycle scenarios: mount/lookup/unmount through the
//! database, deterministic linearization, and the circular-import guard.

mod common;

use std::sync::Arc;

use common::fixtures::{new_prefab, Prefab};
use common::visitors::Randomizer;
use specular::rtti::{
    database, MetaTransaction, ObjPtr, TransactionError, TransactionFlags, TransactionState,
};
use specular::types::Name;

#[test]
fn test_mount_lookup_unmount() {
    let _ = env_logger::builder().is_test(true).try_init();
    specular::startup();

    let namespaces_before = database().namespaces();
    let objects_before = database().object_count();

    let transaction = MetaTransaction::new(Name::new("UnitTest_Input"), TransactionFlags::empty());
    let mut randomizer = Randomizer::new(0x5eed, 4);

    let mut tops = Vec::new();
    for index in 0..5 {
        let obj = new_prefab();
        randomizer.randomize_object(&obj);
        obj.set_exported(Name::new(&format!("obj{}", index)));
        transaction.add(obj.clone());
        tops.push(obj);
    }

    transaction.load_and_mount().expect("load and mount");
    assert_eq!(transaction.state(), TransactionState::Mounted);

    for obj in &tops {
        assert!(obj.is_loaded());
        let outer = obj.outer().expect("owned while loaded");
        assert!(Arc::ptr_eq(&outer, &transaction));
        assert_eq!(
            obj.path_name().expect("exported and owned"),
            format!("UnitTest_Input/{}", obj.exported_name().unwrap())
        );
    }

    let found = specular::find_object_by_path("UnitTest_Input/obj3").expect("published");
    assert!(Arc::ptr_eq(&found, &tops[3]));
    assert!(database()
        .find_transaction(&Name::new("UnitTest_Input"))
        .is_some());

    transaction.unmount_and_unload().expect("unmount and unload");

    assert!(specular::find_object_by_path("UnitTest_Input/obj3").is_none());
    for obj in &tops {
        assert!(obj.is_unloaded());
        assert!(obj.outer().is_none());
    }

    // The database is back to its pre-mount state.
    assert_eq!(database().namespaces(), namespaces_before);
    assert_eq!(database().object_count(), objects_before);
}

#[test]
fn test_linearization_orders_dependencies_first() {
    specular::startup();

    let transaction =
        MetaTransaction::new(Name::new("Linearize_Order"), TransactionFlags::empty());

    let leaf = new_prefab();
    let root = new_prefab();
    root.with_downcast_mut::<Prefab, _>(|p| p.next = ObjPtr::new(leaf.clone()).unwrap())
        .expect("prefab payload");
    transaction.add(root.clone());

    transaction.load().expect("load");

    let loaded = transaction.loaded_refs();
    assert_eq!(loaded.len(), 2);
    assert!(Arc::ptr_eq(&loaded[0], &leaf), "dependency loads first");
    assert!(Arc::ptr_eq(&loaded[1], &root));
    assert!(leaf.is_loaded());

    transaction.unload().expect("unload");
    assert!(leaf.is_unloaded());
    assert!(leaf.outer().is_none());

    root.with_downcast_mut::<Prefab, _>(|p| p.next.clear())
        .expect("prefab payload");
}

#[test]
fn test_invalid_transitions_are_hard_errors() {
    specular::startup();

    let transaction =
        MetaTransaction::new(Name::new("InvalidState_T"), TransactionFlags::empty());

    let err = transaction.mount().unwrap_err();
    assert!(matches!(err, TransactionError::InvalidState { .. }));
    assert!(err.is_hard_error());

    let err = transaction.unload().unwrap_err();
    assert!(matches!(err, TransactionError::InvalidState { .. }));

    transaction.load().expect("load from unloaded");
    let err = transaction.load().unwrap_err();
    assert!(matches!(err, TransactionError::InvalidState { .. }));

    transaction.unload().expect("unload");
}

#[test]
fn test_circular_transaction_import_is_fatal() {
    specular::startup();

    let a = MetaTransaction::new(Name::new("Circular_A"), TransactionFlags::empty());
    let b = MetaTransaction::new(Name::new("Circular_B"), TransactionFlags::empty());

    // A owns an exported object.
    let a1 = new_prefab();
    a1.set_exported(Name::new("a1"));
    a.add(a1.clone());
    a.load().expect("load A");

    // B references A's exported object: a legal one-way import.
    let b1 = new_prefab();
    b1.set_exported(Name::new("b1"));
    b1.with_downcast_mut::<Prefab, _>(|p| p.next = ObjPtr::new(a1.clone()).unwrap())
        .expect("prefab payload");
    b.add(b1.clone());
    b.load().expect("load B");
    assert_eq!(b.imported_refs().len(), 1);

    // Close the loop: A now references B's exported object. Reloading A
    // must detect the circular transaction import.
    a1.with_downcast_mut::<Prefab, _>(|p| p.next = ObjPtr::new(b1.clone()).unwrap())
        .expect("prefab payload");

    let err = a.reload().unwrap_err();
    match &err {
        TransactionError::CircularImport { namespace, other } => {
            assert_eq!(namespace.as_str(), "Circular_A");
            assert_eq!(other.as_str(), "Circular_B");
        }
        other => panic!("expected CircularImport, got {:?}", other),
    }
    assert!(err.is_hard_error());
    assert!(err.to_string().contains("circular transaction import"));
    assert_eq!(a.state(), TransactionState::Unloaded);

    // Cleanup: break the cycle and unload B.
    a1.with_downcast_mut::<Prefab, _>(|p| p.next.clear())
        .expect("prefab payload");
    b.unload().expect("unload B");
    b1.with_downcast_mut::<Prefab, _>(|p| p.next.clear())
        .expect("prefab payload");
}

#[test]
fn test_mount_collisions_are_fatal() {
    specular::startup();

    let first = MetaTransaction::new(Name::new("Collision_NS"), TransactionFlags::empty());
    let obj = new_prefab();
    obj.set_exported(Name::new("unique"));
    first.add(obj);
    first.load_and_mount().expect("first mount");

    // Same namespace, fresh transaction: the namespace is taken.
    let second = MetaTransaction::new(Name::new("Collision_NS"), TransactionFlags::empty());
    second.add(new_prefab());
    second.load().expect("load");
    let err = second.mount().unwrap_err();
    assert!(matches!(err, TransactionError::NamespaceCollision { .. }));
    assert_eq!(second.state(), TransactionState::Loaded);

    second.unload().expect("unload second");
    first.unmount_and_unload().expect("teardown first");
}

#[test]
fn test_structurally_equal_transactions_deep_compare_equal() {
    specular::startup();

    let build = |namespace: &str| {
        let transaction = MetaTransaction::new(Name::new(namespace), TransactionFlags::empty());
        let mut randomizer = Randomizer::new(0xfeed_f00d, 3);
        for _ in 0..3 {
            let obj = new_prefab();
            randomizer.randomize_object(&obj);
            transaction.add(obj);
        }
        transaction
    };

    let first = build("DeepEquals_A");
    let second = build("DeepEquals_B");
    // Same seed, same population order: structurally equal graphs.
    assert!(first.deep_equals(&second));
    assert!(second.deep_equals(&first));
}

#[test]
fn test_reload_keeps_top_objects() {
    specular::startup();

    let transaction = MetaTransaction::new(Name::new("Reload_T"), TransactionFlags::empty());
    let obj = new_prefab();
    obj.set_exported(Name::new("kept"));
    transaction.add(obj.clone());

    transaction.load_and_mount().expect("first mount");
    transaction.reload().expect("reload while mounted");
    assert_eq!(transaction.state(), TransactionState::Mounted);
    assert!(specular::find_object_by_path("Reload_T/kept").is_some());

    transaction.unmount_and_unload().expect("teardown");
    assert_eq!(transaction.top_objects().len(), 1);
}
