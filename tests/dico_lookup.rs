//! Dictionary lookup over heterogeneous values held in `Any`.

use std::collections::HashMap;

use specular::make_atom;
use specular::rtti::{Any, DicoTraits};

#[test]
fn test_heterogeneous_dico_lookup() {
    specular::startup();

    let mut dico: HashMap<String, Any> = HashMap::new();
    dico.insert("Toto".to_string(), Any::new(vec![1.0_f32, 2.0, 3.0]));
    dico.insert("Split".to_string(), Any::new("Toto".to_string()));

    let atom = make_atom(&mut dico);
    let traits = atom.traits().as_dico().expect("dico category");
    assert_eq!(traits.count(atom), 2);

    let mut key = "Toto".to_string();
    let found = traits
        .find(atom, &make_atom(&mut key))
        .expect("key is present");

    let mut expected = Any::new(vec![1.0_f32, 2.0, 3.0]);
    assert!(found.deep_equals(&make_atom(&mut expected)));

    let mut wrong = Any::new(vec![1.0_f32, 2.0, 4.0]);
    assert!(!found.deep_equals(&make_atom(&mut wrong)));

    let mut missing = "Tata".to_string();
    assert!(traits.find(atom, &make_atom(&mut missing)).is_none());
}

#[test]
fn test_lookup_after_default_move_insert() {
    specular::startup();

    let mut dico: HashMap<String, Any> = HashMap::new();
    let atom = make_atom(&mut dico);
    let traits = atom.traits().as_dico().expect("dico category");

    let mut key = "Config".to_string();
    let prior = traits.count(atom);
    let slot = traits.add_default_move(atom, &make_atom(&mut key));
    *slot.typed_data::<Any>() = Any::new(123_i32);
    assert!(key.is_empty());
    assert_eq!(traits.count(atom), prior + 1);

    let mut probe = "Config".to_string();
    let mut found = traits
        .find(atom, &make_atom(&mut probe))
        .expect("inserted key resolves")
        .typed_data::<Any>()
        .clone();
    assert_eq!(*found.downcast_mut::<i32>().unwrap(), 123);
}
