//! Promotion scenarios: vector-to-list conversion with composite elements
//! and the lossless round-trip property of genuine promotions.

use std::collections::VecDeque;

use specular::make_atom;
use specular::rtti::ListTraits;

#[test]
fn test_vector_of_pairs_promotes_to_list() {
    specular::startup();

    let mut vector: Vec<(f32, f32)> = vec![(0.0, 0.0), (1.0, 1.0)];
    let mut list: VecDeque<(f32, f32)> = VecDeque::new();

    let src = make_atom(&mut vector);
    let dst = make_atom(&mut list);
    assert!(src.promote_copy_to(&dst));

    let dst_traits = dst.traits().as_list().expect("list category");
    assert_eq!(dst_traits.count(dst), 2);
    for index in 0..2 {
        let src_traits = src.traits().as_list().expect("list category");
        assert!(dst_traits
            .at(dst, index)
            .deep_equals(&src_traits.at(src, index)));
    }
}

#[test]
fn test_bidirectional_promotion_round_trips() {
    specular::startup();

    let mut original: Vec<i32> = vec![-3, 0, 1 << 20];
    let mut widened: VecDeque<i64> = VecDeque::new();
    let mut back: Vec<i32> = Vec::new();

    assert!(make_atom(&mut original).promote_copy_to(&make_atom(&mut widened)));
    assert!(make_atom(&mut widened).promote_copy_to(&make_atom(&mut back)));
    assert!(make_atom(&mut original).deep_equals(&make_atom(&mut back)));
}

#[test]
fn test_promote_move_resets_the_source() {
    specular::startup();

    let mut source: Vec<u16> = vec![1, 2, 3];
    let mut target: VecDeque<u32> = VecDeque::new();

    assert!(make_atom(&mut source).promote_move_to(&make_atom(&mut target)));
    assert!(source.is_empty());
    assert_eq!(target, VecDeque::from(vec![1_u32, 2, 3]));
}

#[test]
fn test_lossy_promotion_is_refused() {
    specular::startup();

    let mut big: Vec<i64> = vec![i64::MAX];
    let mut narrow: VecDeque<i32> = VecDeque::new();
    assert!(!make_atom(&mut big).promote_copy_to(&make_atom(&mut narrow)));

    let mut float: f64 = 2.5;
    let mut int: i64 = 0;
    assert!(!make_atom(&mut float).promote_copy_to(&make_atom(&mut int)));
}

#[test]
fn test_common_type_of_registered_composites() {
    specular::startup();

    // Register the join target first, then ask for the join.
    let joined = specular::rtti::traits_of::<Vec<i64>>();
    let a = specular::rtti::traits_of::<Vec<i32>>();
    let b = specular::rtti::traits_of::<VecDeque<i64>>();
    let common = a.common_type(b).expect("joinable element types");
    assert_eq!(common.id(), joined.id());
}
