//! Common bound for composite component types
//!
//! Collection and pair descriptors require their component types to be
//! default-constructible, clonable and shallow-comparable on top of being
//! described. Every built-in described type satisfies this.

use crate::traits::Describable;

/// Blanket bound for types usable as pair components, list elements and
/// dico keys/values.
pub trait DescribableValue: Describable + Default + Clone + PartialEq {}

impl<T: Describable + Default + Clone + PartialEq> DescribableValue for T {}
