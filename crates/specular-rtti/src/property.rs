//! Reflected properties
//!
//! A [`MetaProperty`] names one field of a reflected class and projects it
//! out of the payload as an [`Atom`]. Setters promote the incoming value,
//! run the attached validator, and mark the object dirty.

use bitflags::bitflags;
use specular_types::Name;

use crate::any::Any;
use crate::atom::Atom;
use crate::error::RttiError;
use crate::object::{MetaObject, ObjectPayload, ReflectedObject};
use crate::traits::{same_traits, Describable, TypeTraits};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyFlags: u32 {
        /// Skipped by persistent walks unless the transaction keeps
        /// transients.
        const TRANSIENT  = 1 << 0;
        /// Skipped by walks unless the transaction keeps deprecated data.
        const DEPRECATED = 1 << 1;
        /// Rejected by [`MetaProperty::set`].
        const READONLY   = 1 << 2;
    }
}

type ProjectFn = dyn for<'a> Fn(&'a mut dyn ObjectPayload) -> Option<Atom<'a>> + Send + Sync;

type ValidatorFn = dyn Fn(&Atom<'_>) -> Result<(), String> + Send + Sync;

fn project_field<'a, C: ReflectedObject, F: Describable>(
    mut payload: &'a mut dyn ObjectPayload,
    project: fn(&mut C) -> &mut F,
) -> Option<Atom<'a>> {
    loop {
        if payload.as_any().is::<C>() {
            let concrete = ObjectPayload::as_any_mut(payload).downcast_mut::<C>()?;
            return Some(Atom::new(project(concrete)));
        }
        // A derived payload embeds its parent part; inherited fields live
        // there.
        payload = ObjectPayload::parent_payload_mut(payload)?;
    }
}

/// Named, typed accessor on a reflected class.
pub struct MetaProperty {
    name: Name,
    flags: PropertyFlags,
    traits_fn: fn() -> &'static dyn TypeTraits,
    project_fn: Box<ProjectFn>,
    validator: Option<Box<ValidatorFn>>,
}

impl MetaProperty {
    pub(crate) fn new<C: ReflectedObject, F: Describable>(
        name: &str,
        flags: PropertyFlags,
        project: fn(&mut C) -> &mut F,
    ) -> Self {
        MetaProperty {
            name: Name::new(name),
            flags,
            // Resolved lazily: eager traits interning here would re-enter
            // the class registrar for self-referential classes.
            traits_fn: F::traits,
            project_fn: Box::new(move |payload| project_field::<C, F>(payload, project)),
            validator: None,
        }
    }

    pub(crate) fn with_validator(
        mut self,
        validator: impl Fn(&Atom<'_>) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn flags(&self) -> PropertyFlags {
        self.flags
    }

    pub fn traits(&self) -> &'static dyn TypeTraits {
        (self.traits_fn)()
    }

    pub fn is_transient(&self) -> bool {
        self.flags.contains(PropertyFlags::TRANSIENT)
    }

    pub fn is_deprecated(&self) -> bool {
        self.flags.contains(PropertyFlags::DEPRECATED)
    }

    pub fn is_readonly(&self) -> bool {
        self.flags.contains(PropertyFlags::READONLY)
    }

    /// Borrows the field out of a payload; `None` when the payload is of a
    /// different class.
    pub fn project<'a>(&self, payload: &'a mut dyn ObjectPayload) -> Option<Atom<'a>> {
        (self.project_fn)(payload)
    }

    /// Runs `f` over the field's atom under the object's payload lock.
    pub fn with_atom<R>(&self, obj: &MetaObject, f: impl FnOnce(Atom<'_>) -> R) -> Option<R> {
        obj.with_payload_mut(|payload| self.project(payload).map(f))
    }

    /// Copies the current value out as an [`Any`].
    pub fn get(&self, obj: &MetaObject) -> Option<Any> {
        self.with_atom(obj, |atom| {
            let mut out = Any::empty();
            let slot = out.reset(atom.traits());
            atom.deep_copy_to(&slot);
            out
        })
    }

    /// Stores `src` into the field, promoting when the types differ.
    /// Validates first, marks the object dirty on success.
    pub fn set(&self, obj: &MetaObject, src: &Atom<'_>) -> Result<(), RttiError> {
        if self.is_readonly() {
            return Err(RttiError::ReadOnlyProperty {
                property: self.name.clone(),
            });
        }
        if let Some(validator) = &self.validator {
            validator(src).map_err(|reason| RttiError::ValidationFailed {
                property: self.name.clone(),
                reason,
            })?;
        }

        let stored = obj.with_payload_mut(|payload| {
            let slot = self.project(payload).ok_or_else(|| RttiError::UnknownProperty {
                class: obj.class().name().clone(),
                property: self.name.clone(),
            })?;
            if same_traits(slot.traits(), src.traits()) {
                src.deep_copy_to(&slot);
                Ok(())
            } else if src.promote_copy_to(&slot) {
                Ok(())
            } else {
                Err(RttiError::IncompatibleTraits {
                    from: src.type_infos().name().to_string(),
                    to: slot.type_infos().name().to_string(),
                })
            }
        });

        stored?;
        obj.mark_dirty();
        Ok(())
    }
}

impl std::fmt::Debug for MetaProperty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MetaProperty('{}', {}, {:?})",
            self.name,
            self.traits().type_infos().name(),
            self.flags
        )
    }
}
