//! Native scalar traits
//!
//! Scalars are the leaf types of the descriptor system: booleans, integers,
//! floats, strings, names, filesystem paths, binary blobs. Each native type
//! gets one interned [`ScalarTraitsImpl`]; user enums are reflected through
//! their underlying scalar via [`impl_reflected_enum!`](crate::impl_reflected_enum).
//!
//! Numeric promotion follows one rule: no precision loss, no overflow,
//! checked against the actual value; otherwise the promotion fails.

use std::hash::Hasher;
use std::marker::PhantomData;
use std::path::PathBuf;

use specular_types::{Name, NativeType, TypeInfos};

use crate::any::promote_prologue;
use crate::atom::Atom;
use crate::traits::{intern, traits_of, Describable, TypeTraits};
use crate::visitor::AtomVisitor;

/// Opaque binary payload, distinct from `Vec<u8>` lists.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Blob(pub Vec<u8>);

/// Category view over scalar traits.
pub trait ScalarTraits: TypeTraits {
    /// The native kind, or the underlying kind for reflected enums.
    fn native_type(&self) -> NativeType;

    fn is_enum(&self) -> bool {
        false
    }

    /// Dispatches to the visitor's typed hook for this scalar kind.
    fn visit_typed(&self, atom: Atom<'_>, visitor: &mut dyn AtomVisitor) -> bool;
}

/// Behavior each native scalar type plugs into [`ScalarTraitsImpl`].
#[doc(hidden)]
pub trait ScalarValue: Default + Clone + PartialEq + Send + Sync + 'static {
    const NATIVE: NativeType;

    fn visit(visitor: &mut dyn AtomVisitor, value: &mut Self) -> bool;

    fn hash_scalar(&self, state: &mut dyn Hasher);

    /// Value-checked promotion into a different scalar kind.
    fn promote_into(&self, dst: &Atom<'_>) -> bool {
        let _ = dst;
        false
    }
}

pub(crate) struct ScalarTraitsImpl<T: ScalarValue> {
    infos: TypeInfos,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ScalarValue> ScalarTraitsImpl<T> {
    pub(crate) fn new() -> Self {
        ScalarTraitsImpl {
            infos: TypeInfos::scalar(T::NATIVE, std::mem::size_of::<T>(), std::mem::align_of::<T>()),
            _marker: PhantomData,
        }
    }
}

impl<T: ScalarValue + Describable> TypeTraits for ScalarTraitsImpl<T> {
    fn type_infos(&self) -> &TypeInfos {
        &self.infos
    }

    fn static_handle(&self) -> &'static dyn TypeTraits {
        T::traits()
    }

    unsafe fn create(&self, dst: *mut u8) {
        dst.cast::<T>().write(T::default());
    }

    unsafe fn create_copy(&self, dst: *mut u8, src: *const u8) {
        dst.cast::<T>().write((*src.cast::<T>()).clone());
    }

    unsafe fn create_move(&self, dst: *mut u8, src: *mut u8) {
        dst.cast::<T>()
            .write(std::mem::take(&mut *src.cast::<T>()));
    }

    unsafe fn destroy(&self, data: *mut u8) {
        data.cast::<T>().drop_in_place();
    }

    unsafe fn is_default_value(&self, data: *const u8) -> bool {
        *data.cast::<T>() == T::default()
    }

    unsafe fn reset_to_default(&self, data: *mut u8) {
        *data.cast::<T>() = T::default();
    }

    unsafe fn equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        *lhs.cast::<T>() == *rhs.cast::<T>()
    }

    unsafe fn hash_value(&self, data: *const u8, state: &mut dyn Hasher) {
        (*data.cast::<T>()).hash_scalar(state);
    }

    unsafe fn deep_equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        self.equals(lhs, rhs)
    }

    unsafe fn deep_copy(&self, src: *const u8, dst: *mut u8) {
        *dst.cast::<T>() = (*src.cast::<T>()).clone();
    }

    unsafe fn promote_copy(&self, src: *const u8, dst: Atom<'_>) -> bool {
        if let Some(done) = promote_prologue(self, src, &dst) {
            return done;
        }
        (*src.cast::<T>()).promote_into(&dst)
    }

    unsafe fn promote_move(&self, src: *mut u8, dst: Atom<'_>) -> bool {
        if self.promote_copy(src, dst) {
            self.reset_to_default(src);
            true
        } else {
            false
        }
    }

    fn common_type(&self, other: &'static dyn TypeTraits) -> Option<&'static dyn TypeTraits> {
        if other.id() == self.id() {
            return Some(other);
        }
        let other_scalar = other.as_scalar()?;
        if other_scalar.is_enum() {
            return None;
        }
        scalar_common_type(T::NATIVE, other_scalar.native_type())
    }

    fn as_scalar(&self) -> Option<&dyn ScalarTraits> {
        Some(self)
    }

    fn accept(&self, atom: Atom<'_>, visitor: &mut dyn AtomVisitor) -> bool {
        visitor.visit_scalar(self, atom)
    }
}

impl<T: ScalarValue + Describable> ScalarTraits for ScalarTraitsImpl<T> {
    fn native_type(&self) -> NativeType {
        T::NATIVE
    }

    fn visit_typed(&self, atom: Atom<'_>, visitor: &mut dyn AtomVisitor) -> bool {
        T::visit(visitor, unsafe { atom.typed_data_unchecked::<T>() })
    }
}

fn dst_native(dst: &Atom<'_>) -> Option<NativeType> {
    let scalar = dst.traits().as_scalar()?;
    if scalar.is_enum() {
        None
    } else {
        Some(scalar.native_type())
    }
}

/// Writes an integer value into any scalar slot able to hold it exactly.
fn store_int(dst: &Atom<'_>, value: i128) -> bool {
    let Some(native) = dst_native(dst) else {
        return false;
    };
    macro_rules! narrow {
        ($ty:ty) => {
            match <$ty>::try_from(value) {
                Ok(narrowed) => {
                    unsafe { *dst.typed_data_unchecked::<$ty>() = narrowed };
                    true
                }
                Err(_) => false,
            }
        };
    }
    match native {
        NativeType::I8 => narrow!(i8),
        NativeType::I16 => narrow!(i16),
        NativeType::I32 => narrow!(i32),
        NativeType::I64 => narrow!(i64),
        NativeType::U8 => narrow!(u8),
        NativeType::U16 => narrow!(u16),
        NativeType::U32 => narrow!(u32),
        NativeType::U64 => narrow!(u64),
        NativeType::F32 => {
            let widened = value as f32;
            if widened.is_finite() && widened as i128 == value {
                unsafe { *dst.typed_data_unchecked::<f32>() = widened };
                true
            } else {
                false
            }
        }
        NativeType::F64 => {
            let widened = value as f64;
            if widened.is_finite() && widened as i128 == value {
                unsafe { *dst.typed_data_unchecked::<f64>() = widened };
                true
            } else {
                false
            }
        }
        _ => false,
    }
}

/// Writes a float value into a wider (or equal) float slot. Floats never
/// promote to integers implicitly.
fn store_float(dst: &Atom<'_>, value: f64, source_is_f32: bool) -> bool {
    match dst_native(dst) {
        Some(NativeType::F64) => {
            unsafe { *dst.typed_data_unchecked::<f64>() = value };
            true
        }
        Some(NativeType::F32) => {
            let narrowed = value as f32;
            if source_is_f32 || f64::from(narrowed) == value {
                unsafe { *dst.typed_data_unchecked::<f32>() = narrowed };
                true
            } else {
                false
            }
        }
        _ => false,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum NumericClass {
    Signed(u32),
    Unsigned(u32),
    Float(u32),
}

fn classify(native: NativeType) -> Option<NumericClass> {
    Some(match native {
        NativeType::I8 => NumericClass::Signed(8),
        NativeType::I16 => NumericClass::Signed(16),
        NativeType::I32 => NumericClass::Signed(32),
        NativeType::I64 => NumericClass::Signed(64),
        NativeType::U8 => NumericClass::Unsigned(8),
        NativeType::U16 => NumericClass::Unsigned(16),
        NativeType::U32 => NumericClass::Unsigned(32),
        NativeType::U64 => NumericClass::Unsigned(64),
        NativeType::F32 => NumericClass::Float(32),
        NativeType::F64 => NumericClass::Float(64),
        _ => return None,
    })
}

fn signed_of(bits: u32) -> Option<NativeType> {
    Some(match bits {
        8 => NativeType::I8,
        16 => NativeType::I16,
        32 => NativeType::I32,
        64 => NativeType::I64,
        _ => return None,
    })
}

/// Join of two numeric kinds under the "every value promotes losslessly"
/// rule; `None` when no such kind exists (e.g. `u64` vs `i64`).
fn numeric_join(a: NativeType, b: NativeType) -> Option<NativeType> {
    use NumericClass::*;
    let (ca, cb) = (classify(a)?, classify(b)?);
    match (ca, cb) {
        (Signed(x), Signed(y)) => signed_of(x.max(y)),
        (Unsigned(x), Unsigned(y)) => Some(match x.max(y) {
            8 => NativeType::U8,
            16 => NativeType::U16,
            32 => NativeType::U32,
            _ => NativeType::U64,
        }),
        (Signed(s), Unsigned(u)) | (Unsigned(u), Signed(s)) => signed_of(s.max(u * 2)),
        (Float(x), Float(y)) => Some(if x.max(y) == 32 {
            NativeType::F32
        } else {
            NativeType::F64
        }),
        // Integers join with floats only while the mantissa covers them.
        (Float(f), Signed(i) | Unsigned(i)) | (Signed(i) | Unsigned(i), Float(f)) => {
            if f == 32 && i <= 16 {
                Some(NativeType::F32)
            } else if i <= 32 {
                Some(NativeType::F64)
            } else {
                None
            }
        }
    }
}

/// Traits handle for a native scalar kind.
pub fn native_traits(native: NativeType) -> Option<&'static dyn TypeTraits> {
    Some(match native {
        NativeType::Bool => traits_of::<bool>(),
        NativeType::I8 => traits_of::<i8>(),
        NativeType::I16 => traits_of::<i16>(),
        NativeType::I32 => traits_of::<i32>(),
        NativeType::I64 => traits_of::<i64>(),
        NativeType::U8 => traits_of::<u8>(),
        NativeType::U16 => traits_of::<u16>(),
        NativeType::U32 => traits_of::<u32>(),
        NativeType::U64 => traits_of::<u64>(),
        NativeType::F32 => traits_of::<f32>(),
        NativeType::F64 => traits_of::<f64>(),
        NativeType::Str => traits_of::<String>(),
        NativeType::Name => traits_of::<Name>(),
        NativeType::Path => traits_of::<PathBuf>(),
        NativeType::Blob => traits_of::<Blob>(),
        NativeType::Any => traits_of::<crate::any::Any>(),
        NativeType::ObjectRef => return None,
    })
}

pub(crate) fn scalar_common_type(
    a: NativeType,
    b: NativeType,
) -> Option<&'static dyn TypeTraits> {
    if a == b {
        return native_traits(a);
    }
    if let Some(joined) = numeric_join(a, b) {
        return native_traits(joined);
    }
    // Interned tokens widen to plain strings.
    if matches!(
        (a, b),
        (NativeType::Str, NativeType::Name) | (NativeType::Name, NativeType::Str)
    ) {
        return native_traits(NativeType::Str);
    }
    None
}

macro_rules! impl_int_scalars {
    ($(($ty:ty, $native:ident, $hook:ident)),+ $(,)?) => {
        $(
        impl ScalarValue for $ty {
            const NATIVE: NativeType = NativeType::$native;

            fn visit(visitor: &mut dyn AtomVisitor, value: &mut Self) -> bool {
                visitor.$hook(value)
            }

            fn hash_scalar(&self, mut state: &mut dyn Hasher) {
                std::hash::Hash::hash(self, &mut state);
            }

            fn promote_into(&self, dst: &Atom<'_>) -> bool {
                store_int(dst, *self as i128)
            }
        }

        impl Describable for $ty {
            fn traits() -> &'static dyn TypeTraits {
                intern::<$ty>(|| Box::new(ScalarTraitsImpl::<$ty>::new()))
            }
        }
        )+
    };
}

impl_int_scalars! {
    (i8, I8, visit_i8),
    (i16, I16, visit_i16),
    (i32, I32, visit_i32),
    (i64, I64, visit_i64),
    (u8, U8, visit_u8),
    (u16, U16, visit_u16),
    (u32, U32, visit_u32),
    (u64, U64, visit_u64),
}

macro_rules! impl_plain_scalars {
    ($(($ty:ty, $native:ident, $hook:ident)),+ $(,)?) => {
        $(
        impl ScalarValue for $ty {
            const NATIVE: NativeType = NativeType::$native;

            fn visit(visitor: &mut dyn AtomVisitor, value: &mut Self) -> bool {
                visitor.$hook(value)
            }

            fn hash_scalar(&self, mut state: &mut dyn Hasher) {
                std::hash::Hash::hash(self, &mut state);
            }
        }

        impl Describable for $ty {
            fn traits() -> &'static dyn TypeTraits {
                intern::<$ty>(|| Box::new(ScalarTraitsImpl::<$ty>::new()))
            }
        }
        )+
    };
}

impl_plain_scalars! {
    (bool, Bool, visit_bool),
    (PathBuf, Path, visit_path),
    (Blob, Blob, visit_blob),
}

impl ScalarValue for String {
    const NATIVE: NativeType = NativeType::Str;

    fn visit(visitor: &mut dyn AtomVisitor, value: &mut Self) -> bool {
        visitor.visit_string(value)
    }

    fn hash_scalar(&self, mut state: &mut dyn Hasher) {
        std::hash::Hash::hash(self, &mut state);
    }

    fn promote_into(&self, dst: &Atom<'_>) -> bool {
        if dst_native(dst) == Some(NativeType::Name) {
            unsafe { *dst.typed_data_unchecked::<Name>() = Name::new(self) };
            true
        } else {
            false
        }
    }
}

impl Describable for String {
    fn traits() -> &'static dyn TypeTraits {
        intern::<String>(|| Box::new(ScalarTraitsImpl::<String>::new()))
    }
}

impl ScalarValue for Name {
    const NATIVE: NativeType = NativeType::Name;

    fn visit(visitor: &mut dyn AtomVisitor, value: &mut Self) -> bool {
        visitor.visit_name(value)
    }

    fn hash_scalar(&self, mut state: &mut dyn Hasher) {
        std::hash::Hash::hash(self, &mut state);
    }

    fn promote_into(&self, dst: &Atom<'_>) -> bool {
        if dst_native(dst) == Some(NativeType::Str) {
            unsafe { *dst.typed_data_unchecked::<String>() = self.as_str().to_string() };
            true
        } else {
            false
        }
    }
}

impl Describable for Name {
    fn traits() -> &'static dyn TypeTraits {
        intern::<Name>(|| Box::new(ScalarTraitsImpl::<Name>::new()))
    }
}

impl ScalarValue for f32 {
    const NATIVE: NativeType = NativeType::F32;

    fn visit(visitor: &mut dyn AtomVisitor, value: &mut Self) -> bool {
        visitor.visit_f32(value)
    }

    fn hash_scalar(&self, state: &mut dyn Hasher) {
        state.write_u32(self.to_bits());
    }

    fn promote_into(&self, dst: &Atom<'_>) -> bool {
        store_float(dst, f64::from(*self), true)
    }
}

impl Describable for f32 {
    fn traits() -> &'static dyn TypeTraits {
        intern::<f32>(|| Box::new(ScalarTraitsImpl::<f32>::new()))
    }
}

impl ScalarValue for f64 {
    const NATIVE: NativeType = NativeType::F64;

    fn visit(visitor: &mut dyn AtomVisitor, value: &mut Self) -> bool {
        visitor.visit_f64(value)
    }

    fn hash_scalar(&self, state: &mut dyn Hasher) {
        state.write_u64(self.to_bits());
    }

    fn promote_into(&self, dst: &Atom<'_>) -> bool {
        store_float(dst, *self, false)
    }
}

impl Describable for f64 {
    fn traits() -> &'static dyn TypeTraits {
        intern::<f64>(|| Box::new(ScalarTraitsImpl::<f64>::new()))
    }
}

/// Allowed underlying representations for reflected enums.
pub trait EnumUnderlying: ScalarValue + Copy + Into<u64> + TryFrom<u64> {}

impl EnumUnderlying for u8 {}
impl EnumUnderlying for u16 {}
impl EnumUnderlying for u32 {}
impl EnumUnderlying for u64 {}

/// A user enum reflected through its underlying scalar.
pub trait ReflectedEnum: Default + Copy + PartialEq + Send + Sync + 'static {
    const NAME: &'static str;

    type Underlying: EnumUnderlying;

    fn to_underlying(self) -> Self::Underlying;

    fn from_underlying(raw: Self::Underlying) -> Option<Self>
    where
        Self: Sized;
}

pub(crate) struct EnumTraitsImpl<E: ReflectedEnum> {
    infos: TypeInfos,
    _marker: PhantomData<fn() -> E>,
}

impl<E: ReflectedEnum> EnumTraitsImpl<E> {
    fn new() -> Self {
        EnumTraitsImpl {
            infos: TypeInfos::enumeration(
                E::NAME,
                E::Underlying::NATIVE,
                std::mem::size_of::<E>(),
                std::mem::align_of::<E>(),
            ),
            _marker: PhantomData,
        }
    }
}

/// Interns the traits instance for a reflected enum; used by
/// [`impl_reflected_enum!`](crate::impl_reflected_enum).
pub fn intern_enum<E: ReflectedEnum + Describable>() -> &'static dyn TypeTraits {
    intern::<E>(|| Box::new(EnumTraitsImpl::<E>::new()))
}

impl<E: ReflectedEnum + Describable> TypeTraits for EnumTraitsImpl<E> {
    fn type_infos(&self) -> &TypeInfos {
        &self.infos
    }

    fn static_handle(&self) -> &'static dyn TypeTraits {
        E::traits()
    }

    unsafe fn create(&self, dst: *mut u8) {
        dst.cast::<E>().write(E::default());
    }

    unsafe fn create_copy(&self, dst: *mut u8, src: *const u8) {
        dst.cast::<E>().write(*src.cast::<E>());
    }

    unsafe fn create_move(&self, dst: *mut u8, src: *mut u8) {
        dst.cast::<E>()
            .write(std::mem::replace(&mut *src.cast::<E>(), E::default()));
    }

    unsafe fn destroy(&self, _data: *mut u8) {}

    unsafe fn is_default_value(&self, data: *const u8) -> bool {
        *data.cast::<E>() == E::default()
    }

    unsafe fn reset_to_default(&self, data: *mut u8) {
        *data.cast::<E>() = E::default();
    }

    unsafe fn equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        *lhs.cast::<E>() == *rhs.cast::<E>()
    }

    unsafe fn hash_value(&self, data: *const u8, state: &mut dyn Hasher) {
        state.write_u64((*data.cast::<E>()).to_underlying().into());
    }

    unsafe fn deep_equals(&self, lhs: *const u8, rhs: *const u8) -> bool {
        self.equals(lhs, rhs)
    }

    unsafe fn deep_copy(&self, src: *const u8, dst: *mut u8) {
        *dst.cast::<E>() = *src.cast::<E>();
    }

    unsafe fn promote_copy(&self, src: *const u8, dst: Atom<'_>) -> bool {
        if let Some(done) = promote_prologue(self, src, &dst) {
            return done;
        }
        // An enum widens to any integer holding its underlying value.
        let raw: u64 = (*src.cast::<E>()).to_underlying().into();
        store_int(&dst, raw as i128)
    }

    unsafe fn promote_move(&self, src: *mut u8, dst: Atom<'_>) -> bool {
        if self.promote_copy(src, dst) {
            self.reset_to_default(src);
            true
        } else {
            false
        }
    }

    fn common_type(&self, other: &'static dyn TypeTraits) -> Option<&'static dyn TypeTraits> {
        if other.id() == self.id() {
            Some(other)
        } else {
            None
        }
    }

    fn as_scalar(&self) -> Option<&dyn ScalarTraits> {
        Some(self)
    }

    fn accept(&self, atom: Atom<'_>, visitor: &mut dyn AtomVisitor) -> bool {
        visitor.visit_scalar(self, atom)
    }
}

impl<E: ReflectedEnum + Describable> ScalarTraits for EnumTraitsImpl<E> {
    fn native_type(&self) -> NativeType {
        E::Underlying::NATIVE
    }

    fn is_enum(&self) -> bool {
        true
    }

    fn visit_typed(&self, atom: Atom<'_>, visitor: &mut dyn AtomVisitor) -> bool {
        let value = unsafe { atom.typed_data_unchecked::<E>() };
        let mut raw = value.to_underlying();
        let keep_going = E::Underlying::visit(visitor, &mut raw);
        // Out-of-range edits are dropped; the enum keeps its previous value.
        if let Some(decoded) = E::from_underlying(raw) {
            *value = decoded;
        }
        keep_going
    }
}

/// Wires a C-like enum into the descriptor system.
///
/// ```ignore
/// #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
/// #[repr(u32)]
/// enum Quality { #[default] Low = 0, Medium = 1, High = 2 }
/// impl_reflected_enum!(Quality : u32 { Low, Medium, High });
/// ```
#[macro_export]
macro_rules! impl_reflected_enum {
    ($ty:ident : $underlying:ty { $($variant:ident),+ $(,)? }) => {
        impl $crate::ReflectedEnum for $ty {
            const NAME: &'static str = stringify!($ty);

            type Underlying = $underlying;

            fn to_underlying(self) -> $underlying {
                self as $underlying
            }

            fn from_underlying(raw: $underlying) -> Option<Self> {
                $(
                    if raw == $ty::$variant as $underlying {
                        return Some($ty::$variant);
                    }
                )+
                None
            }
        }

        impl $crate::Describable for $ty {
            fn traits() -> &'static dyn $crate::TypeTraits {
                $crate::scalar::intern_enum::<$ty>()
            }
        }
    };
}
