//! Atom visitors
//!
//! A visitor walks any described value by traits dispatch: one method per
//! category plus one typed hook per native scalar. Return values are
//! booleans and propagate outward to stop a traversal early.
//!
//! Category methods are required; the `recurse_*` helpers provide the
//! default depth-first behavior so implementations stay one-liners unless
//! they need something custom. Visitors drive serialization,
//! randomization, reference collection and pretty-printing.

use std::path::PathBuf;

use bitflags::bitflags;
use specular_types::Name;

use crate::atom::Atom;
use crate::dico::DicoTraits;
use crate::list::ListTraits;
use crate::object::{ObjRef, ObjectTraits};
use crate::pair::PairTraits;
use crate::scalar::{Blob, ScalarTraits};

bitflags! {
    /// Walk-policy flags honored when traversing object properties.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VisitorFlags: u32 {
        /// Also walk properties marked deprecated.
        const KEEP_DEPRECATED = 1 << 0;
        /// Also walk properties marked transient.
        const KEEP_TRANSIENT  = 1 << 1;
    }
}

macro_rules! scalar_hooks {
    ($(($hook:ident, $ty:ty)),+ $(,)?) => {
        $(
        fn $hook(&mut self, value: &mut $ty) -> bool {
            let _ = value;
            true
        }
        )+
    };
}

/// Visitor over described values.
pub trait AtomVisitor {
    fn visitor_flags(&self) -> VisitorFlags {
        VisitorFlags::empty()
    }

    fn visit_scalar(&mut self, scalar: &dyn ScalarTraits, atom: Atom<'_>) -> bool;

    fn visit_pair(&mut self, pair: &dyn PairTraits, atom: Atom<'_>) -> bool;

    fn visit_list(&mut self, list: &dyn ListTraits, atom: Atom<'_>) -> bool;

    fn visit_dico(&mut self, dico: &dyn DicoTraits, atom: Atom<'_>) -> bool;

    fn visit_object(&mut self, object: &dyn ObjectTraits, atom: Atom<'_>) -> bool;

    scalar_hooks! {
        (visit_bool, bool),
        (visit_i8, i8),
        (visit_i16, i16),
        (visit_i32, i32),
        (visit_i64, i64),
        (visit_u8, u8),
        (visit_u16, u16),
        (visit_u32, u32),
        (visit_u64, u64),
        (visit_f32, f32),
        (visit_f64, f64),
        (visit_string, String),
        (visit_name, Name),
        (visit_path, PathBuf),
        (visit_blob, Blob),
    }
}

/// Default scalar behavior: dispatch to the typed hook.
pub fn dispatch_scalar(
    visitor: &mut dyn AtomVisitor,
    scalar: &dyn ScalarTraits,
    atom: Atom<'_>,
) -> bool {
    scalar.visit_typed(atom, visitor)
}

/// Default pair behavior: first, then second.
pub fn recurse_pair(visitor: &mut dyn AtomVisitor, pair: &dyn PairTraits, atom: Atom<'_>) -> bool {
    pair.first(atom).accept(visitor) && pair.second(atom).accept(visitor)
}

/// Default list behavior: every element in insertion order.
pub fn recurse_list(visitor: &mut dyn AtomVisitor, list: &dyn ListTraits, atom: Atom<'_>) -> bool {
    list.for_each(atom, &mut |item| item.accept(visitor))
}

/// Default dico behavior: every key, then its value.
pub fn recurse_dico(visitor: &mut dyn AtomVisitor, dico: &dyn DicoTraits, atom: Atom<'_>) -> bool {
    dico.for_each(atom, &mut |key, value| {
        key.accept(visitor) && value.accept(visitor)
    })
}

/// Default object behavior: walk the referenced object's properties.
///
/// Weak references are never followed. The object's visited flag marks the
/// current path so that cyclic graphs terminate.
pub fn recurse_object(
    visitor: &mut dyn AtomVisitor,
    object: &dyn ObjectTraits,
    atom: Atom<'_>,
) -> bool {
    if object.is_weak() {
        return true;
    }
    let Some(obj) = object.get_ref(atom) else {
        return true;
    };
    if obj.test_and_set_visited() {
        return true;
    }
    let keep_going = visit_object_properties(visitor, &obj);
    obj.clear_visited();
    keep_going
}

/// Walks one object's properties (ancestors first), honoring the visitor's
/// deprecated/transient policy.
pub fn visit_object_properties(visitor: &mut dyn AtomVisitor, obj: &ObjRef) -> bool {
    let flags = visitor.visitor_flags();
    let class = obj.class();
    obj.with_payload_mut(|payload| {
        for property in class.all_properties() {
            if property.is_deprecated() && !flags.contains(VisitorFlags::KEEP_DEPRECATED) {
                continue;
            }
            if property.is_transient() && !flags.contains(VisitorFlags::KEEP_TRANSIENT) {
                continue;
            }
            let Some(atom) = property.project(&mut *payload) else {
                continue;
            };
            if !atom.accept(visitor) {
                return false;
            }
        }
        true
    })
}

/// Depth-first reference collection over an object graph.
///
/// `prefix` runs before descending into an object and decides whether to
/// recurse (returning false skips the object entirely, including its
/// postfix); `postfix` runs after the object's references were visited, so
/// appending there yields a dependencies-first linearization.
pub fn collect_references(
    tops: &[ObjRef],
    prefix: &mut dyn FnMut(&ObjRef) -> bool,
    postfix: &mut dyn FnMut(&ObjRef),
    flags: VisitorFlags,
) {
    let mut collector = RefCollector {
        prefix,
        postfix,
        flags,
    };
    for obj in tops {
        collector.descend(obj);
    }
}

struct RefCollector<'f> {
    prefix: &'f mut dyn FnMut(&ObjRef) -> bool,
    postfix: &'f mut dyn FnMut(&ObjRef),
    flags: VisitorFlags,
}

impl RefCollector<'_> {
    fn descend(&mut self, obj: &ObjRef) -> bool {
        if !(self.prefix)(obj) {
            return true;
        }
        let keep_going = visit_object_properties(self, obj);
        (self.postfix)(obj);
        keep_going
    }
}

impl AtomVisitor for RefCollector<'_> {
    fn visitor_flags(&self) -> VisitorFlags {
        self.flags
    }

    fn visit_scalar(&mut self, _scalar: &dyn ScalarTraits, _atom: Atom<'_>) -> bool {
        true
    }

    fn visit_pair(&mut self, pair: &dyn PairTraits, atom: Atom<'_>) -> bool {
        recurse_pair(self, pair, atom)
    }

    fn visit_list(&mut self, list: &dyn ListTraits, atom: Atom<'_>) -> bool {
        recurse_list(self, list, atom)
    }

    fn visit_dico(&mut self, dico: &dyn DicoTraits, atom: Atom<'_>) -> bool {
        recurse_dico(self, dico, atom)
    }

    fn visit_object(&mut self, object: &dyn ObjectTraits, atom: Atom<'_>) -> bool {
        if object.is_weak() {
            return true;
        }
        match object.get_ref(atom) {
            Some(obj) => self.descend(&obj),
            None => true,
        }
    }
}

/// Indented textual dump of any described value.
pub struct PrettyPrinter {
    out: String,
    indent: usize,
}

impl PrettyPrinter {
    pub fn new() -> Self {
        PrettyPrinter {
            out: String::new(),
            indent: 0,
        }
    }

    pub fn print(atom: Atom<'_>) -> String {
        let mut printer = PrettyPrinter::new();
        atom.accept(&mut printer);
        printer.out
    }

    pub fn print_object(obj: &ObjRef) -> String {
        let mut printer = PrettyPrinter::new();
        printer.object_header(obj);
        printer.indent += 1;
        printer.properties(obj);
        printer.indent -= 1;
        printer.out
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn object_header(&mut self, obj: &ObjRef) {
        let name = obj
            .exported_name()
            .map(|n| format!(" '{}'", n))
            .unwrap_or_default();
        self.line(&format!("{}{}", obj.class().name(), name));
    }

    fn properties(&mut self, obj: &ObjRef) {
        let class = obj.class();
        obj.with_payload_mut(|payload| {
            for property in class.all_properties() {
                if let Some(atom) = property.project(&mut *payload) {
                    self.line(&format!("{} =", property.name()));
                    self.indent += 1;
                    atom.accept(self);
                    self.indent -= 1;
                }
            }
        });
    }
}

impl Default for PrettyPrinter {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! printer_hooks {
    ($(($hook:ident, $ty:ty, $fmt:literal)),+ $(,)?) => {
        $(
        fn $hook(&mut self, value: &mut $ty) -> bool {
            self.line(&format!($fmt, value));
            true
        }
        )+
    };
}

impl AtomVisitor for PrettyPrinter {
    fn visit_scalar(&mut self, scalar: &dyn ScalarTraits, atom: Atom<'_>) -> bool {
        dispatch_scalar(self, scalar, atom)
    }

    fn visit_pair(&mut self, pair: &dyn PairTraits, atom: Atom<'_>) -> bool {
        self.line("pair");
        self.indent += 1;
        let keep_going = recurse_pair(self, pair, atom);
        self.indent -= 1;
        keep_going
    }

    fn visit_list(&mut self, list: &dyn ListTraits, atom: Atom<'_>) -> bool {
        self.line(&format!("list[{}]", list.count(atom)));
        self.indent += 1;
        let keep_going = recurse_list(self, list, atom);
        self.indent -= 1;
        keep_going
    }

    fn visit_dico(&mut self, dico: &dyn DicoTraits, atom: Atom<'_>) -> bool {
        self.line(&format!("dico[{}]", dico.count(atom)));
        self.indent += 1;
        let keep_going = recurse_dico(self, dico, atom);
        self.indent -= 1;
        keep_going
    }

    fn visit_object(&mut self, object: &dyn ObjectTraits, atom: Atom<'_>) -> bool {
        if object.is_weak() {
            self.line("(weak ref)");
            return true;
        }
        match object.get_ref(atom) {
            Some(obj) => {
                if obj.test_and_set_visited() {
                    self.line("(already printed)");
                    return true;
                }
                self.object_header(&obj);
                self.indent += 1;
                self.properties(&obj);
                self.indent -= 1;
                obj.clear_visited();
                true
            }
            None => {
                self.line("(null ref)");
                true
            }
        }
    }

    printer_hooks! {
        (visit_bool, bool, "{}"),
        (visit_i8, i8, "{}"),
        (visit_i16, i16, "{}"),
        (visit_i32, i32, "{}"),
        (visit_i64, i64, "{}"),
        (visit_u8, u8, "{}"),
        (visit_u16, u16, "{}"),
        (visit_u32, u32, "{}"),
        (visit_u64, u64, "{}"),
        (visit_f32, f32, "{}"),
        (visit_f64, f64, "{}"),
        (visit_string, String, "{:?}"),
        (visit_name, Name, "'{}'"),
        (visit_path, PathBuf, "{:?}"),
    }

    fn visit_blob(&mut self, value: &mut Blob) -> bool {
        self.line(&format!("blob[{} bytes]", value.0.len()));
        true
    }
}
