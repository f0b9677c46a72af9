//! Test-side visitors: deterministic randomization and a byte-buffer
//! serializer exercising the visitor contract end to end.

use std::path::PathBuf;

use specular::rtti::visitor::{
    dispatch_scalar, recurse_list, recurse_pair, visit_object_properties,
};
use specular::rtti::{
    Any, Atom, AtomVisitor, Blob, DicoTraits, ListTraits, ObjRef, ObjectTraits, PairTraits,
    ScalarTraits,
};
use specular::types::Name;

/// Fills any described value with reproducible pseudo-random content
/// (xorshift64*, seeded). Object references are left untouched so the
/// graph shape stays under test control.
pub struct Randomizer {
    state: u64,
    max_dim: usize,
}

impl Randomizer {
    pub fn new(seed: u64, max_dim: usize) -> Self {
        assert!(max_dim > 0);
        Randomizer {
            state: seed | 1,
            max_dim,
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    fn next_dim(&mut self) -> usize {
        1 + (self.next() as usize % self.max_dim)
    }

    pub fn randomize(&mut self, atom: Atom<'_>) {
        atom.accept(self);
    }

    pub fn randomize_object(&mut self, obj: &ObjRef) {
        visit_object_properties(self, obj);
    }
}

macro_rules! randomize_int_hooks {
    ($(($hook:ident, $ty:ty)),+ $(,)?) => {
        $(
        fn $hook(&mut self, value: &mut $ty) -> bool {
            *value = self.next() as $ty;
            true
        }
        )+
    };
}

impl AtomVisitor for Randomizer {
    fn visit_scalar(&mut self, scalar: &dyn ScalarTraits, atom: Atom<'_>) -> bool {
        dispatch_scalar(self, scalar, atom)
    }

    fn visit_pair(&mut self, pair: &dyn PairTraits, atom: Atom<'_>) -> bool {
        recurse_pair(self, pair, atom)
    }

    fn visit_list(&mut self, list: &dyn ListTraits, atom: Atom<'_>) -> bool {
        let count = self.next_dim();
        list.empty(atom, count);
        for _ in 0..count {
            list.add_default(atom);
        }
        recurse_list(self, list, atom)
    }

    fn visit_dico(&mut self, dico: &dyn DicoTraits, atom: Atom<'_>) -> bool {
        let count = self.next_dim();
        dico.empty(atom, count);
        let mut key = Any::empty();
        for _ in 0..count {
            let key_atom = key.reset(dico.key_traits());
            if !key_atom.accept(self) {
                return false;
            }
            if dico.find(atom, &key_atom).is_some() {
                continue;
            }
            let value_atom = dico.add_default_move(atom, &key_atom);
            if !value_atom.accept(self) {
                return false;
            }
        }
        true
    }

    fn visit_object(&mut self, _object: &dyn ObjectTraits, _atom: Atom<'_>) -> bool {
        true
    }

    randomize_int_hooks! {
        (visit_i8, i8),
        (visit_i16, i16),
        (visit_i32, i32),
        (visit_i64, i64),
        (visit_u8, u8),
        (visit_u16, u16),
        (visit_u32, u32),
        (visit_u64, u64),
    }

    fn visit_bool(&mut self, value: &mut bool) -> bool {
        *value = self.next() & 1 == 1;
        true
    }

    fn visit_f32(&mut self, value: &mut f32) -> bool {
        *value = (self.next() % 4096) as f32 / 8.0;
        true
    }

    fn visit_f64(&mut self, value: &mut f64) -> bool {
        *value = (self.next() % 65536) as f64 / 16.0;
        true
    }

    fn visit_string(&mut self, value: &mut String) -> bool {
        *value = format!("str_{:08x}", self.next() as u32);
        true
    }

    fn visit_name(&mut self, value: &mut Name) -> bool {
        *value = Name::new(&format!("name_{:08x}", self.next() as u32));
        true
    }

    fn visit_path(&mut self, value: &mut PathBuf) -> bool {
        *value = PathBuf::from(format!("/virtual/{:08x}.asset", self.next() as u32));
        true
    }

    fn visit_blob(&mut self, value: &mut Blob) -> bool {
        let len = self.next_dim();
        value.0 = (0..len).map(|_| self.next() as u8).collect();
        true
    }
}

mod tag {
    pub const BOOL: u8 = 1;
    pub const I8: u8 = 2;
    pub const I16: u8 = 3;
    pub const I32: u8 = 4;
    pub const I64: u8 = 5;
    pub const U8: u8 = 6;
    pub const U16: u8 = 7;
    pub const U32: u8 = 8;
    pub const U64: u8 = 9;
    pub const F32: u8 = 10;
    pub const F64: u8 = 11;
    pub const STR: u8 = 12;
    pub const NAME: u8 = 13;
    pub const PATH: u8 = 14;
    pub const BLOB: u8 = 15;
}

/// Serializes described values into a tagged little-endian byte buffer by
/// walking them with the default traversal.
pub struct BinaryWriter {
    pub bytes: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        BinaryWriter { bytes: Vec::new() }
    }

    /// Serializes every non-transient property of `obj`, ancestors first.
    pub fn serialize_object(obj: &ObjRef) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        for property in obj.class().all_properties() {
            if property.is_transient() {
                continue;
            }
            let _ = property.with_atom(obj, |atom| {
                atom.accept(&mut writer);
            });
        }
        writer.bytes
    }

    fn put(&mut self, tag: u8, payload: &[u8]) {
        self.bytes.push(tag);
        self.bytes.extend_from_slice(payload);
    }

    fn put_bytes(&mut self, tag: u8, payload: &[u8]) {
        self.bytes.push(tag);
        self.bytes
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(payload);
    }
}

macro_rules! write_hooks {
    ($(($hook:ident, $ty:ty, $tag:expr)),+ $(,)?) => {
        $(
        fn $hook(&mut self, value: &mut $ty) -> bool {
            self.put($tag, &value.to_le_bytes());
            true
        }
        )+
    };
}

impl AtomVisitor for BinaryWriter {
    fn visit_scalar(&mut self, scalar: &dyn ScalarTraits, atom: Atom<'_>) -> bool {
        dispatch_scalar(self, scalar, atom)
    }

    fn visit_pair(&mut self, pair: &dyn PairTraits, atom: Atom<'_>) -> bool {
        recurse_pair(self, pair, atom)
    }

    fn visit_list(&mut self, list: &dyn ListTraits, atom: Atom<'_>) -> bool {
        self.bytes
            .extend_from_slice(&(list.count(atom) as u32).to_le_bytes());
        recurse_list(self, list, atom)
    }

    fn visit_dico(&mut self, dico: &dyn DicoTraits, atom: Atom<'_>) -> bool {
        self.bytes
            .extend_from_slice(&(dico.count(atom) as u32).to_le_bytes());
        dico.for_each(atom, &mut |key, value| {
            key.accept(self) && value.accept(self)
        })
    }

    fn visit_object(&mut self, _object: &dyn ObjectTraits, _atom: Atom<'_>) -> bool {
        // Object references are resolved by the transaction layer, not the
        // flat value stream.
        true
    }

    write_hooks! {
        (visit_i8, i8, tag::I8),
        (visit_i16, i16, tag::I16),
        (visit_i32, i32, tag::I32),
        (visit_i64, i64, tag::I64),
        (visit_u8, u8, tag::U8),
        (visit_u16, u16, tag::U16),
        (visit_u32, u32, tag::U32),
        (visit_u64, u64, tag::U64),
        (visit_f32, f32, tag::F32),
        (visit_f64, f64, tag::F64),
    }

    fn visit_bool(&mut self, value: &mut bool) -> bool {
        self.put(tag::BOOL, &[u8::from(*value)]);
        true
    }

    fn visit_string(&mut self, value: &mut String) -> bool {
        self.put_bytes(tag::STR, value.as_bytes());
        true
    }

    fn visit_name(&mut self, value: &mut Name) -> bool {
        self.put_bytes(tag::NAME, value.as_str().as_bytes());
        true
    }

    fn visit_path(&mut self, value: &mut PathBuf) -> bool {
        self.put_bytes(tag::PATH, value.to_string_lossy().as_bytes());
        true
    }

    fn visit_blob(&mut self, value: &mut Blob) -> bool {
        self.put_bytes(tag::BLOB, &value.0);
        true
    }
}

/// Reconstructs described values from a [`BinaryWriter`] stream by walking
/// the destination with the same traversal.
pub struct BinaryReader<'b> {
    bytes: &'b [u8],
    pos: usize,
}

impl<'b> BinaryReader<'b> {
    pub fn new(bytes: &'b [u8]) -> Self {
        BinaryReader { bytes, pos: 0 }
    }

    /// Reads every non-transient property of `obj` in serialization order.
    pub fn deserialize_object(obj: &ObjRef, bytes: &[u8]) {
        let mut reader = BinaryReader::new(bytes);
        for property in obj.class().all_properties() {
            if property.is_transient() {
                continue;
            }
            let _ = property.with_atom(obj, |atom| {
                atom.accept(&mut reader);
            });
        }
        assert_eq!(reader.pos, bytes.len(), "trailing bytes after read");
    }

    fn take(&mut self, len: usize) -> &'b [u8] {
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        slice
    }

    fn expect_tag(&mut self, tag: u8) {
        let found = self.take(1)[0];
        assert_eq!(found, tag, "stream tag mismatch at {}", self.pos - 1);
    }

    fn read_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take(4).try_into().expect("4 bytes"))
    }

    fn read_str(&mut self, tag: u8) -> String {
        self.expect_tag(tag);
        let len = self.read_u32() as usize;
        String::from_utf8(self.take(len).to_vec()).expect("utf-8 payload")
    }
}

macro_rules! read_hooks {
    ($(($hook:ident, $ty:ty, $tag:expr, $width:expr)),+ $(,)?) => {
        $(
        fn $hook(&mut self, value: &mut $ty) -> bool {
            self.expect_tag($tag);
            *value = <$ty>::from_le_bytes(self.take($width).try_into().expect("payload"));
            true
        }
        )+
    };
}

impl AtomVisitor for BinaryReader<'_> {
    fn visit_scalar(&mut self, scalar: &dyn ScalarTraits, atom: Atom<'_>) -> bool {
        dispatch_scalar(self, scalar, atom)
    }

    fn visit_pair(&mut self, pair: &dyn PairTraits, atom: Atom<'_>) -> bool {
        recurse_pair(self, pair, atom)
    }

    fn visit_list(&mut self, list: &dyn ListTraits, atom: Atom<'_>) -> bool {
        let count = self.read_u32() as usize;
        list.empty(atom, count);
        for _ in 0..count {
            let slot = list.add_default(atom);
            if !slot.accept(self) {
                return false;
            }
        }
        true
    }

    fn visit_dico(&mut self, dico: &dyn DicoTraits, atom: Atom<'_>) -> bool {
        let count = self.read_u32() as usize;
        dico.empty(atom, count);
        let mut key = Any::empty();
        for _ in 0..count {
            let key_atom = key.reset(dico.key_traits());
            if !key_atom.accept(self) {
                return false;
            }
            let value_atom = dico.add_default_move(atom, &key_atom);
            if !value_atom.accept(self) {
                return false;
            }
        }
        true
    }

    fn visit_object(&mut self, _object: &dyn ObjectTraits, _atom: Atom<'_>) -> bool {
        true
    }

    read_hooks! {
        (visit_i8, i8, tag::I8, 1),
        (visit_i16, i16, tag::I16, 2),
        (visit_i32, i32, tag::I32, 4),
        (visit_i64, i64, tag::I64, 8),
        (visit_u8, u8, tag::U8, 1),
        (visit_u16, u16, tag::U16, 2),
        (visit_u32, u32, tag::U32, 4),
        (visit_u64, u64, tag::U64, 8),
        (visit_f32, f32, tag::F32, 4),
        (visit_f64, f64, tag::F64, 8),
    }

    fn visit_bool(&mut self, value: &mut bool) -> bool {
        self.expect_tag(tag::BOOL);
        *value = self.take(1)[0] != 0;
        true
    }

    fn visit_string(&mut self, value: &mut String) -> bool {
        *value = self.read_str(tag::STR);
        true
    }

    fn visit_name(&mut self, value: &mut Name) -> bool {
        *value = Name::new(&self.read_str(tag::NAME));
        true
    }

    fn visit_path(&mut self, value: &mut PathBuf) -> bool {
        *value = PathBuf::from(self.read_str(tag::PATH));
        true
    }

    fn visit_blob(&mut self, value: &mut Blob) -> bool {
        self.expect_tag(tag::BLOB);
        let len = self.read_u32() as usize;
        value.0 = self.take(len).to_vec();
        true
    }
}

impl Default for BinaryWriter {
    fn default() -> Self {
        Self::new()
    }
}
