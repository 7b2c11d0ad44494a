//! List containers for repeated fields.
//!
//! Each container owns its 8-byte list header and keeps the header payload
//! synchronized with its contents, so that an enclosing [crate::Struct] can
//! fold size deltas into its own bookkeeping without re-scanning bodies.

use bitvec::prelude::{BitVec, Lsb0};
use bytes::Bytes;
use std::io;
use std::sync::Arc;

use crate::mapping::Mapping;
use crate::payload::Payload;
use crate::structs::Struct;
use crate::{Error, FieldType, Header};

mod sealed {
    pub trait Sealed {}
}

/// ListNumber is implemented by the ten fixed-width numeric element types.
pub trait ListNumber: sealed::Sealed + Copy + PartialEq + std::fmt::Debug {
    const LIST_TAG: FieldType;
    const WIDTH: usize;

    #[doc(hidden)]
    fn read_le(b: &[u8]) -> Self;
    #[doc(hidden)]
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! list_number {
    ($t:ty, $tag:expr) => {
        impl sealed::Sealed for $t {}
        impl ListNumber for $t {
            const LIST_TAG: FieldType = $tag;
            const WIDTH: usize = std::mem::size_of::<$t>();

            fn read_le(b: &[u8]) -> Self {
                <$t>::from_le_bytes(b[..Self::WIDTH].try_into().unwrap())
            }
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        }
    };
}

list_number!(u8, FieldType::ListUint8);
list_number!(u16, FieldType::ListUint16);
list_number!(u32, FieldType::ListUint32);
list_number!(u64, FieldType::ListUint64);
list_number!(i8, FieldType::ListInt8);
list_number!(i16, FieldType::ListInt16);
list_number!(i32, FieldType::ListInt32);
list_number!(i64, FieldType::ListInt64);
list_number!(f32, FieldType::ListFloat32);
list_number!(f64, FieldType::ListFloat64);

/// BoolList is a packed list of booleans.
///
/// The header payload is the bit count. The body stores bit j at bit
/// position j mod 8 of byte j / 8; padding bits in the final byte are zero.
#[derive(Debug, Clone)]
pub struct BoolList {
    header: Header,
    bits: BitVec<u8, Lsb0>,
}

impl BoolList {
    pub fn new() -> BoolList {
        BoolList {
            header: Header::new(0, FieldType::ListBools, 0),
            bits: BitVec::new(),
        }
    }

    pub(crate) fn from_wire(header: Header, body: Bytes) -> BoolList {
        let mut bits = BitVec::<u8, Lsb0>::from_slice(&body);
        bits.truncate(header.payload() as usize);
        BoolList { header, bits }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        self.bits.get(index).map(|b| *b)
    }

    pub fn push(&mut self, value: bool) -> Result<(), Error> {
        self.bits.push(value);
        self.header.set_payload(self.bits.len() as u64)
    }

    /// Overwrite the bit at `index`. Panics if out of range.
    pub fn set(&mut self, index: usize, value: bool) {
        self.bits.set(index, value);
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter().map(|b| *b)
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub(crate) fn body_len(&self) -> u64 {
        (self.bits.len() as u64 + 7) / 8
    }

    pub(crate) fn wire_size(&self) -> u64 {
        Header::WIRE_SIZE as u64 + self.body_len()
    }

    pub(crate) fn marshal_to<W: io::Write>(&self, w: &mut W) -> io::Result<u64> {
        w.write_all(&self.header.to_bytes())?;
        // Re-derive body bytes from the bits so that padding is always zero,
        // even if the list was decoded from a non-canonical body.
        let mut n = Header::WIRE_SIZE as u64;
        for chunk in self.bits.chunks(8) {
            let mut byte = 0u8;
            for (i, bit) in chunk.iter().enumerate() {
                byte |= (*bit as u8) << i;
            }
            w.write_all(&[byte])?;
            n += 1;
        }
        Ok(n)
    }
}

impl Default for BoolList {
    fn default() -> BoolList {
        BoolList::new()
    }
}

impl PartialEq for BoolList {
    fn eq(&self, other: &BoolList) -> bool {
        self.bits == other.bits
    }
}

/// NumberList is a list of fixed-width little-endian numbers.
///
/// The header payload is the element count; the element width is implied by
/// the list tag and never stored. Typed access goes through [ListNumber],
/// and using the wrong element type against a mapping-typed list panics.
#[derive(Debug, Clone)]
pub struct NumberList {
    header: Header,
    width: usize,
    body: Payload,
}

impl NumberList {
    pub fn new<T: ListNumber>() -> NumberList {
        NumberList {
            header: Header::new(0, T::LIST_TAG, 0),
            width: T::WIDTH,
            body: Payload::empty(),
        }
    }

    pub fn from_slice<T: ListNumber>(items: &[T]) -> Result<NumberList, Error> {
        let mut list = NumberList::new::<T>();
        for item in items {
            list.push(*item)?;
        }
        Ok(list)
    }

    pub(crate) fn from_wire(header: Header, width: usize, body: Bytes) -> NumberList {
        NumberList {
            header,
            width,
            body: body.into(),
        }
    }

    // An empty list of the given numeric list tag, without static typing.
    pub(crate) fn with_tag(tag: FieldType) -> NumberList {
        let width = tag
            .list_element_width()
            .expect("numeric list tags have a width");
        NumberList {
            header: Header::new(0, tag, 0),
            width,
            body: Payload::empty(),
        }
    }

    pub fn tag(&self) -> FieldType {
        self.header.field_type().unwrap()
    }

    pub fn len(&self) -> usize {
        self.body.len() / self.width
    }

    pub fn is_empty(&self) -> bool {
        self.body.len() == 0
    }

    fn check_type<T: ListNumber>(&self) {
        assert!(
            T::LIST_TAG == self.tag(),
            "list holds {:?} elements, not {:?}",
            self.tag(),
            T::LIST_TAG,
        );
    }

    pub fn get<T: ListNumber>(&self, index: usize) -> Option<T> {
        self.check_type::<T>();
        let at = index.checked_mul(self.width)?;
        let b = self.body.as_slice().get(at..at + self.width)?;
        Some(T::read_le(b))
    }

    pub fn push<T: ListNumber>(&mut self, value: T) -> Result<(), Error> {
        self.check_type::<T>();
        value.write_le(self.body.to_mut());
        self.header.set_payload(self.len() as u64)
    }

    pub fn iter<'a, T: ListNumber + 'a>(&'a self) -> impl Iterator<Item = T> + 'a {
        self.check_type::<T>();
        self.body.as_slice().chunks_exact(self.width).map(T::read_le)
    }

    /// The raw little-endian element at `index`, zero-extended to u64.
    /// Used by reflection and walk, which do not know T statically.
    pub(crate) fn raw(&self, index: usize) -> u64 {
        let at = index * self.width;
        let b = &self.body.as_slice()[at..at + self.width];
        let mut out = [0u8; 8];
        out[..self.width].copy_from_slice(b);
        u64::from_le_bytes(out)
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub(crate) fn wire_size(&self) -> u64 {
        Header::WIRE_SIZE as u64 + self.body.len() as u64
    }

    pub(crate) fn marshal_to<W: io::Write>(&self, w: &mut W) -> io::Result<u64> {
        w.write_all(&self.header.to_bytes())?;
        w.write_all(self.body.as_slice())?;
        Ok(Header::WIRE_SIZE as u64 + self.body.len() as u64)
    }
}

impl PartialEq for NumberList {
    fn eq(&self, other: &NumberList) -> bool {
        self.width == other.width && self.body == other.body
    }
}

/// BlobList is a list of byte blobs, used for both `[]bytes` and
/// `[]string` fields.
///
/// The header payload is the total body size in bytes, including the 8-byte
/// length prefix of every item. There is no separate item count: readers
/// parse `(len: u64 LE, bytes...)` pairs until the body is consumed.
#[derive(Debug, Clone)]
pub struct BlobList {
    header: Header,
    items: Vec<Payload>,
}

impl BlobList {
    /// A new `[]bytes` list.
    pub fn bytes() -> BlobList {
        BlobList {
            header: Header::new(0, FieldType::ListBytes, 0),
            items: Vec::new(),
        }
    }

    /// A new `[]string` list.
    pub fn strings() -> BlobList {
        BlobList {
            header: Header::new(0, FieldType::ListStrings, 0),
            items: Vec::new(),
        }
    }

    pub(crate) fn from_wire(
        header: Header,
        body: Bytes,
        base_offset: u64,
        utf8: bool,
    ) -> Result<BlobList, Error> {
        let field_num = header.field_num();
        let mut items = Vec::new();
        let mut at = 0usize;

        while at < body.len() {
            if body.len() - at < 8 {
                return Err(Error::InvalidPayload {
                    field_num,
                    offset: base_offset + at as u64,
                    detail: "truncated item length prefix",
                });
            }
            let len = u64::from_le_bytes(body[at..at + 8].try_into().unwrap()) as usize;
            at += 8;
            if body.len() - at < len {
                return Err(Error::InvalidPayload {
                    field_num,
                    offset: base_offset + at as u64,
                    detail: "item length exceeds list body",
                });
            }
            let item = body.slice(at..at + len);
            if utf8 && std::str::from_utf8(&item).is_err() {
                return Err(Error::InvalidPayload {
                    field_num,
                    offset: base_offset + at as u64,
                    detail: "string item is not valid UTF-8",
                });
            }
            items.push(item.into());
            at += len;
        }
        Ok(BlobList { header, items })
    }

    pub fn tag(&self) -> FieldType {
        self.header.field_type().unwrap()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.items.get(index).map(Payload::as_slice)
    }

    pub fn get_str(&self, index: usize) -> Option<&str> {
        assert!(
            self.tag() == FieldType::ListStrings,
            "list holds bytes, not strings"
        );
        self.get(index)
            .map(|b| std::str::from_utf8(b).expect("string items are validated UTF-8"))
    }

    pub fn push(&mut self, item: &[u8]) -> Result<(), Error> {
        assert!(
            self.tag() == FieldType::ListBytes,
            "use push_str for a []string list"
        );
        self.push_raw(item)
    }

    pub fn push_str(&mut self, item: &str) -> Result<(), Error> {
        assert!(
            self.tag() == FieldType::ListStrings,
            "use push for a []bytes list"
        );
        self.push_raw(item.as_bytes())
    }

    fn push_raw(&mut self, item: &[u8]) -> Result<(), Error> {
        self.items.push(item.to_vec().into());
        self.header.set_payload(self.body_len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.items.iter().map(Payload::as_slice)
    }

    pub fn iter_str(&self) -> impl Iterator<Item = &str> {
        assert!(
            self.tag() == FieldType::ListStrings,
            "list holds bytes, not strings"
        );
        self.items
            .iter()
            .map(|p| std::str::from_utf8(p.as_slice()).expect("string items are validated UTF-8"))
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub(crate) fn body_len(&self) -> u64 {
        self.items
            .iter()
            .map(|p| 8 + p.len() as u64)
            .sum()
    }

    pub(crate) fn wire_size(&self) -> u64 {
        Header::WIRE_SIZE as u64 + self.body_len()
    }

    pub(crate) fn marshal_to<W: io::Write>(&self, w: &mut W) -> io::Result<u64> {
        w.write_all(&self.header.to_bytes())?;
        let mut n = Header::WIRE_SIZE as u64;
        for item in &self.items {
            let b = item.as_slice();
            w.write_all(&(b.len() as u64).to_le_bytes())?;
            w.write_all(b)?;
            n += 8 + b.len() as u64;
        }
        Ok(n)
    }
}

impl PartialEq for BlobList {
    fn eq(&self, other: &BlobList) -> bool {
        self.items == other.items
    }
}

/// StructList is a list of sub-messages sharing one mapping.
///
/// The header payload is the total body size in bytes. The body is a
/// concatenation of framed children, each beginning with its own 8-byte
/// header. The element mapping comes from the enclosing field's descriptor,
/// never from the wire.
#[derive(Debug, Clone)]
pub struct StructList {
    header: Header,
    mapping: Arc<Mapping>,
    items: Vec<Struct>,
}

impl StructList {
    pub fn new(mapping: Arc<Mapping>) -> StructList {
        StructList {
            header: Header::new(0, FieldType::ListStructs, 0),
            mapping,
            items: Vec::new(),
        }
    }

    pub(crate) fn from_parts(header: Header, mapping: Arc<Mapping>, items: Vec<Struct>) -> StructList {
        StructList {
            header,
            mapping,
            items,
        }
    }

    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Struct> {
        self.items.get(index)
    }

    /// Mutable access to one child. When the list is attached to a Struct,
    /// reach it through [crate::Struct::structs_mut] so that size deltas are
    /// folded into the owner when the guard drops.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Struct> {
        self.items.get_mut(index)
    }

    pub fn push(&mut self, mut child: Struct) -> Result<(), Error> {
        assert!(
            Arc::ptr_eq(child.mapping(), &self.mapping)
                || child.mapping().name() == self.mapping.name(),
            "cannot append a {:?} to a list of {:?}",
            child.mapping().name(),
            self.mapping.name(),
        );
        // List elements are framed with field number zero.
        child.set_own_header(Header::new(0, FieldType::Struct, 0));
        child.sync_own_header()?;
        self.items.push(child);
        self.header.set_payload(self.body_len())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Struct> {
        self.items.iter()
    }

    pub(crate) fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Recompute the header payload from the children. Used after guarded
    /// mutation, where children may have grown or shrunk in place.
    pub(crate) fn refresh(&mut self) -> Result<(), Error> {
        for child in &mut self.items {
            child.sync_own_header()?;
        }
        self.header.set_payload(self.body_len())
    }

    pub(crate) fn body_len(&self) -> u64 {
        self.items
            .iter()
            .map(|c| Header::WIRE_SIZE as u64 + c.total_size())
            .sum()
    }

    pub(crate) fn wire_size(&self) -> u64 {
        Header::WIRE_SIZE as u64 + self.body_len()
    }

    pub(crate) fn marshal_to<W: io::Write>(&self, w: &mut W) -> Result<u64, Error> {
        w.write_all(&self.header.to_bytes())?;
        let mut n = Header::WIRE_SIZE as u64;
        for child in &self.items {
            n += child.marshal_framed_to(w)?;
        }
        Ok(n)
    }
}

impl PartialEq for StructList {
    fn eq(&self, other: &StructList) -> bool {
        self.items == other.items
    }
}
