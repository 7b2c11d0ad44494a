//! The Struct runtime: slot storage, zero-value compression, size
//! bookkeeping, and the marshal/unmarshal drivers.

use bytes::Bytes;
use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::decode::{self, Cursor};
use crate::list::{BlobList, BoolList, ListNumber, NumberList, StructList};
use crate::mapping::{FieldDescr, Mapping};
use crate::payload::Payload;
use crate::scalar::{Scalar, ScalarWire};
use crate::{Error, FieldType, Header, MAX_PAYLOAD};

/// Slot is the in-memory representation of one field.
///
/// A slot is "present" exactly when it is not Empty; present slots are the
/// ones serialization emits. Length-prefixed payloads decoded from a buffer
/// stay borrowed until first mutated.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Empty,
    /// Header-only encodings: bool and scalars of at most 32 bits.
    Inline(Header),
    /// Header plus a fixed 8-byte little-endian trailer.
    Fixed8(Header, [u8; 8]),
    /// Header plus `payload` trailing bytes: string and bytes fields.
    Blob(Header, Payload),
    /// A nested struct; its own header lives inside the child.
    Child(Box<Struct>),
    Bools(BoolList),
    Numbers(NumberList),
    Blobs(BlobList),
    Structs(StructList),
}

impl Slot {
    pub(crate) fn is_present(&self) -> bool {
        !matches!(self, Slot::Empty)
    }

    pub(crate) fn wire_size(&self) -> u64 {
        const H: u64 = Header::WIRE_SIZE as u64;
        match self {
            Slot::Empty => 0,
            Slot::Inline(_) => H,
            Slot::Fixed8(..) => 2 * H,
            Slot::Blob(_, p) => H + p.len() as u64,
            Slot::Child(c) => H + c.total_size,
            Slot::Bools(l) => l.wire_size(),
            Slot::Numbers(l) => l.wire_size(),
            Slot::Blobs(l) => l.wire_size(),
            Slot::Structs(l) => l.wire_size(),
        }
    }

    fn marshal_to<W: io::Write>(&self, w: &mut W) -> Result<u64, Error> {
        const H: u64 = Header::WIRE_SIZE as u64;
        match self {
            Slot::Empty => Ok(0),
            Slot::Inline(h) => {
                w.write_all(&h.to_bytes())?;
                Ok(H)
            }
            Slot::Fixed8(h, t) => {
                w.write_all(&h.to_bytes())?;
                w.write_all(t)?;
                Ok(2 * H)
            }
            Slot::Blob(h, p) => {
                w.write_all(&h.to_bytes())?;
                w.write_all(p.as_slice())?;
                Ok(H + p.len() as u64)
            }
            Slot::Child(c) => c.marshal_framed_to(w),
            Slot::Bools(l) => Ok(l.marshal_to(w)?),
            Slot::Numbers(l) => Ok(l.marshal_to(w)?),
            Slot::Blobs(l) => Ok(l.marshal_to(w)?),
            Slot::Structs(l) => l.marshal_to(w),
        }
    }
}

/// Struct is a message under construction or decoded from the wire.
///
/// Every read and write on a given Struct is serialized by the caller; the
/// type is Send but mutation requires exclusive access, and mutating a
/// nested child goes through a guard whose drop folds the child's size
/// delta into its ancestors.
#[derive(Debug, Clone)]
pub struct Struct {
    mapping: Arc<Mapping>,
    // This struct's own framed header: field number in the parent (zero at
    // top level), tag = struct, payload = total_size.
    header: Header,
    slots: Vec<Slot>,
    // Total bytes of all present slots, excluding the own header.
    total_size: u64,
    elide_zero: bool,
}

impl Struct {
    pub fn new(mapping: Arc<Mapping>) -> Struct {
        let slots = (0..mapping.len()).map(|_| Slot::Empty).collect();
        Struct {
            mapping,
            header: Header::new(0, FieldType::Struct, 0),
            slots,
            total_size: 0,
            elide_zero: true,
        }
    }

    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    pub fn name(&self) -> &str {
        self.mapping.name()
    }

    /// Total encoded size of all present fields, excluding the framing
    /// header this struct contributes when nested.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Whether zero-value compression is on (the default). When on, setting
    /// a field to its zero value clears the slot instead, and the field is
    /// never serialized. When off, explicitly-set zero values are kept and
    /// emitted, preserving an is-set signal across the wire.
    pub fn zero_compression(&self) -> bool {
        self.elide_zero
    }

    pub fn set_zero_compression(&mut self, on: bool) {
        self.elide_zero = on;
    }

    pub fn is_set(&self, field_num: u16) -> bool {
        self.descr(field_num);
        self.slots[field_num as usize].is_present()
    }

    pub fn clear(&mut self, field_num: u16) {
        self.descr(field_num);
        let old = self.slots[field_num as usize].wire_size();
        self.slots[field_num as usize] = Slot::Empty;
        let total = self.total_size - old;
        self.commit_total(total);
    }

    /// Reset to the freshly-constructed state, for reuse through a pool.
    pub(crate) fn reset(&mut self) {
        for slot in &mut self.slots {
            *slot = Slot::Empty;
        }
        self.header = Header::new(0, FieldType::Struct, 0);
        self.total_size = 0;
        self.elide_zero = true;
    }

    // Descriptor lookup. Addressing an undefined field number, or a field
    // whose declared type disagrees with the accessor, is a programmer
    // error against an immutable mapping and panics.
    fn descr(&self, field_num: u16) -> &FieldDescr {
        self.mapping.by_num(field_num).unwrap_or_else(|| {
            panic!(
                "field {field_num} is not defined by mapping {:?}",
                self.mapping.name()
            )
        })
    }

    fn expect_type(&self, field_num: u16, want: FieldType) -> &FieldDescr {
        let d = self.descr(field_num);
        if d.field_type != want {
            panic!(
                "field {:?} of {:?} is {:?}, not {:?}",
                d.name,
                self.mapping.name(),
                d.field_type,
                want
            );
        }
        d
    }

    fn commit_total(&mut self, total: u64) {
        self.total_size = total;
        if total <= MAX_PAYLOAD {
            self.header.set_payload(total).unwrap();
        }
        // An overflowed total leaves the header payload stale; marshal
        // re-checks and reports PayloadOverflow.
    }

    pub(crate) fn replace_slot(&mut self, field_num: u16, slot: Slot) -> Result<(), Error> {
        let old = self.slots[field_num as usize].wire_size();
        let new = slot.wire_size();
        let total = self.total_size - old + new;
        if total > MAX_PAYLOAD {
            return Err(Error::PayloadOverflow { size: total });
        }
        self.slots[field_num as usize] = slot;
        self.commit_total(total);
        Ok(())
    }

    pub(crate) fn set_own_header(&mut self, h: Header) {
        self.header = h;
    }

    pub(crate) fn sync_own_header(&mut self) -> Result<(), Error> {
        let total = self.total_size;
        self.header.set_payload(total)
    }

    // ---- scalars ----

    pub fn get<T: Scalar>(&self, field_num: u16) -> T {
        self.expect_type(field_num, T::TAG);
        match &self.slots[field_num as usize] {
            Slot::Empty => T::ZERO,
            Slot::Inline(h) => T::from_payload(h.payload()),
            Slot::Fixed8(_, t) => T::from_trailer(*t),
            _ => unreachable!("scalar field holds a non-scalar slot"),
        }
    }

    pub fn set<T: Scalar>(&mut self, field_num: u16, value: T) -> Result<(), Error> {
        self.expect_type(field_num, T::TAG);
        let slot = if value.is_zero() && self.elide_zero {
            Slot::Empty
        } else {
            match value.to_wire() {
                ScalarWire::Inline(p) => Slot::Inline(Header::new(field_num, T::TAG, p)),
                ScalarWire::Trailer(t) => Slot::Fixed8(Header::new(field_num, T::TAG, 8), t),
            }
        };
        self.replace_slot(field_num, slot)
    }

    // ---- strings and bytes ----

    pub fn get_str(&self, field_num: u16) -> &str {
        self.expect_type(field_num, FieldType::String);
        match &self.slots[field_num as usize] {
            Slot::Empty => "",
            Slot::Blob(_, p) => {
                std::str::from_utf8(p.as_slice()).expect("string payload is validated UTF-8")
            }
            _ => unreachable!("string field holds a non-blob slot"),
        }
    }

    pub fn set_str(&mut self, field_num: u16, value: &str) -> Result<(), Error> {
        self.expect_type(field_num, FieldType::String);
        self.set_blob_slot(field_num, FieldType::String, value.as_bytes())
    }

    pub fn get_bytes(&self, field_num: u16) -> &[u8] {
        self.expect_type(field_num, FieldType::Bytes);
        match &self.slots[field_num as usize] {
            Slot::Empty => &[],
            Slot::Blob(_, p) => p.as_slice(),
            _ => unreachable!("bytes field holds a non-blob slot"),
        }
    }

    pub fn set_bytes(&mut self, field_num: u16, value: &[u8]) -> Result<(), Error> {
        self.expect_type(field_num, FieldType::Bytes);
        self.set_blob_slot(field_num, FieldType::Bytes, value)
    }

    fn set_blob_slot(
        &mut self,
        field_num: u16,
        tag: FieldType,
        value: &[u8],
    ) -> Result<(), Error> {
        let slot = if value.is_empty() && self.elide_zero {
            Slot::Empty
        } else {
            let mut h = Header::new(field_num, tag, 0);
            h.set_payload(value.len() as u64)?;
            Slot::Blob(h, value.to_vec().into())
        };
        self.replace_slot(field_num, slot)
    }

    // ---- nested structs ----

    pub fn child(&self, field_num: u16) -> Option<&Struct> {
        self.expect_type(field_num, FieldType::Struct);
        match &self.slots[field_num as usize] {
            Slot::Empty => None,
            Slot::Child(c) => Some(c),
            _ => unreachable!("struct field holds a non-child slot"),
        }
    }

    pub fn set_child(&mut self, field_num: u16, mut child: Struct) -> Result<(), Error> {
        let d = self.expect_type(field_num, FieldType::Struct);
        let nested = d.nested().expect("struct fields carry a nested mapping");
        assert!(
            Arc::ptr_eq(child.mapping(), &nested) || child.mapping().name() == nested.name(),
            "field {:?} holds a {:?}, not a {:?}",
            d.name,
            nested.name(),
            child.mapping().name(),
        );
        child.set_own_header(Header::new(field_num, FieldType::Struct, 0));
        child.sync_own_header()?;
        self.replace_slot(field_num, Slot::Child(Box::new(child)))
    }

    /// Detach and return the nested struct, leaving the field absent.
    pub fn take_child(&mut self, field_num: u16) -> Option<Struct> {
        self.expect_type(field_num, FieldType::Struct);
        if !self.slots[field_num as usize].is_present() {
            return None;
        }
        let old = std::mem::replace(&mut self.slots[field_num as usize], Slot::Empty);
        let total = self.total_size - old.wire_size();
        self.commit_total(total);
        match old {
            Slot::Child(c) => Some(*c),
            _ => unreachable!("struct field holds a non-child slot"),
        }
    }

    /// Mutable access to a nested struct, creating an empty child if the
    /// field is absent. The returned guard folds size changes into this
    /// struct when dropped, which is what keeps ancestor sizes coherent:
    /// the chain of live guards is the chain of parents.
    pub fn child_mut(&mut self, field_num: u16) -> Result<ChildMut<'_>, Error> {
        let d = self.expect_type(field_num, FieldType::Struct);
        if !self.slots[field_num as usize].is_present() {
            let nested = d.nested().expect("struct fields carry a nested mapping");
            let mut child = Struct::new(nested);
            child.set_own_header(Header::new(field_num, FieldType::Struct, 0));
            self.replace_slot(field_num, Slot::Child(Box::new(child)))?;
        }
        let old = self.slots[field_num as usize].wire_size();
        Ok(ChildMut {
            owner: self,
            field_num,
            old,
        })
    }

    // ---- bool lists ----

    pub fn bools(&self, field_num: u16) -> Option<&BoolList> {
        self.expect_type(field_num, FieldType::ListBools);
        match &self.slots[field_num as usize] {
            Slot::Empty => None,
            Slot::Bools(l) => Some(l),
            _ => unreachable!("bool list field holds a non-list slot"),
        }
    }

    pub fn set_bools(
        &mut self,
        field_num: u16,
        items: impl IntoIterator<Item = bool>,
    ) -> Result<(), Error> {
        self.expect_type(field_num, FieldType::ListBools);
        let mut list = BoolList::new();
        for item in items {
            list.push(item)?;
        }
        if list.is_empty() && self.elide_zero {
            return self.replace_slot(field_num, Slot::Empty);
        }
        list.header_mut().set_field_num(field_num);
        self.replace_slot(field_num, Slot::Bools(list))
    }

    pub fn append_bool(&mut self, field_num: u16, value: bool) -> Result<(), Error> {
        self.expect_type(field_num, FieldType::ListBools);
        if !self.slots[field_num as usize].is_present() {
            let mut list = BoolList::new();
            list.header_mut().set_field_num(field_num);
            self.replace_slot(field_num, Slot::Bools(list))?;
        }
        let old = self.slots[field_num as usize].wire_size();
        let Slot::Bools(list) = &mut self.slots[field_num as usize] else {
            unreachable!("bool list field holds a non-list slot");
        };
        let new = Header::WIRE_SIZE as u64 + (list.len() as u64 + 1 + 7) / 8;
        let total = grow_total(self.total_size, old, new)?;
        list.push(value)?;
        self.commit_total(total);
        Ok(())
    }

    // ---- numeric lists ----

    pub fn numbers(&self, field_num: u16) -> Option<&NumberList> {
        let d = self.descr(field_num);
        assert!(
            d.field_type.list_element_width().is_some(),
            "field {:?} of {:?} is {:?}, not a numeric list",
            d.name,
            self.mapping.name(),
            d.field_type,
        );
        match &self.slots[field_num as usize] {
            Slot::Empty => None,
            Slot::Numbers(l) => Some(l),
            _ => unreachable!("numeric list field holds a non-list slot"),
        }
    }

    pub fn set_numbers<T: ListNumber>(
        &mut self,
        field_num: u16,
        items: &[T],
    ) -> Result<(), Error> {
        self.expect_type(field_num, T::LIST_TAG);
        if items.is_empty() && self.elide_zero {
            return self.replace_slot(field_num, Slot::Empty);
        }
        let mut list = NumberList::from_slice(items)?;
        list.header_mut().set_field_num(field_num);
        self.replace_slot(field_num, Slot::Numbers(list))
    }

    pub fn append_number<T: ListNumber>(&mut self, field_num: u16, value: T) -> Result<(), Error> {
        self.expect_type(field_num, T::LIST_TAG);
        if !self.slots[field_num as usize].is_present() {
            let mut list = NumberList::new::<T>();
            list.header_mut().set_field_num(field_num);
            self.replace_slot(field_num, Slot::Numbers(list))?;
        }
        let old = self.slots[field_num as usize].wire_size();
        let Slot::Numbers(list) = &mut self.slots[field_num as usize] else {
            unreachable!("numeric list field holds a non-list slot");
        };
        let total = grow_total(self.total_size, old, old + T::WIDTH as u64)?;
        list.push(value)?;
        self.commit_total(total);
        Ok(())
    }

    // ---- byte and string lists ----

    pub fn blobs(&self, field_num: u16) -> Option<&BlobList> {
        let d = self.descr(field_num);
        assert!(
            matches!(d.field_type, FieldType::ListBytes | FieldType::ListStrings),
            "field {:?} of {:?} is {:?}, not a bytes or string list",
            d.name,
            self.mapping.name(),
            d.field_type,
        );
        match &self.slots[field_num as usize] {
            Slot::Empty => None,
            Slot::Blobs(l) => Some(l),
            _ => unreachable!("blob list field holds a non-list slot"),
        }
    }

    pub fn set_strings<I, S>(&mut self, field_num: u16, items: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.expect_type(field_num, FieldType::ListStrings);
        let mut list = BlobList::strings();
        for item in items {
            list.push_str(item.as_ref())?;
        }
        if list.is_empty() && self.elide_zero {
            return self.replace_slot(field_num, Slot::Empty);
        }
        list.header_mut().set_field_num(field_num);
        self.replace_slot(field_num, Slot::Blobs(list))
    }

    pub fn set_blobs<I, B>(&mut self, field_num: u16, items: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        self.expect_type(field_num, FieldType::ListBytes);
        let mut list = BlobList::bytes();
        for item in items {
            list.push(item.as_ref())?;
        }
        if list.is_empty() && self.elide_zero {
            return self.replace_slot(field_num, Slot::Empty);
        }
        list.header_mut().set_field_num(field_num);
        self.replace_slot(field_num, Slot::Blobs(list))
    }

    pub fn append_str(&mut self, field_num: u16, value: &str) -> Result<(), Error> {
        self.expect_type(field_num, FieldType::ListStrings);
        self.append_blob_raw(field_num, FieldType::ListStrings, value.as_bytes())
    }

    pub fn append_blob(&mut self, field_num: u16, value: &[u8]) -> Result<(), Error> {
        self.expect_type(field_num, FieldType::ListBytes);
        self.append_blob_raw(field_num, FieldType::ListBytes, value)
    }

    fn append_blob_raw(
        &mut self,
        field_num: u16,
        tag: FieldType,
        value: &[u8],
    ) -> Result<(), Error> {
        if !self.slots[field_num as usize].is_present() {
            let mut list = if tag == FieldType::ListStrings {
                BlobList::strings()
            } else {
                BlobList::bytes()
            };
            list.header_mut().set_field_num(field_num);
            self.replace_slot(field_num, Slot::Blobs(list))?;
        }
        let old = self.slots[field_num as usize].wire_size();
        let Slot::Blobs(list) = &mut self.slots[field_num as usize] else {
            unreachable!("blob list field holds a non-list slot");
        };
        let total = grow_total(self.total_size, old, old + 8 + value.len() as u64)?;
        if tag == FieldType::ListStrings {
            list.push_str(std::str::from_utf8(value).unwrap())?;
        } else {
            list.push(value)?;
        }
        self.commit_total(total);
        Ok(())
    }

    // ---- struct lists ----

    pub fn structs(&self, field_num: u16) -> Option<&StructList> {
        self.expect_type(field_num, FieldType::ListStructs);
        match &self.slots[field_num as usize] {
            Slot::Empty => None,
            Slot::Structs(l) => Some(l),
            _ => unreachable!("struct list field holds a non-list slot"),
        }
    }

    pub fn append_struct(&mut self, field_num: u16, child: Struct) -> Result<(), Error> {
        self.ensure_struct_list(field_num)?;
        let old = self.slots[field_num as usize].wire_size();
        let Slot::Structs(list) = &mut self.slots[field_num as usize] else {
            unreachable!("struct list field holds a non-list slot");
        };
        let added = Header::WIRE_SIZE as u64 + child.total_size;
        let total = grow_total(self.total_size, old, old + added)?;
        list.push(child)?;
        self.commit_total(total);
        Ok(())
    }

    /// Mutable access to a struct list, creating an empty list if the field
    /// is absent. The guard recomputes list and ancestor sizes on drop.
    pub fn structs_mut(&mut self, field_num: u16) -> Result<StructsMut<'_>, Error> {
        self.ensure_struct_list(field_num)?;
        let old = self.slots[field_num as usize].wire_size();
        Ok(StructsMut {
            owner: self,
            field_num,
            old,
        })
    }

    /// Materialize an empty list container for a list field which is
    /// absent, making the field present. Ingest uses this so that a
    /// ListStart/ListEnd pair with no elements is observable as a set,
    /// empty list rather than an absent one.
    pub(crate) fn touch_list(&mut self, field_num: u16) -> Result<(), Error> {
        let d = self.descr(field_num);
        assert!(
            d.field_type.is_list(),
            "field {:?} of {:?} is {:?}, not a list",
            d.name,
            self.mapping.name(),
            d.field_type,
        );
        if self.slots[field_num as usize].is_present() {
            return Ok(());
        }
        match d.field_type {
            FieldType::ListBools => {
                let mut list = BoolList::new();
                list.header_mut().set_field_num(field_num);
                self.replace_slot(field_num, Slot::Bools(list))
            }
            FieldType::ListBytes => {
                let mut list = BlobList::bytes();
                list.header_mut().set_field_num(field_num);
                self.replace_slot(field_num, Slot::Blobs(list))
            }
            FieldType::ListStrings => {
                let mut list = BlobList::strings();
                list.header_mut().set_field_num(field_num);
                self.replace_slot(field_num, Slot::Blobs(list))
            }
            FieldType::ListStructs => self.ensure_struct_list(field_num),
            tag => {
                let mut list = NumberList::with_tag(tag);
                list.header_mut().set_field_num(field_num);
                self.replace_slot(field_num, Slot::Numbers(list))
            }
        }
    }

    fn ensure_struct_list(&mut self, field_num: u16) -> Result<(), Error> {
        let d = self.expect_type(field_num, FieldType::ListStructs);
        if !self.slots[field_num as usize].is_present() {
            let nested = d.nested().expect("struct list fields carry a nested mapping");
            let mut list = StructList::new(nested);
            list.header_mut().set_field_num(field_num);
            self.replace_slot(field_num, Slot::Structs(list))?;
        }
        Ok(())
    }

    // ---- wire ----

    /// Serialize this struct's present fields in ascending field number
    /// order, without an outer framing header. This is the top-level
    /// message shape.
    pub fn marshal_to<W: io::Write>(&self, w: &mut W) -> Result<u64, Error> {
        if self.total_size > MAX_PAYLOAD {
            return Err(Error::PayloadOverflow {
                size: self.total_size,
            });
        }
        let mut n = 0;
        for slot in &self.slots {
            n += slot.marshal_to(w)?;
        }
        Ok(n)
    }

    /// Serialize with the outer framing header, as a nested struct is laid
    /// out on the wire.
    pub fn marshal_framed_to<W: io::Write>(&self, w: &mut W) -> Result<u64, Error> {
        if self.total_size > MAX_PAYLOAD {
            return Err(Error::PayloadOverflow {
                size: self.total_size,
            });
        }
        debug_assert_eq!(self.header.payload(), self.total_size);
        w.write_all(&self.header.to_bytes())?;
        Ok(Header::WIRE_SIZE as u64 + self.marshal_to(w)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(self.total_size as usize);
        self.marshal_to(&mut out)?;
        Ok(out)
    }

    pub fn to_framed_vec(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(Header::WIRE_SIZE + self.total_size as usize);
        self.marshal_framed_to(&mut out)?;
        Ok(out)
    }

    /// Serialize framed and compress with the pack codec. The framed form
    /// is zero-padded to a multiple of 8 bytes first; the frame header
    /// bounds the real content, so readers ignore the padding.
    pub fn to_packed_vec(&self) -> Result<Vec<u8>, Error> {
        let mut scratch = crate::pool::scratch().get();
        self.marshal_framed_to(&mut scratch)?;
        while scratch.len() % 8 != 0 {
            scratch.push(0);
        }
        let packed = pack::pack(&scratch)?;
        crate::pool::scratch().put(scratch);
        Ok(packed)
    }

    /// Decode a top-level message which has no outer framing header. The
    /// entire buffer is consumed.
    pub fn unmarshal(mapping: Arc<Mapping>, buf: impl Into<Bytes>) -> Result<Struct, Error> {
        let mut cur = Cursor::new(buf.into());
        let mut s = Struct::new(mapping);
        let budget = cur.remaining() as u64;
        s.unmarshal_fields(&mut cur, budget)?;
        Ok(s)
    }

    /// Decode a message which begins with its framing header. Bytes beyond
    /// the declared payload are permitted and ignored.
    pub fn unmarshal_framed(mapping: Arc<Mapping>, buf: impl Into<Bytes>) -> Result<Struct, Error> {
        let mut cur = Cursor::new(buf.into());
        let h = cur.read_header()?;
        match h.field_type() {
            Some(FieldType::Struct) => {}
            Some(actual) => {
                return Err(Error::TypeMismatch {
                    field_num: h.field_num(),
                    expect: FieldType::Struct,
                    actual,
                })
            }
            None => {
                return Err(Error::UnknownTag {
                    tag: h.tag(),
                    field_num: h.field_num(),
                    offset: 0,
                })
            }
        }
        if h.payload() > cur.remaining() as u64 {
            return Err(Error::PayloadExceedsParent {
                field_num: h.field_num(),
                offset: 0,
                payload: h.payload(),
                available: cur.remaining() as u64,
            });
        }
        let mut s = Struct::new(mapping);
        s.set_own_header(h);
        s.unmarshal_fields(&mut cur, h.payload())?;
        Ok(s)
    }

    /// Decode a pack-compressed framed message.
    pub fn unmarshal_packed(mapping: Arc<Mapping>, packed: &[u8]) -> Result<Struct, Error> {
        let raw = pack::unpack(packed)?;
        Struct::unmarshal_framed(mapping, raw)
    }

    pub(crate) fn unmarshal_child(
        mapping: Arc<Mapping>,
        h: Header,
        cur: &mut Cursor,
    ) -> Result<Struct, Error> {
        let mut s = Struct::new(mapping);
        s.set_own_header(h);
        s.unmarshal_fields(cur, h.payload())?;
        debug_assert_eq!(s.total_size, h.payload());
        Ok(s)
    }

    fn unmarshal_fields(&mut self, cur: &mut Cursor, budget: u64) -> Result<(), Error> {
        let end = cur.offset() + budget;
        let mapping = self.mapping.clone();

        while cur.offset() < end {
            let at = cur.offset();
            if end - at < Header::WIRE_SIZE as u64 {
                return Err(Error::ShortRead {
                    offset: at,
                    want: Header::WIRE_SIZE as u64,
                    have: end - at,
                });
            }
            let h = cur.read_header()?;
            let field_num = h.field_num();

            let d = mapping.by_num(field_num).ok_or_else(|| Error::UnknownField {
                field_num,
                mapping: mapping.name().to_string(),
            })?;
            let ft = h.field_type().ok_or(Error::UnknownTag {
                tag: h.tag(),
                field_num,
                offset: at,
            })?;
            if ft != d.field_type {
                return Err(Error::TypeMismatch {
                    field_num,
                    expect: d.field_type,
                    actual: ft,
                });
            }
            if self.slots[field_num as usize].is_present() {
                return Err(Error::DuplicateField {
                    field_num,
                    offset: at,
                });
            }

            let trailing = decode::trailing_len(ft, h);
            let available = end - cur.offset();
            if trailing > available {
                return Err(Error::PayloadExceedsParent {
                    field_num,
                    offset: at,
                    payload: trailing,
                    available,
                });
            }
            (d.decoder)(self, d, h, cur)?;
        }
        Ok(())
    }
}

impl PartialEq for Struct {
    fn eq(&self, other: &Struct) -> bool {
        self.mapping.name() == other.mapping.name() && self.slots == other.slots
    }
}

// Checked size growth shared by the append paths. The old and new sizes are
// of the slot being grown; the result is the struct's next total.
fn grow_total(total: u64, old: u64, new: u64) -> Result<u64, Error> {
    let next = total - old + new;
    if next > MAX_PAYLOAD {
        return Err(Error::PayloadOverflow { size: next });
    }
    Ok(next)
}

/// ChildMut is a mutable view of a nested struct field.
///
/// Dropping the guard folds the child's size delta into the owner. Nested
/// guards (a guard taken from a guard) unwind inside-out, which propagates
/// deltas all the way to the root before control returns to its owner.
pub struct ChildMut<'a> {
    owner: &'a mut Struct,
    field_num: u16,
    old: u64,
}

impl<'a> Deref for ChildMut<'a> {
    type Target = Struct;

    fn deref(&self) -> &Struct {
        match &self.owner.slots[self.field_num as usize] {
            Slot::Child(c) => c,
            _ => unreachable!("guarded slot is a child"),
        }
    }
}

impl<'a> DerefMut for ChildMut<'a> {
    fn deref_mut(&mut self) -> &mut Struct {
        match &mut self.owner.slots[self.field_num as usize] {
            Slot::Child(c) => c,
            _ => unreachable!("guarded slot is a child"),
        }
    }
}

impl<'a> Drop for ChildMut<'a> {
    fn drop(&mut self) {
        let new = {
            let child = match &mut self.owner.slots[self.field_num as usize] {
                Slot::Child(c) => c,
                _ => unreachable!("guarded slot is a child"),
            };
            // An over-limit child total is caught again at marshal.
            let _ = child.sync_own_header();
            Header::WIRE_SIZE as u64 + child.total_size
        };
        let total = self.owner.total_size - self.old + new;
        self.owner.commit_total(total);
    }
}

/// StructsMut is a mutable view of a struct list field; see [ChildMut].
pub struct StructsMut<'a> {
    owner: &'a mut Struct,
    field_num: u16,
    old: u64,
}

impl<'a> Deref for StructsMut<'a> {
    type Target = StructList;

    fn deref(&self) -> &StructList {
        match &self.owner.slots[self.field_num as usize] {
            Slot::Structs(l) => l,
            _ => unreachable!("guarded slot is a struct list"),
        }
    }
}

impl<'a> DerefMut for StructsMut<'a> {
    fn deref_mut(&mut self) -> &mut StructList {
        match &mut self.owner.slots[self.field_num as usize] {
            Slot::Structs(l) => l,
            _ => unreachable!("guarded slot is a struct list"),
        }
    }
}

impl<'a> Drop for StructsMut<'a> {
    fn drop(&mut self) {
        let new = {
            let list = match &mut self.owner.slots[self.field_num as usize] {
                Slot::Structs(l) => l,
                _ => unreachable!("guarded slot is a struct list"),
            };
            let _ = list.refresh();
            list.wire_size()
        };
        let total = self.owner.total_size - self.old + new;
        self.owner.commit_total(total);
    }
}

#[cfg(test)]
mod test {
    use super::Struct;
    use crate::walk::test::{car_mapping, s1_car, vehicle_mapping};
    use crate::Error;
    use pretty_assertions::assert_eq;

    // The S1 car on the wire: three fields in ascending field number
    // order, 8 bytes each.
    const CAR_WIRE: [u8; 24] = [
        0x00, 0x00, 0x06, 0x01, 0x00, 0x00, 0x00, 0x00, // Manufacturer=1
        0x01, 0x00, 0x06, 0x02, 0x00, 0x00, 0x00, 0x00, // Model=2
        0x02, 0x00, 0x07, 0xda, 0x07, 0x00, 0x00, 0x00, // Year=2010
    ];

    #[test]
    fn test_car_wire_bytes() {
        let car = s1_car();
        assert_eq!(car.total_size(), 24);
        assert_eq!(car.to_vec().unwrap(), CAR_WIRE.to_vec());

        // Marshaling is deterministic.
        assert_eq!(car.to_vec().unwrap(), car.to_vec().unwrap());
    }

    #[test]
    fn test_round_trip() {
        let car = s1_car();
        let reread = Struct::unmarshal(car_mapping(), car.to_vec().unwrap()).unwrap();
        assert_eq!(reread, car);
        assert_eq!(reread.get::<u8>(0), 1);
        assert_eq!(reread.get::<u8>(1), 2);
        assert_eq!(reread.get::<u16>(2), 2010);

        let framed = Struct::unmarshal_framed(car_mapping(), car.to_framed_vec().unwrap()).unwrap();
        assert_eq!(framed, car);
    }

    #[test]
    fn test_zero_elision() {
        let mut car = Struct::new(car_mapping());
        car.set::<u8>(0, 0).unwrap();
        car.set::<u16>(2, 0).unwrap();

        // Every mutation set a zero value, so nothing is serialized.
        assert_eq!(car.total_size(), 0);
        assert_eq!(car.to_vec().unwrap().len(), 0);
        assert_eq!(car.to_framed_vec().unwrap().len(), 8);
        assert!(!car.is_set(0));

        // Setting and then zeroing a field elides it again.
        car.set::<u16>(2, 2010).unwrap();
        assert_eq!(car.total_size(), 8);
        car.set::<u16>(2, 0).unwrap();
        assert_eq!(car.total_size(), 0);
    }

    #[test]
    fn test_zero_compression_off_preserves_is_set() {
        let mut car = Struct::new(car_mapping());
        car.set_zero_compression(false);
        car.set::<u16>(2, 0).unwrap();

        assert!(car.is_set(2));
        let wire = car.to_vec().unwrap();
        assert_eq!(wire, vec![0x02, 0x00, 0x07, 0x00, 0x00, 0x00, 0x00, 0x00]);

        let reread = Struct::unmarshal(car_mapping(), wire).unwrap();
        assert!(reread.is_set(2));
        assert!(!reread.is_set(0));
        assert_eq!(reread.get::<u16>(2), 0);
    }

    #[test]
    fn test_nested_wire_layout() {
        let mut vehicle = Struct::new(vehicle_mapping());
        vehicle.set::<u8>(0, 1).unwrap();
        vehicle.set_child(1, s1_car()).unwrap();
        assert_eq!(vehicle.total_size(), 8 + 8 + 24);

        let wire = vehicle.to_vec().unwrap();
        assert_eq!(wire.len(), 40);
        // The child's framing header: field 1, struct tag, 24 payload bytes.
        assert_eq!(&wire[8..16], &[0x01, 0x00, 0x0e, 0x18, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(&wire[16..40], &CAR_WIRE);

        let reread = Struct::unmarshal(vehicle.mapping().clone(), wire).unwrap();
        assert_eq!(reread, vehicle);
        assert_eq!(reread.child(1).unwrap().get::<u16>(2), 2010);
    }

    #[test]
    fn test_struct_list_wire_layout() {
        let mut vehicle = Struct::new(vehicle_mapping());
        vehicle.append_struct(2, s1_car()).unwrap();
        vehicle.append_struct(2, Struct::new(car_mapping())).unwrap();

        // List header + framed S1 car + framed empty car.
        assert_eq!(vehicle.total_size(), 8 + (8 + 24) + (8 + 0));

        let wire = vehicle.to_vec().unwrap();
        let reread = Struct::unmarshal(vehicle.mapping().clone(), wire).unwrap();
        assert_eq!(reread, vehicle);

        let list = reread.structs(2).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(0).unwrap().get::<u16>(2), 2010);
        assert_eq!(list.get(1).unwrap().total_size(), 0);
    }

    #[test]
    fn test_packed_bool_list_wire() {
        let mut vehicle = Struct::new(vehicle_mapping());
        vehicle.set_bools(4, [true, false, true]).unwrap();

        let wire = vehicle.to_vec().unwrap();
        // Header: field 4, bool-list tag, payload = 3 bits; body = one byte.
        assert_eq!(wire, vec![0x04, 0x00, 0x0f, 0x03, 0x00, 0x00, 0x00, 0x00, 0b0000_0101]);

        let reread = Struct::unmarshal(vehicle.mapping().clone(), wire).unwrap();
        assert_eq!(
            reread.bools(4).unwrap().iter().collect::<Vec<_>>(),
            vec![true, false, true],
        );
    }

    #[test]
    fn test_enum_list_wire() {
        let mut vehicle = Struct::new(vehicle_mapping());
        vehicle.set_numbers::<u8>(3, &[1, 2]).unwrap();

        let wire = vehicle.to_vec().unwrap();
        // Header: field 3, []uint8 tag, payload = 2 elements; body = 2 bytes.
        assert_eq!(wire, vec![0x03, 0x00, 0x14, 0x02, 0x00, 0x00, 0x00, 0x00, 0x01, 0x02]);
    }

    #[test]
    fn test_strings_and_bytes_round_trip() {
        let car = car_mapping();
        let garage = crate::mapping::Mapping::new(
            "test/garage.claw",
            "Garage",
            vec![
                crate::mapping::FieldSpec::scalar("Name", crate::FieldType::String),
                crate::mapping::FieldSpec::scalar("Sticker", crate::FieldType::Bytes),
                crate::mapping::FieldSpec::scalar("Spots", crate::FieldType::Uint64),
                crate::mapping::FieldSpec::nested(
                    "Cars",
                    crate::FieldType::ListStructs,
                    crate::mapping::NestedRef::Mapping(car),
                ),
                crate::mapping::FieldSpec::scalar("Tags", crate::FieldType::ListStrings),
            ],
        )
        .unwrap();

        let mut garage = Struct::new(garage);
        garage.set_str(0, "Main St").unwrap();
        garage.set_bytes(1, &[0xde, 0xad, 0xbe, 0xef]).unwrap();
        garage.set::<u64>(2, u64::MAX).unwrap();
        garage.append_struct(3, s1_car()).unwrap();
        garage.set_strings(4, ["a", "bb"]).unwrap();

        // string 8+7, bytes 8+4, u64 8+8, list 8+32, strings 8+(8+1)+(8+2).
        assert_eq!(garage.total_size(), 15 + 12 + 16 + 40 + 27);

        let reread = Struct::unmarshal(garage.mapping().clone(), garage.to_vec().unwrap()).unwrap();
        assert_eq!(reread, garage);
        assert_eq!(reread.get_str(0), "Main St");
        assert_eq!(reread.get_bytes(1), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(reread.get::<u64>(2), u64::MAX);
        assert_eq!(reread.blobs(4).unwrap().iter_str().collect::<Vec<_>>(), vec!["a", "bb"]);
    }

    #[test]
    fn test_size_propagation_through_guards() {
        let mut vehicle = Struct::new(vehicle_mapping());
        {
            let mut car = vehicle.child_mut(1).unwrap();
            car.set::<u16>(2, 2020).unwrap();
        }
        assert_eq!(vehicle.total_size(), 8 + 8);

        // An equivalent struct built without guards marshals identically.
        let mut expect = Struct::new(vehicle_mapping());
        let mut car = Struct::new(car_mapping());
        car.set::<u16>(2, 2020).unwrap();
        expect.set_child(1, car).unwrap();
        assert_eq!(vehicle.to_vec().unwrap(), expect.to_vec().unwrap());

        // Clearing the child's field shrinks every ancestor.
        {
            let mut car = vehicle.child_mut(1).unwrap();
            car.clear(2);
        }
        assert_eq!(vehicle.total_size(), 8);
    }

    #[test]
    fn test_struct_list_guard_propagation() {
        let mut vehicle = Struct::new(vehicle_mapping());
        vehicle.append_struct(2, s1_car()).unwrap();
        let before = vehicle.total_size();
        {
            let mut trucks = vehicle.structs_mut(2).unwrap();
            trucks.get_mut(0).unwrap().clear(2); // drop Year, -8 bytes
        }
        assert_eq!(vehicle.total_size(), before - 8);

        let reread = Struct::unmarshal(vehicle.mapping().clone(), vehicle.to_vec().unwrap()).unwrap();
        assert_eq!(reread, vehicle);
    }

    #[test]
    fn test_take_child() {
        let mut vehicle = Struct::new(vehicle_mapping());
        vehicle.set_child(1, s1_car()).unwrap();

        let car = vehicle.take_child(1).unwrap();
        assert_eq!(car.get::<u16>(2), 2010);
        assert_eq!(vehicle.total_size(), 0);
        assert!(vehicle.take_child(1).is_none());
    }

    #[test]
    fn test_duplicate_field_is_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&CAR_WIRE[16..24]); // Year=2010
        wire.extend_from_slice(&CAR_WIRE[16..24]); // Year again
        match Struct::unmarshal(car_mapping(), wire) {
            Err(Error::DuplicateField { field_num, offset }) => {
                assert_eq!(field_num, 2);
                assert_eq!(offset, 8);
            }
            other => panic!("expected DuplicateField, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_field_and_tag() {
        // Field number 9 is not in the Car mapping.
        let wire = vec![0x09, 0x00, 0x06, 0x01, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            Struct::unmarshal(car_mapping(), wire),
            Err(Error::UnknownField { field_num: 9, .. }),
        ));

        // Tag 99 is not registered.
        let wire = vec![0x00, 0x00, 99, 0x01, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            Struct::unmarshal(car_mapping(), wire),
            Err(Error::UnknownTag { tag: 99, .. }),
        ));

        // Year carries a string tag: the wire disagrees with the mapping.
        let wire = vec![0x02, 0x00, 0x0c, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            Struct::unmarshal(car_mapping(), wire),
            Err(Error::TypeMismatch { field_num: 2, .. }),
        ));
    }

    #[test]
    fn test_short_payloads() {
        // A trailing fragment shorter than one header.
        let mut wire = CAR_WIRE.to_vec();
        wire.extend_from_slice(&[0x01, 0x02, 0x03]);
        assert!(matches!(
            Struct::unmarshal(car_mapping(), wire),
            Err(Error::ShortRead { .. }),
        ));

        // A nested struct declaring more payload than remains.
        let wire = vec![0x01, 0x00, 0x0e, 0xff, 0x00, 0x00, 0x00, 0x00];
        assert!(matches!(
            Struct::unmarshal(vehicle_mapping(), wire),
            Err(Error::PayloadExceedsParent { field_num: 1, .. }),
        ));
    }

    #[test]
    fn test_packed_round_trip() {
        let mut vehicle = Struct::new(vehicle_mapping());
        vehicle.set::<u8>(0, 1).unwrap();
        vehicle.set_child(1, s1_car()).unwrap();
        vehicle.set_bools(4, [true, true, false, true]).unwrap();

        let packed = vehicle.to_packed_vec().unwrap();
        let reread = Struct::unmarshal_packed(vehicle.mapping().clone(), &packed).unwrap();
        assert_eq!(reread, vehicle);
    }

    #[test]
    #[should_panic(expected = "is not defined by mapping")]
    fn test_undefined_field_panics() {
        let car = s1_car();
        let _ = car.get::<u8>(9);
    }

    #[test]
    #[should_panic(expected = "not Uint32")]
    fn test_wrong_type_getter_panics() {
        let car = s1_car();
        let _ = car.get::<u32>(2);
    }
}
