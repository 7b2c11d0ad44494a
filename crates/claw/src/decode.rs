//! Per-tag decode functions, selected once at mapping construction time.
//!
//! Unmarshal reads the 8-byte field header, classifies it against the
//! mapping, and hands the cursor to the field's decoder. Scalar decoders do
//! not allocate; length-prefixed decoders store borrowed views of the input
//! buffer; struct and struct-list decoders recurse eagerly.

use bytes::Bytes;

use crate::list::{BlobList, BoolList, NumberList, StructList};
use crate::mapping::FieldDescr;
use crate::structs::{Slot, Struct};
use crate::{Error, FieldType, Header, SizeClass};

/// Cursor tracks a position within the buffer being unmarshaled. Offsets
/// are absolute from the start of the buffer, for error context.
pub(crate) struct Cursor {
    buf: Bytes,
    pos: usize,
}

impl Cursor {
    pub fn new(buf: Bytes) -> Cursor {
        Cursor { buf, pos: 0 }
    }

    pub fn offset(&self) -> u64 {
        self.pos as u64
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_header(&mut self) -> Result<Header, Error> {
        let b = self.read_bytes(Header::WIRE_SIZE)?;
        Ok(Header::from_bytes(b.as_ref().try_into().unwrap()))
    }

    pub fn read_array8(&mut self) -> Result<[u8; 8], Error> {
        let b = self.read_bytes(8)?;
        Ok(b.as_ref().try_into().unwrap())
    }

    /// A zero-copy view of the next `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes, Error> {
        if self.remaining() < n {
            return Err(Error::ShortRead {
                offset: self.offset(),
                want: n as u64,
                have: self.remaining() as u64,
            });
        }
        let b = self.buf.slice(self.pos..self.pos + n);
        self.pos += n;
        Ok(b)
    }
}

/// Decoder populates one field slot from the wire. The header has already
/// been read and validated against the mapping; the cursor stands at the
/// start of any trailing payload, whose length fits the enclosing message.
pub(crate) type Decoder = fn(&mut Struct, &FieldDescr, Header, &mut Cursor) -> Result<(), Error>;

/// The number of bytes which follow the header, as declared by it.
pub(crate) fn trailing_len(ft: FieldType, h: Header) -> u64 {
    match ft.size_class() {
        SizeClass::Inline8 => 0,
        SizeClass::InlineTrailer8 => 8,
        SizeClass::LengthPrefixed => match ft {
            FieldType::ListBools => (h.payload() + 7) / 8,
            _ => match ft.list_element_width() {
                // Numeric lists declare an element count, not a byte length.
                Some(width) => h.payload() * width as u64,
                None => h.payload(),
            },
        },
        SizeClass::SubBuffer => h.payload(),
    }
}

pub(crate) fn decoder_for(ft: FieldType) -> Decoder {
    use FieldType::*;
    match ft {
        Bool | Int8 | Int16 | Int32 | Uint8 | Uint16 | Uint32 | Float32 => decode_inline,
        Int64 | Uint64 | Float64 => decode_fixed8,
        String => decode_string,
        Bytes => decode_bytes,
        ListBools => decode_bools,
        ListInt8 | ListInt16 | ListInt32 | ListInt64 | ListUint8 | ListUint16 | ListUint32
        | ListUint64 | ListFloat32 | ListFloat64 => decode_numbers,
        ListBytes | ListStrings => decode_blobs,
        Struct => decode_struct,
        ListStructs => decode_structs,
        // Mappings reject Map and Any fields, so no decoder is ever
        // selected for them.
        Map | Any => unreachable!("reserved field type {ft:?} has no decoder"),
    }
}

fn decode_inline(s: &mut Struct, _: &FieldDescr, h: Header, _: &mut Cursor) -> Result<(), Error> {
    s.replace_slot(h.field_num(), Slot::Inline(h))
}

fn decode_fixed8(s: &mut Struct, _: &FieldDescr, h: Header, cur: &mut Cursor) -> Result<(), Error> {
    if h.payload() != 8 {
        return Err(Error::InvalidPayload {
            field_num: h.field_num(),
            offset: cur.offset(),
            detail: "64-bit scalar header must declare an 8-byte trailer",
        });
    }
    let t = cur.read_array8()?;
    s.replace_slot(h.field_num(), Slot::Fixed8(h, t))
}

fn decode_string(s: &mut Struct, _: &FieldDescr, h: Header, cur: &mut Cursor) -> Result<(), Error> {
    let at = cur.offset();
    let b = cur.read_bytes(h.payload() as usize)?;
    if std::str::from_utf8(&b).is_err() {
        return Err(Error::InvalidPayload {
            field_num: h.field_num(),
            offset: at,
            detail: "string payload is not valid UTF-8",
        });
    }
    s.replace_slot(h.field_num(), Slot::Blob(h, b.into()))
}

fn decode_bytes(s: &mut Struct, _: &FieldDescr, h: Header, cur: &mut Cursor) -> Result<(), Error> {
    let b = cur.read_bytes(h.payload() as usize)?;
    s.replace_slot(h.field_num(), Slot::Blob(h, b.into()))
}

fn decode_bools(s: &mut Struct, _: &FieldDescr, h: Header, cur: &mut Cursor) -> Result<(), Error> {
    let body = cur.read_bytes(((h.payload() + 7) / 8) as usize)?;
    s.replace_slot(h.field_num(), Slot::Bools(BoolList::from_wire(h, body)))
}

fn decode_numbers(
    s: &mut Struct,
    d: &FieldDescr,
    h: Header,
    cur: &mut Cursor,
) -> Result<(), Error> {
    let width = d
        .field_type
        .list_element_width()
        .expect("numeric list tags have a width");
    let body = cur.read_bytes((h.payload() * width as u64) as usize)?;
    s.replace_slot(
        h.field_num(),
        Slot::Numbers(NumberList::from_wire(h, width, body)),
    )
}

fn decode_blobs(s: &mut Struct, d: &FieldDescr, h: Header, cur: &mut Cursor) -> Result<(), Error> {
    let at = cur.offset();
    let body = cur.read_bytes(h.payload() as usize)?;
    let utf8 = d.field_type == FieldType::ListStrings;
    let list = BlobList::from_wire(h, body, at, utf8)?;
    s.replace_slot(h.field_num(), Slot::Blobs(list))
}

fn decode_struct(s: &mut Struct, d: &FieldDescr, h: Header, cur: &mut Cursor) -> Result<(), Error> {
    let mapping = d.nested().expect("struct fields carry a nested mapping");
    let child = Struct::unmarshal_child(mapping, h, cur)?;
    s.replace_slot(h.field_num(), Slot::Child(Box::new(child)))
}

fn decode_structs(
    s: &mut Struct,
    d: &FieldDescr,
    h: Header,
    cur: &mut Cursor,
) -> Result<(), Error> {
    let mapping = d.nested().expect("struct list fields carry a nested mapping");
    let end = cur.offset() + h.payload();
    let mut items = Vec::new();

    while cur.offset() < end {
        let at = cur.offset();
        if end - at < Header::WIRE_SIZE as u64 {
            return Err(Error::ShortRead {
                offset: at,
                want: Header::WIRE_SIZE as u64,
                have: end - at,
            });
        }
        let eh = cur.read_header()?;
        match eh.field_type() {
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
                    tag: eh.tag(),
                    field_num: h.field_num(),
                    offset: at,
                })
            }
        }
        let available = end - cur.offset();
        if eh.payload() > available {
            return Err(Error::PayloadExceedsParent {
                field_num: h.field_num(),
                offset: at,
                payload: eh.payload(),
                available,
            });
        }
        items.push(Struct::unmarshal_child(mapping.clone(), eh, cur)?);
    }

    let list = StructList::from_parts(h, mapping, items);
    s.replace_slot(h.field_num(), Slot::Structs(list))
}
