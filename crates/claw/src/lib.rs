/// FieldType is the closed registry of claw wire types.
///
/// Every field of a generated struct carries one of these tags in byte 2 of
/// its 8-byte field header. The tag fixes how the 40-bit header payload is
/// interpreted and how many trailing bytes (if any) follow the header.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Bool = 1,
    Int8 = 2,
    Int16 = 3,
    Int32 = 4,
    Int64 = 5,
    Uint8 = 6,
    Uint16 = 7,
    Uint32 = 8,
    Uint64 = 9,
    Float32 = 10,
    Float64 = 11,
    String = 12,
    Bytes = 13,
    Struct = 14,
    ListBools = 15,
    ListInt8 = 16,
    ListInt16 = 17,
    ListInt32 = 18,
    ListInt64 = 19,
    ListUint8 = 20,
    ListUint16 = 21,
    ListUint32 = 22,
    ListUint64 = 23,
    ListFloat32 = 24,
    ListFloat64 = 25,
    ListBytes = 26,
    ListStrings = 27,
    ListStructs = 28,
    // Map and Any are registered tags whose wire layout is reserved.
    // Mappings reject fields which use them.
    Map = 29,
    Any = 30,
}

/// SizeClass partitions field types by their on-wire shape beyond the header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SizeClass {
    /// The 8-byte header is the entire encoding; the value (if any) lives in
    /// the 40-bit header payload.
    Inline8,
    /// The header is followed by a fixed 8-byte little-endian value.
    InlineTrailer8,
    /// The header payload describes the length of a trailing byte run.
    LengthPrefixed,
    /// The header payload is the total size of a trailing sub-buffer of
    /// framed sub-messages.
    SubBuffer,
}

impl FieldType {
    pub fn from_u8(tag: u8) -> Option<FieldType> {
        use FieldType::*;
        Some(match tag {
            1 => Bool,
            2 => Int8,
            3 => Int16,
            4 => Int32,
            5 => Int64,
            6 => Uint8,
            7 => Uint16,
            8 => Uint32,
            9 => Uint64,
            10 => Float32,
            11 => Float64,
            12 => String,
            13 => Bytes,
            14 => Struct,
            15 => ListBools,
            16 => ListInt8,
            17 => ListInt16,
            18 => ListInt32,
            19 => ListInt64,
            20 => ListUint8,
            21 => ListUint16,
            22 => ListUint32,
            23 => ListUint64,
            24 => ListFloat32,
            25 => ListFloat64,
            26 => ListBytes,
            27 => ListStrings,
            28 => ListStructs,
            29 => Map,
            30 => Any,
            _ => return None,
        })
    }

    pub fn size_class(&self) -> SizeClass {
        use FieldType::*;
        match self {
            Bool | Int8 | Int16 | Int32 | Uint8 | Uint16 | Uint32 | Float32 => SizeClass::Inline8,
            Int64 | Uint64 | Float64 => SizeClass::InlineTrailer8,
            String | Bytes | ListBools | ListInt8 | ListInt16 | ListInt32 | ListInt64
            | ListUint8 | ListUint16 | ListUint32 | ListUint64 | ListFloat32 | ListFloat64
            | ListBytes | ListStrings | Map | Any => SizeClass::LengthPrefixed,
            Struct | ListStructs => SizeClass::SubBuffer,
        }
    }

    /// Is this a list type?
    pub fn is_list(&self) -> bool {
        use FieldType::*;
        matches!(
            self,
            ListBools
                | ListInt8
                | ListInt16
                | ListInt32
                | ListInt64
                | ListUint8
                | ListUint16
                | ListUint32
                | ListUint64
                | ListFloat32
                | ListFloat64
                | ListBytes
                | ListStrings
                | ListStructs
        )
    }

    /// Is this a scalar atom (bool, sized integer, or float)?
    pub fn is_scalar(&self) -> bool {
        use FieldType::*;
        matches!(
            self,
            Bool | Int8 | Int16 | Int32 | Int64 | Uint8 | Uint16 | Uint32 | Uint64 | Float32
                | Float64
        )
    }

    /// For numeric list types, the fixed width in bytes of one element.
    /// The width is implied by the tag and is never stored on the wire.
    pub fn list_element_width(&self) -> Option<usize> {
        use FieldType::*;
        Some(match self {
            ListInt8 | ListUint8 => 1,
            ListInt16 | ListUint16 => 2,
            ListInt32 | ListUint32 | ListFloat32 => 4,
            ListInt64 | ListUint64 | ListFloat64 => 8,
            _ => return None,
        })
    }

    /// For list types, the tag of one element.
    pub fn list_element_type(&self) -> Option<FieldType> {
        use FieldType::*;
        Some(match self {
            ListBools => Bool,
            ListInt8 => Int8,
            ListInt16 => Int16,
            ListInt32 => Int32,
            ListInt64 => Int64,
            ListUint8 => Uint8,
            ListUint16 => Uint16,
            ListUint32 => Uint32,
            ListUint64 => Uint64,
            ListFloat32 => Float32,
            ListFloat64 => Float64,
            ListBytes => Bytes,
            ListStrings => String,
            ListStructs => Struct,
            _ => return None,
        })
    }

    /// The IDL spelling of this type, as the schema language writes it.
    pub fn name(&self) -> &'static str {
        use FieldType::*;
        match self {
            Bool => "bool",
            Int8 => "int8",
            Int16 => "int16",
            Int32 => "int32",
            Int64 => "int64",
            Uint8 => "uint8",
            Uint16 => "uint16",
            Uint32 => "uint32",
            Uint64 => "uint64",
            Float32 => "float32",
            Float64 => "float64",
            String => "string",
            Bytes => "bytes",
            Struct => "struct",
            ListBools => "[]bool",
            ListInt8 => "[]int8",
            ListInt16 => "[]int16",
            ListInt32 => "[]int32",
            ListInt64 => "[]int64",
            ListUint8 => "[]uint8",
            ListUint16 => "[]uint16",
            ListUint32 => "[]uint32",
            ListUint64 => "[]uint64",
            ListFloat32 => "[]float32",
            ListFloat64 => "[]float64",
            ListBytes => "[]bytes",
            ListStrings => "[]string",
            ListStructs => "[]struct",
            Map => "map",
            Any => "any",
        }
    }

    /// The inverse of [FieldType::name].
    pub fn from_name(name: &str) -> Option<FieldType> {
        use FieldType::*;
        Some(match name {
            "bool" => Bool,
            "int8" => Int8,
            "int16" => Int16,
            "int32" => Int32,
            "int64" => Int64,
            "uint8" => Uint8,
            "uint16" => Uint16,
            "uint32" => Uint32,
            "uint64" => Uint64,
            "float32" => Float32,
            "float64" => Float64,
            "string" => String,
            "bytes" => Bytes,
            "struct" => Struct,
            "[]bool" => ListBools,
            "[]int8" => ListInt8,
            "[]int16" => ListInt16,
            "[]int32" => ListInt32,
            "[]int64" => ListInt64,
            "[]uint8" => ListUint8,
            "[]uint16" => ListUint16,
            "[]uint32" => ListUint32,
            "[]uint64" => ListUint64,
            "[]float32" => ListFloat32,
            "[]float64" => ListFloat64,
            "[]bytes" => ListBytes,
            "[]string" => ListStrings,
            "[]struct" => ListStructs,
            "map" => Map,
            "any" => Any,
            _ => return None,
        })
    }
}

// The 8-byte field header shared by every encoding.
mod header;
pub use header::{Header, MAX_PAYLOAD};

// Scalar atoms: bool, sized integers, floats, and their wire shapes.
mod scalar;
pub use scalar::Scalar;

// Owned-or-borrowed payload bytes. Unmarshal borrows from the input buffer;
// the first mutation promotes the payload to an owned vector.
mod payload;

// List containers: packed bools, fixed-width numbers, byte blobs, structs.
pub mod list;
pub use list::{BlobList, BoolList, ListNumber, NumberList, StructList};

// The Struct runtime: slot storage, zero-value compression, size
// bookkeeping, and the marshal/unmarshal drivers.
mod structs;
pub use structs::{ChildMut, Struct, StructsMut};

// Immutable per-struct field tables, enum groups, package descriptors, and
// the process-wide descriptor registry.
pub mod mapping;
pub use mapping::{EnumGroup, FieldDescr, FieldSpec, Mapping, NestedRef, Package};

// Per-tag decode functions, selected once at mapping construction.
mod decode;

// The walk producer: a typed token stream over a Struct.
pub mod walk;
pub use walk::{walk, Number, Token, TokenKind, Value};

// The ingest consumer: rebuild a Struct from a token stream.
pub mod ingest;
pub use ingest::{ingest, IngestOptions, Ingester};

// Read-only reflection over mappings and live Structs.
pub mod reflect;

// Reusable buffer and struct pools.
pub mod pool;

mod error;
pub use error::Error;
