use crate::walk::TokenKind;
use crate::FieldType;

/// Error is the unified error type of the claw runtime.
///
/// Wire errors carry the field number and absolute byte offset at which
/// decoding failed, and are fatal to the message being decoded. Mapping and
/// registry errors are raised once, at descriptor construction time.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("short read at offset {offset}: wanted {want} bytes, {have} remain")]
    ShortRead { offset: u64, want: u64, have: u64 },

    #[error(
        "field {field_num} at offset {offset} declares {payload} payload bytes, \
         but only {available} remain in its enclosing message"
    )]
    PayloadExceedsParent {
        field_num: u16,
        offset: u64,
        payload: u64,
        available: u64,
    },

    #[error("field {field_num} at offset {offset} has an invalid payload: {detail}")]
    InvalidPayload {
        field_num: u16,
        offset: u64,
        detail: &'static str,
    },

    #[error("unknown field type tag {tag} for field {field_num} at offset {offset}")]
    UnknownTag { tag: u8, field_num: u16, offset: u64 },

    #[error("field {field_num} is not defined by mapping {mapping:?}")]
    UnknownField { field_num: u16, mapping: String },

    #[error("field {name:?} is not defined by mapping {mapping:?}")]
    UnknownFieldName { name: String, mapping: String },

    #[error("field {field_num} appears more than once (second instance at offset {offset})")]
    DuplicateField { field_num: u16, offset: u64 },

    #[error("field {field_num} has wire type {actual:?} but its mapping declares {expect:?}")]
    TypeMismatch {
        field_num: u16,
        expect: FieldType,
        actual: FieldType,
    },

    #[error("encoded size {size} exceeds the 40-bit header payload limit")]
    PayloadOverflow { size: u64 },

    #[error("invalid mapping {mapping:?}: {detail}")]
    InvalidMapping { mapping: String, detail: String },

    #[error("package {path:?} is already registered with a different descriptor")]
    DescriptorConflict { path: String },

    #[error("enum group {group:?} has no value named {name:?}")]
    UnknownEnumName { group: String, name: String },

    #[error("expected {expect} but the stream yielded a {got:?} token")]
    UnexpectedToken { expect: &'static str, got: TokenKind },

    #[error("the token stream ended before the root struct was closed")]
    TruncatedStream,

    #[error("token value for field {field:?} ({field_type:?}) is invalid: {detail}")]
    InvalidTokenValue {
        field: String,
        field_type: FieldType,
        detail: String,
    },

    #[error("walk was cancelled by its consumer")]
    Cancelled,

    #[error(transparent)]
    Pack(#[from] pack::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
