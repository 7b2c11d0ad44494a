//! The walk producer: a typed token stream over a Struct.
//!
//! Walk is the one traversal that reflection and the format bridges share.
//! It visits fields in mapping order and calls back into the consumer via
//! `yield`; a false return halts traversal before the next token.

use crate::mapping::FieldDescr;
use crate::structs::Struct;
use crate::FieldType;

/// TokenKind discriminates the stream's bracketing and leaf tokens.
///
/// MapStart, MapEnd, and MapEntry are reserved for the map extension; walk
/// never emits them today and ingest rejects them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TokenKind {
    StructStart,
    StructEnd,
    Field,
    ListStart,
    ListEnd,
    MapStart,
    MapEnd,
    MapEntry,
}

/// Number is the scalar carrier of a Field token.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Number {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
}

/// Value is the payload carried by a leaf Field token.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Value<'a> {
    None,
    Bool(bool),
    Number(Number),
    Str(&'a str),
    Bytes(&'a [u8]),
}

/// Token is one element of the walk stream. All borrows live as long as
/// the walked Struct.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    /// The field name for named Field tokens; the struct type name on
    /// StructStart and StructEnd; None for list element tokens.
    pub name: Option<&'a str>,
    pub field_type: Option<FieldType>,
    pub value: Value<'a>,
    /// For enum-typed fields: the group name and the resolved label of the
    /// current value, when the group defines it.
    pub enum_group: Option<&'a str>,
    pub enum_name: Option<&'a str>,
    /// For struct-typed fields: the nested struct type name.
    pub struct_name: Option<&'a str>,
    /// True on a Field token whose nested struct or list is absent; no
    /// bracket tokens follow it.
    pub is_nil: bool,
    /// Element count on ListStart.
    pub list_len: Option<u64>,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind) -> Token<'a> {
        Token {
            kind,
            name: None,
            field_type: None,
            value: Value::None,
            enum_group: None,
            enum_name: None,
            struct_name: None,
            is_nil: false,
            list_len: None,
        }
    }

    pub fn struct_start(name: &'a str) -> Token<'a> {
        Token {
            name: Some(name),
            ..Token::new(TokenKind::StructStart)
        }
    }

    pub fn struct_end(name: &'a str) -> Token<'a> {
        Token {
            name: Some(name),
            ..Token::new(TokenKind::StructEnd)
        }
    }

    pub fn list_start(len: u64) -> Token<'a> {
        Token {
            list_len: Some(len),
            ..Token::new(TokenKind::ListStart)
        }
    }

    pub fn list_end() -> Token<'a> {
        Token::new(TokenKind::ListEnd)
    }

    pub fn field(name: &'a str, value: Value<'a>) -> Token<'a> {
        Token {
            name: Some(name),
            value,
            ..Token::new(TokenKind::Field)
        }
    }
}

/// Walk `s`, yielding tokens to the consumer. Returns true if the
/// traversal completed, or false as soon as `yield_fn` declines a token.
pub fn walk<F>(s: &Struct, yield_fn: &mut F) -> bool
where
    F: FnMut(&Token<'_>) -> bool + ?Sized,
{
    if !yield_fn(&Token::struct_start(s.name())) {
        return false;
    }
    for d in s.mapping().fields() {
        if !walk_field(s, d, yield_fn) {
            return false;
        }
    }
    yield_fn(&Token::struct_end(s.name()))
}

fn walk_field<F>(s: &Struct, d: &FieldDescr, yield_fn: &mut F) -> bool
where
    F: FnMut(&Token<'_>) -> bool + ?Sized,
{
    use FieldType::*;

    match d.field_type {
        Bool => {
            let mut tok = Token::field(&d.name, Value::Bool(s.get::<bool>(d.field_num)));
            tok.field_type = Some(d.field_type);
            yield_fn(&tok)
        }
        Int8 | Int16 | Int32 | Int64 | Uint8 | Uint16 | Uint32 | Uint64 | Float32 | Float64 => {
            let number = scalar_number(s, d);
            let mut tok = Token::field(&d.name, Value::Number(number));
            tok.field_type = Some(d.field_type);
            resolve_enum(d, number, &mut tok);
            yield_fn(&tok)
        }
        String => {
            let mut tok = Token::field(&d.name, Value::Str(s.get_str(d.field_num)));
            tok.field_type = Some(d.field_type);
            yield_fn(&tok)
        }
        Bytes => {
            let mut tok = Token::field(&d.name, Value::Bytes(s.get_bytes(d.field_num)));
            tok.field_type = Some(d.field_type);
            yield_fn(&tok)
        }
        Struct => {
            let child = s.child(d.field_num);
            let mut tok = Token::field(&d.name, Value::None);
            tok.field_type = Some(d.field_type);
            tok.struct_name = d.nested_type_name();
            tok.is_nil = child.is_none();
            if !yield_fn(&tok) {
                return false;
            }
            match child {
                Some(child) => walk(child, yield_fn),
                None => true,
            }
        }
        ListBools => walk_list(s, d, yield_fn, |s| {
            s.bools(d.field_num).map(|l| (l.len() as u64, ListBody::Bools(l)))
        }),
        ListInt8 | ListInt16 | ListInt32 | ListInt64 | ListUint8 | ListUint16 | ListUint32
        | ListUint64 | ListFloat32 | ListFloat64 => walk_list(s, d, yield_fn, |s| {
            s.numbers(d.field_num)
                .map(|l| (l.len() as u64, ListBody::Numbers(l)))
        }),
        ListBytes | ListStrings => walk_list(s, d, yield_fn, |s| {
            s.blobs(d.field_num).map(|l| (l.len() as u64, ListBody::Blobs(l)))
        }),
        ListStructs => walk_list(s, d, yield_fn, |s| {
            s.structs(d.field_num)
                .map(|l| (l.len() as u64, ListBody::Structs(l)))
        }),
        Map | Any => unreachable!("mappings reject reserved field types"),
    }
}

enum ListBody<'a> {
    Bools(&'a crate::list::BoolList),
    Numbers(&'a crate::list::NumberList),
    Blobs(&'a crate::list::BlobList),
    Structs(&'a crate::list::StructList),
}

fn walk_list<'s, F, G>(s: &'s Struct, d: &FieldDescr, yield_fn: &mut F, body: G) -> bool
where
    F: FnMut(&Token<'_>) -> bool + ?Sized,
    G: FnOnce(&'s Struct) -> Option<(u64, ListBody<'s>)>,
{
    let body = body(s);
    let elem = d
        .field_type
        .list_element_type()
        .expect("list tags have an element type");

    let mut tok = Token::field(&d.name, Value::None);
    tok.field_type = Some(d.field_type);
    tok.struct_name = d.nested_type_name();
    tok.is_nil = body.is_none();
    if !yield_fn(&tok) {
        return false;
    }
    let Some((len, body)) = body else {
        return true;
    };

    let mut start = Token::list_start(len);
    start.field_type = Some(elem);
    if !yield_fn(&start) {
        return false;
    }

    match body {
        ListBody::Bools(l) => {
            for v in l.iter() {
                let mut tok = Token::new(TokenKind::Field);
                tok.field_type = Some(elem);
                tok.value = Value::Bool(v);
                if !yield_fn(&tok) {
                    return false;
                }
            }
        }
        ListBody::Numbers(l) => {
            for i in 0..l.len() {
                let number = raw_to_number(elem, l.raw(i));
                let mut tok = Token::new(TokenKind::Field);
                tok.field_type = Some(elem);
                tok.value = Value::Number(number);
                resolve_enum(d, number, &mut tok);
                if !yield_fn(&tok) {
                    return false;
                }
            }
        }
        ListBody::Blobs(l) => {
            for i in 0..l.len() {
                let mut tok = Token::new(TokenKind::Field);
                tok.field_type = Some(elem);
                tok.value = match elem {
                    FieldType::String => Value::Str(l.get_str(i).unwrap()),
                    _ => Value::Bytes(l.get(i).unwrap()),
                };
                if !yield_fn(&tok) {
                    return false;
                }
            }
        }
        ListBody::Structs(l) => {
            for child in l.iter() {
                if !walk(child, yield_fn) {
                    return false;
                }
            }
        }
    }
    yield_fn(&Token::list_end())
}

// Attach the enum group name and resolved label to a Field token.
fn resolve_enum<'a>(d: &'a FieldDescr, number: Number, tok: &mut Token<'a>) {
    let Some(group) = &d.enum_group else { return };
    tok.enum_group = Some(group.name());
    if let Number::Unsigned(v) = number {
        if v <= u16::MAX as u64 {
            tok.enum_name = group.label(v as u16);
        }
    }
}

pub(crate) fn scalar_number(s: &Struct, d: &FieldDescr) -> Number {
    use FieldType::*;
    match d.field_type {
        Int8 => Number::Signed(s.get::<i8>(d.field_num) as i64),
        Int16 => Number::Signed(s.get::<i16>(d.field_num) as i64),
        Int32 => Number::Signed(s.get::<i32>(d.field_num) as i64),
        Int64 => Number::Signed(s.get::<i64>(d.field_num)),
        Uint8 => Number::Unsigned(s.get::<u8>(d.field_num) as u64),
        Uint16 => Number::Unsigned(s.get::<u16>(d.field_num) as u64),
        Uint32 => Number::Unsigned(s.get::<u32>(d.field_num) as u64),
        Uint64 => Number::Unsigned(s.get::<u64>(d.field_num)),
        Float32 => Number::Float(s.get::<f32>(d.field_num) as f64),
        Float64 => Number::Float(s.get::<f64>(d.field_num)),
        _ => unreachable!("scalar_number on a non-numeric field"),
    }
}

// Convert a zero-extended raw list element into its Number.
pub(crate) fn raw_to_number(elem: FieldType, raw: u64) -> Number {
    use FieldType::*;
    match elem {
        Int8 => Number::Signed(raw as u8 as i8 as i64),
        Int16 => Number::Signed(raw as u16 as i16 as i64),
        Int32 => Number::Signed(raw as u32 as i32 as i64),
        Int64 => Number::Signed(raw as i64),
        Uint8 | Uint16 | Uint32 | Uint64 => Number::Unsigned(raw),
        Float32 => Number::Float(f32::from_bits(raw as u32) as f64),
        Float64 => Number::Float(f64::from_bits(raw)),
        _ => unreachable!("raw_to_number on a non-numeric element"),
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::{walk, Number, Token, TokenKind, Value};
    use crate::mapping::{EnumGroup, EnumWidth, FieldSpec, Mapping, NestedRef};
    use crate::{FieldType, Struct};
    use std::sync::Arc;

    pub(crate) fn fmt_token(tok: &Token<'_>) -> String {
        let mut out = format!("{:?}", tok.kind);
        let mut args = Vec::new();
        if let Some(name) = tok.name {
            args.push(format!("name={name}"));
        }
        if let Some(ft) = tok.field_type {
            args.push(format!("type={}", ft.name()));
        }
        match tok.value {
            Value::None => {}
            Value::Bool(v) => args.push(format!("value={v}")),
            Value::Number(Number::Unsigned(v)) => args.push(format!("value={v}")),
            Value::Number(Number::Signed(v)) => args.push(format!("value={v}")),
            Value::Number(Number::Float(v)) => args.push(format!("value={v}")),
            Value::Str(v) => args.push(format!("value={v:?}")),
            Value::Bytes(v) => args.push(format!("value={v:?}")),
        }
        if let (Some(group), Some(label)) = (tok.enum_group, tok.enum_name) {
            args.push(format!("enum={group}/{label}"));
        }
        if tok.is_nil {
            args.push("nil".to_string());
        }
        if let Some(len) = tok.list_len {
            args.push(format!("len={len}"));
        }
        if args.is_empty() {
            out
        } else {
            out.push_str("(");
            out.push_str(&args.join(" "));
            out.push_str(")");
            out
        }
    }

    pub(crate) fn collect(s: &Struct) -> Vec<String> {
        let mut tokens = Vec::new();
        assert!(walk(s, &mut |tok: &Token<'_>| {
            tokens.push(fmt_token(tok));
            true
        }));
        tokens
    }

    fn manufacturer() -> Arc<EnumGroup> {
        EnumGroup::new(
            "Manufacturer",
            EnumWidth::U8,
            vec![
                ("Unknown".to_string(), 0),
                ("Toyota".to_string(), 1),
                ("Ford".to_string(), 2),
            ],
        )
        .unwrap()
    }

    fn model() -> Arc<EnumGroup> {
        EnumGroup::new(
            "Model",
            EnumWidth::U8,
            vec![
                ("Unknown".to_string(), 0),
                ("Camry".to_string(), 1),
                ("Venza".to_string(), 2),
            ],
        )
        .unwrap()
    }

    pub(crate) fn car_mapping() -> Arc<Mapping> {
        Mapping::new(
            "test/vehicles.claw",
            "Car",
            vec![
                FieldSpec::enumerated("Manufacturer", FieldType::Uint8, manufacturer()),
                FieldSpec::enumerated("Model", FieldType::Uint8, model()),
                FieldSpec::scalar("Year", FieldType::Uint16),
            ],
        )
        .unwrap()
    }

    pub(crate) fn vehicle_mapping() -> Arc<Mapping> {
        let car = car_mapping();
        let vehicle_type = EnumGroup::new(
            "Type",
            EnumWidth::U8,
            vec![
                ("Unknown".to_string(), 0),
                ("Car".to_string(), 1),
                ("Truck".to_string(), 2),
            ],
        )
        .unwrap();
        Mapping::new(
            "test/vehicles.claw",
            "Vehicle",
            vec![
                FieldSpec::enumerated("Type", FieldType::Uint8, vehicle_type.clone()),
                FieldSpec::nested("Car", FieldType::Struct, NestedRef::Mapping(car.clone())),
                FieldSpec::nested("Truck", FieldType::ListStructs, NestedRef::Mapping(car)),
                FieldSpec::enumerated("Types", FieldType::ListUint8, vehicle_type),
                FieldSpec::scalar("Bools", FieldType::ListBools),
            ],
        )
        .unwrap()
    }

    pub(crate) fn s1_car() -> Struct {
        let mut car = Struct::new(car_mapping());
        car.set::<u8>(0, 1).unwrap();
        car.set::<u8>(1, 2).unwrap();
        car.set::<u16>(2, 2010).unwrap();
        car
    }

    #[test]
    fn test_car_scalar_stream() {
        assert_eq!(
            collect(&s1_car()),
            vec![
                "StructStart(name=Car)",
                "Field(name=Manufacturer type=uint8 value=1 enum=Manufacturer/Toyota)",
                "Field(name=Model type=uint8 value=2 enum=Model/Venza)",
                "Field(name=Year type=uint16 value=2010)",
                "StructEnd(name=Car)",
            ],
        );
    }

    #[test]
    fn test_empty_car_resolves_zero_labels() {
        let car = Struct::new(car_mapping());
        assert_eq!(
            collect(&car),
            vec![
                "StructStart(name=Car)",
                "Field(name=Manufacturer type=uint8 value=0 enum=Manufacturer/Unknown)",
                "Field(name=Model type=uint8 value=0 enum=Model/Unknown)",
                "Field(name=Year type=uint16 value=0)",
                "StructEnd(name=Car)",
            ],
        );
    }

    #[test]
    fn test_nested_vehicle_stream() {
        let mut vehicle = Struct::new(vehicle_mapping());
        vehicle.set::<u8>(0, 1).unwrap();
        vehicle.set_child(1, s1_car()).unwrap();

        assert_eq!(
            collect(&vehicle),
            vec![
                "StructStart(name=Vehicle)",
                "Field(name=Type type=uint8 value=1 enum=Type/Car)",
                "Field(name=Car type=struct)",
                "StructStart(name=Car)",
                "Field(name=Manufacturer type=uint8 value=1 enum=Manufacturer/Toyota)",
                "Field(name=Model type=uint8 value=2 enum=Model/Venza)",
                "Field(name=Year type=uint16 value=2010)",
                "StructEnd(name=Car)",
                "Field(name=Truck type=[]struct nil)",
                "Field(name=Types type=[]uint8 nil)",
                "Field(name=Bools type=[]bool nil)",
                "StructEnd(name=Vehicle)",
            ],
        );
    }

    #[test]
    fn test_list_streams() {
        let mut vehicle = Struct::new(vehicle_mapping());
        vehicle.set_numbers::<u8>(3, &[1, 2]).unwrap();
        vehicle.set_bools(4, [true, false, true]).unwrap();

        assert_eq!(
            collect(&vehicle),
            vec![
                "StructStart(name=Vehicle)",
                "Field(name=Type type=uint8 value=0 enum=Type/Unknown)",
                "Field(name=Car type=struct nil)",
                "Field(name=Truck type=[]struct nil)",
                "Field(name=Types type=[]uint8)",
                "ListStart(type=uint8 len=2)",
                "Field(type=uint8 value=1 enum=Type/Car)",
                "Field(type=uint8 value=2 enum=Type/Truck)",
                "ListEnd",
                "Field(name=Bools type=[]bool)",
                "ListStart(type=bool len=3)",
                "Field(type=bool value=true)",
                "Field(type=bool value=false)",
                "Field(type=bool value=true)",
                "ListEnd",
                "StructEnd(name=Vehicle)",
            ],
        );
    }

    #[test]
    fn test_yield_false_stops_the_stream() {
        let car = s1_car();
        for stop_after in 0..5usize {
            let mut seen = 0usize;
            let completed = walk(&car, &mut |_: &Token<'_>| {
                seen += 1;
                seen <= stop_after
            });
            assert!(!completed);
            // Exactly one token is yielded past the consumer's limit; the
            // producer stops as soon as yield declines it.
            assert_eq!(seen, stop_after + 1);
        }
    }
}
