//! The ingest consumer: rebuild a Struct from a walk token stream.
//!
//! Ingest is a push state machine. The walker is a one-shot cooperative
//! producer: it receives a yield callback and runs synchronously, and the
//! machine consumes each token as it arrives. Bridges drive the same
//! machine from parsed JSON or text.

use std::sync::Arc;

use crate::mapping::{FieldDescr, Mapping};
use crate::structs::Struct;
use crate::walk::{Number, Token, TokenKind, Value};
use crate::{Error, FieldType};

/// IngestOptions tweak consumer behavior.
#[derive(Debug, Copy, Clone, Default)]
pub struct IngestOptions {
    /// Skip Field tokens whose name is not in the target mapping, along
    /// with any bracketed value that follows them. Off by default: an
    /// unknown field is an error.
    pub ignore_unknown_fields: bool,
}

/// Build a Struct of `mapping` by running `walker` to completion.
///
/// The walker receives the yield callback and must forward every token to
/// it, stopping early if it returns false. A walker that stops without a
/// feed error surfaces as [Error::Cancelled].
pub fn ingest<W>(mapping: Arc<Mapping>, walker: W, options: IngestOptions) -> Result<Struct, Error>
where
    W: FnOnce(&mut dyn FnMut(&Token<'_>) -> bool) -> bool,
{
    let mut ing = Ingester::new(mapping, options);
    let mut failure: Option<Error> = None;

    let completed = walker(&mut |tok| {
        if failure.is_some() {
            // The machine already failed; decline anything a misbehaving
            // walker keeps sending.
            return false;
        }
        match ing.feed(tok) {
            Ok(()) => true,
            Err(err) => {
                failure = Some(err);
                false
            }
        }
    });

    if let Some(err) = failure {
        return Err(err);
    }
    if !completed {
        return Err(Error::Cancelled);
    }
    ing.finish()
}

// What to do with a completed struct frame.
enum Dest {
    Root,
    Field(u16),
    ListItem(u16),
}

// What the machine requires of the next token in a struct frame.
enum Pending {
    None,
    // A Field for a non-nil nested struct was seen; a StructStart must
    // follow.
    ChildStart(u16),
    // A Field for a non-nil list was seen; a ListStart must follow.
    ListStartFor(u16),
    // An unknown Field was seen with ignore_unknown_fields on. If brackets
    // follow they are skipped; any other token is processed normally.
    MaybeSkip,
}

enum Frame {
    Struct {
        s: Struct,
        dest: Dest,
        pending: Pending,
    },
    List {
        field_num: u16,
    },
    Skip {
        depth: u32,
    },
}

/// Ingester is the push state machine behind [ingest]. Feed it tokens in
/// stream order, then call finish.
pub struct Ingester {
    mapping: Option<Arc<Mapping>>,
    options: IngestOptions,
    frames: Vec<Frame>,
    done: Option<Struct>,
}

impl Ingester {
    pub fn new(mapping: Arc<Mapping>, options: IngestOptions) -> Ingester {
        Ingester {
            mapping: Some(mapping),
            options,
            frames: Vec::new(),
            done: None,
        }
    }

    pub fn finish(mut self) -> Result<Struct, Error> {
        match (self.done.take(), self.frames.is_empty()) {
            (Some(s), true) => Ok(s),
            _ => Err(Error::TruncatedStream),
        }
    }

    pub fn feed(&mut self, tok: &Token<'_>) -> Result<(), Error> {
        use TokenKind::*;

        if self.done.is_some() {
            return Err(Error::UnexpectedToken {
                expect: "nothing after the closing StructEnd",
                got: tok.kind,
            });
        }

        // A skip frame swallows the bracketed value of an unknown field.
        if let Some(Frame::Skip { depth }) = self.frames.last_mut() {
            match tok.kind {
                StructStart | ListStart | MapStart => *depth += 1,
                StructEnd | ListEnd | MapEnd => {
                    *depth -= 1;
                    if *depth == 0 {
                        self.frames.pop();
                    }
                }
                Field | MapEntry => {}
            }
            return Ok(());
        }

        if self.frames.is_empty() {
            return match tok.kind {
                StructStart => {
                    let mapping = self.mapping.take().expect("root mapping is present");
                    self.frames.push(Frame::Struct {
                        s: Struct::new(mapping),
                        dest: Dest::Root,
                        pending: Pending::None,
                    });
                    Ok(())
                }
                got => Err(Error::UnexpectedToken {
                    expect: "the opening StructStart",
                    got,
                }),
            };
        }

        match self.frames.last() {
            Some(Frame::Struct { .. }) => self.feed_struct(tok),
            Some(Frame::List { .. }) => self.feed_list(tok),
            _ => unreachable!("skip frames were handled above"),
        }
    }

    fn feed_struct(&mut self, tok: &Token<'_>) -> Result<(), Error> {
        use TokenKind::*;

        let Some(Frame::Struct { s, pending, .. }) = self.frames.last_mut() else {
            unreachable!("top frame is a struct");
        };

        match std::mem::replace(pending, Pending::None) {
            Pending::ChildStart(field_num) => {
                return match tok.kind {
                    StructStart => {
                        let mapping = s
                            .mapping()
                            .by_num(field_num)
                            .and_then(|d| d.nested())
                            .expect("struct fields carry a nested mapping");
                        self.frames.push(Frame::Struct {
                            s: Struct::new(mapping),
                            dest: Dest::Field(field_num),
                            pending: Pending::None,
                        });
                        Ok(())
                    }
                    got => Err(Error::UnexpectedToken {
                        expect: "a StructStart for the preceding struct field",
                        got,
                    }),
                };
            }
            Pending::ListStartFor(field_num) => {
                return match tok.kind {
                    ListStart => {
                        s.touch_list(field_num)?;
                        self.frames.push(Frame::List { field_num });
                        Ok(())
                    }
                    got => Err(Error::UnexpectedToken {
                        expect: "a ListStart for the preceding list field",
                        got,
                    }),
                };
            }
            Pending::MaybeSkip => {
                if matches!(tok.kind, StructStart | ListStart | MapStart) {
                    self.frames.push(Frame::Skip { depth: 1 });
                    return Ok(());
                }
                // The unknown field was a scalar whose value rode in its
                // own token; fall through and process this one normally.
            }
            Pending::None => {}
        }

        match tok.kind {
            Field => self.struct_field(tok),
            StructEnd => self.finish_struct(),
            got @ (MapStart | MapEnd | MapEntry) => Err(Error::UnexpectedToken {
                expect: "no map tokens (map is a reserved extension)",
                got,
            }),
            got => Err(Error::UnexpectedToken {
                expect: "a Field or StructEnd",
                got,
            }),
        }
    }

    fn struct_field(&mut self, tok: &Token<'_>) -> Result<(), Error> {
        let Some(Frame::Struct { s, pending, .. }) = self.frames.last_mut() else {
            unreachable!("top frame is a struct");
        };
        let name = tok.name.ok_or(Error::UnexpectedToken {
            expect: "a named Field inside a struct",
            got: TokenKind::Field,
        })?;

        let mapping = s.mapping().clone();
        let Some(d) = mapping.by_name(name) else {
            if !self.options.ignore_unknown_fields {
                return Err(Error::UnknownFieldName {
                    name: name.to_string(),
                    mapping: mapping.name().to_string(),
                });
            }
            if !tok.is_nil {
                *pending = Pending::MaybeSkip;
            }
            return Ok(());
        };

        // A nil Field carries no value: the target field stays absent.
        if tok.is_nil {
            return Ok(());
        }

        use FieldType::*;
        match d.field_type {
            Bool => match tok.value {
                Value::Bool(v) => s.set(d.field_num, v),
                _ => Err(invalid_value(d, "expected a bool value")),
            },
            Int8 | Int16 | Int32 | Int64 | Uint8 | Uint16 | Uint32 | Uint64 | Float32
            | Float64 => {
                let number = resolve_number(d, &tok.value)?;
                set_number(s, d, number)
            }
            String => match tok.value {
                Value::Str(v) => s.set_str(d.field_num, v),
                _ => Err(invalid_value(d, "expected a string value")),
            },
            Bytes => match tok.value {
                Value::Bytes(v) => s.set_bytes(d.field_num, v),
                _ => Err(invalid_value(d, "expected a bytes value")),
            },
            Struct => {
                if !tok.is_nil {
                    *pending = Pending::ChildStart(d.field_num);
                }
                Ok(())
            }
            ListBools | ListInt8 | ListInt16 | ListInt32 | ListInt64 | ListUint8 | ListUint16
            | ListUint32 | ListUint64 | ListFloat32 | ListFloat64 | ListBytes | ListStrings
            | ListStructs => {
                if !tok.is_nil {
                    *pending = Pending::ListStartFor(d.field_num);
                }
                Ok(())
            }
            Map | Any => unreachable!("mappings reject reserved field types"),
        }
    }

    fn feed_list(&mut self, tok: &Token<'_>) -> Result<(), Error> {
        use TokenKind::*;

        let Some(Frame::List { field_num }) = self.frames.last() else {
            unreachable!("top frame is a list");
        };
        let field_num = *field_num;

        match tok.kind {
            ListEnd => {
                self.frames.pop();
                Ok(())
            }
            Field => {
                let parent = self.parent_struct_mut();
                let mapping = parent.mapping().clone();
                let d = mapping.by_num(field_num).expect("list field is mapped");
                list_element(parent, d, tok)
            }
            StructStart => {
                let parent = self.parent_struct_mut();
                let d = parent
                    .mapping()
                    .by_num(field_num)
                    .expect("list field is mapped");
                if d.field_type != FieldType::ListStructs {
                    return Err(Error::UnexpectedToken {
                        expect: "scalar elements in a non-struct list",
                        got: StructStart,
                    });
                }
                let mapping = d.nested().expect("struct list fields carry a nested mapping");
                self.frames.push(Frame::Struct {
                    s: Struct::new(mapping),
                    dest: Dest::ListItem(field_num),
                    pending: Pending::None,
                });
                Ok(())
            }
            got => Err(Error::UnexpectedToken {
                expect: "a list element or ListEnd",
                got,
            }),
        }
    }

    fn finish_struct(&mut self) -> Result<(), Error> {
        let Some(Frame::Struct { s, dest, .. }) = self.frames.pop() else {
            unreachable!("top frame is a struct");
        };
        match dest {
            Dest::Root => {
                self.done = Some(s);
                Ok(())
            }
            Dest::Field(field_num) => {
                let parent = self.parent_struct_mut();
                parent.set_child(field_num, s)
            }
            Dest::ListItem(field_num) => {
                let parent = self.parent_struct_mut();
                parent.append_struct(field_num, s)
            }
        }
    }

    // The nearest enclosing struct frame: the frame below a list frame, or
    // the top frame itself.
    fn parent_struct_mut(&mut self) -> &mut Struct {
        for frame in self.frames.iter_mut().rev() {
            if let Frame::Struct { s, .. } = frame {
                return s;
            }
        }
        unreachable!("an enclosing struct frame exists");
    }
}

// Append one scalar element to a list field.
fn list_element(s: &mut Struct, d: &FieldDescr, tok: &Token<'_>) -> Result<(), Error> {
    use FieldType::*;
    match d.field_type {
        ListBools => match tok.value {
            Value::Bool(v) => s.append_bool(d.field_num, v),
            _ => Err(invalid_value(d, "expected a bool element")),
        },
        ListStrings => match tok.value {
            Value::Str(v) => s.append_str(d.field_num, v),
            _ => Err(invalid_value(d, "expected a string element")),
        },
        ListBytes => match tok.value {
            Value::Bytes(v) => s.append_blob(d.field_num, v),
            _ => Err(invalid_value(d, "expected a bytes element")),
        },
        ListInt8 | ListInt16 | ListInt32 | ListInt64 | ListUint8 | ListUint16 | ListUint32
        | ListUint64 | ListFloat32 | ListFloat64 => {
            let number = resolve_number(d, &tok.value)?;
            append_number(s, d, number)
        }
        _ => Err(invalid_value(d, "field is not a scalar list")),
    }
}

// Resolve a token value to a Number, accepting enum labels by name for
// enum-typed fields.
fn resolve_number(d: &FieldDescr, value: &Value<'_>) -> Result<Number, Error> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Str(label) => {
            let Some(group) = &d.enum_group else {
                return Err(invalid_value(d, "expected a numeric value"));
            };
            match group.number(label) {
                Some(v) => Ok(Number::Unsigned(v as u64)),
                None => Err(Error::UnknownEnumName {
                    group: group.name().to_string(),
                    name: label.to_string(),
                }),
            }
        }
        _ => Err(invalid_value(d, "expected a numeric value")),
    }
}

fn invalid_value(d: &FieldDescr, detail: &str) -> Error {
    Error::InvalidTokenValue {
        field: d.name.clone(),
        field_type: d.field_type,
        detail: detail.to_string(),
    }
}

macro_rules! number_as {
    ($d:expr, $n:expr, $t:ty) => {{
        let n = $n;
        match n {
            Number::Unsigned(v) => <$t>::try_from(v).ok(),
            Number::Signed(v) => <$t>::try_from(v).ok(),
            Number::Float(v) => {
                if v.fract() == 0.0 && v >= <$t>::MIN as f64 && v <= <$t>::MAX as f64 {
                    Some(v as $t)
                } else {
                    None
                }
            }
        }
        .ok_or_else(|| invalid_value($d, &format!("{n:?} does not fit")))
    }};
}

fn set_number(s: &mut Struct, d: &FieldDescr, n: Number) -> Result<(), Error> {
    use FieldType::*;
    match d.field_type {
        Int8 => s.set(d.field_num, number_as!(d, n, i8)?),
        Int16 => s.set(d.field_num, number_as!(d, n, i16)?),
        Int32 => s.set(d.field_num, number_as!(d, n, i32)?),
        Int64 => s.set(d.field_num, number_as!(d, n, i64)?),
        Uint8 => s.set(d.field_num, number_as!(d, n, u8)?),
        Uint16 => s.set(d.field_num, number_as!(d, n, u16)?),
        Uint32 => s.set(d.field_num, number_as!(d, n, u32)?),
        Uint64 => s.set(d.field_num, number_as!(d, n, u64)?),
        Float32 => s.set(d.field_num, number_to_f64(n) as f32),
        Float64 => s.set(d.field_num, number_to_f64(n)),
        _ => unreachable!("set_number on a non-numeric field"),
    }
}

fn append_number(s: &mut Struct, d: &FieldDescr, n: Number) -> Result<(), Error> {
    use FieldType::*;
    match d.field_type {
        ListInt8 => s.append_number(d.field_num, number_as!(d, n, i8)?),
        ListInt16 => s.append_number(d.field_num, number_as!(d, n, i16)?),
        ListInt32 => s.append_number(d.field_num, number_as!(d, n, i32)?),
        ListInt64 => s.append_number(d.field_num, number_as!(d, n, i64)?),
        ListUint8 => s.append_number(d.field_num, number_as!(d, n, u8)?),
        ListUint16 => s.append_number(d.field_num, number_as!(d, n, u16)?),
        ListUint32 => s.append_number(d.field_num, number_as!(d, n, u32)?),
        ListUint64 => s.append_number(d.field_num, number_as!(d, n, u64)?),
        ListFloat32 => s.append_number(d.field_num, number_to_f64(n) as f32),
        ListFloat64 => s.append_number(d.field_num, number_to_f64(n)),
        _ => unreachable!("append_number on a non-numeric list"),
    }
}

fn number_to_f64(n: Number) -> f64 {
    match n {
        Number::Unsigned(v) => v as f64,
        Number::Signed(v) => v as f64,
        Number::Float(v) => v,
    }
}

#[cfg(test)]
mod test {
    use super::{ingest, IngestOptions};
    use crate::walk::test::{car_mapping, collect, s1_car, vehicle_mapping};
    use crate::walk::{walk, Token, TokenKind, Value};
    use crate::{Error, Struct};
    use pretty_assertions::assert_eq;

    fn round_trip(s: &Struct) -> Struct {
        ingest(
            s.mapping().clone(),
            |y| walk(s, y),
            IngestOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_walk_ingest_round_trip() {
        let car = s1_car();
        let rebuilt = round_trip(&car);
        assert_eq!(rebuilt, car);
        assert_eq!(collect(&rebuilt), collect(&car));
    }

    #[test]
    fn test_nested_round_trip() {
        let mut vehicle = Struct::new(vehicle_mapping());
        vehicle.set::<u8>(0, 1).unwrap();
        vehicle.set_child(1, s1_car()).unwrap();
        vehicle.append_struct(2, s1_car()).unwrap();
        vehicle.set_numbers::<u8>(3, &[1, 2]).unwrap();
        vehicle.set_bools(4, [true, false, true]).unwrap();

        let rebuilt = round_trip(&vehicle);
        assert_eq!(rebuilt, vehicle);
        assert_eq!(collect(&rebuilt), collect(&vehicle));
    }

    #[test]
    fn test_enum_labels_resolve_by_name() {
        let got = ingest(
            car_mapping(),
            |y| {
                y(&Token::struct_start("Car"))
                    && y(&Token::field("Manufacturer", Value::Str("Toyota")))
                    && y(&Token::field("Model", Value::Str("Venza")))
                    && y(&Token::struct_end("Car"))
            },
            IngestOptions::default(),
        )
        .unwrap();

        assert_eq!(got.get::<u8>(0), 1);
        assert_eq!(got.get::<u8>(1), 2);
    }

    #[test]
    fn test_unknown_enum_label() {
        let err = ingest(
            car_mapping(),
            |y| {
                y(&Token::struct_start("Car"))
                    && y(&Token::field("Manufacturer", Value::Str("Tesla")))
                    && y(&Token::struct_end("Car"))
            },
            IngestOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownEnumName { .. }));
    }

    #[test]
    fn test_unknown_field_strict_and_ignored() {
        let stream = |y: &mut dyn FnMut(&Token<'_>) -> bool| {
            let mut nested = Token::field("Extra", Value::None);
            nested.is_nil = false;
            y(&Token::struct_start("Car"))
                && y(&nested)
                && y(&Token::struct_start("Extra"))
                && y(&Token::field("Deep", Value::Number(crate::Number::Unsigned(9))))
                && y(&Token::struct_end("Extra"))
                && y(&Token::field("Year", Value::Number(crate::Number::Unsigned(2010))))
                && y(&Token::struct_end("Car"))
        };

        let err = ingest(car_mapping(), stream, IngestOptions::default()).unwrap_err();
        assert!(matches!(err, Error::UnknownFieldName { .. }));

        // With ignore_unknown_fields on, the unknown subtree is skipped and
        // the fields after it still land.
        let got = ingest(
            car_mapping(),
            stream,
            IngestOptions {
                ignore_unknown_fields: true,
            },
        )
        .unwrap();
        assert_eq!(got.get::<u16>(2), 2010);
    }

    #[test]
    fn test_walker_cancellation() {
        let err = ingest(
            car_mapping(),
            |y| y(&Token::struct_start("Car")) && false,
            IngestOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_truncated_stream() {
        let err = ingest(
            car_mapping(),
            |y| y(&Token::struct_start("Car")),
            IngestOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::TruncatedStream));
    }

    #[test]
    fn test_map_tokens_are_rejected() {
        let err = ingest(
            car_mapping(),
            |y| y(&Token::struct_start("Car")) && y(&Token::new(TokenKind::MapStart)),
            IngestOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnexpectedToken { .. }));
    }

    #[test]
    fn test_empty_list_is_present_after_ingest() {
        let mut vehicle = Struct::new(vehicle_mapping());
        vehicle.structs_mut(2).unwrap(); // present but empty Truck list

        let rebuilt = round_trip(&vehicle);
        assert!(rebuilt.is_set(2));
        assert_eq!(rebuilt.structs(2).unwrap().len(), 0);
        assert_eq!(rebuilt, vehicle);
    }
}
