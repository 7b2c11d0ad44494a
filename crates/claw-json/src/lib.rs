//! The JSON bridge: claw Structs to and from JSON text.
//!
//! Both directions ride the walk/ingest token stream. Output streams walk
//! tokens straight into a writer; input parses with serde_json and replays
//! the parsed value as a token stream into ingest, consulting the target
//! mapping to type field values. Neither direction touches slots or wire
//! bytes directly.
//!
//! Rendering rules: field names and declaration order follow the mapping;
//! every field is emitted, with absent nested structs and lists as null;
//! enum fields render as their label strings unless configured numeric;
//! bytes render as base64 strings.

use std::io;
use std::sync::Arc;

use claw::mapping::{FieldDescr, Mapping};
use claw::walk::{Number, Token, TokenKind, Value};
use claw::{FieldType, IngestOptions, Struct};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Claw(#[from] claw::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("field {field:?}: {detail}")]
    Field { field: String, detail: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// JsonOptions tweak both directions of the bridge.
#[derive(Debug, Copy, Clone, Default)]
pub struct JsonOptions {
    /// Render enum fields as their numeric values instead of labels.
    pub enums_as_numbers: bool,
    /// Skip JSON object members which the target mapping does not define,
    /// instead of failing.
    pub ignore_unknown_fields: bool,
}

/// Serialize `s` as JSON text into `w`.
pub fn to_writer<W: io::Write>(w: &mut W, s: &Struct, options: &JsonOptions) -> Result<(), Error> {
    let mut jw = Writer {
        w,
        options: *options,
        stack: Vec::new(),
        after_key: false,
        failure: None,
    };
    claw::walk(s, &mut |tok: &Token<'_>| jw.on_token(tok));
    match jw.failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

pub fn to_vec(s: &Struct, options: &JsonOptions) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    to_writer(&mut out, s, options)?;
    Ok(out)
}

pub fn to_string(s: &Struct, options: &JsonOptions) -> Result<String, Error> {
    let out = to_vec(s, options)?;
    Ok(String::from_utf8(out).expect("emitted JSON is UTF-8"))
}

/// Build a Struct of `mapping` from JSON text.
pub fn from_str(
    mapping: Arc<Mapping>,
    text: &str,
    options: &JsonOptions,
) -> Result<Struct, Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    from_value(mapping, &value, options)
}

pub fn from_slice(
    mapping: Arc<Mapping>,
    bytes: &[u8],
    options: &JsonOptions,
) -> Result<Struct, Error> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    from_value(mapping, &value, options)
}

/// Build a Struct of `mapping` from a parsed JSON value.
pub fn from_value(
    mapping: Arc<Mapping>,
    value: &serde_json::Value,
    options: &JsonOptions,
) -> Result<Struct, Error> {
    let mut failure: Option<Error> = None;
    let result = claw::ingest(
        mapping.clone(),
        |y| emit_struct(&mapping, value, y, &mut failure),
        IngestOptions {
            ignore_unknown_fields: options.ignore_unknown_fields,
        },
    );
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(result?)
}

// ---- output ----

enum Ctx {
    Struct { first: bool },
    List { first: bool },
}

struct Writer<'w, W: io::Write> {
    w: &'w mut W,
    options: JsonOptions,
    stack: Vec<Ctx>,
    // A member key was written and its value is the bracketed construct
    // carried by the next token.
    after_key: bool,
    failure: Option<io::Error>,
}

impl<'w, W: io::Write> Writer<'w, W> {
    fn on_token(&mut self, tok: &Token<'_>) -> bool {
        match self.token(tok) {
            Ok(()) => true,
            Err(err) => {
                self.failure = Some(err);
                false
            }
        }
    }

    fn token(&mut self, tok: &Token<'_>) -> io::Result<()> {
        match tok.kind {
            TokenKind::StructStart => {
                self.element_sep()?;
                self.w.write_all(b"{")?;
                self.stack.push(Ctx::Struct { first: true });
            }
            TokenKind::StructEnd => {
                self.stack.pop();
                self.w.write_all(b"}")?;
            }
            TokenKind::ListStart => {
                self.element_sep()?;
                self.w.write_all(b"[")?;
                self.stack.push(Ctx::List { first: true });
            }
            TokenKind::ListEnd => {
                self.stack.pop();
                self.w.write_all(b"]")?;
            }
            TokenKind::Field => match tok.name {
                Some(name) => {
                    self.member_sep()?;
                    serde_json::to_writer(&mut *self.w, name)?;
                    self.w.write_all(b":")?;
                    if tok.is_nil {
                        self.w.write_all(b"null")?;
                    } else if bracketed(tok) {
                        self.after_key = true;
                    } else {
                        self.value(tok)?;
                    }
                }
                None => {
                    self.element_sep()?;
                    self.value(tok)?;
                }
            },
            TokenKind::MapStart | TokenKind::MapEnd | TokenKind::MapEntry => {
                unreachable!("walk never emits map tokens")
            }
        }
        Ok(())
    }

    fn member_sep(&mut self) -> io::Result<()> {
        if let Some(Ctx::Struct { first }) = self.stack.last_mut() {
            if *first {
                *first = false;
            } else {
                self.w.write_all(b",")?;
            }
        }
        Ok(())
    }

    fn element_sep(&mut self) -> io::Result<()> {
        if self.after_key {
            self.after_key = false;
            return Ok(());
        }
        if let Some(Ctx::List { first }) = self.stack.last_mut() {
            if *first {
                *first = false;
            } else {
                self.w.write_all(b",")?;
            }
        }
        Ok(())
    }

    fn value(&mut self, tok: &Token<'_>) -> io::Result<()> {
        if !self.options.enums_as_numbers {
            if let Some(label) = tok.enum_name {
                return Ok(serde_json::to_writer(&mut *self.w, label)?);
            }
        }
        match tok.value {
            Value::None => self.w.write_all(b"null")?,
            Value::Bool(v) => write!(self.w, "{v}")?,
            Value::Number(Number::Unsigned(v)) => write!(self.w, "{v}")?,
            Value::Number(Number::Signed(v)) => write!(self.w, "{v}")?,
            Value::Number(Number::Float(v)) => serde_json::to_writer(&mut *self.w, &v)?,
            Value::Str(v) => serde_json::to_writer(&mut *self.w, v)?,
            Value::Bytes(v) => serde_json::to_writer(&mut *self.w, &base64::encode(v))?,
        }
        Ok(())
    }
}

// A non-nil Field whose value arrives as a bracketed construct.
fn bracketed(tok: &Token<'_>) -> bool {
    match tok.field_type {
        Some(FieldType::Struct) => true,
        Some(ft) => ft.is_list(),
        None => false,
    }
}

// ---- input ----

type Yield<'y> = dyn FnMut(&Token<'_>) -> bool + 'y;

fn fail(slot: &mut Option<Error>, field: &str, detail: &str) -> bool {
    *slot = Some(Error::Field {
        field: field.to_string(),
        detail: detail.to_string(),
    });
    false
}

fn emit_struct(
    m: &Mapping,
    v: &serde_json::Value,
    y: &mut Yield<'_>,
    failure: &mut Option<Error>,
) -> bool {
    let serde_json::Value::Object(obj) = v else {
        return fail(failure, m.name(), "expected a JSON object");
    };
    if !y(&Token::struct_start(m.name())) {
        return false;
    }
    for (key, val) in obj {
        let done = match m.by_name(key) {
            Some(d) => emit_field(d, val, y, failure),
            None => emit_unknown(Some(key), val, y),
        };
        if !done {
            return false;
        }
    }
    y(&Token::struct_end(m.name()))
}

fn emit_field(
    d: &FieldDescr,
    v: &serde_json::Value,
    y: &mut Yield<'_>,
    failure: &mut Option<Error>,
) -> bool {
    use serde_json::Value as J;

    if v.is_null() {
        let mut tok = Token::field(&d.name, Value::None);
        tok.is_nil = true;
        return y(&tok);
    }

    match d.field_type {
        FieldType::Bool => match v {
            J::Bool(b) => y(&Token::field(&d.name, Value::Bool(*b))),
            _ => fail(failure, &d.name, "expected a bool"),
        },
        FieldType::String => match v {
            J::String(s) => y(&Token::field(&d.name, Value::Str(s))),
            _ => fail(failure, &d.name, "expected a string"),
        },
        FieldType::Bytes => match v {
            J::String(s) => match base64::decode(s) {
                Ok(buf) => y(&Token::field(&d.name, Value::Bytes(&buf))),
                Err(_) => fail(failure, &d.name, "invalid base64"),
            },
            _ => fail(failure, &d.name, "expected a base64 string"),
        },
        FieldType::Struct => {
            let nested = d.nested().expect("struct fields carry a nested mapping");
            y(&Token::field(&d.name, Value::None)) && emit_struct(&nested, v, y, failure)
        }
        ft if ft.is_list() => {
            let J::Array(items) = v else {
                return fail(failure, &d.name, "expected an array");
            };
            if !y(&Token::field(&d.name, Value::None)) {
                return false;
            }
            if !y(&Token::list_start(items.len() as u64)) {
                return false;
            }
            for item in items {
                if !emit_element(d, item, y, failure) {
                    return false;
                }
            }
            y(&Token::list_end())
        }
        _ => match scalar_value(v) {
            Some(value) => y(&Token::field(&d.name, value)),
            None => fail(failure, &d.name, "expected a number or enum label"),
        },
    }
}

fn emit_element(
    d: &FieldDescr,
    v: &serde_json::Value,
    y: &mut Yield<'_>,
    failure: &mut Option<Error>,
) -> bool {
    use serde_json::Value as J;

    match d.field_type {
        FieldType::ListBools => match v {
            J::Bool(b) => y(&Token {
                value: Value::Bool(*b),
                ..Token::new(TokenKind::Field)
            }),
            _ => fail(failure, &d.name, "expected bool elements"),
        },
        FieldType::ListStrings => match v {
            J::String(s) => y(&Token {
                value: Value::Str(s),
                ..Token::new(TokenKind::Field)
            }),
            _ => fail(failure, &d.name, "expected string elements"),
        },
        FieldType::ListBytes => match v {
            J::String(s) => match base64::decode(s) {
                Ok(buf) => y(&Token {
                    value: Value::Bytes(&buf),
                    ..Token::new(TokenKind::Field)
                }),
                Err(_) => fail(failure, &d.name, "invalid base64"),
            },
            _ => fail(failure, &d.name, "expected base64 string elements"),
        },
        FieldType::ListStructs => {
            let nested = d.nested().expect("struct list fields carry a nested mapping");
            emit_struct(&nested, v, y, failure)
        }
        _ => match scalar_value(v) {
            Some(value) => y(&Token {
                value,
                ..Token::new(TokenKind::Field)
            }),
            None => fail(failure, &d.name, "expected numeric or enum label elements"),
        },
    }
}

// Map a JSON scalar onto a token value: numbers directly, strings as enum
// labels for ingest to resolve.
fn scalar_value(v: &serde_json::Value) -> Option<Value<'_>> {
    use serde_json::Value as J;
    match v {
        J::Number(n) => {
            let number = if let Some(v) = n.as_u64() {
                Number::Unsigned(v)
            } else if let Some(v) = n.as_i64() {
                Number::Signed(v)
            } else {
                Number::Float(n.as_f64()?)
            };
            Some(Value::Number(number))
        }
        J::String(s) => Some(Value::Str(s)),
        _ => None,
    }
}

// Emit shape-based tokens for a member the mapping does not define, so the
// ingester can skip it (or reject it) uniformly.
fn emit_unknown(name: Option<&str>, v: &serde_json::Value, y: &mut Yield<'_>) -> bool {
    use serde_json::Value as J;

    fn leaf<'a>(name: Option<&'a str>, value: Value<'a>) -> Token<'a> {
        let mut tok = Token::new(TokenKind::Field);
        tok.name = name;
        tok.value = value;
        tok
    }

    match v {
        J::Null => {
            let mut tok = leaf(name, Value::None);
            tok.is_nil = true;
            y(&tok)
        }
        J::Bool(b) => y(&leaf(name, Value::Bool(*b))),
        J::Number(n) => {
            let number = if let Some(v) = n.as_u64() {
                Number::Unsigned(v)
            } else if let Some(v) = n.as_i64() {
                Number::Signed(v)
            } else {
                Number::Float(n.as_f64().unwrap_or(0.0))
            };
            y(&leaf(name, Value::Number(number)))
        }
        J::String(s) => y(&leaf(name, Value::Str(s))),
        J::Array(items) => {
            if let Some(name) = name {
                if !y(&Token::field(name, Value::None)) {
                    return false;
                }
            }
            if !y(&Token::list_start(items.len() as u64)) {
                return false;
            }
            for item in items {
                if !emit_unknown(None, item, y) {
                    return false;
                }
            }
            y(&Token::list_end())
        }
        J::Object(obj) => {
            if let Some(name) = name {
                if !y(&Token::field(name, Value::None)) {
                    return false;
                }
            }
            if !y(&Token::struct_start("")) {
                return false;
            }
            for (key, val) in obj {
                if !emit_unknown(Some(key), val, y) {
                    return false;
                }
            }
            y(&Token::struct_end(""))
        }
    }
}
