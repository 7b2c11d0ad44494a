//! The clawtext bridge: a deterministic, human-readable rendering of claw
//! Structs, with a reader accepting the same grammar.
//!
//! Both directions ride the walk/ingest token stream. The writer emits
//! every field in mapping order:
//!
//! ```text
//! Vehicle{Type: Car, Car: Car{Year: 2010}, Truck: nil, Bools: [true, false]}
//! ```
//!
//! Enum labels print bare; strings are double-quoted with JSON escapes;
//! bytes print as x"hex"; absent nested structs and lists print as nil.
//! The reader accepts fields in any order and permits omitted fields and
//! trailing commas.

use std::sync::Arc;

use itertools::Itertools;

use claw::mapping::Mapping;
use claw::walk::{Number, Token, TokenKind, Value};
use claw::{IngestOptions, Struct};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("parse error at offset {offset}: {detail}")]
    Parse { offset: usize, detail: String },

    #[error(transparent)]
    Claw(#[from] claw::Error),
}

/// Render `s` as clawtext.
pub fn to_string(s: &Struct) -> String {
    let mut w = Writer {
        out: String::new(),
        stack: Vec::new(),
        after_key: false,
    };
    claw::walk(s, &mut |tok: &Token<'_>| {
        w.token(tok);
        true
    });
    w.out
}

/// Build a Struct of `mapping` from clawtext.
pub fn from_str(
    mapping: Arc<Mapping>,
    text: &str,
    options: IngestOptions,
) -> Result<Struct, Error> {
    let mut failure: Option<Error> = None;
    let result = claw::ingest(
        mapping,
        |y| {
            let mut parser = Parser {
                input: text.as_bytes(),
                pos: 0,
            };
            match parser.parse_document(y) {
                Ok(keep_going) => keep_going,
                Err(err) => {
                    failure = Some(err);
                    false
                }
            }
        },
        options,
    );
    if let Some(err) = failure {
        return Err(err);
    }
    Ok(result?)
}

// ---- writer ----

enum Ctx {
    Struct { first: bool },
    List { first: bool },
}

struct Writer {
    out: String,
    stack: Vec<Ctx>,
    after_key: bool,
}

impl Writer {
    fn token(&mut self, tok: &Token<'_>) {
        match tok.kind {
            TokenKind::StructStart => {
                self.element_sep();
                self.out.push_str(tok.name.unwrap_or(""));
                self.out.push('{');
                self.stack.push(Ctx::Struct { first: true });
            }
            TokenKind::StructEnd => {
                self.stack.pop();
                self.out.push('}');
            }
            TokenKind::ListStart => {
                self.element_sep();
                self.out.push('[');
                self.stack.push(Ctx::List { first: true });
            }
            TokenKind::ListEnd => {
                self.stack.pop();
                self.out.push(']');
            }
            TokenKind::Field => match tok.name {
                Some(name) => {
                    self.member_sep();
                    self.out.push_str(name);
                    self.out.push_str(": ");
                    if tok.is_nil {
                        self.out.push_str("nil");
                    } else if matches!(tok.value, Value::None) {
                        self.after_key = true;
                    } else {
                        self.value(tok);
                    }
                }
                None => {
                    self.element_sep();
                    self.value(tok);
                }
            },
            TokenKind::MapStart | TokenKind::MapEnd | TokenKind::MapEntry => {
                unreachable!("walk never emits map tokens")
            }
        }
    }

    fn member_sep(&mut self) {
        if let Some(Ctx::Struct { first }) = self.stack.last_mut() {
            if *first {
                *first = false;
            } else {
                self.out.push_str(", ");
            }
        }
    }

    fn element_sep(&mut self) {
        if self.after_key {
            self.after_key = false;
            return;
        }
        if let Some(Ctx::List { first }) = self.stack.last_mut() {
            if *first {
                *first = false;
            } else {
                self.out.push_str(", ");
            }
        }
    }

    fn value(&mut self, tok: &Token<'_>) {
        if let Some(label) = tok.enum_name {
            self.out.push_str(label);
            return;
        }
        match tok.value {
            Value::None => self.out.push_str("nil"),
            Value::Bool(v) => self.out.push_str(if v { "true" } else { "false" }),
            Value::Number(Number::Unsigned(v)) => self.out.push_str(&v.to_string()),
            Value::Number(Number::Signed(v)) => self.out.push_str(&v.to_string()),
            Value::Number(Number::Float(v)) => self.out.push_str(&v.to_string()),
            Value::Str(v) => {
                self.out.push('"');
                for c in v.chars() {
                    match c {
                        '"' => self.out.push_str("\\\""),
                        '\\' => self.out.push_str("\\\\"),
                        '\n' => self.out.push_str("\\n"),
                        '\r' => self.out.push_str("\\r"),
                        '\t' => self.out.push_str("\\t"),
                        c if (c as u32) < 0x20 => {
                            self.out.push_str(&format!("\\u{:04x}", c as u32));
                        }
                        c => self.out.push(c),
                    }
                }
                self.out.push('"');
            }
            Value::Bytes(v) => {
                self.out.push_str("x\"");
                self.out
                    .push_str(&v.iter().map(|b| format!("{b:02x}")).join(""));
                self.out.push('"');
            }
        }
    }
}

// ---- reader ----

type Yield<'y> = dyn FnMut(&Token<'_>) -> bool + 'y;

struct Parser<'t> {
    input: &'t [u8],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn err<T>(&self, detail: impl Into<String>) -> Result<T, Error> {
        Err(Error::Parse {
            offset: self.pos,
            detail: detail.into(),
        })
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.input.get(self.pos) {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, want: u8) -> Result<(), Error> {
        match self.peek() {
            Some(b) if b == want => {
                self.pos += 1;
                Ok(())
            }
            Some(b) => self.err(format!("expected {:?}, found {:?}", want as char, b as char)),
            None => self.err(format!("expected {:?}, found end of input", want as char)),
        }
    }

    fn ident(&mut self) -> Result<&'t str, Error> {
        self.skip_ws();
        let start = self.pos;
        while let Some(b) = self.input.get(self.pos) {
            if b.is_ascii_alphanumeric() || *b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return self.err("expected an identifier");
        }
        Ok(std::str::from_utf8(&self.input[start..self.pos]).expect("input text is UTF-8"))
    }

    // document := struct EOF
    fn parse_document(&mut self, y: &mut Yield<'_>) -> Result<bool, Error> {
        let keep_going = self.parse_struct(y)?;
        if !keep_going {
            return Ok(false);
        }
        self.skip_ws();
        if self.pos != self.input.len() {
            return self.err("trailing input after the closing brace");
        }
        Ok(true)
    }

    // struct := ident '{' [field (',' field)* [',']] '}'
    fn parse_struct(&mut self, y: &mut Yield<'_>) -> Result<bool, Error> {
        let name = self.ident()?;
        self.expect(b'{')?;
        if !y(&Token::struct_start(name)) {
            return Ok(false);
        }
        loop {
            match self.peek() {
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(y(&Token::struct_end(name)));
                }
                Some(_) => {
                    let field = self.ident()?;
                    self.expect(b':')?;
                    if !self.parse_value(Some(field), y)? {
                        return Ok(false);
                    }
                    if self.peek() == Some(b',') {
                        self.pos += 1;
                    }
                }
                None => return self.err("unterminated struct"),
            }
        }
    }

    // value := struct | list | string | bytes | number | nil | bool | label
    fn parse_value(&mut self, name: Option<&str>, y: &mut Yield<'_>) -> Result<bool, Error> {
        match self.peek() {
            Some(b'"') => {
                let text = self.string()?;
                Ok(y(&leaf(name, Value::Str(&text))))
            }
            Some(b'x') if self.input.get(self.pos + 1) == Some(&b'"') => {
                self.pos += 1;
                let bytes = self.hex_string()?;
                Ok(y(&leaf(name, Value::Bytes(&bytes))))
            }
            Some(b'[') => {
                self.pos += 1;
                if let Some(name) = name {
                    if !y(&Token::field(name, Value::None)) {
                        return Ok(false);
                    }
                }
                if !y(&Token::new(TokenKind::ListStart)) {
                    return Ok(false);
                }
                loop {
                    match self.peek() {
                        Some(b']') => {
                            self.pos += 1;
                            return Ok(y(&Token::list_end()));
                        }
                        Some(_) => {
                            if !self.parse_value(None, y)? {
                                return Ok(false);
                            }
                            if self.peek() == Some(b',') {
                                self.pos += 1;
                            }
                        }
                        None => return self.err("unterminated list"),
                    }
                }
            }
            Some(b) if b == b'-' || b.is_ascii_digit() => {
                let number = self.number()?;
                Ok(y(&leaf(name, Value::Number(number))))
            }
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => {
                // A bare identifier: a struct opener, a keyword, or an
                // enum label.
                let at = self.pos;
                let ident = self.ident()?;
                if self.peek() == Some(b'{') {
                    self.pos = at;
                    if let Some(name) = name {
                        if !y(&Token::field(name, Value::None)) {
                            return Ok(false);
                        }
                    }
                    return self.parse_struct(y);
                }
                match ident {
                    "nil" => {
                        let mut tok = leaf(name, Value::None);
                        tok.is_nil = true;
                        Ok(y(&tok))
                    }
                    "true" => Ok(y(&leaf(name, Value::Bool(true)))),
                    "false" => Ok(y(&leaf(name, Value::Bool(false)))),
                    "NaN" => Ok(y(&leaf(name, Value::Number(Number::Float(f64::NAN))))),
                    "inf" => Ok(y(&leaf(name, Value::Number(Number::Float(f64::INFINITY))))),
                    label => Ok(y(&leaf(name, Value::Str(label)))),
                }
            }
            Some(b) => self.err(format!("unexpected character {:?}", b as char)),
            None => self.err("expected a value, found end of input"),
        }
    }

    fn string(&mut self) -> Result<String, Error> {
        self.expect(b'"')?;
        let mut out = String::new();
        loop {
            match self.input.get(self.pos).copied() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.input.get(self.pos).copied() {
                        Some(b'"') => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(b'n') => out.push('\n'),
                        Some(b'r') => out.push('\r'),
                        Some(b't') => out.push('\t'),
                        Some(b'u') => {
                            let hex = self
                                .input
                                .get(self.pos + 1..self.pos + 5)
                                .and_then(|h| std::str::from_utf8(h).ok())
                                .and_then(|h| u32::from_str_radix(h, 16).ok())
                                .and_then(char::from_u32);
                            match hex {
                                Some(c) => {
                                    out.push(c);
                                    self.pos += 4;
                                }
                                None => return self.err("invalid \\u escape"),
                            }
                        }
                        _ => return self.err("invalid escape"),
                    }
                    self.pos += 1;
                }
                Some(_) => {
                    // Consume one UTF-8 scalar, which may span bytes.
                    let rest = std::str::from_utf8(&self.input[self.pos..])
                        .expect("input text is UTF-8");
                    let c = rest.chars().next().unwrap();
                    out.push(c);
                    self.pos += c.len_utf8();
                }
                None => return self.err("unterminated string"),
            }
        }
    }

    fn hex_string(&mut self) -> Result<Vec<u8>, Error> {
        self.expect(b'"')?;
        let start = self.pos;
        while let Some(b) = self.input.get(self.pos) {
            if b.is_ascii_hexdigit() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let digits = &self.input[start..self.pos];
        self.expect(b'"')?;
        if digits.len() % 2 != 0 {
            return self.err("odd number of hex digits");
        }
        Ok(digits
            .chunks_exact(2)
            .map(|pair| {
                let hi = (pair[0] as char).to_digit(16).unwrap() as u8;
                let lo = (pair[1] as char).to_digit(16).unwrap() as u8;
                (hi << 4) | lo
            })
            .collect())
    }

    fn number(&mut self) -> Result<Number, Error> {
        self.skip_ws();
        let start = self.pos;
        if self.input.get(self.pos) == Some(&b'-') {
            self.pos += 1;
        }
        while let Some(b) = self.input.get(self.pos) {
            if b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-') {
                self.pos += 1;
            } else {
                break;
            }
        }
        let raw = std::str::from_utf8(&self.input[start..self.pos]).expect("input text is UTF-8");
        if raw.contains(['.', 'e', 'E']) {
            return match raw.parse::<f64>() {
                Ok(v) => Ok(Number::Float(v)),
                Err(_) => self.err(format!("invalid number {raw:?}")),
            };
        }
        if let Ok(v) = raw.parse::<u64>() {
            return Ok(Number::Unsigned(v));
        }
        if let Ok(v) = raw.parse::<i64>() {
            return Ok(Number::Signed(v));
        }
        match raw.parse::<f64>() {
            Ok(v) => Ok(Number::Float(v)),
            Err(_) => self.err(format!("invalid number {raw:?}")),
        }
    }
}

fn leaf<'a>(name: Option<&'a str>, value: Value<'a>) -> Token<'a> {
    let mut tok = Token::new(TokenKind::Field);
    tok.name = name;
    tok.value = value;
    tok
}
