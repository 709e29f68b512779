//! Text form of programs, one call per line:
//!
//! ```text
//! mmap(0x20000000, 0x1000, 0x3, 0x32, 0xffffffffffffffff, 0x0)
//! r0 = openat(0xffffffffffffff9c, &(0x20000000)="2e2f663000", 0x42, 0x1a4)
//! pipe(&(0x20000008)=[<r1=>0x3, <r2=>0x4])
//! write(r2, &(0x20000010)="61", 0x1)
//! ```
//!
//! Only results something refers to get a label. Parsing is driven by the
//! call's schema, so the text carries no type information.

use super::{Arg, Call, DataArg, Program, ResultArg, ResultSrc};
use crate::{
    target::{Target, Type},
    util::{from_hex, to_hex},
};
use std::{
    collections::HashMap,
    error::Error,
    fmt::{self, Display, Formatter, Write},
};

#[derive(Debug, Eq, PartialEq)]
pub enum DeserializeError {
    UnknownCall { line: usize, name: String },
    UnknownResult { line: usize, name: String },
    Syntax {
        line: usize,
        col: usize,
        expected: &'static str,
    },
}

impl Display for DeserializeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DeserializeError::UnknownCall { line, name } => {
                write!(f, "line {}: unknown call `{}`", line, name)
            }
            DeserializeError::UnknownResult { line, name } => {
                write!(f, "line {}: result `{}` used before it is defined", line, name)
            }
            DeserializeError::Syntax {
                line,
                col,
                expected,
            } => write!(f, "line {} col {}: expected {}", line, col, expected),
        }
    }
}

impl Error for DeserializeError {}

impl<'t> Program<'t> {
    pub fn serialize(&self) -> Vec<u8> {
        let labels: HashMap<ResultSrc, usize> = self
            .referenced_results()
            .into_iter()
            .enumerate()
            .map(|(i, src)| (src, i))
            .collect();
        let mut out = String::new();
        for (i, call) in self.calls.iter().enumerate() {
            if let Some(label) = labels.get(&ResultSrc::ret(i)) {
                let _ = write!(out, "r{} = ", label);
            }
            out.push_str(&call.meta.name);
            out.push('(');
            for (j, (field, arg)) in call.meta.args.iter().zip(&call.args).enumerate() {
                if j > 0 {
                    out.push_str(", ");
                }
                let mut path = vec![j];
                serialize_arg(&mut out, &labels, i, &field.typ, arg, &mut path);
            }
            out.push_str(")\n");
        }
        out.into_bytes()
    }

    pub fn deserialize(target: &'t Target, data: &[u8]) -> Result<Program<'t>, DeserializeError> {
        let text = String::from_utf8_lossy(data);
        let mut labels: HashMap<String, ResultSrc> = HashMap::new();
        let mut program = Program::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut p = Parser {
                data: line.as_bytes(),
                pos: 0,
                line: lineno + 1,
                call: program.calls.len(),
                labels: &mut labels,
            };
            let call = p.parse_call(target)?;
            program.calls.push(call);
        }
        Ok(program)
    }
}

fn serialize_arg(
    out: &mut String,
    labels: &HashMap<ResultSrc, usize>,
    call: usize,
    typ: &Type,
    arg: &Arg,
    path: &mut Vec<usize>,
) {
    match arg {
        Arg::Const(v) => {
            let _ = write!(out, "{:#x}", v);
        }
        Arg::Result(ResultArg { val, src }) => {
            if let Some(label) = src.as_ref().and_then(|s| labels.get(s)) {
                let _ = write!(out, "r{}", label);
                return;
            }
            let here = ResultSrc {
                call,
                path: path.clone(),
            };
            match labels.get(&here) {
                Some(label) => {
                    let _ = write!(out, "<r{}=>{:#x}", label, val);
                }
                None => {
                    let _ = write!(out, "{:#x}", val);
                }
            }
        }
        Arg::Pointer { addr, pointee } => match pointee {
            None => {
                let _ = write!(out, "{:#x}", addr.unwrap_or(0));
            }
            Some(p) => {
                match addr {
                    Some(addr) => {
                        let _ = write!(out, "&({:#x})=", addr);
                    }
                    None => out.push_str("&AUTO="),
                }
                let elem = match typ {
                    Type::Ptr { elem, .. } => &**elem,
                    _ => typ,
                };
                serialize_arg(out, labels, call, elem, p, path);
            }
        },
        Arg::Data(DataArg::In(bytes)) => {
            out.push('"');
            out.push_str(&to_hex(bytes));
            out.push('"');
        }
        Arg::Data(DataArg::Out(len)) => {
            let _ = write!(out, "\"\"/{}", len);
        }
        Arg::Group(items) => {
            let (open, close, fields) = match typ {
                Type::Array { .. } => ('[', ']', None),
                Type::Struct { fields, .. } => ('{', '}', Some(fields)),
                _ => ('{', '}', None),
            };
            out.push(open);
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let item_typ = match (typ, fields) {
                    (Type::Array { elem }, _) => &**elem,
                    (_, Some(fields)) => fields.get(i).map_or(typ, |f| &f.typ),
                    _ => typ,
                };
                path.push(i);
                serialize_arg(out, labels, call, item_typ, item, path);
                path.pop();
            }
            out.push(close);
        }
    }
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
    line: usize,
    call: usize,
    labels: &'a mut HashMap<String, ResultSrc>,
}

impl<'a> Parser<'a> {
    fn syntax<T>(&self, expected: &'static str) -> Result<T, DeserializeError> {
        Err(DeserializeError::Syntax {
            line: self.line,
            col: self.pos + 1,
            expected,
        })
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.data[self.pos..].starts_with(s.as_bytes()) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, s: &'static str) -> Result<(), DeserializeError> {
        if self.eat(s) {
            Ok(())
        } else {
            self.syntax(s)
        }
    }

    fn take_while<F: Fn(u8) -> bool>(&mut self, f: F) -> &'a str {
        let start = self.pos;
        while self.peek().map_or(false, &f) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.data[start..self.pos]).unwrap_or("")
    }

    fn ident(&mut self) -> &'a str {
        self.take_while(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'$')
    }

    fn number(&mut self) -> Result<u64, DeserializeError> {
        if !self.eat("0x") {
            let digits = self.take_while(|b| b.is_ascii_digit());
            return match digits.parse() {
                Ok(v) => Ok(v),
                Err(_) => self.syntax("number"),
            };
        }
        let digits = self.take_while(|b| b.is_ascii_hexdigit());
        match u64::from_str_radix(digits, 16) {
            Ok(v) => Ok(v),
            Err(_) => self.syntax("hex number"),
        }
    }

    fn label(&mut self) -> Result<String, DeserializeError> {
        let start = self.pos;
        self.expect("r")?;
        let digits = self.take_while(|b| b.is_ascii_digit());
        if digits.is_empty() {
            self.pos = start;
            return self.syntax("result label");
        }
        Ok(format!("r{}", digits))
    }

    fn parse_call<'t>(&mut self, target: &'t Target) -> Result<Call<'t>, DeserializeError> {
        if self.peek() == Some(b'r') && self.data[self.pos..].contains(&b'=') {
            let save = self.pos;
            if let Ok(label) = self.label() {
                if self.eat(" = ") {
                    self.labels.insert(label, ResultSrc::ret(self.call));
                } else {
                    self.pos = save;
                }
            } else {
                self.pos = save;
            }
        }
        let name = self.ident();
        let meta = target
            .syscall(name)
            .ok_or_else(|| DeserializeError::UnknownCall {
                line: self.line,
                name: name.to_owned(),
            })?;
        self.expect("(")?;
        let mut args = Vec::with_capacity(meta.args.len());
        for (i, field) in meta.args.iter().enumerate() {
            if i > 0 {
                self.expect(", ")?;
            }
            let mut path = vec![i];
            args.push(self.parse_arg(&field.typ, &mut path)?);
        }
        self.expect(")")?;
        if self.pos != self.data.len() {
            return self.syntax("end of line");
        }
        Ok(Call { meta, args })
    }

    fn parse_arg(&mut self, typ: &Type, path: &mut Vec<usize>) -> Result<Arg, DeserializeError> {
        match typ {
            Type::Int { .. } | Type::Flags { .. } | Type::Const { .. } | Type::Len { .. } => {
                Ok(Arg::Const(self.number()?))
            }
            Type::Resource { kind } => {
                if self.eat("<") {
                    let label = self.label()?;
                    self.expect("=>")?;
                    let val = self.number()?;
                    let src = ResultSrc {
                        call: self.call,
                        path: path.clone(),
                    };
                    self.labels.insert(label, src);
                    return Ok(Arg::literal(val));
                }
                if self.peek() == Some(b'r') {
                    let label = self.label()?;
                    let src = match self.labels.get(&label) {
                        Some(src) => src.clone(),
                        None => {
                            return Err(DeserializeError::UnknownResult {
                                line: self.line,
                                name: label,
                            })
                        }
                    };
                    return Ok(Arg::Result(ResultArg {
                        val: kind.default_value(),
                        src: Some(src),
                    }));
                }
                Ok(Arg::literal(self.number()?))
            }
            Type::Ptr { elem, .. } => {
                if !self.eat("&") {
                    return Ok(Arg::Pointer {
                        addr: Some(self.number()?),
                        pointee: None,
                    });
                }
                let addr = if self.eat("AUTO") {
                    None
                } else {
                    self.expect("(")?;
                    let addr = self.number()?;
                    self.expect(")")?;
                    Some(addr)
                };
                self.expect("=")?;
                let pointee = self.parse_arg(elem, path)?;
                Ok(Arg::Pointer {
                    addr,
                    pointee: Some(Box::new(pointee)),
                })
            }
            Type::Buffer { .. } => {
                self.expect("\"")?;
                let hex = self.take_while(|b| b != b'"');
                self.expect("\"")?;
                if hex.is_empty() && self.eat("/") {
                    return Ok(Arg::Data(DataArg::Out(self.number()?)));
                }
                match from_hex(hex) {
                    Some(bytes) => Ok(Arg::Data(DataArg::In(bytes))),
                    None => self.syntax("hex data"),
                }
            }
            Type::Struct { fields, .. } => {
                self.expect("{")?;
                let mut items = Vec::with_capacity(fields.len());
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        self.expect(", ")?;
                    }
                    path.push(i);
                    items.push(self.parse_arg(&field.typ, path)?);
                    path.pop();
                }
                self.expect("}")?;
                Ok(Arg::Group(items))
            }
            Type::Array { elem } => {
                self.expect("[")?;
                let mut items = Vec::new();
                while !self.eat("]") {
                    if !items.is_empty() {
                        self.expect(", ")?;
                    }
                    path.push(items.len());
                    let item = self.parse_arg(elem, path)?;
                    path.pop();
                    items.push(item);
                }
                Ok(Arg::Group(items))
            }
        }
    }
}
