//! Binary form consumed by the executor. Everything is a little-endian u64 word:
//!
//! ```text
//! COPYIN addr arg           write arg to memory before the next call
//! call_id copyout nargs arg*
//! COPYOUT index addr size   read a resource back from memory after the call
//! EOF
//! ```
//!
//! An arg is `CONST size value`, `RESULT size index default` or
//! `DATA len bytes...` (bytes padded to a whole word).

use super::{visit_layout, Arg, DataArg, Program, ResultArg, ResultSrc};
use crate::target::{align_up, Type};
use std::{
    collections::BTreeMap,
    error::Error,
    fmt::{self, Display, Formatter},
};

pub const EXEC_BUFFER_SIZE: usize = 2 << 20;

pub const EXEC_INSTR_EOF: u64 = u64::MAX;
pub const EXEC_INSTR_COPYIN: u64 = u64::MAX - 1;
pub const EXEC_INSTR_COPYOUT: u64 = u64::MAX - 2;

pub const EXEC_ARG_CONST: u64 = 0;
pub const EXEC_ARG_RESULT: u64 = 1;
pub const EXEC_ARG_DATA: u64 = 2;

pub const EXEC_NO_COPYOUT: u64 = u64::MAX;

#[derive(Debug, Eq, PartialEq)]
pub enum ExecError {
    /// The program needs more than the buffer holds.
    BufferOverflow { size: usize },
    UnresolvedPointer { call: usize },
}

impl Display for ExecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::BufferOverflow { size } => {
                write!(f, "exec encoding doesn't fit in {} bytes", size)
            }
            ExecError::UnresolvedPointer { call } => {
                write!(f, "call {} has a pointer without an address", call)
            }
        }
    }
}

impl Error for ExecError {}

struct ExecWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    overflow: bool,
}

impl<'a> ExecWriter<'a> {
    fn write(&mut self, v: u64) {
        if self.overflow || self.pos + 8 > self.buf.len() {
            self.overflow = true;
            return;
        }
        self.buf[self.pos..self.pos + 8].copy_from_slice(&v.to_le_bytes());
        self.pos += 8;
    }

    fn write_data(&mut self, data: &[u8]) {
        let padded = align_up(data.len() as u64, 8) as usize;
        if self.overflow || self.pos + padded > self.buf.len() {
            self.overflow = true;
            return;
        }
        self.buf[self.pos..self.pos + data.len()].copy_from_slice(data);
        for b in &mut self.buf[self.pos + data.len()..self.pos + padded] {
            *b = 0;
        }
        self.pos += padded;
    }
}

struct Encoder<'a, 'b> {
    w: ExecWriter<'b>,
    /// Ordered by `(call, path)` so copy-outs come out in a fixed order.
    copyouts: &'a BTreeMap<ResultSrc, u64>,
}

impl<'a, 'b> Encoder<'a, 'b> {
    fn write_result(&mut self, size: u64, r: &ResultArg) {
        match r.src.as_ref().and_then(|s| self.copyouts.get(s)) {
            Some(&index) => {
                self.w.write(EXEC_ARG_RESULT);
                self.w.write(size);
                self.w.write(index);
                self.w.write(r.val);
            }
            None => self.write_const(size, r.val),
        }
    }

    fn write_const(&mut self, size: u64, val: u64) {
        self.w.write(EXEC_ARG_CONST);
        self.w.write(size);
        self.w.write(val);
    }

    /// Emits copy-ins for the pointee of every readable pointer below `arg`.
    fn copyin(&mut self, call: usize, typ: &Type, arg: &Arg) -> Result<(), ExecError> {
        let (dir, elem, addr, pointee) = match (typ, arg) {
            (Type::Ptr { dir, elem }, Arg::Pointer { addr, pointee: Some(p) }) => {
                (*dir, &**elem, *addr, &**p)
            }
            (Type::Struct { fields, .. }, Arg::Group(items)) => {
                for (f, a) in fields.iter().zip(items) {
                    self.copyin(call, &f.typ, a)?;
                }
                return Ok(());
            }
            (Type::Array { elem }, Arg::Group(items)) => {
                for a in items {
                    self.copyin(call, elem, a)?;
                }
                return Ok(());
            }
            _ => return Ok(()),
        };
        let addr = addr.ok_or(ExecError::UnresolvedPointer { call })?;

        let mut leaves = Vec::new();
        visit_layout(elem, pointee, addr, &mut |a, t, l| leaves.push((a, t, l)));
        for (leaf_addr, leaf_typ, leaf) in leaves {
            if let Arg::Pointer { .. } = leaf {
                self.copyin(call, leaf_typ, leaf)?;
            }
            if !dir.reads() {
                continue;
            }
            let size = leaf_typ.static_size().unwrap_or(8);
            match leaf {
                Arg::Const(v) => {
                    self.w.write(EXEC_INSTR_COPYIN);
                    self.w.write(leaf_addr);
                    self.write_const(size, *v);
                }
                Arg::Result(r) => {
                    self.w.write(EXEC_INSTR_COPYIN);
                    self.w.write(leaf_addr);
                    self.write_result(size, r);
                }
                Arg::Pointer { addr, .. } => {
                    let target = addr.ok_or(ExecError::UnresolvedPointer { call })?;
                    self.w.write(EXEC_INSTR_COPYIN);
                    self.w.write(leaf_addr);
                    self.write_const(8, target);
                }
                Arg::Data(DataArg::In(bytes)) => {
                    self.w.write(EXEC_INSTR_COPYIN);
                    self.w.write(leaf_addr);
                    self.w.write(EXEC_ARG_DATA);
                    self.w.write(bytes.len() as u64);
                    self.w.write_data(bytes);
                }
                Arg::Data(DataArg::Out(_)) | Arg::Group(_) => (),
            }
        }
        Ok(())
    }
}

/// Address and size of the resource `path` names inside `arg`.
fn locate(typ: &Type, arg: &Arg, addr: Option<u64>, rest: &[usize]) -> Option<(u64, u64)> {
    match (typ, arg) {
        (
            Type::Ptr { elem, .. },
            Arg::Pointer {
                addr: Some(a),
                pointee: Some(p),
            },
        ) => locate(elem, p, Some(*a), rest),
        (Type::Resource { kind }, Arg::Result(_)) if rest.is_empty() => Some((addr?, kind.size())),
        (Type::Struct { fields, .. }, Arg::Group(items)) => {
            let (&k, rest) = rest.split_first()?;
            let mut offset = 0;
            for (f, a) in fields.iter().zip(items).take(k) {
                offset = align_up(offset, f.typ.align()) + super::arg_size(&f.typ, a);
            }
            let field = fields.get(k)?;
            offset = align_up(offset, field.typ.align());
            locate(&field.typ, items.get(k)?, Some(addr? + offset), rest)
        }
        (Type::Array { elem }, Arg::Group(items)) => {
            let (&k, rest) = rest.split_first()?;
            let mut offset = 0;
            for a in items.iter().take(k) {
                offset = align_up(offset, elem.align()) + super::arg_size(elem, a);
            }
            offset = align_up(offset, elem.align());
            locate(elem, items.get(k)?, Some(addr? + offset), rest)
        }
        _ => None,
    }
}

/// Encodes `program` into `buf`, returning the number of bytes used.
pub fn serialize_for_exec(program: &Program, buf: &mut [u8]) -> Result<usize, ExecError> {
    let copyouts: BTreeMap<ResultSrc, u64> = program
        .referenced_results()
        .into_iter()
        .enumerate()
        .map(|(i, src)| (src, i as u64))
        .collect();
    let size = buf.len();
    let mut e = Encoder {
        w: ExecWriter {
            buf,
            pos: 0,
            overflow: false,
        },
        copyouts: &copyouts,
    };

    for (i, call) in program.calls.iter().enumerate() {
        for (field, arg) in call.meta.args.iter().zip(&call.args) {
            e.copyin(i, &field.typ, arg)?;
        }

        e.w.write(call.meta.id as u64);
        e.w.write(*copyouts.get(&ResultSrc::ret(i)).unwrap_or(&EXEC_NO_COPYOUT));
        e.w.write(call.args.len() as u64);
        for (field, arg) in call.meta.args.iter().zip(&call.args) {
            let size = field.typ.static_size().unwrap_or(8);
            match arg {
                Arg::Const(v) => e.write_const(size, *v),
                Arg::Result(r) => e.write_result(size, r),
                Arg::Pointer { addr, .. } => {
                    let addr = addr.ok_or(ExecError::UnresolvedPointer { call: i })?;
                    e.write_const(8, addr);
                }
                Arg::Data(_) | Arg::Group(_) => e.write_const(size, 0),
            }
        }

        for (src, index) in copyouts.iter().filter(|(s, _)| s.call == i && !s.path.is_empty()) {
            let located = src.path.split_first().and_then(|(&j, rest)| {
                let field = call.meta.args.get(j)?;
                locate(&field.typ, call.args.get(j)?, None, rest)
            });
            if let Some((addr, len)) = located {
                e.w.write(EXEC_INSTR_COPYOUT);
                e.w.write(*index);
                e.w.write(addr);
                e.w.write(len);
            }
        }
    }
    e.w.write(EXEC_INSTR_EOF);

    if e.w.overflow {
        return Err(ExecError::BufferOverflow { size });
    }
    Ok(e.w.pos)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        prog::{builder::build_program, call_selector::DefaultCallSelector, memory::fill_out_memory},
        target::{get_target, Target},
        trace::trace_parser::parse_line,
        util::read_le_u64,
    };

    fn resolved<'t>(target: &'t Target, lines: &[String]) -> Program<'t> {
        let records: Vec<_> = lines
            .iter()
            .map(|l| parse_line(l).unwrap().unwrap())
            .collect();
        let mut p = build_program(target, &DefaultCallSelector, &records).program;
        fill_out_memory(target, &mut p).unwrap();
        p
    }

    fn words(buf: &[u8]) -> Vec<u64> {
        buf.chunks(8).map(|c| read_le_u64(c).unwrap()).collect()
    }

    #[test]
    fn encodes_calls_and_copies() {
        let target = get_target("linux", "amd64").unwrap();
        let p = resolved(
            &target,
            &[
                "pipe([3, 4]) = 0".to_owned(),
                "write(4, \"\\x61\\x62\", 2) = 2".to_owned(),
            ],
        );
        let mut buf = vec![0u8; EXEC_BUFFER_SIZE];
        let n = serialize_for_exec(&p, &mut buf).unwrap();
        let w = words(&buf[..n]);

        let mmap = target.syscall("mmap").unwrap().id as u64;
        let pipe = target.syscall("pipe").unwrap().id as u64;
        let write = target.syscall("write").unwrap().id as u64;
        let mut expected = vec![mmap, EXEC_NO_COPYOUT, 6];
        for (size, v) in &[
            (8, 0x20000000),
            (8, 0x1000),
            (4, 0x3),
            (4, 0x32),
            (4, u64::MAX),
            (8, 0),
        ] {
            expected.extend_from_slice(&[EXEC_ARG_CONST, *size, *v]);
        }
        // pipe has an out pointer: no copy-in, one copy-out for fd 4.
        expected.extend_from_slice(&[pipe, EXEC_NO_COPYOUT, 1, EXEC_ARG_CONST, 8, 0x20000000]);
        expected.extend_from_slice(&[EXEC_INSTR_COPYOUT, 0, 0x20000004, 4]);
        expected.extend_from_slice(&[EXEC_INSTR_COPYIN, 0x20000008, EXEC_ARG_DATA, 2, 0x6261]);
        expected.extend_from_slice(&[write, EXEC_NO_COPYOUT, 3]);
        expected.extend_from_slice(&[EXEC_ARG_RESULT, 4, 0, 4]);
        expected.extend_from_slice(&[EXEC_ARG_CONST, 8, 0x20000008]);
        expected.extend_from_slice(&[EXEC_ARG_CONST, 8, 2]);
        expected.push(EXEC_INSTR_EOF);
        assert_eq!(w, expected);
    }

    #[test]
    fn copyouts_follow_path_order() {
        let target = get_target("linux", "amd64").unwrap();
        let p = resolved(
            &target,
            &[
                "pipe([3, 4]) = 0".to_owned(),
                "close(4) = 0".to_owned(),
                "close(3) = 0".to_owned(),
            ],
        );
        let mut buf = vec![0u8; EXEC_BUFFER_SIZE];
        let n = serialize_for_exec(&p, &mut buf).unwrap();
        let w = words(&buf[..n]);
        // mmap takes 21 words and pipe's call another 6.
        assert_eq!(
            &w[27..35],
            &[
                EXEC_INSTR_COPYOUT,
                0,
                0x20000000,
                4,
                EXEC_INSTR_COPYOUT,
                1,
                0x20000004,
                4
            ]
        );

        let mut again = vec![0u8; EXEC_BUFFER_SIZE];
        assert_eq!(serialize_for_exec(&p, &mut again), Ok(n));
        assert_eq!(buf[..n], again[..n]);
    }

    #[test]
    fn oversized_programs_overflow() {
        let target = get_target("linux", "amd64").unwrap();
        let big = "\\x41".repeat(EXEC_BUFFER_SIZE);
        let p = resolved(
            &target,
            &[format!("write(1, \"{}\", {}) = {}", big, EXEC_BUFFER_SIZE, EXEC_BUFFER_SIZE)],
        );
        let mut buf = vec![0u8; EXEC_BUFFER_SIZE];
        assert_eq!(
            serialize_for_exec(&p, &mut buf),
            Err(ExecError::BufferOverflow {
                size: EXEC_BUFFER_SIZE
            })
        );

        let small = resolved(&target, &["getpid() = 1".to_owned()]);
        let mut tiny = [0u8; 16];
        assert!(serialize_for_exec(&small, &mut tiny).is_err());
        let mut enough = [0u8; 32];
        assert_eq!(serialize_for_exec(&small, &mut enough), Ok(32));
    }
}
