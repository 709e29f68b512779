//! Turns the syscall records of one process into a candidate program.
//!
//! Pointers come out as placeholders (no address yet) and `len` fields are
//! computed from the data they describe. Resource arguments are linked to the
//! call that produced the traced value, when that call is part of the program.

use super::{
    arg_size,
    call_selector::{CallSelector, Selection},
    Arg, Call, DataArg, Program, ResultArg, ResultSrc,
};
use crate::{
    log::LogLevel::LogDebug,
    target::{BufferKind, Dir, Field, ResourceKind, Target, Type},
    trace::{TraceRecord, TraceValue},
};
use std::{collections::HashMap, net::Ipv4Addr};

pub struct BuildResult<'t> {
    pub program: Program<'t>,
    /// Records no descriptor was selected for.
    pub skipped: usize,
}

/// Evaluates an integer-like trace value: literals, named constants (unknown
/// names are `None` on their own and 0 inside an OR), `htons`/`htonl`/
/// `inet_addr`/`makedev` and one-element arrays such as `[0]`.
pub fn evaluate(target: &Target, value: &TraceValue) -> Option<u64> {
    match value {
        TraceValue::Int(v) => Some(*v),
        TraceValue::Ident(name) => target.const_value(name),
        TraceValue::Or(items) => Some(
            items
                .iter()
                .fold(0, |acc, v| acc | evaluate(target, v).unwrap_or(0)),
        ),
        TraceValue::Changed(before, _) => evaluate(target, before),
        TraceValue::Array(items) if items.len() == 1 => evaluate(target, &items[0]),
        TraceValue::Null => Some(0),
        TraceValue::Call(name, args) => evaluate_call(target, name, args),
        _ => None,
    }
}

fn evaluate_call(target: &Target, name: &str, args: &[TraceValue]) -> Option<u64> {
    let arg = |i: usize| args.get(i).and_then(|v| evaluate(target, v));
    match name {
        "htons" => Some((arg(0)? as u16).swap_bytes() as u64),
        "htonl" => Some((arg(0)? as u32).swap_bytes() as u64),
        "inet_addr" => match args.first()? {
            TraceValue::Str(s) => {
                let addr: Ipv4Addr = String::from_utf8_lossy(s).parse().ok()?;
                // Network order in memory, read back as a little-endian word.
                Some(u32::from_le_bytes(addr.octets()) as u64)
            }
            _ => None,
        },
        "makedev" => {
            let (major, minor) = (arg(0)?, arg(1)?);
            Some(
                (minor & 0xff)
                    | ((major & 0xfff) << 8)
                    | ((minor & !0xff) << 12)
                    | ((major & !0xfff) << 32),
            )
        }
        _ => None,
    }
}

struct Context<'t> {
    target: &'t Target,
    /// Observed resource value -> where it was produced. Later producers win.
    return_cache: HashMap<(ResourceKind, u64), ResultSrc>,
    calls: Vec<Call<'t>>,
}

pub fn build_program<'t>(
    target: &'t Target,
    selector: &dyn CallSelector,
    records: &[TraceRecord],
) -> BuildResult<'t> {
    let mut ctx = Context {
        target,
        return_cache: HashMap::new(),
        calls: Vec::new(),
    };
    let mut skipped = 0;

    for record in records {
        let selection = match selector.select(target, record) {
            Some(selection) => selection,
            None => {
                log!(LogDebug, "no descriptor for `{}`, skipping", record.name);
                skipped += 1;
                continue;
            }
        };
        ctx.add_call(selection, record);
    }

    BuildResult {
        program: Program { calls: ctx.calls },
        skipped,
    }
}

impl<'t> Context<'t> {
    fn add_call(&mut self, selection: Selection<'t>, record: &TraceRecord) {
        let meta = selection.syscall;
        let mut args: Vec<Arg> = meta
            .args
            .iter()
            .zip(&selection.mapping)
            .map(|(field, index)| {
                let value = index.and_then(|i| record.args.get(i));
                self.gen_arg(&field.typ, value, Dir::In)
            })
            .collect();
        fix_lens(&meta.args, &mut args);

        let index = self.calls.len();
        if !record.failed() {
            if let Some(kind) = meta.ret {
                self.return_cache
                    .insert((kind, record.ret as u64), ResultSrc::ret(index));
            }
            for (i, (field, arg)) in meta.args.iter().zip(&args).enumerate() {
                let mut path = vec![i];
                self.cache_produced(index, &field.typ, arg, &mut path);
            }
        }
        self.calls.push(Call { meta, args });
    }

    /// Caches resources written to memory by a successful call, e.g. the fds of `pipe`.
    fn cache_produced(&mut self, call: usize, typ: &Type, arg: &Arg, path: &mut Vec<usize>) {
        match (typ, arg) {
            (Type::Ptr { dir, elem }, Arg::Pointer { pointee: Some(p), .. }) if dir.writes() => {
                self.cache_out(call, elem, p, path)
            }
            (Type::Struct { fields, .. }, Arg::Group(items)) => {
                for (i, (f, a)) in fields.iter().zip(items).enumerate() {
                    path.push(i);
                    self.cache_produced(call, &f.typ, a, path);
                    path.pop();
                }
            }
            _ => (),
        }
    }

    fn cache_out(&mut self, call: usize, typ: &Type, arg: &Arg, path: &mut Vec<usize>) {
        match (typ, arg) {
            (Type::Resource { kind }, Arg::Result(ResultArg { val, src: None })) => {
                if !kind.special_values().contains(val) {
                    let src = ResultSrc {
                        call,
                        path: path.clone(),
                    };
                    self.return_cache.insert((*kind, *val), src);
                }
            }
            (Type::Struct { fields, .. }, Arg::Group(items)) => {
                for (i, (f, a)) in fields.iter().zip(items).enumerate() {
                    path.push(i);
                    self.cache_out(call, &f.typ, a, path);
                    path.pop();
                }
            }
            (Type::Array { elem }, Arg::Group(items)) => {
                for (i, a) in items.iter().enumerate() {
                    path.push(i);
                    self.cache_out(call, elem, a, path);
                    path.pop();
                }
            }
            (Type::Ptr { .. }, _) => self.cache_produced(call, typ, arg, path),
            _ => (),
        }
    }

    fn lookup(&self, kind: ResourceKind, val: u64) -> Option<&ResultSrc> {
        let exact = self.return_cache.get(&(kind, val));
        let compatible = self
            .return_cache
            .iter()
            .filter(|((k, v), _)| *v == val && *k != kind && kind.accepts(*k))
            .map(|(_, src)| src)
            .max_by_key(|src| src.call);
        match (exact, compatible) {
            (Some(a), Some(b)) => Some(if b.call > a.call { b } else { a }),
            (a, b) => a.or(b),
        }
    }

    fn gen_arg(&self, typ: &Type, value: Option<&TraceValue>, dir: Dir) -> Arg {
        let value = value.map(TraceValue::input);
        match typ {
            Type::Int { .. } | Type::Flags { .. } => {
                Arg::Const(value.and_then(|v| evaluate(self.target, v)).unwrap_or(0))
            }
            Type::Const { val, .. } => Arg::Const(*val),
            // Filled in by `fix_lens`.
            Type::Len { .. } => Arg::Const(0),
            Type::Resource { kind } => self.gen_resource(*kind, value, dir),
            Type::Ptr { dir: pdir, elem } => match value {
                None | Some(TraceValue::Null) | Some(TraceValue::Int(0)) => Arg::null(),
                // An address strace didn't decode.
                Some(TraceValue::Int(_)) => Arg::placeholder(self.gen_arg(elem, None, *pdir)),
                Some(v) => Arg::placeholder(self.gen_arg(elem, Some(v), *pdir)),
            },
            Type::Buffer { kind } => Arg::Data(gen_buffer(*kind, value, dir)),
            Type::Struct { fields, .. } => {
                let items: &[(Option<String>, TraceValue)] = match value {
                    Some(TraceValue::Struct(items)) => items,
                    _ => &[],
                };
                let mut args: Vec<Arg> = fields
                    .iter()
                    .enumerate()
                    .map(|(i, f)| self.gen_arg(&f.typ, items.get(i).map(|(_, v)| v), dir))
                    .collect();
                fix_lens(fields, &mut args);
                Arg::Group(args)
            }
            Type::Array { elem } => {
                let items: &[TraceValue] = match value {
                    Some(TraceValue::Array(items)) => items,
                    _ => &[],
                };
                Arg::Group(
                    items
                        .iter()
                        .map(|v| self.gen_arg(elem, Some(v), dir))
                        .collect(),
                )
            }
        }
    }

    fn gen_resource(&self, kind: ResourceKind, value: Option<&TraceValue>, dir: Dir) -> Arg {
        let val = value.and_then(|v| evaluate(self.target, v));
        if dir == Dir::Out {
            return Arg::literal(val.unwrap_or_else(|| kind.default_value()));
        }
        let val = match val {
            Some(val) => val,
            None => return Arg::literal(kind.default_value()),
        };
        if let Some(src) = self.lookup(kind, val) {
            return Arg::Result(ResultArg {
                val,
                src: Some(src.clone()),
            });
        }
        let standard_fd = kind.accepts(ResourceKind::Fd) && val <= 2;
        if standard_fd || kind.special_values().contains(&val) {
            Arg::literal(val)
        } else {
            log!(
                LogDebug,
                "{} {:#x} was not produced by the program, using default",
                kind.name(),
                val
            );
            Arg::literal(kind.default_value())
        }
    }
}

fn gen_buffer(kind: BufferKind, value: Option<&TraceValue>, dir: Dir) -> DataArg {
    let bytes: &[u8] = match value {
        Some(TraceValue::Str(bytes)) => bytes,
        _ => &[],
    };
    match (kind, dir) {
        (BufferKind::Fixed(len), Dir::Out) => DataArg::Out(len),
        (BufferKind::Fixed(len), _) => {
            let mut data = bytes.to_vec();
            data.resize(len as usize, 0);
            DataArg::In(data)
        }
        (_, Dir::Out) => DataArg::Out(bytes.len() as u64),
        (BufferKind::String, _) | (BufferKind::Filename, _) => {
            let mut data = bytes.to_vec();
            if data.last() != Some(&0) {
                data.push(0);
            }
            DataArg::In(data)
        }
        (BufferKind::Blob, _) => DataArg::In(bytes.to_vec()),
    }
}

/// Sets every `len` field from the sibling it names: element count for
/// arrays, byte size for everything else.
fn fix_lens(fields: &[Field], args: &mut [Arg]) {
    for (i, field) in fields.iter().enumerate() {
        if let Type::Len { of, .. } = field.typ {
            let value = fields
                .iter()
                .position(|f| f.name == of)
                .and_then(|j| args.get(j).map(|a| (&fields[j].typ, a)))
                .map_or(0, |(typ, arg)| len_of(typ, arg));
            if let Some(arg) = args.get_mut(i) {
                *arg = Arg::Const(value);
            }
        }
    }
}

pub(super) fn len_of(typ: &Type, arg: &Arg) -> u64 {
    match (typ, arg) {
        (Type::Ptr { elem, .. }, Arg::Pointer { pointee: Some(p), .. }) => len_of(elem, p),
        (Type::Ptr { .. }, _) => 0,
        (Type::Array { .. }, Arg::Group(items)) => items.len() as u64,
        _ => arg_size(typ, arg),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        prog::call_selector::DefaultCallSelector, target::get_target,
        trace::trace_parser::parse_line,
    };

    fn records(lines: &[&str]) -> Vec<TraceRecord> {
        lines
            .iter()
            .map(|l| parse_line(l).unwrap().unwrap())
            .collect()
    }

    fn build<'t>(target: &'t Target, lines: &[&str]) -> BuildResult<'t> {
        build_program(target, &DefaultCallSelector, &records(lines))
    }

    #[test]
    fn links_returned_fds() {
        let target = get_target("linux", "amd64").unwrap();
        let r = build(
            &target,
            &[
                r#"openat(AT_FDCWD, "\x66\x30", O_RDWR|O_CREAT, 0644) = 3"#,
                r#"write(3, "\x61\x62\x63", 3) = 3"#,
                "close(3) = 0",
            ],
        );
        assert_eq!(r.skipped, 0);
        let calls = &r.program.calls;
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].args[0], Arg::literal(0xffffffffffffff9c));
        assert_eq!(
            calls[0].args[1],
            Arg::placeholder(Arg::Data(DataArg::In(b"f0\0".to_vec())))
        );
        assert_eq!(calls[0].args[2], Arg::Const(0x42));
        assert_eq!(calls[0].args[3], Arg::Const(0o644));
        let linked = Arg::Result(ResultArg {
            val: 3,
            src: Some(ResultSrc::ret(0)),
        });
        assert_eq!(calls[1].args[0], linked);
        assert_eq!(calls[1].args[2], Arg::Const(3));
        assert_eq!(calls[2].args[0], linked);
    }

    #[test]
    fn resource_fallbacks() {
        let target = get_target("linux", "amd64").unwrap();
        let r = build(
            &target,
            &[
                "close(1) = 0",
                "close(7) = 0",
                "close(-1) = -1 EBADF (Bad file descriptor)",
                "open(\"\\x78\", O_RDONLY) = -1 ENOENT (No such file or directory)",
                "close(3) = 0",
            ],
        );
        let fds: Vec<&Arg> = r.program.calls.iter().map(|c| &c.args[0]).collect();
        assert_eq!(fds[0], &Arg::literal(1));
        assert_eq!(fds[1], &Arg::literal(u64::MAX));
        assert_eq!(fds[2], &Arg::literal(u64::MAX));
        // The failed open produced nothing.
        assert_eq!(fds[4], &Arg::literal(u64::MAX));
    }

    #[test]
    fn out_resources_are_linked() {
        let target = get_target("linux", "amd64").unwrap();
        let r = build(
            &target,
            &[
                "pipe([3, 4]) = 0",
                "write(4, \"\\x61\", 1) = 1",
                "socket(AF_INET, SOCK_STREAM, IPPROTO_IP) = 5",
                "fstat(5, {st_mode=S_IFSOCK|0777, st_size=0, ...}) = 0",
            ],
        );
        let calls = &r.program.calls;
        assert_eq!(
            calls[1].args[0],
            Arg::Result(ResultArg {
                val: 4,
                src: Some(ResultSrc {
                    call: 0,
                    path: vec![0, 1]
                }),
            })
        );
        // A sock passed where an fd is expected.
        assert_eq!(
            calls[3].args[0],
            Arg::Result(ResultArg {
                val: 5,
                src: Some(ResultSrc::ret(2)),
            })
        );
        assert_eq!(calls[3].args[1], Arg::placeholder(Arg::Data(DataArg::Out(144))));
    }

    #[test]
    fn structs_and_helpers() {
        let target = get_target("linux", "amd64").unwrap();
        let r = build(
            &target,
            &[
                "socket(AF_INET, SOCK_STREAM, IPPROTO_IP) = 3",
                "connect(3, {sa_family=AF_INET, sin_port=htons(80), sin_addr=inet_addr(\"127.0.0.1\")}, 16) = 0",
            ],
        );
        let connect = &r.program.calls[1];
        assert_eq!(connect.meta.name, "connect$inet");
        assert_eq!(
            connect.args[1],
            Arg::placeholder(Arg::Group(vec![
                Arg::Const(2),
                Arg::Const(0x5000),
                Arg::Const(0x0100007f),
                Arg::Data(DataArg::In(vec![0; 8])),
            ]))
        );
        assert_eq!(connect.args[2], Arg::Const(16));
    }

    #[test]
    fn unselected_records_are_skipped() {
        let target = get_target("linux", "amd64").unwrap();
        let r = build(&target, &["ptrace(PTRACE_TRACEME) = 0", "getpid() = 1"]);
        assert_eq!(r.skipped, 1);
        assert_eq!(r.program.calls.len(), 1);
    }

    #[test]
    fn evaluates_expressions() {
        let target = get_target("linux", "amd64").unwrap();
        let v = |s: &str| {
            let r = parse_line(&format!("x({}) = 0", s)).unwrap().unwrap();
            evaluate(&target, &r.args[0])
        };
        assert_eq!(v("O_RDWR|O_CREAT|0x100000"), Some(0x100042));
        assert_eq!(v("O_RDWR|NOT_A_FLAG"), Some(2));
        assert_eq!(v("NOT_A_FLAG"), None);
        assert_eq!(v("htons(8080)"), Some(0x901f));
        assert_eq!(v("htonl(1)"), Some(0x01000000));
        assert_eq!(v("makedev(0x1, 0x3)"), Some(0x103));
        assert_eq!(v("[7]"), Some(7));
        assert_eq!(v("[1, 2]"), None);
    }
}
