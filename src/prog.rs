//! Typed syscall programs: the in-memory form the builder produces and the
//! resolver, validator and encoders consume.

use crate::target::{align_up, Syscall, Type};

pub mod builder;
pub mod call_selector;
pub mod encoding;
pub mod encoding_exec;
pub mod memory;
pub mod memory_range;
pub mod validation;

/// Where a resource value was produced: the return value of `call` when
/// `path` is empty, otherwise a resource stored in memory reached from
/// argument `path[0]` through groups `path[1..]` (pointers are transparent).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResultSrc {
    pub call: usize,
    pub path: Vec<usize>,
}

impl ResultSrc {
    pub fn ret(call: usize) -> ResultSrc {
        ResultSrc {
            call,
            path: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResultArg {
    /// Value used when `src` is `None`, and the value observed in the trace otherwise.
    pub val: u64,
    pub src: Option<ResultSrc>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DataArg {
    In(Vec<u8>),
    /// Output buffer: only its length matters.
    Out(u64),
}

impl DataArg {
    pub fn len(&self) -> u64 {
        match self {
            DataArg::In(bytes) => bytes.len() as u64,
            DataArg::Out(len) => *len,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Arg {
    Const(u64),
    Result(ResultArg),
    /// `addr` is `None` until the memory resolver places the pointee. A null
    /// pointer is `addr: Some(0)` with no pointee.
    Pointer {
        addr: Option<u64>,
        pointee: Option<Box<Arg>>,
    },
    Data(DataArg),
    /// Struct fields or array elements.
    Group(Vec<Arg>),
}

impl Arg {
    pub fn null() -> Arg {
        Arg::Pointer {
            addr: Some(0),
            pointee: None,
        }
    }

    pub fn placeholder(pointee: Arg) -> Arg {
        Arg::Pointer {
            addr: None,
            pointee: Some(Box::new(pointee)),
        }
    }

    pub fn literal(val: u64) -> Arg {
        Arg::Result(ResultArg { val, src: None })
    }

    fn skip_pointers(&self) -> &Arg {
        let mut arg = self;
        while let Arg::Pointer {
            pointee: Some(p), ..
        } = arg
        {
            arg = p;
        }
        arg
    }

    /// Follows `path` (group indices, pointers transparent) below this arg.
    pub fn at_path(&self, path: &[usize]) -> Option<&Arg> {
        let mut arg = self.skip_pointers();
        for &i in path {
            arg = match arg {
                Arg::Group(items) => items.get(i)?.skip_pointers(),
                _ => return None,
            };
        }
        Some(arg)
    }
}

#[derive(Clone, Debug)]
pub struct Call<'t> {
    pub meta: &'t Syscall,
    pub args: Vec<Arg>,
}

impl<'t> Call<'t> {
    /// The argument (or nested resource) a `ResultSrc` with this call names.
    pub fn arg_at(&self, path: &[usize]) -> Option<&Arg> {
        let (first, rest) = path.split_first()?;
        self.args.get(*first)?.at_path(rest)
    }
}

#[derive(Clone, Default)]
pub struct Program<'t> {
    pub calls: Vec<Call<'t>>,
}

impl<'t> Program<'t> {
    pub fn new() -> Program<'t> {
        Default::default()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Every result source some later call refers to, in program order.
    pub fn referenced_results(&self) -> Vec<ResultSrc> {
        let mut srcs = Vec::new();
        for call in &self.calls {
            for arg in &call.args {
                collect_refs(arg, &mut srcs);
            }
        }
        srcs.sort();
        srcs.dedup();
        srcs
    }
}

fn collect_refs(arg: &Arg, out: &mut Vec<ResultSrc>) {
    match arg {
        Arg::Result(ResultArg { src: Some(src), .. }) => out.push(src.clone()),
        Arg::Pointer {
            pointee: Some(p), ..
        } => collect_refs(p, out),
        Arg::Group(items) => items.iter().for_each(|a| collect_refs(a, out)),
        _ => (),
    }
}

/// Number of bytes `arg` occupies in memory when laid out as `typ`.
pub fn arg_size(typ: &Type, arg: &Arg) -> u64 {
    match (typ, arg) {
        (Type::Struct { fields, .. }, Arg::Group(items)) => {
            let mut offset = 0;
            for (f, a) in fields.iter().zip(items) {
                offset = align_up(offset, f.typ.align());
                offset += arg_size(&f.typ, a);
            }
            align_up(offset, typ.align())
        }
        (Type::Array { elem }, Arg::Group(items)) => {
            let mut offset = 0;
            for a in items {
                offset = align_up(offset, elem.align());
                offset += arg_size(elem, a);
            }
            offset
        }
        (_, Arg::Data(data)) => data.len(),
        _ => typ.static_size().unwrap_or(0),
    }
}

/// Calls `f(addr, typ, arg)` for every non-group arg of a pointee laid out at `base`.
pub fn visit_layout<'a, F>(typ: &'a Type, arg: &'a Arg, base: u64, f: &mut F)
where
    F: FnMut(u64, &'a Type, &'a Arg),
{
    match (typ, arg) {
        (Type::Struct { fields, .. }, Arg::Group(items)) => {
            let mut offset = 0;
            for (field, a) in fields.iter().zip(items) {
                offset = align_up(offset, field.typ.align());
                visit_layout(&field.typ, a, base + offset, f);
                offset += arg_size(&field.typ, a);
            }
        }
        (Type::Array { elem }, Arg::Group(items)) => {
            let mut offset = 0;
            for a in items {
                offset = align_up(offset, elem.align());
                visit_layout(elem, a, base + offset, f);
                offset += arg_size(elem, a);
            }
        }
        _ => f(base, typ, arg),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::target::{BufferKind, Field, ResourceKind};

    #[test]
    fn sizes_follow_c_layout() {
        let t = Type::Struct {
            name: "s",
            fields: vec![
                Field::new("a", Type::Int { size: 1 }),
                Field::new("b", Type::Buffer { kind: BufferKind::Blob }),
                Field::new("c", Type::Int { size: 4 }),
            ],
        };
        let arg = Arg::Group(vec![
            Arg::Const(1),
            Arg::Data(DataArg::In(vec![1, 2, 3])),
            Arg::Const(2),
        ]);
        // 1 + 3 bytes, then c at 4.
        assert_eq!(arg_size(&t, &arg), 8);

        let mut leaves = Vec::new();
        visit_layout(&t, &arg, 0x100, &mut |addr, _, _| leaves.push(addr));
        assert_eq!(leaves, vec![0x100, 0x101, 0x104]);

        let fds = Type::Array {
            elem: Box::new(Type::Resource {
                kind: ResourceKind::Fd,
            }),
        };
        let pair = Arg::Group(vec![Arg::literal(3), Arg::literal(4)]);
        assert_eq!(arg_size(&fds, &pair), 8);
    }

    #[test]
    fn paths_see_through_pointers() {
        let arg = Arg::placeholder(Arg::Group(vec![Arg::literal(3), Arg::literal(4)]));
        assert_eq!(arg.at_path(&[1]), Some(&Arg::literal(4)));
        assert_eq!(arg.at_path(&[2]), None);
        assert_eq!(arg.at_path(&[]), Some(&Arg::Group(vec![Arg::literal(3), Arg::literal(4)])));
    }
}
