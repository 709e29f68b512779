use super::{
    arg_size,
    builder::len_of,
    memory::{RegionTable, ResolveError},
    memory_range::MemoryRange,
    Arg, DataArg, Program, ResultArg, ResultSrc,
};
use crate::target::{BufferKind, Field, ResourceKind, Target, Type};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

#[derive(Debug, Eq, PartialEq)]
pub enum ValidationError {
    ArgCount {
        call: String,
        want: usize,
        got: usize,
    },
    /// The arg's shape doesn't fit its type.
    Mismatch {
        call: String,
        field: &'static str,
        reason: String,
    },
    BadResult {
        call: String,
        field: &'static str,
        src: ResultSrc,
    },
    BadPointer {
        call: String,
        field: &'static str,
        addr: Option<u64>,
    },
    Memory(ResolveError),
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ArgCount { call, want, got } => {
                write!(f, "{}: want {} args, got {}", call, want, got)
            }
            ValidationError::Mismatch {
                call,
                field,
                reason,
            } => write!(f, "{}: arg {}: {}", call, field, reason),
            ValidationError::BadResult { call, field, src } => write!(
                f,
                "{}: arg {} refers to call {} path {:?} which doesn't produce a compatible resource",
                call, field, src.call, src.path
            ),
            ValidationError::BadPointer { call, field, addr } => match addr {
                Some(addr) => write!(f, "{}: arg {}: pointer {:#x} outside the data area", call, field, addr),
                None => write!(f, "{}: arg {}: unresolved pointer", call, field),
            },
            ValidationError::Memory(e) => write!(f, "{}", e),
        }
    }
}

impl Error for ValidationError {}

impl From<ResolveError> for ValidationError {
    fn from(e: ResolveError) -> Self {
        ValidationError::Memory(e)
    }
}

struct Validator<'a, 't> {
    target: &'t Target,
    program: &'a Program<'t>,
    call: usize,
}

/// Checks `program` against the target's schemas. Anything reported here is
/// a bug in the builder or resolver, not a property of the trace.
pub fn validate(target: &Target, program: &Program) -> Result<(), ValidationError> {
    for (i, call) in program.calls.iter().enumerate() {
        if call.args.len() != call.meta.args.len() {
            return Err(ValidationError::ArgCount {
                call: call.meta.name.clone(),
                want: call.meta.args.len(),
                got: call.args.len(),
            });
        }
        let v = Validator {
            target,
            program,
            call: i,
        };
        v.check_fields(&call.meta.args, &call.args)?;
    }
    RegionTable::rebuild(program)?;
    Ok(())
}

impl<'a, 't> Validator<'a, 't> {
    fn call_name(&self) -> String {
        self.program.calls[self.call].meta.name.clone()
    }

    fn mismatch(&self, field: &'static str, reason: String) -> ValidationError {
        ValidationError::Mismatch {
            call: self.call_name(),
            field,
            reason,
        }
    }

    fn check_fields(&self, fields: &[Field], args: &[Arg]) -> Result<(), ValidationError> {
        for (field, arg) in fields.iter().zip(args) {
            self.check(field.name, &field.typ, arg)?;
            if let Type::Len { of, .. } = field.typ {
                let want = fields
                    .iter()
                    .position(|f| f.name == of)
                    .map_or(0, |j| len_of(&fields[j].typ, &args[j]));
                if *arg != Arg::Const(want) {
                    return Err(self.mismatch(field.name, format!("len {:?} != {}", arg, want)));
                }
            }
        }
        Ok(())
    }

    fn check(&self, field: &'static str, typ: &Type, arg: &Arg) -> Result<(), ValidationError> {
        match (typ, arg) {
            (Type::Int { .. }, Arg::Const(_))
            | (Type::Flags { .. }, Arg::Const(_))
            | (Type::Len { .. }, Arg::Const(_)) => Ok(()),
            (Type::Const { val, .. }, Arg::Const(v)) => {
                if v == val {
                    Ok(())
                } else {
                    Err(self.mismatch(field, format!("const {:#x} != {:#x}", v, val)))
                }
            }
            (Type::Resource { kind }, Arg::Result(r)) => self.check_result(field, *kind, r),
            (Type::Ptr { elem, .. }, Arg::Pointer { addr, pointee }) => match (addr, pointee) {
                (Some(0), None) => Ok(()),
                (Some(addr), Some(p)) => {
                    let data_area =
                        MemoryRange::from_range(self.target.data_offset, self.target.data_end());
                    if !data_area.contains(&MemoryRange::new_range(*addr, arg_size(elem, p))) {
                        return Err(ValidationError::BadPointer {
                            call: self.call_name(),
                            field,
                            addr: Some(*addr),
                        });
                    }
                    self.check(field, elem, p)
                }
                (addr, _) => Err(ValidationError::BadPointer {
                    call: self.call_name(),
                    field,
                    addr: *addr,
                }),
            },
            (Type::Buffer { kind }, Arg::Data(data)) => match (kind, data) {
                (BufferKind::Fixed(len), data) if data.len() != *len => Err(self.mismatch(
                    field,
                    format!("fixed buffer of {} bytes holds {}", len, data.len()),
                )),
                (BufferKind::String, DataArg::In(bytes))
                | (BufferKind::Filename, DataArg::In(bytes))
                    if bytes.last() != Some(&0) =>
                {
                    Err(self.mismatch(field, "string is not NUL terminated".to_owned()))
                }
                _ => Ok(()),
            },
            (Type::Struct { fields, .. }, Arg::Group(items)) => {
                if fields.len() != items.len() {
                    return Err(self.mismatch(
                        field,
                        format!("struct has {} fields, got {}", fields.len(), items.len()),
                    ));
                }
                self.check_fields(fields, items)
            }
            (Type::Array { elem }, Arg::Group(items)) => {
                items.iter().try_for_each(|a| self.check(field, elem, a))
            }
            (typ, arg) => Err(self.mismatch(field, format!("{:?} can't hold {:?}", typ, arg))),
        }
    }

    fn check_result(
        &self,
        field: &'static str,
        kind: ResourceKind,
        r: &ResultArg,
    ) -> Result<(), ValidationError> {
        let src = match &r.src {
            Some(src) => src,
            None => return Ok(()),
        };
        let bad = || ValidationError::BadResult {
            call: self.call_name(),
            field,
            src: src.clone(),
        };
        if src.call >= self.call {
            return Err(bad());
        }
        let producer = &self.program.calls[src.call];
        let produced = if src.path.is_empty() {
            producer.meta.ret
        } else {
            produced_kind(&producer.meta.args, &src.path)
        };
        match produced {
            Some(p) if kind.accepts(p) && producer.arg_at(&src.path).map_or(true, is_result) => {
                Ok(())
            }
            _ => Err(bad()),
        }
    }
}

fn is_result(arg: &Arg) -> bool {
    match arg {
        Arg::Result(_) => true,
        _ => false,
    }
}

/// The resource kind at `path` in a call's schema.
fn produced_kind(fields: &[Field], path: &[usize]) -> Option<ResourceKind> {
    let (first, rest) = path.split_first()?;
    let mut typ = &fields.get(*first)?.typ;
    for &i in rest {
        while let Type::Ptr { elem, .. } = typ {
            typ = elem;
        }
        typ = match typ {
            Type::Struct { fields, .. } => &fields.get(i)?.typ,
            Type::Array { elem } => elem,
            _ => return None,
        };
    }
    while let Type::Ptr { elem, .. } = typ {
        typ = elem;
    }
    typ.resource_kind()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        prog::{
            builder::build_program, call_selector::DefaultCallSelector, memory::fill_out_memory,
            Call,
        },
        target::get_target,
        trace::trace_parser::parse_line,
    };

    fn resolved<'t>(target: &'t Target, lines: &[&str]) -> Program<'t> {
        let records: Vec<_> = lines
            .iter()
            .map(|l| parse_line(l).unwrap().unwrap())
            .collect();
        let mut p = build_program(target, &DefaultCallSelector, &records).program;
        fill_out_memory(target, &mut p).unwrap();
        p
    }

    #[test]
    fn built_programs_validate() {
        let target = get_target("linux", "amd64").unwrap();
        let p = resolved(
            &target,
            &[
                "pipe([3, 4]) = 0",
                "write(4, \"\\x61\", 1) = 1",
                "socket(AF_INET, SOCK_STREAM, IPPROTO_IP) = 5",
                "connect(5, {sa_family=AF_INET, sin_port=htons(80), sin_addr=inet_addr(\"127.0.0.1\")}, 16) = 0",
                "close(5) = 0",
            ],
        );
        assert_eq!(validate(&target, &p), Ok(()));
    }

    #[test]
    fn rejects_unresolved_pointers() {
        let target = get_target("linux", "amd64").unwrap();
        let records = vec![parse_line("write(1, \"\\x61\", 1) = 1").unwrap().unwrap()];
        let p = build_program(&target, &DefaultCallSelector, &records).program;
        match validate(&target, &p) {
            Err(ValidationError::BadPointer { addr: None, .. }) => (),
            r => panic!("unexpected {:?}", r),
        }
    }

    #[test]
    fn rejects_bad_shapes() {
        let target = get_target("linux", "amd64").unwrap();
        let mut p = resolved(&target, &["write(1, \"\\x61\\x62\", 2) = 2"]);
        p.calls[1].args[2] = Arg::Const(5);
        match validate(&target, &p) {
            Err(ValidationError::Mismatch { field: "count", .. }) => (),
            r => panic!("unexpected {:?}", r),
        }

        let mut p = resolved(&target, &["getpid() = 1"]);
        p.calls.push(Call {
            meta: target.syscall("close").unwrap(),
            args: vec![],
        });
        assert_eq!(
            validate(&target, &p),
            Err(ValidationError::ArgCount {
                call: "close".to_owned(),
                want: 1,
                got: 0
            })
        );

        let mut p = resolved(&target, &["socket(AF_INET, SOCK_STREAM, 0) = 3"]);
        p.calls[0].args[0] = Arg::Const(10);
        match validate(&target, &p) {
            Err(ValidationError::Mismatch { field: "domain", .. }) => (),
            r => panic!("unexpected {:?}", r),
        }
    }

    #[test]
    fn rejects_bad_result_refs() {
        let target = get_target("linux", "amd64").unwrap();
        let mut p = resolved(&target, &["getpid() = 7", "close(1) = 0"]);
        // A pid is not an fd.
        p.calls[1].args[0] = Arg::Result(ResultArg {
            val: 7,
            src: Some(ResultSrc::ret(0)),
        });
        match validate(&target, &p) {
            Err(ValidationError::BadResult { .. }) => (),
            r => panic!("unexpected {:?}", r),
        }
        // Forward references.
        p.calls[1].args[0] = Arg::Result(ResultArg {
            val: 7,
            src: Some(ResultSrc::ret(1)),
        });
        assert!(validate(&target, &p).is_err());
    }

    #[test]
    fn pointees_stay_inside_the_data_area() {
        let target = get_target("linux", "amd64").unwrap();
        let mut p = resolved(&target, &["write(1, \"\\x61\\x62\", 2) = 2"]);
        let last = target.data_end() - 2;
        if let Arg::Pointer { addr, .. } = &mut p.calls[1].args[1] {
            *addr = Some(last);
        }
        assert_eq!(validate(&target, &p), Ok(()));

        if let Arg::Pointer { addr, .. } = &mut p.calls[1].args[1] {
            *addr = Some(last + 1);
        }
        match validate(&target, &p) {
            Err(ValidationError::BadPointer { addr: Some(a), .. }) => assert_eq!(a, last + 1),
            r => panic!("unexpected {:?}", r),
        }
    }

    #[test]
    fn rejects_overlapping_memory() {
        let target = get_target("linux", "amd64").unwrap();
        let mut p = resolved(
            &target,
            &["write(1, \"\\x61\\x62\", 2) = 2", "write(1, \"\\x63\", 1) = 1"],
        );
        if let Arg::Pointer { addr, .. } = &mut p.calls[2].args[1] {
            *addr = Some(target.data_offset + 1);
        }
        match validate(&target, &p) {
            Err(ValidationError::Memory(ResolveError::Overlap { .. })) => (),
            r => panic!("unexpected {:?}", r),
        }
    }
}
