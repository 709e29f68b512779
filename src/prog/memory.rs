//! Places pointer targets in the data area.
//!
//! Every placeholder pointer gets an address from a bump allocator that
//! respects the pointee's alignment, each allocation is recorded in a
//! `RegionTable`, and an `mmap` of the used part of the data area is
//! prepended so the executor has memory to copy arguments into.

use super::{arg_size, memory_range::MemoryRange, memory_range::MemoryRangeKey, Arg, Call, Program};
use crate::target::{align_up, Target, Type};
use std::{
    collections::BTreeMap,
    error::Error,
    fmt::{self, Display, Formatter},
};

const PROT_READ_WRITE: u64 = 0x3;
/// MAP_PRIVATE | MAP_FIXED | MAP_ANONYMOUS
const MAP_FIXED_ANON: u64 = 0x32;

#[derive(Debug, Eq, PartialEq)]
pub enum ResolveError {
    BadAlignment { call: usize, align: u64 },
    Overlap { range: MemoryRange, owner: Owner },
    OutOfMemory { call: usize, needed: u64 },
    NoMmap,
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::BadAlignment { call, align } => {
                write!(f, "call {}: alignment {} is not a power of two", call, align)
            }
            ResolveError::Overlap { range, owner } => write!(
                f,
                "region {} overlaps memory of call {} arg {:?}",
                range, owner.call, owner.path
            ),
            ResolveError::OutOfMemory { call, needed } => {
                write!(f, "call {}: {} more bytes don't fit in the data area", call, needed)
            }
            ResolveError::NoMmap => write!(f, "target has no mmap call to map the data area"),
        }
    }
}

impl Error for ResolveError {}

/// The call and argument path a region belongs to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Owner {
    pub call: usize,
    pub path: Vec<usize>,
}

/// Allocated regions, guaranteed non-overlapping.
#[derive(Default, Debug)]
pub struct RegionTable {
    regions: BTreeMap<MemoryRangeKey, Owner>,
}

impl RegionTable {
    pub fn new() -> RegionTable {
        Default::default()
    }

    pub fn insert(&mut self, range: MemoryRange, owner: Owner) -> Result<(), ResolveError> {
        let key = MemoryRangeKey(range);
        if let Some(existing) = self.regions.get(&key) {
            return Err(ResolveError::Overlap {
                range,
                owner: existing.clone(),
            });
        }
        self.regions.insert(key, owner);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Highest allocated address, exclusive.
    pub fn end(&self) -> Option<u64> {
        self.regions.keys().next_back().map(|k| k.end())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemoryRange, &Owner)> {
        self.regions.iter().map(|(k, v)| (&k.0, v))
    }

    /// Collects the regions of every resolved, non-null pointer in `program`.
    pub fn rebuild(program: &Program) -> Result<RegionTable, ResolveError> {
        let mut table = RegionTable::new();
        for (i, call) in program.calls.iter().enumerate() {
            for (j, (field, arg)) in call.meta.args.iter().zip(&call.args).enumerate() {
                let mut path = vec![j];
                table.add_resolved(i, &field.typ, arg, &mut path)?;
            }
        }
        Ok(table)
    }

    fn add_resolved(
        &mut self,
        call: usize,
        typ: &Type,
        arg: &Arg,
        path: &mut Vec<usize>,
    ) -> Result<(), ResolveError> {
        match (typ, arg) {
            (
                Type::Ptr { elem, .. },
                Arg::Pointer {
                    addr: Some(addr),
                    pointee: Some(p),
                },
            ) => {
                let size = arg_size(elem, p).max(1);
                self.insert(
                    MemoryRange::new_range(*addr, size),
                    Owner {
                        call,
                        path: path.clone(),
                    },
                )?;
                self.add_resolved(call, elem, p, path)
            }
            (Type::Struct { fields, .. }, Arg::Group(items)) => {
                for (i, (f, a)) in fields.iter().zip(items).enumerate() {
                    path.push(i);
                    self.add_resolved(call, &f.typ, a, path)?;
                    path.pop();
                }
                Ok(())
            }
            (Type::Array { elem }, Arg::Group(items)) => {
                for (i, a) in items.iter().enumerate() {
                    path.push(i);
                    self.add_resolved(call, elem, a, path)?;
                    path.pop();
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

struct Allocator<'a> {
    table: &'a mut RegionTable,
    next: u64,
    end: u64,
}

impl<'a> Allocator<'a> {
    fn alloc(&mut self, owner: Owner, size: u64, align: u64) -> Result<u64, ResolveError> {
        if !align.is_power_of_two() {
            return Err(ResolveError::BadAlignment {
                call: owner.call,
                align,
            });
        }
        let addr = align_up(self.next, align);
        // Zero sized pointees still get a distinct address.
        let size = size.max(1);
        if addr + size > self.end {
            return Err(ResolveError::OutOfMemory {
                call: owner.call,
                needed: addr + size - self.end,
            });
        }
        self.table.insert(MemoryRange::new_range(addr, size), owner)?;
        self.next = addr + size;
        Ok(addr)
    }

    fn resolve(
        &mut self,
        call: usize,
        typ: &Type,
        arg: &mut Arg,
        path: &mut Vec<usize>,
    ) -> Result<(), ResolveError> {
        match (typ, arg) {
            (Type::Ptr { elem, .. }, Arg::Pointer { addr, pointee }) => {
                if let Some(p) = pointee {
                    if addr.is_none() {
                        let owner = Owner {
                            call,
                            path: path.clone(),
                        };
                        *addr = Some(self.alloc(owner, arg_size(elem, p), elem.align())?);
                    }
                    self.resolve(call, elem, p, path)?;
                }
                Ok(())
            }
            (Type::Struct { fields, .. }, Arg::Group(items)) => {
                for (i, (f, a)) in fields.iter().zip(items.iter_mut()).enumerate() {
                    path.push(i);
                    self.resolve(call, &f.typ, a, path)?;
                    path.pop();
                }
                Ok(())
            }
            (Type::Array { elem }, Arg::Group(items)) => {
                for (i, a) in items.iter_mut().enumerate() {
                    path.push(i);
                    self.resolve(call, elem, a, path)?;
                    path.pop();
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Assigns addresses to all placeholder pointers of `program` and prepends
/// the `mmap` call backing them. On error the program is left partially
/// resolved and should be dropped.
pub fn fill_out_memory<'t>(
    target: &'t Target,
    program: &mut Program<'t>,
) -> Result<RegionTable, ResolveError> {
    let mut table = RegionTable::rebuild(program)?;
    let start = table
        .end()
        .map_or(target.data_offset, |end| end.max(target.data_offset));
    let mut allocator = Allocator {
        table: &mut table,
        next: start,
        end: target.data_end(),
    };

    for (i, call) in program.calls.iter_mut().enumerate() {
        let meta = call.meta;
        for (j, (field, arg)) in meta.args.iter().zip(call.args.iter_mut()).enumerate() {
            let mut path = vec![j];
            allocator.resolve(i, &field.typ, arg, &mut path)?;
        }
    }

    let next = allocator.next;
    if next == start {
        return Ok(table);
    }

    let mmap = target.mmap_syscall().ok_or(ResolveError::NoMmap)?;
    let len = align_up(next - target.data_offset, target.page_size);
    let mmap_call = Call {
        meta: mmap,
        args: vec![
            Arg::Const(target.data_offset),
            Arg::Const(len),
            Arg::Const(PROT_READ_WRITE),
            Arg::Const(MAP_FIXED_ANON),
            Arg::literal(u64::MAX),
            Arg::Const(0),
        ],
    };
    program.calls.insert(0, mmap_call);
    shift_results(program, 1);

    // Owners recorded call indices before the shift.
    let mut shifted = RegionTable::new();
    for (range, owner) in table.iter() {
        shifted.insert(
            *range,
            Owner {
                call: owner.call + 1,
                path: owner.path.clone(),
            },
        )?;
    }
    Ok(shifted)
}

fn shift_results(program: &mut Program, by: usize) {
    fn shift(arg: &mut Arg, by: usize) {
        match arg {
            Arg::Result(r) => {
                if let Some(src) = &mut r.src {
                    src.call += by;
                }
            }
            Arg::Pointer {
                pointee: Some(p), ..
            } => shift(p, by),
            Arg::Group(items) => items.iter_mut().for_each(|a| shift(a, by)),
            _ => (),
        }
    }
    for call in &mut program.calls {
        call.args.iter_mut().for_each(|a| shift(a, by));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        prog::{
            builder::build_program, call_selector::DefaultCallSelector, DataArg, ResultArg,
            ResultSrc,
        },
        target::get_target,
        trace::trace_parser::parse_line,
    };

    fn program<'t>(target: &'t Target, lines: &[&str]) -> Program<'t> {
        let records: Vec<_> = lines
            .iter()
            .map(|l| parse_line(l).unwrap().unwrap())
            .collect();
        build_program(target, &DefaultCallSelector, &records).program
    }

    fn resolved<'t>(target: &'t Target, lines: &[&str]) -> Program<'t> {
        let mut p = program(target, lines);
        fill_out_memory(target, &mut p).unwrap();
        p
    }

    #[test]
    fn prepended_mmap_comes_from_the_target() {
        let target = get_target("linux", "amd64").unwrap();
        let p = resolved(&target, &["write(1, \"\\x61\", 1) = 1"]);
        assert_eq!(p.calls.len(), 2);
        assert!(std::ptr::eq(p.calls[0].meta, target.mmap_syscall().unwrap()));
    }

    #[test]
    fn allocates_without_overlap() {
        let target = get_target("linux", "amd64").unwrap();
        let mut p = program(
            &target,
            &[
                "openat(AT_FDCWD, \"\\x61\\x62\", O_RDONLY) = 3",
                "read(3, \"\\x78\\x79\\x7a\", 3) = 3",
                "nanosleep({tv_sec=0, tv_nsec=1000}, NULL) = 0",
            ],
        );
        let table = fill_out_memory(&target, &mut p).unwrap();
        assert_eq!(table.len(), 3);
        let ranges: Vec<MemoryRange> = table.iter().map(|(r, _)| *r).collect();
        let data_area = MemoryRange::from_range(target.data_offset, target.data_end());
        for (i, a) in ranges.iter().enumerate() {
            assert!(data_area.contains(a));
            for b in &ranges[i + 1..] {
                assert!(!a.intersects(b));
            }
        }

        assert_eq!(p.calls[0].meta.name, "mmap");
        assert_eq!(p.calls[0].args[1], Arg::Const(target.page_size));
        assert_eq!(
            p.calls[1].args[1],
            Arg::Pointer {
                addr: Some(0x20000000),
                pointee: Some(Box::new(Arg::Data(DataArg::In(b"ab\0".to_vec())))),
            }
        );
        // The timespec is 8 byte aligned after 3 + 3 bytes of strings.
        match &p.calls[3].args[0] {
            Arg::Pointer { addr, .. } => assert_eq!(*addr, Some(0x20000008)),
            a => panic!("unexpected {:?}", a),
        }
        assert_eq!(p.calls[3].args[1], Arg::null());
        // read's fd now points past the mmap.
        assert_eq!(
            p.calls[2].args[0],
            Arg::Result(ResultArg {
                val: 3,
                src: Some(ResultSrc::ret(1)),
            })
        );
        assert_eq!(table.iter().next().map(|(_, o)| o.call), Some(1));
    }

    #[test]
    fn nothing_to_allocate() {
        let target = get_target("linux", "amd64").unwrap();
        let mut p = program(&target, &["getpid() = 1", "close(0) = 0"]);
        let table = fill_out_memory(&target, &mut p).unwrap();
        assert!(table.is_empty());
        assert_eq!(p.calls.len(), 2);
    }

    #[test]
    fn data_area_exhausted() {
        let target = get_target("linux", "amd64").unwrap();
        let mut p = program(&target, &["getpid() = 1"]);
        let write = target.syscall("write").unwrap();
        let huge = vec![0u8; target.data_size() as usize + 1];
        p.calls.push(Call {
            meta: write,
            args: vec![
                Arg::literal(1),
                Arg::placeholder(Arg::Data(DataArg::In(huge))),
                Arg::Const(0),
            ],
        });
        match fill_out_memory(&target, &mut p) {
            Err(ResolveError::OutOfMemory { call: 1, needed }) => assert_eq!(needed, 1),
            r => panic!("unexpected {:?}", r.map(|t| t.len())),
        }
    }

    #[test]
    fn overlapping_regions_rejected() {
        let mut table = RegionTable::new();
        let owner = |call| Owner {
            call,
            path: vec![0],
        };
        table
            .insert(MemoryRange::new_range(0x20000000, 16), owner(0))
            .unwrap();
        assert_eq!(
            table.insert(MemoryRange::new_range(0x2000000f, 4), owner(1)),
            Err(ResolveError::Overlap {
                range: MemoryRange::new_range(0x2000000f, 4),
                owner: owner(0),
            })
        );
        table
            .insert(MemoryRange::new_range(0x20000010, 4), owner(1))
            .unwrap();
        assert_eq!(table.end(), Some(0x20000014));
    }

    #[test]
    fn bad_alignment() {
        let mut table = RegionTable::new();
        let mut allocator = Allocator {
            table: &mut table,
            next: 0x20000000,
            end: 0x21000000,
        };
        let owner = Owner {
            call: 2,
            path: vec![1],
        };
        assert_eq!(
            allocator.alloc(owner, 4, 3),
            Err(ResolveError::BadAlignment { call: 2, align: 3 })
        );
    }
}
