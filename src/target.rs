//! Syscall descriptions for a single OS/architecture pair.
//!
//! A `Target` is built once and then only read. Everything that needs syscall
//! schemas or named constants takes a `&Target`; there is no global instance.

use crate::kernel_abi::SupportedArch;
use std::{
    collections::HashMap,
    error::Error,
    fmt::{self, Display, Formatter},
};

pub mod linux_amd64;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Dir {
    In,
    Out,
    InOut,
}

impl Dir {
    pub fn reads(self) -> bool {
        self != Dir::Out
    }

    pub fn writes(self) -> bool {
        self != Dir::In
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum BufferKind {
    /// Arbitrary bytes.
    Blob,
    /// Bytes of a known fixed size, typically an output struct we don't describe field by field.
    Fixed(u64),
    /// NUL terminated string.
    String,
    /// NUL terminated path.
    Filename,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ResourceKind {
    Fd,
    Sock,
    Pid,
    Uid,
    Gid,
}

/// -1 as an unsigned 64 bit value.
const INVALID: u64 = u64::MAX;
/// AT_FDCWD (-100) as an unsigned 64 bit value.
const AT_FDCWD: u64 = 0xffffffffffffff9c;

impl ResourceKind {
    pub fn name(self) -> &'static str {
        match self {
            ResourceKind::Fd => "fd",
            ResourceKind::Sock => "sock",
            ResourceKind::Pid => "pid",
            ResourceKind::Uid => "uid",
            ResourceKind::Gid => "gid",
        }
    }

    pub fn size(self) -> u64 {
        4
    }

    /// Values that are meaningful without having been produced by an earlier call.
    /// The first one is the default.
    pub fn special_values(self) -> &'static [u64] {
        match self {
            ResourceKind::Fd => &[INVALID, AT_FDCWD],
            ResourceKind::Sock => &[INVALID],
            ResourceKind::Pid => &[0, INVALID],
            ResourceKind::Uid | ResourceKind::Gid => &[0, INVALID],
        }
    }

    pub fn default_value(self) -> u64 {
        self.special_values()[0]
    }

    /// Can a resource of kind `produced` be passed where `self` is expected?
    /// Sockets are file descriptors; the reverse doesn't hold.
    pub fn accepts(self, produced: ResourceKind) -> bool {
        self == produced || (self == ResourceKind::Fd && produced == ResourceKind::Sock)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    Int { size: u64 },
    /// Integer built by OR-ing named constants.
    Flags { size: u64, values: Vec<&'static str> },
    Const { size: u64, val: u64 },
    /// Byte length (or element count for arrays) of the sibling field `of`.
    Len { size: u64, of: &'static str },
    Resource { kind: ResourceKind },
    Ptr { dir: Dir, elem: Box<Type> },
    Buffer { kind: BufferKind },
    Struct { name: &'static str, fields: Vec<Field> },
    Array { elem: Box<Type> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub typ: Type,
}

impl Field {
    pub fn new(name: &'static str, typ: Type) -> Field {
        Field { name, typ }
    }
}

impl Type {
    /// Size in bytes when it doesn't depend on the argument value.
    pub fn static_size(&self) -> Option<u64> {
        match self {
            Type::Int { size }
            | Type::Flags { size, .. }
            | Type::Const { size, .. }
            | Type::Len { size, .. } => Some(*size),
            Type::Resource { kind } => Some(kind.size()),
            Type::Ptr { .. } => Some(8),
            Type::Buffer {
                kind: BufferKind::Fixed(len),
            } => Some(*len),
            Type::Buffer { .. } | Type::Array { .. } => None,
            Type::Struct { fields, .. } => {
                let mut offset = 0;
                for f in fields {
                    offset = align_up(offset, f.typ.align());
                    offset += f.typ.static_size()?;
                }
                Some(align_up(offset, self.align()))
            }
        }
    }

    pub fn align(&self) -> u64 {
        match self {
            Type::Int { size }
            | Type::Flags { size, .. }
            | Type::Const { size, .. }
            | Type::Len { size, .. } => *size,
            Type::Resource { kind } => kind.size(),
            Type::Ptr { .. } => 8,
            Type::Buffer { .. } => 1,
            Type::Array { elem } => elem.align(),
            Type::Struct { fields, .. } => fields.iter().map(|f| f.typ.align()).max().unwrap_or(1),
        }
    }

    pub fn resource_kind(&self) -> Option<ResourceKind> {
        match self {
            Type::Resource { kind } => Some(*kind),
            _ => None,
        }
    }
}

/// Rounds `offset` up to a multiple of `align`, which must be a power of two.
pub fn align_up(offset: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

#[derive(Clone, Debug)]
pub struct Syscall {
    /// Index into `Target::syscalls`.
    pub id: usize,
    /// Kernel syscall number.
    pub nr: u64,
    /// Full name, including a `$variant` suffix if any, e.g. `socket$inet`.
    pub name: String,
    /// The kernel call this describes, e.g. `socket`.
    pub call_name: &'static str,
    pub args: Vec<Field>,
    pub ret: Option<ResourceKind>,
}

#[derive(Debug)]
pub enum TargetError {
    UnknownOs(String),
    UnknownArch(String),
    Unsupported { os: String, arch: SupportedArch },
}

impl Display for TargetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TargetError::UnknownOs(os) => write!(f, "unknown os `{}`", os),
            TargetError::UnknownArch(arch) => write!(f, "unknown arch `{}`", arch),
            TargetError::Unsupported { os, arch } => {
                write!(f, "no syscall descriptions for {}/{}", os, arch)
            }
        }
    }
}

impl Error for TargetError {}

pub struct Target {
    pub os: &'static str,
    pub arch: SupportedArch,
    pub page_size: u64,
    /// Start of the synthetic address range pointer arguments are allocated in.
    pub data_offset: u64,
    pub num_pages: u64,
    pub syscalls: Vec<Syscall>,
    syscall_map: HashMap<String, usize>,
    consts: HashMap<&'static str, u64>,
}

impl Target {
    pub fn new(
        os: &'static str,
        arch: SupportedArch,
        page_size: u64,
        data_offset: u64,
        num_pages: u64,
        mut syscalls: Vec<Syscall>,
        consts: &[(&'static str, u64)],
    ) -> Target {
        let mut syscall_map = HashMap::new();
        for (i, c) in syscalls.iter_mut().enumerate() {
            c.id = i;
            syscall_map.insert(c.name.clone(), i);
        }
        Target {
            os,
            arch,
            page_size,
            data_offset,
            num_pages,
            syscalls,
            syscall_map,
            consts: consts.iter().copied().collect(),
        }
    }

    pub fn syscall(&self, name: &str) -> Option<&Syscall> {
        self.syscall_map.get(name).map(|&i| &self.syscalls[i])
    }

    /// All descriptors for the kernel call `call_name`, variants included.
    pub fn variants(&self, call_name: &str) -> Vec<&Syscall> {
        self.syscalls
            .iter()
            .filter(|c| c.call_name == call_name)
            .collect()
    }

    pub fn const_value(&self, name: &str) -> Option<u64> {
        self.consts.get(name).copied()
    }

    pub fn data_size(&self) -> u64 {
        self.page_size * self.num_pages
    }

    pub fn data_end(&self) -> u64 {
        self.data_offset + self.data_size()
    }

    /// The call used to map the data area. Every target needs one for memory resolution.
    pub fn mmap_syscall(&self) -> Option<&Syscall> {
        self.syscall("mmap")
    }
}

pub fn get_target(os: &str, arch_name: &str) -> Result<Target, TargetError> {
    let arch = SupportedArch::from_name(arch_name)
        .ok_or_else(|| TargetError::UnknownArch(arch_name.to_owned()))?;
    match (os, arch) {
        ("linux", SupportedArch::X64) => Ok(linux_amd64::target()),
        ("linux", _) => Err(TargetError::Unsupported {
            os: os.to_owned(),
            arch,
        }),
        _ => Err(TargetError::UnknownOs(os.to_owned())),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn struct_layout() {
        let t = Type::Struct {
            name: "s",
            fields: vec![
                Field::new("a", Type::Int { size: 2 }),
                Field::new("b", Type::Int { size: 8 }),
                Field::new("c", Type::Int { size: 1 }),
            ],
        };
        assert_eq!(t.align(), 8);
        assert_eq!(t.static_size(), Some(24));
        assert_eq!(Type::Buffer { kind: BufferKind::Blob }.static_size(), None);
    }

    #[test]
    fn resource_compat() {
        assert!(ResourceKind::Fd.accepts(ResourceKind::Sock));
        assert!(!ResourceKind::Sock.accepts(ResourceKind::Fd));
        assert!(!ResourceKind::Pid.accepts(ResourceKind::Fd));
        assert_eq!(ResourceKind::Fd.default_value(), u64::MAX);
    }

    #[test]
    fn only_linux_amd64() {
        let target = get_target("linux", "amd64").unwrap();
        assert_eq!(target.os, "linux");
        assert!(target.mmap_syscall().is_some());
        assert!(target.syscall("openat").is_some());
        assert_eq!(target.const_value("O_CREAT"), Some(0x40));
        assert!(match get_target("linux", "386") {
            Err(TargetError::Unsupported { .. }) => true,
            _ => false,
        });
        assert!(get_target("freebsd", "amd64").is_err());
        assert!(get_target("linux", "sparc").is_err());
    }

    #[test]
    fn syscall_ids_are_indices() {
        let target = get_target("linux", "amd64").unwrap();
        for (i, c) in target.syscalls.iter().enumerate() {
            assert_eq!(c.id, i);
            assert_eq!(target.syscall(&c.name).unwrap().id, i);
        }
        assert!(target.variants("socket").len() >= 2);
    }
}
