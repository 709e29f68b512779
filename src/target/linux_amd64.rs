//! Syscall descriptions and constants for linux/amd64.
//!
//! Only the calls that commonly show up in traces of ordinary programs are
//! described. Anything else is reported as unsupported by the call selector.

use super::{
    BufferKind, Dir, Field, ResourceKind, Syscall, Target, Type,
};
use crate::kernel_abi::SupportedArch;

const PAGE_SIZE: u64 = 4 << 10;
const DATA_OFFSET: u64 = 0x20000000;
const NUM_PAGES: u64 = (16 << 20) / PAGE_SIZE;

const STAT_SIZE: u64 = 144;
const UTSNAME_SIZE: u64 = 390;
const SOCKADDR_STORAGE_SIZE: u64 = 128;

const CONSTS: &[(&str, u64)] = &[
    ("O_RDONLY", 0x0),
    ("O_WRONLY", 0x1),
    ("O_RDWR", 0x2),
    ("O_CREAT", 0x40),
    ("O_EXCL", 0x80),
    ("O_NOCTTY", 0x100),
    ("O_TRUNC", 0x200),
    ("O_APPEND", 0x400),
    ("O_NONBLOCK", 0x800),
    ("O_DSYNC", 0x1000),
    ("O_ASYNC", 0x2000),
    ("O_DIRECT", 0x4000),
    ("O_LARGEFILE", 0x8000),
    ("O_DIRECTORY", 0x10000),
    ("O_NOFOLLOW", 0x20000),
    ("O_NOATIME", 0x40000),
    ("O_CLOEXEC", 0x80000),
    ("O_SYNC", 0x101000),
    ("O_PATH", 0x200000),
    ("O_TMPFILE", 0x410000),
    ("S_IFREG", 0x8000),
    ("S_IRWXU", 0x1c0),
    ("S_IRUSR", 0x100),
    ("S_IWUSR", 0x80),
    ("S_IXUSR", 0x40),
    ("S_IRWXG", 0x38),
    ("S_IRGRP", 0x20),
    ("S_IWGRP", 0x10),
    ("S_IXGRP", 0x8),
    ("S_IRWXO", 0x7),
    ("S_IROTH", 0x4),
    ("S_IWOTH", 0x2),
    ("S_IXOTH", 0x1),
    ("F_OK", 0x0),
    ("X_OK", 0x1),
    ("W_OK", 0x2),
    ("R_OK", 0x4),
    ("AT_FDCWD", 0xffffffffffffff9c),
    ("AT_SYMLINK_NOFOLLOW", 0x100),
    ("AT_REMOVEDIR", 0x200),
    ("AT_SYMLINK_FOLLOW", 0x400),
    ("AT_NO_AUTOMOUNT", 0x800),
    ("AT_EMPTY_PATH", 0x1000),
    ("SEEK_SET", 0x0),
    ("SEEK_CUR", 0x1),
    ("SEEK_END", 0x2),
    ("SEEK_DATA", 0x3),
    ("SEEK_HOLE", 0x4),
    ("PROT_NONE", 0x0),
    ("PROT_READ", 0x1),
    ("PROT_WRITE", 0x2),
    ("PROT_EXEC", 0x4),
    ("MAP_SHARED", 0x1),
    ("MAP_PRIVATE", 0x2),
    ("MAP_FIXED", 0x10),
    ("MAP_ANONYMOUS", 0x20),
    ("MAP_32BIT", 0x40),
    ("MAP_GROWSDOWN", 0x100),
    ("MAP_DENYWRITE", 0x800),
    ("MAP_EXECUTABLE", 0x1000),
    ("MAP_LOCKED", 0x2000),
    ("MAP_NORESERVE", 0x4000),
    ("MAP_POPULATE", 0x8000),
    ("MAP_NONBLOCK", 0x10000),
    ("MAP_STACK", 0x20000),
    ("AF_UNSPEC", 0x0),
    ("AF_UNIX", 0x1),
    ("AF_LOCAL", 0x1),
    ("AF_INET", 0x2),
    ("AF_INET6", 0xa),
    ("AF_NETLINK", 0x10),
    ("AF_PACKET", 0x11),
    ("SOCK_STREAM", 0x1),
    ("SOCK_DGRAM", 0x2),
    ("SOCK_RAW", 0x3),
    ("SOCK_SEQPACKET", 0x5),
    ("SOCK_NONBLOCK", 0x800),
    ("SOCK_CLOEXEC", 0x80000),
    ("IPPROTO_IP", 0x0),
    ("IPPROTO_ICMP", 0x1),
    ("IPPROTO_TCP", 0x6),
    ("IPPROTO_UDP", 0x11),
    ("MSG_OOB", 0x1),
    ("MSG_PEEK", 0x2),
    ("MSG_DONTROUTE", 0x4),
    ("MSG_TRUNC", 0x20),
    ("MSG_DONTWAIT", 0x40),
    ("MSG_EOR", 0x80),
    ("MSG_WAITALL", 0x100),
    ("MSG_NOSIGNAL", 0x4000),
    ("MSG_MORE", 0x8000),
    ("SHUT_RD", 0x0),
    ("SHUT_WR", 0x1),
    ("SHUT_RDWR", 0x2),
    ("F_DUPFD", 0x0),
    ("F_GETFD", 0x1),
    ("F_SETFD", 0x2),
    ("F_GETFL", 0x3),
    ("F_SETFL", 0x4),
    ("F_SETLK", 0x6),
    ("F_SETLKW", 0x7),
    ("F_DUPFD_CLOEXEC", 0x406),
    ("FD_CLOEXEC", 0x1),
    ("EFD_SEMAPHORE", 0x1),
    ("EFD_NONBLOCK", 0x800),
    ("EFD_CLOEXEC", 0x80000),
    ("EPOLL_CLOEXEC", 0x80000),
    ("MFD_CLOEXEC", 0x1),
    ("MFD_ALLOW_SEALING", 0x2),
    ("MFD_HUGETLB", 0x4),
    ("CLOCK_REALTIME", 0x0),
    ("CLOCK_MONOTONIC", 0x1),
    ("CLOCK_PROCESS_CPUTIME_ID", 0x2),
    ("CLOCK_THREAD_CPUTIME_ID", 0x3),
    ("CLOCK_MONOTONIC_RAW", 0x4),
    ("CLOCK_REALTIME_COARSE", 0x5),
    ("CLOCK_MONOTONIC_COARSE", 0x6),
    ("CLOCK_BOOTTIME", 0x7),
    ("GRND_NONBLOCK", 0x1),
    ("GRND_RANDOM", 0x2),
    ("SIGHUP", 0x1),
    ("SIGINT", 0x2),
    ("SIGKILL", 0x9),
    ("SIGUSR1", 0xa),
    ("SIGUSR2", 0xc),
    ("SIGPIPE", 0xd),
    ("SIGALRM", 0xe),
    ("SIGTERM", 0xf),
    ("SIGCHLD", 0x11),
    ("SIGCONT", 0x12),
    ("SIGSTOP", 0x13),
];

const OPEN_FLAGS: &[&str] = &[
    "O_RDONLY",
    "O_WRONLY",
    "O_RDWR",
    "O_CREAT",
    "O_EXCL",
    "O_NOCTTY",
    "O_TRUNC",
    "O_APPEND",
    "O_NONBLOCK",
    "O_DSYNC",
    "O_ASYNC",
    "O_DIRECT",
    "O_LARGEFILE",
    "O_DIRECTORY",
    "O_NOFOLLOW",
    "O_NOATIME",
    "O_CLOEXEC",
    "O_SYNC",
    "O_PATH",
    "O_TMPFILE",
];

const MODE_FLAGS: &[&str] = &[
    "S_IRWXU", "S_IRUSR", "S_IWUSR", "S_IXUSR", "S_IRWXG", "S_IRGRP", "S_IWGRP", "S_IXGRP",
    "S_IRWXO", "S_IROTH", "S_IWOTH", "S_IXOTH",
];

const AT_FLAGS: &[&str] = &[
    "AT_SYMLINK_NOFOLLOW",
    "AT_REMOVEDIR",
    "AT_SYMLINK_FOLLOW",
    "AT_NO_AUTOMOUNT",
    "AT_EMPTY_PATH",
];

const PROT_FLAGS: &[&str] = &["PROT_NONE", "PROT_READ", "PROT_WRITE", "PROT_EXEC"];

const MMAP_FLAGS: &[&str] = &[
    "MAP_SHARED",
    "MAP_PRIVATE",
    "MAP_FIXED",
    "MAP_ANONYMOUS",
    "MAP_32BIT",
    "MAP_GROWSDOWN",
    "MAP_DENYWRITE",
    "MAP_EXECUTABLE",
    "MAP_LOCKED",
    "MAP_NORESERVE",
    "MAP_POPULATE",
    "MAP_NONBLOCK",
    "MAP_STACK",
];

const SOCKET_DOMAINS: &[&str] = &["AF_UNSPEC", "AF_UNIX", "AF_INET", "AF_INET6", "AF_NETLINK", "AF_PACKET"];

const SOCKET_TYPES: &[&str] = &[
    "SOCK_STREAM",
    "SOCK_DGRAM",
    "SOCK_RAW",
    "SOCK_SEQPACKET",
    "SOCK_NONBLOCK",
    "SOCK_CLOEXEC",
];

const MSG_FLAGS: &[&str] = &[
    "MSG_OOB",
    "MSG_PEEK",
    "MSG_DONTROUTE",
    "MSG_TRUNC",
    "MSG_DONTWAIT",
    "MSG_EOR",
    "MSG_WAITALL",
    "MSG_NOSIGNAL",
    "MSG_MORE",
];

const CLOCK_IDS: &[&str] = &[
    "CLOCK_REALTIME",
    "CLOCK_MONOTONIC",
    "CLOCK_PROCESS_CPUTIME_ID",
    "CLOCK_THREAD_CPUTIME_ID",
    "CLOCK_MONOTONIC_RAW",
    "CLOCK_REALTIME_COARSE",
    "CLOCK_MONOTONIC_COARSE",
    "CLOCK_BOOTTIME",
];

const FCNTL_CMDS: &[&str] = &[
    "F_DUPFD",
    "F_GETFD",
    "F_SETFD",
    "F_GETFL",
    "F_SETFL",
    "F_SETLK",
    "F_SETLKW",
    "F_DUPFD_CLOEXEC",
];

fn int(size: u64) -> Type {
    Type::Int { size }
}

fn flags(size: u64, values: &[&'static str]) -> Type {
    Type::Flags {
        size,
        values: values.to_vec(),
    }
}

fn konst(size: u64, val: u64) -> Type {
    Type::Const { size, val }
}

fn len(size: u64, of: &'static str) -> Type {
    Type::Len { size, of }
}

fn res(kind: ResourceKind) -> Type {
    Type::Resource { kind }
}

fn fd() -> Type {
    res(ResourceKind::Fd)
}

fn sock() -> Type {
    res(ResourceKind::Sock)
}

fn ptr(dir: Dir, elem: Type) -> Type {
    Type::Ptr {
        dir,
        elem: Box::new(elem),
    }
}

fn buffer(kind: BufferKind) -> Type {
    Type::Buffer { kind }
}

fn filename() -> Type {
    ptr(Dir::In, buffer(BufferKind::Filename))
}

fn array(elem: Type) -> Type {
    Type::Array {
        elem: Box::new(elem),
    }
}

fn f(name: &'static str, typ: Type) -> Field {
    Field::new(name, typ)
}

fn timespec() -> Type {
    Type::Struct {
        name: "timespec",
        fields: vec![f("tv_sec", int(8)), f("tv_nsec", int(8))],
    }
}

fn sockaddr_in() -> Type {
    Type::Struct {
        name: "sockaddr_in",
        fields: vec![
            f("sin_family", konst(2, 0x2)),
            f("sin_port", int(2)),
            f("sin_addr", int(4)),
            f("pad", buffer(BufferKind::Fixed(8))),
        ],
    }
}

fn sockaddr_un() -> Type {
    Type::Struct {
        name: "sockaddr_un",
        fields: vec![
            f("sun_family", konst(2, 0x1)),
            f("sun_path", buffer(BufferKind::Fixed(108))),
        ],
    }
}

fn call(
    name: &str,
    call_name: &'static str,
    nr: u64,
    args: Vec<Field>,
    ret: Option<ResourceKind>,
) -> Syscall {
    Syscall {
        id: 0,
        nr,
        name: name.to_owned(),
        call_name,
        args,
        ret,
    }
}

fn syscalls() -> Vec<Syscall> {
    use ResourceKind::*;
    vec![
        call(
            "read",
            "read",
            0,
            vec![
                f("fd", fd()),
                f("buf", ptr(Dir::Out, buffer(BufferKind::Blob))),
                f("count", len(8, "buf")),
            ],
            None,
        ),
        call(
            "write",
            "write",
            1,
            vec![
                f("fd", fd()),
                f("buf", ptr(Dir::In, buffer(BufferKind::Blob))),
                f("count", len(8, "buf")),
            ],
            None,
        ),
        call(
            "open",
            "open",
            2,
            vec![
                f("file", filename()),
                f("flags", flags(4, OPEN_FLAGS)),
                f("mode", flags(4, MODE_FLAGS)),
            ],
            Some(Fd),
        ),
        call("close", "close", 3, vec![f("fd", fd())], None),
        call(
            "stat",
            "stat",
            4,
            vec![
                f("file", filename()),
                f("statbuf", ptr(Dir::Out, buffer(BufferKind::Fixed(STAT_SIZE)))),
            ],
            None,
        ),
        call(
            "fstat",
            "fstat",
            5,
            vec![
                f("fd", fd()),
                f("statbuf", ptr(Dir::Out, buffer(BufferKind::Fixed(STAT_SIZE)))),
            ],
            None,
        ),
        call(
            "lstat",
            "lstat",
            6,
            vec![
                f("file", filename()),
                f("statbuf", ptr(Dir::Out, buffer(BufferKind::Fixed(STAT_SIZE)))),
            ],
            None,
        ),
        call(
            "lseek",
            "lseek",
            8,
            vec![
                f("fd", fd()),
                f("offset", int(8)),
                f("whence", flags(4, &["SEEK_SET", "SEEK_CUR", "SEEK_END", "SEEK_DATA", "SEEK_HOLE"])),
            ],
            None,
        ),
        call(
            "mmap",
            "mmap",
            9,
            vec![
                f("addr", int(8)),
                f("len", int(8)),
                f("prot", flags(4, PROT_FLAGS)),
                f("flags", flags(4, MMAP_FLAGS)),
                f("fd", fd()),
                f("offset", int(8)),
            ],
            None,
        ),
        call(
            "mprotect",
            "mprotect",
            10,
            vec![
                f("addr", int(8)),
                f("len", int(8)),
                f("prot", flags(4, PROT_FLAGS)),
            ],
            None,
        ),
        call(
            "munmap",
            "munmap",
            11,
            vec![f("addr", int(8)), f("len", int(8))],
            None,
        ),
        call(
            "pread64",
            "pread64",
            17,
            vec![
                f("fd", fd()),
                f("buf", ptr(Dir::Out, buffer(BufferKind::Blob))),
                f("count", len(8, "buf")),
                f("pos", int(8)),
            ],
            None,
        ),
        call(
            "pwrite64",
            "pwrite64",
            18,
            vec![
                f("fd", fd()),
                f("buf", ptr(Dir::In, buffer(BufferKind::Blob))),
                f("count", len(8, "buf")),
                f("pos", int(8)),
            ],
            None,
        ),
        call(
            "access",
            "access",
            21,
            vec![
                f("pathname", filename()),
                f("mode", flags(4, &["F_OK", "X_OK", "W_OK", "R_OK"])),
            ],
            None,
        ),
        call(
            "pipe",
            "pipe",
            22,
            vec![f("pipefd", ptr(Dir::Out, array(fd())))],
            None,
        ),
        call("sched_yield", "sched_yield", 24, vec![], None),
        call("dup", "dup", 32, vec![f("oldfd", fd())], Some(Fd)),
        call(
            "dup2",
            "dup2",
            33,
            vec![f("oldfd", fd()), f("newfd", fd())],
            Some(Fd),
        ),
        call(
            "nanosleep",
            "nanosleep",
            35,
            vec![
                f("req", ptr(Dir::In, timespec())),
                f("rem", ptr(Dir::Out, timespec())),
            ],
            None,
        ),
        call("getpid", "getpid", 39, vec![], Some(Pid)),
        call(
            "socket$inet",
            "socket",
            41,
            vec![
                f("domain", konst(4, 0x2)),
                f("type", flags(4, SOCKET_TYPES)),
                f("proto", int(4)),
            ],
            Some(Sock),
        ),
        call(
            "socket$unix",
            "socket",
            41,
            vec![
                f("domain", konst(4, 0x1)),
                f("type", flags(4, SOCKET_TYPES)),
                f("proto", int(4)),
            ],
            Some(Sock),
        ),
        call(
            "socket",
            "socket",
            41,
            vec![
                f("domain", flags(4, SOCKET_DOMAINS)),
                f("type", flags(4, SOCKET_TYPES)),
                f("proto", int(4)),
            ],
            Some(Sock),
        ),
        call(
            "connect$inet",
            "connect",
            42,
            vec![
                f("fd", sock()),
                f("addr", ptr(Dir::In, sockaddr_in())),
                f("addrlen", len(4, "addr")),
            ],
            None,
        ),
        call(
            "connect$unix",
            "connect",
            42,
            vec![
                f("fd", sock()),
                f("addr", ptr(Dir::In, sockaddr_un())),
                f("addrlen", len(4, "addr")),
            ],
            None,
        ),
        call(
            "connect",
            "connect",
            42,
            vec![
                f("fd", sock()),
                f("addr", ptr(Dir::In, buffer(BufferKind::Blob))),
                f("addrlen", len(4, "addr")),
            ],
            None,
        ),
        call(
            "accept",
            "accept",
            43,
            vec![
                f("fd", sock()),
                f("peer", ptr(Dir::Out, buffer(BufferKind::Fixed(SOCKADDR_STORAGE_SIZE)))),
                f("peerlen", ptr(Dir::InOut, int(4))),
            ],
            Some(Sock),
        ),
        call(
            "sendto",
            "sendto",
            44,
            vec![
                f("fd", sock()),
                f("buf", ptr(Dir::In, buffer(BufferKind::Blob))),
                f("len", len(8, "buf")),
                f("flags", flags(4, MSG_FLAGS)),
                f("addr", ptr(Dir::In, buffer(BufferKind::Blob))),
                f("addrlen", len(4, "addr")),
            ],
            None,
        ),
        call(
            "recvfrom",
            "recvfrom",
            45,
            vec![
                f("fd", sock()),
                f("buf", ptr(Dir::Out, buffer(BufferKind::Blob))),
                f("len", len(8, "buf")),
                f("flags", flags(4, MSG_FLAGS)),
                f("addr", ptr(Dir::Out, buffer(BufferKind::Fixed(SOCKADDR_STORAGE_SIZE)))),
                f("addrlen", ptr(Dir::InOut, int(4))),
            ],
            None,
        ),
        call(
            "shutdown",
            "shutdown",
            48,
            vec![
                f("fd", sock()),
                f("how", flags(4, &["SHUT_RD", "SHUT_WR", "SHUT_RDWR"])),
            ],
            None,
        ),
        call(
            "bind$inet",
            "bind",
            49,
            vec![
                f("fd", sock()),
                f("addr", ptr(Dir::In, sockaddr_in())),
                f("addrlen", len(4, "addr")),
            ],
            None,
        ),
        call(
            "bind$unix",
            "bind",
            49,
            vec![
                f("fd", sock()),
                f("addr", ptr(Dir::In, sockaddr_un())),
                f("addrlen", len(4, "addr")),
            ],
            None,
        ),
        call(
            "bind",
            "bind",
            49,
            vec![
                f("fd", sock()),
                f("addr", ptr(Dir::In, buffer(BufferKind::Blob))),
                f("addrlen", len(4, "addr")),
            ],
            None,
        ),
        call(
            "listen",
            "listen",
            50,
            vec![f("fd", sock()), f("backlog", int(4))],
            None,
        ),
        call(
            "socketpair",
            "socketpair",
            53,
            vec![
                f("domain", flags(4, SOCKET_DOMAINS)),
                f("type", flags(4, SOCKET_TYPES)),
                f("proto", int(4)),
                f("fds", ptr(Dir::Out, array(sock()))),
            ],
            None,
        ),
        call(
            "kill",
            "kill",
            62,
            vec![f("pid", res(Pid)), f("sig", int(4))],
            None,
        ),
        call(
            "uname",
            "uname",
            63,
            vec![f("buf", ptr(Dir::Out, buffer(BufferKind::Fixed(UTSNAME_SIZE))))],
            None,
        ),
        call(
            "fcntl",
            "fcntl",
            72,
            vec![
                f("fd", fd()),
                f("cmd", flags(4, FCNTL_CMDS)),
                f("arg", int(8)),
            ],
            None,
        ),
        call("fsync", "fsync", 74, vec![f("fd", fd())], None),
        call(
            "ftruncate",
            "ftruncate",
            77,
            vec![f("fd", fd()), f("len", int(8))],
            None,
        ),
        call(
            "getcwd",
            "getcwd",
            79,
            vec![
                f("buf", ptr(Dir::Out, buffer(BufferKind::Blob))),
                f("size", len(8, "buf")),
            ],
            None,
        ),
        call("chdir", "chdir", 80, vec![f("dir", filename())], None),
        call("fchdir", "fchdir", 81, vec![f("fd", fd())], None),
        call(
            "rename",
            "rename",
            82,
            vec![f("old", filename()), f("new", filename())],
            None,
        ),
        call(
            "mkdir",
            "mkdir",
            83,
            vec![f("path", filename()), f("mode", flags(4, MODE_FLAGS))],
            None,
        ),
        call("rmdir", "rmdir", 84, vec![f("path", filename())], None),
        call("unlink", "unlink", 87, vec![f("path", filename())], None),
        call("umask", "umask", 95, vec![f("mask", flags(4, MODE_FLAGS))], None),
        call("getuid", "getuid", 102, vec![], Some(Uid)),
        call("getgid", "getgid", 104, vec![], Some(Gid)),
        call("geteuid", "geteuid", 107, vec![], Some(Uid)),
        call("getegid", "getegid", 108, vec![], Some(Gid)),
        call("getppid", "getppid", 110, vec![], Some(Pid)),
        call(
            "clock_gettime",
            "clock_gettime",
            228,
            vec![
                f("id", flags(4, CLOCK_IDS)),
                f("tp", ptr(Dir::Out, timespec())),
            ],
            None,
        ),
        call(
            "openat",
            "openat",
            257,
            vec![
                f("fd", fd()),
                f("file", filename()),
                f("flags", flags(4, OPEN_FLAGS)),
                f("mode", flags(4, MODE_FLAGS)),
            ],
            Some(Fd),
        ),
        call(
            "mkdirat",
            "mkdirat",
            258,
            vec![
                f("fd", fd()),
                f("path", filename()),
                f("mode", flags(4, MODE_FLAGS)),
            ],
            None,
        ),
        call(
            "newfstatat",
            "newfstatat",
            262,
            vec![
                f("dirfd", fd()),
                f("file", filename()),
                f("statbuf", ptr(Dir::Out, buffer(BufferKind::Fixed(STAT_SIZE)))),
                f("flags", flags(4, AT_FLAGS)),
            ],
            None,
        ),
        call(
            "unlinkat",
            "unlinkat",
            263,
            vec![
                f("fd", fd()),
                f("path", filename()),
                f("flags", flags(4, AT_FLAGS)),
            ],
            None,
        ),
        call(
            "eventfd2",
            "eventfd2",
            290,
            vec![
                f("initval", int(4)),
                f("flags", flags(4, &["EFD_SEMAPHORE", "EFD_NONBLOCK", "EFD_CLOEXEC"])),
            ],
            Some(Fd),
        ),
        call(
            "epoll_create1",
            "epoll_create1",
            291,
            vec![f("flags", flags(4, &["EPOLL_CLOEXEC"]))],
            Some(Fd),
        ),
        call(
            "dup3",
            "dup3",
            292,
            vec![
                f("oldfd", fd()),
                f("newfd", fd()),
                f("flags", flags(4, &["O_CLOEXEC"])),
            ],
            Some(Fd),
        ),
        call(
            "pipe2",
            "pipe2",
            293,
            vec![
                f("pipefd", ptr(Dir::Out, array(fd()))),
                f("flags", flags(4, &["O_NONBLOCK", "O_CLOEXEC", "O_DIRECT"])),
            ],
            None,
        ),
        call(
            "getrandom",
            "getrandom",
            318,
            vec![
                f("buf", ptr(Dir::Out, buffer(BufferKind::Blob))),
                f("len", len(8, "buf")),
                f("flags", flags(4, &["GRND_NONBLOCK", "GRND_RANDOM"])),
            ],
            None,
        ),
        call(
            "memfd_create",
            "memfd_create",
            319,
            vec![
                f("name", ptr(Dir::In, buffer(BufferKind::String))),
                f("flags", flags(4, &["MFD_CLOEXEC", "MFD_ALLOW_SEALING", "MFD_HUGETLB"])),
            ],
            Some(Fd),
        ),
    ]
}

pub fn target() -> Target {
    Target::new(
        "linux",
        SupportedArch::X64,
        PAGE_SIZE,
        DATA_OFFSET,
        NUM_PAGES,
        syscalls(),
        CONSTS,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flag_names_are_defined() {
        let t = target();
        for c in &t.syscalls {
            for a in &c.args {
                if let Type::Flags { values, .. } = &a.typ {
                    for v in values {
                        assert!(t.const_value(v).is_some(), "{} in {}", v, c.name);
                    }
                }
            }
        }
    }

    #[test]
    fn len_fields_name_a_sibling() {
        let t = target();
        for c in &t.syscalls {
            for a in &c.args {
                if let Type::Len { of, .. } = &a.typ {
                    assert!(c.args.iter().any(|s| s.name == *of), "{} in {}", of, c.name);
                }
            }
        }
    }

    #[test]
    fn fixed_size_structs() {
        assert_eq!(sockaddr_in().static_size(), Some(16));
        assert_eq!(sockaddr_un().static_size(), Some(110));
        assert_eq!(timespec().static_size(), Some(16));
    }
}
