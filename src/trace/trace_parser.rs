//! Reads strace output into a `TraceTree`.
//!
//! Expected invocation: `strace -o trace -a 1 -s 65500 -v -xx -f -Xraw ./a.out`.
//! Lines look like `1234 openat(AT_FDCWD, "\x2e\x2f", O_RDONLY) = 3`. With `-f`
//! calls of different processes interleave and strace splits them into an
//! `<unfinished ...>` line and a later `<... name resumed>` line; those are
//! glued back together per pid before parsing.

use super::trace_tree::{TraceRecord, TraceTree, TraceValue};
use crate::{kernel_metadata::errno_from_name, log::LogLevel::LogDebug};
use libc::pid_t;
use memchr::memchr;
use regex::Regex;
use std::{
    collections::HashMap,
    error::Error,
    fmt::{self, Display, Formatter},
    fs, io,
    path::Path,
};

lazy_static! {
    // Optional pid (`1234 ` or `[pid 1234] `) followed by an optional `-t`/`-tt`/`-ttt` timestamp.
    static ref LINE_PREFIX: Regex = Regex::new(
        r"^(?:\[pid\s+(?P<bpid>\d+)\]\s+|(?P<pid>\d+)\s+)?(?:\d+:\d{2}:\d{2}(?:\.\d+)?\s+|\d+\.\d+\s+)?"
    )
    .unwrap();

    static ref RESUMED: Regex = Regex::new(r"^<\.\.\.\s+(?P<name>[\w$]+)\s+resumed>\s?").unwrap();

    // ` = 3`, ` = -1 ENOENT (No such file or directory)`, ` = 0x7f0000000000`, ` = ?`,
    // ` = 3</dev/null>` (with -y)
    static ref RESULT: Regex = Regex::new(
        r"^\s*=\s*(?P<ret>-?0x[0-9a-fA-F]+|-?\d+|\?)(?:<[^>]*>)?(?:\s+(?P<errno>E[A-Z0-9_]+))?"
    )
    .unwrap();
}

const UNFINISHED: &str = "<unfinished ...>";

#[derive(Debug)]
pub struct ParseError {
    pub msg: String,
    pub pos: usize,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.msg, self.pos)
    }
}

impl Error for ParseError {}

/// Parses the trace at `path`. `Ok(None)` means the file held no syscalls.
pub fn parse(path: &Path) -> io::Result<Option<TraceTree>> {
    let data = fs::read(path)?;
    let filename = path
        .file_name()
        .map_or_else(|| path.to_string_lossy(), |n| n.to_string_lossy())
        .into_owned();
    Ok(parse_str(&filename, &String::from_utf8_lossy(&data)))
}

pub fn parse_str(filename: &str, contents: &str) -> Option<TraceTree> {
    let mut tree: Option<TraceTree> = None;
    let mut unfinished: HashMap<pid_t, String> = HashMap::new();

    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let caps = match LINE_PREFIX.captures(line) {
            Some(caps) => caps,
            None => continue,
        };
        let pid: pid_t = caps
            .name("pid")
            .or_else(|| caps.name("bpid"))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);
        let mut body = line[caps.get(0).map_or(0, |m| m.end())..].to_owned();

        if body.starts_with("+++") || body.starts_with("---") {
            continue;
        }

        let resumed = RESUMED
            .captures(&body)
            .map(|caps| (caps[0].len(), caps["name"].to_owned()));
        if let Some((prefix_len, name)) = resumed {
            match unfinished.remove(&pid) {
                Some(head) => body = head + &body[prefix_len..],
                None => {
                    log!(
                        LogDebug,
                        "{}:{}: resumed `{}` without a start",
                        filename,
                        lineno + 1,
                        name
                    );
                    continue;
                }
            }
        }

        if body.ends_with(UNFINISHED) {
            let head = body[..body.len() - UNFINISHED.len()].to_owned();
            unfinished.insert(pid, head);
            continue;
        }

        match parse_line(&body) {
            Ok(Some(record)) => {
                let tree = tree.get_or_insert_with(|| TraceTree::new(filename, pid));
                if is_fork(&record.name) && !record.failed() && record.ret > 0 {
                    tree.add_child(pid, record.ret as pid_t);
                }
                tree.add_record(pid, record);
            }
            Ok(None) => (),
            Err(e) => log!(
                LogDebug,
                "{}:{}: skipping unparsable line: {}",
                filename,
                lineno + 1,
                e
            ),
        }
    }

    let mut tree = tree?;
    if tree.is_empty() {
        return None;
    }
    tree.link_parents();
    Some(tree)
}

fn is_fork(name: &str) -> bool {
    match name {
        "clone" | "clone3" | "fork" | "vfork" => true,
        _ => false,
    }
}

/// Parses one complete call line (no pid prefix). Returns `Ok(None)` for lines
/// that aren't calls, e.g. `exit_group(0) = ?` has no result worth keeping but
/// is still a record; only lines without any `name(` prefix are ignored.
pub fn parse_line(body: &str) -> Result<Option<TraceRecord>, ParseError> {
    let bytes = body.as_bytes();
    let open = match memchr(b'(', bytes) {
        Some(open) => open,
        None => return Ok(None),
    };
    let name = body[..open].trim();
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Ok(None);
    }

    let mut cursor = Cursor::new(bytes, open + 1);
    let args = cursor.parse_list(b')')?;
    let rest = &body[cursor.pos..];
    let caps = match RESULT.captures(rest) {
        Some(caps) => caps,
        // Calls cut off by process exit have no result.
        None => return Ok(None),
    };

    let ret = match &caps["ret"] {
        "?" => 0,
        r => parse_int_literal(r).ok_or_else(|| ParseError {
            msg: format!("bad return value `{}`", r),
            pos: cursor.pos,
        })? as i64,
    };
    let mut record = TraceRecord::new(name, args, ret);
    if let Some(errno) = caps.name("errno") {
        record.errno = Some(errno_from_name(errno.as_str()).unwrap_or(-1));
    }
    Ok(Some(record))
}

/// Decimal, `0x` hex or `0`-prefixed octal, optionally negative.
fn parse_int_literal(s: &str) -> Option<u64> {
    let (neg, digits) = match s.strip_prefix('-') {
        Some(d) => (true, d),
        None => (false, s),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<u64>().ok()?
    };
    Some(if neg { magnitude.wrapping_neg() } else { magnitude })
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], pos: usize) -> Cursor<'a> {
        Cursor { data, pos }
    }

    fn err<T>(&self, msg: &str) -> Result<T, ParseError> {
        Err(ParseError {
            msg: msg.to_owned(),
            pos: self.pos,
        })
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn starts_with(&self, s: &[u8]) -> bool {
        self.data[self.pos..].starts_with(s)
    }

    fn eat(&mut self, s: &[u8]) -> bool {
        if self.starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Skips whitespace and `/* ... */` comments.
    fn skip_ws(&mut self) {
        loop {
            while let Some(b) = self.peek() {
                if b.is_ascii_whitespace() {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            if self.starts_with(b"/*") {
                match self.data[self.pos..].windows(2).position(|w| w == b"*/") {
                    Some(end) => self.pos += end + 2,
                    None => self.pos = self.data.len(),
                }
            } else {
                return;
            }
        }
    }

    /// Comma (or, inside `[...]`, space) separated values up to `close`.
    fn parse_list(&mut self, close: u8) -> Result<Vec<TraceValue>, ParseError> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return self.err("unterminated list"),
                Some(b) if b == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                _ => {
                    // clone() prints `flags=...` style named arguments.
                    self.parse_field_name();
                    items.push(self.parse_value()?);
                }
            }
        }
    }

    /// Consumes `name=` if present.
    fn parse_field_name(&mut self) -> Option<String> {
        let save = self.pos;
        if let Some(ident) = self.parse_ident() {
            self.skip_ws();
            if self.peek() == Some(b'=') && self.data.get(self.pos + 1) != Some(&b'=') {
                self.pos += 1;
                return Some(ident);
            }
        }
        self.pos = save;
        None
    }

    fn parse_struct(&mut self) -> Result<TraceValue, ParseError> {
        let mut fields = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return self.err("unterminated struct"),
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(TraceValue::Struct(fields));
                }
                Some(b',') => {
                    self.pos += 1;
                    continue;
                }
                _ => (),
            }
            let name = self.parse_field_name();
            let value = self.parse_value()?;
            fields.push((name, value));
        }
    }

    fn parse_value(&mut self) -> Result<TraceValue, ParseError> {
        let first = self.parse_primary()?;
        let mut terms = vec![first];
        loop {
            self.skip_ws();
            if self.starts_with(b"||") {
                return self.err("unexpected `||`");
            }
            if self.eat(b"|") {
                self.skip_ws();
                terms.push(self.parse_primary()?);
            } else {
                break;
            }
        }
        let value = if terms.len() == 1 {
            terms.pop().unwrap_or(TraceValue::Unknown)
        } else {
            TraceValue::Or(terms)
        };
        if self.eat(b"->") {
            self.skip_ws();
            let after = self.parse_value()?;
            return Ok(TraceValue::Changed(Box::new(value), Box::new(after)));
        }
        Ok(value)
    }

    fn parse_primary(&mut self) -> Result<TraceValue, ParseError> {
        self.skip_ws();
        match self.peek() {
            None => self.err("unexpected end of line"),
            Some(b'"') => {
                let s = self.parse_string()?;
                // Truncated by -s.
                self.eat(b"...");
                Ok(TraceValue::Str(s))
            }
            Some(b'{') => {
                self.pos += 1;
                self.parse_struct()
            }
            Some(b'[') => {
                self.pos += 1;
                Ok(TraceValue::Array(self.parse_list(b']')?))
            }
            Some(b'~') => {
                self.pos += 1;
                self.parse_primary()
            }
            Some(b'&') => {
                self.pos += 1;
                self.parse_ident();
                Ok(TraceValue::Unknown)
            }
            Some(b'.') if self.eat(b"...") => Ok(TraceValue::Unknown),
            Some(b) if b == b'-' || b.is_ascii_digit() => self.parse_number(),
            Some(b) if b.is_ascii_alphabetic() || b == b'_' => {
                let ident = self.parse_ident().unwrap_or_default();
                if ident == "NULL" {
                    return Ok(TraceValue::Null);
                }
                if self.peek() == Some(b'(') {
                    self.pos += 1;
                    let args = self.parse_list(b')')?;
                    return Ok(TraceValue::Call(ident, args));
                }
                Ok(TraceValue::Ident(ident))
            }
            Some(b) => self.err(&format!("unexpected `{}`", b as char)),
        }
    }

    fn parse_ident(&mut self) -> Option<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        if start == self.pos || self.data[start].is_ascii_digit() {
            self.pos = start;
            return None;
        }
        Some(String::from_utf8_lossy(&self.data[start..self.pos]).into_owned())
    }

    fn parse_number(&mut self) -> Result<TraceValue, ParseError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while let Some(b) = self.peek() {
            if b.is_ascii_hexdigit() || b == b'x' || b == b'X' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
        match parse_int_literal(&text) {
            Some(v) => Ok(TraceValue::Int(v)),
            None => {
                self.pos = start;
                self.err(&format!("bad number `{}`", text))
            }
        }
    }

    /// Decodes a C string literal as printed by strace (`-xx` prints every byte as `\xNN`).
    fn parse_string(&mut self) -> Result<Vec<u8>, ParseError> {
        debug_assert_eq!(self.peek(), Some(b'"'));
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            let b = match self.peek() {
                Some(b) => b,
                None => return self.err("unterminated string"),
            };
            self.pos += 1;
            match b {
                b'"' => return Ok(out),
                b'\\' => {
                    let e = match self.peek() {
                        Some(e) => e,
                        None => return self.err("unterminated escape"),
                    };
                    self.pos += 1;
                    match e {
                        b'x' => {
                            let end = (self.pos + 2).min(self.data.len());
                            let hex = String::from_utf8_lossy(&self.data[self.pos..end]);
                            match u8::from_str_radix(&hex, 16) {
                                Ok(v) => out.push(v),
                                Err(_) => return self.err("bad \\x escape"),
                            }
                            self.pos = end;
                        }
                        b'0'..=b'7' => {
                            let mut v: u32 = (e - b'0') as u32;
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        v = v * 8 + (d - b'0') as u32;
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push(v as u8);
                        }
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'v' => out.push(0x0b),
                        b'f' => out.push(0x0c),
                        b'a' => out.push(0x07),
                        b'b' => out.push(0x08),
                        other => out.push(other),
                    }
                }
                other => out.push(other),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use TraceValue::*;

    fn ident(s: &str) -> TraceValue {
        Ident(s.to_owned())
    }

    fn field<'a>(value: &'a TraceValue, name: &str) -> Option<&'a TraceValue> {
        match value {
            Struct(fields) => fields
                .iter()
                .find(|(n, _)| n.as_deref() == Some(name))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    #[test]
    fn simple_call() {
        let r = parse_line(r#"openat(AT_FDCWD, "\x2e\x2f\x66\x30", O_RDWR|O_CREAT|O_CLOEXEC, 0644) = 3"#)
            .unwrap()
            .unwrap();
        assert_eq!(r.name, "openat");
        assert_eq!(r.ret, 3);
        assert!(!r.failed());
        assert_eq!(
            r.args,
            vec![
                ident("AT_FDCWD"),
                Str(b"./f0".to_vec()),
                Or(vec![ident("O_RDWR"), ident("O_CREAT"), ident("O_CLOEXEC")]),
                Int(0o644),
            ]
        );
    }

    #[test]
    fn failed_call() {
        let r = parse_line(r#"open("\x2f\x6e\x6f", O_RDONLY) = -1 ENOENT (No such file or directory)"#)
            .unwrap()
            .unwrap();
        assert_eq!(r.ret, -1);
        assert_eq!(r.errno, Some(libc::ENOENT));
        assert!(r.failed());
    }

    #[test]
    fn structs_arrays_and_calls() {
        let r = parse_line(
            r#"connect(3, {sa_family=AF_INET, sin_port=htons(80), sin_addr=inet_addr("127.0.0.1")}, 16) = 0"#,
        )
        .unwrap()
        .unwrap();
        let addr = &r.args[1];
        assert_eq!(field(addr, "sa_family"), Some(&ident("AF_INET")));
        assert_eq!(
            field(addr, "sin_port"),
            Some(&Call("htons".into(), vec![Int(80)]))
        );

        let r = parse_line("pipe([3, 4]) = 0").unwrap().unwrap();
        assert_eq!(r.args, vec![Array(vec![Int(3), Int(4)])]);

        let r = parse_line("accept(3, {sa_family=AF_UNIX}, [110->2]) = 5").unwrap().unwrap();
        assert_eq!(r.args[2], Array(vec![Changed(Box::new(Int(110)), Box::new(Int(2)))]));
        assert_eq!(r.args[2].input(), &r.args[2]);
    }

    #[test]
    fn misc_tokens() {
        let r = parse_line(r#"write(1, "hi\n"..., 3) = 3"#).unwrap().unwrap();
        assert_eq!(r.args[1], Str(b"hi\n".to_vec()));

        let r = parse_line("mmap(NULL, 4096, PROT_READ, MAP_PRIVATE|MAP_ANONYMOUS, -1, 0) = 0x7f0000000000")
            .unwrap()
            .unwrap();
        assert_eq!(r.args[0], Null);
        assert_eq!(r.args[4], Int(u64::MAX));
        assert_eq!(r.ret, 0x7f0000000000);

        let r = parse_line("rt_sigprocmask(SIG_BLOCK, ~[RTMIN RT_1], [], 8) = 0").unwrap().unwrap();
        assert_eq!(r.args.len(), 4);

        let r = parse_line("exit_group(0) = ?").unwrap().unwrap();
        assert_eq!(r.ret, 0);

        assert!(parse_line("write(1, \"abc\", 3").is_err());
        assert!(parse_line("not a call").unwrap().is_none());
    }

    #[test]
    fn int_literals() {
        assert_eq!(parse_int_literal("0"), Some(0));
        assert_eq!(parse_int_literal("0x1f"), Some(31));
        assert_eq!(parse_int_literal("0755"), Some(0o755));
        assert_eq!(parse_int_literal("-100"), Some(0xffffffffffffff9c));
        assert_eq!(parse_int_literal("zz"), None);
    }

    #[test]
    fn multi_process_trace() {
        let text = "\
100 getpid() = 100
100 clone(child_stack=NULL, flags=CLONE_CHILD_CLEARTID|SIGCHLD, child_tidptr=0x7f) = 101
101 getpid() = 101
100 read(3,  <unfinished ...>
101 close(4) = 0
100 <... read resumed>\"\\x61\", 1) = 1
101 +++ exited with 0 +++
100 --- SIGCHLD {si_signo=SIGCHLD} ---
100 exit_group(0) = ?
";
        let tree = parse_str("t", text).unwrap();
        assert_eq!(tree.root_pid, 100);
        assert_eq!(tree.children(100), &[101]);
        assert_eq!(tree.node(101).unwrap().ppid, Some(100));
        let parent: Vec<&str> = tree
            .node(100)
            .unwrap()
            .records
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(parent, vec!["getpid", "clone", "read", "exit_group"]);
        let read = &tree.node(100).unwrap().records[2];
        assert_eq!(read.args, vec![Int(3), Str(b"a".to_vec()), Int(1)]);
        assert_eq!(tree.node(101).unwrap().records.len(), 2);
    }

    #[test]
    fn reused_pid_keeps_a_single_edge() {
        let text = "\
100 fork() = 101
101 getpid() = 101
101 +++ exited with 0 +++
100 fork() = 101
101 getuid() = 0
";
        let tree = parse_str("t", text).unwrap();
        assert_eq!(tree.children(100), &[101]);
        assert_eq!(tree.node(101).unwrap().records.len(), 2);
    }

    #[test]
    fn empty_traces() {
        assert!(parse_str("empty", "").is_none());
        assert!(parse_str("noise", "+++ exited with 0 +++\n--- SIGCHLD ---\n").is_none());
    }

    #[test]
    fn parse_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace0");
        fs::write(&path, "getuid() = 1000\n").unwrap();
        let tree = parse(&path).unwrap().unwrap();
        assert_eq!(tree.filename, "trace0");
        assert_eq!(tree.root_pid, 0);
        assert!(parse(&dir.path().join("missing")).is_err());
    }
}
