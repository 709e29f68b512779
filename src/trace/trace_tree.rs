use libc::pid_t;
use std::collections::HashMap;

/// An argument as strace printed it.
#[derive(Clone, Debug, PartialEq)]
pub enum TraceValue {
    /// Numeric literal. Negative numbers are stored two's complement.
    Int(u64),
    /// A named constant, e.g. `O_RDONLY` or `AT_FDCWD`.
    Ident(String),
    /// `A|B|0x10`
    Or(Vec<TraceValue>),
    Str(Vec<u8>),
    /// `{name=value, ...}`. Unnamed fields have no name.
    Struct(Vec<(Option<String>, TraceValue)>),
    Array(Vec<TraceValue>),
    /// `htons(80)`, `inet_addr("127.0.0.1")`, `makedev(0x1, 0x3)`...
    Call(String, Vec<TraceValue>),
    /// `[16->8]`: the value going in and the value coming back.
    Changed(Box<TraceValue>, Box<TraceValue>),
    Null,
    /// `...` or anything else strace elided.
    Unknown,
}

impl TraceValue {
    /// The value the caller passed in, looking through `in->out` annotations.
    pub fn input(&self) -> &TraceValue {
        match self {
            TraceValue::Changed(before, _) => before.input(),
            v => v,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraceRecord {
    pub name: String,
    pub args: Vec<TraceValue>,
    pub ret: i64,
    /// Set when the call returned an error.
    pub errno: Option<i32>,
}

impl TraceRecord {
    pub fn new(name: &str, args: Vec<TraceValue>, ret: i64) -> TraceRecord {
        TraceRecord {
            name: name.to_owned(),
            args,
            ret,
            errno: None,
        }
    }

    pub fn failed(&self) -> bool {
        self.errno.is_some() || self.ret < 0
    }
}

#[derive(Clone, Debug, Default)]
pub struct TraceNode {
    pub pid: pid_t,
    pub ppid: Option<pid_t>,
    pub records: Vec<TraceRecord>,
}

/// Syscalls of one trace file, grouped by process, with the fork hierarchy.
#[derive(Clone, Debug, Default)]
pub struct TraceTree {
    pub filename: String,
    pub root_pid: pid_t,
    trace_map: HashMap<pid_t, TraceNode>,
    ptree: HashMap<pid_t, Vec<pid_t>>,
}

impl TraceTree {
    pub fn new(filename: &str, root_pid: pid_t) -> TraceTree {
        TraceTree {
            filename: filename.to_owned(),
            root_pid,
            trace_map: HashMap::new(),
            ptree: HashMap::new(),
        }
    }

    pub fn add_record(&mut self, pid: pid_t, record: TraceRecord) {
        self.trace_map
            .entry(pid)
            .or_insert_with(|| TraceNode {
                pid,
                ..Default::default()
            })
            .records
            .push(record);
    }

    /// Records `child` as forked by `parent`. Children keep the order they are
    /// first added in; a pid the parent already forked is not added again.
    pub fn add_child(&mut self, parent: pid_t, child: pid_t) {
        let children = self.ptree.entry(parent).or_insert_with(Vec::new);
        if !children.contains(&child) {
            children.push(child);
        }
        if let Some(node) = self.trace_map.get_mut(&child) {
            node.ppid = Some(parent);
        }
    }

    pub fn node(&self, pid: pid_t) -> Option<&TraceNode> {
        self.trace_map.get(&pid)
    }

    pub fn children(&self, pid: pid_t) -> &[pid_t] {
        self.ptree.get(&pid).map_or(&[][..], |c| c.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.trace_map.values().all(|n| n.records.is_empty())
    }

    /// Fills in parent pids for nodes whose first record came after the fork was seen.
    pub fn link_parents(&mut self) {
        for (&parent, children) in &self.ptree {
            for child in children {
                if let Some(node) = self.trace_map.get_mut(child) {
                    node.ppid = Some(parent);
                }
            }
        }
    }
}
