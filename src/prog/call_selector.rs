use super::builder::evaluate;
use crate::{
    target::{Syscall, Target, Type},
    trace::{TraceRecord, TraceValue},
};

/// The descriptor chosen for a trace record, plus which trace argument feeds
/// each descriptor field (`None` leaves the field at its default).
#[derive(Debug)]
pub struct Selection<'t> {
    pub syscall: &'t Syscall,
    pub mapping: Vec<Option<usize>>,
}

impl<'t> Selection<'t> {
    /// Field `i` takes trace argument `i`.
    pub fn positional(syscall: &'t Syscall) -> Selection<'t> {
        Selection {
            syscall,
            mapping: (0..syscall.args.len()).map(Some).collect(),
        }
    }
}

/// Decides which descriptor (if any) a trace record becomes.
pub trait CallSelector {
    fn select<'t>(&self, target: &'t Target, record: &TraceRecord) -> Option<Selection<'t>>;
}

/// Syscalls strace reports under a name the target describes differently.
/// The mapping lists, per descriptor field, the trace argument it comes from.
const ALIASES: &[(&str, &str, &[usize])] = &[
    ("accept4", "accept", &[0, 1, 2]),
    ("mmap2", "mmap", &[0, 1, 2, 3, 4, 5]),
    ("stat64", "stat", &[0, 1]),
    ("lstat64", "lstat", &[0, 1]),
    ("fstat64", "fstat", &[0, 1]),
    ("fstatat64", "newfstatat", &[0, 1, 2, 3]),
    ("fcntl64", "fcntl", &[0, 1, 2]),
    ("eventfd", "eventfd2", &[0]),
    ("epoll_create", "epoll_create1", &[]),
];

/// Picks descriptors by name. For calls with `$variant` descriptors, a
/// variant wins when every constant in its schema matches the traced value,
/// e.g. `socket(AF_INET, ...)` becomes `socket$inet` and
/// `connect(3, {sa_family=AF_UNIX, ...}, ...)` becomes `connect$unix`.
#[derive(Default)]
pub struct DefaultCallSelector;

impl CallSelector for DefaultCallSelector {
    fn select<'t>(&self, target: &'t Target, record: &TraceRecord) -> Option<Selection<'t>> {
        let alias = ALIASES.iter().find(|(name, _, _)| *name == record.name);
        let call_name = alias.map_or(record.name.as_str(), |(_, to, _)| *to);

        let mut plain = None;
        let mut chosen = None;
        for syscall in target.variants(call_name) {
            if syscall.name == call_name {
                plain = Some(syscall);
            } else if chosen.is_none() && variant_matches(target, syscall, record, alias) {
                chosen = Some(syscall);
            }
        }
        let syscall = chosen.or(plain)?;

        Some(match alias {
            Some((_, _, mapping)) => {
                let mut mapping: Vec<Option<usize>> = mapping.iter().copied().map(Some).collect();
                mapping.resize(syscall.args.len(), None);
                Selection { syscall, mapping }
            }
            None => Selection::positional(syscall),
        })
    }
}

fn variant_matches(
    target: &Target,
    syscall: &Syscall,
    record: &TraceRecord,
    alias: Option<&(&str, &str, &[usize])>,
) -> bool {
    let mut discriminated = false;
    for (i, field) in syscall.args.iter().enumerate() {
        let trace_index = match alias {
            Some((_, _, mapping)) => match mapping.get(i) {
                Some(&j) => j,
                None => continue,
            },
            None => i,
        };
        let value = match record.args.get(trace_index) {
            Some(value) => value.input(),
            None => continue,
        };
        match consts_match(target, &field.typ, value) {
            Some(true) => discriminated = true,
            Some(false) => return false,
            None => (),
        }
    }
    discriminated
}

/// `Some(matches)` when `typ` carries a constant to compare against, `None` otherwise.
fn consts_match(target: &Target, typ: &Type, value: &TraceValue) -> Option<bool> {
    match typ {
        Type::Const { val, .. } => Some(evaluate(target, value) == Some(*val)),
        Type::Ptr { elem, .. } => consts_match(target, elem, value),
        // Only the leading field: strace names sockaddr families `sa_family`
        // whatever the concrete struct.
        Type::Struct { fields, .. } => match (fields.first(), value) {
            (Some(field), TraceValue::Struct(items)) => {
                let (_, first) = items.first()?;
                consts_match(target, &field.typ, first.input())
            }
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{target::get_target, trace::trace_parser::parse_line};

    fn select_line(target: &Target, line: &str) -> Option<String> {
        let record = parse_line(line).unwrap().unwrap();
        DefaultCallSelector
            .select(target, &record)
            .map(|s| s.syscall.name.clone())
    }

    #[test]
    fn variants_by_constant() {
        let target = get_target("linux", "amd64").unwrap();
        assert_eq!(
            select_line(&target, "socket(AF_INET, SOCK_STREAM, IPPROTO_IP) = 3").as_deref(),
            Some("socket$inet")
        );
        assert_eq!(
            select_line(&target, "socket(AF_UNIX, SOCK_STREAM, 0) = 3").as_deref(),
            Some("socket$unix")
        );
        assert_eq!(
            select_line(&target, "socket(AF_NETLINK, SOCK_RAW, 0) = 3").as_deref(),
            Some("socket")
        );
        assert_eq!(
            select_line(
                &target,
                r#"connect(3, {sa_family=AF_UNIX, sun_path="\x2f\x74"}, 110) = 0"#
            )
            .as_deref(),
            Some("connect$unix")
        );
        assert_eq!(
            select_line(
                &target,
                "bind(3, {sa_family=AF_INET, sin_port=htons(80), sin_addr=inet_addr(\"0.0.0.0\")}, 16) = 0"
            )
            .as_deref(),
            Some("bind$inet")
        );
    }

    #[test]
    fn aliases_and_unknowns() {
        let target = get_target("linux", "amd64").unwrap();
        let record = parse_line("accept4(3, NULL, NULL, SOCK_CLOEXEC) = 4").unwrap().unwrap();
        let sel = DefaultCallSelector.select(&target, &record).unwrap();
        assert_eq!(sel.syscall.name, "accept");
        assert_eq!(sel.mapping, vec![Some(0), Some(1), Some(2)]);

        assert_eq!(select_line(&target, "getpid() = 10").as_deref(), Some("getpid"));
        assert_eq!(select_line(&target, "ptrace(PTRACE_TRACEME) = 0"), None);
    }

    #[test]
    fn selection_outlives_the_record() {
        let target = get_target("linux", "amd64").unwrap();
        let selection = {
            let record = parse_line("socket(AF_INET, SOCK_DGRAM, 0) = 3").unwrap().unwrap();
            DefaultCallSelector.select(&target, &record).unwrap()
        };
        assert_eq!(selection.syscall.name, "socket$inet");
        assert_eq!(selection.mapping.len(), 3);
    }
}
