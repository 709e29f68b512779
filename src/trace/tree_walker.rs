use super::trace_tree::{TraceNode, TraceTree};
use libc::pid_t;
use std::{
    collections::HashSet,
    error::Error,
    fmt::{self, Display, Formatter},
};

#[derive(Debug, Eq, PartialEq)]
pub enum WalkError {
    /// The pid was reached a second time: the tree has a cycle or a duplicated edge.
    Revisited(pid_t),
}

impl Display for WalkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WalkError::Revisited(pid) => write!(f, "process {} reached twice in process tree", pid),
        }
    }
}

impl Error for WalkError {}

/// Visits every process reachable from `start` in pre-order: a parent before
/// all of its descendants, siblings in the order they were forked.
///
/// Children that have no node (the tracer saw the fork but captured no syscalls)
/// are skipped. Uses an explicit stack so deep fork chains can't overflow.
pub fn walk<T, F>(tree: &TraceTree, start: pid_t, mut visit: F) -> Result<Vec<T>, WalkError>
where
    F: FnMut(&TraceNode) -> T,
{
    let mut results = Vec::new();
    let mut visited: HashSet<pid_t> = HashSet::new();
    let mut stack: Vec<pid_t> = vec![start];

    while let Some(pid) = stack.pop() {
        let node = match tree.node(pid) {
            Some(node) => node,
            None => continue,
        };
        if !visited.insert(pid) {
            return Err(WalkError::Revisited(pid));
        }
        results.push(visit(node));
        // Reverse so the first child is popped first.
        for &child in tree.children(pid).iter().rev() {
            stack.push(child);
        }
    }

    Ok(results)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::trace::trace_tree::TraceRecord;

    fn tree_with(pids: &[pid_t], edges: &[(pid_t, pid_t)]) -> TraceTree {
        let mut tree = TraceTree::new("test", pids[0]);
        for &pid in pids {
            tree.add_record(pid, TraceRecord::new("getpid", vec![], pid as i64));
        }
        for &(parent, child) in edges {
            tree.add_child(parent, child);
        }
        tree
    }

    #[test]
    fn parents_before_descendants() {
        //      1
        //    /   \
        //   2     5
        //  / \     \
        // 3   4     6
        let tree = tree_with(
            &[1, 2, 3, 4, 5, 6],
            &[(1, 2), (1, 5), (2, 3), (2, 4), (5, 6)],
        );
        let order = walk(&tree, 1, |n| n.pid).unwrap();
        assert_eq!(order, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn sibling_order_is_fork_order() {
        let tree = tree_with(&[10, 30, 20], &[(10, 30), (10, 20)]);
        assert_eq!(walk(&tree, 10, |n| n.pid).unwrap(), vec![10, 30, 20]);
    }

    #[test]
    fn absent_children_are_skipped() {
        // 7 was forked but none of its syscalls were captured.
        let tree = tree_with(&[1, 2, 3], &[(1, 7), (1, 2), (7, 3), (2, 8)]);
        let order = walk(&tree, 1, |n| n.pid).unwrap();
        assert_eq!(order, vec![1, 2]);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let tree = tree_with(&[1], &[]);
        assert!(walk(&tree, 42, |n| n.pid).unwrap().is_empty());
    }

    #[test]
    fn cycles_fail_fast() {
        let tree = tree_with(&[1, 2], &[(1, 2), (2, 1)]);
        assert_eq!(walk(&tree, 1, |n| n.pid), Err(WalkError::Revisited(1)));

        let shared = tree_with(&[1, 2, 3], &[(1, 2), (1, 3), (3, 2)]);
        assert_eq!(walk(&shared, 1, |n| n.pid), Err(WalkError::Revisited(2)));
    }

    #[test]
    fn reused_child_pid_is_walked_once() {
        let tree = tree_with(&[1, 2], &[(1, 2), (1, 2)]);
        assert_eq!(tree.children(1), &[2]);
        assert_eq!(walk(&tree, 1, |n| n.pid).unwrap(), vec![1, 2]);
    }

    #[test]
    fn deep_chains_do_not_recurse() {
        let pids: Vec<pid_t> = (1..=50_000).collect();
        let edges: Vec<(pid_t, pid_t)> = pids.windows(2).map(|w| (w[0], w[1])).collect();
        let tree = tree_with(&pids, &edges);
        let order = walk(&tree, 1, |n| n.pid).unwrap();
        assert_eq!(order.len(), pids.len());
        assert_eq!(order.last(), Some(&50_000));
    }
}
