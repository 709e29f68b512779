pub mod trace_parser;
pub mod trace_tree;
pub mod tree_walker;

pub use trace_tree::{TraceRecord, TraceValue};
