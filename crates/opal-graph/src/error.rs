use thiserror::Error;

use crate::node::{NodeId, PrimitiveKind};

/// Structural invariant violations found by [`Program::validate`].
///
/// [`Program::validate`]: crate::Program::validate
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node `{node}` depends on removed node {dep}")]
    DanglingDependency { node: String, dep: NodeId },

    #[error("node `{node}` ({kind}) has {got} operand(s), expected at least {expected}")]
    OperandCount {
        node: String,
        kind: PrimitiveKind,
        expected: usize,
        got: usize,
    },

    #[error("node `{node}` lists {peer} as a memory dependency but not vice versa")]
    AsymmetricMemoryDep { node: String, peer: NodeId },

    #[error("node `{node}` is ordered before its dependency {dep}")]
    OrderViolation { node: String, dep: NodeId },

    #[error("processing order covers {ordered} node(s) but {live} are live")]
    StaleOrder { ordered: usize, live: usize },
}
