use thiserror::Error;

use crate::expr::ExprId;

/// Consistency violations found by [`LinearIr::validate`].
///
/// [`LinearIr::validate`]: crate::LinearIr::validate
#[derive(Debug, Error)]
pub enum LirError {
    #[error("physical order covers {ordered} expression(s), arena holds {exprs}")]
    OrderMismatch { ordered: usize, exprs: usize },

    #[error("{expr} input {port} is not registered with its connector")]
    DanglingPort { expr: ExprId, port: usize },

    #[error("{expr} is ordered before its producer {producer}")]
    UseBeforeDef { expr: ExprId, producer: ExprId },
}
