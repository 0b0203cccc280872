use thiserror::Error;

use opal_cache::CacheError;

/// Failures surfaced while scheduling or dispatching a program.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("buffer allocation failed for node `{node}`: {reason}")]
    AllocationFailed { node: String, reason: String },

    #[error("no compiled kernel bound to node `{node}`")]
    MissingKernel { node: String },

    #[error("dispatch failed for node `{node}`: {reason}")]
    DispatchFailed { node: String, reason: String },

    #[error(transparent)]
    Cache(#[from] CacheError),
}
