use thiserror::Error;

/// A compiler driver rejection, opaque to the cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct DriverError(pub String);

/// Recoverable cache failures.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("kernel `{0}` has not been compiled")]
    KernelNotFound(String),

    #[error("batch {bucket_id}/{batch_id} failed to build")]
    BatchFailed {
        bucket_id: u32,
        batch_id: u32,
        #[source]
        source: DriverError,
    },

    #[error("compilation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("corrupt kernel store: {0}")]
    CorruptStore(String),
}
