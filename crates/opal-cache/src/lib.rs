//! Kernel compilation cache for Opal.
//!
//! Kernel sources are submitted as they are selected for graph nodes,
//! deduplicated by SHA-256 content hash, compiled in batches through a
//! pluggable [`CompilerDriver`], and served back as opaque
//! [`CompiledKernel`] handles. Compiled state can be persisted to a
//! binary stream and restored to skip recompilation across runs. A
//! byte-capacity [`LruCache`] is provided for bounding derived caches
//! (kernel implementations, tuned configurations) by memory footprint.

mod cache;
mod context;
mod driver;
mod error;
mod kernel;
mod lru;
mod persist;

pub use cache::{KernelsCache, MAX_KERNELS_PER_BATCH};
pub use context::CompilationContext;
pub use driver::{CompilerDriver, InlineExecutor, RayonExecutor, Task, TaskExecutor};
pub use error::{CacheError, DriverError};
pub use kernel::{BatchProgram, CompiledKernel, KernelCode, KernelId, KernelSource};
pub use lru::LruCache;
