//! Compiler driver and task executor seams.

use std::sync::Arc;

use crate::error::DriverError;
use crate::kernel::{CompiledKernel, KernelSource};

/// Backend compiler invoked per batch.
///
/// Implementations are assumed non-reentrant; the cache serializes every
/// `build` call behind one mutex, so an implementation never observes
/// concurrent invocations.
pub trait CompilerDriver: Send + Sync {
    /// Compiles a batch of sources sharing one option string. Returns one
    /// compiled kernel per source, tagged with its entry point.
    fn build(
        &self,
        options: &str,
        sources: &[Arc<KernelSource>],
    ) -> Result<Vec<CompiledKernel>, DriverError>;
}

/// A boxed unit of work handed to a [`TaskExecutor`].
pub type Task<'a> = Box<dyn FnOnce() + Send + 'a>;

/// Where batch builds run. Injected so callers control the thread pool.
pub trait TaskExecutor: Send + Sync {
    /// Runs every task to completion before returning.
    fn run_all<'a>(&self, tasks: Vec<Task<'a>>);
}

/// Fans tasks out over the global rayon pool.
#[derive(Debug, Default)]
pub struct RayonExecutor;

impl TaskExecutor for RayonExecutor {
    fn run_all<'a>(&self, tasks: Vec<Task<'a>>) {
        rayon::scope(|s| {
            for task in tasks {
                s.spawn(move |_| task());
            }
        });
    }
}

/// Runs tasks inline on the calling thread, in order.
#[derive(Debug, Default)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn run_all<'a>(&self, tasks: Vec<Task<'a>>) {
        for task in tasks {
            task();
        }
    }
}
