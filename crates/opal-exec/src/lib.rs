//! Execution engine for optimized Opal programs.
//!
//! The scheduler walks a program's processing order and dispatches each
//! node's compiled kernel onto a [`DeviceStream`], joining dependency
//! events into single wait points and isolating failures to the subtree
//! that depends on them.

mod error;
mod scheduler;
mod stream;

pub use error::ExecError;
pub use scheduler::{BufferAllocator, ExecutionReport, NodeState, Scheduler};
pub use stream::{BufferId, DeviceStream, Event, KernelArgs};
