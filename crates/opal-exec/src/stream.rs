//! Device command stream abstraction.

use std::fmt;

use opal_cache::CompiledKernel;

use crate::error::ExecError;

/// Opaque completion token for enqueued device work.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Event(pub u64);

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ev{}", self.0)
    }
}

/// A device-side memory binding.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BufferId(pub u32);

/// Buffer bindings for one kernel dispatch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KernelArgs {
    pub inputs: Vec<BufferId>,
    pub output: BufferId,
}

/// An asynchronous device command queue.
///
/// Work is enqueued with an explicit wait list and completes out of band;
/// the host only blocks in [`wait`](Self::wait).
pub trait DeviceStream {
    /// Enqueues a kernel dispatch gated on `wait_for`.
    fn enqueue(
        &mut self,
        kernel: &CompiledKernel,
        args: &KernelArgs,
        wait_for: &[Event],
    ) -> Result<Event, ExecError>;

    /// Enqueues a barrier-like marker completing after `deps`. An empty
    /// wait list yields an already-completed event.
    fn enqueue_marker(&mut self, deps: &[Event]) -> Event;

    /// Joins events without a queue round-trip, where the device allows.
    fn group_events(&mut self, deps: &[Event]) -> Event;

    /// Creates a host-controlled event, optionally pre-completed.
    fn user_event(&mut self, set: bool) -> Event;

    /// Blocks until the event completes.
    fn wait(&mut self, event: Event) -> Result<(), ExecError>;

    /// Collapses a dependency list into one event to wait on.
    ///
    /// A single event passes through untouched unless the consumer is an
    /// output (outputs get a real queue marker so external waiters see a
    /// queued completion). Grouping is preferred when allowed; everything
    /// else goes through a marker.
    fn aggregate_events(&mut self, deps: &[Event], group: bool, is_output: bool) -> Event {
        if deps.len() == 1 && !is_output {
            return deps[0];
        }
        if group && !is_output {
            return self.group_events(deps);
        }
        self.enqueue_marker(deps)
    }
}
