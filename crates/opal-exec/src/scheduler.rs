//! Processing-order execution over a device stream.

use std::collections::{BTreeMap, HashMap};

use opal_cache::{KernelId, KernelsCache};
use opal_graph::{NodeId, PrimitiveKind, Program, ProgramNode};

use crate::error::ExecError;
use crate::stream::{BufferId, DeviceStream, Event, KernelArgs};

/// Per-node lifecycle during one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    /// All dependencies dispatched or completed.
    Ready,
    /// Enqueued on the stream with a completion event.
    Dispatched,
    Completed,
    /// Dispatch failed, or an upstream dependency failed.
    Failed,
}

/// Provides device buffers for node outputs before any dispatch.
pub trait BufferAllocator {
    fn alloc(&mut self, node: &ProgramNode) -> Result<BufferId, ExecError>;
}

/// Outcome of one scheduler run.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub states: BTreeMap<NodeId, NodeState>,
    pub errors: Vec<(NodeId, ExecError)>,
    pub output_events: Vec<(NodeId, Event)>,
}

impl ExecutionReport {
    pub fn state(&self, id: NodeId) -> NodeState {
        self.states.get(&id).copied().unwrap_or(NodeState::Pending)
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
            && self
                .states
                .values()
                .all(|&s| s == NodeState::Completed)
    }
}

/// Dispatches a program's nodes in processing order.
///
/// Buffer allocation for every node happens up front; an allocation
/// failure aborts before anything reaches the stream. During the walk a
/// node whose dependencies are all dispatched gets their events
/// aggregated into a single wait and is enqueued. A per-node dispatch
/// failure marks that node and its dependents `Failed` without touching
/// branches already enqueued.
#[derive(Debug, Default)]
pub struct Scheduler {
    bindings: HashMap<NodeId, KernelId>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates a node with the compiled kernel it dispatches.
    pub fn bind(&mut self, node: NodeId, kernel: KernelId) {
        self.bindings.insert(node, kernel);
    }

    pub fn run(
        &self,
        program: &Program,
        cache: &KernelsCache,
        allocator: &mut dyn BufferAllocator,
        stream: &mut dyn DeviceStream,
    ) -> Result<ExecutionReport, ExecError> {
        // All-or-nothing allocation, before the first dispatch.
        let mut buffers: HashMap<NodeId, BufferId> = HashMap::new();
        for &id in program.processing_order() {
            buffers.insert(id, allocator.alloc(program.node(id))?);
        }

        let mut report = ExecutionReport::default();
        let mut events: HashMap<NodeId, Event> = HashMap::new();
        for &id in program.processing_order() {
            report.states.insert(id, NodeState::Pending);
        }

        for &id in program.processing_order() {
            let node = program.node(id);
            // Constants and graph inputs are materialized before the run.
            if matches!(node.kind, PrimitiveKind::Data | PrimitiveKind::Input) {
                report.states.insert(id, NodeState::Completed);
                continue;
            }
            if node
                .deps
                .iter()
                .any(|d| report.state(*d) == NodeState::Failed)
            {
                report.states.insert(id, NodeState::Failed);
                continue;
            }
            report.states.insert(id, NodeState::Ready);

            let dep_events: Vec<Event> = node
                .deps
                .iter()
                .filter_map(|d| events.get(d).copied())
                .collect();
            match self.dispatch(node, cache, &buffers, &dep_events, stream) {
                Ok(event) => {
                    events.insert(id, event);
                    report.states.insert(id, NodeState::Dispatched);
                    if node.is_output {
                        report.output_events.push((id, event));
                    }
                }
                Err(err) => {
                    log::warn!("dispatch failed for `{}`: {err}", node.name);
                    report.states.insert(id, NodeState::Failed);
                    report.errors.push((id, err));
                }
            }
        }

        // Drain the queue at the outputs; everything dispatched upstream
        // of a completed output has completed with it.
        for &(id, event) in &report.output_events {
            if let Err(err) = stream.wait(event) {
                report.states.insert(id, NodeState::Failed);
                report.errors.push((id, err));
            }
        }
        for state in report.states.values_mut() {
            if *state == NodeState::Dispatched {
                *state = NodeState::Completed;
            }
        }
        Ok(report)
    }

    fn dispatch(
        &self,
        node: &ProgramNode,
        cache: &KernelsCache,
        buffers: &HashMap<NodeId, BufferId>,
        dep_events: &[Event],
        stream: &mut dyn DeviceStream,
    ) -> Result<Event, ExecError> {
        let kernel_id = self.bindings.get(&node.id).ok_or_else(|| {
            ExecError::MissingKernel { node: node.name.clone() }
        })?;
        let kernel = cache.get_kernel(kernel_id)?;
        let args = KernelArgs {
            inputs: node.deps.iter().map(|d| buffers[d]).collect(),
            output: buffers[&node.id],
        };
        let wait_for = if dep_events.is_empty() {
            Vec::new()
        } else {
            vec![stream.aggregate_events(dep_events, true, node.is_output)]
        };
        stream.enqueue(&kernel, &args, &wait_for)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use opal_cache::{CompiledKernel, CompilerDriver, DriverError, KernelSource};
    use opal_graph::{DataType, Format, Layout};

    #[derive(Debug)]
    struct EchoDriver;

    impl CompilerDriver for EchoDriver {
        fn build(
            &self,
            _options: &str,
            sources: &[Arc<KernelSource>],
        ) -> Result<Vec<CompiledKernel>, DriverError> {
            Ok(sources
                .iter()
                .map(|s| CompiledKernel {
                    entry_point: s.entry_point.clone(),
                    binary: Arc::new(s.code.clone().into_bytes()),
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct CountingAllocator {
        next: u32,
        fail_on: Option<String>,
    }

    impl BufferAllocator for CountingAllocator {
        fn alloc(&mut self, node: &ProgramNode) -> Result<BufferId, ExecError> {
            if self.fail_on.as_deref() == Some(node.name.as_str()) {
                return Err(ExecError::AllocationFailed {
                    node: node.name.clone(),
                    reason: "out of device memory".into(),
                });
            }
            self.next += 1;
            Ok(BufferId(self.next))
        }
    }

    /// In-order mock stream; fails dispatches whose kernel entry point
    /// is listed in `fail_entries`.
    #[derive(Default)]
    struct MockStream {
        next: u64,
        enqueued: Vec<String>,
        fail_entries: Vec<String>,
    }

    impl DeviceStream for MockStream {
        fn enqueue(
            &mut self,
            kernel: &CompiledKernel,
            _args: &KernelArgs,
            _wait_for: &[Event],
        ) -> Result<Event, ExecError> {
            if self.fail_entries.contains(&kernel.entry_point) {
                return Err(ExecError::DispatchFailed {
                    node: kernel.entry_point.clone(),
                    reason: "device rejected kernel".into(),
                });
            }
            self.enqueued.push(kernel.entry_point.clone());
            self.next += 1;
            Ok(Event(self.next))
        }

        fn enqueue_marker(&mut self, _deps: &[Event]) -> Event {
            self.next += 1;
            Event(self.next)
        }

        fn group_events(&mut self, _deps: &[Event]) -> Event {
            self.next += 1;
            Event(self.next)
        }

        fn user_event(&mut self, _set: bool) -> Event {
            self.next += 1;
            Event(self.next)
        }

        fn wait(&mut self, _event: Event) -> Result<(), ExecError> {
            Ok(())
        }
    }

    fn l() -> Layout {
        Layout::new(DataType::F32, Format::Bfyx, &[1, 4, 4, 4])
    }

    /// input -> act_a -> out_a and input -> act_b -> out_b.
    fn two_branch_program() -> (Program, [NodeId; 5]) {
        let mut p = Program::new();
        let input = p.add_node(PrimitiveKind::Input, "input", vec![], l());
        let a = p.add_node(PrimitiveKind::Activation, "act_a", vec![input], l());
        let oa = p.add_node(PrimitiveKind::Pooling, "out_a", vec![a], l());
        let b = p.add_node(PrimitiveKind::Activation, "act_b", vec![input], l());
        let ob = p.add_node(PrimitiveKind::Pooling, "out_b", vec![b], l());
        p.mark_output(oa);
        p.mark_output(ob);
        p.rebuild_processing_order();
        (p, [input, a, oa, b, ob])
    }

    fn compiled_scheduler(p: &Program) -> (Scheduler, KernelsCache) {
        let mut cache = KernelsCache::new(Arc::new(EchoDriver));
        let mut scheduler = Scheduler::new();
        for n in p.nodes() {
            if matches!(n.kind, PrimitiveKind::Data | PrimitiveKind::Input) {
                continue;
            }
            let id = cache.set_kernel_source(
                Arc::new(KernelSource {
                    code: format!("kernel_{}", n.name),
                    build_options: String::new(),
                    entry_point: n.name.clone(),
                }),
                false,
            );
            scheduler.bind(n.id, id);
        }
        cache.compile_sequential().unwrap();
        (scheduler, cache)
    }

    #[test]
    fn full_run_completes_every_node() {
        let (p, _) = two_branch_program();
        let (scheduler, cache) = compiled_scheduler(&p);
        let mut alloc = CountingAllocator::default();
        let mut stream = MockStream::default();
        let report = scheduler.run(&p, &cache, &mut alloc, &mut stream).unwrap();
        assert!(report.is_success());
        assert_eq!(report.output_events.len(), 2);
        // Dependencies always dispatch before their consumers.
        let pos = |name: &str| stream.enqueued.iter().position(|e| e == name).unwrap();
        assert!(pos("act_a") < pos("out_a"));
        assert!(pos("act_b") < pos("out_b"));
    }

    #[test]
    fn dispatch_failure_poisons_only_its_subtree() {
        let (p, [input, a, oa, b, ob]) = two_branch_program();
        let (scheduler, cache) = compiled_scheduler(&p);
        let mut alloc = CountingAllocator::default();
        let mut stream = MockStream {
            fail_entries: vec!["act_a".into()],
            ..Default::default()
        };
        let report = scheduler.run(&p, &cache, &mut alloc, &mut stream).unwrap();
        assert_eq!(report.state(a), NodeState::Failed);
        assert_eq!(report.state(oa), NodeState::Failed);
        assert_eq!(report.state(input), NodeState::Completed);
        assert_eq!(report.state(b), NodeState::Completed);
        assert_eq!(report.state(ob), NodeState::Completed);
        // Only the failing node carries an error; its dependents are
        // skipped silently.
        assert_eq!(report.errors.len(), 1);
        assert!(!stream.enqueued.contains(&"out_a".to_string()));
    }

    #[test]
    fn allocation_failure_aborts_before_any_dispatch() {
        let (p, _) = two_branch_program();
        let (scheduler, cache) = compiled_scheduler(&p);
        let mut alloc = CountingAllocator {
            fail_on: Some("act_b".into()),
            ..Default::default()
        };
        let mut stream = MockStream::default();
        let err = scheduler
            .run(&p, &cache, &mut alloc, &mut stream)
            .unwrap_err();
        assert!(matches!(err, ExecError::AllocationFailed { .. }));
        assert!(stream.enqueued.is_empty());
    }

    #[test]
    fn unbound_node_fails_locally() {
        let (p, [_, a, oa, _, ob]) = two_branch_program();
        let (mut scheduler, cache) = compiled_scheduler(&p);
        scheduler.bindings.remove(&a);
        let mut alloc = CountingAllocator::default();
        let mut stream = MockStream::default();
        let report = scheduler.run(&p, &cache, &mut alloc, &mut stream).unwrap();
        assert_eq!(report.state(a), NodeState::Failed);
        assert_eq!(report.state(oa), NodeState::Failed);
        assert_eq!(report.state(ob), NodeState::Completed);
        assert!(matches!(report.errors[0].1, ExecError::MissingKernel { .. }));
    }
}
